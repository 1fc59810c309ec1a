use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use liquida_core::TenantId;

use crate::{LedgerError, LedgerResult, RecipientType};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Open,
    Closed,
}

impl SettlementState {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementState::Open => "open",
            SettlementState::Closed => "closed",
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SettlementState::Open),
            "closed" => Ok(SettlementState::Closed),
            other => Err(format!("unknown settlement state: {other}")),
        }
    }
}

/// Payout run batching the movements of entries created within an
/// inclusive date window ("liquidación").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub tenant: TenantId,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub state: SettlementState,
    pub total_agent_amount: Decimal,
    pub total_venue_amount: Decimal,
    pub total_platform_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Settlement {
    pub fn open(
        tenant: TenantId,
        date_from: NaiveDate,
        date_to: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant,
            date_from,
            date_to,
            state: SettlementState::Open,
            total_agent_amount: Decimal::ZERO,
            total_venue_amount: Decimal::ZERO,
            total_platform_amount: Decimal::ZERO,
            created_at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SettlementState::Open
    }

    /// First instant covered by the window.
    pub fn window_start(&self) -> DateTime<Utc> {
        start_of_day(self.date_from)
    }

    /// First instant after the window; `None` when `date_to` is the last
    /// representable date.
    pub fn window_end(&self) -> Option<DateTime<Utc>> {
        self.date_to.succ_opt().map(start_of_day)
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.window_start() && self.window_end().map_or(true, |end| at < end)
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_agent_amount + self.total_venue_amount + self.total_platform_amount
    }

    /// Add a movement amount to the running total of its recipient type.
    pub fn accumulate(&mut self, recipient: RecipientType, amount: Decimal) -> LedgerResult<()> {
        let id = self.id;
        let total = self.total_mut(recipient);
        *total = total
            .checked_add(amount)
            .ok_or_else(|| overflow(id, recipient))?;
        Ok(())
    }

    /// Take a movement amount back out of the running totals, used when an
    /// entry attached to this open settlement is voided.
    pub fn deduct(&mut self, recipient: RecipientType, amount: Decimal) -> LedgerResult<()> {
        let id = self.id;
        let total = self.total_mut(recipient);
        *total = total
            .checked_sub(amount)
            .ok_or_else(|| overflow(id, recipient))?;
        Ok(())
    }

    fn total_mut(&mut self, recipient: RecipientType) -> &mut Decimal {
        match recipient {
            RecipientType::Agent => &mut self.total_agent_amount,
            RecipientType::Venue => &mut self.total_venue_amount,
            RecipientType::Platform => &mut self.total_platform_amount,
        }
    }
}

fn overflow(settlement: Uuid, recipient: RecipientType) -> LedgerError {
    LedgerError::InvalidInput(format!(
        "settlement {settlement}: {recipient} total overflows the decimal range"
    ))
}

/// Midnight UTC opening `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Result of attaching pending movements to an open settlement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachOutcome {
    pub added: usize,
    pub settlement: Settlement,
}

/// Result of closing a settlement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloseOutcome {
    pub settlement: Settlement,
    /// Entries flipped to settled by this close.
    pub settled_entries: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn accumulates_by_recipient() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let mut settlement = Settlement::open(TenantId(1), from, to, Utc::now());
        settlement.accumulate(RecipientType::Agent, dec!(30)).unwrap();
        settlement.accumulate(RecipientType::Venue, dec!(20)).unwrap();
        settlement.accumulate(RecipientType::Platform, dec!(50)).unwrap();
        settlement.accumulate(RecipientType::Agent, dec!(5)).unwrap();
        assert_eq!(settlement.total_agent_amount, dec!(35));
        assert_eq!(settlement.total_amount(), dec!(105));
        assert!(settlement.is_open());

        settlement.deduct(RecipientType::Agent, dec!(30)).unwrap();
        assert_eq!(settlement.total_agent_amount, dec!(5));
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut settlement = Settlement::open(TenantId(1), day, day, Utc::now());
        settlement.accumulate(RecipientType::Venue, Decimal::MAX).unwrap();
        let err = settlement
            .accumulate(RecipientType::Venue, dec!(1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(settlement.total_venue_amount, Decimal::MAX);
    }

    #[test]
    fn window_is_inclusive_of_both_dates() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let settlement = Settlement::open(TenantId(1), from, to, Utc::now());
        let at = |d: u32, h: u32| Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap();
        assert!(settlement.covers(at(1, 0)));
        assert!(settlement.covers(at(31, 23)));
        assert!(!settlement.covers(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
        assert!(!settlement.covers(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()));
    }
}
