use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use liquida_core::{ActorId, AgentId, Contract, ContractId, RuleId, TenantId, VenueId};
use liquida_rules::CommissionSplit;

/// Lifecycle of a ledger entry. States only move forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Settled,
    Void,
}

impl EntryState {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Settled => "settled",
            EntryState::Void => "void",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryState::Pending),
            "settled" => Ok(EntryState::Settled),
            "void" => Ok(EntryState::Void),
            other => Err(format!("unknown entry state: {other}")),
        }
    }
}

/// Party a movement pays out to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Agent,
    Venue,
    Platform,
}

impl RecipientType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecipientType::Agent => "agent",
            RecipientType::Venue => "venue",
            RecipientType::Platform => "platform",
        }
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(RecipientType::Agent),
            "venue" => Ok(RecipientType::Venue),
            "platform" => Ok(RecipientType::Platform),
            other => Err(format!("unknown recipient type: {other}")),
        }
    }
}

/// Commission booked for one confirmed contract ("asiento").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub tenant: TenantId,
    pub contract: ContractId,
    pub agent: Option<AgentId>,
    pub venue: Option<VenueId>,
    pub rule: RuleId,
    pub base: Decimal,
    pub total_commission: Decimal,
    pub agent_amount: Decimal,
    pub venue_amount: Decimal,
    pub platform_amount: Decimal,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<ActorId>,
    pub void_reason: Option<String>,
}

impl LedgerEntry {
    /// Build a pending entry for `contract` from a computed split.
    pub fn new(
        contract: &Contract,
        rule: RuleId,
        split: &CommissionSplit,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: contract.tenant,
            contract: contract.id,
            agent: contract.agent,
            venue: contract.venue,
            rule,
            base: contract.base,
            total_commission: split.total,
            agent_amount: split.agent,
            venue_amount: split.venue,
            platform_amount: split.platform,
            state: EntryState::Pending,
            created_at,
            settled_at: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != EntryState::Void
    }

    pub fn reconciles(&self) -> bool {
        self.total_commission == self.agent_amount + self.venue_amount + self.platform_amount
    }

    /// One movement per paid recipient. The platform movement is always
    /// present so every entry reconciles against its movements.
    pub fn movements(&self) -> Vec<Movement> {
        let mut movements = Vec::with_capacity(3);
        if self.agent_amount > Decimal::ZERO {
            movements.push(Movement::new(
                self,
                RecipientType::Agent,
                self.agent.map(|id| id.get()),
                self.agent_amount,
            ));
        }
        if self.venue_amount > Decimal::ZERO {
            movements.push(Movement::new(
                self,
                RecipientType::Venue,
                self.venue.map(|id| id.get()),
                self.venue_amount,
            ));
        }
        movements.push(Movement::new(
            self,
            RecipientType::Platform,
            None,
            self.platform_amount,
        ));
        movements
    }
}

/// Per-recipient slice of an entry ("movimiento").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    pub entry: Uuid,
    pub tenant: TenantId,
    pub recipient: RecipientType,
    /// Agent or venue id; empty for the platform.
    pub recipient_id: Option<i64>,
    pub amount: Decimal,
    pub settlement: Option<Uuid>,
}

impl Movement {
    fn new(
        entry: &LedgerEntry,
        recipient: RecipientType,
        recipient_id: Option<i64>,
        amount: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry: entry.id,
            tenant: entry.tenant,
            recipient,
            recipient_id,
            amount,
            settlement: None,
        }
    }
}

/// Result of a void request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VoidOutcome {
    Voided(LedgerEntry),
    /// The entry was already void; nothing changed.
    AlreadyVoid(LedgerEntry),
}

impl VoidOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            VoidOutcome::Voided(entry) | VoidOutcome::AlreadyVoid(entry) => entry,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            VoidOutcome::Voided(entry) | VoidOutcome::AlreadyVoid(entry) => entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquida_core::{SectionId, Tier};
    use rust_decimal_macros::dec;

    fn split(agent: Decimal, venue: Decimal, platform: Decimal) -> CommissionSplit {
        CommissionSplit {
            total: agent + venue + platform,
            agent,
            venue,
            platform,
            warnings: Vec::new(),
        }
    }

    fn contract() -> Contract {
        Contract::new(
            ContractId(1),
            TenantId(2),
            SectionId(3),
            Tier::C1,
            dec!(1000),
        )
        .with_agent(AgentId(4))
        .with_venue(VenueId(5), false)
    }

    #[test]
    fn movements_cover_total() {
        let entry = LedgerEntry::new(
            &contract(),
            RuleId(1),
            &split(dec!(30), dec!(20), dec!(50)),
            Utc::now(),
        );
        let movements = entry.movements();
        assert_eq!(movements.len(), 3);
        let sum: Decimal = movements.iter().map(|m| m.amount).sum();
        assert_eq!(sum, entry.total_commission);
        assert_eq!(movements[0].recipient_id, Some(4));
        assert!(entry.reconciles());
    }

    #[test]
    fn zero_shares_keep_platform_movement() {
        let entry = LedgerEntry::new(
            &contract(),
            RuleId(1),
            &split(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            Utc::now(),
        );
        let movements = entry.movements();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].recipient, RecipientType::Platform);
    }
}
