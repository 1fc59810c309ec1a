use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{RuleId, SectionId, SubSectionId, TenantId};

/// Commission level assigned to a contract.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    C1,
    C2,
    C3,
    Special,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::C1 => "c1",
            Tier::C2 => "c2",
            Tier::C3 => "c3",
            Tier::Special => "special",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c1" => Ok(Tier::C1),
            "c2" => Ok(Tier::C2),
            "c3" => Ok(Tier::C3),
            "special" => Ok(Tier::Special),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// How the total commission of a rule is derived.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMode {
    PercentOfBase,
    FixedAmount,
}

impl PayoutMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutMode::PercentOfBase => "percent_of_base",
            PayoutMode::FixedAmount => "fixed_amount",
        }
    }
}

impl fmt::Display for PayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percent_of_base" | "percent" => Ok(PayoutMode::PercentOfBase),
            "fixed_amount" | "fixed" => Ok(PayoutMode::FixedAmount),
            other => Err(format!("unknown payout mode: {other}")),
        }
    }
}

/// Reason a rule definition was rejected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvalidRule {
    #[error("{field} must be a fraction between 0 and 1, got {value}")]
    PercentageOutOfRange { field: &'static str, value: Decimal },
    #[error("{field} must not be negative, got {value}")]
    NegativeAmount { field: &'static str, value: Decimal },
    #[error("{mode} rules require {field}")]
    MissingTerm {
        mode: PayoutMode,
        field: &'static str,
    },
    #[error("{field}: minimum {min} exceeds maximum {max}")]
    InvertedClamp {
        field: &'static str,
        min: Decimal,
        max: Decimal,
    },
}

/// Commission rule definition.
///
/// A rule scoped with `tenant = None` is a global default. Several rows may
/// match the same scope; the resolver decides which one applies.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub id: RuleId,
    pub tenant: Option<TenantId>,
    pub section: SectionId,
    pub sub_section: Option<SubSectionId>,
    pub tier: Tier,
    pub payout_mode: PayoutMode,
    pub percentage: Option<Decimal>,
    pub fixed_amount: Option<Decimal>,
    pub agent_percentage: Option<Decimal>,
    pub agent_fixed: Option<Decimal>,
    pub venue_percentage: Option<Decimal>,
    pub venue_fixed: Option<Decimal>,
    pub min_total: Option<Decimal>,
    pub max_total: Option<Decimal>,
    pub min_agent_amount: Option<Decimal>,
    pub max_agent_amount: Option<Decimal>,
    pub min_venue_special_amount: Option<Decimal>,
    pub max_venue_special_amount: Option<Decimal>,
    pub active: bool,
}

impl CommissionRule {
    fn blank(section: SectionId, tier: Tier, payout_mode: PayoutMode) -> Self {
        Self {
            id: RuleId::default(),
            tenant: None,
            section,
            sub_section: None,
            tier,
            payout_mode,
            percentage: None,
            fixed_amount: None,
            agent_percentage: None,
            agent_fixed: None,
            venue_percentage: None,
            venue_fixed: None,
            min_total: None,
            max_total: None,
            min_agent_amount: None,
            max_agent_amount: None,
            min_venue_special_amount: None,
            max_venue_special_amount: None,
            active: true,
        }
    }

    /// Global rule paying `percentage` of the contract base. The id stays
    /// zero until the rule is stored.
    pub fn percent_of_base(section: SectionId, tier: Tier, percentage: Decimal) -> Self {
        let mut rule = Self::blank(section, tier, PayoutMode::PercentOfBase);
        rule.percentage = Some(percentage);
        rule
    }

    /// Global rule paying a flat amount per contract.
    pub fn fixed(section: SectionId, tier: Tier, amount: Decimal) -> Self {
        let mut rule = Self::blank(section, tier, PayoutMode::FixedAmount);
        rule.fixed_amount = Some(amount);
        rule
    }

    pub fn for_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn for_sub_section(mut self, sub_section: SubSectionId) -> Self {
        self.sub_section = Some(sub_section);
        self
    }

    pub fn with_agent_rate(mut self, percentage: Option<Decimal>, fixed: Option<Decimal>) -> Self {
        self.agent_percentage = percentage;
        self.agent_fixed = fixed;
        self
    }

    pub fn with_venue_rate(mut self, percentage: Option<Decimal>, fixed: Option<Decimal>) -> Self {
        self.venue_percentage = percentage;
        self.venue_fixed = fixed;
        self
    }

    pub fn with_total_clamp(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_total = min;
        self.max_total = max;
        self
    }

    pub fn with_agent_clamp(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_agent_amount = min;
        self.max_agent_amount = max;
        self
    }

    pub fn with_venue_special_clamp(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_venue_special_amount = min;
        self.max_venue_special_amount = max;
        self
    }

    pub fn with_id(mut self, id: RuleId) -> Self {
        self.id = id;
        self
    }

    pub fn is_global(&self) -> bool {
        self.tenant.is_none()
    }

    /// Check the rule terms before they are persisted.
    pub fn validate(&self) -> Result<(), InvalidRule> {
        match self.payout_mode {
            PayoutMode::PercentOfBase if self.percentage.is_none() => {
                return Err(InvalidRule::MissingTerm {
                    mode: self.payout_mode,
                    field: "percentage",
                })
            }
            PayoutMode::FixedAmount if self.fixed_amount.is_none() => {
                return Err(InvalidRule::MissingTerm {
                    mode: self.payout_mode,
                    field: "fixed_amount",
                })
            }
            _ => {}
        }
        for (field, value) in [
            ("percentage", self.percentage),
            ("agent_percentage", self.agent_percentage),
            ("venue_percentage", self.venue_percentage),
        ] {
            if let Some(value) = value {
                if value < Decimal::ZERO || value > Decimal::ONE {
                    return Err(InvalidRule::PercentageOutOfRange { field, value });
                }
            }
        }
        for (field, value) in [
            ("fixed_amount", self.fixed_amount),
            ("agent_fixed", self.agent_fixed),
            ("venue_fixed", self.venue_fixed),
            ("min_total", self.min_total),
            ("max_total", self.max_total),
            ("min_agent_amount", self.min_agent_amount),
            ("max_agent_amount", self.max_agent_amount),
            ("min_venue_special_amount", self.min_venue_special_amount),
            ("max_venue_special_amount", self.max_venue_special_amount),
        ] {
            if let Some(value) = value {
                if value.is_sign_negative() && !value.is_zero() {
                    return Err(InvalidRule::NegativeAmount { field, value });
                }
            }
        }
        for (field, min, max) in [
            ("total", self.min_total, self.max_total),
            ("agent_amount", self.min_agent_amount, self.max_agent_amount),
            (
                "venue_special_amount",
                self.min_venue_special_amount,
                self.max_venue_special_amount,
            ),
        ] {
            if let (Some(min), Some(max)) = (min, max) {
                if min > max {
                    return Err(InvalidRule::InvertedClamp { field, min, max });
                }
            }
        }
        Ok(())
    }
}
