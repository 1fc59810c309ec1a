use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgentId, ContractId, SectionId, SubSectionId, TenantId, Tier, VenueId};

/// Lifecycle of a sale ("contratación").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    Draft,
    Pending,
    Confirmed,
    Cancelled,
}

impl ContractState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractState::Draft => "draft",
            ContractState::Pending => "pending",
            ContractState::Confirmed => "confirmed",
            ContractState::Cancelled => "cancelled",
        }
    }

    /// Confirmed and cancelled contracts never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContractState::Confirmed | ContractState::Cancelled)
    }

    pub fn can_transition_to(self, next: ContractState) -> bool {
        use ContractState::*;
        matches!(
            (self, next),
            (Draft, Pending) | (Draft, Cancelled) | (Pending, Confirmed) | (Pending, Cancelled)
        )
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContractState::Draft),
            "pending" => Ok(ContractState::Pending),
            "confirmed" => Ok(ContractState::Confirmed),
            "cancelled" => Ok(ContractState::Cancelled),
            other => Err(format!("unknown contract state: {other}")),
        }
    }
}

/// A sale owned by the tenant that created the originating lead.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub tenant: TenantId,
    pub section: SectionId,
    pub sub_section: Option<SubSectionId>,
    pub tier: Tier,
    pub agent: Option<AgentId>,
    pub venue: Option<VenueId>,
    /// Venue receives the special-tier clamps.
    #[serde(default)]
    pub venue_special: bool,
    /// Billable amount commissions are computed against.
    pub base: Decimal,
    pub state: ContractState,
}

impl Contract {
    /// New contract in `Draft` state.
    pub fn new(
        id: ContractId,
        tenant: TenantId,
        section: SectionId,
        tier: Tier,
        base: Decimal,
    ) -> Self {
        Self {
            id,
            tenant,
            section,
            sub_section: None,
            tier,
            agent: None,
            venue: None,
            venue_special: false,
            base,
            state: ContractState::Draft,
        }
    }

    pub fn with_sub_section(mut self, sub_section: SubSectionId) -> Self {
        self.sub_section = Some(sub_section);
        self
    }

    pub fn with_agent(mut self, agent: AgentId) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_venue(mut self, venue: VenueId, special: bool) -> Self {
        self.venue = Some(venue);
        self.venue_special = special;
        self
    }

    pub fn with_state(mut self, state: ContractState) -> Self {
        self.state = state;
        self
    }
}
