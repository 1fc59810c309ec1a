use chrono::{DateTime, Utc};

use liquida_core::{AgentId, ContractId, SectionId, TenantId, VenueId};

use crate::EntryState;

/// Filter describing which ledger entries to load from storage.
#[derive(Clone, Debug)]
pub struct EntryQuery {
    pub tenant: TenantId,
    pub contract: Option<ContractId>,
    pub agent: Option<AgentId>,
    pub venue: Option<VenueId>,
    pub state: Option<EntryState>,
    /// Skip voided entries.
    pub live_only: bool,
    pub start_time: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub ascending: bool,
}

impl EntryQuery {
    pub fn for_tenant(tenant: TenantId) -> Self {
        Self {
            tenant,
            contract: None,
            agent: None,
            venue: None,
            state: None,
            live_only: false,
            start_time: None,
            end_time: None,
            limit: None,
            ascending: true,
        }
    }

    pub fn with_contract(mut self, contract: ContractId) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn with_agent(mut self, agent: AgentId) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_venue(mut self, venue: VenueId) -> Self {
        self.venue = Some(venue);
        self
    }

    pub fn with_state(mut self, state: EntryState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn live_only(mut self) -> Self {
        self.live_only = true;
        self
    }

    pub fn with_time_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }
}

/// Filter for listing rule definitions.
#[derive(Clone, Debug, Default)]
pub struct RuleFilter {
    pub section: Option<SectionId>,
    /// Restrict to rules of this tenant plus global rules.
    pub visible_to: Option<TenantId>,
    pub active_only: bool,
}

impl RuleFilter {
    /// Active rules a contract of `tenant` in `section` may resolve to.
    pub fn candidates(tenant: TenantId, section: SectionId) -> Self {
        Self {
            section: Some(section),
            visible_to: Some(tenant),
            active_only: true,
        }
    }

    pub fn with_section(mut self, section: SectionId) -> Self {
        self.section = Some(section);
        self
    }

    pub fn visible_to(mut self, tenant: TenantId) -> Self {
        self.visible_to = Some(tenant);
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }
}
