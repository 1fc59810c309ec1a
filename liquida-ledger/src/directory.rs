use tracing::debug;

use liquida_core::{Actor, AgentId, Policy, TenantId, VenueId};

use crate::{CommissionLedger, LedgerError, LedgerResult};

impl CommissionLedger {
    /// Set the display name shown for an agent in reports.
    pub fn upsert_agent(
        &self,
        actor: &Actor,
        tenant: TenantId,
        agent: AgentId,
        name: &str,
    ) -> LedgerResult<()> {
        Policy::MANAGE_CONTRACTS.authorize(actor, Some(tenant))?;
        let name = display_name(name)?;
        self.store.upsert_agent(tenant, agent, name)?;
        debug!(tenant = %tenant, agent = %agent, name, "agent name stored");
        Ok(())
    }

    /// Set the display name shown for a venue in reports.
    pub fn upsert_venue(
        &self,
        actor: &Actor,
        tenant: TenantId,
        venue: VenueId,
        name: &str,
    ) -> LedgerResult<()> {
        Policy::MANAGE_CONTRACTS.authorize(actor, Some(tenant))?;
        let name = display_name(name)?;
        self.store.upsert_venue(tenant, venue, name)?;
        debug!(tenant = %tenant, venue = %venue, name, "venue name stored");
        Ok(())
    }
}

fn display_name(name: &str) -> LedgerResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidInput("display name is empty".into()));
    }
    Ok(name)
}
