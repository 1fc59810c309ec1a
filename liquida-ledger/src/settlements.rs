use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use liquida_core::{Actor, Policy, TenantId};

use crate::{
    AttachOutcome, CloseOutcome, CommissionLedger, LedgerError, LedgerResult, Movement,
    Settlement, SettlementState,
};

impl CommissionLedger {
    /// Open an empty settlement for `tenant` covering `[date_from, date_to]`.
    pub fn open_settlement(
        &self,
        actor: &Actor,
        tenant: TenantId,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> LedgerResult<Settlement> {
        Policy::MANAGE_SETTLEMENTS.authorize(actor, Some(tenant))?;
        if date_from > date_to {
            return Err(LedgerError::InvalidInput(format!(
                "settlement window starts after it ends ({date_from} > {date_to})"
            )));
        }
        let settlement = Settlement::open(tenant, date_from, date_to, self.clock.now());
        self.store.insert_settlement(&settlement)?;
        info!(
            settlement = %settlement.id,
            tenant = %tenant,
            from = %date_from,
            to = %date_to,
            "settlement opened"
        );
        Ok(settlement)
    }

    /// Pull every unassigned movement inside the window into the settlement.
    /// Repeated calls only pick up movements booked since the last one.
    pub fn add_pending_movements(&self, actor: &Actor, id: Uuid) -> LedgerResult<AttachOutcome> {
        let settlement = self.load_settlement(id)?;
        Policy::MANAGE_SETTLEMENTS.authorize(actor, Some(settlement.tenant))?;
        let outcome = self.store.attach_pending_movements(id)?;
        info!(
            settlement = %id,
            added = outcome.added,
            agent = %outcome.settlement.total_agent_amount,
            venue = %outcome.settlement.total_venue_amount,
            platform = %outcome.settlement.total_platform_amount,
            "pending movements attached"
        );
        Ok(outcome)
    }

    /// Settle every fully contained entry and close the settlement for good.
    pub fn close_settlement(&self, actor: &Actor, id: Uuid) -> LedgerResult<CloseOutcome> {
        let settlement = self.load_settlement(id)?;
        Policy::MANAGE_SETTLEMENTS.authorize(actor, Some(settlement.tenant))?;
        let outcome = self.store.close_settlement(id, self.clock.now())?;
        info!(
            settlement = %id,
            settled = outcome.settled_entries.len(),
            total = %outcome.settlement.total_amount(),
            "settlement closed"
        );
        Ok(outcome)
    }

    pub fn get_settlement(&self, actor: &Actor, id: Uuid) -> LedgerResult<Settlement> {
        let settlement = self.load_settlement(id)?;
        Policy::READ_LEDGER.authorize(actor, Some(settlement.tenant))?;
        Ok(settlement)
    }

    pub fn list_settlements(
        &self,
        actor: &Actor,
        tenant: TenantId,
        state: Option<SettlementState>,
    ) -> LedgerResult<Vec<Settlement>> {
        Policy::READ_LEDGER.authorize(actor, Some(tenant))?;
        self.store.settlements(tenant, state)
    }

    pub fn settlement_movements(&self, actor: &Actor, id: Uuid) -> LedgerResult<Vec<Movement>> {
        let settlement = self.load_settlement(id)?;
        Policy::READ_LEDGER.authorize(actor, Some(settlement.tenant))?;
        self.store.settlement_movements(id)
    }

    fn load_settlement(&self, id: Uuid) -> LedgerResult<Settlement> {
        self.store
            .settlement(id)?
            .ok_or_else(|| LedgerError::not_found("settlement", id))
    }
}
