use rust_decimal::Decimal;
use tracing::{info, warn};

use liquida_core::{Actor, Contract, ContractId, ContractState, Policy};

use crate::{CommissionLedger, EntryOutcome, LedgerError, LedgerResult};

impl CommissionLedger {
    /// Record a new contract. It always starts in `Draft`.
    pub fn register_contract(&self, actor: &Actor, draft: Contract) -> LedgerResult<Contract> {
        Policy::MANAGE_CONTRACTS.authorize(actor, Some(draft.tenant))?;
        if draft.base < Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!(
                "contract {} has a negative base {}",
                draft.id, draft.base
            )));
        }
        let contract = draft.with_state(ContractState::Draft);
        self.store.insert_contract(&contract)?;
        info!(
            contract = %contract.id,
            tenant = %contract.tenant,
            section = %contract.section,
            tier = %contract.tier,
            base = %contract.base,
            "contract registered"
        );
        Ok(contract)
    }

    pub fn get_contract(&self, actor: &Actor, id: ContractId) -> LedgerResult<Contract> {
        let contract = self.load_contract(id)?;
        Policy::READ_LEDGER.authorize(actor, Some(contract.tenant))?;
        Ok(contract)
    }

    /// Move a contract along its lifecycle. Confirmed and cancelled
    /// contracts are terminal.
    pub fn transition_contract(
        &self,
        actor: &Actor,
        id: ContractId,
        target: ContractState,
    ) -> LedgerResult<Contract> {
        let contract = self.load_contract(id)?;
        Policy::MANAGE_CONTRACTS.authorize(actor, Some(contract.tenant))?;
        let from = contract.state;
        if !from.can_transition_to(target) {
            return Err(LedgerError::transition(
                "contract",
                id,
                format!("cannot move from {from} to {target}"),
            ));
        }
        if !self.store.transition_contract(id, from, target)? {
            return Err(LedgerError::transition(
                "contract",
                id,
                format!("contract is no longer {from}"),
            ));
        }
        info!(contract = %id, %from, to = %target, "contract transitioned");
        Ok(contract.with_state(target))
    }

    /// Confirm a pending contract and book its commission entry.
    ///
    /// The confirmation is kept even when booking fails; calling
    /// [`CommissionLedger::create_entry`] again is safe.
    pub fn confirm_contract(&self, actor: &Actor, id: ContractId) -> LedgerResult<EntryOutcome> {
        self.transition_contract(actor, id, ContractState::Confirmed)?;
        self.create_entry(actor, id).map_err(|err| {
            warn!(contract = %id, error = %err, "contract confirmed but entry was not booked");
            err
        })
    }

    pub(crate) fn load_contract(&self, id: ContractId) -> LedgerResult<Contract> {
        self.store
            .contract(id)?
            .ok_or_else(|| LedgerError::not_found("contract", id))
    }
}
