use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use liquida_core::{
    ActorId, AgentId, CommissionRule, Contract, ContractId, ContractState, RuleId, TenantId,
    VenueId,
};

use crate::{
    AttachOutcome, CloseOutcome, EntryQuery, LedgerEntry, LedgerResult, Movement, RuleFilter,
    Settlement, SettlementState, VoidOutcome,
};

/// Abstraction over durable commission storage engines.
///
/// Every mutating method is atomic: it either applies completely or leaves
/// storage untouched. State checks that guard a mutation happen inside the
/// same transaction as the mutation.
pub trait CommissionStore: Send + Sync {
    /// Persist a new rule and return its assigned id.
    fn insert_rule(&self, rule: &CommissionRule) -> LedgerResult<RuleId>;

    /// Overwrite an existing rule. Fails with `NotFound` for unknown ids.
    fn update_rule(&self, rule: &CommissionRule) -> LedgerResult<()>;

    fn rule(&self, id: RuleId) -> LedgerResult<Option<CommissionRule>>;

    fn rules(&self, filter: &RuleFilter) -> LedgerResult<Vec<CommissionRule>>;

    fn insert_contract(&self, contract: &Contract) -> LedgerResult<()>;

    fn contract(&self, id: ContractId) -> LedgerResult<Option<Contract>>;

    /// Move a contract from `from` to `to`. Returns `false` when the stored
    /// state is no longer `from`.
    fn transition_contract(
        &self,
        id: ContractId,
        from: ContractState,
        to: ContractState,
    ) -> LedgerResult<bool>;

    fn upsert_agent(&self, tenant: TenantId, agent: AgentId, name: &str) -> LedgerResult<()>;

    fn upsert_venue(&self, tenant: TenantId, venue: VenueId, name: &str) -> LedgerResult<()>;

    fn agent_names(&self, tenant: TenantId) -> LedgerResult<HashMap<AgentId, String>>;

    fn venue_names(&self, tenant: TenantId) -> LedgerResult<HashMap<VenueId, String>>;

    /// Persist an entry with its movements. Fails with `DuplicateEntry` when
    /// the contract already has a live entry.
    fn insert_entry(&self, entry: &LedgerEntry, movements: &[Movement]) -> LedgerResult<()>;

    fn entry(&self, id: Uuid) -> LedgerResult<Option<LedgerEntry>>;

    /// The non-void entry booked for a contract, if any.
    fn live_entry_for_contract(
        &self,
        tenant: TenantId,
        contract: ContractId,
    ) -> LedgerResult<Option<LedgerEntry>>;

    /// Void an entry and zero its movements. Amounts already attached to an
    /// open settlement are taken back out of its totals. Voiding a void entry
    /// is a no-op.
    fn void_entry(
        &self,
        id: Uuid,
        voided_by: ActorId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<VoidOutcome>;

    /// Void `replaced` exactly as [`CommissionStore::void_entry`] does and
    /// insert `entry` with its movements, both in one transaction. Returns
    /// the voided entry.
    fn replace_entry(
        &self,
        replaced: Uuid,
        voided_by: ActorId,
        reason: &str,
        at: DateTime<Utc>,
        entry: &LedgerEntry,
        movements: &[Movement],
    ) -> LedgerResult<LedgerEntry>;

    fn entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>>;

    fn movements_for_entry(&self, entry: Uuid) -> LedgerResult<Vec<Movement>>;

    fn insert_settlement(&self, settlement: &Settlement) -> LedgerResult<()>;

    fn settlement(&self, id: Uuid) -> LedgerResult<Option<Settlement>>;

    fn settlements(
        &self,
        tenant: TenantId,
        state: Option<SettlementState>,
    ) -> LedgerResult<Vec<Settlement>>;

    fn settlement_movements(&self, settlement: Uuid) -> LedgerResult<Vec<Movement>>;

    /// Assign every unassigned movement of live entries created inside the
    /// settlement window and accumulate their amounts. Fails with
    /// `InvalidStateTransition` unless the settlement is open.
    fn attach_pending_movements(&self, settlement: Uuid) -> LedgerResult<AttachOutcome>;

    /// Settle every pending entry whose movements all belong to this
    /// settlement, then close it. Fails unless the settlement is open.
    fn close_settlement(&self, settlement: Uuid, at: DateTime<Utc>) -> LedgerResult<CloseOutcome>;
}
