use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use liquida_core::{
    ActorId, AgentId, CommissionRule, Contract, ContractId, ContractState, RuleId, TenantId,
    VenueId,
};

use crate::{
    AttachOutcome, CloseOutcome, CommissionStore, EntryQuery, EntryState, LedgerEntry,
    LedgerError, LedgerResult, Movement, RuleFilter, Settlement, SettlementState, VoidOutcome,
};

#[derive(Default)]
struct State {
    next_rule_id: i64,
    rules: Vec<CommissionRule>,
    contracts: HashMap<ContractId, Contract>,
    agents: HashMap<(TenantId, AgentId), String>,
    venues: HashMap<(TenantId, VenueId), String>,
    entries: Vec<LedgerEntry>,
    movements: Vec<Movement>,
    settlements: Vec<Settlement>,
}

impl State {
    fn entry_mut(&mut self, id: Uuid) -> Option<&mut LedgerEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    fn insert_entry(&mut self, entry: &LedgerEntry, movements: &[Movement]) -> LedgerResult<()> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|stored| stored.contract == entry.contract && stored.is_live())
        {
            return Err(LedgerError::DuplicateEntry {
                contract: entry.contract,
                existing: existing.id,
            });
        }
        self.entries.push(entry.clone());
        self.movements.extend_from_slice(movements);
        Ok(())
    }

    fn void_entry(
        &mut self,
        id: Uuid,
        voided_by: ActorId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<VoidOutcome> {
        let current = self
            .entries
            .iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| LedgerError::not_found("entry", id))?;
        if current.state == EntryState::Void {
            return Ok(VoidOutcome::AlreadyVoid(current.clone()));
        }

        // Open settlement totals are recomputed on copies and written back
        // only once every deduction succeeded.
        let mut released: Vec<Settlement> = Vec::new();
        for movement in self.movements.iter().filter(|m| m.entry == id) {
            let Some(settlement_id) = movement.settlement else {
                continue;
            };
            let index = match released.iter().position(|s| s.id == settlement_id) {
                Some(index) => index,
                None => {
                    let settlement = self
                        .settlements
                        .iter()
                        .find(|s| s.id == settlement_id)
                        .ok_or_else(|| LedgerError::not_found("settlement", settlement_id))?;
                    if !settlement.is_open() {
                        continue;
                    }
                    released.push(settlement.clone());
                    released.len() - 1
                }
            };
            released[index].deduct(movement.recipient, movement.amount)?;
        }
        for settlement in released {
            let settlement_id = settlement.id;
            *settlement_mut(&mut self.settlements, settlement_id)? = settlement;
        }

        let entry = self
            .entry_mut(id)
            .ok_or_else(|| LedgerError::not_found("entry", id))?;
        entry.state = EntryState::Void;
        entry.voided_at = Some(at);
        entry.voided_by = Some(voided_by);
        entry.void_reason = Some(reason.to_string());
        let voided = entry.clone();
        for movement in self.movements.iter_mut().filter(|m| m.entry == id) {
            movement.amount = Decimal::ZERO;
        }
        Ok(VoidOutcome::Voided(voided))
    }
}

fn settlement_mut(settlements: &mut [Settlement], id: Uuid) -> LedgerResult<&mut Settlement> {
    settlements
        .iter_mut()
        .find(|settlement| settlement.id == id)
        .ok_or_else(|| LedgerError::not_found("settlement", id))
}

/// Process-local store. The whole state sits behind one lock, so every
/// operation is trivially atomic.
#[derive(Default)]
pub struct MemoryCommissionStore {
    state: Mutex<State>,
}

impl MemoryCommissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommissionStore for MemoryCommissionStore {
    fn insert_rule(&self, rule: &CommissionRule) -> LedgerResult<RuleId> {
        let mut state = self.state.lock();
        state.next_rule_id += 1;
        let id = RuleId(state.next_rule_id);
        state.rules.push(rule.clone().with_id(id));
        Ok(id)
    }

    fn update_rule(&self, rule: &CommissionRule) -> LedgerResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .rules
            .iter_mut()
            .find(|stored| stored.id == rule.id)
            .ok_or_else(|| LedgerError::not_found("rule", rule.id))?;
        *slot = rule.clone();
        Ok(())
    }

    fn rule(&self, id: RuleId) -> LedgerResult<Option<CommissionRule>> {
        let state = self.state.lock();
        Ok(state.rules.iter().find(|rule| rule.id == id).cloned())
    }

    fn rules(&self, filter: &RuleFilter) -> LedgerResult<Vec<CommissionRule>> {
        let state = self.state.lock();
        Ok(state
            .rules
            .iter()
            .filter(|rule| filter.section.map_or(true, |section| rule.section == section))
            .filter(|rule| match (filter.visible_to, rule.tenant) {
                (Some(visible), Some(owner)) => visible == owner,
                _ => true,
            })
            .filter(|rule| !filter.active_only || rule.active)
            .cloned()
            .collect())
    }

    fn insert_contract(&self, contract: &Contract) -> LedgerResult<()> {
        let mut state = self.state.lock();
        if state.contracts.contains_key(&contract.id) {
            return Err(LedgerError::InvalidInput(format!(
                "contract {} is already registered",
                contract.id
            )));
        }
        state.contracts.insert(contract.id, contract.clone());
        Ok(())
    }

    fn contract(&self, id: ContractId) -> LedgerResult<Option<Contract>> {
        Ok(self.state.lock().contracts.get(&id).cloned())
    }

    fn transition_contract(
        &self,
        id: ContractId,
        from: ContractState,
        to: ContractState,
    ) -> LedgerResult<bool> {
        let mut state = self.state.lock();
        match state.contracts.get_mut(&id) {
            Some(contract) if contract.state == from => {
                contract.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn upsert_agent(&self, tenant: TenantId, agent: AgentId, name: &str) -> LedgerResult<()> {
        self.state
            .lock()
            .agents
            .insert((tenant, agent), name.to_string());
        Ok(())
    }

    fn upsert_venue(&self, tenant: TenantId, venue: VenueId, name: &str) -> LedgerResult<()> {
        self.state
            .lock()
            .venues
            .insert((tenant, venue), name.to_string());
        Ok(())
    }

    fn agent_names(&self, tenant: TenantId) -> LedgerResult<HashMap<AgentId, String>> {
        let state = self.state.lock();
        Ok(state
            .agents
            .iter()
            .filter(|((owner, _), _)| *owner == tenant)
            .map(|((_, agent), name)| (*agent, name.clone()))
            .collect())
    }

    fn venue_names(&self, tenant: TenantId) -> LedgerResult<HashMap<VenueId, String>> {
        let state = self.state.lock();
        Ok(state
            .venues
            .iter()
            .filter(|((owner, _), _)| *owner == tenant)
            .map(|((_, venue), name)| (*venue, name.clone()))
            .collect())
    }

    fn insert_entry(&self, entry: &LedgerEntry, movements: &[Movement]) -> LedgerResult<()> {
        self.state.lock().insert_entry(entry, movements)
    }

    fn entry(&self, id: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        let state = self.state.lock();
        Ok(state.entries.iter().find(|entry| entry.id == id).cloned())
    }

    fn live_entry_for_contract(
        &self,
        tenant: TenantId,
        contract: ContractId,
    ) -> LedgerResult<Option<LedgerEntry>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .find(|entry| entry.tenant == tenant && entry.contract == contract && entry.is_live())
            .cloned())
    }

    fn void_entry(
        &self,
        id: Uuid,
        voided_by: ActorId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<VoidOutcome> {
        self.state.lock().void_entry(id, voided_by, reason, at)
    }

    fn replace_entry(
        &self,
        replaced: Uuid,
        voided_by: ActorId,
        reason: &str,
        at: DateTime<Utc>,
        entry: &LedgerEntry,
        movements: &[Movement],
    ) -> LedgerResult<LedgerEntry> {
        let mut state = self.state.lock();
        let clash = state
            .entries
            .iter()
            .find(|stored| {
                stored.contract == entry.contract && stored.is_live() && stored.id != replaced
            })
            .map(|stored| stored.id);
        if let Some(existing) = clash {
            return Err(LedgerError::DuplicateEntry {
                contract: entry.contract,
                existing,
            });
        }
        let voided = state.void_entry(replaced, voided_by, reason, at)?.into_entry();
        state.insert_entry(entry, movements)?;
        Ok(voided)
    }

    fn entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>> {
        let state = self.state.lock();
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|entry| entry.tenant == query.tenant)
            .filter(|entry| query.contract.map_or(true, |id| entry.contract == id))
            .filter(|entry| query.agent.map_or(true, |id| entry.agent == Some(id)))
            .filter(|entry| query.venue.map_or(true, |id| entry.venue == Some(id)))
            .filter(|entry| query.state.map_or(true, |s| entry.state == s))
            .filter(|entry| !query.live_only || entry.is_live())
            .filter(|entry| query.start_time.map_or(true, |start| entry.created_at >= start))
            .filter(|entry| query.end_time.map_or(true, |end| entry.created_at < end))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        if !query.ascending {
            entries.reverse();
        }
        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn movements_for_entry(&self, entry: Uuid) -> LedgerResult<Vec<Movement>> {
        let state = self.state.lock();
        Ok(state
            .movements
            .iter()
            .filter(|movement| movement.entry == entry)
            .cloned()
            .collect())
    }

    fn insert_settlement(&self, settlement: &Settlement) -> LedgerResult<()> {
        self.state.lock().settlements.push(settlement.clone());
        Ok(())
    }

    fn settlement(&self, id: Uuid) -> LedgerResult<Option<Settlement>> {
        let state = self.state.lock();
        Ok(state.settlements.iter().find(|s| s.id == id).cloned())
    }

    fn settlements(
        &self,
        tenant: TenantId,
        filter: Option<SettlementState>,
    ) -> LedgerResult<Vec<Settlement>> {
        let state = self.state.lock();
        let mut settlements: Vec<Settlement> = state
            .settlements
            .iter()
            .filter(|s| s.tenant == tenant && filter.map_or(true, |wanted| s.state == wanted))
            .cloned()
            .collect();
        settlements.sort_by_key(|s| (s.date_from, s.created_at));
        Ok(settlements)
    }

    fn settlement_movements(&self, settlement: Uuid) -> LedgerResult<Vec<Movement>> {
        let state = self.state.lock();
        Ok(state
            .movements
            .iter()
            .filter(|movement| movement.settlement == Some(settlement))
            .cloned()
            .collect())
    }

    fn attach_pending_movements(&self, settlement: Uuid) -> LedgerResult<AttachOutcome> {
        let mut state = self.state.lock();
        let mut current = settlement_mut(&mut state.settlements, settlement)?.clone();
        if !current.is_open() {
            return Err(LedgerError::transition(
                "settlement",
                settlement,
                "cannot add movements to a closed settlement",
            ));
        }
        let eligible: BTreeSet<Uuid> = state
            .entries
            .iter()
            .filter(|entry| {
                entry.tenant == current.tenant && entry.is_live() && current.covers(entry.created_at)
            })
            .map(|entry| entry.id)
            .collect();

        let mut claimed = Vec::new();
        for (index, movement) in state.movements.iter().enumerate() {
            if movement.settlement.is_none()
                && movement.tenant == current.tenant
                && eligible.contains(&movement.entry)
            {
                current.accumulate(movement.recipient, movement.amount)?;
                claimed.push(index);
            }
        }
        for index in &claimed {
            state.movements[*index].settlement = Some(settlement);
        }
        *settlement_mut(&mut state.settlements, settlement)? = current.clone();
        Ok(AttachOutcome {
            added: claimed.len(),
            settlement: current,
        })
    }

    fn close_settlement(&self, settlement: Uuid, at: DateTime<Utc>) -> LedgerResult<CloseOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !settlement_mut(&mut state.settlements, settlement)?.is_open() {
            return Err(LedgerError::transition(
                "settlement",
                settlement,
                "settlement is already closed",
            ));
        }
        let referenced: BTreeSet<Uuid> = state
            .movements
            .iter()
            .filter(|m| m.settlement == Some(settlement))
            .map(|m| m.entry)
            .collect();

        let mut settled_entries = Vec::new();
        for entry_id in referenced {
            let contained = state
                .movements
                .iter()
                .filter(|m| m.entry == entry_id)
                .all(|m| m.settlement == Some(settlement));
            if !contained {
                continue;
            }
            if let Some(entry) = state.entry_mut(entry_id) {
                if entry.state == EntryState::Pending {
                    entry.state = EntryState::Settled;
                    entry.settled_at = Some(at);
                    settled_entries.push(entry_id);
                }
            }
        }

        let current = settlement_mut(&mut state.settlements, settlement)?;
        current.state = SettlementState::Closed;
        current.closed_at = Some(at);
        Ok(CloseOutcome {
            settlement: current.clone(),
            settled_entries,
        })
    }
}
