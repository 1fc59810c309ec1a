use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use liquida_core::{Actor, Contract, ContractId, ContractState, Policy, TenantId};
use liquida_rules::{resolve_rule, Precedence, RuleLookup, SplitInput, SplitWarning};

use crate::{
    CommissionLedger, EntryQuery, EntryState, LedgerEntry, LedgerError, LedgerResult, Movement,
    RuleFilter, VoidOutcome,
};

/// A freshly booked entry together with how it was computed.
#[derive(Clone, Debug, Serialize)]
pub struct EntryOutcome {
    pub entry: LedgerEntry,
    pub movements: Vec<Movement>,
    pub precedence: Precedence,
    /// Non-fatal findings; empty when the split reconciled cleanly.
    pub warnings: Vec<SplitWarning>,
}

impl CommissionLedger {
    /// Book the commission entry of a confirmed contract.
    ///
    /// The entry and its movements are written in one transaction. A second
    /// call for the same contract fails with `DuplicateEntry` while the
    /// first entry is live.
    pub fn create_entry(&self, actor: &Actor, contract_id: ContractId) -> LedgerResult<EntryOutcome> {
        let contract = self.load_contract(contract_id)?;
        Policy::WRITE_LEDGER.authorize(actor, Some(contract.tenant))?;
        ensure_confirmed(&contract)?;
        if let Some(existing) = self
            .store
            .live_entry_for_contract(contract.tenant, contract.id)?
        {
            return Err(LedgerError::DuplicateEntry {
                contract: contract.id,
                existing: existing.id,
            });
        }

        let outcome = self.prepare_entry(&contract)?;
        self.store.insert_entry(&outcome.entry, &outcome.movements)?;
        log_booked(&outcome.entry);
        Ok(outcome)
    }

    /// Void an entry and zero its movements. Voiding a void entry returns it
    /// unchanged.
    pub fn void_entry(&self, actor: &Actor, id: Uuid, reason: &str) -> LedgerResult<LedgerEntry> {
        let entry = self.load_entry(id)?;
        Policy::WRITE_LEDGER.authorize(actor, Some(entry.tenant))?;
        if entry.state == EntryState::Void {
            debug!(entry = %entry.id, "entry already void");
            return Ok(entry);
        }
        let reason = required_reason(id, reason)?;
        match self.store.void_entry(id, actor.id, reason, self.clock.now())? {
            VoidOutcome::Voided(entry) => {
                info!(
                    entry = %entry.id,
                    contract = %entry.contract,
                    actor = %actor.id,
                    reason,
                    "ledger entry voided"
                );
                Ok(entry)
            }
            VoidOutcome::AlreadyVoid(entry) => {
                debug!(entry = %entry.id, "entry already void");
                Ok(entry)
            }
        }
    }

    /// Void the live entry of a contract (if any) and book a fresh one from
    /// the rules in force now.
    ///
    /// The replacement is computed before anything is written, and the void
    /// and the insert share one store transaction. A failure leaves the old
    /// entry live.
    pub fn reissue_entry(
        &self,
        actor: &Actor,
        contract_id: ContractId,
        reason: &str,
    ) -> LedgerResult<EntryOutcome> {
        let contract = self.load_contract(contract_id)?;
        Policy::WRITE_LEDGER.authorize(actor, Some(contract.tenant))?;
        ensure_confirmed(&contract)?;
        let live = self
            .store
            .live_entry_for_contract(contract.tenant, contract.id)?;

        let outcome = self.prepare_entry(&contract)?;
        match live {
            Some(live) => {
                let reason = required_reason(live.id, reason)?;
                let voided = self.store.replace_entry(
                    live.id,
                    actor.id,
                    reason,
                    self.clock.now(),
                    &outcome.entry,
                    &outcome.movements,
                )?;
                info!(
                    entry = %voided.id,
                    contract = %voided.contract,
                    actor = %actor.id,
                    reason,
                    "ledger entry voided"
                );
            }
            None => self.store.insert_entry(&outcome.entry, &outcome.movements)?,
        }
        log_booked(&outcome.entry);
        info!(contract = %contract_id, entry = %outcome.entry.id, "ledger entry reissued");
        Ok(outcome)
    }

    pub fn get_entry(&self, actor: &Actor, id: Uuid) -> LedgerResult<LedgerEntry> {
        let entry = self.load_entry(id)?;
        Policy::READ_LEDGER.authorize(actor, Some(entry.tenant))?;
        Ok(entry)
    }

    /// The live entry booked for a contract of `tenant`.
    pub fn get_entry_for_contract(
        &self,
        actor: &Actor,
        tenant: TenantId,
        contract: ContractId,
    ) -> LedgerResult<Option<LedgerEntry>> {
        Policy::READ_LEDGER.authorize(actor, Some(tenant))?;
        self.store.live_entry_for_contract(tenant, contract)
    }

    pub fn list_entries(&self, actor: &Actor, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>> {
        Policy::READ_LEDGER.authorize(actor, Some(query.tenant))?;
        self.store.entries(query)
    }

    pub fn movements_for_entry(&self, actor: &Actor, id: Uuid) -> LedgerResult<Vec<Movement>> {
        let entry = self.load_entry(id)?;
        Policy::READ_LEDGER.authorize(actor, Some(entry.tenant))?;
        self.store.movements_for_entry(id)
    }

    fn load_entry(&self, id: Uuid) -> LedgerResult<LedgerEntry> {
        self.store
            .entry(id)?
            .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    /// Resolve the rule and compute the split for `contract` without writing
    /// anything.
    fn prepare_entry(&self, contract: &Contract) -> LedgerResult<EntryOutcome> {
        let lookup = RuleLookup {
            tenant: contract.tenant,
            section: contract.section,
            sub_section: contract.sub_section,
            tier: contract.tier,
        };
        let candidates = self
            .store
            .rules(&RuleFilter::candidates(contract.tenant, contract.section))?;
        let resolved = resolve_rule(&candidates, &lookup, self.options.allow_fallback_rule)
            .ok_or(LedgerError::NoApplicableRule {
                contract: contract.id,
                tenant: contract.tenant,
                section: contract.section,
                sub_section: contract.sub_section,
                tier: contract.tier,
            })?;
        if resolved.precedence.is_fallback() {
            warn!(
                contract = %contract.id,
                rule = %resolved.rule.id,
                rule_tier = %resolved.rule.tier,
                contract_tier = %contract.tier,
                "no scoped rule matched; using section fallback rule"
            );
        } else if resolved.matches > 1 {
            warn!(
                contract = %contract.id,
                rule = %resolved.rule.id,
                matches = resolved.matches,
                precedence = resolved.precedence.as_str(),
                "overlapping rules at the same precedence; lowest id applied"
            );
        } else {
            debug!(
                contract = %contract.id,
                rule = %resolved.rule.id,
                precedence = resolved.precedence.as_str(),
                "rule resolved"
            );
        }

        let split = self.calculator.compute(
            &resolved.rule,
            SplitInput {
                base: contract.base,
                has_agent: contract.agent.is_some(),
                has_venue: contract.venue.is_some(),
                venue_special: contract.venue_special,
            },
        )?;
        if !split.warnings.is_empty() {
            if self.options.strict_reconciliation {
                return Err(LedgerError::ReconciliationWarning {
                    contract: contract.id,
                    warnings: split.warnings,
                });
            }
            for warning in &split.warnings {
                warn!(contract = %contract.id, rule = %resolved.rule.id, ?warning, "commission split warning");
            }
        }

        let entry = LedgerEntry::new(contract, resolved.rule.id, &split, self.clock.now());
        let movements = entry.movements();
        Ok(EntryOutcome {
            entry,
            movements,
            precedence: resolved.precedence,
            warnings: split.warnings,
        })
    }
}

fn ensure_confirmed(contract: &Contract) -> LedgerResult<()> {
    if contract.state == ContractState::Confirmed {
        return Ok(());
    }
    Err(LedgerError::transition(
        "contract",
        contract.id,
        format!(
            "only confirmed contracts produce entries, contract is {}",
            contract.state
        ),
    ))
}

fn required_reason(entry: Uuid, reason: &str) -> LedgerResult<&str> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::transition(
            "entry",
            entry,
            "a reason is required to void an entry",
        ));
    }
    Ok(reason)
}

fn log_booked(entry: &LedgerEntry) {
    info!(
        entry = %entry.id,
        contract = %entry.contract,
        tenant = %entry.tenant,
        rule = %entry.rule,
        total = %entry.total_commission,
        agent = %entry.agent_amount,
        venue = %entry.venue_amount,
        platform = %entry.platform_amount,
        "ledger entry created"
    );
}
