use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use liquida_core::{Actor, AgentId, Policy, TenantId, VenueId};

use crate::{start_of_day, CommissionLedger, EntryQuery, LedgerEntry, LedgerError, LedgerResult};

/// Commission totals of one agent or venue over the reported range.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientSummary {
    pub id: i64,
    pub name: Option<String>,
    pub entry_count: usize,
    pub total: Decimal,
    pub agent: Decimal,
    pub venue: Decimal,
    pub platform: Decimal,
}

impl RecipientSummary {
    fn add(&mut self, entry: &LedgerEntry) {
        self.entry_count += 1;
        self.total += entry.total_commission;
        self.agent += entry.agent_amount;
        self.venue += entry.venue_amount;
        self.platform += entry.platform_amount;
    }
}

/// Dashboard view of the live entries created inside a date range.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionSummary {
    pub by_agent: Vec<RecipientSummary>,
    pub by_venue: Vec<RecipientSummary>,
}

impl CommissionLedger {
    /// Sum non-void entries created in `[date_from, date_to]` per agent and
    /// per venue. Entries without an agent (or venue) only count towards
    /// the other grouping.
    pub fn summarize(
        &self,
        actor: &Actor,
        tenant: TenantId,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> LedgerResult<CommissionSummary> {
        Policy::VIEW_REPORTS.authorize(actor, Some(tenant))?;
        if date_from > date_to {
            return Err(LedgerError::InvalidInput(format!(
                "report range starts after it ends ({date_from} > {date_to})"
            )));
        }
        let query = EntryQuery::for_tenant(tenant)
            .live_only()
            .with_time_range(
                Some(start_of_day(date_from)),
                date_to.succ_opt().map(start_of_day),
            );
        let entries = self.store.entries(&query)?;

        let mut by_agent: BTreeMap<AgentId, RecipientSummary> = BTreeMap::new();
        let mut by_venue: BTreeMap<VenueId, RecipientSummary> = BTreeMap::new();
        for entry in &entries {
            if let Some(agent) = entry.agent {
                by_agent.entry(agent).or_default().add(entry);
            }
            if let Some(venue) = entry.venue {
                by_venue.entry(venue).or_default().add(entry);
            }
        }

        let agent_names = self.store.agent_names(tenant)?;
        let venue_names = self.store.venue_names(tenant)?;
        debug!(
            tenant = %tenant,
            entries = entries.len(),
            agents = by_agent.len(),
            venues = by_venue.len(),
            "commission summary built"
        );
        Ok(CommissionSummary {
            by_agent: label(by_agent, &agent_names, AgentId::get),
            by_venue: label(by_venue, &venue_names, VenueId::get),
        })
    }
}

fn label<K>(
    groups: BTreeMap<K, RecipientSummary>,
    names: &HashMap<K, String>,
    raw: fn(K) -> i64,
) -> Vec<RecipientSummary>
where
    K: Copy + Eq + std::hash::Hash,
{
    groups
        .into_iter()
        .map(|(key, summary)| RecipientSummary {
            id: raw(key),
            name: names.get(&key).cloned(),
            ..summary
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use liquida_core::{
        ActorId, CommissionRule, Contract, ContractId, ContractState, SectionId, Tier,
    };
    use rust_decimal_macros::dec;

    use crate::{ManualClock, MemoryCommissionStore};

    use super::*;

    fn book(ledger: &CommissionLedger, id: i64, agent: Option<i64>, venue: Option<i64>) {
        let owner = Actor::owner(ActorId(1));
        let mut contract =
            Contract::new(ContractId(id), TenantId(1), SectionId(1), Tier::C1, dec!(1000));
        contract.agent = agent.map(AgentId);
        contract.venue = venue.map(VenueId);
        ledger.register_contract(&owner, contract).unwrap();
        ledger
            .transition_contract(&owner, ContractId(id), ContractState::Pending)
            .unwrap();
        ledger.confirm_contract(&owner, ContractId(id)).unwrap();
    }

    #[test]
    fn groups_by_recipient_and_skips_void() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
        ));
        let ledger = CommissionLedger::with_clock(Arc::new(MemoryCommissionStore::new()), clock);
        let owner = Actor::owner(ActorId(1));
        let rule = CommissionRule::percent_of_base(SectionId(1), Tier::C1, dec!(0.10))
            .with_agent_rate(Some(dec!(0.03)), None)
            .with_venue_rate(Some(dec!(0.02)), None);
        ledger.create_rule(&owner, rule).unwrap();
        ledger.upsert_agent(&owner, TenantId(1), AgentId(1), "Ana").unwrap();

        book(&ledger, 1, Some(1), Some(1));
        book(&ledger, 2, Some(1), None);
        book(&ledger, 3, None, Some(2));
        let voided = ledger
            .get_entry_for_contract(&owner, TenantId(1), ContractId(3))
            .unwrap()
            .unwrap();
        ledger.void_entry(&owner, voided.id, "duplicate sale").unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let summary = ledger.summarize(&owner, TenantId(1), day, day).unwrap();
        assert_eq!(summary.by_agent.len(), 1);
        let ana = &summary.by_agent[0];
        assert_eq!(ana.name.as_deref(), Some("Ana"));
        assert_eq!(ana.entry_count, 2);
        assert_eq!(ana.agent, dec!(60.00));
        assert_eq!(summary.by_venue.len(), 1);
        assert_eq!(summary.by_venue[0].id, 1);
        assert_eq!(summary.by_venue[0].name, None);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["byAgent"][0]["entryCount"].is_number());

        let next = day.succ_opt().unwrap();
        let empty = ledger.summarize(&owner, TenantId(1), next, next).unwrap();
        assert!(empty.by_agent.is_empty());
    }
}
