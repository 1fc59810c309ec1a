use std::sync::Arc;
use std::thread;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::{tempdir, TempDir};

use liquida_core::{
    Actor, ActorId, AgentId, CommissionRule, Contract, ContractId, ContractState, Role, SectionId,
    SubSectionId, TenantId, Tier, VenueId,
};
use liquida_ledger::{
    CommissionLedger, CommissionStore, EntryQuery, EntryState, LedgerError, ManualClock,
    SettlementState, SqliteCommissionStore,
};
use liquida_rules::Precedence;

const TENANT: TenantId = TenantId(1);
const SECTION: SectionId = SectionId(10);

struct Harness {
    _dir: TempDir,
    store: Arc<SqliteCommissionStore>,
    clock: Arc<ManualClock>,
    ledger: CommissionLedger,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteCommissionStore::new(dir.path().join("ledger.db")).unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
    ));
    let ledger = CommissionLedger::with_clock(store.clone(), clock.clone());
    Harness {
        _dir: dir,
        store,
        clock,
        ledger,
    }
}

fn owner() -> Actor {
    Actor::owner(ActorId(1))
}

fn admin() -> Actor {
    Actor::new(ActorId(2), Role::TenantAdmin, TENANT)
}

fn scenario_a_rule() -> CommissionRule {
    CommissionRule::percent_of_base(SECTION, Tier::C1, dec!(0.10))
        .with_agent_rate(Some(dec!(0.03)), None)
        .with_venue_rate(Some(dec!(0.02)), None)
}

fn confirmed(ledger: &CommissionLedger, id: i64, base: Decimal) -> liquida_ledger::EntryOutcome {
    let contract = Contract::new(ContractId(id), TENANT, SECTION, Tier::C1, base)
        .with_agent(AgentId(5))
        .with_venue(VenueId(6), false);
    ledger.register_contract(&admin(), contract).unwrap();
    ledger
        .transition_contract(&admin(), ContractId(id), ContractState::Pending)
        .unwrap();
    ledger.confirm_contract(&admin(), ContractId(id)).unwrap()
}

#[test]
fn scenario_a_percent_split() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let outcome = confirmed(&h.ledger, 1, dec!(1000.00));
    let entry = &outcome.entry;
    assert_eq!(entry.total_commission, dec!(100.00));
    assert_eq!(entry.agent_amount, dec!(30.00));
    assert_eq!(entry.venue_amount, dec!(20.00));
    assert_eq!(entry.platform_amount, dec!(50.00));
    assert_eq!(entry.state, EntryState::Pending);
    assert!(outcome.warnings.is_empty());

    let movements = h.ledger.movements_for_entry(&admin(), entry.id).unwrap();
    assert_eq!(movements.len(), 3);
    let sum: Decimal = movements.iter().map(|m| m.amount).sum();
    assert_eq!(sum, entry.total_commission);
}

#[test]
fn scenario_b_fixed_amount_ignores_base() {
    let h = harness();
    let rule = CommissionRule::fixed(SECTION, Tier::C1, dec!(75.00))
        .with_agent_rate(None, Some(dec!(20.00)))
        .with_venue_rate(None, Some(dec!(10.00)));
    h.ledger.create_rule(&owner(), rule).unwrap();
    let outcome = confirmed(&h.ledger, 1, Decimal::ZERO);
    assert_eq!(outcome.entry.total_commission, dec!(75.00));
    assert_eq!(outcome.entry.platform_amount, dec!(45.00));
    assert_eq!(outcome.warnings.len(), 1);
}

#[test]
fn scenario_c_agent_clamp() {
    let h = harness();
    let rule = scenario_a_rule().with_agent_clamp(None, Some(dec!(25.00)));
    h.ledger.create_rule(&owner(), rule).unwrap();
    let outcome = confirmed(&h.ledger, 1, dec!(1000.00));
    assert_eq!(outcome.entry.agent_amount, dec!(25.00));
    assert_eq!(outcome.entry.platform_amount, dec!(55.00));
}

#[test]
fn scenario_d_void_zeroes_movements_and_is_idempotent() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let outcome = confirmed(&h.ledger, 1, dec!(1000.00));
    h.clock.advance(Duration::minutes(5));

    let voided = h
        .ledger
        .void_entry(&admin(), outcome.entry.id, "duplicate sale")
        .unwrap();
    assert_eq!(voided.state, EntryState::Void);
    assert_eq!(voided.void_reason.as_deref(), Some("duplicate sale"));
    assert_eq!(voided.voided_by, Some(ActorId(2)));
    assert!(voided.voided_at.is_some());

    let movements = h.ledger.movements_for_entry(&admin(), voided.id).unwrap();
    assert_eq!(movements.len(), 3);
    assert!(movements.iter().all(|m| m.amount.is_zero()));

    let again = h
        .ledger
        .void_entry(&admin(), outcome.entry.id, "second attempt")
        .unwrap();
    assert_eq!(again, voided);
    assert!(h
        .ledger
        .get_entry_for_contract(&admin(), TENANT, ContractId(1))
        .unwrap()
        .is_none());
}

#[test]
fn scenario_e_settlement_lifecycle() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let mut ids = Vec::new();
    for contract in 1..=3 {
        ids.push(confirmed(&h.ledger, contract, dec!(1000.00)).entry.id);
        h.clock.advance(Duration::days(3));
    }

    let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
    let settlement = h.ledger.open_settlement(&admin(), TENANT, from, to).unwrap();
    let attached = h
        .ledger
        .add_pending_movements(&admin(), settlement.id)
        .unwrap();
    assert_eq!(attached.added, 9);
    assert_eq!(attached.settlement.total_agent_amount, dec!(90.00));
    assert_eq!(attached.settlement.total_venue_amount, dec!(60.00));
    assert_eq!(attached.settlement.total_platform_amount, dec!(150.00));

    let repeat = h
        .ledger
        .add_pending_movements(&admin(), settlement.id)
        .unwrap();
    assert_eq!(repeat.added, 0);
    assert_eq!(repeat.settlement, attached.settlement);

    let closed = h.ledger.close_settlement(&admin(), settlement.id).unwrap();
    assert_eq!(closed.settlement.state, SettlementState::Closed);
    assert!(closed.settlement.closed_at.is_some());
    assert_eq!(closed.settled_entries.len(), 3);
    for id in &ids {
        let entry = h.ledger.get_entry(&admin(), *id).unwrap();
        assert_eq!(entry.state, EntryState::Settled);
        assert!(entry.settled_at.is_some());
    }

    let err = h
        .ledger
        .add_pending_movements(&admin(), settlement.id)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
    let err = h
        .ledger
        .close_settlement(&admin(), settlement.id)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));

    let audit = h.ledger.audit_entries(&admin(), TENANT).unwrap();
    assert_eq!(audit.checked, 3);
    assert!(audit.is_clean(), "{:?}", audit.violations);
}

#[test]
fn settlement_window_excludes_out_of_range_and_void_entries() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let inside = confirmed(&h.ledger, 1, dec!(1000.00)).entry.id;
    let voided = confirmed(&h.ledger, 2, dec!(500.00)).entry.id;
    h.ledger.void_entry(&admin(), voided, "cancelled sale").unwrap();
    h.clock
        .set(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    let outside = confirmed(&h.ledger, 3, dec!(1000.00)).entry.id;

    let january = h
        .ledger
        .open_settlement(
            &admin(),
            TENANT,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
    let attached = h.ledger.add_pending_movements(&admin(), january.id).unwrap();
    assert_eq!(attached.added, 3);
    h.ledger.close_settlement(&admin(), january.id).unwrap();

    let state = |id| h.ledger.get_entry(&admin(), id).unwrap().state;
    assert_eq!(state(inside), EntryState::Settled);
    assert_eq!(state(voided), EntryState::Void);
    assert_eq!(state(outside), EntryState::Pending);
    assert!(h
        .ledger
        .movements_for_entry(&admin(), outside)
        .unwrap()
        .iter()
        .all(|m| m.settlement.is_none()));
}

#[test]
fn duplicate_entry_leaves_ledger_unchanged() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let first = confirmed(&h.ledger, 1, dec!(1000.00));
    let err = h.ledger.create_entry(&admin(), ContractId(1)).unwrap_err();
    match err {
        LedgerError::DuplicateEntry { contract, existing } => {
            assert_eq!(contract, ContractId(1));
            assert_eq!(existing, first.entry.id);
        }
        other => panic!("unexpected error: {other}"),
    }
    let entries = h
        .ledger
        .list_entries(&admin(), &EntryQuery::for_tenant(TENANT))
        .unwrap();
    assert_eq!(entries.len(), 1);
}

#[test]
fn concurrent_create_books_a_single_entry() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let contract = Contract::new(ContractId(1), TENANT, SECTION, Tier::C1, dec!(1000.00))
        .with_state(ContractState::Confirmed);
    h.store.insert_contract(&contract).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ledger = h.ledger.clone();
            thread::spawn(move || ledger.create_entry(&admin(), ContractId(1)))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    let booked = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::DuplicateEntry { .. })))
        .count();
    assert_eq!(booked, 1);
    assert_eq!(duplicates, 3);
}

#[test]
fn overlapping_settlements_never_share_a_movement() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    for contract in 1..=5 {
        confirmed(&h.ledger, contract, dec!(1000.00));
    }
    let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
    let a = h.ledger.open_settlement(&admin(), TENANT, from, to).unwrap();
    let b = h.ledger.open_settlement(&admin(), TENANT, from, to).unwrap();

    let handles: Vec<_> = [a.id, b.id]
        .into_iter()
        .map(|id| {
            let ledger = h.ledger.clone();
            thread::spawn(move || ledger.add_pending_movements(&admin(), id).unwrap())
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    let added: usize = outcomes.iter().map(|o| o.added).sum();
    assert_eq!(added, 15);
    let total: Decimal = outcomes.iter().map(|o| o.settlement.total_amount()).sum();
    assert_eq!(total, dec!(500.00));
}

#[test]
fn rule_precedence_end_to_end() {
    let h = harness();
    let global = scenario_a_rule();
    let tenant_section = CommissionRule::percent_of_base(SECTION, Tier::C1, dec!(0.20))
        .for_tenant(TENANT);
    let tenant_sub = CommissionRule::percent_of_base(SECTION, Tier::C1, dec!(0.30))
        .for_tenant(TENANT)
        .for_sub_section(SubSectionId(7));
    let other_tier = CommissionRule::percent_of_base(SECTION, Tier::C3, dec!(0.01))
        .for_tenant(TENANT);
    for rule in [global, tenant_section, tenant_sub, other_tier] {
        h.ledger.create_rule(&owner(), rule).unwrap();
    }

    let sub = Contract::new(ContractId(1), TENANT, SECTION, Tier::C1, dec!(100))
        .with_sub_section(SubSectionId(7))
        .with_state(ContractState::Confirmed);
    let plain = Contract::new(ContractId(2), TENANT, SECTION, Tier::C1, dec!(100))
        .with_state(ContractState::Confirmed);
    let other_tenant = Contract::new(ContractId(3), TenantId(2), SECTION, Tier::C1, dec!(100))
        .with_state(ContractState::Confirmed);
    let fallback = Contract::new(ContractId(4), TENANT, SECTION, Tier::C2, dec!(100))
        .with_state(ContractState::Confirmed);
    for contract in [&sub, &plain, &other_tenant, &fallback] {
        h.store.insert_contract(contract).unwrap();
    }

    let book = |id| h.ledger.create_entry(&owner(), ContractId(id)).unwrap();
    let first = book(1);
    assert_eq!(first.precedence, Precedence::TenantSubSection);
    assert_eq!(first.entry.total_commission, dec!(30.00));
    let second = book(2);
    assert_eq!(second.precedence, Precedence::TenantSection);
    assert_eq!(second.entry.total_commission, dec!(20.00));
    let third = book(3);
    assert_eq!(third.precedence, Precedence::GlobalSection);
    assert_eq!(third.entry.total_commission, dec!(10.00));
    let fourth = book(4);
    assert_eq!(fourth.precedence, Precedence::SectionFallback);
    assert_eq!(fourth.entry.total_commission, dec!(20.00));
}

#[test]
fn missing_rule_is_reported_not_zeroed() {
    let h = harness();
    let contract = Contract::new(ContractId(9), TENANT, SectionId(99), Tier::C1, dec!(100))
        .with_state(ContractState::Confirmed);
    h.store.insert_contract(&contract).unwrap();
    let err = h.ledger.create_entry(&owner(), ContractId(9)).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::NoApplicableRule {
            contract: ContractId(9),
            ..
        }
    ));
    assert!(h
        .ledger
        .list_entries(&owner(), &EntryQuery::for_tenant(TENANT))
        .unwrap()
        .is_empty());
}

#[test]
fn voiding_an_attached_entry_releases_open_totals() {
    let h = harness();
    h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let voided = confirmed(&h.ledger, 1, dec!(1000.00)).entry.id;
    let kept = confirmed(&h.ledger, 2, dec!(500.00)).entry.id;
    let january = h
        .ledger
        .open_settlement(
            &admin(),
            TENANT,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
    let attached = h.ledger.add_pending_movements(&admin(), january.id).unwrap();
    assert_eq!(attached.settlement.total_amount(), dec!(150.00));

    h.ledger.void_entry(&admin(), voided, "cancelled sale").unwrap();
    let open = h.ledger.get_settlement(&admin(), january.id).unwrap();
    assert_eq!(open.total_agent_amount, dec!(15.00));
    assert_eq!(open.total_venue_amount, dec!(10.00));
    assert_eq!(open.total_platform_amount, dec!(25.00));

    let closed = h.ledger.close_settlement(&admin(), january.id).unwrap();
    assert_eq!(closed.settled_entries, vec![kept]);
    let movements = h.ledger.settlement_movements(&admin(), january.id).unwrap();
    let attached_sum: Decimal = movements.iter().map(|m| m.amount).sum();
    assert_eq!(closed.settlement.total_amount(), attached_sum);
    assert_eq!(attached_sum, dec!(50.00));
}

#[test]
fn failed_reissue_keeps_the_live_entry() {
    let h = harness();
    let rule = h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
    let first = confirmed(&h.ledger, 1, dec!(1000.00)).entry;
    h.ledger.set_rule_active(&owner(), rule.id, false).unwrap();

    let err = h
        .ledger
        .reissue_entry(&admin(), ContractId(1), "rate change")
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoApplicableRule { .. }));

    let live = h
        .ledger
        .get_entry_for_contract(&admin(), TENANT, ContractId(1))
        .unwrap()
        .unwrap();
    assert_eq!(live.id, first.id);
    assert_eq!(live.state, EntryState::Pending);
    let sum: Decimal = h
        .ledger
        .movements_for_entry(&admin(), first.id)
        .unwrap()
        .iter()
        .map(|m| m.amount)
        .sum();
    assert_eq!(sum, dec!(100.00));
}

#[test]
fn close_racing_add_keeps_totals_consistent() {
    for _ in 0..4 {
        let h = harness();
        h.ledger.create_rule(&owner(), scenario_a_rule()).unwrap();
        for contract in 1..=3 {
            confirmed(&h.ledger, contract, dec!(1000.00));
        }
        let settlement = h
            .ledger
            .open_settlement(
                &admin(),
                TENANT,
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .unwrap();

        let adder = {
            let ledger = h.ledger.clone();
            let id = settlement.id;
            thread::spawn(move || ledger.add_pending_movements(&admin(), id))
        };
        let closer = {
            let ledger = h.ledger.clone();
            let id = settlement.id;
            thread::spawn(move || ledger.close_settlement(&admin(), id))
        };
        let added = adder.join().unwrap();
        let closed = closer.join().unwrap().unwrap();

        let movements = h
            .ledger
            .settlement_movements(&admin(), settlement.id)
            .unwrap();
        match added {
            Ok(outcome) => {
                assert_eq!(outcome.added, 9);
                assert_eq!(closed.settled_entries.len(), 3);
            }
            Err(err) => {
                assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
                assert!(movements.is_empty());
                assert!(closed.settled_entries.is_empty());
            }
        }
        let attached_sum: Decimal = movements.iter().map(|m| m.amount).sum();
        let stored = h.ledger.get_settlement(&admin(), settlement.id).unwrap();
        assert_eq!(stored.state, SettlementState::Closed);
        assert_eq!(stored.total_amount(), attached_sum);
    }
}
