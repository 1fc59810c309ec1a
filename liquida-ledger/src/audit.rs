//! Re-verification of the ledger invariants over stored data.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use liquida_core::{Actor, Policy, TenantId};

use crate::{
    CommissionLedger, EntryQuery, EntryState, LedgerEntry, LedgerResult, Movement, SettlementState,
};

/// One broken invariant found by [`CommissionLedger::audit_entries`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditViolation {
    /// Live entry whose parts do not add up to its total.
    UnbalancedEntry {
        entry: Uuid,
        total: Decimal,
        parts: Decimal,
    },
    /// Live entry whose movements do not add up to its total.
    MovementMismatch {
        entry: Uuid,
        total: Decimal,
        movements: Decimal,
    },
    /// Void entry with movements still carrying money.
    VoidResidual { entry: Uuid, residual: Decimal },
    /// Settled entry with a movement outside every closed settlement.
    SettledOutsideClosedSettlement { entry: Uuid },
    /// Pending entry fully contained in a closed settlement.
    UnsettledInClosedSettlement { entry: Uuid, settlement: Uuid },
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct AuditReport {
    pub tenant: TenantId,
    pub checked: usize,
    pub violations: Vec<AuditViolation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

impl CommissionLedger {
    /// Check every entry of `tenant` against the reconciliation invariants.
    pub fn audit_entries(&self, actor: &Actor, tenant: TenantId) -> LedgerResult<AuditReport> {
        Policy::VIEW_REPORTS.authorize(actor, Some(tenant))?;
        let closed: HashMap<Uuid, bool> = self
            .store
            .settlements(tenant, None)?
            .into_iter()
            .map(|s| (s.id, s.state == SettlementState::Closed))
            .collect();

        let entries = self.store.entries(&EntryQuery::for_tenant(tenant))?;
        let mut report = AuditReport {
            tenant,
            checked: entries.len(),
            violations: Vec::new(),
        };
        for entry in &entries {
            let movements = self.store.movements_for_entry(entry.id)?;
            check_entry(entry, &movements, &closed, &mut report.violations);
        }

        if report.is_clean() {
            info!(tenant = %tenant, checked = report.checked, "ledger audit clean");
        } else {
            warn!(
                tenant = %tenant,
                checked = report.checked,
                violations = report.violations.len(),
                "ledger audit found violations"
            );
        }
        Ok(report)
    }
}

fn check_entry(
    entry: &LedgerEntry,
    movements: &[Movement],
    closed: &HashMap<Uuid, bool>,
    violations: &mut Vec<AuditViolation>,
) {
    let moved: Decimal = movements.iter().map(|m| m.amount).sum();
    let in_closed = |m: &Movement| {
        m.settlement
            .and_then(|id| closed.get(&id).copied())
            .unwrap_or(false)
    };

    match entry.state {
        EntryState::Void => {
            if !moved.is_zero() {
                violations.push(AuditViolation::VoidResidual {
                    entry: entry.id,
                    residual: moved,
                });
            }
            return;
        }
        EntryState::Settled => {
            if !movements.iter().all(in_closed) {
                violations.push(AuditViolation::SettledOutsideClosedSettlement { entry: entry.id });
            }
        }
        EntryState::Pending => {
            let first = movements.first().and_then(|m| m.settlement);
            if let Some(settlement) = first {
                let same = movements.iter().all(|m| m.settlement == Some(settlement));
                if same && closed.get(&settlement).copied().unwrap_or(false) {
                    violations.push(AuditViolation::UnsettledInClosedSettlement {
                        entry: entry.id,
                        settlement,
                    });
                }
            }
        }
    }

    if !entry.reconciles() {
        violations.push(AuditViolation::UnbalancedEntry {
            entry: entry.id,
            total: entry.total_commission,
            parts: entry.agent_amount + entry.venue_amount + entry.platform_amount,
        });
    }
    if moved != entry.total_commission {
        violations.push(AuditViolation::MovementMismatch {
            entry: entry.id,
            total: entry.total_commission,
            movements: moved,
        });
    }
}
