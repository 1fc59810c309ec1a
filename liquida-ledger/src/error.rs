use thiserror::Error;
use uuid::Uuid;

use liquida_core::{AccessDenied, ContractId, InvalidRule, SectionId, SubSectionId, TenantId, Tier};
use liquida_rules::{RuleError, SplitWarning};

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error type surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not authorized: {0}")]
    NotAuthorized(#[from] AccessDenied),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("contract {contract} already has live ledger entry {existing}")]
    DuplicateEntry { contract: ContractId, existing: Uuid },
    #[error(
        "no applicable commission rule for contract {contract} \
         (tenant {tenant}, section {section}, sub-section {sub_section:?}, tier {tier})"
    )]
    NoApplicableRule {
        contract: ContractId,
        tenant: TenantId,
        section: SectionId,
        sub_section: Option<SubSectionId>,
        tier: Tier,
    },
    #[error("invalid state transition for {kind} {id}: {reason}")]
    InvalidStateTransition {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("contract {contract} does not reconcile: {warnings:?}")]
    ReconciliationWarning {
        contract: ContractId,
        warnings: Vec<SplitWarning>,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn transition(
        kind: &'static str,
        id: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            kind,
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(value: std::io::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<InvalidRule> for LedgerError {
    fn from(value: InvalidRule) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<RuleError> for LedgerError {
    fn from(value: RuleError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}
