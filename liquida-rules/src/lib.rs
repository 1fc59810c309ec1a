//! Pure commission logic: picking the rule that applies to a contract and
//! turning it into an agent/venue/platform split. No I/O happens here.

mod calculator;
mod resolver;

pub use calculator::{CommissionSplit, SplitCalculator, SplitInput, SplitWarning};
pub use resolver::{resolve_rule, Precedence, ResolvedRule, RuleLookup};

use rust_decimal::Decimal;
use thiserror::Error;

use liquida_core::{PayoutMode, RuleId};

/// Errors raised while applying a rule.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RuleError {
    #[error("commission base must not be negative, got {0}")]
    NegativeBase(Decimal),
    #[error("rule {rule} is {mode} but has no {field}")]
    IncompleteRule {
        rule: RuleId,
        mode: PayoutMode,
        field: &'static str,
    },
    #[error("rule {rule}: {quantity} overflows the decimal range")]
    Overflow {
        rule: RuleId,
        quantity: &'static str,
    },
}
