use std::fmt;
use std::sync::Arc;

use liquida_core::money::DEFAULT_SCALE;
use liquida_rules::SplitCalculator;

use crate::{Clock, CommissionStore, SystemClock};

/// Behaviour switches for the ledger services.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LedgerOptions {
    /// Reject entries whose split raised a warning instead of booking them.
    pub strict_reconciliation: bool,
    /// Allow the last-resort section-wide rule when no scoped rule matches.
    pub allow_fallback_rule: bool,
    /// Fractional digits kept on every amount.
    pub rounding_scale: u32,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            strict_reconciliation: false,
            allow_fallback_rule: true,
            rounding_scale: DEFAULT_SCALE,
        }
    }
}

/// Entry point for every commission operation.
///
/// Each operation receives the acting [`liquida_core::Actor`], checks it
/// against the matching [`liquida_core::Policy`] and runs against the
/// injected store in a single storage transaction.
#[derive(Clone)]
pub struct CommissionLedger {
    pub(crate) store: Arc<dyn CommissionStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) options: LedgerOptions,
    pub(crate) calculator: SplitCalculator,
}

impl CommissionLedger {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CommissionStore>, clock: Arc<dyn Clock>) -> Self {
        let options = LedgerOptions::default();
        Self {
            store,
            clock,
            options,
            calculator: SplitCalculator::new(options.rounding_scale),
        }
    }

    pub fn with_options(mut self, options: LedgerOptions) -> Self {
        self.options = options;
        self.calculator = SplitCalculator::new(options.rounding_scale);
        self
    }

    pub fn options(&self) -> LedgerOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<dyn CommissionStore> {
        &self.store
    }
}

impl fmt::Debug for CommissionLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommissionLedger")
            .field("clock", &self.clock)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
