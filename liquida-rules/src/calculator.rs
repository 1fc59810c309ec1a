use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use liquida_core::money::DEFAULT_SCALE;
use liquida_core::{clamp_between, round_amount, CommissionRule, PayoutMode};

use crate::RuleError;

/// Contract facts the split depends on besides the rule itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SplitInput {
    pub base: Decimal,
    pub has_agent: bool,
    pub has_venue: bool,
    pub venue_special: bool,
}

impl SplitInput {
    pub fn new(base: Decimal) -> Self {
        Self {
            base,
            has_agent: true,
            has_venue: true,
            venue_special: false,
        }
    }
}

/// Non-fatal findings raised while computing a split.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitWarning {
    /// Contract base was zero.
    ZeroBase,
    /// Agent plus venue shares exceeded the rule total; the total was raised
    /// to the shares and the platform receives nothing.
    ///
    /// `rule_total` is the total after the `min_total`/`max_total` clamp.
    /// The raised total is not clamped again, so it may exceed `max_total`.
    SharesExceedTotal {
        rule_total: Decimal,
        shares: Decimal,
        excess: Decimal,
    },
}

/// Monetary split of a commission between its recipients.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub total: Decimal,
    pub agent: Decimal,
    pub venue: Decimal,
    pub platform: Decimal,
    pub warnings: Vec<SplitWarning>,
}

impl CommissionSplit {
    pub fn reconciles(&self) -> bool {
        self.total == self.agent + self.venue + self.platform
    }
}

/// Applies commission rules to contract bases.
#[derive(Clone, Copy, Debug)]
pub struct SplitCalculator {
    scale: u32,
}

impl Default for SplitCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE)
    }
}

impl SplitCalculator {
    /// `scale` is the number of fractional digits kept on each amount.
    pub fn new(scale: u32) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn compute(
        &self,
        rule: &CommissionRule,
        input: SplitInput,
    ) -> Result<CommissionSplit, RuleError> {
        let base = input.base;
        if base < Decimal::ZERO {
            return Err(RuleError::NegativeBase(base));
        }
        let mut warnings = Vec::new();
        if base.is_zero() {
            warnings.push(SplitWarning::ZeroBase);
        }

        let raw_total = match rule.payout_mode {
            PayoutMode::PercentOfBase => {
                let percentage = required(rule, rule.percentage, "percentage")?;
                base.checked_mul(percentage)
                    .ok_or_else(|| overflow(rule, "total"))?
            }
            PayoutMode::FixedAmount => required(rule, rule.fixed_amount, "fixed_amount")?,
        };
        let total = self.round(clamp_between(raw_total, rule.min_total, rule.max_total));

        let agent = if input.has_agent {
            let raw = share(base, rule.agent_percentage, rule.agent_fixed)
                .ok_or_else(|| overflow(rule, "agent share"))?;
            self.round(clamp_between(
                raw,
                rule.min_agent_amount,
                rule.max_agent_amount,
            ))
        } else {
            Decimal::ZERO
        };

        let venue = if input.has_venue {
            let raw = share(base, rule.venue_percentage, rule.venue_fixed)
                .ok_or_else(|| overflow(rule, "venue share"))?;
            let raw = if input.venue_special {
                clamp_between(
                    raw,
                    rule.min_venue_special_amount,
                    rule.max_venue_special_amount,
                )
            } else {
                raw
            };
            self.round(raw)
        } else {
            Decimal::ZERO
        };

        let shares = agent
            .checked_add(venue)
            .ok_or_else(|| overflow(rule, "agent plus venue shares"))?;
        let (total, platform) = if shares > total {
            warnings.push(SplitWarning::SharesExceedTotal {
                rule_total: total,
                shares,
                excess: shares - total,
            });
            (shares, Decimal::ZERO)
        } else {
            (total, total - shares)
        };

        Ok(CommissionSplit {
            total,
            agent,
            venue,
            platform,
            warnings,
        })
    }

    fn round(&self, value: Decimal) -> Decimal {
        round_amount(value, self.scale)
    }
}

fn share(base: Decimal, percentage: Option<Decimal>, fixed: Option<Decimal>) -> Option<Decimal> {
    base.checked_mul(percentage.unwrap_or(Decimal::ZERO))?
        .checked_add(fixed.unwrap_or(Decimal::ZERO))
}

fn overflow(rule: &CommissionRule, quantity: &'static str) -> RuleError {
    RuleError::Overflow {
        rule: rule.id,
        quantity,
    }
}

fn required(
    rule: &CommissionRule,
    value: Option<Decimal>,
    field: &'static str,
) -> Result<Decimal, RuleError> {
    value.ok_or(RuleError::IncompleteRule {
        rule: rule.id,
        mode: rule.payout_mode,
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquida_core::{SectionId, Tier};
    use rust_decimal_macros::dec;

    fn percent_rule() -> CommissionRule {
        CommissionRule::percent_of_base(SectionId(1), Tier::C1, dec!(0.10))
            .with_agent_rate(Some(dec!(0.03)), None)
            .with_venue_rate(Some(dec!(0.02)), None)
    }

    #[test]
    fn percent_rule_splits_base() {
        let split = SplitCalculator::default()
            .compute(&percent_rule(), SplitInput::new(dec!(1000.00)))
            .unwrap();
        assert_eq!(split.total, dec!(100.00));
        assert_eq!(split.agent, dec!(30.00));
        assert_eq!(split.venue, dec!(20.00));
        assert_eq!(split.platform, dec!(50.00));
        assert!(split.warnings.is_empty());
        assert!(split.reconciles());
    }

    #[test]
    fn fixed_rule_ignores_base() {
        let rule = CommissionRule::fixed(SectionId(1), Tier::C2, dec!(75.00))
            .with_agent_rate(None, Some(dec!(20.00)))
            .with_venue_rate(None, Some(dec!(10.00)));
        let split = SplitCalculator::default()
            .compute(&rule, SplitInput::new(Decimal::ZERO))
            .unwrap();
        assert_eq!(split.total, dec!(75.00));
        assert_eq!(split.platform, dec!(45.00));
        assert_eq!(split.warnings, vec![SplitWarning::ZeroBase]);
    }

    #[test]
    fn agent_clamp_moves_remainder_to_platform() {
        let rule = percent_rule().with_agent_clamp(None, Some(dec!(25.00)));
        let split = SplitCalculator::default()
            .compute(&rule, SplitInput::new(dec!(1000.00)))
            .unwrap();
        assert_eq!(split.agent, dec!(25.00));
        assert_eq!(split.platform, dec!(55.00));
    }

    #[test]
    fn total_clamp_applies_before_residual() {
        let rule = percent_rule().with_total_clamp(None, Some(dec!(60.00)));
        let split = SplitCalculator::default()
            .compute(&rule, SplitInput::new(dec!(1000.00)))
            .unwrap();
        assert_eq!(split.total, dec!(60.00));
        assert_eq!(split.platform, dec!(10.00));
    }

    #[test]
    fn total_floor_lifts_small_commissions() {
        let rule = percent_rule().with_total_clamp(Some(dec!(15.00)), None);
        let split = SplitCalculator::default()
            .compute(&rule, SplitInput::new(dec!(100.00)))
            .unwrap();
        assert_eq!(split.total, dec!(15.00));
        assert_eq!(split.agent, dec!(3.00));
        assert_eq!(split.venue, dec!(2.00));
        assert_eq!(split.platform, dec!(10.00));
        assert!(split.warnings.is_empty());
    }

    #[test]
    fn raised_total_may_exceed_max_total() {
        let rule = percent_rule()
            .with_agent_rate(Some(dec!(0.08)), None)
            .with_total_clamp(None, Some(dec!(90.00)));
        let split = SplitCalculator::default()
            .compute(&rule, SplitInput::new(dec!(1000.00)))
            .unwrap();
        assert_eq!(split.total, dec!(100.00));
        assert_eq!(split.platform, Decimal::ZERO);
        assert_eq!(
            split.warnings,
            vec![SplitWarning::SharesExceedTotal {
                rule_total: dec!(90.00),
                shares: dec!(100.00),
                excess: dec!(10.00),
            }]
        );
    }

    #[test]
    fn share_overflow_is_an_error() {
        let rule = CommissionRule::fixed(SectionId(1), Tier::C1, dec!(1))
            .with_agent_rate(None, Some(Decimal::MAX))
            .with_venue_rate(None, Some(Decimal::MAX));
        let err = SplitCalculator::new(0)
            .compute(&rule, SplitInput::new(Decimal::ZERO))
            .unwrap_err();
        assert!(matches!(
            err,
            RuleError::Overflow {
                quantity: "agent plus venue shares",
                ..
            }
        ));
    }

    #[test]
    fn venue_special_clamp_only_for_special_venues() {
        let rule = percent_rule().with_venue_special_clamp(Some(dec!(35.00)), None);
        let calc = SplitCalculator::default();
        let regular = calc.compute(&rule, SplitInput::new(dec!(1000))).unwrap();
        assert_eq!(regular.venue, dec!(20.00));
        let special = calc
            .compute(
                &rule,
                SplitInput {
                    venue_special: true,
                    ..SplitInput::new(dec!(1000))
                },
            )
            .unwrap();
        assert_eq!(special.venue, dec!(35.00));
        assert_eq!(special.platform, dec!(35.00));
    }

    #[test]
    fn oversized_shares_raise_total_and_warn() {
        let rule = CommissionRule::percent_of_base(SectionId(1), Tier::C1, dec!(0.05))
            .with_agent_rate(Some(dec!(0.04)), None)
            .with_venue_rate(Some(dec!(0.03)), None);
        let split = SplitCalculator::default()
            .compute(&rule, SplitInput::new(dec!(1000)))
            .unwrap();
        assert_eq!(split.platform, Decimal::ZERO);
        assert_eq!(split.total, dec!(70.00));
        assert!(split.reconciles());
        assert_eq!(
            split.warnings,
            vec![SplitWarning::SharesExceedTotal {
                rule_total: dec!(50.00),
                shares: dec!(70.00),
                excess: dec!(20.00),
            }]
        );
    }

    #[test]
    fn missing_recipients_receive_nothing() {
        let input = SplitInput {
            has_agent: false,
            has_venue: false,
            ..SplitInput::new(dec!(1000))
        };
        let split = SplitCalculator::default()
            .compute(&percent_rule(), input)
            .unwrap();
        assert_eq!(split.agent, Decimal::ZERO);
        assert_eq!(split.venue, Decimal::ZERO);
        assert_eq!(split.platform, dec!(100.00));
    }

    #[test]
    fn rounds_to_configured_scale() {
        let rule = CommissionRule::percent_of_base(SectionId(1), Tier::C1, dec!(0.033));
        let split = SplitCalculator::new(2)
            .compute(&rule, SplitInput::new(dec!(100.15)))
            .unwrap();
        assert_eq!(split.total, dec!(3.30));
    }

    #[test]
    fn negative_base_is_rejected() {
        let err = SplitCalculator::default()
            .compute(&percent_rule(), SplitInput::new(dec!(-1)))
            .unwrap_err();
        assert_eq!(err, RuleError::NegativeBase(dec!(-1)));
    }
}
