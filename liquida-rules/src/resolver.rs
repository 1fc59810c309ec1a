use std::fmt;

use serde::{Deserialize, Serialize};

use liquida_core::{CommissionRule, SectionId, SubSectionId, TenantId, Tier};

/// Which precedence level produced a resolved rule, highest first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    TenantSubSection,
    TenantSection,
    GlobalSubSection,
    GlobalSection,
    /// Any active rule of the section. Callers must treat this as a warning.
    SectionFallback,
}

impl Precedence {
    pub fn as_str(self) -> &'static str {
        match self {
            Precedence::TenantSubSection => "tenant_sub_section",
            Precedence::TenantSection => "tenant_section",
            Precedence::GlobalSubSection => "global_sub_section",
            Precedence::GlobalSection => "global_section",
            Precedence::SectionFallback => "section_fallback",
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, Precedence::SectionFallback)
    }
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinates of the contract a rule is looked up for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RuleLookup {
    pub tenant: TenantId,
    pub section: SectionId,
    pub sub_section: Option<SubSectionId>,
    pub tier: Tier,
}

/// Rule picked by [`resolve_rule`] together with how it was found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedRule {
    pub rule: CommissionRule,
    pub precedence: Precedence,
    /// Number of rules that matched at the winning level. More than one
    /// means the store holds overlapping definitions.
    pub matches: usize,
}

/// Select the single applicable rule out of `candidates`.
///
/// Inactive rules and rules of other sections or tenants are ignored. Within
/// a level the lowest rule id wins so resolution is deterministic.
pub fn resolve_rule(
    candidates: &[CommissionRule],
    lookup: &RuleLookup,
    allow_fallback: bool,
) -> Option<ResolvedRule> {
    let eligible: Vec<&CommissionRule> = candidates
        .iter()
        .filter(|rule| rule.active && rule.section == lookup.section)
        .filter(|rule| rule.tenant.map_or(true, |tenant| tenant == lookup.tenant))
        .collect();

    let mut levels = Vec::with_capacity(4);
    if lookup.sub_section.is_some() {
        levels.push(Precedence::TenantSubSection);
    }
    levels.push(Precedence::TenantSection);
    if lookup.sub_section.is_some() {
        levels.push(Precedence::GlobalSubSection);
    }
    levels.push(Precedence::GlobalSection);

    for precedence in levels {
        let mut hits: Vec<&CommissionRule> = eligible
            .iter()
            .copied()
            .filter(|rule| rule.tier == lookup.tier && scope_matches(precedence, rule, lookup))
            .collect();
        if hits.is_empty() {
            continue;
        }
        hits.sort_by_key(|rule| rule.id);
        return Some(ResolvedRule {
            rule: hits[0].clone(),
            precedence,
            matches: hits.len(),
        });
    }

    if !allow_fallback {
        return None;
    }
    // Tenant rules before global ones, then lowest id.
    eligible
        .iter()
        .min_by_key(|rule| (rule.tenant.is_none(), rule.id))
        .map(|rule| ResolvedRule {
            rule: (*rule).clone(),
            precedence: Precedence::SectionFallback,
            matches: eligible.len(),
        })
}

fn scope_matches(precedence: Precedence, rule: &CommissionRule, lookup: &RuleLookup) -> bool {
    let tenant = Some(lookup.tenant);
    match precedence {
        Precedence::TenantSubSection => {
            rule.tenant == tenant
                && rule.sub_section.is_some()
                && rule.sub_section == lookup.sub_section
        }
        Precedence::TenantSection => rule.tenant == tenant && rule.sub_section.is_none(),
        Precedence::GlobalSubSection => {
            rule.tenant.is_none()
                && rule.sub_section.is_some()
                && rule.sub_section == lookup.sub_section
        }
        Precedence::GlobalSection => rule.tenant.is_none() && rule.sub_section.is_none(),
        Precedence::SectionFallback => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquida_core::RuleId;
    use rust_decimal_macros::dec;

    const SECTION: SectionId = SectionId(1);
    const TENANT: TenantId = TenantId(10);

    fn lookup(sub: Option<i64>, tier: Tier) -> RuleLookup {
        RuleLookup {
            tenant: TENANT,
            section: SECTION,
            sub_section: sub.map(SubSectionId),
            tier,
        }
    }

    fn rule(id: i64, tenant: Option<i64>, sub: Option<i64>, tier: Tier) -> CommissionRule {
        let mut rule =
            CommissionRule::percent_of_base(SECTION, tier, dec!(0.10)).with_id(RuleId(id));
        rule.tenant = tenant.map(TenantId);
        rule.sub_section = sub.map(SubSectionId);
        rule
    }

    #[test]
    fn tenant_rule_beats_global_rule() {
        let rules = vec![
            rule(1, None, Some(5), Tier::C1),
            rule(2, Some(10), Some(5), Tier::C1),
        ];
        let resolved = resolve_rule(&rules, &lookup(Some(5), Tier::C1), true).unwrap();
        assert_eq!(resolved.rule.id, RuleId(2));
        assert_eq!(resolved.precedence, Precedence::TenantSubSection);
    }

    #[test]
    fn walks_the_precedence_ladder() {
        let mut rules = vec![
            rule(1, None, None, Tier::C1),
            rule(2, None, Some(5), Tier::C1),
            rule(3, Some(10), None, Tier::C1),
            rule(4, Some(10), Some(5), Tier::C1),
        ];
        let query = lookup(Some(5), Tier::C1);
        let expected = [
            (RuleId(4), Precedence::TenantSubSection),
            (RuleId(3), Precedence::TenantSection),
            (RuleId(2), Precedence::GlobalSubSection),
            (RuleId(1), Precedence::GlobalSection),
        ];
        for (id, precedence) in expected {
            let resolved = resolve_rule(&rules, &query, false).unwrap();
            assert_eq!((resolved.rule.id, resolved.precedence), (id, precedence));
            rules.retain(|candidate| candidate.id != id);
        }
        assert!(resolve_rule(&rules, &query, false).is_none());
    }

    #[test]
    fn ignores_inactive_and_foreign_rules() {
        let mut inactive = rule(1, Some(10), None, Tier::C1);
        inactive.active = false;
        let rules = vec![inactive, rule(2, Some(99), None, Tier::C1), rule(3, None, None, Tier::C1)];
        let resolved = resolve_rule(&rules, &lookup(None, Tier::C1), false).unwrap();
        assert_eq!(resolved.rule.id, RuleId(3));
        assert_eq!(resolved.precedence, Precedence::GlobalSection);
    }

    #[test]
    fn fallback_only_when_allowed() {
        let rules = vec![rule(7, None, None, Tier::C3), rule(8, Some(10), None, Tier::C2)];
        let query = lookup(None, Tier::C1);
        assert!(resolve_rule(&rules, &query, false).is_none());
        let resolved = resolve_rule(&rules, &query, true).unwrap();
        assert_eq!(resolved.rule.id, RuleId(8));
        assert!(resolved.precedence.is_fallback());
    }

    #[test]
    fn no_rule_for_section_resolves_to_none() {
        let mut other = rule(1, None, None, Tier::C1);
        other.section = SectionId(2);
        assert!(resolve_rule(&[other], &lookup(None, Tier::C1), true).is_none());
    }

    #[test]
    fn overlapping_rules_pick_lowest_id() {
        let rules = vec![rule(9, None, None, Tier::C1), rule(4, None, None, Tier::C1)];
        let resolved = resolve_rule(&rules, &lookup(None, Tier::C1), false).unwrap();
        assert_eq!(resolved.rule.id, RuleId(4));
        assert_eq!(resolved.matches, 2);
    }
}
