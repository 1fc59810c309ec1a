use tracing::info;

use liquida_core::{Actor, CommissionRule, Policy, RuleId};

use crate::{CommissionLedger, LedgerError, LedgerResult, RuleFilter};

impl CommissionLedger {
    /// Validate and store a new rule definition. The returned rule carries
    /// its assigned id.
    pub fn create_rule(&self, actor: &Actor, draft: CommissionRule) -> LedgerResult<CommissionRule> {
        Policy::MANAGE_RULES.authorize(actor, draft.tenant)?;
        draft.validate()?;
        let id = self.store.insert_rule(&draft)?;
        info!(
            rule = %id,
            tenant = ?draft.tenant,
            section = %draft.section,
            tier = %draft.tier,
            mode = %draft.payout_mode,
            "commission rule created"
        );
        Ok(draft.with_id(id))
    }

    /// Replace the terms of rule `id` with `draft`.
    pub fn update_rule(
        &self,
        actor: &Actor,
        id: RuleId,
        draft: CommissionRule,
    ) -> LedgerResult<CommissionRule> {
        let existing = self.load_rule(id)?;
        Policy::MANAGE_RULES.authorize(actor, existing.tenant)?;
        Policy::MANAGE_RULES.authorize(actor, draft.tenant)?;
        let rule = draft.with_id(id);
        rule.validate()?;
        self.store.update_rule(&rule)?;
        info!(rule = %id, "commission rule updated");
        Ok(rule)
    }

    /// Soft-enable or soft-disable a rule. Disabled rules are never resolved.
    pub fn set_rule_active(
        &self,
        actor: &Actor,
        id: RuleId,
        active: bool,
    ) -> LedgerResult<CommissionRule> {
        let mut rule = self.load_rule(id)?;
        Policy::MANAGE_RULES.authorize(actor, rule.tenant)?;
        if rule.active == active {
            return Ok(rule);
        }
        rule.active = active;
        self.store.update_rule(&rule)?;
        info!(rule = %id, active, "commission rule toggled");
        Ok(rule)
    }

    pub fn get_rule(&self, actor: &Actor, id: RuleId) -> LedgerResult<CommissionRule> {
        let rule = self.load_rule(id)?;
        if let Some(tenant) = rule.tenant {
            Policy::READ_LEDGER.authorize(actor, Some(tenant))?;
        }
        Ok(rule)
    }

    /// List rules. Unscoped listings (every tenant's rules) are owner-only;
    /// other actors must restrict the filter to their own tenant.
    pub fn list_rules(&self, actor: &Actor, filter: &RuleFilter) -> LedgerResult<Vec<CommissionRule>> {
        Policy::READ_LEDGER.authorize(actor, filter.visible_to)?;
        self.store.rules(filter)
    }

    fn load_rule(&self, id: RuleId) -> LedgerResult<CommissionRule> {
        self.store
            .rule(id)?
            .ok_or_else(|| LedgerError::not_found("rule", id))
    }
}
