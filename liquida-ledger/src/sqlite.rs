use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use liquida_core::{
    ActorId, AgentId, CommissionRule, Contract, ContractId, ContractState, RuleId, SectionId,
    SubSectionId, TenantId, VenueId,
};

use crate::{
    AttachOutcome, CloseOutcome, CommissionStore, EntryQuery, EntryState, LedgerEntry,
    LedgerError, LedgerResult, Movement, RuleFilter, Settlement, SettlementState, VoidOutcome,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS commission_rules (
    rule_id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER,
    section_id INTEGER NOT NULL,
    sub_section_id INTEGER,
    tier TEXT NOT NULL,
    payout_mode TEXT NOT NULL,
    percentage TEXT,
    fixed_amount TEXT,
    agent_percentage TEXT,
    agent_fixed TEXT,
    venue_percentage TEXT,
    venue_fixed TEXT,
    min_total TEXT,
    max_total TEXT,
    min_agent_amount TEXT,
    max_agent_amount TEXT,
    min_venue_special_amount TEXT,
    max_venue_special_amount TEXT,
    active INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS rules_idx_section_tenant
    ON commission_rules(section_id, tenant_id, tier);

CREATE TABLE IF NOT EXISTS contracts (
    contract_id INTEGER PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    section_id INTEGER NOT NULL,
    sub_section_id INTEGER,
    tier TEXT NOT NULL,
    agent_id INTEGER,
    venue_id INTEGER,
    venue_special INTEGER NOT NULL DEFAULT 0,
    base TEXT NOT NULL,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    tenant_id INTEGER NOT NULL,
    agent_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (tenant_id, agent_id)
);

CREATE TABLE IF NOT EXISTS venues (
    tenant_id INTEGER NOT NULL,
    venue_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (tenant_id, venue_id)
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    entry_id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    contract_id INTEGER NOT NULL,
    agent_id INTEGER,
    venue_id INTEGER,
    rule_id INTEGER NOT NULL,
    base TEXT NOT NULL,
    total_commission TEXT NOT NULL,
    agent_amount TEXT NOT NULL,
    venue_amount TEXT NOT NULL,
    platform_amount TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    settled_at TEXT,
    voided_at TEXT,
    voided_by INTEGER,
    void_reason TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS ledger_idx_live_contract
    ON ledger_entries(contract_id) WHERE state <> 'void';
CREATE INDEX IF NOT EXISTS ledger_idx_tenant_created
    ON ledger_entries(tenant_id, created_at);

CREATE TABLE IF NOT EXISTS settlements (
    settlement_id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    date_from TEXT NOT NULL,
    date_to TEXT NOT NULL,
    state TEXT NOT NULL,
    total_agent_amount TEXT NOT NULL,
    total_venue_amount TEXT NOT NULL,
    total_platform_amount TEXT NOT NULL,
    created_at TEXT NOT NULL,
    closed_at TEXT
);
CREATE INDEX IF NOT EXISTS settlements_idx_tenant
    ON settlements(tenant_id, state);

CREATE TABLE IF NOT EXISTS movements (
    movement_id TEXT PRIMARY KEY,
    entry_id TEXT NOT NULL REFERENCES ledger_entries(entry_id),
    tenant_id INTEGER NOT NULL,
    recipient TEXT NOT NULL,
    recipient_id INTEGER,
    amount TEXT NOT NULL,
    settlement_id TEXT REFERENCES settlements(settlement_id)
);
CREATE INDEX IF NOT EXISTS movements_idx_entry ON movements(entry_id);
CREATE INDEX IF NOT EXISTS movements_idx_settlement ON movements(settlement_id);
CREATE INDEX IF NOT EXISTS movements_idx_unassigned
    ON movements(tenant_id) WHERE settlement_id IS NULL;
"#;

const RULE_COLUMNS: &str = "rule_id, tenant_id, section_id, sub_section_id, tier, payout_mode, \
     percentage, fixed_amount, agent_percentage, agent_fixed, venue_percentage, venue_fixed, \
     min_total, max_total, min_agent_amount, max_agent_amount, min_venue_special_amount, \
     max_venue_special_amount, active";

const CONTRACT_COLUMNS: &str = "contract_id, tenant_id, section_id, sub_section_id, tier, \
     agent_id, venue_id, venue_special, base, state";

const ENTRY_COLUMNS: &str = "entry_id, tenant_id, contract_id, agent_id, venue_id, rule_id, \
     base, total_commission, agent_amount, venue_amount, platform_amount, state, created_at, \
     settled_at, voided_at, voided_by, void_reason";

const MOVEMENT_COLUMNS: &str =
    "movement_id, entry_id, tenant_id, recipient, recipient_id, amount, settlement_id";

const SETTLEMENT_COLUMNS: &str = "settlement_id, tenant_id, date_from, date_to, state, \
     total_agent_amount, total_venue_amount, total_platform_amount, created_at, closed_at";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// SQLite-backed commission store.
///
/// Each operation opens its own connection and runs inside one transaction;
/// writers take the database lock up front so guard checks and the mutation
/// they protect cannot interleave with another writer.
#[derive(Clone, Debug)]
pub struct SqliteCommissionStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteCommissionStore {
    pub fn new(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(path: impl Into<PathBuf>, busy_timeout: Duration) -> LedgerResult<Self> {
        let store = Self {
            path: path.into(),
            busy_timeout,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn connect(&self) -> LedgerResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        Ok(conn)
    }

    fn write<T>(&self, op: impl FnOnce(&Transaction<'_>) -> LedgerResult<T>) -> LedgerResult<T> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl CommissionStore for SqliteCommissionStore {
    fn insert_rule(&self, rule: &CommissionRule) -> LedgerResult<RuleId> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO commission_rules (
                    tenant_id, section_id, sub_section_id, tier, payout_mode, percentage,
                    fixed_amount, agent_percentage, agent_fixed, venue_percentage, venue_fixed,
                    min_total, max_total, min_agent_amount, max_agent_amount,
                    min_venue_special_amount, max_venue_special_amount, active
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    rule.tenant.map(TenantId::get),
                    rule.section.get(),
                    rule.sub_section.map(|id| id.get()),
                    rule.tier.as_str(),
                    rule.payout_mode.as_str(),
                    opt_text(rule.percentage),
                    opt_text(rule.fixed_amount),
                    opt_text(rule.agent_percentage),
                    opt_text(rule.agent_fixed),
                    opt_text(rule.venue_percentage),
                    opt_text(rule.venue_fixed),
                    opt_text(rule.min_total),
                    opt_text(rule.max_total),
                    opt_text(rule.min_agent_amount),
                    opt_text(rule.max_agent_amount),
                    opt_text(rule.min_venue_special_amount),
                    opt_text(rule.max_venue_special_amount),
                    rule.active,
                ],
            )?;
            Ok(RuleId(tx.last_insert_rowid()))
        })
    }

    fn update_rule(&self, rule: &CommissionRule) -> LedgerResult<()> {
        self.write(|tx| {
            let changed = tx.execute(
                "UPDATE commission_rules SET
                    tenant_id = ?2, section_id = ?3, sub_section_id = ?4, tier = ?5,
                    payout_mode = ?6, percentage = ?7, fixed_amount = ?8,
                    agent_percentage = ?9, agent_fixed = ?10, venue_percentage = ?11,
                    venue_fixed = ?12, min_total = ?13, max_total = ?14,
                    min_agent_amount = ?15, max_agent_amount = ?16,
                    min_venue_special_amount = ?17, max_venue_special_amount = ?18, active = ?19
                 WHERE rule_id = ?1",
                params![
                    rule.id.get(),
                    rule.tenant.map(TenantId::get),
                    rule.section.get(),
                    rule.sub_section.map(|id| id.get()),
                    rule.tier.as_str(),
                    rule.payout_mode.as_str(),
                    opt_text(rule.percentage),
                    opt_text(rule.fixed_amount),
                    opt_text(rule.agent_percentage),
                    opt_text(rule.agent_fixed),
                    opt_text(rule.venue_percentage),
                    opt_text(rule.venue_fixed),
                    opt_text(rule.min_total),
                    opt_text(rule.max_total),
                    opt_text(rule.min_agent_amount),
                    opt_text(rule.max_agent_amount),
                    opt_text(rule.min_venue_special_amount),
                    opt_text(rule.max_venue_special_amount),
                    rule.active,
                ],
            )?;
            if changed == 0 {
                return Err(LedgerError::not_found("rule", rule.id));
            }
            Ok(())
        })
    }

    fn rule(&self, id: RuleId) -> LedgerResult<Option<CommissionRule>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {RULE_COLUMNS} FROM commission_rules WHERE rule_id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id.get()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_rule(row)?)),
            None => Ok(None),
        }
    }

    fn rules(&self, filter: &RuleFilter) -> LedgerResult<Vec<CommissionRule>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM commission_rules
             WHERE (?1 IS NULL OR section_id = ?1)
               AND (?2 IS NULL OR tenant_id IS NULL OR tenant_id = ?2)
               AND (?3 = 0 OR active = 1)
             ORDER BY rule_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            filter.section.map(|id| id.get()),
            filter.visible_to.map(TenantId::get),
            filter.active_only,
        ])?;
        let mut rules = Vec::new();
        while let Some(row) = rows.next()? {
            rules.push(row_to_rule(row)?);
        }
        Ok(rules)
    }

    fn insert_contract(&self, contract: &Contract) -> LedgerResult<()> {
        self.write(|tx| {
            let inserted = tx.execute(
                "INSERT INTO contracts (
                    contract_id, tenant_id, section_id, sub_section_id, tier, agent_id,
                    venue_id, venue_special, base, state
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    contract.id.get(),
                    contract.tenant.get(),
                    contract.section.get(),
                    contract.sub_section.map(|id| id.get()),
                    contract.tier.as_str(),
                    contract.agent.map(AgentId::get),
                    contract.venue.map(VenueId::get),
                    contract.venue_special,
                    contract.base.to_string(),
                    contract.state.as_str(),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(err) if is_constraint_violation(&err) => Err(LedgerError::InvalidInput(
                    format!("contract {} is already registered", contract.id),
                )),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn contract(&self, id: ContractId) -> LedgerResult<Option<Contract>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE contract_id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id.get()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_contract(row)?)),
            None => Ok(None),
        }
    }

    fn transition_contract(
        &self,
        id: ContractId,
        from: ContractState,
        to: ContractState,
    ) -> LedgerResult<bool> {
        self.write(|tx| {
            let changed = tx.execute(
                "UPDATE contracts SET state = ?3 WHERE contract_id = ?1 AND state = ?2",
                params![id.get(), from.as_str(), to.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    fn upsert_agent(&self, tenant: TenantId, agent: AgentId, name: &str) -> LedgerResult<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO agents (tenant_id, agent_id, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id, agent_id) DO UPDATE SET name = excluded.name",
                params![tenant.get(), agent.get(), name],
            )?;
            Ok(())
        })
    }

    fn upsert_venue(&self, tenant: TenantId, venue: VenueId, name: &str) -> LedgerResult<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO venues (tenant_id, venue_id, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id, venue_id) DO UPDATE SET name = excluded.name",
                params![tenant.get(), venue.get(), name],
            )?;
            Ok(())
        })
    }

    fn agent_names(&self, tenant: TenantId) -> LedgerResult<HashMap<AgentId, String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT agent_id, name FROM agents WHERE tenant_id = ?1")?;
        let rows = stmt.query_map(params![tenant.get()], |row| {
            Ok((AgentId(row.get(0)?), row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn venue_names(&self, tenant: TenantId) -> LedgerResult<HashMap<VenueId, String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT venue_id, name FROM venues WHERE tenant_id = ?1")?;
        let rows = stmt.query_map(params![tenant.get()], |row| {
            Ok((VenueId(row.get(0)?), row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn insert_entry(&self, entry: &LedgerEntry, movements: &[Movement]) -> LedgerResult<()> {
        self.write(|tx| insert_entry_tx(tx, entry, movements))
    }

    fn entry(&self, id: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        let conn = self.connect()?;
        load_entry(&conn, id)
    }

    fn live_entry_for_contract(
        &self,
        tenant: TenantId,
        contract: ContractId,
    ) -> LedgerResult<Option<LedgerEntry>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE tenant_id = ?1 AND contract_id = ?2 AND state <> 'void'"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![tenant.get(), contract.get()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_entry(row)?)),
            None => Ok(None),
        }
    }

    fn void_entry(
        &self,
        id: Uuid,
        voided_by: ActorId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<VoidOutcome> {
        self.write(|tx| void_entry_tx(tx, id, voided_by, reason, at))
    }

    fn replace_entry(
        &self,
        replaced: Uuid,
        voided_by: ActorId,
        reason: &str,
        at: DateTime<Utc>,
        entry: &LedgerEntry,
        movements: &[Movement],
    ) -> LedgerResult<LedgerEntry> {
        self.write(|tx| {
            let voided = void_entry_tx(tx, replaced, voided_by, reason, at)?.into_entry();
            insert_entry_tx(tx, entry, movements)?;
            Ok(voided)
        })
    }

    fn entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>> {
        let conn = self.connect()?;
        let mut sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR contract_id = ?2)
               AND (?3 IS NULL OR agent_id = ?3)
               AND (?4 IS NULL OR venue_id = ?4)
               AND (?5 IS NULL OR state = ?5)
               AND (?6 = 0 OR state <> 'void')
               AND (?7 IS NULL OR created_at >= ?7)
               AND (?8 IS NULL OR created_at < ?8)"
        );
        sql.push_str(if query.ascending {
            " ORDER BY created_at ASC, entry_id ASC"
        } else {
            " ORDER BY created_at DESC, entry_id DESC"
        });
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?9");
        }

        let mut params: Vec<Value> = Vec::with_capacity(9);
        params.push(Value::Integer(query.tenant.get()));
        params.push(optional_int(query.contract.map(ContractId::get)));
        params.push(optional_int(query.agent.map(AgentId::get)));
        params.push(optional_int(query.venue.map(VenueId::get)));
        params.push(optional_text(query.state.map(|s| s.as_str().to_string())));
        params.push(Value::Integer(query.live_only as i64));
        params.push(optional_text(query.start_time.map(encode_ts)));
        params.push(optional_text(query.end_time.map(encode_ts)));
        if let Some(limit) = query.limit {
            params.push(Value::Integer(limit as i64));
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    fn movements_for_entry(&self, entry: Uuid) -> LedgerResult<Vec<Movement>> {
        let conn = self.connect()?;
        query_movements(&conn, "entry_id = ?1", &entry.to_string())
    }

    fn insert_settlement(&self, settlement: &Settlement) -> LedgerResult<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO settlements (
                    settlement_id, tenant_id, date_from, date_to, state, total_agent_amount,
                    total_venue_amount, total_platform_amount, created_at, closed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    settlement.id.to_string(),
                    settlement.tenant.get(),
                    settlement.date_from.to_string(),
                    settlement.date_to.to_string(),
                    settlement.state.as_str(),
                    settlement.total_agent_amount.to_string(),
                    settlement.total_venue_amount.to_string(),
                    settlement.total_platform_amount.to_string(),
                    encode_ts(settlement.created_at),
                    settlement.closed_at.map(encode_ts),
                ],
            )?;
            Ok(())
        })
    }

    fn settlement(&self, id: Uuid) -> LedgerResult<Option<Settlement>> {
        let conn = self.connect()?;
        load_settlement(&conn, id)
    }

    fn settlements(
        &self,
        tenant: TenantId,
        state: Option<SettlementState>,
    ) -> LedgerResult<Vec<Settlement>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements
             WHERE tenant_id = ?1 AND (?2 IS NULL OR state = ?2)
             ORDER BY date_from ASC, created_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![tenant.get(), state.map(|s| s.as_str())])?;
        let mut settlements = Vec::new();
        while let Some(row) = rows.next()? {
            settlements.push(row_to_settlement(row)?);
        }
        Ok(settlements)
    }

    fn settlement_movements(&self, settlement: Uuid) -> LedgerResult<Vec<Movement>> {
        let conn = self.connect()?;
        query_movements(&conn, "settlement_id = ?1", &settlement.to_string())
    }

    fn attach_pending_movements(&self, settlement: Uuid) -> LedgerResult<AttachOutcome> {
        self.write(|tx| {
            let mut current = load_settlement(tx, settlement)?
                .ok_or_else(|| LedgerError::not_found("settlement", settlement))?;
            if !current.is_open() {
                return Err(LedgerError::transition(
                    "settlement",
                    settlement,
                    "cannot add movements to a closed settlement",
                ));
            }

            let candidates: Vec<(String, String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT m.movement_id, m.recipient, m.amount
                     FROM movements m
                     JOIN ledger_entries e ON e.entry_id = m.entry_id
                     WHERE m.tenant_id = ?1
                       AND m.settlement_id IS NULL
                       AND e.tenant_id = ?1
                       AND e.state <> 'void'
                       AND e.created_at >= ?2
                       AND (?3 IS NULL OR e.created_at < ?3)
                     ORDER BY e.created_at ASC, m.movement_id ASC",
                )?;
                let rows = stmt.query_map(
                    params![
                        current.tenant.get(),
                        encode_ts(current.window_start()),
                        current.window_end().map(encode_ts),
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                rows.collect::<Result<_, _>>()?
            };

            let mut added = 0;
            for (movement_id, recipient, amount) in candidates {
                let claimed = tx.execute(
                    "UPDATE movements SET settlement_id = ?1
                     WHERE movement_id = ?2 AND settlement_id IS NULL",
                    params![settlement.to_string(), movement_id],
                )?;
                if claimed == 1 {
                    added += 1;
                    current.accumulate(parse_enum(&recipient)?, parse_decimal(&amount)?)?;
                }
            }

            store_totals(tx, &current)?;
            Ok(AttachOutcome {
                added,
                settlement: current,
            })
        })
    }

    fn close_settlement(&self, settlement: Uuid, at: DateTime<Utc>) -> LedgerResult<CloseOutcome> {
        self.write(|tx| {
            let current = load_settlement(tx, settlement)?
                .ok_or_else(|| LedgerError::not_found("settlement", settlement))?;
            if !current.is_open() {
                return Err(LedgerError::transition(
                    "settlement",
                    settlement,
                    "settlement is already closed",
                ));
            }

            let entry_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT DISTINCT entry_id FROM movements WHERE settlement_id = ?1
                     ORDER BY entry_id",
                )?;
                let rows = stmt.query_map(params![settlement.to_string()], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };

            let mut settled_entries = Vec::new();
            for entry_id in entry_ids {
                let outside: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM movements
                     WHERE entry_id = ?1 AND (settlement_id IS NULL OR settlement_id <> ?2)",
                    params![entry_id, settlement.to_string()],
                    |row| row.get(0),
                )?;
                if outside > 0 {
                    continue;
                }
                let changed = tx.execute(
                    "UPDATE ledger_entries SET state = 'settled', settled_at = ?2
                     WHERE entry_id = ?1 AND state = 'pending'",
                    params![entry_id, encode_ts(at)],
                )?;
                if changed == 1 {
                    settled_entries.push(parse_uuid(&entry_id)?);
                }
            }

            tx.execute(
                "UPDATE settlements SET state = 'closed', closed_at = ?2
                 WHERE settlement_id = ?1 AND state = 'open'",
                params![settlement.to_string(), encode_ts(at)],
            )?;
            let closed = load_settlement(tx, settlement)?
                .ok_or_else(|| LedgerError::not_found("settlement", settlement))?;
            Ok(CloseOutcome {
                settlement: closed,
                settled_entries,
            })
        })
    }
}

fn insert_entry_tx(
    tx: &Transaction<'_>,
    entry: &LedgerEntry,
    movements: &[Movement],
) -> LedgerResult<()> {
    if let Some(existing) = live_entry_id(tx, entry.contract)? {
        return Err(LedgerError::DuplicateEntry {
            contract: entry.contract,
            existing,
        });
    }
    let inserted = tx.execute(
        "INSERT INTO ledger_entries (
            entry_id, tenant_id, contract_id, agent_id, venue_id, rule_id, base,
            total_commission, agent_amount, venue_amount, platform_amount, state,
            created_at, settled_at, voided_at, voided_by, void_reason
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            entry.id.to_string(),
            entry.tenant.get(),
            entry.contract.get(),
            entry.agent.map(AgentId::get),
            entry.venue.map(VenueId::get),
            entry.rule.get(),
            entry.base.to_string(),
            entry.total_commission.to_string(),
            entry.agent_amount.to_string(),
            entry.venue_amount.to_string(),
            entry.platform_amount.to_string(),
            entry.state.as_str(),
            encode_ts(entry.created_at),
            entry.settled_at.map(encode_ts),
            entry.voided_at.map(encode_ts),
            entry.voided_by.map(ActorId::get),
            entry.void_reason,
        ],
    );
    if let Err(err) = inserted {
        if is_constraint_violation(&err) {
            if let Some(existing) = live_entry_id(tx, entry.contract)? {
                return Err(LedgerError::DuplicateEntry {
                    contract: entry.contract,
                    existing,
                });
            }
        }
        return Err(err.into());
    }
    for movement in movements {
        tx.execute(
            "INSERT INTO movements (
                movement_id, entry_id, tenant_id, recipient, recipient_id, amount,
                settlement_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                movement.id.to_string(),
                movement.entry.to_string(),
                movement.tenant.get(),
                movement.recipient.as_str(),
                movement.recipient_id,
                movement.amount.to_string(),
                movement.settlement.map(|id| id.to_string()),
            ],
        )?;
    }
    Ok(())
}

fn void_entry_tx(
    tx: &Transaction<'_>,
    id: Uuid,
    voided_by: ActorId,
    reason: &str,
    at: DateTime<Utc>,
) -> LedgerResult<VoidOutcome> {
    let entry = load_entry(tx, id)?.ok_or_else(|| LedgerError::not_found("entry", id))?;
    if entry.state == EntryState::Void {
        return Ok(VoidOutcome::AlreadyVoid(entry));
    }
    release_open_settlements(tx, id)?;
    tx.execute(
        "UPDATE ledger_entries
         SET state = 'void', voided_at = ?2, voided_by = ?3, void_reason = ?4
         WHERE entry_id = ?1 AND state <> 'void'",
        params![id.to_string(), encode_ts(at), voided_by.get(), reason],
    )?;
    tx.execute(
        "UPDATE movements SET amount = '0' WHERE entry_id = ?1",
        params![id.to_string()],
    )?;
    let entry = load_entry(tx, id)?.ok_or_else(|| LedgerError::not_found("entry", id))?;
    Ok(VoidOutcome::Voided(entry))
}

/// Take the movements of `entry` back out of the totals of the open
/// settlements they are attached to. Closed settlements keep their totals.
fn release_open_settlements(tx: &Transaction<'_>, entry: Uuid) -> LedgerResult<()> {
    let attached: Vec<(String, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT m.settlement_id, m.recipient, m.amount
             FROM movements m
             JOIN settlements s ON s.settlement_id = m.settlement_id
             WHERE m.entry_id = ?1 AND s.state = 'open'
             ORDER BY m.settlement_id",
        )?;
        let rows = stmt.query_map(params![entry.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect::<Result<_, _>>()?
    };

    let mut released: Vec<Settlement> = Vec::new();
    for (settlement_id, recipient, amount) in attached {
        let settlement_id = parse_uuid(&settlement_id)?;
        if released.last().map(|s| s.id) != Some(settlement_id) {
            let settlement = load_settlement(tx, settlement_id)?
                .ok_or_else(|| LedgerError::not_found("settlement", settlement_id))?;
            released.push(settlement);
        }
        if let Some(settlement) = released.last_mut() {
            settlement.deduct(parse_enum(&recipient)?, parse_decimal(&amount)?)?;
        }
    }
    for settlement in &released {
        store_totals(tx, settlement)?;
    }
    Ok(())
}

fn store_totals(tx: &Transaction<'_>, settlement: &Settlement) -> LedgerResult<()> {
    tx.execute(
        "UPDATE settlements
         SET total_agent_amount = ?2, total_venue_amount = ?3, total_platform_amount = ?4
         WHERE settlement_id = ?1 AND state = 'open'",
        params![
            settlement.id.to_string(),
            settlement.total_agent_amount.to_string(),
            settlement.total_venue_amount.to_string(),
            settlement.total_platform_amount.to_string(),
        ],
    )?;
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation
    )
}

fn live_entry_id(conn: &Connection, contract: ContractId) -> LedgerResult<Option<Uuid>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT entry_id FROM ledger_entries WHERE contract_id = ?1 AND state <> 'void'",
            params![contract.get()],
            |row| row.get(0),
        )
        .optional()?;
    id.as_deref().map(parse_uuid).transpose()
}

fn load_entry(conn: &Connection, id: Uuid) -> LedgerResult<Option<LedgerEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE entry_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_entry(row)?)),
        None => Ok(None),
    }
}

fn load_settlement(conn: &Connection, id: Uuid) -> LedgerResult<Option<Settlement>> {
    let sql = format!("SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE settlement_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_settlement(row)?)),
        None => Ok(None),
    }
}

fn query_movements(conn: &Connection, predicate: &str, key: &str) -> LedgerResult<Vec<Movement>> {
    let sql = format!(
        "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE {predicate} ORDER BY recipient, movement_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![key])?;
    let mut movements = Vec::new();
    while let Some(row) = rows.next()? {
        movements.push(row_to_movement(row)?);
    }
    Ok(movements)
}

fn encode_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn optional_int(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

fn opt_text(value: Option<Decimal>) -> Option<String> {
    value.map(|v| v.to_string())
}

fn parse_ts(raw: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| LedgerError::Serialization(format!("invalid timestamp {raw}: {err}")))
}

fn parse_date(raw: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::from_str(raw)
        .map_err(|err| LedgerError::Serialization(format!("invalid date {raw}: {err}")))
}

fn parse_decimal(raw: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|err| LedgerError::Serialization(format!("invalid decimal {raw}: {err}")))
}

fn parse_opt_decimal(raw: Option<String>) -> LedgerResult<Option<Decimal>> {
    raw.as_deref().map(parse_decimal).transpose()
}

fn parse_uuid(raw: &str) -> LedgerResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| LedgerError::Serialization(format!("invalid id {raw}: {err}")))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> LedgerResult<T> {
    T::from_str(raw).map_err(LedgerError::Serialization)
}

fn row_to_rule(row: &Row<'_>) -> LedgerResult<CommissionRule> {
    let tier: String = row.get(4)?;
    let mode: String = row.get(5)?;
    Ok(CommissionRule {
        id: RuleId(row.get(0)?),
        tenant: row.get::<_, Option<i64>>(1)?.map(TenantId),
        section: SectionId(row.get(2)?),
        sub_section: row.get::<_, Option<i64>>(3)?.map(SubSectionId),
        tier: parse_enum(&tier)?,
        payout_mode: parse_enum(&mode)?,
        percentage: parse_opt_decimal(row.get(6)?)?,
        fixed_amount: parse_opt_decimal(row.get(7)?)?,
        agent_percentage: parse_opt_decimal(row.get(8)?)?,
        agent_fixed: parse_opt_decimal(row.get(9)?)?,
        venue_percentage: parse_opt_decimal(row.get(10)?)?,
        venue_fixed: parse_opt_decimal(row.get(11)?)?,
        min_total: parse_opt_decimal(row.get(12)?)?,
        max_total: parse_opt_decimal(row.get(13)?)?,
        min_agent_amount: parse_opt_decimal(row.get(14)?)?,
        max_agent_amount: parse_opt_decimal(row.get(15)?)?,
        min_venue_special_amount: parse_opt_decimal(row.get(16)?)?,
        max_venue_special_amount: parse_opt_decimal(row.get(17)?)?,
        active: row.get(18)?,
    })
}

fn row_to_contract(row: &Row<'_>) -> LedgerResult<Contract> {
    let tier: String = row.get(4)?;
    let base: String = row.get(8)?;
    let state: String = row.get(9)?;
    Ok(Contract {
        id: ContractId(row.get(0)?),
        tenant: TenantId(row.get(1)?),
        section: SectionId(row.get(2)?),
        sub_section: row.get::<_, Option<i64>>(3)?.map(SubSectionId),
        tier: parse_enum(&tier)?,
        agent: row.get::<_, Option<i64>>(5)?.map(AgentId),
        venue: row.get::<_, Option<i64>>(6)?.map(VenueId),
        venue_special: row.get(7)?,
        base: parse_decimal(&base)?,
        state: parse_enum(&state)?,
    })
}

fn row_to_entry(row: &Row<'_>) -> LedgerResult<LedgerEntry> {
    let id: String = row.get(0)?;
    let base: String = row.get(6)?;
    let total: String = row.get(7)?;
    let agent_amount: String = row.get(8)?;
    let venue_amount: String = row.get(9)?;
    let platform_amount: String = row.get(10)?;
    let state: String = row.get(11)?;
    let created_at: String = row.get(12)?;
    let settled_at: Option<String> = row.get(13)?;
    let voided_at: Option<String> = row.get(14)?;
    Ok(LedgerEntry {
        id: parse_uuid(&id)?,
        tenant: TenantId(row.get(1)?),
        contract: ContractId(row.get(2)?),
        agent: row.get::<_, Option<i64>>(3)?.map(AgentId),
        venue: row.get::<_, Option<i64>>(4)?.map(VenueId),
        rule: RuleId(row.get(5)?),
        base: parse_decimal(&base)?,
        total_commission: parse_decimal(&total)?,
        agent_amount: parse_decimal(&agent_amount)?,
        venue_amount: parse_decimal(&venue_amount)?,
        platform_amount: parse_decimal(&platform_amount)?,
        state: parse_enum(&state)?,
        created_at: parse_ts(&created_at)?,
        settled_at: settled_at.as_deref().map(parse_ts).transpose()?,
        voided_at: voided_at.as_deref().map(parse_ts).transpose()?,
        voided_by: row.get::<_, Option<i64>>(15)?.map(ActorId),
        void_reason: row.get(16)?,
    })
}

fn row_to_movement(row: &Row<'_>) -> LedgerResult<Movement> {
    let id: String = row.get(0)?;
    let entry: String = row.get(1)?;
    let recipient: String = row.get(3)?;
    let amount: String = row.get(5)?;
    let settlement: Option<String> = row.get(6)?;
    Ok(Movement {
        id: parse_uuid(&id)?,
        entry: parse_uuid(&entry)?,
        tenant: TenantId(row.get(2)?),
        recipient: parse_enum(&recipient)?,
        recipient_id: row.get(4)?,
        amount: parse_decimal(&amount)?,
        settlement: settlement.as_deref().map(parse_uuid).transpose()?,
    })
}

fn row_to_settlement(row: &Row<'_>) -> LedgerResult<Settlement> {
    let id: String = row.get(0)?;
    let date_from: String = row.get(2)?;
    let date_to: String = row.get(3)?;
    let state: String = row.get(4)?;
    let agent: String = row.get(5)?;
    let venue: String = row.get(6)?;
    let platform: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let closed_at: Option<String> = row.get(9)?;
    Ok(Settlement {
        id: parse_uuid(&id)?,
        tenant: TenantId(row.get(1)?),
        date_from: parse_date(&date_from)?,
        date_to: parse_date(&date_to)?,
        state: parse_enum(&state)?,
        total_agent_amount: parse_decimal(&agent)?,
        total_venue_amount: parse_decimal(&venue)?,
        total_platform_amount: parse_decimal(&platform)?,
        created_at: parse_ts(&created_at)?,
        closed_at: closed_at.as_deref().map(parse_ts).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;
    use liquida_core::Tier;
    use liquida_rules::CommissionSplit;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn sample_entry(contract: i64) -> LedgerEntry {
        let contract = Contract::new(
            ContractId(contract),
            TenantId(1),
            SectionId(1),
            Tier::C1,
            dec!(1000),
        )
        .with_agent(AgentId(7));
        let split = CommissionSplit {
            total: dec!(100.00),
            agent: dec!(30.00),
            venue: Decimal::ZERO,
            platform: dec!(70.00),
            warnings: Vec::new(),
        };
        LedgerEntry::new(&contract, RuleId(1), &split, Utc::now())
    }

    #[test]
    fn sqlite_entry_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SqliteCommissionStore::new(dir.path().join("ledger.db")).unwrap();
        let entry = sample_entry(11);
        store.insert_entry(&entry, &entry.movements()).unwrap();

        let loaded = store.entry(entry.id).unwrap().unwrap();
        assert_eq!(loaded.total_commission, dec!(100.00));
        assert_eq!(loaded.agent, Some(AgentId(7)));
        assert_eq!(loaded.created_at, entry.created_at.trunc_subsecs(6));
        let movements = store.movements_for_entry(entry.id).unwrap();
        assert_eq!(movements.len(), 2);
    }

    #[test]
    fn partial_index_rejects_second_live_entry() {
        let dir = tempdir().unwrap();
        let store = SqliteCommissionStore::new(dir.path().join("ledger.db")).unwrap();
        let first = sample_entry(11);
        store.insert_entry(&first, &first.movements()).unwrap();
        let second = sample_entry(11);
        let err = store.insert_entry(&second, &second.movements()).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEntry { existing, .. } if existing == first.id));
        assert!(store.entry(second.id).unwrap().is_none());

        store
            .void_entry(first.id, ActorId(1), "duplicate sale", Utc::now())
            .unwrap();
        store.insert_entry(&second, &second.movements()).unwrap();
    }

    #[test]
    fn replace_entry_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let store = SqliteCommissionStore::new(dir.path().join("ledger.db")).unwrap();
        let first = sample_entry(11);
        store.insert_entry(&first, &first.movements()).unwrap();
        let other = sample_entry(12);
        store.insert_entry(&other, &other.movements()).unwrap();

        let clash = sample_entry(12);
        let err = store
            .replace_entry(
                first.id,
                ActorId(1),
                "rate change",
                Utc::now(),
                &clash,
                &clash.movements(),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEntry { existing, .. } if existing == other.id));
        let kept = store.entry(first.id).unwrap().unwrap();
        assert_eq!(kept.state, EntryState::Pending);
        let sum: Decimal = store
            .movements_for_entry(first.id)
            .unwrap()
            .iter()
            .map(|m| m.amount)
            .sum();
        assert_eq!(sum, dec!(100.00));

        let fresh = sample_entry(11);
        let voided = store
            .replace_entry(
                first.id,
                ActorId(1),
                "rate change",
                Utc::now(),
                &fresh,
                &fresh.movements(),
            )
            .unwrap();
        assert_eq!(voided.state, EntryState::Void);
        let live = store
            .live_entry_for_contract(TenantId(1), ContractId(11))
            .unwrap()
            .unwrap();
        assert_eq!(live.id, fresh.id);
    }

    #[test]
    fn rules_filter_by_visibility() {
        let dir = tempdir().unwrap();
        let store = SqliteCommissionStore::new(dir.path().join("ledger.db")).unwrap();
        let global = CommissionRule::percent_of_base(SectionId(1), Tier::C1, dec!(0.1));
        let own = global.clone().for_tenant(TenantId(1));
        let foreign = global.clone().for_tenant(TenantId(2));
        for rule in [&global, &own, &foreign] {
            store.insert_rule(rule).unwrap();
        }
        let visible = store
            .rules(&RuleFilter::candidates(TenantId(1), SectionId(1)))
            .unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|rule| rule.tenant != Some(TenantId(2))));
        assert_eq!(visible[0].percentage, Some(dec!(0.1)));
    }
}
