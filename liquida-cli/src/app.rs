use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use liquida_config::LiquidaConfig;
use liquida_core::{
    Actor, ActorId, AgentId, CommissionRule, Contract, ContractId, ContractState, PayoutMode, Role,
    RuleId, SectionId, SubSectionId, TenantId, Tier, VenueId,
};
use liquida_ledger::{
    start_of_day, CommissionLedger, EntryQuery, EntryState, LedgerOptions, RuleFilter,
    SettlementState, SqliteCommissionStore,
};

use crate::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "liquida", author, version, about = "Commission ledger operations")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file (overrides `database.path`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Reject entries whose split raised a reconciliation warning
    #[arg(long, global = true)]
    strict: bool,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(flatten)]
    actor: ActorArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Identity resolved by the calling system.
#[derive(Args, Clone, Debug)]
struct ActorArgs {
    #[arg(long = "actor", global = true, default_value_t = ActorId(0))]
    actor_id: ActorId,
    /// owner, tenant_admin, agent or venue
    #[arg(long = "role", global = true, default_value_t = Role::Owner)]
    actor_role: Role,
    /// Tenant the actor belongs to
    #[arg(long = "actor-tenant", global = true, default_value_t = TenantId(0))]
    actor_tenant: TenantId,
}

impl ActorArgs {
    fn actor(&self) -> Actor {
        Actor::new(self.actor_id, self.actor_role, self.actor_tenant)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage commission rules (owner only)
    #[command(subcommand)]
    Rule(RuleCommand),
    /// Register contracts and drive their lifecycle
    #[command(subcommand)]
    Contract(ContractCommand),
    /// Book, void and inspect ledger entries
    #[command(subcommand)]
    Entry(EntryCommand),
    /// Batch movements into settlements
    #[command(subcommand)]
    Settlement(SettlementCommand),
    /// Commission totals per agent and venue
    Report(ReportArgs),
    /// Re-verify ledger invariants for a tenant
    Audit {
        #[arg(long)]
        tenant: TenantId,
    },
    /// Display names used by reports
    #[command(subcommand)]
    Directory(DirectoryCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the merged configuration as TOML
    Show,
}

#[derive(Subcommand)]
enum RuleCommand {
    Create(RuleArgs),
    Update {
        #[arg(long)]
        id: RuleId,
        #[command(flatten)]
        rule: RuleArgs,
    },
    Enable {
        #[arg(long)]
        id: RuleId,
    },
    Disable {
        #[arg(long)]
        id: RuleId,
    },
    Show {
        #[arg(long)]
        id: RuleId,
    },
    List {
        #[arg(long)]
        section: Option<SectionId>,
        /// Only rules visible to this tenant (its own plus global ones)
        #[arg(long)]
        tenant: Option<TenantId>,
        #[arg(long)]
        active_only: bool,
    },
}

#[derive(Args, Clone, Debug)]
struct RuleArgs {
    /// Owning tenant; omit for a global rule
    #[arg(long)]
    tenant: Option<TenantId>,
    #[arg(long)]
    section: SectionId,
    #[arg(long)]
    sub_section: Option<SubSectionId>,
    #[arg(long)]
    tier: Tier,
    /// percent_of_base or fixed_amount
    #[arg(long)]
    mode: PayoutMode,
    #[arg(long)]
    percentage: Option<Decimal>,
    #[arg(long)]
    fixed_amount: Option<Decimal>,
    #[arg(long)]
    agent_percentage: Option<Decimal>,
    #[arg(long)]
    agent_fixed: Option<Decimal>,
    #[arg(long)]
    venue_percentage: Option<Decimal>,
    #[arg(long)]
    venue_fixed: Option<Decimal>,
    #[arg(long)]
    min_total: Option<Decimal>,
    #[arg(long)]
    max_total: Option<Decimal>,
    #[arg(long)]
    min_agent: Option<Decimal>,
    #[arg(long)]
    max_agent: Option<Decimal>,
    #[arg(long)]
    min_venue_special: Option<Decimal>,
    #[arg(long)]
    max_venue_special: Option<Decimal>,
    #[arg(long)]
    inactive: bool,
}

impl RuleArgs {
    fn into_rule(self) -> CommissionRule {
        let mut rule = match self.mode {
            PayoutMode::PercentOfBase => CommissionRule::percent_of_base(
                self.section,
                self.tier,
                self.percentage.unwrap_or_default(),
            ),
            PayoutMode::FixedAmount => CommissionRule::fixed(
                self.section,
                self.tier,
                self.fixed_amount.unwrap_or_default(),
            ),
        };
        rule.percentage = self.percentage;
        rule.fixed_amount = self.fixed_amount;
        rule.tenant = self.tenant;
        rule.sub_section = self.sub_section;
        rule.active = !self.inactive;
        rule.with_agent_rate(self.agent_percentage, self.agent_fixed)
            .with_venue_rate(self.venue_percentage, self.venue_fixed)
            .with_total_clamp(self.min_total, self.max_total)
            .with_agent_clamp(self.min_agent, self.max_agent)
            .with_venue_special_clamp(self.min_venue_special, self.max_venue_special)
    }
}

#[derive(Subcommand)]
enum ContractCommand {
    Register {
        #[arg(long)]
        id: ContractId,
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        section: SectionId,
        #[arg(long)]
        sub_section: Option<SubSectionId>,
        #[arg(long)]
        tier: Tier,
        #[arg(long)]
        base: Decimal,
        #[arg(long)]
        agent: Option<AgentId>,
        #[arg(long)]
        venue: Option<VenueId>,
        /// Apply the special-venue clamps
        #[arg(long)]
        venue_special: bool,
    },
    Transition {
        #[arg(long)]
        id: ContractId,
        /// pending, confirmed or cancelled
        #[arg(long)]
        to: ContractState,
    },
    /// Confirm a pending contract and book its entry
    Confirm {
        #[arg(long)]
        id: ContractId,
    },
    Show {
        #[arg(long)]
        id: ContractId,
    },
}

#[derive(Subcommand)]
enum EntryCommand {
    /// Book the entry of an already confirmed contract
    Create {
        #[arg(long)]
        contract: ContractId,
    },
    Void {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Void the live entry and book a fresh one
    Reissue {
        #[arg(long)]
        contract: ContractId,
        #[arg(long)]
        reason: String,
    },
    Show {
        #[arg(long)]
        id: Uuid,
    },
    ForContract {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        contract: ContractId,
    },
    List {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        state: Option<EntryState>,
        #[arg(long)]
        agent: Option<AgentId>,
        #[arg(long)]
        venue: Option<VenueId>,
        /// First creation date included (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last creation date included (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        desc: bool,
    },
    Movements {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum SettlementCommand {
    Open {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Attach unassigned movements inside the window
    Add {
        #[arg(long)]
        id: Uuid,
    },
    Close {
        #[arg(long)]
        id: Uuid,
    },
    Show {
        #[arg(long)]
        id: Uuid,
    },
    List {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        state: Option<SettlementState>,
    },
    Movements {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long)]
    tenant: TenantId,
    #[arg(long)]
    from: NaiveDate,
    #[arg(long)]
    to: NaiveDate,
}

#[derive(Subcommand)]
enum DirectoryCommand {
    Agent {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        id: AgentId,
        #[arg(long)]
        name: String,
    },
    Venue {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        id: VenueId,
        #[arg(long)]
        name: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = LiquidaConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if cli.strict {
        config.ledger.strict_reconciliation = true;
    }
    let _guard = init_tracing(&config.logging, cli.verbose)?;

    if let Commands::Config(ConfigCommand::Show) = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let ledger = open_ledger(&config)?;
    let actor = cli.actor.actor();
    debug!(actor = %actor.id, role = %actor.role, tenant = %actor.tenant, "resolved actor");
    execute(&ledger, &actor, cli.command)
}

fn open_ledger(config: &LiquidaConfig) -> Result<CommissionLedger> {
    let store = SqliteCommissionStore::with_busy_timeout(
        config.database.path.clone(),
        config.database.busy_timeout(),
    )
    .with_context(|| {
        format!(
            "failed to open ledger database {}",
            config.database.path.display()
        )
    })?;
    info!(path = %config.database.path.display(), "ledger database ready");
    Ok(CommissionLedger::new(Arc::new(store)).with_options(LedgerOptions {
        strict_reconciliation: config.ledger.strict_reconciliation,
        allow_fallback_rule: config.ledger.allow_fallback_rule,
        rounding_scale: config.ledger.rounding_scale,
    }))
}

fn execute(ledger: &CommissionLedger, actor: &Actor, command: Commands) -> Result<()> {
    match command {
        Commands::Config(ConfigCommand::Show) => Ok(()),
        Commands::Rule(command) => rule(ledger, actor, command),
        Commands::Contract(command) => contract(ledger, actor, command),
        Commands::Entry(command) => entry(ledger, actor, command),
        Commands::Settlement(command) => settlement(ledger, actor, command),
        Commands::Report(args) => emit(&ledger.summarize(actor, args.tenant, args.from, args.to)?),
        Commands::Audit { tenant } => {
            let report = ledger.audit_entries(actor, tenant)?;
            emit(&report)?;
            if !report.is_clean() {
                bail!(
                    "audit found {} violation(s) for tenant {tenant}",
                    report.violations.len()
                );
            }
            Ok(())
        }
        Commands::Directory(DirectoryCommand::Agent { tenant, id, name }) => {
            ledger.upsert_agent(actor, tenant, id, &name)?;
            emit(&serde_json::json!({ "tenant": tenant, "agent": id, "name": name.trim() }))
        }
        Commands::Directory(DirectoryCommand::Venue { tenant, id, name }) => {
            ledger.upsert_venue(actor, tenant, id, &name)?;
            emit(&serde_json::json!({ "tenant": tenant, "venue": id, "name": name.trim() }))
        }
    }
}

fn rule(ledger: &CommissionLedger, actor: &Actor, command: RuleCommand) -> Result<()> {
    match command {
        RuleCommand::Create(args) => emit(&ledger.create_rule(actor, args.into_rule())?),
        RuleCommand::Update { id, rule } => emit(&ledger.update_rule(actor, id, rule.into_rule())?),
        RuleCommand::Enable { id } => emit(&ledger.set_rule_active(actor, id, true)?),
        RuleCommand::Disable { id } => emit(&ledger.set_rule_active(actor, id, false)?),
        RuleCommand::Show { id } => emit(&ledger.get_rule(actor, id)?),
        RuleCommand::List {
            section,
            tenant,
            active_only,
        } => {
            let filter = RuleFilter {
                section,
                visible_to: tenant,
                active_only,
            };
            emit(&ledger.list_rules(actor, &filter)?)
        }
    }
}

fn contract(ledger: &CommissionLedger, actor: &Actor, command: ContractCommand) -> Result<()> {
    match command {
        ContractCommand::Register {
            id,
            tenant,
            section,
            sub_section,
            tier,
            base,
            agent,
            venue,
            venue_special,
        } => {
            let mut draft = Contract::new(id, tenant, section, tier, base);
            draft.sub_section = sub_section;
            draft.agent = agent;
            draft.venue = venue;
            draft.venue_special = venue_special;
            emit(&ledger.register_contract(actor, draft)?)
        }
        ContractCommand::Transition { id, to } => {
            emit(&ledger.transition_contract(actor, id, to)?)
        }
        ContractCommand::Confirm { id } => emit(&ledger.confirm_contract(actor, id)?),
        ContractCommand::Show { id } => emit(&ledger.get_contract(actor, id)?),
    }
}

fn entry(ledger: &CommissionLedger, actor: &Actor, command: EntryCommand) -> Result<()> {
    match command {
        EntryCommand::Create { contract } => emit(&ledger.create_entry(actor, contract)?),
        EntryCommand::Void { id, reason } => emit(&ledger.void_entry(actor, id, &reason)?),
        EntryCommand::Reissue { contract, reason } => {
            emit(&ledger.reissue_entry(actor, contract, &reason)?)
        }
        EntryCommand::Show { id } => emit(&ledger.get_entry(actor, id)?),
        EntryCommand::ForContract { tenant, contract } => {
            emit(&ledger.get_entry_for_contract(actor, tenant, contract)?)
        }
        EntryCommand::List {
            tenant,
            state,
            agent,
            venue,
            from,
            to,
            limit,
            desc,
        } => {
            let mut query = EntryQuery::for_tenant(tenant).with_time_range(
                from.map(start_of_day),
                to.and_then(|day| day.succ_opt()).map(start_of_day),
            );
            query.state = state;
            query.agent = agent;
            query.venue = venue;
            query.limit = limit;
            if desc {
                query = query.descending();
            }
            emit(&ledger.list_entries(actor, &query)?)
        }
        EntryCommand::Movements { id } => emit(&ledger.movements_for_entry(actor, id)?),
    }
}

fn settlement(ledger: &CommissionLedger, actor: &Actor, command: SettlementCommand) -> Result<()> {
    match command {
        SettlementCommand::Open { tenant, from, to } => {
            emit(&ledger.open_settlement(actor, tenant, from, to)?)
        }
        SettlementCommand::Add { id } => {
            let outcome = ledger.add_pending_movements(actor, id)?;
            emit(&serde_json::json!({
                "added": outcome.added,
                "settlement": outcome.settlement,
            }))
        }
        SettlementCommand::Close { id } => {
            let outcome = ledger.close_settlement(actor, id)?;
            emit(&serde_json::json!({
                "settlement": outcome.settlement,
                "settledEntries": outcome.settled_entries,
            }))
        }
        SettlementCommand::Show { id } => emit(&ledger.get_settlement(actor, id)?),
        SettlementCommand::List { tenant, state } => {
            emit(&ledger.list_settlements(actor, tenant, state)?)
        }
        SettlementCommand::Movements { id } => emit(&ledger.settlement_movements(actor, id)?),
    }
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
