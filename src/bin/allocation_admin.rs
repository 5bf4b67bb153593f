use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use rental_allocation::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::lot,
    events::{self, Event, EventSender},
    metrics,
    services::{
        audit,
        factory::ServiceFactory,
        lots::{Availability, RegisterLotInput},
    },
};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "allocation-admin", about = "Operator tooling for the rental allocation engine")]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Print the engine's Prometheus counters after the command"
    )]
    metrics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Check lot and allocation ledgers for conservation violations
    Audit,
    #[command(subcommand)]
    Lots(LotCommands),
    #[command(subcommand)]
    Contracts(ContractCommands),
    #[command(subcommand)]
    Amendments(AmendmentCommands),
}

#[derive(Subcommand)]
enum LotCommands {
    /// List lots of an asset type in allocation order
    List(AssetScope),
    /// Show availability totals of an asset type
    Availability(AssetScope),
    /// Register a new lot
    Register(RegisterLotArgs),
    /// Flag a lot as unavailable, or clear the flag with --clear
    Unavailable {
        lot_id: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        clear: bool,
    },
    /// Change a lot's total quantity
    Resize { lot_id: i64, total: i32 },
    /// Delete a lot without allocations
    Delete { lot_id: i64 },
}

#[derive(Args)]
struct AssetScope {
    #[arg(long)]
    tenant: Uuid,
    #[arg(long)]
    asset_type: Uuid,
}

#[derive(Args)]
struct RegisterLotArgs {
    #[arg(long)]
    tenant: Uuid,
    #[arg(long)]
    asset_type: Uuid,
    #[arg(long)]
    code: String,
    #[arg(long)]
    quantity: i32,
    /// Acquisition date (YYYY-MM-DD)
    #[arg(long)]
    acquired_on: NaiveDate,
}

#[derive(Subcommand)]
enum ContractCommands {
    Activate {
        contract_id: Uuid,
        #[arg(long, action = ArgAction::SetTrue)]
        upfront_payment: bool,
    },
    ConfirmPayment { contract_id: Uuid },
    Cancel { contract_id: Uuid },
    Finalize { contract_id: Uuid },
}

#[derive(Subcommand)]
enum AmendmentCommands {
    Apply { amendment_id: Uuid },
    Cancel { amendment_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Audit => handle_audit(&context, cli.json).await?,
        Commands::Lots(command) => handle_lots_command(&context, command, cli.json).await?,
        Commands::Contracts(command) => handle_contracts_command(&context, command, cli.json).await?,
        Commands::Amendments(command) => {
            handle_amendments_command(&context, command, cli.json).await?
        }
    }

    if cli.metrics {
        print!("{}", metrics::gather_text().context("failed to encode metrics")?);
    }

    Ok(())
}

async fn handle_audit(context: &CliContext, json: bool) -> Result<()> {
    let violations = audit::verify_conservation(&*context.db)
        .await
        .context("audit failed")?;

    if json {
        print_json(&violations)?;
    } else if violations.is_empty() {
        println!("Ledger consistent");
    } else {
        for violation in &violations {
            println!("- {}", violation);
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} conservation violation(s) found", violations.len()))
    }
}

async fn handle_lots_command(context: &CliContext, command: LotCommands, json: bool) -> Result<()> {
    let service = context.factory.lot_service();
    match command {
        LotCommands::List(scope) => {
            let lots = service.list_lots(scope.tenant, scope.asset_type).await?;
            if json {
                print_json(&lots)?;
            } else {
                lots.iter().for_each(render_lot);
            }
        }
        LotCommands::Availability(scope) => {
            let summary = service.availability(scope.tenant, scope.asset_type).await?;
            if json {
                print_json(&summary)?;
            } else {
                render_availability(&summary);
            }
        }
        LotCommands::Register(args) => {
            let lot = service
                .register_lot(RegisterLotInput {
                    tenant_id: args.tenant,
                    asset_type_id: args.asset_type,
                    code: args.code,
                    quantity: args.quantity,
                    acquired_on: args.acquired_on,
                })
                .await?;
            print_lot(&lot, json)?;
        }
        LotCommands::Unavailable { lot_id, clear } => {
            let lot = service.set_unavailable(lot_id, !clear).await?;
            print_lot(&lot, json)?;
        }
        LotCommands::Resize { lot_id, total } => {
            let lot = service.update_total_quantity(lot_id, total).await?;
            print_lot(&lot, json)?;
        }
        LotCommands::Delete { lot_id } => {
            service.delete_lot(lot_id).await?;
            println!("Deleted lot {}", lot_id);
        }
    }
    Ok(())
}

async fn handle_contracts_command(
    context: &CliContext,
    command: ContractCommands,
    json: bool,
) -> Result<()> {
    let service = context.factory.contract_service();
    let contract = match command {
        ContractCommands::Activate {
            contract_id,
            upfront_payment,
        } => service.activate(contract_id, upfront_payment).await?,
        ContractCommands::ConfirmPayment { contract_id } => {
            service.confirm_payment(contract_id).await?
        }
        ContractCommands::Cancel { contract_id } => service.cancel(contract_id).await?,
        ContractCommands::Finalize { contract_id } => service.finalize(contract_id).await?,
    };

    if json {
        print_json(&contract)?;
    } else {
        println!(
            "- Contract {} • status {} • {} to {} • total {}",
            contract.code, contract.status, contract.start_date, contract.end_date, contract.total_value
        );
    }
    Ok(())
}

async fn handle_amendments_command(
    context: &CliContext,
    command: AmendmentCommands,
    json: bool,
) -> Result<()> {
    let service = context.factory.amendment_service();
    let amendment = match command {
        AmendmentCommands::Apply { amendment_id } => service.apply(amendment_id).await?,
        AmendmentCommands::Cancel { amendment_id } => service.cancel(amendment_id).await?,
    };

    if json {
        print_json(&amendment)?;
    } else {
        println!(
            "- Amendment {} • {} • status {} • monthly delta {}",
            amendment.id, amendment.kind, amendment.status, amendment.monthly_delta
        );
    }
    Ok(())
}

struct CliContext {
    db: Arc<DbPool>,
    factory: ServiceFactory,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config: AppConfig = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate || config.is_development() {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations on startup")?;
        }
        let db = Arc::new(db_pool);

        let (event_tx, event_rx) = mpsc::channel::<Event>(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx, Vec::new()));

        let factory = ServiceFactory::from_config(db.clone(), EventSender::new(event_tx), &config);
        Ok(Self { db, factory })
    }
}

fn print_lot(lot: &lot::Model, json: bool) -> Result<()> {
    if json {
        print_json(lot)
    } else {
        render_lot(lot);
        Ok(())
    }
}

fn render_lot(lot: &lot::Model) {
    println!(
        "- Lot {} ({}) • acquired {} • {}/{} available • {}",
        lot.code, lot.id, lot.acquired_on, lot.available_quantity, lot.total_quantity, lot.status
    );
}

fn render_availability(summary: &Availability) {
    println!(
        "Asset type {}: {} lot(s), {} total, {} available ({} eligible), {} allocated",
        summary.asset_type_id,
        summary.lots,
        summary.total,
        summary.available,
        summary.eligible,
        summary.allocated
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
