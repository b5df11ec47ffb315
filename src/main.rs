use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::{collections::HashSet, path::PathBuf, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voucher_portal::{
    config::{self, AppConfig},
    core::{
        allocator::Allocator,
        ledger, rolls,
        session::CheckoutService,
        stats,
        upload::UploadFormat,
    },
    errors::Result,
    gateway::DpoClient,
};

/// Admin tool for the voucher portal.
#[derive(Debug, Parser)]
#[command(name = "voucher-portal", version, about)]
struct Cli {
    /// Path to config.toml
    #[arg(long, env = "VOUCHER_PORTAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create database tables
    Init,
    /// Upload a voucher roll file
    Upload {
        /// Roll name
        #[arg(long)]
        name: String,
        /// Optional notes
        #[arg(long)]
        description: Option<String>,
        /// Roll file (first seven lines are skipped)
        file: PathBuf,
    },
    /// List voucher rolls with inventory
    Rolls {
        /// Only rolls whose name contains this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Delete a voucher roll (issued vouchers are kept)
    RemoveRoll {
        /// Roll id
        id: i64,
    },
    /// Write a roll's codes to a text file, one per line
    ExportRoll {
        /// Roll id
        id: i64,
        /// Directory to write the file into
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// List issued vouchers
    Vouchers {
        /// Filter by code, name, email, or phone
        #[arg(long)]
        search: Option<String>,
    },
    /// Show sales statistics
    Sales,
    /// List paid sessions waiting for a voucher
    Pending,
    /// Verify an awaiting payment session with the gateway
    Verify {
        /// Merchant reference
        company_ref: String,
    },
    /// Retry voucher issue for a paid session
    Reconcile {
        /// Merchant reference
        company_ref: String,
    },
    /// Delete unpaid sessions older than the configured lifetime
    Purge,
}

fn checkout_service(
    db: sea_orm::DatabaseConnection,
    app_config: &AppConfig,
) -> Result<CheckoutService> {
    let token = config::settings::company_token_from_env()?;
    let gateway = DpoClient::new(app_config.gateway.clone(), token)?;
    Ok(CheckoutService::new(
        Arc::new(Allocator::new(db)),
        Arc::new(gateway),
        app_config,
    ))
}

async fn run(cli: Cli) -> Result<()> {
    let app_config = match &cli.config {
        Some(path) => config::settings::load_config(path)?,
        None => config::settings::load_default_config()?,
    };

    let db = config::database::create_connection().await?;
    config::database::create_tables(&db).await?;

    match cli.command {
        Command::Init => info!("Database ready at {}", config::database::get_database_url()),
        Command::Upload {
            name,
            description,
            file,
        } => {
            let roll =
                rolls::import_roll_file(&db, &file, name, description, UploadFormat::default())
                    .await?;
            println!(
                "Uploaded roll #{} '{}' with {} codes",
                roll.roll.id,
                roll.roll.name,
                roll.codes.len()
            );
        }
        Command::Rolls { search } => {
            let mut summaries = rolls::roll_summaries(&db).await?;
            if let Some(term) = search {
                let matching: HashSet<i64> = rolls::search_rolls(&db, &term)
                    .await?
                    .into_iter()
                    .map(|roll| roll.id)
                    .collect();
                summaries.retain(|summary| matching.contains(&summary.roll.id));
            }
            for summary in &summaries {
                println!(
                    "#{:<4} {:<32} {:>6} codes  {:>6} issued  {:>6} available  {} ({})",
                    summary.roll.id,
                    summary.roll.name,
                    summary.total_codes,
                    summary.issued_codes,
                    summary.available_codes,
                    summary.roll.file_name,
                    summary.roll.upload_date.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Command::RemoveRoll { id } => {
            rolls::remove_roll(&db, id).await?;
            println!("Roll #{id} removed");
        }
        Command::ExportRoll { id, dir } => {
            let path = rolls::export_roll(&db, id, &dir).await?;
            println!("Roll #{id} written to {}", path.display());
        }
        Command::Vouchers { search } => {
            let entries = match search {
                Some(term) => ledger::search_entries(&db, &term).await?,
                None => ledger::list_entries(&db).await?,
            };
            for entry in entries {
                println!(
                    "{:<20} {:<16} {:>7} {:<24} {:<28} {} {}",
                    entry.code,
                    entry.plan,
                    entry.price,
                    entry.user_name,
                    entry.user_email,
                    entry.user_phone,
                    entry.purchase_date.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Command::Sales => {
            let stats = stats::sales_stats(&db).await?;
            println!("Revenue:          {}", stats.total_revenue);
            println!("Vouchers sold:    {}", stats.total_vouchers);
            println!("Active / expired: {} / {}", stats.active_vouchers, stats.expired_vouchers);
            println!("Codes uploaded:   {}", stats.uploaded_codes);
            println!("Codes available:  {}", stats.available_codes);
            for plan in stats.by_plan {
                println!("  {:<20} {:>5} sold  {:>10}", plan.plan, plan.sales, plan.revenue);
            }
        }
        Command::Pending => {
            for session in checkout_service(db, &app_config)?.unreconciled().await? {
                println!(
                    "{} {} {} {} {} ({})",
                    session.company_ref,
                    session.plan,
                    session.price,
                    session.user_name,
                    session.user_phone,
                    session.failure_reason.unwrap_or_default(),
                );
            }
        }
        Command::Verify { company_ref } => {
            let voucher = checkout_service(db, &app_config)?.verify(&company_ref).await?;
            println!("Issued {} to {}", voucher.code, voucher.user_name);
        }
        Command::Reconcile { company_ref } => {
            let voucher = checkout_service(db, &app_config)?
                .reconcile(&company_ref)
                .await?;
            println!("Issued {} to {}", voucher.code, voucher.user_name);
        }
        Command::Purge => {
            let purged = checkout_service(db, &app_config)?
                .purge_stale(app_config.pending_ttl())
                .await?;
            println!("Purged {purged} stale sessions");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; variables can also be set externally
    dotenv().ok();

    let cli = Cli::parse();
    run(cli).await.inspect_err(|e| error!("{}", e))
}
