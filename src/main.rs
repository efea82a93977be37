//! ite-secrets: 로컬 시크릿 저장소 관리 CLI
//!
//! 상태 확인, 마이그레이션 실행, 슬롯 삭제만 지원하며 시크릿 값은 출력하지 않습니다.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ite_secrets::db::MigrationState;
use ite_secrets::{
    KeyBackendPreference, MigrationReport, SecretCategory, SecretStore, SecurityPosture,
    SlotState, StoreConfig,
};

#[derive(Parser)]
#[command(name = "ite-secrets", version, about = "ITE local secret store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Print machine-readable JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Data directory (overrides ITE_SECRETS_DATA_DIR / .env).
    #[arg(long, global = true, env = "ITE_SECRETS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Key backend: auto, platform, software, memory, none.
    #[arg(long, global = true, env = "ITE_SECRETS_KEY_BACKEND")]
    key_backend: Option<KeyBackendPreference>,

    /// OS keychain service name.
    #[arg(long, global = true, env = "ITE_SECRETS_KEYRING_SERVICE")]
    keyring_service: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show key backend, slot states and migration version.
    Status,
    /// Run the legacy plaintext migration up to a version.
    Migrate {
        #[arg(long, default_value_t = 1)]
        target_version: u32,
    },
    /// Clear one category (or `all`).
    Clear { category: String },
    /// Clear every slot and permanently delete the keys.
    Wipe {
        /// Confirm the irreversible wipe.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    data_dir: PathBuf,
    posture: SecurityPosture,
    slots: Vec<(SecretCategory, SlotState)>,
    migration: MigrationState,
}

fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = StoreConfig::from_env().context("invalid secret store configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(backend) = cli.key_backend {
        config.key_backend = backend;
    }
    if let Some(service) = &cli.keyring_service {
        config.keyring_service = service.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status(store: &SecretStore, config: &StoreConfig, json: bool) -> anyhow::Result<()> {
    let mut slots = Vec::with_capacity(SecretCategory::ALL.len());
    for category in SecretCategory::ALL {
        slots.push((category, store.slot_state(category)?));
    }
    let report = StatusReport {
        data_dir: config.data_dir.clone(),
        posture: store.posture()?,
        slots,
        migration: store.migration_state()?,
    };

    if json {
        return print_json(&report);
    }

    println!("data dir:      {}", report.data_dir.display());
    println!("key backend:   {:?}", report.posture.backend);
    println!("migration:     v{}", report.migration.completed_version);
    for (category, state) in &report.slots {
        println!("  {:<18} {:?}", category.name(), state);
    }
    if report.posture.is_degraded() {
        println!("warning: secrets are stored without encryption on this device");
    }
    Ok(())
}

fn print_migration(report: &MigrationReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    println!(
        "{:?}: v{} -> v{} (migrated {}, failed {})",
        report.status,
        report.previous_version,
        report.target_version,
        report.migrated,
        report.failed
    );
    for entry in &report.categories {
        println!("  {:<18} {:?}", entry.category.name(), entry.outcome);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = load_config(&cli)?;
    let store = SecretStore::open(&config)
        .with_context(|| format!("failed to open secret store in {}", config.data_dir.display()))?;

    match &cli.command {
        Commands::Status => status(&store, &config, cli.json)?,
        Commands::Migrate { target_version } => {
            match store.run_migration_once(*target_version) {
                Ok(report) => print_migration(&report, cli.json)?,
                Err(failure) => {
                    if let Some(report) = &failure.report {
                        print_migration(report, cli.json)?;
                    }
                    return Err(failure.into());
                }
            }
        }
        Commands::Clear { category } => {
            if category.eq_ignore_ascii_case("all") {
                store.clear_all()?;
            } else {
                let category: SecretCategory = category.parse()?;
                store.clear(category)?;
            }
            println!("cleared {}", category);
        }
        Commands::Wipe { yes } => {
            if !yes {
                bail!("wipe deletes every secret and both keys permanently; pass --yes to confirm");
            }
            store.wipe()?;
            println!("secret store wiped");
        }
    }

    Ok(())
}
