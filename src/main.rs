//! Command-line entry point: synchronize one zone's registry-published key
//! material with a desired key set read from a file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ratatoskr::config::{EppConfig, RestConfig};
use ratatoskr::epp::EppBackend;
use ratatoskr::error::RegistryError;
use ratatoskr::keyset::{KeyRecord, KeySet, ZoneName};
use ratatoskr::rest::RestBackend;
use ratatoskr::{RegistryBackend, SyncOutcome, Synchronizer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Stateful XML-over-TLS registry protocol
    Epp,
    /// Stateless JSON reseller API
    Rest,
}

#[derive(Parser, Debug)]
#[command(name = "ratatoskr", about = "Synchronize DNSSEC key material with a parent registry")]
struct Args {
    /// Zone to synchronize (with or without trailing dot)
    #[arg(long)]
    zone: String,

    /// File with the desired DNSKEYs, one "flags protocol algorithm base64"
    /// line per key; blank lines and '#' comments are skipped
    #[arg(long)]
    keys: PathBuf,

    /// Which registry backend to use; credentials come from RATATOSKR_*
    /// environment variables
    #[arg(long, value_enum)]
    backend: Backend,
}

fn read_key_file(path: &PathBuf) -> Result<KeySet, RegistryError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RegistryError::InvalidInput(format!("Cannot read {}: {e}", path.display())))?;

    let mut keys = KeySet::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let parsed = (|| {
            let flags = fields.next()?.parse().ok()?;
            let protocol = fields.next()?.parse().ok()?;
            let algorithm = fields.next()?.parse().ok()?;
            let key_b64: String = fields.collect();
            KeyRecord::from_presentation(flags, protocol, algorithm, &key_b64).ok()
        })();
        match parsed {
            Some(key) => {
                keys.insert(key);
            }
            None => {
                return Err(RegistryError::InvalidInput(format!(
                    "{}:{}: expected \"flags protocol algorithm base64\"",
                    path.display(),
                    lineno + 1
                )));
            }
        }
    }
    Ok(keys)
}

async fn run_sync<B: RegistryBackend + Send>(
    backend: B,
    zone: &ZoneName,
    desired: &KeySet,
) -> Result<SyncOutcome, RegistryError> {
    Synchronizer::new(backend).synchronize(zone, desired).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let result = async {
        let zone = ZoneName::parse(&args.zone)?;
        let desired = read_key_file(&args.keys)?;
        info!(
            "Synchronizing {zone} with {} desired key(s), {} SEP",
            desired.len(),
            desired.sep_only().len()
        );

        match args.backend {
            Backend::Epp => {
                let backend = EppBackend::new(EppConfig::from_env()?);
                run_sync(backend, &zone, &desired).await
            }
            Backend::Rest => {
                let backend = RestBackend::new(RestConfig::from_env()?)?;
                run_sync(backend, &zone, &desired).await
            }
        }
    }
    .await;

    match result {
        Ok(SyncOutcome::AlreadyInSync) => {
            info!("Registry already in sync, no changes sent");
            ExitCode::SUCCESS
        }
        Ok(SyncOutcome::Updated { removed, added }) => {
            info!("Registry updated: {removed} removal(s), {added} addition(s)");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Synchronization failed: {e}");
            ExitCode::FAILURE
        }
    }
}
