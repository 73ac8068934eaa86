//! crypter: encrypt files in place, one random key per file
//!
//! Commands:
//!   encrypt <file>          - encrypt a file and record its key
//!   decrypt <file>          - decrypt a file, recovering damaged ciphertext if possible
//!   encrypt-dir <dir>       - encrypt every regular file in a directory (not recursive)
//!   decrypt-dir <dir>       - decrypt every regular file in a directory (not recursive)
//!   keys list|show|forget   - inspect or prune the key store
//!   config show             - display current configuration
//!
//! The key store is sealed under an application master key that ships with
//! the binary unless CRYPTER_MASTER_KEY is set. Anyone with the binary can
//! open a store sealed under the built-in key.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crypter_core::config::{expand_tilde, CrypterConfig};
use crypter_crypto::MasterKey;
use crypter_engine::{identifier_for, BatchReport, Crypter, ProgressFn, RecoveryMatcher};
use crypter_store::{EncryptedStoreFile, KeyStore, KeyStoreBackend};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "crypter",
    version,
    about = "Per-file encryption with a local key store",
    long_about = "crypter: encrypt and decrypt files in place, keeping one random key per file \
                  in an encrypted key store"
)]
struct Cli {
    /// Path to crypter configuration file
    #[arg(
        long,
        short = 'c',
        env = "CRYPTER_CONFIG",
        default_value = "~/.config/crypter/config.toml"
    )]
    config: PathBuf,

    /// Key store file (overrides config store.path)
    #[arg(long, env = "CRYPTER_STORE")]
    store: Option<PathBuf>,

    /// Similarity ratio needed to recover a damaged file (overrides config)
    #[arg(long)]
    threshold: Option<f64>,

    /// Log level (overrides config; RUST_LOG takes precedence over both)
    #[arg(long, env = "CRYPTER_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, env = "CRYPTER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file in place
    Encrypt {
        file: PathBuf,
    },

    /// Decrypt a file in place
    ///
    /// If the file no longer matches the ciphertext recorded at encryption
    /// time but is similar enough, the recorded ciphertext is decrypted instead.
    Decrypt {
        file: PathBuf,
    },

    /// Encrypt every regular file directly inside a directory
    #[command(name = "encrypt-dir")]
    EncryptDir {
        dir: PathBuf,
    },

    /// Decrypt every regular file directly inside a directory
    #[command(name = "decrypt-dir")]
    DecryptDir {
        dir: PathBuf,
    },

    /// Key store management
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// List every recorded file with its key fingerprint
    List,

    /// Show the record for one file
    Show {
        file: PathBuf,
    },

    /// Remove the record for one file (its key is lost for good)
    Forget {
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file + flags)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path, &cli)?;

    init_logging(&config.log.level, &config.log.format);
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        store = %config.store_path().display(),
        "crypter starting"
    );

    if let Commands::Config { action: ConfigAction::Show } = cli.command {
        return cmd_config_show(&config, &config_path);
    }

    let backend = EncryptedStoreFile::new(config.store_path(), load_master_key()?);
    let mut store = open_store(&backend);
    let matcher = RecoveryMatcher::new(config.recovery.threshold)?;

    match cli.command {
        Commands::Encrypt { file } => {
            let mut crypter = Crypter::new(&mut store, &backend).with_matcher(matcher);
            cmd_encrypt(&mut crypter, &file)
        }
        Commands::Decrypt { file } => {
            let crypter = Crypter::new(&mut store, &backend).with_matcher(matcher);
            cmd_decrypt(&crypter, &file)
        }
        Commands::EncryptDir { dir } => {
            let mut crypter = Crypter::new(&mut store, &backend).with_matcher(matcher);
            cmd_encrypt_dir(&mut crypter, &dir)
        }
        Commands::DecryptDir { dir } => {
            let crypter = Crypter::new(&mut store, &backend).with_matcher(matcher);
            cmd_decrypt_dir(&crypter, &dir)
        }
        Commands::Keys { action: KeysAction::List } => cmd_keys_list(&store, &backend),
        Commands::Keys { action: KeysAction::Show { file } } => cmd_keys_show(&store, &file),
        Commands::Keys { action: KeysAction::Forget { file } } => {
            cmd_keys_forget(&mut store, &backend, &file)
        }
        Commands::Config { .. } => Ok(()),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Config file, then command-line overrides, then validation.
fn load_config(path: &Path, cli: &Cli) -> Result<CrypterConfig> {
    let mut config = CrypterConfig::load(path)
        .with_context(|| format!("loading config: {}", path.display()))?;

    if let Some(store) = &cli.store {
        config.store.path = store.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.recovery.threshold = threshold;
    }
    if let Some(level) = &cli.log {
        config.log.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log.format = match format {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
        .to_string();
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Key store ─────────────────────────────────────────────────────────────────

/// Operator-supplied master key (CRYPTER_MASTER_KEY, base64url) or the built-in one.
fn load_master_key() -> Result<MasterKey> {
    master_key_from(std::env::var("CRYPTER_MASTER_KEY"))
}

/// Only an unset variable selects the built-in key; a set but unusable value
/// is an error.
fn master_key_from(var: Result<String, std::env::VarError>) -> Result<MasterKey> {
    match var {
        Ok(encoded) => MasterKey::from_base64(encoded.trim())
            .context("CRYPTER_MASTER_KEY must be 32 bytes of base64url"),
        Err(std::env::VarError::NotPresent) => Ok(MasterKey::embedded()),
        Err(std::env::VarError::NotUnicode(_)) => {
            anyhow::bail!("CRYPTER_MASTER_KEY is set but is not valid UTF-8")
        }
    }
}

/// Open the key store, degrading to an empty one with a visible warning.
fn open_store(backend: &EncryptedStoreFile) -> KeyStore {
    let (store, warning) = backend.open();
    if let Some(e) = warning {
        eprintln!("warning: {e}");
        eprintln!(
            "warning: continuing with an empty key store; the next change overwrites {}",
            backend.path().display()
        );
    }
    store
}

/// Record identifier for a file argument.
///
/// Prefers the canonical path; falls back to the argument as typed so records
/// for deleted files can still be addressed.
fn resolve_identifier(store: &KeyStore, file: &Path) -> Result<String> {
    let canonical = identifier_for(file)?;
    if store.get(&canonical).is_some() {
        return Ok(canonical);
    }
    if let Some(raw) = file.to_str() {
        if store.get(raw).is_some() {
            return Ok(raw.to_string());
        }
    }
    Ok(canonical)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `crypter encrypt` / `crypter decrypt` ─────────────────────────────────────

fn cmd_encrypt<B: KeyStoreBackend>(crypter: &mut Crypter<'_, B>, file: &Path) -> Result<()> {
    let completed = crypter
        .encrypt_path(file)
        .with_context(|| format!("encrypting {}", file.display()))?;
    println!("{}: {completed}", file.display());
    Ok(())
}

fn cmd_decrypt<B: KeyStoreBackend>(crypter: &Crypter<'_, B>, file: &Path) -> Result<()> {
    let completed = crypter
        .decrypt_path(file)
        .with_context(|| format!("decrypting {}", file.display()))?;
    println!("{}: {completed}", file.display());
    Ok(())
}

// ── `crypter encrypt-dir` / `crypter decrypt-dir` ─────────────────────────────

fn cmd_encrypt_dir<B: KeyStoreBackend>(crypter: &mut Crypter<'_, B>, dir: &Path) -> Result<()> {
    let pb = make_progress_bar("encrypt")?;
    let progress = progress_callback(&pb);
    let report = crypter
        .encrypt_directory(dir, Some(&progress))
        .with_context(|| format!("listing {}", dir.display()))?;
    pb.finish_and_clear();
    print_report("Encrypt", dir, &report)
}

fn cmd_decrypt_dir<B: KeyStoreBackend>(crypter: &Crypter<'_, B>, dir: &Path) -> Result<()> {
    let pb = make_progress_bar("decrypt")?;
    let progress = progress_callback(&pb);
    let report = crypter
        .decrypt_directory(dir, Some(&progress))
        .with_context(|| format!("listing {}", dir.display()))?;
    pb.finish_and_clear();
    print_report("Decrypt", dir, &report)
}

/// Summarize a batch; any failed file makes the command fail.
fn print_report(verb: &str, dir: &Path, report: &BatchReport) -> Result<()> {
    println!("{verb} complete: {}", dir.display());
    println!("  succeeded: {} files", report.succeeded());
    if report.recovered() > 0 {
        println!("  recovered: {} files (from stored ciphertext)", report.recovered());
    }
    println!("  failed:    {} files", report.failed());

    for outcome in report.failures() {
        if let Err(e) = &outcome.result {
            println!("  ✗ {}: {e}", outcome.path.display());
        }
    }

    if !report.is_success() {
        anyhow::bail!(
            "{} of {} files failed",
            report.failed(),
            report.outcomes.len()
        );
    }
    Ok(())
}

// ── `crypter keys` ────────────────────────────────────────────────────────────

fn cmd_keys_list(store: &KeyStore, backend: &EncryptedStoreFile) -> Result<()> {
    println!("Key store: {}", backend.path().display());
    println!("Records:   {}", store.len());
    if store.is_empty() {
        return Ok(());
    }
    println!();
    for record in store.records() {
        println!(
            "  {}  {:>10}  {}",
            record.fingerprint(),
            encrypted_ago(record.last_ciphertext.as_deref()),
            record.identifier
        );
    }
    Ok(())
}

fn cmd_keys_show(store: &KeyStore, file: &Path) -> Result<()> {
    let identifier = resolve_identifier(store, file)?;
    let record = store
        .get(&identifier)
        .with_context(|| format!("no key recorded for {identifier}"))?;

    println!("File: {}", record.identifier);
    println!("  fingerprint: {}", record.fingerprint());
    match record.last_ciphertext.as_deref() {
        Some(ct) => {
            println!("  ciphertext:  {} bytes", ct.len());
            println!("  encrypted:   {}", encrypted_ago(Some(ct)));
        }
        None => println!("  ciphertext:  not recorded (recovery unavailable)"),
    }
    Ok(())
}

fn cmd_keys_forget(
    store: &mut KeyStore,
    backend: &EncryptedStoreFile,
    file: &Path,
) -> Result<()> {
    let identifier = resolve_identifier(store, file)?;
    let removed = store
        .remove(&identifier)
        .with_context(|| format!("no key recorded for {identifier}"))?;

    if let Err(e) = backend.save(store) {
        store.restore(removed);
        return Err(e).context("saving key store");
    }
    tracing::info!(identifier = %identifier, "key record removed");
    println!("Forgot key for {identifier}");
    Ok(())
}

// ── `crypter config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &CrypterConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn encrypted_ago(token: Option<&[u8]>) -> String {
    let Some(ts) = token.and_then(|t| crypter_crypto::token_timestamp(t).ok()) else {
        return "unknown".to_string();
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{} ago", format_age(now.saturating_sub(ts)))
}

fn format_age(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
