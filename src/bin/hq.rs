//! # hq CLI - signed integrity maps for directories and files
//!
//! ## Usage
//! ```bash
//! # Create an identity and make it the default
//! HQ_PASS_ONE=... HQ_PASS_TWO=... hq generate --owner ops@example.org --default
//!
//! # Map and sign a directory
//! hq sign /srv/site --owner ops@example.org
//!
//! # Check it later
//! hq verify /srv/site
//!
//! # Sign a script into a self-describing container, read it back from a pipe
//! hq exec-sign deploy.sh --owner ops@example.org
//! cat deploy.sh.hqx | hq exec-verify --print
//! ```
//!
//! Exit status is 0 on success, 1 on error and 2 when a verification fails.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use hq::utils::format_bytes;
use hq::{
    FileVerifyReport, Hq, HqBuilder, HqConfig, Identity, Owner, VerifyEvent, VerifyReport,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// hq - map, sign and verify directory trees
#[derive(Parser)]
#[command(name = "hq")]
#[command(version)]
#[command(about = "Signed integrity maps for directories, files and scripts")]
#[command(long_about = None)]
struct Cli {
    /// Public keystore directory (defaults to $HOME/.hq)
    #[arg(short, long, global = true, env = "HQ_KEYSTORE")]
    keystore: Option<PathBuf>,

    /// Number of hash and verify workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Credentials that unlock a signing identity
#[derive(clap::Args)]
struct Credentials {
    /// Owner id (6 to 64 characters, no '=')
    #[arg(short, long, env = "HQ_OWNER")]
    owner: String,

    /// First passphrase
    #[arg(long, env = "HQ_PASS_ONE", hide_env_values = true)]
    pass_one: String,

    /// Second passphrase
    #[arg(long, env = "HQ_PASS_TWO", hide_env_values = true)]
    pass_two: String,
}

impl Credentials {
    fn unlock(&self) -> anyhow::Result<Identity> {
        let owner = Owner::new(&self.owner).context("invalid owner id")?;
        Ok(Identity::unlock(
            owner,
            self.pass_one.as_bytes(),
            self.pass_two.as_bytes(),
        ))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Map a directory and sign the map
    Sign {
        /// Directory to sign
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Write the map without signing it
        #[arg(long)]
        map_only: bool,

        /// Also record whitespace-insensitive hashes of source files
        #[arg(long)]
        code_review: bool,

        /// Keep earlier map generations
        #[arg(long)]
        keep_maps: bool,

        #[command(flatten)]
        credentials: Option<Credentials>,
    },

    /// Verify a directory against its newest map
    Verify {
        /// Directory to verify
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Use the newest map whose timestamp starts with this prefix
        #[arg(long)]
        at: Option<String>,
    },

    /// Sign a single file into <file>.hqs
    FileSign {
        /// File to sign
        file: PathBuf,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Check a single file against <file>.hqs
    FileVerify {
        /// Signed file
        file: PathBuf,
    },

    /// Pack a script into a signed <script>.hqx
    ExecSign {
        /// Script to pack
        script: PathBuf,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Check a .hqx container, reading stdin when no path is given
    ExecVerify {
        /// Container path, or '-' for stdin
        container: Option<PathBuf>,

        /// Write the verified script to stdout
        #[arg(long)]
        print: bool,
    },

    /// Create an identity and store its public key
    Generate {
        #[command(flatten)]
        credentials: Credentials,

        /// Make this identity the keystore default
        #[arg(long)]
        default: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Main command runner, returns whether the checked object verified
fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = HqConfig::from_env();
    if let Some(dir) = cli.keystore {
        config.keystore = dir;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    let json = cli.json;

    match cli.command {
        Commands::Sign {
            dir,
            map_only,
            code_review,
            keep_maps,
            credentials,
        } => {
            config.map_only |= map_only;
            config.code_review |= code_review;
            if keep_maps {
                config.map_clean = false;
            }
            let hq = HqBuilder::from_config(config).build()?;
            cmd_sign(&hq, &dir, credentials.as_ref(), json)
        }
        Commands::Verify { dir, at } => {
            config.target_timestamp = at;
            let hq = HqBuilder::from_config(config).build()?;
            cmd_verify(&hq, &dir, json)
        }
        Commands::FileSign { file, credentials } => {
            let hq = HqBuilder::from_config(config).build()?;
            let identity = credentials.unlock()?;
            let sealed = hq
                .file_sign(&file, &identity)
                .with_context(|| format!("signing {}", file.display()))?;
            println!("{} Signed {}", "✓".green().bold(), sealed.display().to_string().cyan());
            println!("  Tag: {}", identity.tag().to_string().yellow());
            Ok(true)
        }
        Commands::FileVerify { file } => {
            let hq = HqBuilder::from_config(config).build()?;
            let report = hq
                .file_verify(&file)
                .with_context(|| format!("verifying {}", file.display()))?;
            show_file_report(&report, json)?;
            Ok(report.signature_valid)
        }
        Commands::ExecSign { script, credentials } => {
            let hq = HqBuilder::from_config(config).build()?;
            let identity = credentials.unlock()?;
            let packed = hq
                .file_sign_executable(&script, &identity)
                .with_context(|| format!("packing {}", script.display()))?;
            println!("{} Packed {}", "✓".green().bold(), packed.display().to_string().cyan());
            Ok(true)
        }
        Commands::ExecVerify { container, print } => {
            let hq = HqBuilder::from_config(config).build()?;
            cmd_exec_verify(&hq, container, print, json)
        }
        Commands::Generate {
            credentials,
            default,
        } => {
            let hq = HqBuilder::from_config(config).build()?;
            let owner = Owner::new(&credentials.owner).context("invalid owner id")?;
            let public = hq.generate(
                owner,
                credentials.pass_one.as_bytes(),
                credentials.pass_two.as_bytes(),
                default,
            )?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "owner": public.owner.id(), "tag": public.tag.as_str() })
                );
            } else {
                println!("{} Generated identity", "✓".green().bold());
                println!("  Owner: {}", public.owner.id().cyan());
                println!("  Tag: {}", public.tag.to_string().yellow().bold());
                println!("  Keystore: {}", hq.keystore().dir().display());
            }
            Ok(true)
        }
    }
}

/// Map and optionally sign a directory
fn cmd_sign(
    hq: &Hq,
    dir: &Path,
    credentials: Option<&Credentials>,
    json: bool,
) -> anyhow::Result<bool> {
    let identity = credentials.map(Credentials::unlock).transpose()?;
    if identity.is_none() && !hq.config().map_only {
        bail!("no credentials given; pass --owner with passphrases or use --map-only");
    }

    let spinner = (!json).then(|| spinner("Hashing files..."));
    let report = hq
        .dir_sign(dir, identity.as_ref())
        .with_context(|| format!("signing {}", dir.display()));
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(true);
    }

    println!("{} Mapped {}", "✓".green().bold(), report.dir.display().to_string().cyan());
    println!("  Files: {}", report.files_total.to_string().cyan());
    println!("  Map: {} ({})", report.map_path.display(), format_bytes(report.map_bytes));
    match (&report.container_path, &report.tag) {
        (Some(path), Some(tag)) => {
            println!("  Signature: {}", path.display());
            println!("  Tag: {}", tag.yellow());
        }
        _ => println!("  Signature: {}", "not written (map only)".dimmed()),
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms)).to_string().cyan()
    );
    Ok(true)
}

/// Verify a directory, printing failures as they are found
fn cmd_verify(hq: &Hq, dir: &Path, json: bool) -> anyhow::Result<bool> {
    let start = Instant::now();
    let spinner = (!json).then(|| spinner("Verifying files..."));

    let events = spinner.clone().map(|pb| {
        Arc::new(move |event: &VerifyEvent| match event {
            VerifyEvent::Failure(failure) => pb.println(format!(
                "{} {} {}",
                "✗".red().bold(),
                failure.path.display(),
                failure.reason.to_string().red()
            )),
            VerifyEvent::NewFile(path) => {
                pb.println(format!("{} {} {}", "+".yellow().bold(), path.display(), "NEW".yellow()))
            }
            VerifyEvent::Corruption { last_valid } => pb.println(format!(
                "{} map corrupt after {}",
                "⚠".yellow().bold(),
                last_valid.yellow()
            )),
        }) as hq::EventCallback
    });

    let report = hq
        .dir_verify_with_events(dir, events)
        .with_context(|| format!("verifying {}", dir.display()));
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        show_verify_report(&report, start.elapsed());
    }
    Ok(report.is_valid())
}

fn show_verify_report(report: &VerifyReport, elapsed: Duration) {
    println!("\n{}", "Verification Report:".bold());
    println!("  Map: {}", report.map_path.display());
    if let Some(tag) = &report.tag {
        println!("  Tag: {}", tag.yellow());
    }
    println!(
        "  Signature: {}",
        match report.signature_valid {
            Some(true) => "✓ Valid".green(),
            Some(false) => "✗ Invalid".red(),
            None => "not checked".dimmed(),
        }
    );
    println!(
        "  Files: {}/{} valid",
        report.files_ok().to_string().green(),
        report.files_total
    );
    if report.files_fail > 0 {
        println!("  Failed: {}", report.files_fail.to_string().red());
    }
    if report.files_new > 0 {
        println!("  New: {}", report.files_new.to_string().yellow());
    }
    if let Some(corruption) = &report.corruption {
        println!("  {} {}", "⚠".yellow().bold(), corruption);
    }
    println!("  Time: {}", format_duration(elapsed).to_string().cyan());
}

fn cmd_exec_verify(
    hq: &Hq,
    container: Option<PathBuf>,
    print: bool,
    json: bool,
) -> anyhow::Result<bool> {
    let report = match container.filter(|p| p.as_os_str() != "-") {
        Some(path) => {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            hq.verify_executable(path, io::BufReader::new(file))?
        }
        None => hq.verify_executable(PathBuf::from("<stdin>"), io::stdin().lock())?,
    };

    if print {
        if let Some(script) = &report.script {
            io::stdout().write_all(script)?;
            return Ok(true);
        }
        eprintln!("{} signature invalid, script withheld", "✗".red().bold());
        return Ok(false);
    }
    show_file_report(&report, json)?;
    Ok(report.signature_valid)
}

fn show_file_report(report: &FileVerifyReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let status = if report.signature_valid {
        "✓ Valid".green()
    } else {
        "✗ Invalid".red()
    };
    println!("{} {}", "Signature:".bold(), status);
    println!("  Container: {}", report.container.display());
    println!("  Owner: {}", report.owner.cyan());
    println!("  Tag: {}", report.tag.yellow());
    println!("  Signed at: {}", hq::utils::unix_to_rfc3339(report.timestamp));
    if let Some(token) = &report.interpreter {
        println!("  Interpreter: {}", token);
    }
    Ok(())
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
