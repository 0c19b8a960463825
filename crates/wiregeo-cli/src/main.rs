//! wiregeo - Recover binary wire layouts from decompiled protocol sources
//!
//! This tool extracts protocol messages, enumerations and data types from a
//! decompiled Java source tree, infers the wire layout of every message and
//! writes the result as a JSON summary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use wiregeo_core::infer::DEFAULT_MODEL;
use wiregeo_core::{
    resolve_root, AnthropicOracle, BatchConfig, BatchController, CancelToken, Extractor,
    ExtractorConfig, InferenceEngine, JsonSummary, OracleConfig, StatsEmitter,
};

/// Recover binary wire layouts from decompiled protocol sources
#[derive(Parser, Debug)]
#[command(name = "wiregeo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Root directory of the decompiled sources
    #[arg(short, long)]
    source_dir: PathBuf,

    /// Sub-directory of the root holding message sources
    #[arg(long, default_value = "packets")]
    packets_dir: String,

    /// Path of the JSON summary to write
    #[arg(short, long, default_value = "protocol-layout.json")]
    output: PathBuf,

    /// Version label recorded in the summary
    #[arg(long, default_value = "unknown")]
    label: String,

    /// API key for the inference oracle
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model identifier for the inference oracle
    #[arg(long, env = "WIREGEO_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Maximum number of concurrent inference calls
    #[arg(long, default_value = "5")]
    concurrency: usize,

    /// Deadline per inference call in seconds (0 = no deadline)
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Use pattern matching only, never contact the oracle
    #[arg(long)]
    offline: bool,

    /// Dry run - don't write the summary, just show what would be written
    #[arg(long)]
    dry_run: bool,

    /// Overwrite an existing summary
    #[arg(long)]
    force: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    run(&cli).await
}

async fn run(cli: &Cli) -> Result<()> {
    let root = resolve_root(&cli.source_dir)
        .with_context(|| format!("Invalid source directory: {}", cli.source_dir.display()))?;
    let packets = root.join(&cli.packets_dir);
    if !packets.is_dir() {
        bail!("Packets directory does not exist: {}", packets.display());
    }
    if !cli.dry_run && cli.output.exists() && !cli.force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            cli.output.display()
        );
    }

    info!("Scanning directory: {}", root.display());
    let config = ExtractorConfig::new().packets_dir(&cli.packets_dir);
    let extraction = Extractor::with_config(config)
        .extract(&root)
        .with_context(|| format!("Failed to extract entities from {}", root.display()))?;
    info!(
        "Extracted {} messages ({} with a deserializer), {} enums, {} data types",
        extraction.message_count(),
        extraction.bundled_count(),
        extraction.enums.len(),
        extraction.aggregates.len()
    );

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight inference");
            trigger.cancel();
        }
    });

    let batch = BatchConfig::new()
        .concurrency(cli.concurrency)
        .call_timeout(call_timeout(cli.timeout_secs));
    let layouts = BatchController::with_config(build_engine(cli)?, batch)
        .cancel_token(cancel)
        .run(extraction.all_messages())
        .await;

    let mut stats = StatsEmitter::default();
    extraction.emit(&layouts, &mut stats)?;
    let summary = JsonSummary::from_extraction(&cli.label, &extraction, &layouts)?;

    if cli.dry_run {
        println!("Would write: {}", cli.output.display());
        if cli.verbose > 0 {
            println!("---");
            println!("{}", summary.to_json()?);
            println!("---");
        }
    } else {
        write_summary(&cli.output, &summary, cli.force)?;
        println!("Wrote {}", cli.output.display());
    }

    print_summary(&stats, extraction.skipped.len());
    Ok(())
}

/// Pattern matching only when offline, otherwise with the oracle as fallback
fn build_engine(cli: &Cli) -> Result<InferenceEngine> {
    if cli.offline {
        return Ok(InferenceEngine::offline());
    }

    let Some(key) = cli.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        bail!("No API key configured (pass --api-key, set ANTHROPIC_API_KEY, or use --offline)");
    };
    let oracle = AnthropicOracle::new(OracleConfig::new(key).model(&cli.model))
        .context("Failed to create inference client")?;
    info!("Using oracle fallback with model {}", oracle.model());
    Ok(InferenceEngine::with_oracle(oracle))
}

fn call_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Write the summary, creating parent directories as needed
fn write_summary(path: &Path, summary: &JsonSummary, force: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    summary
        .write_to_path(path)
        .with_context(|| format!("Failed to write file: {}", path.display()))
}

fn print_summary(stats: &StatsEmitter, skipped: usize) {
    println!(
        "Summary: {} messages, {} with layouts ({} verified / {} inferred field facts, {} fields without layout), {} enums, {} data types, {} files skipped",
        stats.messages,
        stats.with_layout,
        stats.verified,
        stats.inferred,
        stats.bare_fields,
        stats.enums,
        stats.aggregates,
        skipped
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("wiregeo").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_call_timeout() {
        assert_eq!(call_timeout(0), None);
        assert_eq!(call_timeout(30), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["-s", "src", "--offline"]);
        assert_eq!(cli.packets_dir, "packets");
        assert_eq!(cli.output, PathBuf::from("protocol-layout.json"));
        assert_eq!(cli.label, "unknown");
        assert_eq!(cli.concurrency, 5);
        assert_eq!(cli.timeout_secs, 120);
        assert!(!build_engine(&cli).unwrap().has_fallback());
    }

    #[test]
    fn test_engine_with_key() {
        let cli = parse(&["-s", "src", "--api-key", "test-key", "--model", "m"]);
        assert!(build_engine(&cli).unwrap().has_fallback());

        let cli = parse(&["-s", "src", "--api-key", " "]);
        assert!(build_engine(&cli).is_err());
    }

    #[test]
    fn test_write_summary() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out/layout.json");
        let summary = JsonSummary::new("1.0");

        write_summary(&path, &summary, false).unwrap();
        assert!(path.exists());
        assert!(write_summary(&path, &summary, false).is_err());
        write_summary(&path, &summary, true).unwrap();
    }

    #[tokio::test]
    async fn test_run_offline() {
        let temp = TempDir::new().unwrap();
        let packets = temp.path().join("src/packets/auth");
        fs::create_dir_all(&packets).unwrap();
        fs::write(
            packets.join("Ping.java"),
            r#"package proto.auth;
public class Ping implements Packet {
    public static final int PACKET_ID = 1;
    public static final int FIXED_BLOCK_SIZE = 8;
    private long nonce;
    public Ping() {}
    public Ping(long nonce) { this.nonce = nonce; }
    public static Ping deserialize(ByteBuf buf, int offset) {
        Ping obj = new Ping();
        obj.nonce = buf.getLongLE(offset);
        return obj;
    }
}
"#,
        )
        .unwrap();

        let output = temp.path().join("layout.json");
        let source = temp.path().join("src");
        let cli = parse(&[
            "-s",
            source.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--offline",
            "--label",
            "test",
        ]);
        run(&cli).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(json["version"], "test");
        let ping = &json["categories"]["auth"][0];
        assert_eq!(ping["name"], "Ping");
        assert_eq!(ping["fields"][0]["name"], "nonce");
        assert_eq!(ping["fields"][0]["layout"]["wireOffset"], 0);
        assert_eq!(ping["fields"][0]["layout"]["wireSize"], 8);
        assert_eq!(ping["fields"][0]["layout"]["encoding"], "i64le");
        assert_eq!(ping["fields"][0]["layout"]["evidence"], "verified");
        assert_eq!(ping["layout"]["totalFixedSize"], 8);
        assert_eq!(ping["layout"]["hasVariableSection"], false);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
