//! nPod Mutation CLI
//!
//! Runs the client side of the mutation protocol against documents saved
//! from the control plane: checks pre-flight issues, and relays a token to
//! the SPUs listed in a token response.

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use npod_mutation::{
    DeliveryConfig, Error, Issues, PodTokenResponse, Result, TokenDeliveryClient, TokenResponse,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// nPod mutation completion client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a pre-flight issues document
    CheckIssues(CheckIssuesArgs),
    /// Deliver the token of a token response to its SPUs
    Deliver(DeliverArgs),
}

#[derive(ClapArgs, Debug)]
struct CheckIssuesArgs {
    /// JSON file holding the issues
    #[arg(long)]
    file: PathBuf,

    /// Let warnings pass
    #[arg(long, env = "IGNORE_WARNINGS")]
    ignore_warnings: bool,
}

#[derive(ClapArgs, Debug)]
struct DeliverArgs {
    /// JSON file holding the token response
    #[arg(long)]
    file: PathBuf,

    /// Let warnings embedded in the response pass
    #[arg(long, env = "IGNORE_WARNINGS")]
    ignore_warnings: bool,

    /// The file holds a pod token envelope (tokenResp / IssuesRes)
    #[arg(long)]
    pod: bool,

    /// URL scheme used to reach SPUs
    #[arg(long, env = "SPU_SCHEME", default_value = "https")]
    scheme: String,

    /// Timeout of a single delivery attempt in seconds
    #[arg(long, env = "SPU_TIMEOUT", default_value = "30")]
    timeout_secs: u64,
}

impl DeliverArgs {
    fn delivery_config(&self) -> Result<DeliveryConfig> {
        if self.scheme != "https" && self.scheme != "http" {
            return Err(Error::Configuration(format!(
                "Unsupported scheme: {}",
                self.scheme
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Configuration("Timeout must be positive".into()));
        }

        Ok(DeliveryConfig {
            scheme: self.scheme.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);
    info!("nPod mutation client {}", npod_mutation::VERSION);

    match args.command {
        Command::CheckIssues(cmd) => check_issues(&cmd),
        Command::Deliver(cmd) => deliver(&cmd).await,
    }
}

fn check_issues(cmd: &CheckIssuesArgs) -> Result<()> {
    let issues: Issues = load(&cmd.file, "Issues")?;
    issues.validate(cmd.ignore_warnings)?;

    info!(
        "{} warnings, {} errors: mutation may proceed",
        issues.warnings.len(),
        issues.errors.len()
    );
    Ok(())
}

async fn deliver(cmd: &DeliverArgs) -> Result<()> {
    let response = load_token_response(&cmd.file, cmd.pod)?;
    if let Some(issues) = &response.issues {
        issues.validate(cmd.ignore_warnings)?;
    }

    let client = TokenDeliveryClient::from_config(&cmd.delivery_config()?)?;
    let outcome = client.deliver(&response).await?;

    if let Some(result) = outcome.mutation_result()? {
        if let Some(target) = result.scalar_target() {
            info!("Recipe {} started on nPod {}", target.recipe_id, target.pod_id);
        }
        info!(
            "{} individual recipes started",
            result.batch_targets().len()
        );
    }

    let stats = client.stats().snapshot();
    info!(
        "Delivery finished after {} attempts ({} failed)",
        stats.attempts, stats.failed_attempts
    );

    println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
    Ok(())
}

// =============================================================================
// Documents
// =============================================================================

fn load<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| Error::decode(what, e))
}

fn load_token_response(path: &Path, pod: bool) -> Result<TokenResponse> {
    if pod {
        load::<PodTokenResponse>(path, "PodTokenResponse")?.into_token_response()
    } else {
        load(path, "TokenResponse")
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so stdout carries only the delivery outcome
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_deliver() {
        let args = Args::parse_from([
            "npod-mutation",
            "deliver",
            "--file",
            "token.json",
            "--pod",
            "--scheme",
            "http",
            "--timeout-secs",
            "5",
        ]);

        let Command::Deliver(cmd) = args.command else {
            panic!("expected deliver");
        };
        assert!(cmd.pod);
        let config = cmd.delivery_config().unwrap();
        assert_eq!(config.scheme, "http");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let args = Args::parse_from([
            "npod-mutation",
            "deliver",
            "--file",
            "t.json",
            "--scheme",
            "ftp",
        ]);
        let Command::Deliver(cmd) = args.command else {
            panic!("expected deliver");
        };
        assert_matches!(cmd.delivery_config(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_load_pod_envelope() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pod.json");
        fs::write(
            &path,
            r#"{
                "tokenResp": {"token": "tok", "waitOn": "vol-1", "targetIPs": ["10.0.2.1"]},
                "IssuesRes": {"warnings": [{"message": "low capacity"}], "errors": []}
            }"#,
        )
        .unwrap();

        let response = load_token_response(&path, true).unwrap();
        assert_eq!(response.token, "tok");
        let issues = response.issues.unwrap();
        assert_eq!(issues.warnings.len(), 1);
        assert!(issues.validate(true).is_ok());
    }

    #[test]
    fn test_load_reports_decode_and_io_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("issues.json");
        fs::write(&path, r#"{"warnings": "nope"}"#).unwrap();

        assert_matches!(load::<Issues>(&path, "Issues"), Err(Error::Decode { .. }));
        assert_matches!(
            load::<Issues>(&dir.path().join("missing.json"), "Issues"),
            Err(Error::Io(_))
        );
    }

    #[test]
    fn test_check_issues_blocks_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("issues.json");
        fs::write(
            &path,
            r#"{"warnings": [], "errors": [{"spuSerials": ["SPU1"], "message": "offline"}]}"#,
        )
        .unwrap();

        let cmd = CheckIssuesArgs {
            file: path,
            ignore_warnings: true,
        };
        assert_matches!(check_issues(&cmd), Err(Error::Validation(msg)) if msg.contains("SPU1"));
    }
}
