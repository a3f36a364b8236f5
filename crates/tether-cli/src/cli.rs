//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use tether_core::{AuthError, Channel, ChannelError, ChannelState};

use crate::companion::open_channel;
use crate::config::Config;
use crate::output::{OutputFormat, OutputFormatter, StatusReport};
use crate::ExitCode;

/// Tether CLI - secure channel to the companion process
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about = "Tether CLI - secure channel to the companion process")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Companion executable, overriding the config file
    #[arg(long, global = true)]
    pub companion: Option<String>,

    /// State file for pairing and identity, overriding the config file
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Secret protecting the client identity
    #[arg(long, env = "TETHER_SECRET", hide_env_values = true, global = true)]
    pub secret: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pair with the companion using the token it displays
    Pair(PairArgs),
    /// Forget the paired companion
    Unpair,
    /// Show pairing and companion status
    Status,
    /// Check whether the companion is reachable
    Ping,
    /// Establish a secure session and print its id
    Handshake,
    /// Send an encrypted request
    Request(RequestArgs),
}

/// Arguments for the pair command
#[derive(Parser, Debug)]
pub struct PairArgs {
    /// Pairing token shown by the companion
    pub token: String,
}

/// Arguments for the request command
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// Method name understood by the companion
    pub method: String,

    /// JSON parameters
    #[arg(long, default_value = "null")]
    pub params: String,

    /// Request timeout in milliseconds (default budget when omitted)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);
        let channel = open_channel(&config, self.secret.clone())?;

        let result = match self.command {
            Commands::Pair(args) => pair(&channel, &formatter, args, self.secret.as_deref()).await,
            Commands::Unpair => unpair(&channel, &formatter).await,
            Commands::Status => status(&channel, &formatter).await,
            Commands::Ping => ping(&channel, &formatter).await,
            Commands::Handshake => handshake(&channel, &formatter).await,
            Commands::Request(args) => request(&channel, &formatter, args).await,
        };

        channel.shutdown().await;

        match result {
            Ok(code) => Ok(code),
            Err(e) => {
                let code = ExitCode::from(&e);
                tracing::debug!(error = %e, code = e.code().as_str(), "Command failed");
                let message = formatter.format_error_with_code(&e, code);
                if !message.is_empty() {
                    eprintln!("{message}");
                }
                Ok(code)
            }
        }
    }
}

async fn pair(
    channel: &Channel,
    formatter: &OutputFormatter,
    args: PairArgs,
    secret: Option<&str>,
) -> Result<ExitCode, ChannelError> {
    // The generated client key only survives this process once sealed.
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::SecretRequired)?;

    formatter.progress("Requesting companion identity");
    let pinned = channel.pair(&args.token).await?;
    channel.unlock(secret).await?;

    println!("{}", formatter.format_pairing(&pinned));
    Ok(ExitCode::Success)
}

async fn unpair(channel: &Channel, formatter: &OutputFormatter) -> Result<ExitCode, ChannelError> {
    channel.unpair().await?;
    formatter.success("Unpaired");
    Ok(ExitCode::Success)
}

async fn status(channel: &Channel, formatter: &OutputFormatter) -> Result<ExitCode, ChannelError> {
    let pinned = channel.pinned_identity().await?;
    let availability = channel.check_availability().await;

    let companion_knows_client = if availability.available {
        match channel.check_pairing_status().await {
            Ok(status) => Some(status.paired),
            Err(e) => {
                tracing::debug!(error = %e, "Pairing status unavailable");
                None
            }
        }
    } else {
        None
    };

    let report = StatusReport {
        state: state_name(channel.state().await).to_string(),
        paired: pinned.is_some(),
        fingerprint: pinned.map(|p| p.fingerprint),
        available: availability.available,
        message: availability.message,
        companion_knows_client,
    };
    println!("{}", formatter.format_status(&report));

    Ok(if report.paired {
        ExitCode::Success
    } else {
        ExitCode::NotPaired
    })
}

async fn ping(channel: &Channel, formatter: &OutputFormatter) -> Result<ExitCode, ChannelError> {
    let availability = channel.check_availability().await;
    let out = formatter.format_availability(&availability);
    if !out.is_empty() {
        println!("{out}");
    }
    Ok(if availability.available {
        ExitCode::Success
    } else {
        ExitCode::ConnectionFailed
    })
}

async fn handshake(
    channel: &Channel,
    formatter: &OutputFormatter,
) -> Result<ExitCode, ChannelError> {
    formatter.progress("Establishing secure session");
    channel.ensure_session().await?;
    let session_id = channel.session_id().unwrap_or_default();
    let out = formatter.format_session(&session_id);
    if !out.is_empty() {
        println!("{out}");
    }
    Ok(ExitCode::Success)
}

async fn request(
    channel: &Channel,
    formatter: &OutputFormatter,
    args: RequestArgs,
) -> Result<ExitCode, ChannelError> {
    let params: Value = match serde_json::from_str(&args.params) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Invalid --params JSON: {e}");
            return Ok(ExitCode::InvalidInput);
        }
    };

    formatter.progress("Establishing secure session");
    channel.ensure_session().await?;

    let timeout = args.timeout_ms.map(Duration::from_millis);
    let value = channel.secure_request(&args.method, params, timeout).await?;

    let out = formatter.format_value(&value, "request");
    if !out.is_empty() {
        println!("{out}");
    }
    Ok(ExitCode::Success)
}

fn state_name(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Unpaired => "unpaired",
        ChannelState::PairedNoSession => "paired",
        ChannelState::Handshaking => "handshaking",
        ChannelState::SessionActive => "session active",
    }
}
