use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tapo_core::{DEFAULT_PORT, ProtocolPolicy};

pub fn parse_duration(arg: &str) -> Result<Duration, std::num::ParseIntError> {
    let seconds = arg.parse()?;
    Ok(Duration::from_secs(seconds))
}

/// TP-Link Tapo smart plug client (KLAP and Passthrough)
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TP-Link cloud account username (email).
    /// Can also be set via TAPO_USERNAME environment variable.
    #[arg(short, long, global = true, env = "TAPO_USERNAME")]
    pub username: Option<String>,

    /// Read password from stdin.
    /// Useful for scripting:
    /// echo "password" | tapo -u user@example.com --password-stdin on 192.168.1.100
    #[arg(long, global = true)]
    pub password_stdin: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Turn the plug on
    On(DeviceArgs),

    /// Turn the plug off
    Off(DeviceArgs),

    /// Show a readable summary of the plug's state
    Status(DeviceArgs),

    /// Print the raw device info JSON
    Info(DeviceArgs),

    /// Show version information for CLI and core library
    Version,
}

/// Connection options shared by all device commands.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Target IP address or hostname (optionally with :port)
    pub target: String,

    /// Target port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Timeout in seconds for each request
    #[arg(long, value_parser = parse_duration, default_value = "30")]
    pub timeout: Duration,

    /// Protocol to use: auto, klap or passthrough
    #[arg(long, default_value_t = ProtocolPolicy::Auto)]
    pub protocol: ProtocolPolicy,
}
