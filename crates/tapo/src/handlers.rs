use tapo_core::{Credentials, Plug, TapoClient};
use tracing::{debug, error};

use crate::cli::DeviceArgs;
use crate::utils::{format_status, get_credentials};

/// Resolve credentials or exit with a message.
fn credentials_or_exit(username: Option<String>, password_stdin: bool) -> Credentials {
    match get_credentials(username, password_stdin) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Connect and log in, or exit with guidance.
async fn open_plug(args: &DeviceArgs, credentials: Credentials) -> Plug {
    let client = TapoClient::new(credentials)
        .with_port(args.port)
        .with_timeout(args.timeout)
        .with_protocol(args.protocol);

    debug!(host = %args.target, port = args.port, policy = %args.protocol, "connecting");
    match client.p100(&args.target).await {
        Ok(plug) => {
            debug!(host = %plug.host(), protocol = %plug.encryption_type(), "connected");
            plug
        }
        Err(e) => {
            error!(host = %args.target, error = %e, "could not connect");
            eprintln!("Error: Could not connect to {}: {}", args.target, e);
            if !e.is_unreachable() {
                eprintln!();
                eprintln!("Check that the email and password match the Tapo app account");
                eprintln!("(both are case-sensitive), or force a protocol with:");
                eprintln!("  tapo on {} --protocol klap", args.target);
            }
            std::process::exit(1);
        }
    }
}

/// Handle the on/off commands.
pub async fn handle_power(
    args: DeviceArgs,
    on: bool,
    username: Option<String>,
    password_stdin: bool,
) {
    let credentials = credentials_or_exit(username, password_stdin);
    let plug = open_plug(&args, credentials).await;

    match plug.set_power(on).await {
        Ok(()) => println!("{} turned {}", args.target, if on { "on" } else { "off" }),
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: Command failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle the status command.
pub async fn handle_status(args: DeviceArgs, username: Option<String>, password_stdin: bool) {
    let credentials = credentials_or_exit(username, password_stdin);
    let plug = open_plug(&args, credentials).await;

    match plug.get_device_info().await {
        Ok(info) => println!("{}", format_status(plug.host(), plug.encryption_type(), &info)),
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: Command failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle the info command.
pub async fn handle_info(args: DeviceArgs, username: Option<String>, password_stdin: bool) {
    let credentials = credentials_or_exit(username, password_stdin);
    let plug = open_plug(&args, credentials).await;

    match plug.get_device_info().await {
        Ok(info) => match serde_json::to_string_pretty(&info) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: Failed to serialize device info: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: Command failed: {}", e);
            std::process::exit(1);
        }
    }
}
