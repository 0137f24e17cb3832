use std::io::IsTerminal;
use std::time::Duration;

use tapo_core::{Credentials, DeviceInfo, EncryptionType};

/// Read password securely based on the provided options.
///
/// # Priority
///
/// 1. If `password_stdin` is true, read from stdin
/// 2. Otherwise, prompt interactively (if terminal is available)
pub fn read_password(password_stdin: bool, prompt: &str) -> Result<String, String> {
    if password_stdin {
        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| format!("Failed to read password from stdin: {}", e))?;
        return Ok(input.trim_end_matches(['\r', '\n']).to_string());
    }

    if std::io::stdin().is_terminal() {
        eprint!("{}: ", prompt);
        rpassword::read_password().map_err(|e| format!("Failed to read password: {}", e))
    } else {
        Err(
            "No password provided. Set TAPO_PASSWORD or use --password-stdin when piping input."
                .to_string(),
        )
    }
}

/// Get credentials from CLI options and environment.
///
/// Password is read from TAPO_PASSWORD env var, stdin (if --password-stdin),
/// or interactively prompted.
pub fn get_credentials(
    username: Option<String>,
    password_stdin: bool,
) -> Result<Credentials, String> {
    let Some(user) = username else {
        return Err(
            "No username provided. Use -u/--username or set TAPO_USERNAME.".to_string(),
        );
    };

    if let Ok(pass) = std::env::var("TAPO_PASSWORD") {
        return Ok(Credentials::new(user, pass));
    }

    let prompt = format!("Password for {}", user);
    let pass = read_password(password_stdin, &prompt)?;
    Ok(Credentials::new(user, pass))
}

/// Renders the human readable `status` report.
pub fn format_status(host: &str, protocol: EncryptionType, info: &DeviceInfo) -> String {
    let power = match info.device_on() {
        Some(true) => "ON",
        Some(false) => "OFF",
        None => "unknown",
    };

    let mut lines = vec![
        format!("Device:    {}", info.nickname().unwrap_or_else(|| host.to_string())),
        format!("Power:     {}", power),
    ];
    let mut push = |label: &str, value: Option<String>| {
        if let Some(value) = value {
            lines.push(format!("{:<10} {}", format!("{}:", label), value));
        }
    };

    push("Model", info.model().map(str::to_string));
    push("Protocol", Some(protocol.to_string()));
    push("IP", info.ip().map(str::to_string));
    push("MAC", info.mac().map(str::to_string));
    push("Firmware", info.fw_ver().map(str::to_string));
    push("Hardware", info.hw_ver().map(str::to_string));
    push("SSID", info.ssid());
    push(
        "Signal",
        match (info.rssi(), info.signal_level()) {
            (Some(rssi), Some(level)) => Some(format!("{} dBm (level {})", rssi, level)),
            (Some(rssi), None) => Some(format!("{} dBm", rssi)),
            (None, Some(level)) => Some(format!("level {}", level)),
            (None, None) => None,
        },
    );
    push(
        "On time",
        info.on_time().map(|secs| format_uptime(Duration::from_secs(secs))),
    );
    push("Region", info.region().map(str::to_string));

    lines.join("\n")
}

/// Formats a duration as e.g. `2d 3h 4m 5s`, dropping leading zero units.
pub fn format_uptime(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        total % 86_400 / 3_600,
        total % 3_600 / 60,
        total % 60,
    );

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
