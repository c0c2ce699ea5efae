use anyhow::Context;
use clap::Parser;
use heatmat::domain::identity::DeviceIdentity;
use heatmat::domain::models::SessionEvent;
use heatmat::domain::settings::SettingsService;
use heatmat::infrastructure::bluetooth::btle::BtleplugAdapter;
use heatmat::infrastructure::bluetooth::MatService;
use heatmat::infrastructure::logging::init_logger;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "heatmat")]
#[command(about = "Console controller for a BLE heating mat")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mat address, overriding the settings file
    #[arg(short, long)]
    address: Option<String>,

    /// Host adapter name (e.g. hci0), overriding the settings file
    #[arg(long)]
    adapter: Option<String>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save: bool,
}

/// One line typed on stdin
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Temperature(f32),
    Power(bool),
    TimerHours(i32),
    TimerOn(bool),
    Refresh,
    Status,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or("empty command")?;
        let argument = words.next();

        let switch = |value: Option<&str>| match value {
            Some("on") => Ok(true),
            Some("off") => Ok(false),
            _ => Err(format!("usage: {} on|off", command)),
        };

        match command {
            "temp" => argument
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|celsius| celsius.is_finite())
                .map(Self::Temperature)
                .ok_or_else(|| "usage: temp <celsius>".to_string()),
            "power" => switch(argument).map(Self::Power),
            "timer" => match argument {
                Some("on") | Some("off") => switch(argument).map(Self::TimerOn),
                Some(hours) => hours
                    .parse()
                    .map(Self::TimerHours)
                    .map_err(|_| "usage: timer <hours>|on|off".to_string()),
                None => Err("usage: timer <hours>|on|off".to_string()),
            },
            "refresh" => Ok(Self::Refresh),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = SettingsService::new(cli.config)?;
    let overrides = settings_service.get_mut();
    if let Some(address) = cli.address {
        overrides.device.address = address;
    }
    if let Some(adapter) = cli.adapter {
        overrides.device.adapter = Some(adapter);
    }

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting heatmat with settings from {}",
        settings_service.path().display()
    );

    let settings = settings_service.get();
    let identity =
        DeviceIdentity::from_settings(&settings.device).context("Invalid device settings")?;
    if cli.save {
        settings_service
            .save()
            .context("Failed to save settings")?;
        info!("Settings saved to {}", settings_service.path().display());
    }
    let adapter = BtleplugAdapter::new(identity.adapter.as_deref())
        .await
        .context("Bluetooth adapter unavailable")?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let service = MatService::start(
        identity,
        settings.session.clone(),
        Arc::new(adapter),
        event_tx,
    );

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::SnapshotChanged(snapshot) => info!("Device: {:?}", snapshot),
                SessionEvent::TimerBrightness(brightness) => {
                    info!("Timer brightness: {}%", brightness)
                }
                SessionEvent::ConnectionChanged(state) => info!("Connection: {}", state),
                SessionEvent::CommandFailed { command, error } => {
                    error!("{} failed: {}", command, error)
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(usage) => {
                warn!("{}", usage);
                continue;
            }
        };

        let result = match command {
            ConsoleCommand::Temperature(celsius) => service.request_temperature(celsius),
            ConsoleCommand::Power(on) => service.request_power(on),
            ConsoleCommand::TimerHours(hours) => service.request_timer_hours(hours).await,
            ConsoleCommand::TimerOn(on) => service.request_timer_on(on).await,
            ConsoleCommand::Refresh => service.request_refresh(),
            ConsoleCommand::Status => {
                info!(
                    "{} | {:?}",
                    service.connection_state(),
                    service.snapshot()
                );
                Ok(())
            }
            ConsoleCommand::Quit => break,
        };
        match result {
            Err(err) if err.is_communication_failure() => {
                error!("Service communication failure: {}", err)
            }
            Err(err) => warn!("Command rejected: {}", err),
            Ok(()) => {}
        }
    }

    service.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("temp 32.5".parse(), Ok(ConsoleCommand::Temperature(32.5)));
        assert_eq!("power off".parse(), Ok(ConsoleCommand::Power(false)));
        assert_eq!("timer 4".parse(), Ok(ConsoleCommand::TimerHours(4)));
        assert_eq!("timer on".parse(), Ok(ConsoleCommand::TimerOn(true)));
        assert_eq!(" status ".parse(), Ok(ConsoleCommand::Status));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from(["heatmat", "--address", "A4:C1:38:00:11:22", "--save"])
            .unwrap();
        assert_eq!(cli.address.as_deref(), Some("A4:C1:38:00:11:22"));
        assert!(cli.adapter.is_none());
        assert!(cli.save);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("temp warm".parse::<ConsoleCommand>().is_err());
        assert!("temp nan".parse::<ConsoleCommand>().is_err());
        assert!("temp inf".parse::<ConsoleCommand>().is_err());
        assert!("power maybe".parse::<ConsoleCommand>().is_err());
        assert!("timer".parse::<ConsoleCommand>().is_err());
        assert!("dance".parse::<ConsoleCommand>().is_err());
    }
}
