mod config_flow;
mod control_client;
mod control_server;
mod domain;
mod entities;
mod error;
mod infrastructure;

use crate::config_flow::{AbortReason, ConfigFlow, FlowResult};
use crate::control_client::ControlClient;
use crate::control_server::run_control_server;
use crate::domain::settings::{Settings, SettingsService};
use crate::infrastructure::bluetooth::scanner::{BleScanner, PeripheralRegistry};
use crate::infrastructure::bluetooth::service::SetupOptions;
use crate::infrastructure::bluetooth::BluetoothService;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

const USAGE: &str = "usage: generic_bt [run]
       generic_bt discover
       generic_bt add <address>
       generic_bt remove <address>
       generic_bt reload <address>
       generic_bt write-gatt <address> <uuid> <hex>
       generic_bt read-gatt <address> <uuid>
       generic_bt states
       generic_bt stop";

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Discover,
    Add(String),
    Remove(String),
    Reload(String),
    WriteGatt {
        address: String,
        target_uuid: String,
        data: String,
    },
    ReadGatt {
        address: String,
        target_uuid: String,
    },
    States,
    Stop,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let command = match args.as_slice() {
        [] | ["run"] => Command::Run,
        ["discover"] => Command::Discover,
        ["add", address] => Command::Add(address.to_string()),
        ["remove", address] => Command::Remove(address.to_string()),
        ["reload", address] => Command::Reload(address.to_string()),
        ["write-gatt", address, target_uuid, data] => Command::WriteGatt {
            address: address.to_string(),
            target_uuid: target_uuid.to_string(),
            data: data.to_string(),
        },
        ["read-gatt", address, target_uuid] => Command::ReadGatt {
            address: address.to_string(),
            target_uuid: target_uuid.to_string(),
        },
        ["states"] => Command::States,
        ["stop"] => Command::Stop,
        _ => anyhow::bail!("{USAGE}"),
    };
    Ok(command)
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let mut settings_service = SettingsService::new()?;

    let _logging_guard = infrastructure::logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    match command {
        Command::Run => runtime()?.block_on(run(settings_service.get().clone())),
        Command::Discover => runtime()?.block_on(discover(settings_service.get())),
        Command::Add(address) => runtime()?.block_on(add(&mut settings_service, &address)),
        Command::Remove(address) => {
            match settings_service.remove_entry(&address)? {
                Some(entry) => println!("Removed {} ({})", entry.title, entry.address),
                None => println!("{address} is not configured"),
            }
            Ok(())
        }
        Command::Reload(address) => {
            let entry = settings_service
                .get()
                .entries
                .iter()
                .find(|e| e.address.eq_ignore_ascii_case(&address))
                .cloned()
                .with_context(|| format!("{address} is not configured"))?;
            let mut client = ControlClient::new(settings_service.get().control_socket.clone());
            println!("{}", client.reload(entry)?);
            Ok(())
        }
        Command::WriteGatt {
            address,
            target_uuid,
            data,
        } => {
            let mut client = ControlClient::new(settings_service.get().control_socket.clone());
            println!("{}", client.write_gatt(&address, &target_uuid, &data)?);
            Ok(())
        }
        Command::ReadGatt {
            address,
            target_uuid,
        } => {
            let mut client = ControlClient::new(settings_service.get().control_socket.clone());
            println!("{}", client.read_gatt(&address, &target_uuid)?);
            Ok(())
        }
        Command::States => {
            let mut client = ControlClient::new(settings_service.get().control_socket.clone());
            let states = client.states()?;
            println!("{}", serde_json::to_string_pretty(&states)?);
            Ok(())
        }
        Command::Stop => {
            let mut client = ControlClient::new(settings_service.get().control_socket.clone());
            client.quit()?;
            println!("Stopped");
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

/// Scan for one scan window and return what was seen
async fn scan(settings: &Settings) -> Result<Arc<PeripheralRegistry>> {
    let registry = Arc::new(PeripheralRegistry::new());
    let (advertisements, _) = broadcast::channel(256);
    let mut scanner = BleScanner::new(registry.clone(), advertisements).await?;
    scanner.start().await?;
    info!("Scanning for {:?}...", settings.scan_window());
    tokio::time::sleep(settings.scan_window()).await;
    scanner.stop().await?;
    info!("Found {} devices", registry.len());
    Ok(registry)
}

async fn discover(settings: &Settings) -> Result<()> {
    let registry = scan(settings).await?;
    let configured: Vec<String> = settings.entries.iter().map(|e| e.address.clone()).collect();

    let discovered = registry.discovered_service_info();
    if discovered.is_empty() {
        println!("{}", AbortReason::NoDevicesFound.as_str());
    }
    for info in discovered {
        let address = info.address.clone();
        let mut flow = ConfigFlow::new(&registry, configured.iter().cloned());
        match flow.step_bluetooth(info) {
            FlowResult::ShowForm { .. } => {
                println!("{address}	{}", flow.title_placeholder().unwrap_or_default());
            }
            FlowResult::Abort(reason) => println!("{address}	{}", reason.as_str()),
            FlowResult::CreateEntry(_) => {}
        }
    }
    Ok(())
}

async fn add(settings_service: &mut SettingsService, address: &str) -> Result<()> {
    let registry = scan(settings_service.get()).await?;
    let mut flow = ConfigFlow::new(&registry, settings_service.configured_addresses());

    if let FlowResult::Abort(reason) = flow.step_user(None) {
        anyhow::bail!("Cannot add {address}: {}", reason.as_str());
    }
    match flow.step_user(Some(address)) {
        FlowResult::CreateEntry(entry) => {
            let title = entry.title.clone();
            if settings_service.add_entry(entry)? {
                println!("Added {title} ({})", address.to_uppercase());
            } else {
                println!("{address} is already configured");
            }
            Ok(())
        }
        FlowResult::ShowForm { errors, .. } => {
            let reason = errors.get("base").map(String::as_str).unwrap_or("unknown");
            anyhow::bail!("Cannot add {address}: {reason}")
        }
        FlowResult::Abort(reason) => anyhow::bail!("Cannot add {address}: {}", reason.as_str()),
    }
}

async fn run(settings: Settings) -> Result<()> {
    info!("Starting generic_bt");

    let registry = Arc::new(PeripheralRegistry::new());
    let (advertisements, _) = broadcast::channel(256);
    let mut scanner = BleScanner::new(registry.clone(), advertisements.clone()).await?;
    scanner.start().await?;

    let options = SetupOptions {
        connect_timeout: settings.connect_timeout(),
        ready_timeout: settings.ready_timeout(),
        retry_interval: settings.setup_retry_interval(),
    };
    let service = Arc::new(BluetoothService::new(registry, advertisements, options));

    let mut states = service.subscribe_states();
    let state_log = tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(state) => debug!(entity_id = %state.entity_id, state = %state.state, "State changed"),
                Err(broadcast::error::RecvError::Lagged(n)) => debug!("Skipped {} state changes", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if settings.entries.is_empty() {
        warn!("No devices configured, use `generic_bt add <address>`");
    }
    for entry in settings.entries.iter().cloned() {
        service.spawn_setup_retry(entry);
    }

    let shutdown = Arc::new(Notify::new());
    let mut server = tokio::spawn(run_control_server(
        settings.control_socket.clone(),
        service.clone(),
        shutdown.clone(),
    ));

    tokio::select! {
        _ = shutdown.notified() => info!("Quit requested"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        result = &mut server => match result {
            Ok(Err(e)) => error!("Control socket failed: {}", e),
            Ok(Ok(())) => {}
            Err(e) => error!("Control socket task failed: {}", e),
        },
    }

    server.abort();
    state_log.abort();
    info!("Unloading {} entries", service.loaded_entries().await.len());
    service.shutdown().await;
    scanner.stop().await?;
    info!("Stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_subcommands() {
        assert_eq!(parse_args(&args("")).unwrap(), Command::Run);
        assert_eq!(parse_args(&args("discover")).unwrap(), Command::Discover);
        assert_eq!(parse_args(&args("stop")).unwrap(), Command::Stop);
        assert_eq!(
            parse_args(&args("reload aa:bb:cc:dd:ee:ff")).unwrap(),
            Command::Reload("aa:bb:cc:dd:ee:ff".into())
        );
        assert_eq!(
            parse_args(&args("add aa:bb:cc:dd:ee:ff")).unwrap(),
            Command::Add("aa:bb:cc:dd:ee:ff".into())
        );
        assert_eq!(
            parse_args(&args("write-gatt AA:BB:CC:DD:EE:FF 2a19 0102")).unwrap(),
            Command::WriteGatt {
                address: "AA:BB:CC:DD:EE:FF".into(),
                target_uuid: "2a19".into(),
                data: "0102".into(),
            }
        );
        assert_eq!(
            parse_args(&args("read-gatt AA:BB:CC:DD:EE:FF 2a19")).unwrap(),
            Command::ReadGatt {
                address: "AA:BB:CC:DD:EE:FF".into(),
                target_uuid: "2a19".into(),
            }
        );
    }

    #[test]
    fn bad_arguments_print_usage() {
        let err = parse_args(&args("read-gatt AA:BB:CC:DD:EE:FF")).unwrap_err();
        assert!(err.to_string().starts_with("usage:"));
        assert!(parse_args(&args("frobnicate")).is_err());
        assert!(parse_args(&args("stop now")).is_err());
    }
}
