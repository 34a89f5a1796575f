use crate::domain::models::{ConfigEntry, EntityState};
use crate::error::SetupError;
use crate::infrastructure::bluetooth::connection::BleConnector;
use crate::infrastructure::bluetooth::BluetoothService;
use anyhow::Result;
use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Ping,
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
    /// Unload the entry if loaded, then set it up again
    Reload(ConfigEntry),
    Quit,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlResponse {
    Pong,
    Success(String),
    /// Hex encoded characteristic value
    Value(String),
    States(Vec<EntityState>),
    Error(String),
}

/// Serve the control socket until `shutdown` fires.
pub async fn run_control_server<C: BleConnector>(
    name: String,
    service: Arc<BluetoothService<C>>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let socket_name = name.as_str().to_ns_name::<GenericNamespaced>()?;
    let listener = ListenerOptions::new().name(socket_name).create_tokio()?;
    info!(socket = %name, "Control socket listening");

    loop {
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        debug!("Control client connected");

        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let (reader, writer) = conn.split();
            if let Err(e) = handle_connection(reader, writer, &service, &shutdown).await {
                error!("Control connection error: {}", e);
            }
        });
    }
}

async fn handle_connection<C: BleConnector>(
    reader: RecvHalf,
    mut writer: SendHalf,
    service: &Arc<BluetoothService<C>>,
    shutdown: &Notify,
) -> Result<()> {
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (response, quit) = match serde_json::from_str::<ControlCommand>(&line) {
            Ok(cmd) => {
                info!("Received command: {:?}", cmd);
                let quit = cmd == ControlCommand::Quit;
                (execute_command(service, cmd).await, quit)
            }
            Err(e) => (ControlResponse::Error(format!("invalid command: {e}")), false),
        };

        let json = serde_json::to_string(&response)? + "\n";
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;

        if quit {
            shutdown.notify_one();
            break;
        }
    }
    Ok(())
}

pub async fn execute_command<C: BleConnector>(
    service: &Arc<BluetoothService<C>>,
    cmd: ControlCommand,
) -> ControlResponse {
    match cmd {
        ControlCommand::Ping => ControlResponse::Pong,
        ControlCommand::WriteGatt {
            address,
            target_uuid,
            data,
        } => match service.write_gatt(&address, &target_uuid, &data).await {
            Ok(()) => ControlResponse::Success(format!("wrote {data} to {target_uuid}")),
            Err(e) => {
                warn!(%address, error = %e, "write_gatt failed");
                ControlResponse::Error(e.to_string())
            }
        },
        ControlCommand::ReadGatt {
            address,
            target_uuid,
        } => match service.read_gatt(&address, &target_uuid).await {
            Ok(value) => ControlResponse::Value(hex::encode(value)),
            Err(e) => {
                warn!(%address, error = %e, "read_gatt failed");
                ControlResponse::Error(e.to_string())
            }
        },
        ControlCommand::States => ControlResponse::States(service.states().await),
        ControlCommand::Reload(entry) => {
            let title = entry.title.clone();
            match service.reload_entry(entry).await {
                Ok(()) => ControlResponse::Success(format!("Reloaded {title}")),
                Err(SetupError::NotReady(reason)) => {
                    ControlResponse::Success(format!("{title} not ready ({reason}), retrying"))
                }
                Err(e) => ControlResponse::Error(e.to_string()),
            }
        }
        ControlCommand::Quit => ControlResponse::Success("Quitting".to_string()),
    }
}
