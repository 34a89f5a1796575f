use crate::control_server::{ControlCommand, ControlResponse};
use crate::domain::models::{ConfigEntry, EntityState};
use anyhow::{Context, Result};
use interprocess::local_socket::{prelude::*, GenericNamespaced, Stream as LocalStream};
use std::io::{BufRead, BufReader, Write};
use tracing::debug;

/// Blocking client for a running `generic_bt run` daemon
pub struct ControlClient {
    name: String,
    stream: Option<LocalStream>,
}

impl ControlClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: None,
        }
    }

    /// Try to connect to the daemon. If it is not running, returns Ok(false).
    pub fn try_connect(&mut self) -> Result<bool> {
        if self.stream.is_some() {
            return Ok(true);
        }

        let socket_name = self.name.as_str().to_ns_name::<GenericNamespaced>()?;
        match LocalStream::connect(socket_name) {
            Ok(stream) => {
                debug!(socket = %self.name, "Connected to control socket");
                self.stream = Some(stream);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Send a command and wait for the response line
    pub fn send_command(&mut self, cmd: &ControlCommand) -> Result<ControlResponse> {
        if !self.try_connect()? {
            anyhow::bail!("generic_bt is not running (socket {})", self.name);
        }
        let stream = self.stream.as_mut().context("control socket closed")?;

        let json_cmd = serde_json::to_string(cmd)? + "\n";
        stream.write_all(json_cmd.as_bytes())?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut buffer = String::new();
        if reader.read_line(&mut buffer)? == 0 {
            self.stream = None;
            anyhow::bail!("control socket closed");
        }

        let response = serde_json::from_str(&buffer)?;
        Ok(response)
    }

    pub fn write_gatt(&mut self, address: &str, target_uuid: &str, data: &str) -> Result<String> {
        let cmd = ControlCommand::WriteGatt {
            address: address.to_string(),
            target_uuid: target_uuid.to_string(),
            data: data.to_string(),
        };
        match self.send_command(&cmd)? {
            ControlResponse::Success(msg) => Ok(msg),
            ControlResponse::Error(e) => anyhow::bail!("write_gatt failed: {}", e),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Returns the value hex encoded
    pub fn read_gatt(&mut self, address: &str, target_uuid: &str) -> Result<String> {
        let cmd = ControlCommand::ReadGatt {
            address: address.to_string(),
            target_uuid: target_uuid.to_string(),
        };
        match self.send_command(&cmd)? {
            ControlResponse::Value(value) => Ok(value),
            ControlResponse::Error(e) => anyhow::bail!("read_gatt failed: {}", e),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    pub fn states(&mut self) -> Result<Vec<EntityState>> {
        match self.send_command(&ControlCommand::States)? {
            ControlResponse::States(states) => Ok(states),
            ControlResponse::Error(e) => anyhow::bail!("states failed: {}", e),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    pub fn reload(&mut self, entry: ConfigEntry) -> Result<String> {
        match self.send_command(&ControlCommand::Reload(entry))? {
            ControlResponse::Success(msg) => Ok(msg),
            ControlResponse::Error(e) => anyhow::bail!("reload failed: {}", e),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    pub fn quit(&mut self) -> Result<()> {
        match self.send_command(&ControlCommand::Quit)? {
            ControlResponse::Success(_) => Ok(()),
            ControlResponse::Error(e) => anyhow::bail!("quit failed: {}", e),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }
}
