//! Line-oriented serial transport.
//!
//! Wraps the `serialport` crate and runs the blocking I/O on Tokio's blocking
//! pool so a sweep task never stalls the runtime's worker threads.

use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use serialport::SerialPort;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Serial adapter for the board's text protocol
///
/// Every request is answered by exactly one terminated line, so the adapter
/// only exposes `query`.
#[derive(Clone)]
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Reply timeout
    timeout: Duration,

    /// Appended to every command (e.g., "\n")
    write_termination: String,

    /// Marks the end of a reply (e.g., "\r\n")
    read_termination: String,

    /// The open port; `None` once closed
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Open the port described by `config`.
    pub fn open(config: &DeviceConfig) -> AppResult<Self> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(100)) // Internal read timeout
            .open()
            .map_err(|e| {
                DaqError::Device(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    config.port, config.baud_rate, e
                ))
            })?;

        debug!(
            "Serial port '{}' opened at {} baud",
            config.port, config.baud_rate
        );

        Ok(Self {
            port_name: config.port.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            write_termination: config.write_termination.clone(),
            read_termination: config.read_termination.clone(),
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    /// Port this adapter talks to.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// True until [`SerialAdapter::close`] is called.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Send `command` and return the reply line with the terminator stripped.
    pub async fn query(&self, command: &str) -> AppResult<String> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| DaqError::Device(format!("Serial port '{}' not open", self.port_name)))?
            .clone();

        let command_str = format!("{}{}", command, self.write_termination);
        let command_for_log = command.to_string();
        let terminator = self.read_termination.clone().into_bytes();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut port_guard = port.blocking_lock();

            port_guard
                .write_all(command_str.as_bytes())
                .map_err(|e| DaqError::Device(format!("Failed to write to serial port: {}", e)))?;
            port_guard
                .flush()
                .map_err(|e| DaqError::Device(format!("Failed to flush serial port: {}", e)))?;

            debug!("Sent serial command: {}", command_for_log);

            let mut response: Vec<u8> = Vec::new();
            let mut buffer = [0u8; 1];
            let start = std::time::Instant::now();

            while !response.ends_with(&terminator) {
                if start.elapsed() > timeout {
                    return Err(DaqError::Device(format!(
                        "Serial read timeout after {:?} waiting for reply to '{}'",
                        timeout, command_for_log
                    )));
                }

                match port_guard.read(&mut buffer) {
                    Ok(0) => {
                        return Err(DaqError::Device("Unexpected EOF from serial port".to_string()));
                    }
                    Ok(_) => response.push(buffer[0]),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        return Err(DaqError::Device(format!("Serial read error: {}", e)));
                    }
                }
            }

            response.truncate(response.len() - terminator.len());
            let response = String::from_utf8_lossy(&response).trim().to_string();
            debug!("Received serial response: {}", response);
            Ok(response)
        })
        .await
        .map_err(|e| DaqError::Device(format!("Serial I/O task panicked: {}", e)))?
    }

    /// Drop the port handle. Further queries fail.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
    }
}

/// Names of the serial ports visible to the host.
pub fn list_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| DaqError::Device(format!("Failed to enumerate serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_is_device_error() {
        let config = DeviceConfig {
            port: "/dev/pvdaq-does-not-exist".to_string(),
            ..DeviceConfig::default()
        };
        let err = SerialAdapter::open(&config).err();
        assert!(matches!(err, Some(DaqError::Device(_))));
    }
}
