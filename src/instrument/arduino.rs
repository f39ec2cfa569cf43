//! Arduino front-end board driver
//!
//! The firmware speaks a small SCPI-like text protocol over USB serial:
//!
//! | Command        | Reply                          |
//! |----------------|--------------------------------|
//! | `*IDN?`        | identification string          |
//! | `OUT:CH0 {n}`  | echo of the applied DAC value  |
//! | `MEAS:CH{n}?`  | raw ADC count on input `n`     |
//!
//! Commands end in `\n`, replies in `\r\n`. Raw counts are converted to volts
//! with the board's reference (`Calibration::adc_to_volts`).
//!
//! ## Configuration
//!
//! ```toml
//! [device]
//! port = "/dev/ttyACM0"
//! baud_rate = 9600
//! timeout_ms = 1000
//! ```

use crate::adapters::SerialAdapter;
use crate::calibration::{Calibration, Channel, Level};
use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use crate::instrument::Instrument;
use async_trait::async_trait;
use tracing::{debug, info};

/// Arduino DAQ board behind a serial port.
pub struct ArduinoDevice {
    adapter: SerialAdapter,
    calibration: Calibration,
}

impl ArduinoDevice {
    /// Open the board on the configured port.
    pub fn open(device: &DeviceConfig, calibration: Calibration) -> AppResult<Self> {
        info!("Connecting to Arduino on {}", device.port);
        let adapter = SerialAdapter::open(device)?;
        Ok(Self {
            adapter,
            calibration,
        })
    }

    /// Raw ADC count on `channel`.
    pub async fn read_raw(&mut self, channel: Channel) -> AppResult<f64> {
        let reply = self.adapter.query(&format!("MEAS:CH{}?", channel)).await?;
        parse_counts(&reply)
    }
}

fn parse_counts(reply: &str) -> AppResult<f64> {
    let trimmed = reply.trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| DaqError::Device(format!("Failed to parse ADC reply: '{}'", trimmed)))
}

#[async_trait]
impl Instrument for ArduinoDevice {
    fn name(&self) -> String {
        format!("arduino@{}", self.adapter.port_name())
    }

    async fn identify(&mut self) -> AppResult<String> {
        self.adapter.query("*IDN?").await
    }

    async fn set_output(&mut self, level: Level) -> AppResult<()> {
        self.adapter.query(&format!("OUT:CH0 {}", level)).await?;
        Ok(())
    }

    async fn read_channel(&mut self, channel: Channel) -> AppResult<f64> {
        let counts = self.read_raw(channel).await?;
        Ok(self.calibration.adc_to_volts(counts))
    }

    async fn close(&mut self) -> AppResult<()> {
        if !self.adapter.is_open() {
            return Ok(());
        }
        let result = self.adapter.query("OUT:CH0 0").await.map(|_| ());
        self.adapter.close();
        debug!("Arduino output off, port released");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counts() {
        assert_eq!(parse_counts("512\r\n").unwrap(), 512.0);
        assert_eq!(parse_counts(" 0 ").unwrap(), 0.0);
    }

    #[test]
    fn test_parse_counts_rejects_garbage() {
        let err = parse_counts("ERR").unwrap_err();
        assert!(err.is_device());
    }
}
