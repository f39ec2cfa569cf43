//! Instrument abstraction consumed by the sweep engine.
//!
//! The engine only needs three operations from the hardware: drive the output
//! to a level, read back an analog channel in volts, and return the output to
//! a safe off state. Everything else about the transport (port handling,
//! terminators, timeouts, retries) belongs to the implementation.
//!
//! # Implementations
//!
//! - [`mock::MockInstrument`]: scripted readings and injected failures for tests
//! - [`arduino::ArduinoDevice`]: the serial front-end board (feature `instrument_serial`)

use crate::calibration::{Channel, Level};
use crate::error::AppResult;
use async_trait::async_trait;

#[cfg(feature = "instrument_serial")]
pub mod arduino;
pub mod mock;

/// Synchronous request/response device driven by the sweep controller.
///
/// Implementations are owned by exactly one sweep task at a time, so methods
/// take `&mut self` and may block on the device's own latency.
#[async_trait]
pub trait Instrument: Send {
    /// Identifier used in log messages
    fn name(&self) -> String;

    /// Query the device identification string.
    async fn identify(&mut self) -> AppResult<String> {
        Ok(self.name())
    }

    /// Drive the output to `level`.
    ///
    /// Fails with `DaqError::Device` on communication failure.
    async fn set_output(&mut self, level: Level) -> AppResult<()>;

    /// Read one channel, returning the voltage at the input pin.
    ///
    /// Fails with `DaqError::Device` on communication failure.
    async fn read_channel(&mut self, channel: Channel) -> AppResult<f64>;

    /// Turn the output off and release the device.
    ///
    /// Must be idempotent: calling it on an already closed device is a no-op.
    async fn close(&mut self) -> AppResult<()>;
}

#[async_trait]
impl<I: Instrument + ?Sized> Instrument for Box<I> {
    fn name(&self) -> String {
        (**self).name()
    }

    async fn identify(&mut self) -> AppResult<String> {
        (**self).identify().await
    }

    async fn set_output(&mut self, level: Level) -> AppResult<()> {
        (**self).set_output(level).await
    }

    async fn read_channel(&mut self, channel: Channel) -> AppResult<f64> {
        (**self).read_channel(channel).await
    }

    async fn close(&mut self) -> AppResult<()> {
        (**self).close().await
    }
}
