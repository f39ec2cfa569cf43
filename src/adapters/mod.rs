//! Hardware adapter implementations
//!
//! Low-level transports used by instrument drivers.

#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

#[cfg(feature = "instrument_serial")]
pub use serial_adapter::{list_ports, SerialAdapter};
