//! Core library for the pvdaq application.
//!
//! Acquires current-voltage characteristics of a photovoltaic cell or diode:
//! the output of a DAQ board is swept level by level, each level is sampled
//! repeatedly on two analog channels, and the readings are reduced to physical
//! quantities with statistical errors. Results are published to a shared,
//! append-only series while the sweep is still running.
//!
//! # Data Flow
//!
//! ```text
//! SweepRunner --spawn--> SweepController --set/read--> Instrument
//!                              |
//!                     RawBatch -> QuantityModel -> DerivedRecord
//!                              |
//!                              v
//!                        ResultSeries <--poll-- consumer (CLI / GUI)
//! ```

pub mod adapters;
pub mod calibration;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod sweep;

pub use calibration::{Calibration, Level};
pub use error::{AppResult, DaqError};
pub use sweep::{ResultSeries, SweepRunner, SweepState};
