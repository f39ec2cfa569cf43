//! Sweep-and-statistics engine.
//!
//! - [`reducer`]: mean / population std of repeated readings
//! - [`model`]: raw channel voltages to physical quantities
//! - [`series`]: append-only results shared with readers
//! - [`controller`]: the level loop and its lifecycle
//! - [`runner`]: background execution with cooperative cancellation

pub mod controller;
pub mod model;
pub mod reducer;
pub mod runner;
pub mod series;

pub use controller::{CancelToken, SweepController, SweepRange, SweepState};
pub use model::{model_for, DiodeModel, PhotovoltaicModel, QuantityModel};
pub use reducer::{RawBatch, ReducedSample};
pub use runner::{InstrumentFactory, SweepRunner};
pub use series::{DerivedRecord, FillFactor, ResultSeries};
