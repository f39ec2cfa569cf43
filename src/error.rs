//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur while sweeping a device.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidRange`**: Bad sweep bounds or repetition count. Always raised before any
//!   device interaction takes place.
//! - **`Device`**: Any failure reported by the instrument (I/O, timeout, garbled reply).
//!   Aborts the sweep in progress; the safe-shutdown step still runs.
//! - **`AlreadyRunning`**: A sweep start was requested while another one is active.
//! - **`Task`**: The background sweep task panicked or was aborted.
//! - **`DegenerateSeries`**: A summary (fill factor) was requested on a series with too
//!   few points to define it.
//! - **`Config`** / **`Configuration`**: Parse errors from `figment` and semantic errors
//!   caught by `Settings::validate`.
//! - **`Io`**, **`Csv`**: Failures while exporting results.
//! - **`FeatureNotEnabled`**: Functionality (serial transport, CSV export) that was not
//!   compiled in. The message names the cargo feature to enable.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the sweep engine and its collaborators.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Invalid sweep range: start={start}, stop={stop}, rep_num={rep_num} (levels must satisfy 0 <= start < stop <= {max_level}, rep_num >= 1)")]
    InvalidRange {
        start: u32,
        stop: u32,
        rep_num: usize,
        max_level: u32,
    },

    #[error("Device error: {0}")]
    Device(String),

    #[error("A sweep is already running")]
    AlreadyRunning,

    #[error("Sweep task failed: {0}")]
    Task(String),

    #[error("Cannot compute a fill factor over {len} record(s): {reason}")]
    DegenerateSeries { len: usize, reason: &'static str },

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// True for failures that originate in the instrument collaborator.
    pub fn is_device(&self) -> bool {
        matches!(self, DaqError::Device(_))
    }
}
