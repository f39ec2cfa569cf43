//! Persistence of completed sweeps.

pub mod storage;

pub use storage::CsvWriter;
