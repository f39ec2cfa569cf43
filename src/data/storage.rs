//! Tabular export of a [`ResultSeries`].
//!
//! One row per level, in sweep order. The fill factor is a single number and
//! is reported by the caller rather than repeated on every row.

use crate::error::AppResult;
use crate::sweep::series::ResultSeries;
use std::path::Path;

/// Column names, in row order.
pub const CSV_HEADER: [&str; 11] = [
    "level",
    "drive_voltage",
    "voltage_pv",
    "voltage_err",
    "current_pv",
    "current_err",
    "resistance",
    "resistance_err",
    "power",
    "power_err",
    "samples",
];

// =============================================================================
// CSV Writer
// =============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tracing::info;

    /// Writes sweep results as CSV.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CsvWriter;

    impl CsvWriter {
        /// New writer.
        pub fn new() -> Self {
            Self
        }

        /// Write `series` to a new file at `path`. Returns the number of rows.
        pub fn write_file(&self, path: &Path, series: &ResultSeries) -> AppResult<usize> {
            let file = File::create(path)?;
            let rows = self.write_to(file, series)?;
            info!("Wrote {} row(s) to '{}'", rows, path.display());
            Ok(rows)
        }

        /// Write `series` to any writer. Returns the number of rows.
        pub fn write_to<W: Write>(&self, sink: W, series: &ResultSeries) -> AppResult<usize> {
            let mut writer = csv::Writer::from_writer(sink);
            writer.write_record(CSV_HEADER)?;

            let records = series.records();
            for record in &records {
                writer.write_record([
                    record.level.to_string(),
                    record.drive_voltage.to_string(),
                    record.voltage_pv.to_string(),
                    record.voltage_err.to_string(),
                    record.current_pv.to_string(),
                    record.current_err.to_string(),
                    record.resistance.to_string(),
                    record.resistance_err.to_string(),
                    record.power.to_string(),
                    record.power_err.to_string(),
                    record.samples.to_string(),
                ])?;
            }
            writer.flush()?;
            Ok(records.len())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::DaqError;

    /// Placeholder used when the `storage_csv` feature is off.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CsvWriter;

    impl CsvWriter {
        /// New writer.
        pub fn new() -> Self {
            Self
        }

        /// Always fails: CSV support is not compiled in.
        pub fn write_file(&self, _path: &Path, _series: &ResultSeries) -> AppResult<usize> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvWriter;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvWriter;

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use crate::sweep::model::{PhotovoltaicModel, QuantityModel};
    use crate::sweep::reducer::RawBatch;

    fn series_of(levels: &[u32]) -> ResultSeries {
        let model = PhotovoltaicModel::new(Calibration::default());
        let series = ResultSeries::new();
        for &level in levels {
            let mut batch = RawBatch::with_capacity(1);
            batch.push(1.0, 0.47);
            series.push(model.derive(level, &batch));
        }
        series
    }

    #[test]
    fn writes_header_and_rows() {
        let mut out = Vec::new();
        let rows = CsvWriter::new().write_to(&mut out, &series_of(&[0, 1, 2])).unwrap();
        assert_eq!(rows, 3);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER.join(",").as_str()));
        let first: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(first[0], "0");
        assert_eq!(first[2], "3");
        assert_eq!(first[10], "1");
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        let rows = CsvWriter::new().write_file(&path, &series_of(&[4, 9])).unwrap();
        assert_eq!(rows, 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("level,drive_voltage"));
    }
}
