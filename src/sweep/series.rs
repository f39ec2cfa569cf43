//! Append-only result buffer shared between the sweep task and its readers.
//!
//! The sweep task is the only writer. Each record is wrapped in an `Arc` and
//! pushed under a short write lock, so a reader that sees length `n` can hand
//! out records `0..n` without copying them and without ever observing a
//! half-built record. Readers polling for progress use [`ResultSeries::since`]
//! to pick up only what was appended after their last poll.

use crate::calibration::Level;
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Physical quantities derived from one level's batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    /// Output level the batch was taken at
    pub level: Level,
    /// Nominal output voltage for `level`
    pub drive_voltage: f64,
    /// Device voltage (V)
    pub voltage_pv: f64,
    /// Spread of `voltage_pv`
    pub voltage_err: f64,
    /// Device current (A)
    pub current_pv: f64,
    /// Spread of `current_pv`
    pub current_err: f64,
    /// Resistance (Ω), reduced per sample
    pub resistance: f64,
    /// Spread of `resistance`
    pub resistance_err: f64,
    /// Power, reduced per sample
    pub power: f64,
    /// Spread of `power`
    pub power_err: f64,
    /// Readings per channel in the batch
    pub samples: usize,
    /// When the batch finished
    pub acquired_at: DateTime<Utc>,
}

/// End-of-sweep figure of merit `P_max / (I_last * U_first)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillFactor {
    /// Fill factor
    pub value: f64,
    /// Largest per-level mean power
    pub max_power: f64,
    /// Current at the last swept level
    pub short_circuit_current: f64,
    /// Voltage at the first swept level
    pub open_circuit_voltage: f64,
}

impl FillFactor {
    /// Compute the fill factor over `records` (ascending level order).
    ///
    /// Needs at least two records and a non-zero `I_last * U_first`.
    pub fn from_records<'a, I>(records: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = &'a DerivedRecord>,
    {
        let mut len = 0usize;
        let mut first: Option<&DerivedRecord> = None;
        let mut last: Option<&DerivedRecord> = None;
        let mut max_power = f64::NEG_INFINITY;
        for record in records {
            len += 1;
            first.get_or_insert(record);
            last = Some(record);
            max_power = max_power.max(record.power);
        }

        let (first, last) = match (first, last) {
            (Some(first), Some(last)) if len >= 2 => (first, last),
            _ => {
                return Err(DaqError::DegenerateSeries {
                    len,
                    reason: "at least two levels are required",
                })
            }
        };

        let open_circuit_voltage = first.voltage_pv;
        let short_circuit_current = last.current_pv;
        let theoretical = short_circuit_current * open_circuit_voltage;
        if theoretical == 0.0 || !theoretical.is_finite() {
            return Err(DaqError::DegenerateSeries {
                len,
                reason: "I_last * U_first is zero",
            });
        }

        Ok(Self {
            value: max_power / theoretical,
            max_power,
            short_circuit_current,
            open_circuit_voltage,
        })
    }
}

#[derive(Debug, Default)]
struct SeriesInner {
    records: Vec<Arc<DerivedRecord>>,
    fill_factor: Option<FillFactor>,
    sealed: bool,
}

/// Ordered, append-only sequence of [`DerivedRecord`]s.
///
/// Cloning is cheap and yields another handle to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct ResultSeries {
    inner: Arc<RwLock<SeriesInner>>,
}

impl ResultSeries {
    /// Empty, writable series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Returns its index.
    ///
    /// Rejects records once the series is sealed or when the level does not
    /// increase, leaving the existing content untouched.
    pub(crate) fn push(&self, record: DerivedRecord) -> Option<usize> {
        let mut inner = self.inner.write();
        if inner.sealed {
            return None;
        }
        if let Some(last) = inner.records.last() {
            if record.level <= last.level {
                return None;
            }
        }
        inner.records.push(Arc::new(record));
        Some(inner.records.len() - 1)
    }

    /// Freeze the series and attach the summary, if any.
    pub(crate) fn seal(&self, fill_factor: Option<FillFactor>) {
        let mut inner = self.inner.write();
        inner.fill_factor = fill_factor;
        inner.sealed = true;
    }

    /// Number of complete records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// True if no record has been appended.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Record at `index`.
    pub fn get(&self, index: usize) -> Option<Arc<DerivedRecord>> {
        self.inner.read().records.get(index).cloned()
    }

    /// Most recent record.
    pub fn last(&self) -> Option<Arc<DerivedRecord>> {
        self.inner.read().records.last().cloned()
    }

    /// Records appended at or after `index`.
    pub fn since(&self, index: usize) -> Vec<Arc<DerivedRecord>> {
        let inner = self.inner.read();
        inner
            .records
            .get(index..)
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    /// Every record so far.
    pub fn records(&self) -> Vec<Arc<DerivedRecord>> {
        self.since(0)
    }

    /// Summary attached when the sweep completed.
    pub fn fill_factor(&self) -> Option<FillFactor> {
        self.inner.read().fill_factor
    }

    /// True once the producing sweep reached a terminal state.
    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    /// Compute the fill factor over the records collected so far.
    pub fn compute_fill_factor(&self) -> AppResult<FillFactor> {
        let inner = self.inner.read();
        FillFactor::from_records(inner.records.iter().map(AsRef::as_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: Level, voltage: f64, current: f64, power: f64) -> DerivedRecord {
        DerivedRecord {
            level,
            drive_voltage: f64::from(level),
            voltage_pv: voltage,
            voltage_err: 0.0,
            current_pv: current,
            current_err: 0.0,
            resistance: 0.0,
            resistance_err: 0.0,
            power,
            power_err: 0.0,
            samples: 1,
            acquired_at: Utc::now(),
        }
    }

    #[test]
    fn append_and_read_back() {
        let series = ResultSeries::new();
        assert!(series.is_empty());
        assert_eq!(series.push(record(0, 1.0, 0.1, 0.1)), Some(0));
        assert_eq!(series.push(record(1, 0.9, 0.2, 0.18)), Some(1));
        assert_eq!(series.len(), 2);
        assert_eq!(series.get(1).map(|r| r.level), Some(1));
        assert_eq!(series.last().map(|r| r.level), Some(1));
        assert_eq!(series.since(1).len(), 1);
        assert!(series.since(5).is_empty());
    }

    #[test]
    fn rejects_out_of_order_levels() {
        let series = ResultSeries::new();
        series.push(record(3, 1.0, 0.1, 0.1));
        assert_eq!(series.push(record(3, 1.0, 0.1, 0.1)), None);
        assert_eq!(series.push(record(2, 1.0, 0.1, 0.1)), None);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn sealed_series_is_read_only() {
        let series = ResultSeries::new();
        series.push(record(0, 1.0, 0.1, 0.1));
        series.seal(None);
        assert!(series.is_sealed());
        assert_eq!(series.push(record(1, 1.0, 0.1, 0.1)), None);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn handles_share_the_buffer() {
        let writer = ResultSeries::new();
        let reader = writer.clone();
        let held = {
            writer.push(record(0, 1.0, 0.1, 0.1));
            reader.get(0)
        };
        writer.push(record(1, 1.0, 0.1, 0.1));
        assert_eq!(reader.len(), 2);
        assert_eq!(held.map(|r| r.level), Some(0));
    }

    #[test]
    fn fill_factor_uses_first_voltage_and_last_current() {
        let series = ResultSeries::new();
        series.push(record(0, 2.0, 0.0, 0.0));
        series.push(record(1, 1.5, 0.5, 0.75));
        series.push(record(2, 0.0, 1.0, 0.0));
        let ff = series.compute_fill_factor().unwrap();
        assert_eq!(ff.open_circuit_voltage, 2.0);
        assert_eq!(ff.short_circuit_current, 1.0);
        assert_eq!(ff.max_power, 0.75);
        assert_eq!(ff.value, 0.375);
    }

    #[test]
    fn fill_factor_of_short_series_is_degenerate() {
        let series = ResultSeries::new();
        assert!(matches!(
            series.compute_fill_factor(),
            Err(DaqError::DegenerateSeries { len: 0, .. })
        ));
        series.push(record(0, 2.0, 1.0, 0.5));
        assert!(matches!(
            series.compute_fill_factor(),
            Err(DaqError::DegenerateSeries { len: 1, .. })
        ));
    }

    #[test]
    fn fill_factor_with_zero_denominator_is_degenerate() {
        let series = ResultSeries::new();
        series.push(record(0, 2.0, 0.0, 0.0));
        series.push(record(1, 1.0, 0.0, 0.0));
        assert!(series.compute_fill_factor().is_err());
    }
}
