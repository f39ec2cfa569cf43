//! Level-by-level sweep control loop.
//!
//! ```text
//! for level in start..stop:
//!     set_output(level)
//!     rep_num x (read ch1, read ch2)  -> RawBatch
//!     QuantityModel::derive           -> DerivedRecord
//!     ResultSeries::push
//!     cancelled? -> Cancelling, stop here
//! close()                             (every exit path)
//! fill factor                         (completion only, photovoltaic model)
//! ```

use crate::calibration::{Level, CURRENT_CHANNEL, VOLTAGE_CHANNEL};
use crate::error::{AppResult, DaqError};
use crate::instrument::Instrument;
use crate::sweep::model::QuantityModel;
use crate::sweep::reducer::RawBatch;
use crate::sweep::series::ResultSeries;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SweepState {
    /// Nothing started yet
    #[default]
    Idle,
    /// Levels are being acquired
    Running,
    /// Cancellation requested; the current level is still finishing
    Cancelling,
    /// All levels processed, or cancellation honoured at a level boundary
    Completed,
    /// The instrument failed; carries the cause
    Failed(String),
}

impl SweepState {
    /// True while a sweep task owns the instrument.
    pub fn is_active(&self) -> bool {
        matches!(self, SweepState::Running | SweepState::Cancelling)
    }

    /// True once the sweep can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SweepState::Completed | SweepState::Failed(_))
    }
}

impl fmt::Display for SweepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepState::Idle => write!(f, "idle"),
            SweepState::Running => write!(f, "running"),
            SweepState::Cancelling => write!(f, "cancelling"),
            SweepState::Completed => write!(f, "completed"),
            SweepState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Cooperative cancellation flag, checked between levels.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the sweep to stop after the level in progress.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`CancelToken::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounds of a sweep: levels `start..stop`, `rep_num` readings per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRange {
    /// First level (inclusive)
    pub start: Level,
    /// Last level (exclusive)
    pub stop: Level,
    /// Readings per channel at each level
    pub rep_num: usize,
}

impl SweepRange {
    /// Range checked against the hardware's highest level.
    pub fn new(start: Level, stop: Level, rep_num: usize, max_level: Level) -> AppResult<Self> {
        let range = Self {
            start,
            stop,
            rep_num,
        };
        range.validate(max_level)?;
        Ok(range)
    }

    /// Check `start < stop <= max_level` and `rep_num >= 1`.
    pub fn validate(&self, max_level: Level) -> AppResult<()> {
        if self.start >= self.stop || self.stop > max_level || self.rep_num == 0 {
            return Err(DaqError::InvalidRange {
                start: self.start,
                stop: self.stop,
                rep_num: self.rep_num,
                max_level,
            });
        }
        Ok(())
    }

    /// Number of levels the sweep visits.
    pub fn len(&self) -> usize {
        self.stop.saturating_sub(self.start) as usize
    }

    /// True if the range visits no level.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives one instrument through one sweep.
pub struct SweepController<I: Instrument> {
    instrument: I,
    model: Arc<dyn QuantityModel>,
    max_level: Level,
    series: ResultSeries,
    cancel: CancelToken,
    state: Arc<watch::Sender<SweepState>>,
}

impl<I: Instrument> SweepController<I> {
    /// Controller with its own series, token and state channel.
    pub fn new(instrument: I, model: Arc<dyn QuantityModel>, max_level: Level) -> Self {
        let (state, _) = watch::channel(SweepState::Idle);
        Self {
            instrument,
            model,
            max_level,
            series: ResultSeries::new(),
            cancel: CancelToken::new(),
            state: Arc::new(state),
        }
    }

    /// Publish into an existing series, token and state channel.
    pub fn with_shared(
        mut self,
        series: ResultSeries,
        cancel: CancelToken,
        state: Arc<watch::Sender<SweepState>>,
    ) -> Self {
        self.series = series;
        self.cancel = cancel;
        self.state = state;
        self
    }

    /// Handle to the series this controller appends to.
    pub fn series(&self) -> ResultSeries {
        self.series.clone()
    }

    /// Token that cancels this controller's sweep.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SweepState {
        self.state.borrow().clone()
    }

    /// Watch lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<SweepState> {
        self.state.subscribe()
    }

    /// Run the sweep over `start..stop` with `rep_num` readings per level.
    ///
    /// Invalid bounds fail with `DaqError::InvalidRange` before the instrument
    /// is touched. Otherwise the instrument is closed exactly once on every
    /// exit path. On failure the records appended so far stay readable through
    /// [`SweepController::series`].
    pub async fn run(&mut self, start: Level, stop: Level, rep_num: usize) -> AppResult<ResultSeries> {
        let range = SweepRange::new(start, stop, rep_num, self.max_level)?;

        // A cancel that raced ahead of the task start must not be overwritten.
        self.state.send_if_modified(|state| {
            if *state == SweepState::Cancelling {
                false
            } else {
                *state = SweepState::Running;
                true
            }
        });
        info!(
            "Starting {} sweep on {}: levels {}..{}, {} reading(s) per level",
            self.model.name(),
            self.instrument.name(),
            range.start,
            range.stop,
            range.rep_num
        );

        let outcome = self.sweep_levels(&range).await;
        let shutdown = self.instrument.close().await;
        if let Err(e) = &shutdown {
            warn!("Failed to return {} to a safe state: {}", self.instrument.name(), e);
        }

        match outcome.and(shutdown) {
            Ok(()) => {
                let fill_factor = if self.model.reports_fill_factor() {
                    match self.series.compute_fill_factor() {
                        Ok(ff) => {
                            info!("Fill factor {:.4} over {} level(s)", ff.value, self.series.len());
                            Some(ff)
                        }
                        Err(e) => {
                            warn!("No fill factor: {}", e);
                            None
                        }
                    }
                } else {
                    None
                };
                self.series.seal(fill_factor);
                self.state.send_replace(SweepState::Completed);
                info!("Sweep completed with {} record(s)", self.series.len());
                Ok(self.series.clone())
            }
            Err(e) => {
                error!("Sweep aborted after {} record(s): {}", self.series.len(), e);
                self.series.seal(None);
                self.state.send_replace(SweepState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn sweep_levels(&mut self, range: &SweepRange) -> AppResult<()> {
        for level in range.start..range.stop {
            self.instrument.set_output(level).await?;

            let mut batch = RawBatch::with_capacity(range.rep_num);
            for _ in 0..range.rep_num {
                let voltage = self.instrument.read_channel(VOLTAGE_CHANNEL).await?;
                let current = self.instrument.read_channel(CURRENT_CHANNEL).await?;
                batch.push(voltage, current);
            }

            let record = self.model.derive(level, &batch);
            debug!(
                "Level {}: U={:.4}±{:.4} V, I={:.5}±{:.5} A, P={:.5}",
                level,
                record.voltage_pv,
                record.voltage_err,
                record.current_pv,
                record.current_err,
                record.power
            );
            if self.series.push(record).is_none() {
                return Err(DaqError::Task(format!(
                    "result series rejected level {}",
                    level
                )));
            }

            if self.cancel.is_cancelled() {
                self.state.send_if_modified(|state| {
                    if *state == SweepState::Running {
                        *state = SweepState::Cancelling;
                        true
                    } else {
                        false
                    }
                });
                warn!("Sweep cancelled after level {}", level);
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use crate::instrument::mock::MockInstrument;
    use crate::calibration::Channel;
    use crate::sweep::model::PhotovoltaicModel;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    /// Remembers the lifecycle state seen when the controller shuts it down.
    struct StateAtClose {
        state: watch::Receiver<SweepState>,
        seen: Arc<Mutex<Option<SweepState>>>,
    }

    #[async_trait]
    impl Instrument for StateAtClose {
        fn name(&self) -> String {
            "state-at-close".to_string()
        }

        async fn set_output(&mut self, _level: Level) -> AppResult<()> {
            Ok(())
        }

        async fn read_channel(&mut self, _channel: Channel) -> AppResult<f64> {
            Ok(0.5)
        }

        async fn close(&mut self) -> AppResult<()> {
            *self.seen.lock() = Some(self.state.borrow().clone());
            Ok(())
        }
    }

    fn controller(mock: MockInstrument) -> SweepController<MockInstrument> {
        let model: Arc<dyn QuantityModel> = Arc::new(PhotovoltaicModel::new(Calibration::default()));
        SweepController::new(mock, model, 1023)
    }

    #[test]
    fn range_rejects_bad_bounds() {
        assert!(SweepRange::new(0, 3, 1, 1023).is_ok());
        assert!(SweepRange::new(3, 3, 1, 1023).is_err());
        assert!(SweepRange::new(4, 3, 1, 1023).is_err());
        assert!(SweepRange::new(0, 1024, 1, 1023).is_err());
        assert!(SweepRange::new(0, 3, 0, 1023).is_err());
        assert_eq!(SweepRange::new(10, 15, 2, 1023).map(|r| r.len()).ok(), Some(5));
    }

    #[tokio::test]
    async fn invalid_range_never_touches_device() {
        let mock = MockInstrument::new();
        let stats = mock.stats();
        let mut ctl = controller(mock);
        let err = ctl.run(5, 2, 1).await.unwrap_err();
        assert!(matches!(err, DaqError::InvalidRange { .. }));
        assert_eq!(stats.set_output_calls(), 0);
        assert_eq!(stats.close_calls(), 0);
        assert_eq!(ctl.state(), SweepState::Idle);
    }

    #[tokio::test]
    async fn produces_one_record_per_level() {
        let mock = MockInstrument::new()
            .with_response(VOLTAGE_CHANNEL, |level| 1.0 - f64::from(level) * 0.01)
            .with_constant(CURRENT_CHANNEL, 0.2);
        let stats = mock.stats();
        let mut ctl = controller(mock);
        let series = ctl.run(10, 20, 3).await.unwrap();

        assert_eq!(series.len(), 10);
        assert_eq!(stats.read_calls(), 10 * 3 * 2);
        let records = series.records();
        assert!(records
            .windows(2)
            .all(|w| w[0].drive_voltage < w[1].drive_voltage));
        assert!(records.iter().all(|r| r.samples == 3));
        assert_eq!(ctl.state(), SweepState::Completed);
        assert!(series.is_sealed());
        assert!(series.fill_factor().is_some());
        assert_eq!(stats.close_calls(), 1);
        assert_eq!(stats.last_output(), 0);
    }

    #[tokio::test]
    async fn single_level_sweep_completes_without_fill_factor() {
        let mut ctl = controller(MockInstrument::new().with_constant(CURRENT_CHANNEL, 1.0));
        let series = ctl.run(0, 1, 1).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.fill_factor(), None);
        assert_eq!(ctl.state(), SweepState::Completed);
    }

    #[tokio::test]
    async fn pre_cancelled_sweep_stops_after_first_level() {
        let mut ctl = controller(MockInstrument::new());
        ctl.cancel_token().cancel();
        let series = ctl.run(0, 50, 1).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(ctl.state(), SweepState::Completed);
    }

    #[tokio::test]
    async fn write_failure_marks_failed_and_closes() {
        let mock = MockInstrument::new().fail_set_at(2);
        let stats = mock.stats();
        let mut ctl = controller(mock);
        let err = ctl.run(0, 5, 2).await.unwrap_err();
        assert!(err.is_device());
        assert_eq!(ctl.series().len(), 2);
        assert!(matches!(ctl.state(), SweepState::Failed(_)));
        assert_eq!(stats.close_calls(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn cancellation_is_logged() {
        let mut ctl = controller(MockInstrument::new());
        ctl.cancel_token().cancel();
        ctl.run(3, 9, 1).await.unwrap();
        assert!(logs_contain("Sweep cancelled after level 3"));
        assert!(logs_contain("Sweep completed with 1 record(s)"));
    }

    #[tokio::test]
    async fn observed_cancel_enters_cancelling_before_completion() {
        let (tx, rx) = watch::channel(SweepState::Idle);
        let seen = Arc::new(Mutex::new(None));
        let instrument = StateAtClose {
            state: rx,
            seen: Arc::clone(&seen),
        };
        let cancel = CancelToken::new();
        let model: Arc<dyn QuantityModel> = Arc::new(PhotovoltaicModel::default());
        let mut ctl = SweepController::new(instrument, model, 1023).with_shared(
            ResultSeries::new(),
            cancel.clone(),
            Arc::new(tx),
        );

        cancel.cancel();
        let series = ctl.run(0, 10, 2).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(*seen.lock(), Some(SweepState::Cancelling));
        assert_eq!(ctl.state(), SweepState::Completed);
    }

    #[tokio::test]
    async fn uncancelled_sweep_closes_while_running() {
        let (tx, rx) = watch::channel(SweepState::Idle);
        let seen = Arc::new(Mutex::new(None));
        let instrument = StateAtClose {
            state: rx,
            seen: Arc::clone(&seen),
        };
        let model: Arc<dyn QuantityModel> = Arc::new(PhotovoltaicModel::default());
        let mut ctl = SweepController::new(instrument, model, 1023).with_shared(
            ResultSeries::new(),
            CancelToken::new(),
            Arc::new(tx),
        );

        ctl.run(0, 3, 1).await.unwrap();
        assert_eq!(*seen.lock(), Some(SweepState::Running));
    }
}
