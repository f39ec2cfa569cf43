//! Background execution of sweeps for a polling consumer.
//!
//! The runner owns an instrument factory rather than an instrument: each sweep
//! acquires a fresh connection inside its task and the controller releases it
//! when the sweep ends. The consumer (GUI loop, CLI progress printer) calls
//! [`SweepRunner::state`] and [`SweepRunner::series`] at its own cadence;
//! neither call waits on the sweep task.
//!
//! # Example
//!
//! ```rust,ignore
//! let runner = SweepRunner::new(factory, model, calibration.max_level);
//! runner.start(0, 1023, 5)?;
//! let mut seen = 0;
//! while runner.state().is_active() {
//!     for record in runner.series().since(seen) {
//!         println!("{:.3} V  {:.4} A", record.voltage_pv, record.current_pv);
//!     }
//!     seen = runner.series().len();
//!     tokio::time::sleep(Duration::from_millis(200)).await;
//! }
//! ```

use crate::calibration::Level;
use crate::error::{AppResult, DaqError};
use crate::instrument::Instrument;
use crate::sweep::controller::{CancelToken, SweepController, SweepRange, SweepState};
use crate::sweep::model::QuantityModel;
use crate::sweep::series::ResultSeries;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Opens the instrument for one sweep.
pub type InstrumentFactory = Arc<dyn Fn() -> AppResult<Box<dyn Instrument>> + Send + Sync>;

/// Runs at most one sweep at a time on a background task.
pub struct SweepRunner {
    factory: InstrumentFactory,
    model: Arc<dyn QuantityModel>,
    max_level: Level,
    state: Arc<watch::Sender<SweepState>>,
    series: RwLock<ResultSeries>,
    cancel: Mutex<CancelToken>,
    task: Mutex<Option<JoinHandle<SweepState>>>,
}

impl SweepRunner {
    /// Idle runner with an empty series.
    pub fn new(factory: InstrumentFactory, model: Arc<dyn QuantityModel>, max_level: Level) -> Self {
        let (state, _) = watch::channel(SweepState::Idle);
        Self {
            factory,
            model,
            max_level,
            state: Arc::new(state),
            series: RwLock::new(ResultSeries::new()),
            cancel: Mutex::new(CancelToken::new()),
            task: Mutex::new(None),
        }
    }

    /// Launch a sweep over `start..stop` and return immediately.
    ///
    /// Fails with `DaqError::InvalidRange` for bad bounds and with
    /// `DaqError::AlreadyRunning` while another sweep is active; in both cases
    /// the current series is left as it was. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self, start: Level, stop: Level, rep_num: usize) -> AppResult<()> {
        let range = SweepRange::new(start, stop, rep_num, self.max_level)?;

        // Held until `Running` is published: a cancel must reach this sweep's
        // token and readers must see this sweep's series.
        let mut cancel_slot = self.cancel.lock();
        if self.state.borrow().is_active() {
            return Err(DaqError::AlreadyRunning);
        }

        let series = ResultSeries::new();
        let cancel = CancelToken::new();
        *self.series.write() = series.clone();
        *cancel_slot = cancel.clone();
        self.state.send_replace(SweepState::Running);
        drop(cancel_slot);

        let factory = Arc::clone(&self.factory);
        let model = Arc::clone(&self.model);
        let state = Arc::clone(&self.state);
        let max_level = self.max_level;

        let handle = tokio::spawn(async move {
            let instrument = match factory() {
                Ok(instrument) => instrument,
                Err(e) => {
                    error!("Could not open instrument: {}", e);
                    series.seal(None);
                    state.send_replace(SweepState::Failed(e.to_string()));
                    return state.borrow().clone();
                }
            };

            let mut controller = SweepController::new(instrument, model, max_level)
                .with_shared(series, cancel, Arc::clone(&state));
            // The controller records the outcome in `state`.
            let _ = controller.run(range.start, range.stop, range.rep_num).await;
            let final_state = state.borrow().clone();
            final_state
        });

        *self.task.lock() = Some(handle);
        info!("Sweep task launched for levels {}..{}", range.start, range.stop);
        Ok(())
    }

    /// Ask the running sweep to stop at the next level boundary.
    ///
    /// Idempotent; does nothing unless a sweep is `Running`.
    pub fn request_cancel(&self) {
        let token = self.cancel.lock();
        let requested = self.state.send_if_modified(|state| {
            if *state == SweepState::Running {
                *state = SweepState::Cancelling;
                true
            } else {
                false
            }
        });
        if requested {
            token.cancel();
            info!("Sweep cancellation requested");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SweepState {
        self.state.borrow().clone()
    }

    /// Watch lifecycle changes instead of polling.
    pub fn subscribe(&self) -> watch::Receiver<SweepState> {
        self.state.subscribe()
    }

    /// Handle to the series of the current (or most recent) sweep.
    pub fn series(&self) -> ResultSeries {
        self.series.read().clone()
    }

    /// Wait for the launched sweep to finish and return its final state.
    ///
    /// Returns the current state immediately if no sweep was launched.
    pub async fn wait(&self) -> AppResult<SweepState> {
        let handle = self.task.lock().take();
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                let reason = e.to_string();
                error!("Sweep task ended abnormally: {}", reason);
                self.series().seal(None);
                self.state.send_replace(SweepState::Failed(reason.clone()));
                DaqError::Task(reason)
            }),
            None => Ok(self.state()),
        }
    }
}

impl Drop for SweepRunner {
    fn drop(&mut self) {
        // The task keeps running detached; make sure it winds down and closes the device.
        self.request_cancel();
    }
}
