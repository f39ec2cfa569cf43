//! A mock instrument that returns scripted readings.
//!
//! Channels answer from a per-channel response function of the current output
//! level, or from a fixed sequence consumed one reading at a time. Failures
//! can be injected at a given level, and an optional per-read delay stands in
//! for the serial round trip so background sweeps can be observed mid-flight.
//!
//! Call counters live behind an `Arc` ([`MockStats`]) so a test can keep a
//! handle after the instrument itself has been moved into a sweep task.

use crate::calibration::{Channel, Level};
use crate::error::{AppResult, DaqError};
use crate::instrument::Instrument;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type ResponseFn = Box<dyn Fn(Level) -> f64 + Send + Sync>;

/// Call counters shared between a [`MockInstrument`] and the test observing it.
#[derive(Debug, Default)]
pub struct MockStats {
    set_output_calls: AtomicUsize,
    read_calls: AtomicUsize,
    close_calls: AtomicUsize,
    last_output: AtomicU32,
}

impl MockStats {
    /// Number of `set_output` calls, including the one issued by `close`.
    pub fn set_output_calls(&self) -> usize {
        self.set_output_calls.load(Ordering::SeqCst)
    }

    /// Number of successful channel reads.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Number of times `close` was invoked.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Output level currently applied.
    pub fn last_output(&self) -> Level {
        self.last_output.load(Ordering::SeqCst)
    }
}

enum ChannelScript {
    Response(ResponseFn),
    Sequence(VecDeque<f64>),
}

/// Scripted instrument for tests and dry runs.
pub struct MockInstrument {
    channels: HashMap<Channel, ChannelScript>,
    level: Level,
    fail_read_at: Option<Level>,
    fail_set_at: Option<Level>,
    read_delay: Option<Duration>,
    closed: bool,
    stats: Arc<MockStats>,
}

impl Default for MockInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInstrument {
    /// Create a mock whose channels all read 0 V.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            level: 0,
            fail_read_at: None,
            fail_set_at: None,
            read_delay: None,
            closed: false,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Answer reads on `channel` with a function of the current output level.
    pub fn with_response<F>(mut self, channel: Channel, response: F) -> Self
    where
        F: Fn(Level) -> f64 + Send + Sync + 'static,
    {
        self.channels
            .insert(channel, ChannelScript::Response(Box::new(response)));
        self
    }

    /// Answer reads on `channel` with a constant.
    pub fn with_constant(self, channel: Channel, value: f64) -> Self {
        self.with_response(channel, move |_| value)
    }

    /// Answer reads on `channel` from a fixed sequence; the last value repeats.
    pub fn with_sequence(mut self, channel: Channel, values: impl IntoIterator<Item = f64>) -> Self {
        self.channels.insert(
            channel,
            ChannelScript::Sequence(values.into_iter().collect()),
        );
        self
    }

    /// Fail every channel read while the output sits at `level`.
    pub fn fail_read_at(mut self, level: Level) -> Self {
        self.fail_read_at = Some(level);
        self
    }

    /// Fail the `set_output` call for `level`.
    pub fn fail_set_at(mut self, level: Level) -> Self {
        self.fail_set_at = Some(level);
        self
    }

    /// Sleep this long inside every read.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Record calls into an existing counter set.
    ///
    /// Lets an instrument factory hand out fresh mocks that all report to
    /// one place.
    pub fn with_stats(mut self, stats: Arc<MockStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Shared counters for this instrument.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn next_value(&mut self, channel: Channel) -> f64 {
        match self.channels.get_mut(&channel) {
            Some(ChannelScript::Response(response)) => response(self.level),
            Some(ChannelScript::Sequence(values)) => {
                if values.len() > 1 {
                    values.pop_front().unwrap_or_default()
                } else {
                    values.front().copied().unwrap_or_default()
                }
            }
            None => 0.0,
        }
    }
}

#[async_trait]
impl Instrument for MockInstrument {
    fn name(&self) -> String {
        "Mock Instrument".to_string()
    }

    async fn identify(&mut self) -> AppResult<String> {
        Ok("pvdaq mock front end, rev 0".to_string())
    }

    async fn set_output(&mut self, level: Level) -> AppResult<()> {
        if self.closed {
            return Err(DaqError::Device("mock instrument is closed".to_string()));
        }
        if self.fail_set_at == Some(level) {
            return Err(DaqError::Device(format!("injected write failure at level {}", level)));
        }
        self.stats.set_output_calls.fetch_add(1, Ordering::SeqCst);
        self.stats.last_output.store(level, Ordering::SeqCst);
        self.level = level;
        debug!("MockInstrument: output -> {}", level);
        Ok(())
    }

    async fn read_channel(&mut self, channel: Channel) -> AppResult<f64> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed {
            return Err(DaqError::Device("mock instrument is closed".to_string()));
        }
        if self.fail_read_at == Some(self.level) {
            return Err(DaqError::Device(format!(
                "injected read failure on channel {} at level {}",
                channel, self.level
            )));
        }
        self.stats.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_value(channel))
    }

    async fn close(&mut self) -> AppResult<()> {
        self.stats.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Ok(());
        }
        self.stats.set_output_calls.fetch_add(1, Ordering::SeqCst);
        self.stats.last_output.store(0, Ordering::SeqCst);
        self.level = 0;
        self.closed = true;
        debug!("MockInstrument: closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn response_follows_output_level() {
        let mut mock = MockInstrument::new().with_response(1, |level| f64::from(level) * 0.5);
        mock.set_output(4).await.unwrap();
        assert_eq!(mock.read_channel(1).await.unwrap(), 2.0);
        assert_eq!(mock.read_channel(2).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn sequence_repeats_last_value() {
        let mut mock = MockInstrument::new().with_sequence(2, [1.0, 2.0]);
        assert_eq!(mock.read_channel(2).await.unwrap(), 1.0);
        assert_eq!(mock.read_channel(2).await.unwrap(), 2.0);
        assert_eq!(mock.read_channel(2).await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn injected_read_failure_is_a_device_error() {
        let mut mock = MockInstrument::new().fail_read_at(3);
        mock.set_output(2).await.unwrap();
        assert!(mock.read_channel(1).await.is_ok());
        mock.set_output(3).await.unwrap();
        assert!(mock.read_channel(1).await.unwrap_err().is_device());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_zeroes_output() {
        let mut mock = MockInstrument::new();
        let stats = mock.stats();
        mock.set_output(7).await.unwrap();
        mock.close().await.unwrap();
        mock.close().await.unwrap();
        assert_eq!(stats.close_calls(), 2);
        assert_eq!(stats.last_output(), 0);
        assert_eq!(stats.set_output_calls(), 2);
        assert!(mock.set_output(1).await.is_err());
    }
}
