//! Periodic status sampling for whoever stores or charts the readings.
//!
//! Storage format and retention are the sink's business. This module only
//! guarantees that polls never overlap and that samples carry the order in
//! which they were issued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fugit::MillisDurationU32;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    controller::{DeviceController, DeviceStatus},
    error::{PsuError, Result},
    transport::Connector,
};

/// A status reading with the time it was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    /// Issuance order of the poll that produced this sample.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub status: DeviceStatus,
}

/// Receives every successfully composed status.
pub trait StatusSink {
    fn record(&mut self, sample: &StatusSample);
}

impl StatusSink for Vec<StatusSample> {
    fn record(&mut self, sample: &StatusSample) {
        self.push(sample.clone());
    }
}

/// Adapts a closure into a [`StatusSink`].
pub struct SinkFn<F>(pub F);

impl<F: FnMut(&StatusSample)> StatusSink for SinkFn<F> {
    fn record(&mut self, sample: &StatusSample) {
        (self.0)(sample)
    }
}

/// Polls a [`DeviceController`] one request at a time.
pub struct StatusPoller {
    interval: MillisDurationU32,
    next_sequence: u64,
}

impl Default for StatusPoller {
    /// Poll once a second.
    fn default() -> Self {
        Self::new(MillisDurationU32::millis(1000))
    }
}

impl StatusPoller {
    pub fn new(interval: MillisDurationU32) -> Self {
        Self {
            interval,
            next_sequence: 0,
        }
    }

    pub fn interval(&self) -> MillisDurationU32 {
        self.interval
    }

    /// Sequence number the next poll will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Issue one status query and hand the result to `sink` if it succeeded.
    ///
    /// The sequence number is taken before the query goes out, so failed polls
    /// leave gaps rather than reordering later samples.
    pub fn poll_once<C: Connector>(
        &mut self,
        controller: &DeviceController<C>,
        sink: &mut impl StatusSink,
    ) -> Result<StatusSample> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let timestamp = Utc::now();

        let status = controller.get_status()?;
        let sample = StatusSample {
            sequence,
            timestamp,
            status,
        };
        sink.record(&sample);
        Ok(sample)
    }

    /// Poll until `stop` is set or the controller disconnects.
    ///
    /// A poll only starts once the previous one has finished. Ticks that find
    /// the controller busy are skipped; other errors are logged and polling
    /// continues.
    pub fn run<C: Connector>(
        &mut self,
        controller: &DeviceController<C>,
        sink: &mut impl StatusSink,
        stop: &AtomicBool,
    ) -> Result<()> {
        let interval = Duration::from_millis(self.interval.to_millis() as u64);
        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            match self.poll_once(controller, sink) {
                Ok(sample) => debug!("sample {} recorded", sample.sequence),
                Err(PsuError::Busy) => debug!("controller busy, skipping poll"),
                Err(err @ PsuError::NotConnected) => return Err(err),
                Err(err) => warn!("status poll failed: {err}"),
            }
            if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
        Ok(())
    }
}
