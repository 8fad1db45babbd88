//! Continuous acquisition thread
//!
//! One thread per acquisition issues POLL_DATA at the configured cadence and
//! publishes decoded samples on a broadcast channel. Between ticks it waits
//! on a stop channel, so a stop request wakes it immediately instead of
//! after the next sleep.

use super::protocol::{self, Command, ResponseStatus};
use super::session::SessionChannel;
use crate::signal::RawSample;
use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Handle to a running poll thread
pub struct PollerHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
}

impl PollerHandle {
    pub(crate) fn spawn(
        channel: Arc<SessionChannel>,
        samples: broadcast::Sender<RawSample>,
        interval: Duration,
        poll_timeout: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticks = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let ticks_clone = Arc::clone(&ticks);
        let finished_clone = Arc::clone(&finished);

        let thread = std::thread::Builder::new()
            .name("emf-poll".into())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "Poll loop started");
                loop {
                    let tick_start = Instant::now();
                    ticks_clone.fetch_add(1, Ordering::Relaxed);

                    if !poll_once(&channel, &samples, poll_timeout) {
                        break;
                    }

                    let remaining = interval.saturating_sub(tick_start.elapsed());
                    match stop_rx.recv_timeout(remaining) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                finished_clone.store(true, Ordering::SeqCst);
                tracing::debug!("Poll loop exited");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            ticks,
            finished,
        })
    }

    /// Signal the loop and wait for it to exit
    ///
    /// Returns within one poll timeout even if a poll is in flight.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Poll thread panicked");
            }
        }
    }

    /// True while the loop is still polling
    pub fn is_alive(&self) -> bool {
        self.thread.is_some() && !self.finished.load(Ordering::SeqCst)
    }

    /// Ticks started so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One tick. Returns false when the link is gone and the loop must end.
fn poll_once(
    channel: &SessionChannel,
    samples: &broadcast::Sender<RawSample>,
    poll_timeout: Duration,
) -> bool {
    match channel.exchange(Command::PollData, &[], poll_timeout) {
        Ok(response) if response.status == ResponseStatus::Data => {
            match protocol::decode_sample(&response.payload, Utc::now()) {
                Ok(sample) => {
                    // Err only means nobody is subscribed right now
                    let _ = samples.send(sample);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable sample");
                    channel.record_error(&e);
                }
            }
            true
        }
        // OK without payload: no sample ready this tick
        Ok(_) => true,
        Err(e) if e.is_fatal() => {
            tracing::warn!(error = %e, "Link lost, stopping poll loop");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "Poll failed, retrying next tick");
            true
        }
    }
}
