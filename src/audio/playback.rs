//! # Playback Scheduler
//!
//! The timing engine for inbound synthesized audio. Fragments arrive from the
//! live channel with arbitrary delivery jitter; this module schedules them
//! back-to-back on a monotonically advancing virtual clock so they play
//! without gaps or overlaps, in arrival order, and can all be cancelled at
//! once when the user interrupts.
//!
//! ## Scheduling Algorithm:
//! 1. On receipt of a buffer of duration `d`, compute
//!    `start = max(next_start_time, clock_now)` - guards against scheduling
//!    in the past when fragments arrive late or bursty
//! 2. Register the source in the active set and signal `Active` immediately
//!    (on scheduling, not on audible start)
//! 3. A playback task sleeps until `start`, submits the buffer to the output
//!    sink, then sleeps for `d`
//! 4. Advance `next_start_time = start + d` - the clock advances by the
//!    buffer's duration, never by wall-clock elapsed time
//!
//! ## Interruption:
//! `interrupt()` cancels every active source, clears the set, resets the
//! clock baseline to the current virtual time, silences the output sink and
//! signals `Idle` immediately. It takes the same lock as `schedule()`, so a
//! fragment being scheduled concurrently either lands before the flush (and
//! is cancelled) or after it (and schedules from the reset baseline).
//!
//! ## Invariants:
//! - A source leaves the active set exactly once: on its own completion or on
//!   interruption, never both
//! - `next_start_time` is non-decreasing except on interruption reset
//! - Zero-duration buffers are legal and do not stall the clock

use crate::audio::codec::AudioBuffer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::debug;

/// Whether any source is currently playing or scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Active,
    Idle,
}

/// Destination for decoded audio. The production implementation is the host
/// speaker sink; tests substitute inert or recording outputs.
pub trait AudioOutput: Send + Sync {
    /// Hand a buffer to the device for immediate audible playback.
    fn submit(&self, buffer: &AudioBuffer);

    /// Silence everything the device is currently playing.
    fn stop_all(&self);
}

/// Output that discards all audio. Used in tests and headless sessions.
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn submit(&self, _buffer: &AudioBuffer) {}
    fn stop_all(&self) {}
}

/// Handle describing one scheduled playback source.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledSource {
    pub id: u64,
    /// Start position on the output timeline, seconds since scheduler creation
    pub start_time: f64,
    pub duration: f64,
}

struct SchedulerInner {
    /// Output-timeline position where the next fragment must begin
    next_start_time: f64,
    next_id: u64,
    /// Sources currently playing or scheduled, keyed by id; the value cancels
    /// the source's playback task
    active: HashMap<u64, oneshot::Sender<()>>,
}

/// The playback scheduler. Cheap to share: all mutable state lives behind an
/// internal lock, mutated only by `schedule`, `interrupt` and the playback
/// tasks themselves.
pub struct PlaybackScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
    output: Arc<dyn AudioOutput>,
    state_tx: Arc<watch::Sender<PlaybackState>>,
    state_rx: watch::Receiver<PlaybackState>,
    epoch: Instant,
}

impl PlaybackScheduler {
    /// Create a scheduler whose clock starts at zero now.
    ///
    /// Must be called within a tokio runtime: playback tasks are spawned on it.
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                next_start_time: 0.0,
                next_id: 0,
                active: HashMap::new(),
            })),
            output,
            state_tx: Arc::new(state_tx),
            state_rx,
            epoch: Instant::now(),
        }
    }

    /// Current position on the output timeline, in seconds.
    fn clock_seconds(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Schedule a decoded buffer for gap-free playback after everything
    /// already scheduled.
    ///
    /// Signals `Active` the moment the first source of a burst is scheduled,
    /// so observers see an optimistic but consistent speaking state.
    pub fn schedule(&self, buffer: AudioBuffer) -> ScheduledSource {
        let duration = buffer.duration_seconds();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        // The state signal is updated under the same lock that guards the
        // active set, so observers never see a signal that contradicts it.
        let (id, start_time) = {
            let mut inner = self.inner.lock().unwrap();
            let now = self.clock_seconds();
            let start_time = inner.next_start_time.max(now);
            inner.next_start_time = start_time + duration;

            let id = inner.next_id;
            inner.next_id += 1;
            if inner.active.is_empty() {
                self.state_tx.send_replace(PlaybackState::Active);
            }
            inner.active.insert(id, cancel_tx);
            (id, start_time)
        };

        debug!(id, start_time, duration, "Scheduled playback source");

        let deadline = self.epoch + Duration::from_secs_f64(start_time);
        let inner = Arc::clone(&self.inner);
        let output = Arc::clone(&self.output);
        let state_tx = Arc::clone(&self.state_tx);

        tokio::spawn(async move {
            // Wait for this source's slot on the output timeline. Cancellation
            // (interruption) can land in either wait; the interrupt path has
            // already removed this id from the active set.
            tokio::select! {
                _ = &mut cancel_rx => return,
                _ = sleep_until(deadline) => {}
            }

            output.submit(&buffer);

            tokio::select! {
                _ = &mut cancel_rx => return,
                _ = sleep(Duration::from_secs_f64(duration)) => {}
            }

            // Completion: remove exactly once; an interrupt that raced us has
            // already drained the entry, in which case there is nothing to do.
            let mut inner = inner.lock().unwrap();
            if inner.active.remove(&id).is_some() && inner.active.is_empty() {
                state_tx.send_replace(PlaybackState::Idle);
            }
        });

        ScheduledSource {
            id,
            start_time,
            duration,
        }
    }

    /// Cancel all in-flight playback and reset the clock baseline.
    ///
    /// Atomic with respect to concurrent `schedule` calls: any source whose
    /// scheduling committed before this flush is stopped; any fragment
    /// arriving after recomputes its start from the reset baseline.
    pub fn interrupt(&self) {
        let cancelled = {
            let mut inner = self.inner.lock().unwrap();
            let count = inner.active.len();
            for (_, cancel) in inner.active.drain() {
                let _ = cancel.send(());
            }
            inner.next_start_time = self.clock_seconds();
            self.state_tx.send_replace(PlaybackState::Idle);
            count
        };

        self.output.stop_all();
        debug!(cancelled, "Playback interrupted");
    }

    /// True when no source is playing or scheduled.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().unwrap().active.is_empty()
    }

    /// Subscribe to Active/Idle transitions.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::advance;

    /// Output that records every submission instant (virtual time) and the
    /// number of stop_all calls.
    struct RecordingOutput {
        submissions: Mutex<Vec<(Instant, usize)>>,
        stops: AtomicU64,
    }

    impl RecordingOutput {
        fn new() -> Self {
            Self {
                submissions: Mutex::new(Vec::new()),
                stops: AtomicU64::new(0),
            }
        }

        fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }
    }

    impl AudioOutput for RecordingOutput {
        fn submit(&self, buffer: &AudioBuffer) {
            self.submissions
                .lock()
                .unwrap()
                .push((Instant::now(), buffer.samples.len()));
        }

        fn stop_all(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn buffer_secs(secs: f64) -> AudioBuffer {
        AudioBuffer {
            samples: vec![0.0; (secs * 24_000.0).round() as usize],
            sample_rate: 24_000,
            channels: 1,
        }
    }

    async fn settle(scheduler: &PlaybackScheduler) {
        for _ in 0..50 {
            if scheduler.is_idle() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Three fragments of 1.0s / 0.5s / 2.0s arriving 200ms apart must start
    /// at exactly 0.0, 1.0 and 1.5, and the scheduler reports idle only after
    /// the last completion at 3.5s of playback time.
    #[tokio::test(start_paused = true)]
    async fn test_gap_free_back_to_back_scheduling() {
        let output = Arc::new(RecordingOutput::new());
        let scheduler = PlaybackScheduler::new(output.clone());
        let t0 = Instant::now();

        let s1 = scheduler.schedule(buffer_secs(1.0));
        advance(Duration::from_millis(200)).await;
        let s2 = scheduler.schedule(buffer_secs(0.5));
        advance(Duration::from_millis(200)).await;
        let s3 = scheduler.schedule(buffer_secs(2.0));

        assert!((s1.start_time - 0.0).abs() < 1e-9);
        assert!((s2.start_time - 1.0).abs() < 1e-9);
        assert!((s3.start_time - 1.5).abs() < 1e-9);
        assert!(!scheduler.is_idle());

        // Just before the final completion at 3.5s, still active
        advance(Duration::from_millis(3050)).await; // t = 3.45
        assert!(!scheduler.is_idle());

        advance(Duration::from_millis(100)).await; // t = 3.55
        settle(&scheduler).await;
        assert!(scheduler.is_idle());

        // Every fragment was submitted at its computed start time
        let submissions = output.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 3);
        let starts: Vec<f64> = submissions
            .iter()
            .map(|(at, _)| at.duration_since(t0).as_secs_f64())
            .collect();
        assert!((starts[0] - 0.0).abs() < 1e-6);
        assert!((starts[1] - 1.0).abs() < 1e-6);
        assert!((starts[2] - 1.5).abs() < 1e-6);
    }

    /// A fragment arriving after the timeline has drained must clamp its
    /// start to the current clock, never schedule in the past.
    #[tokio::test(start_paused = true)]
    async fn test_late_arrival_clamps_to_clock() {
        let scheduler = PlaybackScheduler::new(Arc::new(NullOutput));

        let first = scheduler.schedule(buffer_secs(0.5));
        assert!((first.start_time - 0.0).abs() < 1e-9);

        advance(Duration::from_secs(2)).await;
        settle(&scheduler).await;
        assert!(scheduler.is_idle());

        let late = scheduler.schedule(buffer_secs(0.5));
        assert!((late.start_time - 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_clears_sources_and_resets_baseline() {
        let output = Arc::new(RecordingOutput::new());
        let scheduler = PlaybackScheduler::new(output.clone());

        scheduler.schedule(buffer_secs(1.0));
        scheduler.schedule(buffer_secs(2.0)); // starts at 1.0
        advance(Duration::from_millis(300)).await;

        scheduler.interrupt();
        assert!(scheduler.is_idle());
        assert_eq!(*scheduler.subscribe().borrow(), PlaybackState::Idle);
        assert_eq!(output.stops.load(Ordering::SeqCst), 1);

        // Only the first source had reached its start time
        assert_eq!(output.submission_count(), 1);

        // A fragment arriving after the flush schedules from the reset
        // baseline, not the pre-interruption timeline
        let next = scheduler.schedule(buffer_secs(1.0));
        assert!((next.start_time - 0.3).abs() < 1e-6);

        advance(Duration::from_millis(1100)).await;
        settle(&scheduler).await;
        assert!(scheduler.is_idle());
        assert_eq!(output.submission_count(), 2);
    }

    /// Interrupting an idle scheduler is harmless and leaves it idle.
    #[tokio::test(start_paused = true)]
    async fn test_interrupt_when_idle() {
        let scheduler = PlaybackScheduler::new(Arc::new(NullOutput));
        scheduler.interrupt();
        assert!(scheduler.is_idle());
        let s = scheduler.schedule(buffer_secs(0.25));
        assert!((s.start_time - 0.0).abs() < 1e-9);
    }

    /// A zero-duration buffer is legal and must not stall the clock.
    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_buffer() {
        let scheduler = PlaybackScheduler::new(Arc::new(NullOutput));

        let empty = scheduler.schedule(buffer_secs(0.0));
        let follow = scheduler.schedule(buffer_secs(1.0));

        assert!((empty.start_time - 0.0).abs() < 1e-9);
        assert!((follow.start_time - 0.0).abs() < 1e-9);

        advance(Duration::from_millis(1100)).await;
        settle(&scheduler).await;
        assert!(scheduler.is_idle());
    }

    /// Active is signalled on scheduling, before the source becomes audible.
    #[tokio::test(start_paused = true)]
    async fn test_active_signal_is_optimistic() {
        let scheduler = PlaybackScheduler::new(Arc::new(NullOutput));
        let state = scheduler.subscribe();
        assert_eq!(*state.borrow(), PlaybackState::Idle);

        scheduler.schedule(buffer_secs(1.0));
        assert_eq!(*state.borrow(), PlaybackState::Active);

        advance(Duration::from_millis(1100)).await;
        settle(&scheduler).await;
        assert_eq!(*state.borrow(), PlaybackState::Idle);
    }
}
