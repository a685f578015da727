//! # Capture Pipeline
//!
//! Converts continuous microphone input into a steady stream of encoded
//! chunks for the live channel.
//!
//! ## Pipeline:
//! 1. A `FrameSource` delivers fixed-size f32 frames from the capture device
//! 2. Each frame is synchronously encoded (16-bit PCM -> base64)
//! 3. The chunk is offered to a bounded outbound queue with `try_send`
//!
//! Encoding never blocks on the channel: if the queue is full (or the channel
//! is gone) the chunk is dropped and counted. Stale audio is worse than
//! missing audio, so nothing is ever buffered beyond the queue bound.
//!
//! ## Teardown:
//! `stop()` disconnects the frame source before the device is released; no
//! frame is delivered after `stop()` returns.

use crate::audio::codec::{self, EncodedChunk};
use crate::error::SessionError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

/// Callback invoked by a frame source for every captured frame.
///
/// Frames are mono f32 samples in [-1.0, 1.0], `frame_size` samples long,
/// delivered from the capture thread.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send>;

/// A device (or test double) that produces capture frames.
///
/// ## Contract:
/// - `start` installs the sink and begins delivering frames; it fails with a
///   permission error when device access is refused
/// - `stop` disconnects the sink *before* releasing the device and returns
///   only once no further frame can be delivered
pub trait FrameSource: Send {
    fn start(&mut self, sink: FrameSink) -> Result<(), SessionError>;
    fn stop(&mut self);
}

/// Capture pipeline: frame source -> encoder -> bounded outbound queue.
pub struct CapturePipeline {
    source: Box<dyn FrameSource>,
    running: bool,
    frames_sent: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            running: false,
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start capturing: every delivered frame is encoded and offered to
    /// `outbound` without blocking.
    ///
    /// ## Drop policy:
    /// `try_send` failures (queue full, channel closed) drop the chunk and
    /// increment the dropped counter. The bound of `outbound` is the only
    /// buffering between the microphone and the channel.
    pub fn start(&mut self, outbound: mpsc::Sender<EncodedChunk>) -> Result<(), SessionError> {
        if self.running {
            return Err(SessionError::InvalidState(
                "capture pipeline already started".to_string(),
            ));
        }

        let sent = Arc::clone(&self.frames_sent);
        let dropped = Arc::clone(&self.frames_dropped);

        self.source.start(Box::new(move |frame| {
            let chunk = codec::encode_frame(frame);
            match outbound.try_send(chunk) {
                Ok(()) => {
                    sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    // Bounded-latency policy: drop rather than queue
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }))?;

        self.running = true;
        debug!("Capture pipeline started");
        Ok(())
    }

    /// Stop capturing and release the device.
    ///
    /// The source disconnects its sink before the device is released, so once
    /// this returns no further chunk reaches the outbound queue. Safe to call
    /// more than once.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.source.stop();
        self.running = false;
        info!(
            frames_sent = self.frames_sent.load(Ordering::Relaxed),
            frames_dropped = self.frames_dropped.load(Ordering::Relaxed),
            "Capture pipeline stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Frames successfully handed to the outbound queue.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Frames dropped because the queue was full or the channel was gone.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Test frame source shared by the capture and session-controller tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Hands the installed sink back to the test so frames can be pushed
    /// manually. `stop()` disconnects the sink, mirroring the device contract.
    pub(crate) struct ScriptedSource {
        sink: Arc<Mutex<Option<FrameSink>>>,
        fail_on_start: bool,
    }

    impl ScriptedSource {
        pub(crate) fn new() -> (Self, Arc<Mutex<Option<FrameSink>>>) {
            let sink = Arc::new(Mutex::new(None));
            (
                Self {
                    sink: Arc::clone(&sink),
                    fail_on_start: false,
                },
                sink,
            )
        }

        pub(crate) fn denied() -> Self {
            Self {
                sink: Arc::new(Mutex::new(None)),
                fail_on_start: true,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn start(&mut self, sink: FrameSink) -> Result<(), SessionError> {
            if self.fail_on_start {
                return Err(SessionError::Permission("microphone access denied".to_string()));
            }
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            *self.sink.lock().unwrap() = None;
        }
    }

    /// Push one frame through the installed sink, if any.
    pub(crate) fn emit(handle: &Arc<Mutex<Option<FrameSink>>>, frame: &[f32]) {
        if let Some(sink) = handle.lock().unwrap().as_mut() {
            sink(frame);
        }
    }
}
