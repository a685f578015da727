//! # Host Audio Devices
//!
//! Concrete capture and playback endpoints for the machine the backend runs
//! on: a cpal microphone stream feeding the capture pipeline and a rodio sink
//! consuming the playback scheduler's output.
//!
//! Both cpal streams and rodio output streams are tied to the thread that
//! created them, so each device runs on a dedicated thread that owns the
//! handle and parks until it is told to stop. Stopping joins the thread after
//! the handle is dropped, which is what guarantees the capture contract: no
//! frame is delivered after `stop()` returns.

use crate::audio::capture::{FrameSink, FrameSource};
use crate::audio::codec::AudioBuffer;
use crate::audio::playback::AudioOutput;
use crate::error::SessionError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// Microphone frame source.
///
/// Pulls samples from the default input device at the configured rate and
/// regroups them into fixed `frame_size` frames before invoking the sink.
pub struct MicSource {
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    control: Option<(mpsc::Sender<()>, thread::JoinHandle<()>)>,
}

impl MicSource {
    pub fn new(sample_rate: u32, channels: u16, frame_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frame_size,
            control: None,
        }
    }
}

impl FrameSource for MicSource {
    fn start(&mut self, mut sink: FrameSink) -> Result<(), SessionError> {
        if self.control.is_some() {
            return Err(SessionError::InvalidState(
                "microphone capture already started".to_string(),
            ));
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SessionError>>();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let frame_size = self.frame_size;

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let device = match cpal::default_host().default_input_device() {
                    Some(device) => device,
                    None => {
                        let _ = ready_tx.send(Err(SessionError::Permission(
                            "no input device available (microphone access refused or missing)"
                                .to_string(),
                        )));
                        return;
                    }
                };

                info!(
                    device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
                    sample_rate,
                    frame_size,
                    "Opening capture stream"
                );

                let stream_config = cpal::StreamConfig {
                    channels,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let mut pending: Vec<f32> = Vec::with_capacity(frame_size);
                let stream = match device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // Regroup device-sized callbacks into fixed frames
                        for &sample in data {
                            pending.push(sample);
                            if pending.len() >= frame_size {
                                sink(&pending);
                                pending.clear();
                            }
                        }
                    },
                    move |err| {
                        warn!("Capture stream error: {}", err);
                    },
                    None,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(SessionError::Device(format!(
                            "failed to open capture stream: {}",
                            e
                        ))));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SessionError::Device(format!(
                        "failed to start capture stream: {}",
                        e
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Park until stop; dropping the stream disconnects the device
                // callback before this thread (and stop()) returns.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| SessionError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.control = Some((stop_tx, handle));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::Device(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.control.take() {
            let _ = stop_tx.send(());
            // Join returns only after the stream has been dropped
            let _ = handle.join();
            info!("Capture stream released");
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Speaker output: a rodio sink fed by the playback scheduler.
pub struct SpeakerOutput {
    sink: Arc<rodio::Sink>,
    control: Option<(mpsc::Sender<()>, thread::JoinHandle<()>)>,
}

impl SpeakerOutput {
    /// Open the default output device.
    pub fn new() -> Result<Self, SessionError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Arc<rodio::Sink>, SessionError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || {
                let (_stream, stream_handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(SessionError::Device(format!(
                            "no output device available: {}",
                            e
                        ))));
                        return;
                    }
                };

                let sink = match rodio::Sink::try_new(&stream_handle) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        let _ = ready_tx.send(Err(SessionError::Device(format!(
                            "failed to create output sink: {}",
                            e
                        ))));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(Arc::clone(&sink)));

                // Keep the output stream alive until stopped
                let _ = stop_rx.recv();
            })
            .map_err(|e| SessionError::Device(format!("failed to spawn output thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(sink)) => {
                info!("Speaker output ready");
                Ok(Self {
                    sink,
                    control: Some((stop_tx, handle)),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::Device(
                    "output thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }
}

impl AudioOutput for SpeakerOutput {
    fn submit(&self, buffer: &AudioBuffer) {
        if buffer.samples.is_empty() {
            return;
        }
        let source = rodio::buffer::SamplesBuffer::new(
            buffer.channels,
            buffer.sample_rate,
            buffer.samples.clone(),
        );
        self.sink.append(source);
    }

    fn stop_all(&self) {
        self.sink.stop();
        // stop() empties the queue; make sure the sink keeps accepting audio
        self.sink.play();
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Some((stop_tx, handle)) = self.control.take() {
            let _ = stop_tx.send(());
            let _ = handle.join();
        }
    }
}

/// Names of the available input devices, for diagnostics.
///
/// Returns an empty list on hosts without audio hardware.
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_input_devices_never_panics() {
        // CI hosts often have no audio hardware; enumeration must degrade to
        // an empty list, not an error.
        let _ = input_device_names();
    }
}
