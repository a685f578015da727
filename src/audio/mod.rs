//! # Audio Pipeline Module
//!
//! The real-time audio core of the live conversation backend.
//!
//! ## Key Components:
//! - **Codec**: f32 samples <-> 16-bit LE PCM <-> base64 transport chunks,
//!   plus WAV container packaging for asset download
//! - **Capture Pipeline**: fixed-size microphone frames, encoded and handed
//!   to the outbound channel queue with a bounded-latency drop policy
//! - **Playback Scheduler**: gap-free, overlap-free scheduling of inbound
//!   synthesized fragments on a virtual clock, with bulk interruption
//! - **Devices**: cpal microphone source and rodio speaker sink
//!
//! ## Audio Format:
//! Outbound speech is 16 kHz mono; inbound synthesized audio is 24 kHz mono.
//! Both directions are 16-bit little-endian PCM on the wire.

pub mod capture;   // Frame source seam + encode-and-forward pipeline
pub mod codec;     // Pure PCM/base64/WAV transforms
pub mod device;    // Host microphone and speaker endpoints
pub mod playback;  // Virtual-clock playback scheduling
