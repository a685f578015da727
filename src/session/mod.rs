//! # Live Session Module
//!
//! Everything that makes up one live conversation: the channel to the remote
//! voice model, the controller that wires capture and playback to it, the
//! transcript accumulator and the registry of hosted sessions.
//!
//! ## Data Flow:
//! - Outbound: microphone -> codec -> channel (`controller` wires
//!   `audio::capture` to the channel sender)
//! - Inbound: channel -> codec -> playback scheduler -> speaker, with
//!   transcript deltas accumulated per turn and flushed on turn-complete

pub mod channel;     // Wire messages + LiveChannel seam
pub mod controller;  // Session lifecycle and event dispatch
pub mod live;        // WebSocket LiveChannel implementation
pub mod registry;    // Hosted-session bookkeeping
pub mod transcript;  // Turn accumulation and transcript items
