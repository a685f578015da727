//! # Session Controller
//!
//! Owns the lifecycle of one live conversation: the microphone capture
//! pipeline, the bidirectional model channel, the playback scheduler and the
//! transcript accumulator.
//!
//! ## Session Lifecycle:
//! `Idle -> Connecting -> Open -> Streaming <-> Interrupted -> Closing -> Idle`,
//! with `Errored` reachable from any non-terminal state. `close()` is
//! idempotent and tolerates the remote side already being gone.
//!
//! ## Wiring:
//! - Capture frames are encoded and `try_send`-delivered to the channel's
//!   outbound queue (drop-on-full, see `audio::capture`)
//! - Inbound channel events are dispatched in arrival order by a single loop:
//!   transcript deltas accumulate, turn-complete flushes, audio fragments are
//!   decoded and scheduled, interruption flushes the scheduler, channel
//!   errors terminate the session

use crate::audio::capture::CapturePipeline;
use crate::audio::codec::{self, EncodedChunk};
use crate::audio::device::{MicSource, SpeakerOutput};
use crate::audio::playback::{AudioOutput, PlaybackScheduler, PlaybackState};
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::persona::{self, Language, VoicePersona};
use crate::session::channel::{ChannelEvent, LiveChannel, LiveChannelConfig, ServerMessage};
use crate::session::live::{self, LiveClient};
use crate::session::transcript::{TranscriptionItem, TurnAccumulator};
use chrono::Utc;
use cpal::traits::HostTrait;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// State of a live session, as seen by the registry and the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Streaming,
    Interrupted,
    Closing,
    Errored,
}

impl SessionState {
    /// Status string used in WebSocket messages and the REST surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Streaming => "streaming",
            SessionState::Interrupted => "interrupted",
            SessionState::Closing => "closing",
            SessionState::Errored => "errored",
        }
    }
}

/// Events emitted to the session's collaborator (the dashboard socket).
#[derive(Debug)]
pub enum SessionEvent {
    /// The session state machine advanced
    State(SessionState),

    /// A finished transcript line (flushed on turn-complete)
    Transcript(TranscriptionItem),

    /// Whether synthesized audio is playing or scheduled
    Speaking(bool),

    /// A surfaced session error; `kind` matches `SessionError::kind()`
    Error { kind: &'static str, message: String },
}

/// Inputs a session is opened with.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub persona: VoicePersona,
    pub language: Language,
    /// Sample rate of inbound synthesized audio
    pub playback_sample_rate: u32,
    pub channels: u16,
}

/// Shared session state plus the event sender; every mutation is mirrored to
/// the collaborator as a `SessionEvent::State`.
#[derive(Clone)]
struct StateCell {
    state: Arc<RwLock<SessionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl StateCell {
    fn set(&self, next: SessionState) {
        *self.state.write().unwrap() = next;
        let _ = self.events.send(SessionEvent::State(next));
    }

    fn get(&self) -> SessionState {
        *self.state.read().unwrap()
    }
}

/// One live conversation. Exclusive owner of its devices, channel and
/// scheduler; dropping the session closes everything.
pub struct LiveSession {
    id: String,
    cell: StateCell,
    capture: Arc<Mutex<CapturePipeline>>,
    channel: Box<dyn LiveChannel>,
    scheduler: Arc<PlaybackScheduler>,
    closed: bool,
}

impl LiveSession {
    /// Production path: probe the microphone, open the live channel and wire
    /// everything against the host devices.
    ///
    /// Fails with a permission error when no input device is available,
    /// before any network traffic happens; channel failures surface as
    /// connection errors.
    pub async fn connect(
        options: SessionOptions,
        config: &AppConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        // Microphone access is checked before the channel is opened, so a
        // denied device never produces a dangling remote session.
        if cpal::default_host().default_input_device().is_none() {
            return Err(SessionError::Permission(
                "no input device available (microphone access refused or missing)".to_string(),
            ));
        }

        let instruction = persona::system_instruction(&options.persona, &options.language);
        let channel_config = LiveChannelConfig {
            audio_response: true,
            voice: options.persona.voice.clone(),
            system_instruction: instruction,
            input_transcription: true,
            output_transcription: true,
        };

        let url = live::channel_url(&config.channel);
        let channel =
            LiveClient::connect(&url, &channel_config, config.audio.outbound_queue_frames).await?;

        let mic = MicSource::new(
            config.audio.capture_sample_rate,
            config.audio.channels,
            config.audio.frame_size,
        );
        let capture = CapturePipeline::new(Box::new(mic));
        let output: Arc<dyn AudioOutput> = Arc::new(SpeakerOutput::new()?);

        Self::open(options, Box::new(channel), capture, output).await
    }

    /// Wire a session over an already-connected channel.
    ///
    /// This is the seam the tests use: any `LiveChannel`, frame source and
    /// audio output can be substituted.
    pub async fn open(
        options: SessionOptions,
        mut channel: Box<dyn LiveChannel>,
        mut capture: CapturePipeline,
        output: Arc<dyn AudioOutput>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cell = StateCell {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            events: events_tx.clone(),
        };

        cell.set(SessionState::Connecting);

        let channel_events = channel.take_events().ok_or_else(|| {
            SessionError::InvalidState("channel event stream already taken".to_string())
        })?;

        cell.set(SessionState::Open);

        // Outbound leg: microphone -> encoder -> channel queue
        if let Err(e) = capture.start(channel.sender()) {
            channel.close();
            return Err(e);
        }

        cell.set(SessionState::Streaming);

        let id = Uuid::new_v4().to_string();
        let scheduler = Arc::new(PlaybackScheduler::new(output));
        let capture = Arc::new(Mutex::new(capture));

        info!(
            session = %id,
            persona = %options.persona.name,
            language = %options.language.code,
            "Live session streaming"
        );

        // Inbound leg: channel events -> transcript/scheduler, arrival order
        tokio::spawn(dispatch_loop(
            channel_events,
            Arc::clone(&scheduler),
            cell.clone(),
            Arc::clone(&capture),
            options.playback_sample_rate,
            options.channels,
        ));

        // Speaking indicator: scheduler Active/Idle -> collaborator events
        let mut playback_state = scheduler.subscribe();
        let speaking_events = events_tx.clone();
        tokio::spawn(async move {
            let mut last = *playback_state.borrow();
            while playback_state.changed().await.is_ok() {
                let current = *playback_state.borrow();
                if current != last {
                    last = current;
                    let speaking = current == PlaybackState::Active;
                    if speaking_events.send(SessionEvent::Speaking(speaking)).is_err() {
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                id,
                cell,
                capture,
                channel,
                scheduler,
                closed: false,
            },
            events_rx,
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.cell.get()
    }

    /// Shared handle for the session registry; reflects every transition.
    pub fn state_handle(&self) -> Arc<RwLock<SessionState>> {
        Arc::clone(&self.cell.state)
    }

    pub fn is_playback_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    /// Close the session: stop the microphone, release the channel and reset
    /// the playback clock. Safe to call multiple times and from `Errored`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.cell.set(SessionState::Closing);

        // The frame source disconnects before the device is released, so no
        // chunk can chase the channel after this block.
        let (sent, dropped) = {
            let mut capture = self.capture.lock().unwrap();
            capture.stop();
            (capture.frames_sent(), capture.frames_dropped())
        };

        self.channel.close();
        self.scheduler.interrupt();

        self.cell.set(SessionState::Idle);
        info!(
            session = %self.id,
            frames_sent = sent,
            frames_dropped = dropped,
            "Live session closed"
        );
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Dispatch inbound channel events in arrival order.
///
/// Decoding is synchronous, so scheduled start times follow arrival order by
/// construction; a malformed fragment is logged and dropped without touching
/// the session.
async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    scheduler: Arc<PlaybackScheduler>,
    cell: StateCell,
    capture: Arc<Mutex<CapturePipeline>>,
    playback_sample_rate: u32,
    channels: u16,
) {
    let mut turn = TurnAccumulator::new();

    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Message(message) => match message {
                ServerMessage::OutputTranscript { text } => turn.push_output(&text),
                ServerMessage::InputTranscript { text } => turn.push_input(&text),
                ServerMessage::TurnComplete => {
                    for item in turn.flush(Utc::now()) {
                        let _ = cell.events.send(SessionEvent::Transcript(item));
                    }
                }
                ServerMessage::Audio { data } => {
                    let chunk = EncodedChunk::from_base64(data);
                    let decoded = codec::decode_chunk(&chunk).and_then(|bytes| {
                        codec::decode_to_audio_buffer(&bytes, playback_sample_rate, channels)
                    });
                    match decoded {
                        Ok(buffer) => {
                            if cell.get() == SessionState::Interrupted {
                                cell.set(SessionState::Streaming);
                            }
                            scheduler.schedule(buffer);
                        }
                        Err(e) => {
                            // Degrade gracefully: drop this fragment only
                            warn!("Dropping malformed audio fragment: {}", e);
                        }
                    }
                }
                ServerMessage::Interrupted => {
                    scheduler.interrupt();
                    cell.set(SessionState::Interrupted);
                }
                ServerMessage::Error { message } => {
                    fail_session(&cell, &capture, &scheduler, message);
                    break;
                }
            },
            ChannelEvent::Closed => {
                // Expected during shutdown; anything else is a lost channel
                if matches!(
                    cell.get(),
                    SessionState::Open | SessionState::Streaming | SessionState::Interrupted
                ) {
                    fail_session(&cell, &capture, &scheduler, "channel closed".to_string());
                }
                break;
            }
            ChannelEvent::TransportError(message) => {
                fail_session(&cell, &capture, &scheduler, message);
                break;
            }
        }
    }
}

/// Terminal error path: mark the session errored, silence both directions and
/// surface a reconnect-needed error. The owner completes teardown via
/// `close()`, which stays idempotent.
fn fail_session(
    cell: &StateCell,
    capture: &Arc<Mutex<CapturePipeline>>,
    scheduler: &Arc<PlaybackScheduler>,
    message: String,
) {
    warn!("Live session errored: {}", message);
    cell.set(SessionState::Errored);
    let _ = cell.events.send(SessionEvent::Error {
        kind: "connection_error",
        message: format!("Session error: {}. Please reconnect.", message),
    });
    capture.lock().unwrap().stop();
    scheduler.interrupt();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::testing::{emit, ScriptedSource};
    use crate::audio::playback::NullOutput;
    use crate::session::transcript::Sender as TranscriptSender;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory channel: the test feeds `ChannelEvent`s in and observes
    /// outbound chunks on the other side.
    struct MockChannel {
        chunk_tx: mpsc::Sender<EncodedChunk>,
        events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
        closed: Arc<AtomicBool>,
    }

    struct MockChannelHandles {
        inbound: mpsc::UnboundedSender<ChannelEvent>,
        outbound: mpsc::Receiver<EncodedChunk>,
        closed: Arc<AtomicBool>,
    }

    fn mock_channel() -> (MockChannel, MockChannelHandles) {
        let (chunk_tx, outbound) = mpsc::channel(8);
        let (inbound, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            MockChannel {
                chunk_tx,
                events: Some(events_rx),
                closed: Arc::clone(&closed),
            },
            MockChannelHandles {
                inbound,
                outbound,
                closed,
            },
        )
    }

    impl LiveChannel for MockChannel {
        fn sender(&self) -> mpsc::Sender<EncodedChunk> {
            self.chunk_tx.clone()
        }

        fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
            self.events.take()
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            persona: crate::persona::preset_personas()[0].clone(),
            language: crate::persona::default_language(),
            playback_sample_rate: 24_000,
            channels: 1,
        }
    }

    async fn open_session(
        source: ScriptedSource,
    ) -> (
        LiveSession,
        mpsc::UnboundedReceiver<SessionEvent>,
        MockChannelHandles,
    ) {
        let (channel, handles) = mock_channel();
        let capture = CapturePipeline::new(Box::new(source));
        let (session, events) = LiveSession::open(
            options(),
            Box::new(channel),
            capture,
            Arc::new(NullOutput),
        )
        .await
        .unwrap();
        (session, events, handles)
    }

    fn drain_states(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionState> {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::State(s) = event {
                states.push(s);
            }
        }
        states
    }

    async fn yield_briefly() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_open_reaches_streaming_and_wires_capture() {
        let (source, sink) = ScriptedSource::new();
        let (session, mut events, mut handles) = open_session(source).await;

        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(
            drain_states(&mut events),
            vec![
                SessionState::Connecting,
                SessionState::Open,
                SessionState::Streaming
            ]
        );

        // Microphone frames come out of the channel as encoded chunks
        emit(&sink, &[0.0, 0.5, -0.5, 0.25]);
        let chunk = handles.outbound.try_recv().unwrap();
        assert_eq!(chunk, codec::encode_frame(&[0.0, 0.5, -0.5, 0.25]));
    }

    #[tokio::test]
    async fn test_mic_denial_fails_open_and_closes_channel() {
        let (channel, handles) = mock_channel();
        let capture = CapturePipeline::new(Box::new(ScriptedSource::denied()));
        let result =
            LiveSession::open(options(), Box::new(channel), capture, Arc::new(NullOutput)).await;

        match result {
            Err(SessionError::Permission(_)) => {}
            other => panic!("expected permission error, got {:?}", other.err()),
        }
        assert!(handles.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_transcript_flush_order_and_empty_rules() {
        let (source, _sink) = ScriptedSource::new();
        let (_session, mut events, handles) = open_session(source).await;
        drain_states(&mut events);

        let send = |m: ServerMessage| handles.inbound.send(ChannelEvent::Message(m)).unwrap();
        send(ServerMessage::OutputTranscript { text: "Hello, ".into() });
        send(ServerMessage::InputTranscript { text: "Hi".into() });
        send(ServerMessage::OutputTranscript { text: "friend".into() });
        send(ServerMessage::TurnComplete);
        yield_briefly().await;

        let mut items = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Transcript(item) = event {
                items.push(item);
            }
        }
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].sender, TranscriptSender::User);
        assert_eq!(items[0].text, "Hi");
        assert_eq!(items[1].sender, TranscriptSender::Assistant);
        assert_eq!(items[1].text, "Hello, friend");

        // A turn with no accumulated text emits nothing
        send(ServerMessage::TurnComplete);
        yield_briefly().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_fragments_schedule_and_interrupt_flushes() {
        let (source, _sink) = ScriptedSource::new();
        let (session, mut events, handles) = open_session(source).await;
        drain_states(&mut events);

        let fragment = codec::encode_frame(&vec![0.1f32; 24_000]); // 1s at 24kHz
        handles
            .inbound
            .send(ChannelEvent::Message(ServerMessage::Audio { data: fragment.data }))
            .unwrap();
        yield_briefly().await;
        assert!(!session.is_playback_idle());

        handles
            .inbound
            .send(ChannelEvent::Message(ServerMessage::Interrupted))
            .unwrap();
        yield_briefly().await;
        assert!(session.is_playback_idle());
        assert_eq!(session.state(), SessionState::Interrupted);

        // The next fragment resumes streaming from the reset baseline
        let fragment = codec::encode_frame(&vec![0.1f32; 2_400]);
        handles
            .inbound
            .send(ChannelEvent::Message(ServerMessage::Audio { data: fragment.data }))
            .unwrap();
        yield_briefly().await;
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[tokio::test]
    async fn test_malformed_fragment_is_dropped_session_continues() {
        let (source, _sink) = ScriptedSource::new();
        let (session, mut events, handles) = open_session(source).await;
        drain_states(&mut events);

        handles
            .inbound
            .send(ChannelEvent::Message(ServerMessage::Audio {
                data: "!!!not-base64!!!".into(),
            }))
            .unwrap();
        yield_briefly().await;

        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.is_playback_idle());
    }

    #[tokio::test]
    async fn test_channel_error_marks_session_errored() {
        let (source, sink) = ScriptedSource::new();
        let (session, mut events, mut handles) = open_session(source).await;
        drain_states(&mut events);

        handles
            .inbound
            .send(ChannelEvent::Message(ServerMessage::Error {
                message: "quota exceeded".into(),
            }))
            .unwrap();
        yield_briefly().await;

        assert_eq!(session.state(), SessionState::Errored);
        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Error { kind, message } = event {
                assert_eq!(kind, "connection_error");
                assert!(message.contains("reconnect") || message.contains("Reconnect"));
                saw_error = true;
            }
        }
        assert!(saw_error);

        // Capture was stopped: further frames never reach the channel
        emit(&sink, &[0.5; 4]);
        assert!(handles.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (source, sink) = ScriptedSource::new();
        let (mut session, _events, mut handles) = open_session(source).await;

        session.close();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(handles.closed.load(Ordering::SeqCst));

        // Second close is a no-op, not a panic
        session.close();
        assert_eq!(session.state(), SessionState::Idle);

        emit(&sink, &[0.5; 4]);
        assert!(handles.outbound.try_recv().is_err());
    }
}
