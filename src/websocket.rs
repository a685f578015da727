//! # Live Session WebSocket Handler
//!
//! The dashboard connects to `/ws/live` to drive a live voice conversation
//! hosted by this backend. The socket carries control messages and session
//! events; the audio itself stays on the host devices (microphone in,
//! speaker out) and on the model channel.
//!
//! ## WebSocket Protocol:
//! - **Client -> Server**: `start_live { persona_id, language }`,
//!   `stop_live`, `pong`
//! - **Server -> Client**: `session_status`, `transcript`, `speaking`,
//!   `error`, `ping`
//!
//! Each connection hosts at most one live session; closing the socket closes
//! the session.

use crate::error::SessionError;
use crate::persona;
use crate::session::controller::{LiveSession, SessionEvent, SessionOptions, SessionState};
use crate::session::registry::SessionRecord;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

/// How often the server pings an idle client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long without any client sign of life before the socket is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket message types for dashboard-server communication.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SocketMessage {
    /// Start a live conversation with the given persona and language
    #[serde(rename = "start_live")]
    StartLive {
        /// Persona id from the vault; defaults to the first preset
        persona_id: Option<String>,
        /// Language code; defaults to en-US
        language: Option<String>,
    },

    /// Stop the running live conversation
    #[serde(rename = "stop_live")]
    StopLive,

    /// Session state updates
    #[serde(rename = "session_status")]
    SessionStatus {
        session_id: Option<String>,
        status: String,
        message: Option<String>,
    },

    /// A finished transcript line
    #[serde(rename = "transcript")]
    Transcript {
        session_id: String,
        sender: String,
        text: String,
        timestamp: String,
    },

    /// Whether the persona is currently speaking
    #[serde(rename = "speaking")]
    Speaking { session_id: String, active: bool },

    /// Error messages
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        session_id: Option<String>,
    },

    /// Heartbeat ping (server -> client)
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },

    /// Heartbeat pong (client -> server)
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// WebSocket actor hosting one dashboard connection.
pub struct LiveSocket {
    app_state: web::Data<AppState>,

    /// The live session owned by this connection, if one is running
    session: Option<LiveSession>,

    /// Id of the current (or last) session, for message labeling
    session_id: Option<String>,

    /// A session open is in flight; rejects concurrent start requests
    opening: bool,

    last_heartbeat: Instant,
}

impl LiveSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            app_state,
            session: None,
            session_id: None,
            opening: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &SocketMessage) {
        if let Ok(json) = serde_json::to_string(message) {
            ctx.text(json);
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!("Live socket error {}: {}", code, message);
        self.send_message(
            ctx,
            &SocketMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
                session_id: self.session_id.clone(),
            },
        );
    }

    /// Kick off a session open; completion arrives as a `SessionOpened` or
    /// `SessionFailed` actor message.
    fn handle_start_live(
        &mut self,
        persona_id: Option<String>,
        language: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if self.session.is_some() || self.opening {
            self.send_error(ctx, "session_active", "A live session is already running");
            return;
        }

        let registry = self.app_state.registry();
        if registry.active_count() >= registry.max_concurrent() {
            self.send_error(
                ctx,
                "capacity",
                &format!(
                    "Maximum concurrent sessions ({}) reached",
                    registry.max_concurrent()
                ),
            );
            return;
        }

        let config = self.app_state.get_config();
        let studio = self.app_state.studio();

        let persona = match persona_id {
            Some(id) => match studio.find_persona(&id) {
                Some(p) => p,
                None => {
                    self.send_error(ctx, "unknown_persona", &format!("No persona with id '{}'", id));
                    return;
                }
            },
            None => studio.personas()[0].clone(),
        };

        let language = language
            .and_then(|code| persona::find_language(&code))
            .unwrap_or_else(persona::default_language);

        let options = SessionOptions {
            persona: persona.clone(),
            language: language.clone(),
            playback_sample_rate: config.audio.playback_sample_rate,
            channels: config.audio.channels,
        };

        self.opening = true;
        let addr = ctx.address();

        tokio::spawn(async move {
            match LiveSession::connect(options, &config).await {
                Ok((session, events)) => {
                    addr.do_send(SessionOpened {
                        session,
                        events,
                        persona_name: persona.name,
                        language: language.code,
                    });
                }
                Err(error) => {
                    addr.do_send(SessionFailed { error });
                }
            }
        });
    }

    /// Close the session (if any) and release its registry slot.
    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            if let Some(id) = &self.session_id {
                self.app_state.registry().remove(id);
            }
            self.app_state.decrement_active_sessions();
        }
    }
}

/// A session open completed; hand ownership to the actor.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionOpened {
    session: LiveSession,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    persona_name: String,
    language: String,
}

/// A session open failed.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionFailed {
    error: SessionError,
}

impl Actor for LiveSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Live socket connected");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Live socket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            let ping = SocketMessage::Ping { timestamp };
            if let Ok(json) = serde_json::to_string(&ping) {
                ctx.text(json);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Live socket disconnected");
        self.teardown_session();
    }
}

/// Incoming WebSocket frames from the dashboard.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<SocketMessage>(&text) {
                Ok(SocketMessage::StartLive { persona_id, language }) => {
                    self.handle_start_live(persona_id, language, ctx);
                }
                Ok(SocketMessage::StopLive) => {
                    self.teardown_session();
                    self.send_message(
                        ctx,
                        &SocketMessage::SessionStatus {
                            session_id: self.session_id.clone(),
                            status: SessionState::Idle.as_str().to_string(),
                            message: Some("Session stopped".to_string()),
                        },
                    );
                }
                Ok(SocketMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Ok(_) => {
                    warn!("Unexpected message type from dashboard client");
                }
                Err(err) => {
                    self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err));
                }
            },
            Ok(ws::Message::Binary(_)) => {
                // Audio never travels over this socket; the devices are local
                warn!("Unexpected binary frame on live socket");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Live socket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Live socket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Session events streamed into the actor (added via `ctx.add_stream`).
impl StreamHandler<SessionEvent> for LiveSocket {
    fn handle(&mut self, event: SessionEvent, ctx: &mut Self::Context) {
        let session_id = self.session_id.clone().unwrap_or_default();

        match event {
            SessionEvent::State(state) => {
                self.send_message(
                    ctx,
                    &SocketMessage::SessionStatus {
                        session_id: Some(session_id),
                        status: state.as_str().to_string(),
                        message: None,
                    },
                );

                // A dead channel cannot recover; release the devices now so
                // the dashboard can reconnect immediately
                if state == SessionState::Errored {
                    self.teardown_session();
                }
            }
            SessionEvent::Transcript(item) => {
                self.send_message(
                    ctx,
                    &SocketMessage::Transcript {
                        session_id,
                        sender: match item.sender {
                            crate::session::transcript::Sender::User => "user".to_string(),
                            crate::session::transcript::Sender::Assistant => "assistant".to_string(),
                        },
                        text: item.text,
                        timestamp: item.timestamp.to_rfc3339(),
                    },
                );
            }
            SessionEvent::Speaking(active) => {
                self.send_message(ctx, &SocketMessage::Speaking { session_id, active });
            }
            SessionEvent::Error { kind, message } => {
                self.send_message(
                    ctx,
                    &SocketMessage::Error {
                        code: kind.to_string(),
                        message,
                        session_id: Some(session_id),
                    },
                );
            }
        }
    }

    /// The session's event stream drained (session closed); the socket stays
    /// open so the dashboard can start a new session.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl Handler<SessionOpened> for LiveSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionOpened, ctx: &mut Self::Context) {
        self.opening = false;

        let session_id = msg.session.id().to_string();
        let record = SessionRecord::new(
            session_id.clone(),
            msg.persona_name,
            msg.language,
            msg.session.state_handle(),
        );

        if let Err(err) = self.app_state.registry().register(record) {
            // Capacity raced with another socket; give the slot back
            let mut session = msg.session;
            session.close();
            self.send_error(ctx, "capacity", &err);
            return;
        }

        self.app_state.increment_active_sessions();
        self.session_id = Some(session_id.clone());
        self.session = Some(msg.session);
        ctx.add_stream(UnboundedReceiverStream::new(msg.events));

        info!(session = %session_id, "Live session attached to socket");
        self.send_message(
            ctx,
            &SocketMessage::SessionStatus {
                session_id: Some(session_id),
                status: SessionState::Streaming.as_str().to_string(),
                message: Some("Live session established".to_string()),
            },
        );
    }
}

impl Handler<SessionFailed> for LiveSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionFailed, ctx: &mut Self::Context) {
        self.opening = false;
        let message = msg.error.to_string();
        self.send_error(ctx, msg.error.kind(), &message);
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a `LiveSocket` actor.
pub async fn live_socket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New live socket request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(LiveSocket::new(app_state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_live_message_parsing() {
        let msg: SocketMessage = serde_json::from_str(
            r#"{"type":"start_live","persona_id":"kore-persona","language":"ja-JP"}"#,
        )
        .unwrap();

        match msg {
            SocketMessage::StartLive { persona_id, language } => {
                assert_eq!(persona_id.as_deref(), Some("kore-persona"));
                assert_eq!(language.as_deref(), Some("ja-JP"));
            }
            _ => panic!("wrong message type"),
        }

        // Both fields are optional
        let msg: SocketMessage = serde_json::from_str(r#"{"type":"start_live"}"#).unwrap();
        assert!(matches!(
            msg,
            SocketMessage::StartLive { persona_id: None, language: None }
        ));
    }

    #[test]
    fn test_outbound_message_serialization() {
        let status = SocketMessage::SessionStatus {
            session_id: Some("abc".to_string()),
            status: "streaming".to_string(),
            message: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""type":"session_status""#));
        assert!(json.contains(r#""status":"streaming""#));

        let error = SocketMessage::Error {
            code: "permission_error".to_string(),
            message: "Microphone access denied".to_string(),
            session_id: None,
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("permission_error"));
        assert!(json.contains("Microphone access denied"));
    }
}
