//! DESCRIBE → SETUP per subsession → PLAY, then TEARDOWN on BYE or error.
//!
//! Authentication retries and redirects happen below this layer, inside the
//! connection task, so a step that comes back here has either succeeded or
//! failed for good.

use super::client::RtspClient;
use super::request::{PendingRequest, PlayRange, ResponseHandler, SessionTarget, SubsessionTarget};
use super::sdp::SdpSession;
use super::session::{ByeHandler, MediaSession, MediaSubsession};
use crate::{Result, RtspError};
use log::{debug, info, warn};
use std::fmt;
use tokio::sync::mpsc;

/// Where a [`SessionOrchestrator`] is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Not started.
    Idle,
    /// DESCRIBE sent.
    AwaitingDescribe,
    /// Setting up the subsession at this index.
    SettingUpSubsessions(usize),
    /// PLAY succeeded.
    Playing,
    /// TEARDOWN sent.
    TearingDown,
    /// Finished; the orchestrator cannot be restarted.
    Closed,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Idle => f.write_str("idle"),
            OrchestratorState::AwaitingDescribe => f.write_str("awaiting DESCRIBE"),
            OrchestratorState::SettingUpSubsessions(i) => write!(f, "setting up subsession {}", i),
            OrchestratorState::Playing => f.write_str("playing"),
            OrchestratorState::TearingDown => f.write_str("tearing down"),
            OrchestratorState::Closed => f.write_str("closed"),
        }
    }
}

/// Progress reported to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// DESCRIBE succeeded.
    Described {
        /// Number of streams in the description.
        subsessions: usize,
    },
    /// SETUP succeeded for a subsession.
    SubsessionReady {
        /// Index of the subsession.
        index: usize,
    },
    /// A subsession failed to initiate or set up and was left out.
    SubsessionSkipped {
        /// Index of the subsession.
        index: usize,
        /// The error that caused the skip.
        reason: String,
    },
    /// PLAY succeeded.
    Playing,
    /// The server ended a subsession; the session is being torn down.
    ByeReceived {
        /// Index of the subsession.
        index: usize,
    },
    /// The session is finished.
    Closed,
}

/// Builds the media session out of a DESCRIBE body.
pub type SessionFactory<S> = Box<dyn FnMut(&str) -> Result<S> + Send>;

/// Drives one media session over an [`RtspClient`].
pub struct SessionOrchestrator<S: MediaSession> {
    client: RtspClient,
    factory: SessionFactory<S>,
    session: Option<S>,
    state: OrchestratorState,
    ready: Vec<usize>,
    bye_tx: mpsc::UnboundedSender<usize>,
    bye_rx: mpsc::UnboundedReceiver<usize>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl SessionOrchestrator<SdpSession> {
    /// Orchestrator whose session is parsed from the SDP in the DESCRIBE
    /// reply, with client ports starting at `client_port_base`.
    pub fn with_sdp(client: RtspClient, client_port_base: u16) -> Self {
        Self::new(
            client,
            Box::new(move |sdp: &str| SdpSession::parse(sdp, client_port_base)),
        )
    }
}

impl<S: MediaSession> SessionOrchestrator<S> {
    /// Orchestrator whose session is built by `factory` from the DESCRIBE
    /// body.
    pub fn new(client: RtspClient, factory: SessionFactory<S>) -> Self {
        let (bye_tx, bye_rx) = mpsc::unbounded_channel();
        Self {
            client,
            factory,
            session: None,
            state: OrchestratorState::Idle,
            ready: Vec::new(),
            bye_tx,
            bye_rx,
            events: None,
        }
    }

    /// Sends [`SessionEvent`]s to `events` as the session progresses.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// The described session, once DESCRIBE has succeeded.
    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    /// Indices of the subsessions SETUP succeeded for.
    pub fn ready_subsessions(&self) -> &[usize] {
        &self.ready
    }

    /// The client commands are sent through.
    pub fn client(&self) -> &RtspClient {
        &self.client
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn enter(&mut self, state: OrchestratorState) {
        debug!("Session {} -> {}", self.state, state);
        self.state = state;
    }

    /// Runs DESCRIBE, SETUP for every subsession that initiates, then PLAY.
    ///
    /// A subsession that fails to initiate or set up is skipped. A DESCRIBE
    /// or PLAY failure tears the session down and is returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != OrchestratorState::Idle {
            return Err(RtspError::Protocol(format!("cannot start while {}", self.state)));
        }

        self.enter(OrchestratorState::AwaitingDescribe);
        let session = match self.describe().await {
            Ok(session) => session,
            Err(e) => {
                warn!("DESCRIBE failed: {}", e);
                self.enter(OrchestratorState::Closed);
                self.emit(SessionEvent::Closed);
                return Err(e);
            }
        };
        self.emit(SessionEvent::Described {
            subsessions: session.subsessions().len(),
        });
        self.session = Some(session);

        self.setup_subsessions().await;

        if let Err(e) = self.play().await {
            warn!("PLAY failed: {}", e);
            self.teardown().await;
            return Err(e);
        }
        self.enter(OrchestratorState::Playing);
        self.emit(SessionEvent::Playing);
        Ok(())
    }

    async fn describe(&mut self) -> Result<S> {
        let reply = self.client.describe().await?;
        let session = (self.factory)(&reply.body)?;
        if !session.has_subsessions() {
            return Err(RtspError::Protocol("session description has no media".into()));
        }
        info!("Described session with {} subsessions", session.subsessions().len());
        Ok(session)
    }

    async fn setup_subsessions(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let count = session.subsessions().len();
        let aggregate = session.control_path().map(String::from);

        for index in 0..count {
            debug!("Session {} -> {}", self.state, OrchestratorState::SettingUpSubsessions(index));
            self.state = OrchestratorState::SettingUpSubsessions(index);
            let subsession = &mut session.subsessions_mut()[index];

            if let Err(e) = subsession.initiate().await {
                warn!("Skipping {} subsession {}: {}", subsession.medium_name(), index, e);
                if let Some(events) = &self.events {
                    let _ = events.send(SessionEvent::SubsessionSkipped {
                        index,
                        reason: e.to_string(),
                    });
                }
                continue;
            }

            let target = SubsessionTarget {
                index,
                control: subsession.control_path().map(String::from),
                protocol_name: subsession.protocol_name().to_string(),
                client_port: subsession.client_port(),
                rtcp_muxed: subsession.rtcp_is_muxed(),
                multicast: subsession.is_multicast(),
            };
            let request = PendingRequest::setup(target, ResponseHandler::Ignore)
                .with_session(SessionTarget {
                    control: aggregate.clone(),
                });

            let event = match self.client.execute(request).await {
                Ok(reply) => {
                    if let Some(id) = reply.session_id() {
                        subsession.set_session_id(&id);
                    }
                    if let Some(params) = &reply.transport {
                        subsession.apply_transport(params);
                    }
                    subsession.register_bye_handler(ByeHandler::new(index, self.bye_tx.clone()));
                    self.ready.push(index);
                    SessionEvent::SubsessionReady { index }
                }
                Err(e) => {
                    warn!(
                        "SETUP of {} subsession {} failed: {}",
                        subsession.medium_name(),
                        index,
                        e
                    );
                    SessionEvent::SubsessionSkipped {
                        index,
                        reason: e.to_string(),
                    }
                }
            };
            if let Some(events) = &self.events {
                let _ = events.send(event);
            }
        }
    }

    fn session_target(&self) -> SessionTarget {
        SessionTarget {
            control: self
                .session
                .as_ref()
                .and_then(|s| s.control_path())
                .map(String::from),
        }
    }

    async fn play(&mut self) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            return Err(RtspError::NoActiveSession("PLAY"));
        };
        let range = match session.absolute_start_time() {
            Some(start) => PlayRange {
                absolute_start: Some(start.to_string()),
                absolute_end: session.absolute_end_time().map(String::from),
                ..PlayRange::default()
            },
            None => PlayRange::npt(session.play_start_time(), session.play_end_time()),
        };
        self.client.play(self.session_target(), range, 1.0).await?;
        info!("Session playing");
        Ok(())
    }

    /// Waits until a subsession reports BYE, then tears the session down.
    /// Returns the index of that subsession, or `None` if the session was
    /// not playing.
    pub async fn run_until_bye(&mut self) -> Option<usize> {
        if self.state != OrchestratorState::Playing {
            return None;
        }
        let index = self.bye_rx.recv().await?;
        info!("BYE on subsession {}", index);
        self.emit(SessionEvent::ByeReceived { index });
        self.teardown().await;
        Some(index)
    }

    /// Sends TEARDOWN and moves to `Closed` whatever the reply. The
    /// connection stays open; close it through the client.
    pub async fn teardown(&mut self) {
        if self.state == OrchestratorState::Closed {
            return;
        }
        self.enter(OrchestratorState::TearingDown);
        if let Err(e) = self.client.teardown(self.session_target()).await {
            debug!("TEARDOWN: {}", e);
        }
        self.enter(OrchestratorState::Closed);
        self.emit(SessionEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    async fn idle_session() -> (TcpListener, SessionOrchestrator<SdpSession>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("rtsp://127.0.0.1:{}/stream", listener.local_addr().unwrap().port());
        let client = RtspClient::connect(ClientConfig::new(&url)).await.unwrap();
        (listener, SessionOrchestrator::with_sdp(client, 5000))
    }

    #[test]
    fn test_state_names() {
        assert_eq!(OrchestratorState::Idle.to_string(), "idle");
        assert_eq!(
            OrchestratorState::SettingUpSubsessions(2).to_string(),
            "setting up subsession 2"
        );
        assert_eq!(OrchestratorState::TearingDown.to_string(), "tearing down");
    }

    #[tokio::test]
    async fn test_teardown_before_start_closes() {
        let (_listener, session) = idle_session().await;
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut session = session.with_events(events_tx);

        assert_eq!(session.run_until_bye().await, None);
        assert!(session.session().is_none());

        session.teardown().await;
        assert_eq!(session.state(), OrchestratorState::Closed);
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::Closed));

        assert!(matches!(session.start().await, Err(RtspError::Protocol(_))));
        assert_eq!(session.state(), OrchestratorState::Closed);
        session.client().close().await;
    }
}
