//! RTSP/1.0 client.
//!
//! The sans-IO pieces ([`parser`], [`request`], [`queue`], [`auth`],
//! [`transport`] and [`engine`]) hold every protocol rule. [`client`] runs
//! them on a tokio task over a TCP (or HTTP-tunneled) connection, and
//! [`orchestrator`] walks a media session through DESCRIBE, SETUP and PLAY.

/// Basic and Digest authentication
pub mod auth;
/// Async client handle and connection task
pub mod client;
/// TCP and HTTP-tunnel byte stream
pub mod connection;
pub mod engine;
pub mod orchestrator;
pub mod parser;
/// CSeq correlation of responses to requests
pub mod queue;
pub mod request;
pub mod sdp;
pub mod session;
/// `Transport:` header negotiation
pub mod transport;
/// RTSP URL handling
pub mod url;

pub use client::{ConnectionInfo, RtspClient};
pub use engine::{Disposition, Engine, Prepared};
pub use orchestrator::{OrchestratorState, SessionEvent, SessionOrchestrator};
pub use parser::{InterleavedFrame, Response, ResponseParser, RtpInfo};
pub use request::{
    Command, CommandResult, PendingRequest, PlayRange, Reply, ResponseHandler, SessionTarget,
    SubsessionTarget,
};
pub use sdp::{SdpSession, SdpSubsession, SessionDescription};
pub use session::{ByeHandler, MediaSession, MediaSubsession};
pub use transport::{CastType, TransportParams};
pub use self::url::RtspUrl;
