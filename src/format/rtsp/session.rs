//! The media-session interfaces the orchestrator drives.
//!
//! The engine never owns media objects. A [`MediaSession`] is built from a
//! DESCRIBE reply by the application (or [`super::sdp::SdpSession`]) and
//! lent to the orchestrator, which reads what SETUP needs and writes back
//! what the server negotiated.

use super::transport::TransportParams;
use crate::Result;
use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

/// Lets an RTCP receiver report that the server sent BYE for a subsession.
#[derive(Debug, Clone)]
pub struct ByeHandler {
    index: usize,
    tx: mpsc::UnboundedSender<usize>,
}

impl ByeHandler {
    pub(crate) fn new(index: usize, tx: mpsc::UnboundedSender<usize>) -> Self {
        Self { index, tx }
    }

    /// Index of the subsession this handler reports for.
    pub fn subsession(&self) -> usize {
        self.index
    }

    /// Reports BYE to the orchestrator.
    pub fn notify(&self) {
        debug!("BYE received on subsession {}", self.index);
        let _ = self.tx.send(self.index);
    }
}

/// One media stream of a session.
#[async_trait]
pub trait MediaSubsession: Send {
    /// Prepares local resources for receiving (or sending) the stream.
    async fn initiate(&mut self) -> Result<()>;

    /// `"RTP"` for RTP/AVP streams; anything else is sent as raw UDP.
    fn protocol_name(&self) -> &str;

    /// `m=` media type, e.g. `video`.
    fn medium_name(&self) -> &str;

    /// `a=control:` value, relative or absolute.
    fn control_path(&self) -> Option<&str>;

    /// Client RTP port; RTCP uses the next one unless muxed.
    fn client_port(&self) -> u16;

    /// RTP and RTCP share [`MediaSubsession::client_port`].
    fn rtcp_is_muxed(&self) -> bool {
        false
    }

    /// The stream is sent to a multicast group.
    fn is_multicast(&self) -> bool {
        false
    }

    /// Stores the session id from SETUP.
    fn set_session_id(&mut self, id: &str);

    /// Stores the server port, channel ids and addresses from SETUP.
    fn apply_transport(&mut self, params: &TransportParams);

    /// True once initiated and able to produce data.
    fn has_source(&self) -> bool;

    /// Keeps `handler` for when RTCP BYE arrives.
    fn register_bye_handler(&mut self, handler: ByeHandler);
}

/// A described media session.
pub trait MediaSession: Send {
    /// The stream type of this session.
    type Subsession: MediaSubsession;

    /// Streams in description order.
    fn subsessions(&self) -> &[Self::Subsession];

    /// Streams in description order, for writing back SETUP results.
    fn subsessions_mut(&mut self) -> &mut [Self::Subsession];

    /// Returns true if the description had at least one stream.
    fn has_subsessions(&self) -> bool {
        !self.subsessions().is_empty()
    }

    /// Session-level `a=control:`, used as the aggregate URL.
    fn control_path(&self) -> Option<&str>;

    /// Start of an absolute (`clock=`) range, if the session has one.
    fn absolute_start_time(&self) -> Option<&str>;

    /// End of the absolute range.
    fn absolute_end_time(&self) -> Option<&str> {
        None
    }

    /// Relative start in seconds.
    fn play_start_time(&self) -> f64 {
        0.0
    }

    /// Relative end in seconds; negative for open-ended.
    fn play_end_time(&self) -> f64 {
        -1.0
    }
}
