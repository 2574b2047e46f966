/// Channel id meaning "not interleaved over TCP".
pub const NO_CHANNEL: u8 = 0xFF;

/// Whether a stream is delivered to one receiver or a multicast group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CastType {
    /// One receiver.
    Unicast,
    /// A multicast group.
    Multicast,
}

/// Outcome of negotiating a subsession's `Transport:` header.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportParams {
    /// Server RTP port, or the multicast group port.
    pub server_port: u16,
    /// Interleaved RTP channel, [`NO_CHANNEL`] over UDP.
    pub rtp_channel: u8,
    /// Interleaved RTCP channel, [`NO_CHANNEL`] over UDP.
    pub rtcp_channel: u8,
    /// `source=` for unicast, `destination=` for multicast.
    pub server_address: Option<String>,
    /// Unicast or multicast delivery.
    pub cast_type: CastType,
}

impl TransportParams {
    /// Returns true if the stream goes to a multicast group.
    pub fn is_multicast(&self) -> bool {
        self.cast_type == CastType::Multicast
    }

    /// Returns true if RTP/RTCP arrive on the control connection.
    pub fn is_interleaved(&self) -> bool {
        self.rtp_channel != NO_CHANNEL
    }
}

fn leading_port(value: &str) -> Option<u16> {
    value.split('-').next()?.trim().parse().ok()
}

fn channel_pair(value: &str) -> Option<(u8, u8)> {
    let (rtp, rtcp) = value.split_once('-')?;
    Some((rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?))
}

/// Parses the `Transport:` header of a SETUP reply.
///
/// Multicast is assumed until a `unicast` token says otherwise. A multicast
/// result needs both `destination=` and `port=`; a unicast result needs one
/// of `interleaved=`, `server_port=` or `client_port=`. When the server
/// omits `server_port`, the echoed client port stands in for it.
pub fn parse_transport_header(value: &str) -> Option<TransportParams> {
    let mut multicast = true;
    let mut server_port = None;
    let mut client_port = None;
    let mut multicast_port = None;
    let mut destination = None;
    let mut source = None;
    let mut channels = None;

    for field in value.split(';').map(str::trim) {
        if field == "unicast" {
            multicast = false;
        } else if field == "multicast" {
            multicast = true;
        } else if let Some(v) = field.strip_prefix("server_port=") {
            server_port = leading_port(v);
        } else if let Some(v) = field.strip_prefix("client_port=") {
            client_port = leading_port(v);
        } else if let Some(v) = field.strip_prefix("destination=") {
            destination = Some(v.to_string());
        } else if let Some(v) = field.strip_prefix("source=") {
            source = Some(v.to_string());
        } else if let Some(v) = field.strip_prefix("interleaved=") {
            channels = channel_pair(v);
        } else if let Some(v) = field.strip_prefix("port=") {
            multicast_port = leading_port(v);
        }
    }

    if multicast {
        if let (Some(address), Some(port)) = (destination, multicast_port) {
            return Some(TransportParams {
                server_port: port,
                rtp_channel: NO_CHANNEL,
                rtcp_channel: NO_CHANNEL,
                server_address: Some(address),
                cast_type: CastType::Multicast,
            });
        }
    }

    if channels.is_none() && server_port.is_none() && client_port.is_none() {
        return None;
    }
    let (rtp_channel, rtcp_channel) = channels.unwrap_or((NO_CHANNEL, NO_CHANNEL));
    Some(TransportParams {
        server_port: server_port.or(client_port).unwrap_or(0),
        rtp_channel,
        rtcp_channel,
        server_address: source,
        cast_type: CastType::Unicast,
    })
}

/// How a SETUP asks for its stream to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// RTP/RTCP on the client's UDP port pair.
    ClientPort {
        /// RTP port.
        rtp: u16,
        /// RTCP port, equal to `rtp` when muxed.
        rtcp: u16,
    },
    /// RTP/RTCP framed on the control connection.
    Interleaved {
        /// RTP channel id.
        rtp: u8,
        /// RTCP channel id.
        rtcp: u8,
    },
}

/// Builds the value of a SETUP request's `Transport:` header.
pub fn setup_transport_header(
    protocol_name: &str,
    delivery: &Delivery,
    multicast: bool,
    outgoing: bool,
) -> String {
    let (profile, cast) = match (protocol_name, delivery) {
        ("RTP", Delivery::Interleaved { .. }) => ("RTP/AVP", "/TCP;unicast"),
        ("RTP", _) if multicast => ("RTP/AVP", ";multicast"),
        ("RTP", _) => ("RTP/AVP", ";unicast"),
        (_, Delivery::Interleaved { .. }) => ("RAW/RAW/UDP", ";unicast"),
        (_, _) if multicast => ("RAW/RAW/UDP", ";multicast"),
        (_, _) => ("RAW/RAW/UDP", ";unicast"),
    };
    let mode = if outgoing { ";mode=receive" } else { "" };
    let ports = match delivery {
        Delivery::ClientPort { rtp, rtcp } => format!(";client_port={}-{}", rtp, rtcp),
        Delivery::Interleaved { rtp, rtcp } => format!(";interleaved={}-{}", rtp, rtcp),
    };
    format!("{}{}{}{}", profile, cast, mode, ports)
}
