//! Incremental RTSP response parser.
//!
//! Bytes from the control connection are pushed into a [`ResponseParser`]
//! as they arrive; complete messages are pulled out with
//! [`ResponseParser::next_message`]. A message may span any number of reads,
//! and one read may carry several messages. The parser yields three kinds of
//! message:
//!
//! - responses (`RTSP/x.y` or `HTTP/x.y` status lines),
//! - requests sent by the server on the same connection,
//! - `$`-framed interleaved RTP/RTCP data.

use crate::{Result, RtspError};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, warn};

/// Largest header block accepted before the terminating blank line.
pub const MAX_HEADER_BYTES: usize = 20000;

/// Largest `Content-Length` accepted. SDP and parameter bodies are small.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Parsed status line of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    /// Three-digit status code.
    pub code: u16,
    /// Reason phrase, possibly empty.
    pub reason: String,
}

/// The response headers the engine acts on. Everything else is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHeaders {
    /// `CSeq`
    pub cseq: Option<u32>,
    /// `Content-Length`
    pub content_length: Option<usize>,
    /// `Content-Base`
    pub content_base: Option<String>,
    /// `Session`, including any `;timeout=` parameter.
    pub session: Option<String>,
    /// `Transport`
    pub transport: Option<String>,
    /// `Scale`
    pub scale: Option<String>,
    /// `Range`
    pub range: Option<String>,
    /// `RTP-Info`
    pub rtp_info: Option<String>,
    /// `WWW-Authenticate`; Digest when the server offered it.
    pub www_authenticate: Option<String>,
    /// `Public`
    pub public: Option<String>,
    /// `Allow`
    pub allow: Option<String>,
    /// `Location`
    pub location: Option<String>,
}

/// A complete response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status line.
    pub status: StatusLine,
    /// Recognised headers.
    pub headers: ResponseHeaders,
    /// Body as text; empty when there is none.
    pub body: String,
}

/// A request the server sent to us on the control connection.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    /// Request method, e.g. `OPTIONS` or `ANNOUNCE`.
    pub method: String,
    /// Request target.
    pub uri: String,
    /// The server's CSeq, echoed in our reply.
    pub cseq: Option<u32>,
}

/// One `$`-framed chunk of interleaved media data.
#[derive(Debug, Clone, PartialEq)]
pub struct InterleavedFrame {
    /// Channel id from SETUP's `interleaved=` pair.
    pub channel: u8,
    /// RTP or RTCP packet.
    pub payload: Bytes,
}

/// Anything that can arrive on the control connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A response to one of our requests.
    Response(Response),
    /// A request from the server.
    Request(IncomingRequest),
    /// Media data.
    Interleaved(InterleavedFrame),
}

/// Accumulates bytes across reads and splits them into messages.
#[derive(Debug, Default)]
pub struct ResponseParser {
    buffer: BytesMut,
}

impl ResponseParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends bytes read from the connection.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes held waiting for the rest of a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pulls the next complete message out of the buffer.
    ///
    /// `Ok(None)` means more bytes are needed. An error means one message
    /// was malformed and has been dropped; the caller may keep calling.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let leading = self
            .buffer
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        self.buffer.advance(leading);

        if self.buffer.is_empty() {
            return Ok(None);
        }
        if self.buffer[0] == b'$' {
            return Ok(self.next_interleaved());
        }

        let Some((lines, header_end)) = header_block(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                let dropped = self.buffer.len();
                self.buffer.clear();
                return Err(RtspError::MalformedResponse(format!(
                    "no end of headers within {} bytes",
                    dropped
                )));
            }
            return Ok(None);
        };

        let Some(first) = lines.first() else {
            self.buffer.advance(header_end);
            return Ok(None);
        };

        let headers = match parse_headers(&lines[1..]) {
            Ok(headers) => headers,
            Err(e) => {
                warn!("Dropping message '{}': {}", first, e);
                self.buffer.advance(header_end);
                return Err(e);
            }
        };

        if let Some(declared) = headers.content_length.filter(|&n| n > MAX_BODY_BYTES) {
            warn!("Dropping message '{}' with a {} byte body", first, declared);
            self.buffer.clear();
            return Err(RtspError::MalformedResponse(format!(
                "Content-Length {} exceeds {} bytes",
                declared, MAX_BODY_BYTES
            )));
        }

        let rest = &self.buffer[header_end..];
        let body_len = match headers.content_length {
            Some(n) => n,
            _ if looks_like_message_start(rest) => 0,
            _ => rest.len(),
        };
        if rest.len() < body_len {
            return Ok(None);
        }

        let body = String::from_utf8_lossy(&rest[..body_len]).into_owned();
        let message = match parse_status_line(first) {
            Some(status) => Message::Response(Response {
                status,
                headers,
                body,
            }),
            None => {
                let request = parse_request_line(first, headers.cseq);
                self.buffer.advance(header_end + body_len);
                return request.map(|r| Some(Message::Request(r)));
            }
        };
        self.buffer.advance(header_end + body_len);
        Ok(Some(message))
    }

    fn next_interleaved(&mut self) -> Option<Message> {
        if self.buffer.len() < 4 {
            return None;
        }
        let channel = self.buffer[1];
        let len = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        if self.buffer.len() < 4 + len {
            return None;
        }
        self.buffer.advance(4);
        let payload = self.buffer.split_to(len).freeze();
        Some(Message::Interleaved(InterleavedFrame { channel, payload }))
    }
}

/// Finds the end of the next line starting at `start`.
///
/// Returns `(end_of_line, start_of_next_line)`. `\r\n`, a lone `\r` and a
/// lone `\n` all terminate a line. A `\r` that is the final buffered byte
/// may be the first half of a `\r\n` still in flight, so it only counts as
/// a terminator when the line before ended with a lone `\r` too.
fn next_line(buf: &[u8], start: usize, after_lone_cr: bool) -> Option<(usize, usize)> {
    let offset = buf.get(start..)?.iter().position(|&b| b == b'\r' || b == b'\n')?;
    let end = start + offset;
    if buf[end] == b'\n' {
        return Some((end, end + 1));
    }
    match buf.get(end + 1) {
        Some(b'\n') => Some((end, end + 2)),
        Some(_) => Some((end, end + 1)),
        None if after_lone_cr => Some((end, end + 1)),
        None => None,
    }
}

fn is_lone_cr(buf: &[u8], end: usize, next: usize) -> bool {
    buf[end] == b'\r' && next == end + 1
}

/// Splits `buf` into complete lines and the unterminated remainder.
pub fn split_lines(buf: &[u8]) -> (Vec<String>, &[u8]) {
    let mut lines = Vec::new();
    let mut pos = 0;
    let mut lone_cr = false;
    while let Some((end, next)) = next_line(buf, pos, lone_cr) {
        lines.push(String::from_utf8_lossy(&buf[pos..end]).into_owned());
        lone_cr = is_lone_cr(buf, end, next);
        pos = next;
    }
    (lines, &buf[pos..])
}

/// Collects the lines up to the first empty one. Returns the lines and the
/// offset just past the blank line, or `None` if the block is incomplete.
fn header_block(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let mut lines = Vec::new();
    let mut pos = 0;
    let mut lone_cr = false;
    loop {
        let (end, next) = next_line(buf, pos, lone_cr)?;
        if end == pos {
            return Some((lines, next));
        }
        lines.push(String::from_utf8_lossy(&buf[pos..end]).into_owned());
        lone_cr = is_lone_cr(buf, end, next);
        pos = next;
    }
}

fn looks_like_message_start(rest: &[u8]) -> bool {
    if rest.first() == Some(&b'$') {
        return true;
    }
    let n = rest.len().min(5);
    n > 0 && (rest[..n] == b"RTSP/"[..n] || rest[..n] == b"HTTP/"[..n])
}

/// Parses `RTSP/<version> <code> <reason>` or the HTTP equivalent.
/// Returns `None` when the line is not a status line.
pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    let rest = line
        .strip_prefix("RTSP/")
        .or_else(|| line.strip_prefix("HTTP/"))?;
    let (_version, rest) = rest.split_once(|c: char| c == ' ' || c == '\t')?;
    let rest = rest.trim_start_matches([' ', '\t']);
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let code = rest[..digits].parse().ok()?;
    Some(StatusLine {
        code,
        reason: rest[digits..].trim().to_string(),
    })
}

fn parse_request_line(line: &str, cseq: Option<u32>) -> Result<IncomingRequest> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(version)) if version.starts_with("RTSP/") => {
            debug!("Server sent {} request for {}", method, uri);
            Ok(IncomingRequest {
                method: method.to_string(),
                uri: uri.to_string(),
                cseq,
            })
        }
        _ => Err(RtspError::MalformedResponse(format!(
            "unrecognised start line '{}'",
            line
        ))),
    }
}

/// Returns the value of `line` if it carries header `name`, skipping the
/// colon and any spaces or tabs that follow it.
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.trim_start_matches([' ', '\t']).trim_end())
}

/// Extracts the recognised headers. A non-numeric `CSeq` or
/// `Content-Length` is an error.
pub fn parse_headers<S: AsRef<str>>(lines: &[S]) -> Result<ResponseHeaders> {
    let mut headers = ResponseHeaders::default();
    for line in lines {
        let line = line.as_ref();
        if let Some(v) = header_value(line, "CSeq") {
            headers.cseq = Some(v.parse().map_err(|_| {
                RtspError::MalformedResponse(format!("bad CSeq '{}'", v))
            })?);
        } else if let Some(v) = header_value(line, "Content-Length") {
            headers.content_length = Some(v.parse().map_err(|_| {
                RtspError::MalformedResponse(format!("bad Content-Length '{}'", v))
            })?);
        } else if let Some(v) = header_value(line, "Content-Base") {
            headers.content_base = Some(v.to_string());
        } else if let Some(v) = header_value(line, "Session") {
            headers.session = Some(v.to_string());
        } else if let Some(v) = header_value(line, "Transport") {
            headers.transport = Some(v.to_string());
        } else if let Some(v) = header_value(line, "Scale") {
            headers.scale = Some(v.to_string());
        } else if let Some(v) = header_value(line, "Range") {
            headers.range = Some(v.to_string());
        } else if let Some(v) = header_value(line, "RTP-Info") {
            headers.rtp_info = Some(v.to_string());
        } else if let Some(v) = header_value(line, "WWW-Authenticate") {
            // Several challenges may be offered; Digest wins over Basic and
            // is never replaced once seen.
            let have_digest = headers
                .www_authenticate
                .as_deref()
                .is_some_and(|h| h.starts_with("Digest"));
            if headers.www_authenticate.is_none() || (!have_digest && v.starts_with("Digest")) {
                headers.www_authenticate = Some(v.to_string());
            }
        } else if let Some(v) = header_value(line, "Public") {
            headers.public = Some(v.to_string());
        } else if let Some(v) = header_value(line, "Allow") {
            headers.allow = Some(v.to_string());
        } else if let Some(v) = header_value(line, "Location") {
            headers.location = Some(v.to_string());
        }
    }
    Ok(headers)
}

/// Splits a `Session:` value into the session id and its optional timeout.
pub fn parse_session_header(value: &str) -> Option<(String, Option<u32>)> {
    let mut parts = value.split(';');
    let id = parts.next()?.trim();
    if id.is_empty() {
        return None;
    }
    let timeout = parts.find_map(|p| {
        p.trim()
            .strip_prefix("timeout=")
            .and_then(|t| t.trim().parse().ok())
    });
    Some((id.to_string(), timeout))
}

/// One entry of an `RTP-Info` header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtpInfo {
    /// Stream the entry describes.
    pub url: String,
    /// Sequence number of the first packet after PLAY.
    pub seq: Option<u16>,
    /// RTP timestamp matching the start of the play range.
    pub rtptime: Option<u32>,
}

/// Splits an `RTP-Info` value into its entries. Entries without a `url=`
/// are dropped.
pub fn parse_rtp_info(value: &str) -> Vec<RtpInfo> {
    value
        .split(',')
        .filter_map(|entry| {
            let mut info = RtpInfo::default();
            for param in entry.split(';') {
                let param = param.trim();
                if let Some(url) = param.strip_prefix("url=") {
                    info.url = url.to_string();
                } else if let Some(seq) = param.strip_prefix("seq=") {
                    info.seq = seq.parse().ok();
                } else if let Some(ts) = param.strip_prefix("rtptime=") {
                    info.rtptime = ts.parse().ok();
                }
            }
            (!info.url.is_empty()).then_some(info)
        })
        .collect()
}

/// Splits a `Public:` or `Allow:` value into method names.
pub fn parse_method_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn next(parser: &mut ResponseParser) -> Message {
        parser.next_message().unwrap().expect("complete message")
    }

    #[test]
    fn test_status_line() {
        let status = parse_status_line("RTSP/1.0 200 OK").unwrap();
        assert_eq!(status.code, 200);
        assert_eq!(status.reason, "OK");

        let status = parse_status_line("HTTP/1.0 401 Unauthorized").unwrap();
        assert_eq!(status.code, 401);

        assert!(parse_status_line("OPTIONS * RTSP/1.0").is_none());
        assert!(parse_status_line("RTSP/1.0").is_none());
        assert!(parse_status_line("RTSP/1.0 abc").is_none());
    }

    #[test]
    fn test_split_lines_mixed_terminators() {
        let (lines, rest) = split_lines(b"one\r\ntwo\nthree\rfour");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(rest, b"four");

        // a trailing CR may be the first half of a CRLF
        let (lines, rest) = split_lines(b"one\r");
        assert!(lines.is_empty());
        assert_eq!(rest, b"one\r");

        // unless the previous line already ended with a lone CR
        let (lines, rest) = split_lines(b"one\rtwo\r");
        assert_eq!(lines, vec!["one", "two"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_lone_cr_response_is_complete() {
        let mut parser = ResponseParser::new();
        parser.push(b"RTSP/1.0 200 OK\rCSeq: 1\r\r");
        match next(&mut parser) {
            Message::Response(response) => {
                assert_eq!(response.status.code, 200);
                assert_eq!(response.headers.cseq, Some(1));
                assert_eq!(response.body, "");
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_crlf_response_waits_for_final_lf() {
        let mut parser = ResponseParser::new();
        parser.push(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\n\r");
        assert_eq!(parser.next_message().unwrap(), None);
        parser.push(b"\n");
        assert!(matches!(next(&mut parser), Message::Response(_)));
    }

    #[test]
    fn test_parse_describe_response() {
        let mut parser = ResponseParser::new();
        parser.push(
            b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Base: rtsp://example.com/stream/\r\n\
              Content-Type: application/sdp\r\nContent-Length: 10\r\n\r\nv=0\r\ns=x\r\n",
        );
        match next(&mut parser) {
            Message::Response(response) => {
                assert_eq!(response.status.code, 200);
                assert_eq!(response.headers.cseq, Some(2));
                assert_eq!(
                    response.headers.content_base.as_deref(),
                    Some("rtsp://example.com/stream/")
                );
                assert_eq!(response.body, "v=0\r\ns=x\r\n");
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_partial_reads_are_reassembled() {
        let raw: &[u8] =
            b"RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: 12345678;timeout=60\r\n\
              Content-Length: 4\r\n\r\nbody";
        let mut parser = ResponseParser::new();
        for chunk in raw.chunks(7) {
            assert_eq!(parser.next_message().unwrap(), None);
            parser.push(chunk);
        }
        match next(&mut parser) {
            Message::Response(response) => {
                assert_eq!(response.headers.cseq, Some(3));
                assert_eq!(response.body, "body");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_two_responses_in_one_read() {
        let mut parser = ResponseParser::new();
        parser.push(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\nRTSP/1.0 200 OK\nCSeq: 2\n\n");
        let first = next(&mut parser);
        let second = next(&mut parser);
        match (first, second) {
            (Message::Response(a), Message::Response(b)) => {
                assert_eq!(a.headers.cseq, Some(1));
                assert_eq!(a.body, "");
                assert_eq!(b.headers.cseq, Some(2));
            }
            other => panic!("unexpected messages {:?}", other),
        }
    }

    #[test]
    fn test_body_without_content_length_takes_rest() {
        let mut parser = ResponseParser::new();
        parser.push(b"RTSP/1.0 200 OK\r\nCSeq: 4\r\n\r\nv=0\r\n");
        match next(&mut parser) {
            Message::Response(response) => assert_eq!(response.body, "v=0\r\n"),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_malformed_cseq_drops_response() {
        let mut parser = ResponseParser::new();
        parser.push(b"RTSP/1.0 200 OK\r\nCSeq: abc\r\n\r\nRTSP/1.0 200 OK\r\nCSeq: 5\r\n\r\n");
        assert!(matches!(
            parser.next_message(),
            Err(RtspError::MalformedResponse(_))
        ));
        match next(&mut parser) {
            Message::Response(response) => assert_eq!(response.headers.cseq, Some(5)),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_malformed_content_length() {
        let headers = parse_headers(&["CSeq: 1", "Content-Length: ten"]);
        assert!(headers.is_err());
    }

    #[test]
    fn test_incoming_request() {
        let mut parser = ResponseParser::new();
        parser.push(b"OPTIONS rtsp://client RTSP/1.0\r\nCSeq: 7\r\n\r\n");
        assert_eq!(
            next(&mut parser),
            Message::Request(IncomingRequest {
                method: "OPTIONS".into(),
                uri: "rtsp://client".into(),
                cseq: Some(7),
            })
        );
    }

    #[test]
    fn test_interleaved_frame_between_responses() {
        let mut parser = ResponseParser::new();
        parser.push(b"$\x01\x00\x03abc");
        parser.push(b"RTSP/1.0 200 OK\r\nCSeq: 9\r\n\r\n");
        assert_eq!(
            next(&mut parser),
            Message::Interleaved(InterleavedFrame {
                channel: 1,
                payload: Bytes::from_static(b"abc"),
            })
        );
        assert!(matches!(next(&mut parser), Message::Response(_)));
    }

    #[test]
    fn test_www_authenticate_prefers_digest() {
        let headers = parse_headers(&[
            "WWW-Authenticate: Basic realm=\"cam\"",
            "WWW-Authenticate: Digest realm=\"cam\", nonce=\"abc\"",
            "WWW-Authenticate: Basic realm=\"other\"",
        ])
        .unwrap();
        assert_eq!(
            headers.www_authenticate.as_deref(),
            Some("Digest realm=\"cam\", nonce=\"abc\"")
        );
    }

    #[test]
    fn test_header_names_are_case_sensitive() {
        let headers = parse_headers(&["cseq: 4", "Transport:\tRTP/AVP;unicast"]).unwrap();
        assert_eq!(headers.cseq, None);
        assert_eq!(headers.transport.as_deref(), Some("RTP/AVP;unicast"));
    }

    #[test]
    fn test_session_header() {
        assert_eq!(
            parse_session_header("47112344;timeout=60"),
            Some(("47112344".to_string(), Some(60)))
        );
        assert_eq!(parse_session_header("abc"), Some(("abc".to_string(), None)));
        assert_eq!(parse_session_header(" ;timeout=5"), None);
    }

    #[test]
    fn test_rtp_info() {
        let infos = parse_rtp_info(
            "url=rtsp://example.com/s/track1;seq=45102;rtptime=12345678,\
             url=rtsp://example.com/s/track2;seq=30211",
        );
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].seq, Some(45102));
        assert_eq!(infos[0].rtptime, Some(12345678));
        assert_eq!(infos[1].url, "rtsp://example.com/s/track2");
        assert_eq!(infos[1].rtptime, None);
    }

    #[test]
    fn test_method_list() {
        assert_eq!(
            parse_method_list("OPTIONS, DESCRIBE, SETUP,PLAY"),
            vec!["OPTIONS", "DESCRIBE", "SETUP", "PLAY"]
        );
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let mut parser = ResponseParser::new();
        parser.push(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 4000000000\r\n\r\n");
        parser.push(&vec![b'x'; 4096]);
        assert!(matches!(
            parser.next_message(),
            Err(RtspError::MalformedResponse(_))
        ));
        assert_eq!(parser.buffered(), 0);

        parser.push(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\n\r\n");
        match next(&mut parser) {
            Message::Response(response) => assert_eq!(response.headers.cseq, Some(2)),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_oversized_header_block_is_rejected() {
        let mut parser = ResponseParser::new();
        parser.push(b"RTSP/1.0 200 OK\r\n");
        parser.push(&vec![b'x'; MAX_HEADER_BYTES + 1]);
        assert!(parser.next_message().is_err());
        assert_eq!(parser.buffered(), 0);
    }
}
