use crate::format::rtsp::queue::DEFAULT_MAX_PENDING;
use std::env;
use std::time::Duration;

/// Environment variable holding the server URL for [`ClientConfig::from_env`].
pub const URL_ENV: &str = "RTSP_ENGINE_URL";
/// Environment variable holding the username for [`ClientConfig::from_env`].
pub const USERNAME_ENV: &str = "RTSP_ENGINE_USERNAME";
/// Environment variable holding the password for [`ClientConfig::from_env`].
pub const PASSWORD_ENV: &str = "RTSP_ENGINE_PASSWORD";

/// Application name sent in `User-Agent` unless overridden.
pub const DEFAULT_APPLICATION_NAME: &str = "rtsp-engine/0.1";

/// First client UDP port handed to subsessions.
pub const DEFAULT_CLIENT_PORT_BASE: u16 = 5000;

/// Settings for an RTSP client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `rtsp://[user[:password]@]host[:port][/path]`
    pub url: String,
    /// Overrides the username embedded in the URL.
    pub username: Option<String>,
    /// Overrides the password embedded in the URL.
    pub password: Option<String>,
    /// Sent as `User-Agent`.
    pub application_name: String,
    /// Ask for RTP/RTCP interleaved on the control connection.
    pub stream_using_tcp: bool,
    /// Tunnel RTSP over HTTP GET/POST on this port.
    pub tunnel_over_http_port: Option<u16>,
    /// Session is for sending media (ANNOUNCE/RECORD) rather than receiving.
    pub stream_outgoing: bool,
    /// Even port the first subsession's RTP is received on.
    pub client_port_base: u16,
    /// Most requests allowed to wait for a response at once.
    pub max_pending_requests: usize,
    /// Give up on an awaited command after this long.
    pub response_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Creates a configuration for `url` with default settings.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            username: None,
            password: None,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            stream_using_tcp: false,
            tunnel_over_http_port: None,
            stream_outgoing: false,
            client_port_base: DEFAULT_CLIENT_PORT_BASE,
            max_pending_requests: DEFAULT_MAX_PENDING,
            response_timeout: None,
        }
    }

    /// Builds a configuration from `RTSP_ENGINE_*` environment variables.
    /// Returns `None` when no URL is set.
    pub fn from_env() -> Option<Self> {
        let url = env::var(URL_ENV).ok().filter(|u| !u.trim().is_empty())?;
        let mut config = Self::new(url.trim());
        config.username = env::var(USERNAME_ENV).ok();
        config.password = env::var(PASSWORD_ENV).ok();
        Some(config)
    }

    /// Sets the username and password, overriding any in the URL.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Sets the `User-Agent` application name.
    pub fn with_application_name(mut self, name: &str) -> Self {
        self.application_name = name.to_string();
        self
    }

    /// Requests RTP/RTCP interleaved on the control connection.
    pub fn with_tcp(mut self, enable: bool) -> Self {
        self.stream_using_tcp = enable;
        self
    }

    /// Tunnels RTSP over HTTP on `port`.
    pub fn with_http_tunnel(mut self, port: u16) -> Self {
        self.tunnel_over_http_port = Some(port);
        self
    }

    /// Marks the session as sending media rather than receiving it.
    pub fn with_outgoing(mut self, outgoing: bool) -> Self {
        self.stream_outgoing = outgoing;
        self
    }

    /// Sets the first client RTP port, rounded down to even.
    pub fn with_client_port_base(mut self, port: u16) -> Self {
        self.client_port_base = port & !1;
        self
    }

    /// Bounds the number of requests waiting for a response.
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Sets how long the awaiting API waits for each response.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}
