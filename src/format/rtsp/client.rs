use super::connection::{RtspConnection, READ_BUFFER_SIZE};
use super::engine::{Disposition, Engine, Prepared};
use super::parser::{InterleavedFrame, Message, Response, ResponseParser};
use super::request::{
    Command, CommandResult, PendingRequest, PlayRange, ResponseHandler, SessionTarget,
    SubsessionTarget,
};
use super::url::RtspUrl;
use crate::config::ClientConfig;
use crate::{Result, RtspError};
use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Snapshot of the connection state, as seen by the actor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// URL requests are made against, after any `Content-Base` or redirect.
    pub base_url: String,
    /// `host:port` of the server.
    pub server_address: String,
    /// Session id from the first successful SETUP.
    pub session_id: Option<String>,
    /// Session timeout announced by the server, in seconds.
    pub session_timeout: Option<u32>,
    /// CSeq of the most recently sent request.
    pub cseq: u32,
    /// Requests waiting for a response.
    pub pending: usize,
    /// Scale granted by the last PLAY.
    pub current_scale: f32,
    /// Methods from the last OPTIONS reply.
    pub server_methods: Vec<String>,
    /// Requests are going over an HTTP tunnel.
    pub tunneled: bool,
}

#[derive(Debug)]
enum ClientCommand {
    Send(PendingRequest),
    Info(oneshot::Sender<ConnectionInfo>),
    Close,
}

/// Handle to an RTSP control connection.
///
/// The connection itself lives in a spawned task that owns the socket and
/// the protocol state. Handles are cheap to clone, and sending through one
/// never blocks, so continuations may issue the next command directly.
#[derive(Debug, Clone)]
pub struct RtspClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    response_timeout: Option<std::time::Duration>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RtspClient {
    /// Connects to the server named in `config.url` (or its HTTP tunnel
    /// port) and starts the connection task.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with_sink(config, None).await
    }

    /// Like [`RtspClient::connect`], forwarding interleaved RTP/RTCP frames
    /// that arrive on the control connection to `sink`.
    pub async fn connect_with_sink(
        config: ClientConfig,
        sink: Option<mpsc::Sender<InterleavedFrame>>,
    ) -> Result<Self> {
        let url = RtspUrl::parse(&config.url)?;
        let port = config.tunnel_over_http_port.unwrap_or_else(|| url.port());
        info!("Connecting to {}:{}", url.host(), port);
        let connection = RtspConnection::connect(url.host(), port).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let actor = ConnectionActor {
            engine: Engine::new(&config, &url),
            connection,
            parser: ResponseParser::new(),
            commands: rx,
            sink,
            tunnel_port: config.tunnel_over_http_port,
            url,
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            commands: tx,
            response_timeout: config.response_timeout,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Queues `request` for sending. Its handler is invoked exactly once,
    /// with [`RtspError::ConnectionClosed`] if the connection is gone.
    pub fn send(&self, request: PendingRequest) {
        let sent = self.commands.send(ClientCommand::Send(request));
        if let Err(mpsc::error::SendError(ClientCommand::Send(request))) = sent {
            request.complete(Err(RtspError::ConnectionClosed));
        }
    }

    /// Sends OPTIONS; `handler` receives the reply.
    pub fn send_options(&self, handler: ResponseHandler) {
        self.send(PendingRequest::options(handler))
    }

    /// Sends DESCRIBE. The reply body holds the SDP.
    pub fn send_describe(&self, handler: ResponseHandler) {
        self.send(PendingRequest::describe(handler))
    }

    /// Sends ANNOUNCE with `sdp` as the body.
    pub fn send_announce(&self, sdp: String, handler: ResponseHandler) {
        self.send(PendingRequest::announce(sdp, handler))
    }

    /// Sends SETUP for one subsession. The first successful SETUP sets the
    /// session id used by every later session-level command.
    pub fn send_setup(&self, subsession: SubsessionTarget, handler: ResponseHandler) {
        self.send(PendingRequest::setup(subsession, handler))
    }

    /// Sends PLAY for `range` at `scale`.
    pub fn send_play(
        &self,
        session: SessionTarget,
        range: PlayRange,
        scale: f32,
        handler: ResponseHandler,
    ) {
        self.send(PendingRequest::play(session, range, scale, handler))
    }

    /// Sends PAUSE.
    pub fn send_pause(&self, session: SessionTarget, handler: ResponseHandler) {
        self.send(PendingRequest::new(Command::Pause, handler).with_session(session))
    }

    /// Sends RECORD.
    pub fn send_record(&self, session: SessionTarget, handler: ResponseHandler) {
        self.send(PendingRequest::new(Command::Record, handler).with_session(session))
    }

    /// Sends TEARDOWN. A successful reply clears the session id.
    pub fn send_teardown(&self, session: SessionTarget, handler: ResponseHandler) {
        self.send(PendingRequest::new(Command::Teardown, handler).with_session(session))
    }

    /// Sends GET_PARAMETER for `name`, or an empty one if `name` is empty.
    pub fn send_get_parameter(&self, session: SessionTarget, name: &str, handler: ResponseHandler) {
        self.send(PendingRequest::get_parameter(session, name, handler))
    }

    /// Sends SET_PARAMETER with a `name: value` body.
    pub fn send_set_parameter(
        &self,
        session: SessionTarget,
        name: &str,
        value: &str,
        handler: ResponseHandler,
    ) {
        self.send(PendingRequest::set_parameter(session, name, value, handler))
    }

    /// Sends `request`, replacing its handler, and waits for the result.
    pub async fn execute(&self, mut request: PendingRequest) -> CommandResult {
        let (tx, rx) = oneshot::channel();
        request.handler = ResponseHandler::Channel(tx);
        self.send(request);

        let received = match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| RtspError::Timeout)?,
            None => rx.await,
        };
        received.map_err(|_| RtspError::ConnectionClosed)?
    }

    /// Sends every request back to back without waiting in between, then
    /// collects the results in the same order.
    pub async fn execute_all(&self, requests: Vec<PendingRequest>) -> Vec<CommandResult> {
        join_all(requests.into_iter().map(|request| self.execute(request))).await
    }

    /// Sends OPTIONS and waits for the reply.
    pub async fn options(&self) -> CommandResult {
        self.execute(PendingRequest::options(ResponseHandler::Ignore)).await
    }

    /// Sends DESCRIBE and waits for the reply.
    pub async fn describe(&self) -> CommandResult {
        self.execute(PendingRequest::describe(ResponseHandler::Ignore)).await
    }

    /// Sends ANNOUNCE and waits for the reply.
    pub async fn announce(&self, sdp: String) -> CommandResult {
        self.execute(PendingRequest::announce(sdp, ResponseHandler::Ignore)).await
    }

    /// Sends SETUP and waits for the reply, whose `transport` holds the
    /// negotiated parameters.
    pub async fn setup(&self, subsession: SubsessionTarget) -> CommandResult {
        self.execute(PendingRequest::setup(subsession, ResponseHandler::Ignore)).await
    }

    /// Sends PLAY and waits for the reply.
    pub async fn play(
        &self,
        session: SessionTarget,
        range: PlayRange,
        scale: f32,
    ) -> CommandResult {
        self.execute(PendingRequest::play(session, range, scale, ResponseHandler::Ignore))
            .await
    }

    /// Sends PAUSE and waits for the reply.
    pub async fn pause(&self, session: SessionTarget) -> CommandResult {
        let request = PendingRequest::new(Command::Pause, ResponseHandler::Ignore);
        self.execute(request.with_session(session)).await
    }

    /// Sends RECORD and waits for the reply.
    pub async fn record(&self, session: SessionTarget) -> CommandResult {
        let request = PendingRequest::new(Command::Record, ResponseHandler::Ignore);
        self.execute(request.with_session(session)).await
    }

    /// Sends TEARDOWN and waits for the reply.
    pub async fn teardown(&self, session: SessionTarget) -> CommandResult {
        let request = PendingRequest::new(Command::Teardown, ResponseHandler::Ignore);
        self.execute(request.with_session(session)).await
    }

    /// Sends GET_PARAMETER and waits for the reply.
    pub async fn get_parameter(&self, session: SessionTarget, name: &str) -> CommandResult {
        self.execute(PendingRequest::get_parameter(session, name, ResponseHandler::Ignore))
            .await
    }

    /// Sends SET_PARAMETER and waits for the reply.
    pub async fn set_parameter(
        &self,
        session: SessionTarget,
        name: &str,
        value: &str,
    ) -> CommandResult {
        self.execute(PendingRequest::set_parameter(session, name, value, ResponseHandler::Ignore))
            .await
    }

    /// GET_PARAMETER with no body, to keep the session alive.
    pub async fn keep_alive(&self, session: SessionTarget) -> Result<()> {
        self.get_parameter(session, "").await.map(|_| ())
    }

    /// Snapshot of the connection state.
    pub async fn info(&self) -> Result<ConnectionInfo> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::Info(tx))
            .map_err(|_| RtspError::ConnectionClosed)?;
        rx.await.map_err(|_| RtspError::ConnectionClosed)
    }

    /// Current base URL.
    pub async fn base_url(&self) -> Result<String> {
        Ok(self.info().await?.base_url)
    }

    /// Session id, once SETUP has established one.
    pub async fn session_id(&self) -> Result<Option<String>> {
        Ok(self.info().await?.session_id)
    }

    /// Returns true once the connection task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Closes the connection. Requests still waiting are completed with
    /// [`RtspError::ConnectionClosed`].
    pub async fn close(&self) {
        let _ = self.commands.send(ClientCommand::Close);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Connection task failed: {}", e);
            }
        }
    }
}

enum Event {
    Command(Option<ClientCommand>),
    Read(Result<usize>),
}

struct ConnectionActor {
    engine: Engine,
    connection: RtspConnection,
    parser: ResponseParser,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    sink: Option<mpsc::Sender<InterleavedFrame>>,
    tunnel_port: Option<u16>,
    url: RtspUrl,
}

impl ConnectionActor {
    async fn run(mut self) {
        if self.tunnel_port.is_some() {
            let get = self.engine.begin_tunnel(ResponseHandler::Ignore);
            if let Err(e) = self.dispatch(get).await {
                return self.shutdown(e).await;
            }
        }

        let mut reason = RtspError::ConnectionClosed;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                read = self.connection.read(&mut buf) => Event::Read(read),
            };

            let outcome = match event {
                Event::Command(Some(ClientCommand::Send(request))) => {
                    let prepared = self.engine.prepare(request);
                    self.dispatch(prepared).await
                }
                Event::Command(Some(ClientCommand::Info(tx))) => {
                    let _ = tx.send(self.info());
                    Ok(())
                }
                Event::Command(Some(ClientCommand::Close)) | Event::Command(None) => {
                    debug!("Closing connection to {}", self.engine.server_address());
                    break;
                }
                Event::Read(Ok(0)) => {
                    info!("Connection closed by {}", self.engine.server_address());
                    break;
                }
                Event::Read(Ok(n)) => {
                    self.parser.push(&buf[..n]);
                    self.drain_messages().await
                }
                Event::Read(Err(e)) => Err(e),
            };

            if let Err(e) = outcome {
                error!("Connection to {} failed: {}", self.engine.server_address(), e);
                reason = e;
                break;
            }
        }
        self.shutdown(reason).await
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            base_url: self.engine.base_url().to_string(),
            server_address: self.engine.server_address().to_string(),
            session_id: self.engine.session_id().map(String::from),
            session_timeout: self.engine.session_timeout(),
            cseq: self.engine.cseq(),
            pending: self.engine.pending(),
            current_scale: self.engine.current_scale(),
            server_methods: self.engine.server_methods().to_vec(),
            tunneled: self.engine.is_tunneled(),
        }
    }

    /// Writes a prepared request. An error here means the connection is
    /// unusable; the request itself has already been completed.
    async fn dispatch(&mut self, prepared: Prepared) -> Result<()> {
        match prepared {
            Prepared::Send { request, wire } => {
                debug!("Sending request:\n{}", wire);
                if let Err(e) = self.connection.write_all(wire.as_bytes()).await {
                    error!("Writing {} failed: {}", request.command, e);
                    request.complete(Err(e));
                    return Err(RtspError::ConnectionClosed);
                }
                if let Some(evicted) = self.engine.commit(request) {
                    let cseq = evicted.cseq;
                    evicted.complete(Err(RtspError::RequestAbandoned { cseq }));
                }
                Ok(())
            }
            Prepared::Deferred => Ok(()),
            Prepared::Rejected { request, error } => {
                request.complete(Err(error));
                Ok(())
            }
        }
    }

    async fn drain_messages(&mut self) -> Result<()> {
        loop {
            let message = match self.parser.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!("Discarding unparseable response: {}", e);
                    continue;
                }
            };

            match message {
                Message::Response(response) => self.on_response(response).await?,
                Message::Request(request) => {
                    let reply = self.engine.reply_to_server(&request);
                    self.connection.write_all(reply.as_bytes()).await?;
                }
                Message::Interleaved(frame) => self.forward(frame),
            }
        }
    }

    fn forward(&mut self, frame: InterleavedFrame) {
        let Some(sink) = &self.sink else {
            return;
        };
        match sink.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!("Dropping {} byte frame on channel {}", frame.payload.len(), frame.channel);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Interleaved data receiver dropped");
                self.sink = None;
            }
        }
    }

    async fn on_response(&mut self, response: Response) -> Result<()> {
        debug!(
            "Received response {} {} (CSeq {:?})",
            response.status.code, response.status.reason, response.headers.cseq
        );
        let (disposition, abandoned) = self.engine.handle_response(response);
        for request in abandoned {
            let cseq = request.cseq;
            request.complete(Err(RtspError::RequestAbandoned { cseq }));
        }

        match disposition {
            Disposition::Complete(request, result) => {
                if request.command == Command::Get && self.engine.is_tunnel_pending() {
                    self.finish_tunnel(&result).await?;
                }
                request.complete(result);
                Ok(())
            }
            Disposition::Retry(request) => {
                let prepared = self.engine.prepare(request);
                self.dispatch(prepared).await
            }
            Disposition::Redirect(request, url) => {
                if let Err(e) = self.reconnect(url).await {
                    request.complete(Err(e));
                    return Err(RtspError::ConnectionClosed);
                }
                let prepared = self.engine.prepare(request);
                self.dispatch(prepared).await
            }
            Disposition::Unmatched => Ok(()),
        }
    }

    async fn finish_tunnel(&mut self, get_result: &CommandResult) -> Result<()> {
        if let Err(e) = get_result {
            for request in self.engine.abort_tunnel() {
                let reason = format!("HTTP tunnel not established: {}", e);
                request.complete(Err(RtspError::Protocol(reason)));
            }
            return Ok(());
        }

        let (post, waiting) = self.engine.establish_tunnel()?;
        let port = self.tunnel_port.unwrap_or_else(|| self.url.port());
        debug!("Opening tunnel POST:\n{}", post);
        if let Err(e) = self.connection.open_tunnel(self.url.host(), port, &post).await {
            for request in waiting {
                request.complete(Err(RtspError::ConnectionClosed));
            }
            return Err(e);
        }
        info!("HTTP tunnel to {}:{} established", self.url.host(), port);

        for request in waiting {
            let prepared = self.engine.prepare(request);
            self.dispatch(prepared).await?;
        }
        Ok(())
    }

    async fn reconnect(&mut self, url: RtspUrl) -> Result<()> {
        self.connection.shutdown().await;
        self.connection = RtspConnection::connect(url.host(), url.port()).await?;
        self.parser = ResponseParser::new();
        for request in self.engine.abandon_all() {
            request.complete(Err(RtspError::ConnectionClosed));
        }
        self.url = url;
        Ok(())
    }

    async fn shutdown(mut self, reason: RtspError) {
        self.commands.close();
        let mut requests = self.engine.abandon_all();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ClientCommand::Send(request) => requests.push(request),
                ClientCommand::Info(tx) => {
                    let _ = tx.send(self.info());
                }
                ClientCommand::Close => {}
            }
        }
        if !requests.is_empty() {
            warn!("Completing {} outstanding requests: {}", requests.len(), reason);
        }
        for request in requests {
            let error = match &reason {
                RtspError::ReadFailed(msg) => RtspError::ReadFailed(msg.clone()),
                _ => RtspError::ConnectionClosed,
            };
            request.complete(Err(error));
        }
        self.connection.shutdown().await;
    }
}
