use crate::{Result, RtspError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Bytes read from the socket per call.
pub const READ_BUFFER_SIZE: usize = 4096;

/// The control connection to one server.
///
/// When tunneled over HTTP, responses keep arriving on the GET connection
/// while requests go base64-encoded over a separate POST connection.
#[derive(Debug)]
pub struct RtspConnection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    tunnel_post: Option<TcpStream>,
}

async fn open(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| RtspError::ConnectFailed {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
    stream.set_nodelay(true)?;
    debug!("Connected to {}", addr);
    Ok(stream)
}

impl RtspConnection {
    /// Opens a TCP connection to `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let (reader, writer) = open(host, port).await?.into_split();
        Ok(Self {
            reader,
            writer,
            tunnel_post: None,
        })
    }

    /// Returns true once the POST half of a tunnel is open.
    pub fn is_tunneled(&self) -> bool {
        self.tunnel_post.is_some()
    }

    /// Opens the POST half of an HTTP tunnel and sends its header block in
    /// the clear. Every later write is base64-encoded onto it.
    pub async fn open_tunnel(&mut self, host: &str, port: u16, post_header: &str) -> Result<()> {
        let mut post = open(host, port).await?;
        post.write_all(post_header.as_bytes())
            .await
            .map_err(|e| RtspError::WriteFailed(e.to_string()))?;
        post.flush()
            .await
            .map_err(|e| RtspError::WriteFailed(e.to_string()))?;
        self.tunnel_post = Some(post);
        Ok(())
    }

    /// Writes and flushes `data`, base64-encoded when tunneled.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let result = match &mut self.tunnel_post {
            Some(post) => {
                let encoded = STANDARD.encode(data);
                match post.write_all(encoded.as_bytes()).await {
                    Ok(()) => post.flush().await,
                    Err(e) => Err(e),
                }
            }
            None => match self.writer.write_all(data).await {
                Ok(()) => self.writer.flush().await,
                Err(e) => Err(e),
            },
        };
        result.map_err(|e| RtspError::WriteFailed(e.to_string()))
    }

    /// Reads whatever is available. `Ok(0)` means the peer closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader
            .read(buf)
            .await
            .map_err(|e| RtspError::ReadFailed(e.to_string()))
    }

    /// Shuts down the write side of both connections. Errors are ignored.
    pub async fn shutdown(&mut self) {
        if let Some(post) = &mut self.tunnel_post {
            let _ = post.shutdown().await;
        }
        let _ = self.writer.shutdown().await;
    }
}
