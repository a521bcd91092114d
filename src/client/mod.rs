//! Controlling-side connection.
//!
//! `ControlClient` owns one authenticated channel and issues one command at
//! a time; the protocol is strictly synchronous from the client's view.
//! Pacing between screen requests is the caller's job — the server answers
//! exactly as often as it is asked.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine;
use tokio::fs::File;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::crypto::derive_key;
use crate::framing::{ChannelError, FramedChannel};
use crate::protocol::{
    AuthRequest, AuthResponse, Command, DownloadHeader, KeyboardEvent, MouseEvent, ScreenFrame,
    TransferStatus,
};
use crate::transfer;

/// Deadline for connect plus handshake. A server that stalls before
/// authenticating is not worth waiting on; after authentication there is no
/// read deadline at all.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A decoded screen frame: captured dimensions plus raw JPEG bytes.
#[derive(Debug)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

pub struct ControlClient {
    channel: FramedChannel<TcpStream>,
}

impl ControlClient {
    /// Connect to `addr` (`host:port`) and authenticate.
    pub async fn connect(addr: &str, password: &str) -> Result<Self> {
        let addr = fix_host(addr);
        let key = derive_key(password);

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow::anyhow!("connection to {addr} timed out"))?
            .with_context(|| format!("failed to connect to {addr}"))?;
        let mut channel = FramedChannel::new(stream, key);

        let auth = serde_json::to_vec(&AuthRequest {
            password: password.to_string(),
        })?;

        let reply = match timeout(CONNECT_TIMEOUT, async {
            channel.send(&auth).await?;
            channel.recv().await
        })
        .await
        {
            Err(_) => bail!("handshake with {addr} timed out"),
            // A server holding a different key closes without a readable
            // reply; both outcomes mean the password does not match.
            Ok(Err(ChannelError::ConnectionClosed)) | Ok(Err(ChannelError::Crypto(_))) => {
                bail!("authentication failed (wrong password?)")
            }
            Ok(Err(e)) => return Err(e).context("handshake failed"),
            Ok(Ok(reply)) => reply,
        };

        match serde_json::from_slice::<AuthResponse>(&reply).context("malformed auth response")? {
            AuthResponse::Success => Ok(Self { channel }),
            AuthResponse::Failed { reason } => bail!("authentication failed: {reason}"),
        }
    }

    /// Request one screen frame.
    pub async fn screen(&mut self) -> Result<Screenshot> {
        self.send_json(&Command::Screen).await?;
        let reply = self
            .channel
            .recv()
            .await
            .context("waiting for screen frame")?;

        if let Ok(frame) = serde_json::from_slice::<ScreenFrame>(&reply) {
            let jpeg = base64::engine::general_purpose::STANDARD
                .decode(frame.image.as_bytes())
                .context("screen payload is not valid base64")?;
            return Ok(Screenshot {
                width: frame.width,
                height: frame.height,
                jpeg,
            });
        }

        match serde_json::from_slice::<TransferStatus>(&reply) {
            Ok(TransferStatus::Error { message }) => {
                bail!("server could not capture the screen: {message}")
            }
            _ => bail!("unexpected reply to screen request"),
        }
    }

    /// Fire-and-forget mouse event; no response frame exists.
    pub async fn mouse(&mut self, event: MouseEvent) -> Result<()> {
        self.send_json(&Command::Mouse(event)).await
    }

    /// Fire-and-forget keyboard event; no response frame exists.
    pub async fn keyboard(&mut self, event: KeyboardEvent) -> Result<()> {
        self.send_json(&Command::Keyboard(event)).await
    }

    /// Download `remote` from the server into `local`. Returns the byte count.
    pub async fn download(&mut self, remote: &str, local: impl AsRef<Path>) -> Result<u64> {
        self.send_json(&Command::FileDownload {
            path: remote.to_string(),
        })
        .await?;

        let reply = self
            .channel
            .recv()
            .await
            .context("waiting for download header")?;
        let size = match serde_json::from_slice::<DownloadHeader>(&reply)
            .context("malformed download header")?
        {
            DownloadHeader::Size { size } => size,
            DownloadHeader::Error { error } => bail!("server refused download: {error}"),
        };

        let local = local.as_ref();
        let mut file = File::create(local)
            .await
            .with_context(|| format!("failed to create {}", local.display()))?;
        transfer::recv_chunks(&mut self.channel, &mut file, size)
            .await
            .context("receiving file data")?;
        Ok(size)
    }

    /// Upload `local` to `remote` on the server. Returns the byte count.
    pub async fn upload(&mut self, local: impl AsRef<Path>, remote: &str) -> Result<u64> {
        let local = local.as_ref();
        let mut file = File::open(local)
            .await
            .with_context(|| format!("failed to open {}", local.display()))?;
        let size = file.metadata().await?.len();

        self.send_json(&Command::FileUpload {
            path: remote.to_string(),
            size,
        })
        .await?;
        transfer::send_chunks(&mut self.channel, &mut file, size).await?;

        let reply = self
            .channel
            .recv()
            .await
            .context("waiting for upload status")?;
        match serde_json::from_slice::<TransferStatus>(&reply)
            .context("malformed upload status")?
        {
            TransferStatus::Success => Ok(size),
            TransferStatus::Error { message } => bail!("server rejected upload: {message}"),
        }
    }

    async fn send_json<T: serde::Serialize>(&mut self, msg: &T) -> Result<()> {
        let bytes = serde_json::to_vec(msg)?;
        self.channel.send(&bytes).await?;
        Ok(())
    }
}

fn fix_host(addr: &str) -> String {
    match addr.strip_prefix("localhost:") {
        Some(port) => format!("127.0.0.1:{port}"),
        None => addr.to_string(),
    }
}
