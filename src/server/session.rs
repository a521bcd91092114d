//! Per-connection protocol state machine.
//!
//! One session owns its socket, its framed channel, and any in-flight
//! transfer state. The loop is strictly sequential: one frame is read,
//! dispatched, and answered (when the command has an answer) before the
//! next frame is read.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine;
use tokio::fs::File;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::framing::{ChannelError, FramedChannel};
use crate::protocol::{
    decode_command, AuthRequest, AuthResponse, Command, DecodedCommand, DownloadHeader,
    ScreenFrame, TransferStatus,
};
use crate::transfer;

use super::Shared;

/// How long an unauthenticated peer may hold a connection open. Once
/// authenticated, reads block indefinitely — idle connections are valid.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle. Strictly two-phase: nothing but the auth frame is
/// accepted before `Authenticated`, and there is no re-authentication — a
/// failed handshake closes the socket, and a new connection starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    Authenticating,
    Authenticated,
    Closed,
}

pub(crate) struct Session {
    id: u64,
    peer_addr: SocketAddr,
    channel: FramedChannel<TcpStream>,
    shared: Shared,
    state: SessionState,
    last_activity: Instant,
}

impl Session {
    pub(crate) async fn run(
        id: u64,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shared: Shared,
    ) -> Result<()> {
        let channel = FramedChannel::new(stream, shared.key.clone());
        let mut session = Session {
            id,
            peer_addr,
            channel,
            shared,
            state: SessionState::Connected,
            last_activity: Instant::now(),
        };

        let authenticated = match timeout(HANDSHAKE_TIMEOUT, session.handshake()).await {
            Ok(result) => result?,
            Err(_) => {
                session.transition(SessionState::Closed);
                anyhow::bail!("handshake timed out after {HANDSHAKE_TIMEOUT:?}");
            }
        };
        if !authenticated {
            session.transition(SessionState::Closed);
            return Ok(());
        }

        session.transition(SessionState::Authenticated);
        info!(id, peer = %peer_addr, "authenticated");

        let result = session.command_loop().await;
        debug!(
            id,
            idle_secs = session.last_activity.elapsed().as_secs(),
            "session closing"
        );
        session.transition(SessionState::Closed);
        result
    }

    fn transition(&mut self, next: SessionState) {
        debug!(id = self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// The first frame must be `{"password": ...}`.
    ///
    /// A frame that fails decryption is a clean authentication failure: the
    /// peer derived a different key and could not read a response anyway, so
    /// the socket just closes. A matching key with a wrong password gets an
    /// explicit failure frame before the close.
    async fn handshake(&mut self) -> Result<bool> {
        self.transition(SessionState::Authenticating);

        let frame = match self.channel.recv().await {
            Ok(frame) => frame,
            Err(ChannelError::Crypto(_)) => {
                warn!(id = self.id, peer = %self.peer_addr, "handshake frame failed decryption");
                return Ok(false);
            }
            Err(ChannelError::ConnectionClosed) => return Ok(false),
            Err(e) => return Err(e).context("reading auth frame"),
        };

        let auth: AuthRequest =
            serde_json::from_slice(&frame).context("handshake frame is not an auth request")?;

        if auth.password == self.shared.password {
            self.send_json(&AuthResponse::Success).await?;
            Ok(true)
        } else {
            warn!(id = self.id, peer = %self.peer_addr, "invalid password");
            self.send_json(&AuthResponse::Failed {
                reason: "Invalid password".into(),
            })
            .await?;
            Ok(false)
        }
    }

    async fn command_loop(&mut self) -> Result<()> {
        loop {
            let frame = match self.channel.recv().await {
                Ok(frame) => frame,
                Err(ChannelError::ConnectionClosed) => {
                    debug!(id = self.id, peer = %self.peer_addr, "peer disconnected");
                    return Ok(());
                }
                // Decryption and framing failures are fatal: a channel whose
                // cipher state disagrees cannot recover mid-stream.
                Err(e) => return Err(e).context("receiving command frame"),
            };
            self.last_activity = Instant::now();

            let cmd = match decode_command(&frame) {
                Ok(DecodedCommand::Known(cmd)) => cmd,
                Ok(DecodedCommand::Unknown(action)) => {
                    warn!(id = self.id, action, "ignoring unrecognized command");
                    continue;
                }
                Err(e) => return Err(e).context("command frame is not JSON"),
            };

            self.dispatch(cmd).await?;
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Screen => self.send_screen().await,
            Command::Mouse(event) => {
                // Fire-and-forget: injection failures never produce a reply
                // and never tear down the session
                if let Err(e) = self.shared.injector.lock().await.mouse(&event) {
                    warn!(id = self.id, "mouse injection failed: {e:#}");
                }
                Ok(())
            }
            Command::Keyboard(event) => {
                if let Err(e) = self.shared.injector.lock().await.keyboard(&event) {
                    warn!(id = self.id, "keyboard injection failed: {e:#}");
                }
                Ok(())
            }
            Command::FileDownload { path } => self.send_file(&path).await,
            Command::FileUpload { path, size } => self.receive_file(&path, size).await,
        }
    }

    async fn send_screen(&mut self) -> Result<()> {
        let frame = match self.shared.grabber.grab().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = self.id, "screen capture failed: {e:#}");
                return self
                    .send_json(&TransferStatus::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        };

        let image = base64::engine::general_purpose::STANDARD.encode(&frame.jpeg);
        debug!(
            id = self.id,
            width = frame.width,
            height = frame.height,
            jpeg_bytes = frame.jpeg.len(),
            "sending screen frame"
        );
        self.send_json(&ScreenFrame {
            width: frame.width,
            height: frame.height,
            image,
        })
        .await
    }

    async fn send_file(&mut self, path: &str) -> Result<()> {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(id = self.id, path, "download of missing file refused");
                return self
                    .send_json(&DownloadHeader::Error {
                        error: "File not found".into(),
                    })
                    .await;
            }
            Err(e) => {
                return self
                    .send_json(&DownloadHeader::Error {
                        error: e.to_string(),
                    })
                    .await;
            }
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return self
                .send_json(&DownloadHeader::Error {
                    error: "File not found".into(),
                })
                .await;
        }

        let size = metadata.len();
        self.send_json(&DownloadHeader::Size { size }).await?;
        transfer::send_chunks(&mut self.channel, &mut file, size).await?;
        info!(id = self.id, path, size, "file sent");
        Ok(())
    }

    async fn receive_file(&mut self, path: &str, size: u64) -> Result<()> {
        let opened = async {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            File::create(path).await
        }
        .await;

        let mut file = match opened {
            Ok(file) => file,
            Err(e) => {
                // The chunk stream is already in flight; drain it so the
                // channel stays in sync before reporting the failure.
                warn!(id = self.id, path, "upload destination unavailable: {e}");
                transfer::drain_chunks(&mut self.channel, size).await?;
                return self
                    .send_json(&TransferStatus::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        };

        match transfer::recv_chunks(&mut self.channel, &mut file, size).await {
            Ok(()) => {
                info!(id = self.id, path, size, "file received");
                self.send_json(&TransferStatus::Success).await
            }
            // Size mismatch is a failed transfer, not a failed session: the
            // chunk pump has already resynchronized the channel, so report
            // and keep serving
            Err(transfer::RecvError::Overshoot { .. }) => {
                warn!(id = self.id, path, size, "upload overshot its declared size");
                self.send_json(&TransferStatus::Error {
                    message: format!("upload exceeded the declared size of {size} bytes"),
                })
                .await
            }
            Err(transfer::RecvError::Sink(e)) => {
                warn!(id = self.id, path, "writing upload failed: {e}");
                self.send_json(&TransferStatus::Error {
                    message: e.to_string(),
                })
                .await
            }
            Err(transfer::RecvError::Channel(e)) => Err(e).context("receiving upload"),
        }
    }

    async fn send_json<T: serde::Serialize>(&mut self, msg: &T) -> Result<()> {
        let bytes = serde_json::to_vec(msg)?;
        self.channel.send(&bytes).await?;
        Ok(())
    }
}
