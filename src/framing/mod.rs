//! Length-prefixed encrypted framing over a raw byte stream.
//!
//! TCP has no message boundaries and ciphertext length varies with the
//! payload, so every message is sent as `[u32 BE ciphertext length][ciphertext]`.
//! The prefix always describes the ciphertext, never the plaintext. This
//! framing applies to every message on the wire, including the handshake.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{self, CryptoError, Key};

/// Upper bound on a single ciphertext frame.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("frame too large: {0} bytes (max {max})", max = MAX_FRAME_SIZE)]
    FrameTooLarge(u32),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One encrypted message channel over a bidirectional byte stream.
///
/// Owns the stream and the session key. All sends and receives go through
/// the frame format above; a decryption failure means the peer holds a
/// different key or the stream is corrupted, and the channel must be
/// abandoned — there is no way to resynchronize a broken cipher stream.
pub struct FramedChannel<S> {
    stream: S,
    key: Key,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedChannel<S> {
    pub fn new(stream: S, key: Key) -> Self {
        Self { stream, key }
    }

    /// Encrypt `plaintext` and send it as one frame.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), ChannelError> {
        let ciphertext = crypto::encrypt(&self.key, plaintext)?;
        let len = ciphertext.len() as u32;
        if len > MAX_FRAME_SIZE {
            return Err(ChannelError::FrameTooLarge(len));
        }

        // Prefix and payload in one buffered write
        let mut buf = Vec::with_capacity(4 + ciphertext.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend(ciphertext);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one frame, waiting until the full ciphertext has arrived.
    ///
    /// A single transport read is not guaranteed to return a whole frame;
    /// `read_exact` loops until exactly the prefixed byte count is in hand.
    /// Decryption never runs on a partial frame.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut prefix = [0u8; 4];
        read_exact_or_closed(&mut self.stream, &mut prefix).await?;

        let len = u32::from_be_bytes(prefix);
        if len > MAX_FRAME_SIZE {
            return Err(ChannelError::FrameTooLarge(len));
        }

        let mut ciphertext = vec![0u8; len as usize];
        read_exact_or_closed(&mut self.stream, &mut ciphertext).await?;

        Ok(crypto::decrypt(&self.key, &ciphertext)?)
    }

    /// Access the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

async fn read_exact_or_closed<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
) -> Result<(), ChannelError> {
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ChannelError::ConnectionClosed)
        }
        Err(e) => Err(e.into()),
    }
}
