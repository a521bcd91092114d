//! Chunked file payload transfer over an established channel.
//!
//! Both transfer directions stream the file body as a sequence of encrypted
//! frames of at most [`CHUNK_SIZE`] plaintext bytes, with no per-chunk
//! acknowledgment. The declared size is authoritative: the receiver reads
//! frames until exactly that many bytes have accumulated, and any mismatch
//! is an error rather than a silent truncation.

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::framing::{ChannelError, FramedChannel};

/// Plaintext bytes per encrypted chunk frame.
pub const CHUNK_SIZE: usize = 4096;

/// Failure modes on the receiving end of a chunk stream.
#[derive(Debug, Error)]
pub enum RecvError {
    /// The channel itself failed; the session cannot continue.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The peer sent more bytes than it declared. The rest of the declared
    /// frame budget was drained first, so the channel stays in sync and can
    /// still carry an error reply.
    #[error("chunk stream overshot the declared size of {declared} bytes")]
    Overshoot { declared: u64 },
    /// The local sink failed. The remaining chunks were drained first, so
    /// the channel stays in sync and can still carry an error reply.
    #[error("writing transfer data: {0}")]
    Sink(std::io::Error),
}

/// Stream exactly `size` bytes from `source` as `ceil(size / CHUNK_SIZE)`
/// chunk frames.
pub async fn send_chunks<S, R>(
    channel: &mut FramedChannel<S>,
    source: &mut R,
    size: u64,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut remaining = size;
    let mut buf = [0u8; CHUNK_SIZE];

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        source
            .read_exact(&mut buf[..want])
            .await
            .context("transfer source ended early")?;
        channel.send(&buf[..want]).await?;
        remaining -= want as u64;
    }

    Ok(())
}

/// Receive exactly `size` bytes of chunk frames into `sink`.
///
/// A declared size of `size` bytes occupies `ceil(size / CHUNK_SIZE)` frames
/// on the wire. On overshoot, the rest of that frame budget is read and
/// discarded before the error is returned, so the next frame the caller
/// receives is a command again rather than a stray chunk. A peer that
/// streams more frames than it declared cannot be resynchronized — its
/// extra frames will fail command decoding and end the session there.
pub async fn recv_chunks<S, W>(
    channel: &mut FramedChannel<S>,
    sink: &mut W,
    size: u64,
) -> Result<(), RecvError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let declared_frames = (size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64;
    let mut frames_seen: u64 = 0;
    let mut received: u64 = 0;
    let mut sink_err: Option<std::io::Error> = None;

    while received < size {
        let chunk = channel.recv().await?;
        frames_seen += 1;
        if received + chunk.len() as u64 > size {
            while frames_seen < declared_frames {
                channel.recv().await?;
                frames_seen += 1;
            }
            return Err(RecvError::Overshoot { declared: size });
        }
        received += chunk.len() as u64;

        if sink_err.is_none() {
            if let Err(e) = sink.write_all(&chunk).await {
                sink_err = Some(e);
            }
        }
    }

    match sink_err {
        Some(e) => Err(RecvError::Sink(e)),
        None => sink.flush().await.map_err(RecvError::Sink),
    }
}

/// Read and discard a chunk stream of `size` bytes, keeping the channel in
/// sync when the destination could not be opened.
pub async fn drain_chunks<S>(channel: &mut FramedChannel<S>, size: u64) -> Result<(), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut received: u64 = 0;
    while received < size {
        let chunk = channel.recv().await?;
        received += chunk.len() as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_key;
    use std::io::{Seek, SeekFrom, Write};
    use tokio::io::duplex;

    fn temp_file_with(content: &[u8]) -> tokio::fs::File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(content).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        tokio::fs::File::from_std(file)
    }

    async fn read_back(mut file: tokio::fs::File) -> Vec<u8> {
        use tokio::io::AsyncSeekExt;
        file.seek(SeekFrom::Start(0)).await.unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn pump(content: Vec<u8>) -> Vec<u8> {
        let (a, b) = duplex(64 * 1024);
        let mut tx = FramedChannel::new(a, derive_key("pw"));
        let mut rx = FramedChannel::new(b, derive_key("pw"));

        let size = content.len() as u64;
        let sender = tokio::spawn(async move {
            let mut source = temp_file_with(&content);
            send_chunks(&mut tx, &mut source, size).await.unwrap();
            tx
        });

        let mut sink = tokio::fs::File::from_std(tempfile::tempfile().unwrap());
        recv_chunks(&mut rx, &mut sink, size).await.unwrap();
        sender.await.unwrap();
        read_back(sink).await
    }

    #[tokio::test]
    async fn chunk_boundaries_roundtrip() {
        for size in [0usize, 1, 4095, 4096, 4097, 3 * 4096 + 17] {
            let content: Vec<u8> = (0..size).map(|i| (i * 31 + 7) as u8).collect();
            assert_eq!(pump(content.clone()).await, content, "size {size}");
        }
    }

    #[tokio::test]
    async fn overshoot_is_an_error_and_leaves_the_channel_in_sync() {
        let (a, b) = duplex(64 * 1024);
        let mut tx = FramedChannel::new(a, derive_key("pw"));
        let mut rx = FramedChannel::new(b, derive_key("pw"));

        // Declares 5 bytes but streams 10, then keeps talking
        tokio::spawn(async move {
            tx.send(&[0u8; 10]).await.unwrap();
            tx.send(b"next message").await.unwrap();
        });

        let mut sink = tokio::fs::File::from_std(tempfile::tempfile().unwrap());
        let err = recv_chunks(&mut rx, &mut sink, 5).await.unwrap_err();
        assert!(matches!(err, RecvError::Overshoot { declared: 5 }));

        // The frame after the failed transfer reads as itself, not as a chunk
        assert_eq!(rx.recv().await.unwrap(), b"next message");
    }

    #[tokio::test]
    async fn overshoot_drains_the_rest_of_the_declared_frame_budget() {
        let (a, b) = duplex(256 * 1024);
        let mut tx = FramedChannel::new(a, derive_key("pw"));
        let mut rx = FramedChannel::new(b, derive_key("pw"));

        // 9000 declared bytes occupy 3 frames. The first frame alone
        // overshoots, so two budgeted frames are still in flight when the
        // error is detected and must be discarded before the follow-up.
        tokio::spawn(async move {
            tx.send(&[7u8; 10_000]).await.unwrap();
            tx.send(&[8u8; CHUNK_SIZE]).await.unwrap();
            tx.send(&[9u8; CHUNK_SIZE]).await.unwrap();
            tx.send(b"still speaking the protocol").await.unwrap();
        });

        let mut sink = tokio::fs::File::from_std(tempfile::tempfile().unwrap());
        let err = recv_chunks(&mut rx, &mut sink, 9000).await.unwrap_err();
        assert!(matches!(err, RecvError::Overshoot { declared: 9000 }));

        assert_eq!(rx.recv().await.unwrap(), b"still speaking the protocol");
    }

    #[tokio::test]
    async fn early_close_is_an_error() {
        let (a, b) = duplex(64 * 1024);
        let mut tx = FramedChannel::new(a, derive_key("pw"));
        let mut rx = FramedChannel::new(b, derive_key("pw"));

        tokio::spawn(async move {
            tx.send(&[0u8; 4096]).await.unwrap();
            // Connection drops with 4096 of 8192 bytes delivered
        });

        let mut sink = tokio::fs::File::from_std(tempfile::tempfile().unwrap());
        let err = recv_chunks(&mut rx, &mut sink, 8192).await.unwrap_err();
        assert!(matches!(
            err,
            RecvError::Channel(ChannelError::ConnectionClosed)
        ));
    }
}
