//! Framed peer-wire I/O.
//!
//! After the fixed-size handshake every peer-wire message is a 4-byte
//! big-endian length followed by that many bytes, the first of which is the
//! message id. Extension messages (id 20) carry one more byte, the extended
//! sub-id, before their payload.

use super::error::FetchError;
use super::handshake::{build_handshake, verify_handshake, HANDSHAKE_LEN};
use crate::primitives::{InfoHash, ID_LEN};
use log::{debug, trace};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Message id of BEP-10 extension messages.
pub const EXTENDED: u8 = 20;
/// Extended sub-id of the extension handshake.
pub const EXTENDED_HANDSHAKE: u8 = 0;
/// Largest frame accepted from a peer. A metadata data message is a little
/// over 16 KiB, but bitfields of large torrents can be bigger.
pub const MAX_MESSAGE_LEN: usize = 1 << 20;

/// A peer-wire stream with a per-read deadline.
#[derive(Debug)]
pub struct PeerWire<S> {
    stream: S,
    read_timeout: Duration,
}

impl<S> PeerWire<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_timeout,
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), FetchError> {
        timeout(self.read_timeout, self.stream.read_exact(buf)).await??;
        Ok(())
    }

    /// Sends our handshake and validates the peer's answer.
    pub async fn handshake(
        &mut self,
        info_hash: &InfoHash,
        peer_id: &[u8; ID_LEN],
    ) -> Result<(), FetchError> {
        self.stream
            .write_all(&build_handshake(info_hash, peer_id))
            .await?;
        self.stream.flush().await?;

        let mut response = [0u8; HANDSHAKE_LEN];
        self.read_exact(&mut response).await?;
        verify_handshake(&response, info_hash)
    }

    /// Sends one extension message with the given sub-id.
    pub async fn send_extended(&mut self, extended_id: u8, payload: &[u8]) -> Result<(), FetchError> {
        let len = u32::try_from(payload.len() + 2)
            .map_err(|_| FetchError::MessageTooLarge(payload.len() + 2))?;

        let mut frame = Vec::with_capacity(4 + 2 + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(EXTENDED);
        frame.push(extended_id);
        frame.extend_from_slice(payload);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one frame. Keep-alives come back as an empty body.
    async fn receive_frame(&mut self) -> Result<Vec<u8>, FetchError> {
        let mut len = [0u8; 4];
        self.read_exact(&mut len).await?;

        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(FetchError::MessageTooLarge(len));
        }

        let mut body = vec![0u8; len];
        self.read_exact(&mut body).await?;
        Ok(body)
    }

    /// Reads until the next extension message.
    ///
    /// Keep-alives and ordinary peer-wire messages (bitfield, have, choke and
    /// so on) are skipped.
    ///
    /// # Returns
    ///
    /// The extended sub-id and the payload following it.
    pub async fn receive_extended(&mut self) -> Result<(u8, Vec<u8>), FetchError> {
        loop {
            let mut body = self.receive_frame().await?;
            match body.first() {
                None => trace!("Skipping keep-alive"),
                Some(&EXTENDED) if body.len() >= 2 => {
                    let extended_id = body[1];
                    body.drain(..2);
                    return Ok((extended_id, body));
                }
                Some(&EXTENDED) => return Err(FetchError::MissingField("extended id")),
                Some(id) => debug!("Skipping peer-wire message id {id}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder as MockIoBuilder;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut framed = (body.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(body);
        framed
    }

    #[tokio::test]
    async fn test_send_extended_framing() {
        let expected = [&[0, 0, 0, 5, 20, 3][..], b"abc"].concat();
        let mock = MockIoBuilder::new().write(&expected).build();
        let mut wire = PeerWire::new(mock, Duration::from_secs(1));

        wire.send_extended(3, b"abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_skips_non_extended_messages() {
        let mock = MockIoBuilder::new()
            .read(&frame(&[]))
            .read(&frame(&[5, 0xff, 0xff]))
            .read(&frame(&[20, 1, b'x', b'y']))
            .build();
        let mut wire = PeerWire::new(mock, Duration::from_secs(1));

        let (id, payload) = wire.receive_extended().await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(payload, b"xy");
    }

    #[tokio::test]
    async fn test_receive_rejects_oversized_frame() {
        let mock = MockIoBuilder::new()
            .read(&((MAX_MESSAGE_LEN as u32) + 1).to_be_bytes())
            .build();
        let mut wire = PeerWire::new(mock, Duration::from_secs(1));

        assert!(matches!(
            wire.receive_extended().await,
            Err(FetchError::MessageTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_eof() {
        let mock = MockIoBuilder::new().read(&[0, 0, 0, 10, 20]).build();
        let mut wire = PeerWire::new(mock, Duration::from_secs(1));

        assert!(matches!(
            wire.receive_extended().await,
            Err(FetchError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let mut wire = PeerWire::new(client, Duration::from_millis(20));

        assert!(matches!(
            wire.receive_extended().await,
            Err(FetchError::TimedOut)
        ));
    }
}
