use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Frame header: magic (2) + length (4) + channel (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "RP" (0x52 0x50).
pub const MAGIC: [u8; 2] = [0x52, 0x50];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A framed payload with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this payload belongs to.
    pub channel: u16,
    /// The payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Channel  │ Payload          │
/// │ 0x52 0x50    │ (4B LE)   │ (2B LE)  │ (Length bytes)   │
/// │ "RP"         │           │          │                  │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(channel: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u16_le(channel);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let channel = u16::from_le_bytes([src[6], src[7]]);

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { channel, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec for framed byte streams.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(frame.channel, frame.payload.as_ref(), dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::channel::{CONTROL, ENVELOPE};

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x52, 0x50, 0x00][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(ENVELOPE, b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024 * 1024 * 32);
        buf.put_u16_le(ENVELOPE);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(CONTROL, b"first", &mut buf).unwrap();
        encode_frame(ENVELOPE, b"second", &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(f1.channel, CONTROL);
        assert_eq!(f1.payload.as_ref(), b"first");

        let f2 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(f2.channel, ENVELOPE);
        assert_eq!(f2.payload.as_ref(), b"second");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_encoder_rejects_oversized_payload() {
        let mut codec = FrameCodec::with_config(FrameConfig {
            max_payload_size: 4,
        });
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::new(ENVELOPE, b"too long".to_vec()), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 8, max: 4 }));
        assert!(dst.is_empty());
    }

    #[test]
    fn test_decode_eof_mid_frame_is_connection_closed() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        encode_frame(ENVELOPE, b"partial", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 3);

        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_framed_stream_over_duplex_pipe() {
        let (client, server) = tokio::io::duplex(8 * 1024);
        let mut writer = FramedWrite::new(client, FrameCodec::new());
        let mut reader = FramedRead::new(server, FrameCodec::new());

        let payload = vec![0xAB; 1024];
        writer
            .send(Frame::new(ENVELOPE, payload.clone()))
            .await
            .unwrap();
        writer.send(Frame::new(CONTROL, b"{}".to_vec())).await.unwrap();
        drop(writer);

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.channel, ENVELOPE);
        assert_eq!(first.payload.as_ref(), payload.as_slice());

        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.channel, CONTROL);

        assert!(reader.next().await.is_none());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(ENVELOPE, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
    }
}
