//! `tokio_util` codec over the same wire format, for callers that already
//! run a tokio runtime and want `Framed` streams instead of the poll loop.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};

#[derive(Debug)]
pub struct MuxCodec {
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    max_payload: usize,
}

impl MuxCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        let max_payload = config.effective_max_payload();
        Self {
            decoder: FrameDecoder::new(max_payload),
            ready: VecDeque::new(),
            max_payload,
        }
    }
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MuxCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if self.ready.is_empty() && !src.is_empty() {
            // The decoder keeps partial state itself, so the buffer is always
            // consumed whole.
            let chunk = src.split();
            let mut frames = Vec::new();
            let decoded = self.decoder.decode_into(&chunk, &mut frames);
            self.ready.extend(frames);
            decoded?;
        }
        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.decoder.is_idle() {
            Ok(None)
        } else {
            Err(FrameError::ConnectionClosed)
        }
    }
}

impl Encoder<Frame> for MuxCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload,
            });
        }
        encode_frame(frame.channel, &frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_unix_pair() {
        let (left, right) = tokio::net::UnixStream::pair().unwrap();
        let mut sink = FramedWrite::new(left, MuxCodec::new());
        let stream = FramedRead::new(right, MuxCodec::new());

        sink.send(Frame::new(0, vec![1u8, 3, 0])).await.unwrap();
        sink.send(Frame::new(3, vec![0x5A; 50])).await.unwrap();
        sink.send(Frame::new(0, vec![2u8, 3, 0])).await.unwrap();
        drop(sink);

        let frames: Vec<Frame> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].channel, 3);
        assert_eq!(frames[1].payload.len(), 50);
        assert!(frames[2].is_control());
    }

    #[test]
    fn decode_keeps_partial_state_between_calls() {
        let mut codec = MuxCodec::new();
        let mut wire = BytesMut::new();
        encode_frame(7, b"pixels", &mut wire).unwrap();
        encode_frame(0, b"\x08", &mut wire).unwrap();

        let mut src = BytesMut::from(&wire[..5]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(src.is_empty());

        src.extend_from_slice(&wire[5..]);
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Frame::new(7, &b"pixels"[..])));
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Frame::new(0, &b"\x08"[..])));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn eof_inside_frame_is_an_error() {
        let mut codec = MuxCodec::new();
        let mut src = BytesMut::from(&[1u8, 0, 9][..]);
        assert!(matches!(
            codec.decode_eof(&mut src),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = MuxCodec::with_config(&FrameConfig::default().with_max_payload_size(2));
        let mut dst = BytesMut::new();
        let err = codec.encode(Frame::new(1, &b"abc"[..]), &mut dst).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 3, max: 2 }));
    }
}
