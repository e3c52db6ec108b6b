use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::channel::CONTROL;
use crate::error::{FrameError, Result};

/// Frame header: channel (2) + length (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest payload the 16-bit length field can announce.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A framed message with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel: u16,
    /// The message payload.
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

    pub fn is_control(&self) -> bool {
        self.channel == CONTROL
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬─────────────────┐
/// │ Channel  │ Length   │ Payload         │
/// │ (2B LE)  │ (2B LE)  │ (Length bytes)  │
/// └──────────┴──────────┴─────────────────┘
/// ```
///
/// Appends exactly `HEADER_SIZE + payload.len()` bytes to `dst`.
pub fn encode_frame(channel: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16_le(channel);
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Split local bytes into pieces that each fit in one frame.
///
/// `max` is clamped to `1..=MAX_PAYLOAD`. Empty input yields no pieces.
pub fn chunk_payload(data: &[u8], max: usize) -> std::slice::Chunks<'_, u8> {
    data.chunks(max.clamp(1, MAX_PAYLOAD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ChannelLow,
    ChannelHigh,
    LengthLow,
    LengthHigh,
    Payload,
}

/// Incremental frame parser.
///
/// Feed it whatever the socket produced; it keeps the partial header and
/// payload between calls and hands back every frame the chunk completed, in
/// order. A frame may span any number of chunks and a chunk may hold any
/// number of frames.
#[derive(Debug)]
pub struct FrameDecoder {
    stage: Stage,
    channel: u16,
    length: u16,
    payload: BytesMut,
    max_payload: usize,
}

impl FrameDecoder {
    /// `max_payload` is clamped to [`MAX_PAYLOAD`].
    pub fn new(max_payload: usize) -> Self {
        Self {
            stage: Stage::ChannelLow,
            channel: 0,
            length: 0,
            payload: BytesMut::new(),
            max_payload: max_payload.min(MAX_PAYLOAD),
        }
    }

    /// Decode a chunk, returning the frames it completed.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        self.decode_into(chunk, &mut frames)?;
        Ok(frames)
    }

    /// Decode a chunk, appending completed frames to `out`.
    ///
    /// On `PayloadTooLarge` the frames completed before the bad header are
    /// already in `out`; the decoder resets and the stream should be dropped.
    pub fn decode_into(&mut self, chunk: &[u8], out: &mut Vec<Frame>) -> Result<()> {
        let mut pos = 0;
        while pos < chunk.len() {
            match self.stage {
                Stage::ChannelLow => {
                    self.channel = u16::from(chunk[pos]);
                    self.stage = Stage::ChannelHigh;
                    pos += 1;
                }
                Stage::ChannelHigh => {
                    self.channel |= u16::from(chunk[pos]) << 8;
                    self.stage = Stage::LengthLow;
                    pos += 1;
                }
                Stage::LengthLow => {
                    self.length = u16::from(chunk[pos]);
                    self.stage = Stage::LengthHigh;
                    pos += 1;
                }
                Stage::LengthHigh => {
                    self.length |= u16::from(chunk[pos]) << 8;
                    pos += 1;
                    self.header_complete(out)?;
                }
                Stage::Payload => {
                    let wanted = usize::from(self.length) - self.payload.len();
                    let take = wanted.min(chunk.len() - pos);
                    self.payload.extend_from_slice(&chunk[pos..pos + take]);
                    pos += take;
                    if self.payload.len() == usize::from(self.length) {
                        let payload = self.payload.split().freeze();
                        out.push(Frame::new(self.channel, payload));
                        self.stage = Stage::ChannelLow;
                    }
                }
            }
        }
        Ok(())
    }

    fn header_complete(&mut self, out: &mut Vec<Frame>) -> Result<()> {
        let length = usize::from(self.length);
        if length > self.max_payload {
            self.reset();
            return Err(FrameError::PayloadTooLarge {
                size: length,
                max: self.max_payload,
            });
        }
        if length == 0 {
            out.push(Frame::new(self.channel, Bytes::new()));
            self.stage = Stage::ChannelLow;
        } else {
            self.payload.reserve(length);
            self.stage = Stage::Payload;
        }
        Ok(())
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::ChannelLow
    }

    /// Bytes of the current frame received so far (header included).
    pub fn buffered(&self) -> usize {
        match self.stage {
            Stage::ChannelLow => 0,
            Stage::ChannelHigh => 1,
            Stage::LengthLow => 2,
            Stage::LengthHigh => 3,
            Stage::Payload => HEADER_SIZE + self.payload.len(),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.stage = Stage::ChannelLow;
        self.channel = 0;
        self.length = 0;
        self.payload.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD)
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default and ceiling: 65 535.
    pub max_payload_size: usize,
    /// How long a blocking drain may go without the stream taking a byte.
    pub write_timeout: Option<Duration>,
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// The limit actually enforced: never above what the header can carry,
    /// never zero.
    pub fn effective_max_payload(&self) -> usize {
        self.max_payload_size.clamp(1, MAX_PAYLOAD)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(frames: &[(u16, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (channel, payload) in frames {
            encode_frame(*channel, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn header_layout_is_channel_then_length() {
        let bytes = wire(&[(0x0102, &b"abc"[..])]);
        assert_eq!(bytes, vec![0x02, 0x01, 0x03, 0x00, b'a', b'b', b'c']);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let err = encode_frame(1, &payload, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size, .. } if size == MAX_PAYLOAD + 1));
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_accepts_largest_payload() {
        let mut buf = BytesMut::new();
        let payload = vec![7u8; MAX_PAYLOAD];
        encode_frame(3, &payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + MAX_PAYLOAD);

        let frames = FrameDecoder::default().decode(&buf).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn decodes_many_frames_from_one_chunk() {
        let bytes = wire(&[(1, &b"first"[..]), (2, &b"second"[..]), (0, &b"\x01\x05\x00"[..])]);
        let frames = FrameDecoder::default().decode(&bytes).unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::new(1, &b"first"[..]),
                Frame::new(2, &b"second"[..]),
                Frame::new(0, &b"\x01\x05\x00"[..]),
            ]
        );
    }

    #[test]
    fn one_byte_at_a_time() {
        let input: Vec<(u16, Vec<u8>)> = vec![
            (0, vec![1, 3, 0]),
            (3, (0..50).collect()),
            (9, Vec::new()),
            (65535, vec![0xFF; 300]),
        ];
        let refs: Vec<(u16, &[u8])> = input.iter().map(|(c, p)| (*c, p.as_slice())).collect();
        let bytes = wire(&refs);

        let mut decoder = FrameDecoder::default();
        let mut frames = Vec::new();
        for byte in &bytes {
            decoder.decode_into(std::slice::from_ref(byte), &mut frames).unwrap();
        }

        assert!(decoder.is_idle());
        let got: Vec<(u16, Vec<u8>)> = frames
            .into_iter()
            .map(|f| (f.channel, f.payload.to_vec()))
            .collect();
        assert_eq!(got, input);
    }

    #[test]
    fn every_split_point_reassembles() {
        let bytes = wire(&[(0, &b"\x02\x07\x00"[..]), (7, &b"pixels"[..]), (0, &b"\x08"[..])]);
        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::default();
            let mut frames = decoder.decode(&bytes[..split]).unwrap();
            frames.extend(decoder.decode(&bytes[split..]).unwrap());
            assert_eq!(frames.len(), 3, "split at {split}");
            assert_eq!(frames[1], Frame::new(7, &b"pixels"[..]));
        }
    }

    #[test]
    fn interleaved_channels_keep_their_bytes() {
        let mut expected_control = Vec::new();
        let mut expected_video = Vec::new();
        let mut frames_in = Vec::new();
        for i in 0..20u8 {
            if i % 3 == 0 {
                let payload = vec![8, i, 0, i, 0];
                expected_control.extend_from_slice(&payload);
                frames_in.push((0u16, payload));
            } else {
                let payload = vec![0xA0 | (i & 0x0F); usize::from(i) + 1];
                expected_video.extend_from_slice(&payload);
                frames_in.push((7u16, payload));
            }
        }
        let refs: Vec<(u16, &[u8])> = frames_in.iter().map(|(c, p)| (*c, p.as_slice())).collect();
        let bytes = wire(&refs);

        // Uneven chunk sizes so splits land inside headers and payloads.
        let mut decoder = FrameDecoder::default();
        let mut control = Vec::new();
        let mut video = Vec::new();
        let mut pos = 0;
        let mut step = 1;
        while pos < bytes.len() {
            let end = (pos + step).min(bytes.len());
            for frame in decoder.decode(&bytes[pos..end]).unwrap() {
                match frame.channel {
                    0 => control.extend_from_slice(&frame.payload),
                    7 => video.extend_from_slice(&frame.payload),
                    other => panic!("unexpected channel {other}"),
                }
            }
            pos = end;
            step = step % 7 + 2;
        }

        assert_eq!(control, expected_control);
        assert_eq!(video, expected_video);
    }

    #[test]
    fn zero_length_frame_is_delivered() {
        let frames = FrameDecoder::default().decode(&[5, 0, 0, 0]).unwrap();
        assert_eq!(frames, vec![Frame::new(5, Bytes::new())]);
    }

    #[test]
    fn partial_state_is_reported() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.decode(&[1, 0, 4]).unwrap().is_empty());
        assert_eq!(decoder.buffered(), 3);
        assert!(decoder.decode(&[0, b'a', b'b']).unwrap().is_empty());
        assert_eq!(decoder.buffered(), HEADER_SIZE + 2);
        assert!(!decoder.is_idle());

        let frames = decoder.decode(b"cd").unwrap();
        assert_eq!(frames, vec![Frame::new(1, &b"abcd"[..])]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn header_over_limit_is_fatal() {
        let mut decoder = FrameDecoder::new(16);
        let mut frames = Vec::new();
        let mut bytes = wire(&[(2, &b"ok"[..])]);
        bytes.extend_from_slice(&[2, 0, 17, 0]);

        let err = decoder.decode_into(&bytes, &mut frames).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 17, max: 16 }));
        assert_eq!(frames, vec![Frame::new(2, &b"ok"[..])]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn decoder_limit_is_clamped() {
        assert_eq!(FrameDecoder::new(usize::MAX).max_payload(), MAX_PAYLOAD);
    }

    #[test]
    fn chunk_payload_respects_limit() {
        let data = vec![1u8; 10];
        let pieces: Vec<_> = chunk_payload(&data, 4).map(<[u8]>::len).collect();
        assert_eq!(pieces, vec![4, 4, 2]);
        assert_eq!(chunk_payload(&[], 4).count(), 0);
        assert_eq!(chunk_payload(&data, 0).count(), 10);
    }

    #[test]
    fn config_builders_and_effective_limit() {
        let cfg = FrameConfig::default()
            .with_max_payload_size(1_000_000)
            .with_write_timeout(Some(Duration::from_secs(1)));
        assert_eq!(cfg.effective_max_payload(), MAX_PAYLOAD);
        assert_eq!(cfg.write_timeout, Some(Duration::from_secs(1)));
        assert_eq!(
            FrameConfig::default()
                .with_max_payload_size(512)
                .effective_max_payload(),
            512
        );
    }

    #[test]
    fn frame_wire_size() {
        let frame = Frame::new(1, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
        assert!(!frame.is_control());
        assert!(Frame::new(0, Bytes::new()).is_control());
    }
}
