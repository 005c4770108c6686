use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Default maximum body size accepted from the wire: 64 KiB.
///
/// Endpoints speak short frames; the cap only exists so a corrupted length
/// preamble cannot make the reader allocate gigabytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Width of the little-endian length preamble in front of every frame body.
///
/// Most endpoints use a single byte (body <= 255 bytes including the call
/// id); bulk devices such as displays negotiate wider preambles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreambleWidth {
    /// 1-byte length, body up to 255 bytes.
    #[default]
    U8,
    /// 2-byte length, body up to 65 535 bytes.
    U16,
    /// 4-byte length.
    U32,
}

impl PreambleWidth {
    /// Number of preamble bytes on the wire.
    pub const fn len(self) -> usize {
        match self {
            PreambleWidth::U8 => 1,
            PreambleWidth::U16 => 2,
            PreambleWidth::U32 => 4,
        }
    }

    /// Largest body length this preamble can express.
    pub const fn capacity(self) -> usize {
        match self {
            PreambleWidth::U8 => u8::MAX as usize,
            PreambleWidth::U16 => u16::MAX as usize,
            PreambleWidth::U32 => u32::MAX as usize,
        }
    }

    /// Parse a preamble width from its byte count.
    pub const fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(PreambleWidth::U8),
            2 => Some(PreambleWidth::U16),
            4 => Some(PreambleWidth::U32),
            _ => None,
        }
    }

    fn put_len(self, len: usize, dst: &mut BytesMut) {
        match self {
            PreambleWidth::U8 => dst.put_u8(len as u8),
            PreambleWidth::U16 => dst.put_u16_le(len as u16),
            PreambleWidth::U32 => dst.put_u32_le(len as u32),
        }
    }

    fn peek_len(self, src: &[u8]) -> usize {
        match self {
            PreambleWidth::U8 => src[0] as usize,
            PreambleWidth::U16 => u16::from_le_bytes([src[0], src[1]]) as usize,
            PreambleWidth::U32 => u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize,
        }
    }
}

/// Encode one frame into the wire format: `[length][body]`.
pub fn encode_frame(
    body: &[u8],
    width: PreambleWidth,
    max_frame_len: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    let max = max_frame_len.min(width.capacity());
    if body.len() > max {
        return Err(FrameError::BodyTooLarge {
            size: body.len(),
            max,
        });
    }
    dst.reserve(width.len() + body.len());
    width.put_len(body.len(), dst);
    dst.put_slice(body);
    Ok(())
}

/// Pull one complete frame body out of a buffer.
///
/// Returns `Ok(None)` while the buffer does not yet hold a complete frame.
/// On success, consumes exactly the returned frame's bytes, leaving any
/// following frame (or partial frame) in place. Feeding the stream in
/// arbitrary chunks yields the same frame sequence as feeding it whole.
pub fn decode_frame(
    src: &mut BytesMut,
    width: PreambleWidth,
    max_frame_len: usize,
) -> Result<Option<Bytes>> {
    if src.len() < width.len() {
        return Ok(None); // Need more data
    }

    let body_len = width.peek_len(&src[..]);
    let max = max_frame_len.min(width.capacity());
    if body_len > max {
        return Err(FrameError::BodyTooLarge {
            size: body_len,
            max,
        });
    }

    if src.len() < width.len() + body_len {
        return Ok(None); // Need more data
    }

    src.advance(width.len());
    Ok(Some(src.split_to(body_len).freeze()))
}

/// Stateless length-preamble codec, usable directly or through
/// `tokio_util::codec::{FramedRead, FramedWrite}`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    width: PreambleWidth,
    max_frame_len: usize,
}

impl FrameCodec {
    /// Create a codec with the given preamble width and the default body cap.
    pub fn new(width: PreambleWidth) -> Self {
        Self {
            width,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Create a codec with an explicit body cap.
    pub fn with_max_frame_len(width: PreambleWidth, max_frame_len: usize) -> Self {
        Self {
            width,
            max_frame_len,
        }
    }

    /// Preamble width on the wire.
    pub fn width(&self) -> PreambleWidth {
        self.width
    }

    /// Effective body cap (configured cap bounded by preamble capacity).
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len.min(self.width.capacity())
    }

    /// Whether `src` holds a started-but-incomplete frame.
    ///
    /// Only meaningful after [`Decoder::decode`] has drained every complete
    /// frame; whatever remains then belongs to a frame still in flight.
    pub fn has_partial(&self, src: &BytesMut) -> bool {
        !src.is_empty()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.width, self.max_frame_len)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&body, self.width, self.max_frame_len, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_default_width() {
        let mut buf = BytesMut::new();
        let body = [0x05, 0x02, 0x00, 0x07];

        encode_frame(&body, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x04, 0x05, 0x02, 0x00, 0x07]);

        let frame = decode_frame(&mut buf, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_ref(), &body);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrip_all_widths() {
        for width in [PreambleWidth::U8, PreambleWidth::U16, PreambleWidth::U32] {
            let mut buf = BytesMut::new();
            let body = vec![0xAB; 200];

            encode_frame(&body, width, DEFAULT_MAX_FRAME_LEN, &mut buf).unwrap();
            assert_eq!(buf.len(), width.len() + body.len());

            let frame = decode_frame(&mut buf, width, DEFAULT_MAX_FRAME_LEN)
                .unwrap()
                .unwrap();
            assert_eq!(frame.as_ref(), body.as_slice());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn decode_incomplete_preamble() {
        let mut buf = BytesMut::from(&[0x05u8][..]);
        let result = decode_frame(&mut buf, PreambleWidth::U16, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN, &mut buf).unwrap();
        buf.truncate(3);

        let result = decode_frame(&mut buf, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decode_multiple_frames_from_one_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN, &mut buf).unwrap();
        encode_frame(b"second", PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN, &mut buf).unwrap();
        encode_frame(&[0xFF], PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN, &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        let f2 = decode_frame(&mut buf, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        let f3 = decode_frame(&mut buf, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();

        assert_eq!(f1.as_ref(), b"first");
        assert_eq!(f2.as_ref(), b"second");
        assert_eq!(f3.as_ref(), &[0xFF]);
        assert!(buf.is_empty());
    }

    #[test]
    fn split_invariant_reassembly() {
        // The same stream must decode identically for every chunking,
        // including splits inside the preamble and inside a body.
        let mut wire = BytesMut::new();
        encode_frame(b"alpha", PreambleWidth::U16, DEFAULT_MAX_FRAME_LEN, &mut wire).unwrap();
        encode_frame(&[], PreambleWidth::U16, DEFAULT_MAX_FRAME_LEN, &mut wire).unwrap();
        encode_frame(b"bravo-charlie", PreambleWidth::U16, DEFAULT_MAX_FRAME_LEN, &mut wire)
            .unwrap();
        let wire = wire.freeze();

        let mut whole = BytesMut::from(wire.as_ref());
        let mut expected = Vec::new();
        while let Some(frame) =
            decode_frame(&mut whole, PreambleWidth::U16, DEFAULT_MAX_FRAME_LEN).unwrap()
        {
            expected.push(frame);
        }
        assert_eq!(expected.len(), 3);

        for chunk_size in 1..wire.len() {
            let mut buf = BytesMut::new();
            let mut got = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                while let Some(frame) =
                    decode_frame(&mut buf, PreambleWidth::U16, DEFAULT_MAX_FRAME_LEN).unwrap()
                {
                    got.push(frame);
                }
            }
            assert_eq!(got, expected, "chunk size {chunk_size}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn encode_rejects_body_over_preamble_capacity() {
        let mut buf = BytesMut::new();
        let body = vec![0u8; 256];
        let err = encode_frame(&body, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN, &mut buf)
            .unwrap_err();
        assert!(matches!(err, FrameError::BodyTooLarge { size: 256, max: 255 }));
    }

    #[test]
    fn decode_rejects_length_over_cap() {
        // A corrupt preamble claiming a huge body must fail instead of
        // waiting forever for bytes that will never arrive.
        let mut buf = BytesMut::new();
        buf.put_u16_le(40_000);
        let err = decode_frame(&mut buf, PreambleWidth::U16, 1024).unwrap_err();
        assert!(matches!(err, FrameError::BodyTooLarge { size: 40_000, max: 1024 }));
    }

    #[test]
    fn zero_length_body() {
        let mut buf = BytesMut::new();
        encode_frame(&[], PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x00]);

        let frame = decode_frame(&mut buf, PreambleWidth::U8, DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn codec_decoder_encoder_agree_with_free_functions() {
        let mut codec = FrameCodec::new(PreambleWidth::U8);
        let mut buf = BytesMut::new();

        codec.encode(Bytes::from_static(&[0x05, 0x2A]), &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x02, 0x05, 0x2A]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[0x05, 0x2A]);
        assert!(!codec.has_partial(&buf));
    }

    #[test]
    fn has_partial_tracks_incomplete_frames() {
        let mut codec = FrameCodec::new(PreambleWidth::U8);
        let mut buf = BytesMut::new();

        buf.put_u8(4);
        buf.put_slice(&[0x01, 0x02]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.has_partial(&buf));

        buf.put_slice(&[0x03, 0x04]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(!codec.has_partial(&buf));
    }

    #[test]
    fn width_from_bytes() {
        assert_eq!(PreambleWidth::from_bytes(1), Some(PreambleWidth::U8));
        assert_eq!(PreambleWidth::from_bytes(2), Some(PreambleWidth::U16));
        assert_eq!(PreambleWidth::from_bytes(4), Some(PreambleWidth::U32));
        assert_eq!(PreambleWidth::from_bytes(3), None);
        assert_eq!(PreambleWidth::from_bytes(0), None);
    }
}
