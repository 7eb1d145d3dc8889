// ABOUTME: Wire format for the chat relay protocol — packet header, fields, kind enum
// ABOUTME: Provides Packet encode/decode and the non-consuming frame-completeness validator

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use std::io::Cursor;
use thiserror::Error;

/// Fixed header size in bytes: packet_id(2) + kind(1) + sender_id(1) + receiver_id(1) + n_fields(1).
pub const HEADER_LEN: usize = 6;

/// Maximum number of fields a packet may carry, and the maximum length of any one field.
pub const MAX_FIELDS: usize = 255;
pub const MAX_FIELD_LEN: usize = 255;

/// Packet kind discriminant (wire value in offset 2 of the header).
#[derive(TryFromPrimitive, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Heartbeat = 0,
    Connect = 1,
    Disconnect = 2,
    ReqTime = 3,
    ReqHost = 4,
    ReqClientList = 5,
    ReqSend = 6,
    Ack = 7,
    Fwd = 8,
}

/// Errors from encoding or decoding a single packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes were available to decode a complete packet.
    #[error("frame truncated: need more data")]
    Truncated,

    /// A field, or the field count, exceeded the 255-byte/255-field wire limit.
    #[error("encoding too large: {0}")]
    EncodingTooLarge(&'static str),

    /// The kind byte did not match any known `PacketKind` variant.
    #[error("unknown packet kind: {0}")]
    UnknownKind(u8),
}

/// The single unit on the wire: an addressed, typed, length-delimited packet.
///
/// See the wire format table in the crate's specification: a 2-byte little-endian
/// packet id, a 1-byte kind, 1-byte sender and receiver ids, a field count, and
/// that many length-prefixed fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub packet_id: u16,
    pub kind: PacketKind,
    pub sender_id: u8,
    pub receiver_id: u8,
    pub fields: Vec<String>,
}

impl Packet {
    pub fn new(
        packet_id: u16,
        kind: PacketKind,
        sender_id: u8,
        receiver_id: u8,
        fields: Vec<String>,
    ) -> Self {
        Self {
            packet_id,
            kind,
            sender_id,
            receiver_id,
            fields,
        }
    }

    /// The exact number of bytes `encode` will write, computed without encoding.
    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.fields.iter().map(|f| 1 + f.len()).sum::<usize>()
    }

    /// Encode this packet into `buf` in wire order.
    ///
    /// Fails with `EncodingTooLarge` if any field is longer than 255 bytes or there
    /// are more than 255 fields, leaving `buf` unspecified (callers should discard it).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        if self.fields.len() > MAX_FIELDS {
            return Err(CodecError::EncodingTooLarge("field count exceeds 255"));
        }
        for field in &self.fields {
            if field.len() > MAX_FIELD_LEN {
                return Err(CodecError::EncodingTooLarge("field longer than 255 bytes"));
            }
        }

        buf.reserve(self.encoded_size());
        buf.put_u16_le(self.packet_id);
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.sender_id);
        buf.put_u8(self.receiver_id);
        buf.put_u8(self.fields.len() as u8);
        for field in &self.fields {
            buf.put_u8(field.len() as u8);
            buf.put_slice(field.as_bytes());
        }
        Ok(())
    }

    /// Convenience wrapper around `encode` that returns frozen, ready-to-write bytes.
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one packet from the front of `cursor`.
    ///
    /// `cursor` must contain at least one complete frame (callers should run
    /// [`check`] first); this does not itself tolerate a partial frame and returns
    /// `Truncated` if the declared field lengths overrun the buffer.
    pub fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Packet, CodecError> {
        if cursor.remaining() < HEADER_LEN {
            return Err(CodecError::Truncated);
        }

        let packet_id = cursor.get_u16_le();
        let kind_byte = cursor.get_u8();
        let kind = PacketKind::try_from(kind_byte).map_err(|_| CodecError::UnknownKind(kind_byte))?;
        let sender_id = cursor.get_u8();
        let receiver_id = cursor.get_u8();
        let n_fields = cursor.get_u8() as usize;

        let mut fields = Vec::with_capacity(n_fields);
        for _ in 0..n_fields {
            if !cursor.has_remaining() {
                return Err(CodecError::Truncated);
            }
            let len = cursor.get_u8() as usize;
            if cursor.remaining() < len {
                return Err(CodecError::Truncated);
            }
            let mut bytes = vec![0u8; len];
            cursor.copy_to_slice(&mut bytes);
            fields.push(String::from_utf8_lossy(&bytes).into_owned());
        }

        Ok(Packet {
            packet_id,
            kind,
            sender_id,
            receiver_id,
            fields,
        })
    }
}

/// Non-consuming completeness check used by the stream reader to peel frames off a
/// growing buffer without allocating until a full frame is known to be present.
///
/// Returns `Some(len)` — the length in bytes of the first complete frame — once
/// `src` contains at least that many bytes, regardless of what follows it (monotone:
/// appending more bytes after a detected frame never changes the returned length for
/// that frame). Returns `None` if `src` is too short to tell yet. A malformed kind
/// byte inside an otherwise-complete frame is reported as `Some(len)` too; the
/// caller's subsequent `Packet::decode` call is what surfaces `UnknownKind`.
pub fn check(src: &[u8]) -> Option<usize> {
    if src.len() < HEADER_LEN {
        return None;
    }
    let n_fields = src[5] as usize;
    let mut offset = HEADER_LEN;
    for _ in 0..n_fields {
        if offset >= src.len() {
            return None;
        }
        let len = src[offset] as usize;
        offset += 1 + len;
        if offset > src.len() {
            return None;
        }
    }
    Some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::new(
            42,
            PacketKind::ReqSend,
            2,
            3,
            vec!["hi".to_string(), "there".to_string()],
        )
    }

    #[test]
    fn round_trips() {
        let p = sample();
        let bytes = p.to_bytes().unwrap();
        let mut cursor = Cursor::new(&bytes[..]);
        let decoded = Packet::decode(&mut cursor).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn encoded_size_matches_actual_length() {
        let p = sample();
        let bytes = p.to_bytes().unwrap();
        assert_eq!(bytes.len(), p.encoded_size());
    }

    #[test]
    fn zero_field_packet_round_trips() {
        let p = Packet::new(1, PacketKind::Heartbeat, 0, 0, vec![]);
        let bytes = p.to_bytes().unwrap();
        let mut cursor = Cursor::new(&bytes[..]);
        assert_eq!(p, Packet::decode(&mut cursor).unwrap());
    }

    #[test]
    fn field_of_255_bytes_is_accepted() {
        let field = "x".repeat(255);
        let p = Packet::new(1, PacketKind::ReqSend, 1, 0, vec![field]);
        assert!(p.to_bytes().is_ok());
    }

    #[test]
    fn field_of_256_bytes_is_rejected() {
        let field = "x".repeat(256);
        let p = Packet::new(1, PacketKind::ReqSend, 1, 0, vec![field]);
        let mut buf = BytesMut::new();
        assert_eq!(
            p.encode(&mut buf),
            Err(CodecError::EncodingTooLarge("field longer than 255 bytes"))
        );
    }

    #[test]
    fn truncated_buffer_fails_to_decode() {
        let mut cursor = Cursor::new(&[1u8, 0, 1][..]);
        assert_eq!(Packet::decode(&mut cursor), Err(CodecError::Truncated));
    }

    #[test]
    fn check_reports_incomplete_header() {
        assert_eq!(check(&[1, 0, 1, 0, 0]), None);
    }

    #[test]
    fn check_reports_incomplete_field_bytes() {
        // header says 1 field of length 5, but only 2 bytes of it are present
        let buf = [1u8, 0, PacketKind::ReqSend as u8, 1, 0, 1, 5, b'h', b'i'];
        assert_eq!(check(&buf), None);
    }

    #[test]
    fn check_is_monotone_once_a_frame_is_complete() {
        let p = sample();
        let bytes = p.to_bytes().unwrap();
        let len = check(&bytes).unwrap();
        assert_eq!(len, bytes.len());

        let mut extended = bytes.to_vec();
        extended.extend_from_slice(b"trailing garbage from the next frame");
        assert_eq!(check(&extended), Some(len));
    }

    #[test]
    fn two_frames_back_to_back_are_each_found() {
        let a = Packet::new(1, PacketKind::Heartbeat, 0, 0, vec![]);
        let b = sample();
        let mut buf = BytesMut::new();
        a.encode(&mut buf).unwrap();
        b.encode(&mut buf).unwrap();

        let len_a = check(&buf).unwrap();
        let mut cursor = Cursor::new(&buf[..len_a]);
        assert_eq!(Packet::decode(&mut cursor).unwrap(), a);

        let rest = &buf[len_a..];
        let len_b = check(rest).unwrap();
        let mut cursor = Cursor::new(&rest[..len_b]);
        assert_eq!(Packet::decode(&mut cursor).unwrap(), b);
    }

    #[test]
    fn unknown_kind_byte_is_rejected_at_decode() {
        let buf = [1u8, 0, 99, 0, 0, 0];
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(Packet::decode(&mut cursor), Err(CodecError::UnknownKind(99)));
    }
}
