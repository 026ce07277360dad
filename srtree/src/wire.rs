//! Wire format serialization and deserialization.
//!
//! All packets are fixed-width and big-endian. The packet type is carried by
//! the transport (`Frame::am_type`), never inside the payload, so decoding
//! always starts from the type tag and validates the length before reading a
//! single field.
//!
//! ```text
//! RoutingMsg  (AM 22): depth (1) || cmd (1)
//! DataMaxMsg  (AM 24): data (1)
//! DataAvgMsg  (AM 25): sum (2, BE) || count (1)
//! ```

use alloc::vec::Vec;
use core::fmt;

use crate::types::{
    Command, DataAvgMsg, DataMaxMsg, RoutingMsg, AM_AVGMSG, AM_MAXMSG, AM_ROUTINGMSG,
    AVG_MSG_SIZE, MAX_DEPTH, MAX_MSG_SIZE, ROUTING_MSG_SIZE,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload length does not match the width of the declared type.
    InvalidLength { expected: usize, actual: usize },
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Transport type tag is not one of ours.
    UnknownType(u8),
    /// Tree-control opcode outside the known set.
    UnknownCommand(u8),
    /// Depth above `MAX_DEPTH`.
    DepthOutOfRange(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidLength { expected, actual } => {
                write!(f, "invalid length: expected {} bytes, got {}", expected, actual)
            }
            DecodeError::UnexpectedEof => write!(f, "unexpected end of buffer"),
            DecodeError::UnknownType(t) => write!(f, "unknown message type {}", t),
            DecodeError::UnknownCommand(c) => write!(f, "unknown command {}", c),
            DecodeError::DepthOutOfRange(d) => write!(f, "depth {} exceeds {}", d, MAX_DEPTH),
        }
    }
}

/// Cursor over a received payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }
}

/// Growable output buffer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Fixed-width packet that can be encoded to wire format.
pub trait Encode {
    /// Transport type tag for this packet.
    const AM_TYPE: u8;

    /// Exact encoded width in bytes.
    const WIRE_SIZE: usize;

    fn encode(&self, w: &mut Writer);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::WIRE_SIZE);
        self.encode(&mut w);
        w.finish()
    }
}

/// Fixed-width packet that can be decoded from wire format.
pub trait Decode: Sized + Encode {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode a whole payload; the length must match `WIRE_SIZE` exactly.
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != Self::WIRE_SIZE {
            return Err(DecodeError::InvalidLength {
                expected: Self::WIRE_SIZE,
                actual: data.len(),
            });
        }
        let mut r = Reader::new(data);
        Self::decode(&mut r)
    }
}

impl Encode for RoutingMsg {
    const AM_TYPE: u8 = AM_ROUTINGMSG;
    const WIRE_SIZE: usize = ROUTING_MSG_SIZE;

    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.depth);
        w.write_u8(self.cmd.as_u8());
    }
}

impl Decode for RoutingMsg {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let depth = r.read_u8()?;
        let cmd = r.read_u8()?;
        let cmd = Command::from_u8(cmd).ok_or(DecodeError::UnknownCommand(cmd))?;
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthOutOfRange(depth));
        }
        Ok(RoutingMsg { depth, cmd })
    }
}

impl Encode for DataMaxMsg {
    const AM_TYPE: u8 = AM_MAXMSG;
    const WIRE_SIZE: usize = MAX_MSG_SIZE;

    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.data);
    }
}

impl Decode for DataMaxMsg {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(DataMaxMsg { data: r.read_u8()? })
    }
}

impl Encode for DataAvgMsg {
    const AM_TYPE: u8 = AM_AVGMSG;
    const WIRE_SIZE: usize = AVG_MSG_SIZE;

    fn encode(&self, w: &mut Writer) {
        w.write_u16_be(self.sum);
        w.write_u8(self.count);
    }
}

impl Decode for DataAvgMsg {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let sum = r.read_u16_be()?;
        let count = r.read_u8()?;
        Ok(DataAvgMsg { sum, count })
    }
}

/// Any protocol packet, tagged by its transport type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    Routing(RoutingMsg),
    Max(DataMaxMsg),
    Avg(DataAvgMsg),
}

impl Message {
    /// Transport type tag.
    pub fn am_type(&self) -> u8 {
        match self {
            Message::Routing(_) => RoutingMsg::AM_TYPE,
            Message::Max(_) => DataMaxMsg::AM_TYPE,
            Message::Avg(_) => DataAvgMsg::AM_TYPE,
        }
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        match self {
            Message::Routing(m) => m.encode_to_vec(),
            Message::Max(m) => m.encode_to_vec(),
            Message::Avg(m) => m.encode_to_vec(),
        }
    }

    /// Decode a payload using the transport type tag.
    pub fn decode(am_type: u8, data: &[u8]) -> Result<Self, DecodeError> {
        match am_type {
            AM_ROUTINGMSG => RoutingMsg::decode_from_slice(data).map(Message::Routing),
            AM_MAXMSG => DataMaxMsg::decode_from_slice(data).map(Message::Max),
            AM_AVGMSG => DataAvgMsg::decode_from_slice(data).map(Message::Avg),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use proptest::prelude::*;

    #[test]
    fn test_routing_layout() {
        let msg = RoutingMsg::beacon(3);
        assert_eq!(msg.encode_to_vec(), vec![3, 0]);
        assert_eq!(RoutingMsg::parent_lost().encode_to_vec(), vec![MAX_DEPTH, 1]);
    }

    #[test]
    fn test_avg_layout_is_big_endian() {
        let msg = DataAvgMsg {
            sum: 0x1234,
            count: 7,
        };
        assert_eq!(msg.encode_to_vec(), vec![0x12, 0x34, 7]);
    }

    #[test]
    fn test_wire_sizes() {
        assert_eq!(RoutingMsg::beacon(0).encode_to_vec().len(), 2);
        assert_eq!(DataMaxMsg { data: 0 }.encode_to_vec().len(), 1);
        assert_eq!(DataAvgMsg::default().encode_to_vec().len(), 3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        assert_eq!(
            RoutingMsg::decode_from_slice(&[1]),
            Err(DecodeError::InvalidLength {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            DataAvgMsg::decode_from_slice(&[0, 1, 2, 3]),
            Err(DecodeError::InvalidLength {
                expected: 3,
                actual: 4
            })
        );
        assert_eq!(
            DataMaxMsg::decode_from_slice(&[]),
            Err(DecodeError::InvalidLength {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert_eq!(
            RoutingMsg::decode_from_slice(&[3, 9]),
            Err(DecodeError::UnknownCommand(9))
        );
    }

    #[test]
    fn test_depth_out_of_range_rejected() {
        assert_eq!(
            RoutingMsg::decode_from_slice(&[MAX_DEPTH + 1, 0]),
            Err(DecodeError::DepthOutOfRange(MAX_DEPTH + 1))
        );
        assert!(RoutingMsg::decode_from_slice(&[MAX_DEPTH, 0]).is_ok());
    }

    #[test]
    fn test_message_dispatch_by_type() {
        assert_eq!(
            Message::decode(AM_MAXMSG, &[42]),
            Ok(Message::Max(DataMaxMsg { data: 42 }))
        );
        // Same bytes, different tag: the width check fails
        assert!(matches!(
            Message::decode(AM_AVGMSG, &[42]),
            Err(DecodeError::InvalidLength { .. })
        ));
        assert_eq!(
            Message::decode(23, &[42]),
            Err(DecodeError::UnknownType(23))
        );
    }

    #[test]
    fn test_message_am_type() {
        assert_eq!(Message::Routing(RoutingMsg::beacon(1)).am_type(), AM_ROUTINGMSG);
        assert_eq!(Message::Max(DataMaxMsg::default()).am_type(), AM_MAXMSG);
        assert_eq!(Message::Avg(DataAvgMsg::default()).am_type(), AM_AVGMSG);
    }

    #[test]
    fn test_max_roundtrip_full_range() {
        for data in 0..=u8::MAX {
            let msg = DataMaxMsg { data };
            assert_eq!(DataMaxMsg::decode_from_slice(&msg.encode_to_vec()), Ok(msg));
        }
    }

    #[test]
    fn test_routing_roundtrip_full_range() {
        for depth in 0..=MAX_DEPTH {
            for cmd in [Command::Beacon, Command::ParentLost] {
                let msg = RoutingMsg { depth, cmd };
                let bytes = msg.encode_to_vec();
                assert_eq!(Message::decode(AM_ROUTINGMSG, &bytes), Ok(Message::Routing(msg)));
            }
        }
    }

    proptest! {
        #[test]
        fn prop_avg_roundtrip(sum in any::<u16>(), count in any::<u8>()) {
            let msg = DataAvgMsg { sum, count };
            let bytes = msg.encode_to_vec();
            prop_assert_eq!(Message::decode(AM_AVGMSG, &bytes), Ok(Message::Avg(msg)));
        }

        #[test]
        fn prop_decode_never_panics(am_type in any::<u8>(), data in proptest::collection::vec(any::<u8>(), 0..8)) {
            let _ = Message::decode(am_type, &data);
        }
    }
}
