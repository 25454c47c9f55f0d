/*!
    command frame wire format

    every command exchanged on the bus is a fixed 9 bytes frame:

    | offset | size | field      |
    |--------|------|------------|
    | 0      | 2    | id         |
    | 2      | 4    | value      |
    | 6      | 2    | ack id     |
    | 8      | 1    | sentinel   |

    a transaction is a contiguous sequence of frames exchanged in one full-duplex transfer. Multi-byte fields are little endian on both sides of the link.
*/

use core::ops::Range;
use packbytes::{FromBytes, ToBytes, ByteArray};


/// identifier of a command, valid ids are in `1 ..= MAX_ID`
pub type CommandId = i16;
/// value field of a frame, as transmitted
pub type RawValue = [u8; VALUE_SIZE];

/// highest command id accepted on the bus
pub const MAX_ID: CommandId = 64;
/// id sent in place of the ack id, asking the slave to send back the command id
pub const ACK_REQUEST: CommandId = -1;
/// last byte of every frame, giving the slave one more clock to answer the ack id
pub const SENTINEL: u8 = 0xFF;
/// size of a frame on the wire
pub const FRAME_SIZE: usize = 9;
/// size of the value field, narrower values are zero padded
pub const VALUE_SIZE: usize = 4;
/// delay in bytes between sending a byte and receiving the slave's answer to it
pub const RX_OFFSET: usize = 1;

/// position of id in a frame
pub const ID: Range<usize> = 0 .. 2;
/// position of value in a frame
pub const VALUE: Range<usize> = 2 .. 6;
/// position of ack id in a frame
pub const ACK: Range<usize> = 6 .. 8;


/// command frame, in wire order
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default, PartialEq)]
pub struct CommandFrame {
    /// command identifier
    pub id: CommandId,
    /// raw bytes of the command value, its type is only known from the command id
    pub value: RawValue,
    /// [ACK_REQUEST] on transmit, the slave answers with the id in these bytes
    pub ack_id: CommandId,
    /// always [SENTINEL]
    pub sentinel: u8,
}
const _: () = assert!(<CommandFrame as FromBytes>::Bytes::SIZE == FRAME_SIZE);

impl CommandFrame {
    /// frame as transmitted by the master for the given command
    pub fn new(id: CommandId, value: RawValue) -> Self {
        Self {
            id,
            value,
            ack_id: ACK_REQUEST,
            sentinel: SENTINEL,
        }
    }
}


/**
    write a frame for the given command at `buffer[offset .. offset+FRAME_SIZE]`

    panics if the buffer is too small or the value is wider than [VALUE_SIZE]
*/
pub fn encode<T: ToBytes>(id: CommandId, value: T, buffer: &mut [u8], offset: usize) {
    encode_raw(id, raw_value(value), buffer, offset)
}
/// same as [encode] with the value field already serialized
pub fn encode_raw(id: CommandId, value: RawValue, buffer: &mut [u8], offset: usize) {
    assert!(buffer.len() >= offset + FRAME_SIZE,
        "buffer of {} bytes cannot hold a frame at offset {}", buffer.len(), offset);
    let frame = CommandFrame::new(id, value);
    buffer[offset ..][.. FRAME_SIZE].copy_from_slice(frame.to_le_bytes().as_ref());
}
/// read the id at the start of the given frame bytes
pub fn decode_id(buffer: &[u8]) -> CommandId {
    let mut bytes = <CommandId as FromBytes>::Bytes::zeroed();
    bytes.as_mut().copy_from_slice(&buffer[ID]);
    CommandId::from_le_bytes(bytes)
}
/// read the value field of the given frame bytes, its type must be known by the caller
pub fn decode_value<T: FromBytes>(buffer: &[u8]) -> T {
    value_from_raw(&buffer[VALUE])
}
/// read a complete frame
pub fn decode(buffer: &[u8]) -> CommandFrame {
    assert!(buffer.len() >= FRAME_SIZE, "buffer of {} bytes cannot hold a frame", buffer.len());
    let mut bytes = <CommandFrame as FromBytes>::Bytes::zeroed();
    bytes.as_mut().copy_from_slice(&buffer[.. FRAME_SIZE]);
    CommandFrame::from_le_bytes(bytes)
}

/// bytes of a value as placed in a frame
pub fn raw_value<T: ToBytes>(value: T) -> RawValue {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    assert!(bytes.len() <= VALUE_SIZE, "command values cannot exceed {} bytes", VALUE_SIZE);
    let mut raw = RawValue::default();
    raw[.. bytes.len()].copy_from_slice(bytes);
    raw
}
/// value from the bytes of a value field, ignoring padding
pub fn value_from_raw<T: FromBytes>(raw: &[u8]) -> T {
    assert!(T::Bytes::SIZE <= VALUE_SIZE, "command values cannot exceed {} bytes", VALUE_SIZE);
    let mut bytes = T::Bytes::zeroed();
    bytes.as_mut().copy_from_slice(&raw[.. T::Bytes::SIZE]);
    T::from_le_bytes(bytes)
}


/// numeric type of a command value, declared per command since the frame carries no type tag
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Float,
    Int32,
    Int16,
}

/// a command value with its type
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Float(f32),
    Int32(i32),
    Int16(i16),
}
impl Value {
    pub fn value_type(self) -> ValueType {
        match self {
            Self::Float(_) => ValueType::Float,
            Self::Int32(_) => ValueType::Int32,
            Self::Int16(_) => ValueType::Int16,
        }
    }
    /// bytes of this value as placed in a frame
    pub fn to_raw(self) -> RawValue {
        match self {
            Self::Float(value) => raw_value(value),
            Self::Int32(value) => raw_value(value),
            Self::Int16(value) => raw_value(value),
        }
    }
    /// interpret the bytes of a value field as the given type
    pub fn from_raw(ty: ValueType, raw: &[u8]) -> Self {
        match ty {
            ValueType::Float => Self::Float(value_from_raw(raw)),
            ValueType::Int32 => Self::Int32(value_from_raw(raw)),
            ValueType::Int16 => Self::Int16(value_from_raw(raw)),
        }
    }
    /// numeric value regardless of its wire type, as consumed by decision logic
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Float(value) => f64::from(value),
            Self::Int32(value) => f64::from(value),
            Self::Int16(value) => f64::from(value),
        }
    }
}

/// rust types that can be carried in a command value
pub trait CommandValue: FromBytes + ToBytes + Copy + Into<Value> {
    const TYPE: ValueType;
}

macro_rules! command_value {
    ($t:ty, $variant:ident) => {
        impl CommandValue for $t {
            const TYPE: ValueType = ValueType::$variant;
        }
        impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Self::$variant(value)
            }
        }
    };
}
command_value!(f32, Float);
command_value!(i32, Int32);
command_value!(i16, Int16);
