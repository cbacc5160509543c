use chatty_utils::ArrayStr;

use crate::op::OpCode;

/// Longest nickname the wire format can carry, not counting the
/// null terminator the fixed-width field reserves.
pub const MAX_NAME_LENGTH: usize = 32;

/// Width, in bytes, of the fixed sender/receiver fields on the wire.
pub const NAME_FIELD_LEN: usize = MAX_NAME_LENGTH + 1;

/// A registered nickname. Stack-allocated, `Copy`, bounded by [`MAX_NAME_LENGTH`].
pub type Nick = ArrayStr<MAX_NAME_LENGTH>;

/// Header shared by every frame: the requested operation and the sender's nick.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub op: OpCode,
    pub sender: Nick,
}

impl Header {
    pub fn new(op: OpCode, sender: Nick) -> Self {
        Self { op, sender }
    }
}

/// Data portion of a frame: the recipient and an arbitrary payload.
#[derive(Debug, Clone)]
pub struct Data {
    pub receiver: Nick,
    pub payload: Vec<u8>,
}

impl Data {
    pub fn new(receiver: Nick, payload: Vec<u8>) -> Self {
        Self { receiver, payload }
    }

    pub fn empty(receiver: Nick) -> Self {
        Self { receiver, payload: Vec::new() }
    }
}

/// A complete frame: header plus data. Most requests are exactly one
/// `Message`; `POSTFILE_OP` and `GETPREVMSGS_OP` push extra frames on the
/// same connection outside of this type.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub data: Data,
}

impl Message {
    pub fn new(op: OpCode, sender: Nick, receiver: Nick, payload: Vec<u8>) -> Self {
        Self { header: Header::new(op, sender), data: Data::new(receiver, payload) }
    }
}
