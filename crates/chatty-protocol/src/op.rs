use thiserror::Error;

/// Operation code carried in every frame header, shared verbatim between
/// requests and their replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpCode {
    Register = 0,
    Connect = 1,
    PostTxt = 2,
    PostTxtAll = 3,
    PostFile = 4,
    GetFile = 5,
    GetPrevMsgs = 6,
    UsrList = 7,
    Unregister = 8,
    Disconnect = 9,
    TxtMessage = 10,
    FileMessage = 11,
    Ok = 12,
    Fail = 13,
    NickAlready = 14,
    NickUnknown = 15,
    MsgTooLong = 16,
    NoSuchFile = 17,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unrecognized operation code {0}")]
pub struct UnknownOpCode(pub u32);

impl TryFrom<u32> for OpCode {
    type Error = UnknownOpCode;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        use OpCode::*;
        Ok(match raw {
            0 => Register,
            1 => Connect,
            2 => PostTxt,
            3 => PostTxtAll,
            4 => PostFile,
            5 => GetFile,
            6 => GetPrevMsgs,
            7 => UsrList,
            8 => Unregister,
            9 => Disconnect,
            10 => TxtMessage,
            11 => FileMessage,
            12 => Ok,
            13 => Fail,
            14 => NickAlready,
            15 => NickUnknown,
            16 => MsgTooLong,
            17 => NoSuchFile,
            other => return Err(UnknownOpCode(other)),
        })
    }
}

impl From<OpCode> for u32 {
    fn from(op: OpCode) -> u32 {
        op as u32
    }
}
