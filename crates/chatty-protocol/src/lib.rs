mod codec;
mod message;
mod op;

pub use codec::{
    CodecError, encode_nick, read_data, read_header, read_msg, send_data, send_header,
    send_request,
};
pub use message::{Data, Header, MAX_NAME_LENGTH, Message, NAME_FIELD_LEN, Nick};
pub use op::{OpCode, UnknownOpCode};
