use std::io::Read;
use std::os::fd::RawFd;

use chatty_core::{ConnectError, FdLookup, HistoryEntry, RegisterError, Registry, SendHandle, Stats};
use chatty_protocol::{CodecError, Data, Header, Message, Nick, OpCode};
use tracing::{debug, warn};

use crate::config::EngineConfig;

/// Instructs the caller (the worker loop) to close the connection and
/// treat it as an implicit disconnect. Carries no payload: every reply
/// that can be sent to the client already has been, by the time this is
/// returned.
#[derive(Debug)]
pub struct Failed;

impl From<CodecError> for Failed {
    fn from(err: CodecError) -> Self {
        debug!(%err, "reply failed, closing connection");
        Failed
    }
}

pub struct Engine<'a> {
    pub registry: &'a Registry,
    pub stats: &'a Stats,
    pub config: &'a EngineConfig,
}

fn empty_nick() -> Nick {
    Nick::new()
}

fn write_header(conn: &SendHandle, op: OpCode) -> Result<(), CodecError> {
    let mut guard = conn.lock().unwrap();
    chatty_protocol::send_header(&mut *guard, &Header::new(op, empty_nick()))
}

fn write_header_and_data(conn: &SendHandle, op: OpCode, data: Data) -> Result<(), CodecError> {
    let mut guard = conn.lock().unwrap();
    chatty_protocol::send_header(&mut *guard, &Header::new(op, empty_nick()))?;
    chatty_protocol::send_data(&mut *guard, &data)
}

fn encode_online_list(nicks: &[Nick]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nicks.len() * chatty_protocol::NAME_FIELD_LEN);
    let mut field = [0u8; chatty_protocol::NAME_FIELD_LEN];
    for nick in nicks {
        chatty_protocol::encode_nick(nick, &mut field);
        out.extend_from_slice(&field);
    }
    out
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

impl<'a> Engine<'a> {
    pub fn new(registry: &'a Registry, stats: &'a Stats, config: &'a EngineConfig) -> Self {
        Self { registry, stats, config }
    }

    /// Services exactly one request. `reader` is only consulted by
    /// `POSTFILE_OP`, which carries a second data block on the same
    /// connection; every other operation is fully described by `msg`.
    /// `own_conn` is the requester's own outbound connection, used for
    /// every reply -- it is locked individually so a broadcast landing on
    /// this same user from another worker cannot interleave with it.
    pub fn execute(
        &self,
        fd: RawFd,
        msg: Message,
        reader: &mut impl Read,
        own_conn: &SendHandle,
    ) -> Result<(), Failed> {
        let Message { header, data } = msg;
        let sender = header.sender;
        let receiver = data.receiver;
        let payload = data.payload;

        if sender.is_empty() {
            write_header(own_conn, OpCode::Fail)?;
            return Err(Failed);
        }

        match header.op {
            OpCode::Register => self.register(fd, sender, own_conn),
            OpCode::Connect => self.connect(fd, sender, own_conn),
            OpCode::PostTxt => self.post_txt(sender, receiver, payload, own_conn),
            OpCode::PostTxtAll => self.post_txt_all(sender, receiver, payload, own_conn),
            OpCode::PostFile => self.post_file(sender, receiver, payload, reader, own_conn),
            OpCode::GetFile => self.get_file(receiver, own_conn),
            OpCode::GetPrevMsgs => self.get_prev_msgs(sender, own_conn),
            OpCode::UsrList => self.usr_list(own_conn),
            OpCode::Unregister => self.unregister(fd, sender, own_conn),
            OpCode::Disconnect => self.disconnect(fd, sender, own_conn),
            OpCode::TxtMessage
            | OpCode::FileMessage
            | OpCode::Ok
            | OpCode::Fail
            | OpCode::NickAlready
            | OpCode::NickUnknown
            | OpCode::MsgTooLong
            | OpCode::NoSuchFile => {
                warn!(op = ?header.op, "client sent a reply-only op code as a request");
                write_header(own_conn, OpCode::Fail)?;
                Err(Failed)
            }
        }
    }

    fn register(&self, fd: RawFd, sender: Nick, own_conn: &SendHandle) -> Result<(), Failed> {
        match self.registry.register(sender, fd, own_conn.clone()) {
            Ok(()) => {
                self.stats.user_registered();
                self.stats.went_online();
                let online = self.registry.online_list();
                write_header_and_data(
                    own_conn,
                    OpCode::Ok,
                    Data::new(empty_nick(), encode_online_list(&online)),
                )?;
            }
            Err(RegisterError::AlreadyExists) => {
                self.stats.error();
                write_header(own_conn, OpCode::NickAlready)?;
            }
        }
        Ok(())
    }

    fn connect(&self, fd: RawFd, sender: Nick, own_conn: &SendHandle) -> Result<(), Failed> {
        match self.registry.connect(sender, fd, own_conn.clone()) {
            Ok(()) => {
                self.stats.went_online();
                let online = self.registry.online_list();
                write_header_and_data(
                    own_conn,
                    OpCode::Ok,
                    Data::new(empty_nick(), encode_online_list(&online)),
                )?;
            }
            Err(ConnectError::Unknown) => {
                self.stats.error();
                write_header(own_conn, OpCode::NickUnknown)?;
            }
            Err(ConnectError::AlreadyOnline) => {
                self.stats.error();
                write_header(own_conn, OpCode::NickAlready)?;
            }
        }
        Ok(())
    }

    fn post_txt(
        &self,
        sender: Nick,
        receiver: Nick,
        payload: Vec<u8>,
        own_conn: &SendHandle,
    ) -> Result<(), Failed> {
        if payload.len() > self.config.max_msg_size {
            self.stats.error();
            write_header(own_conn, OpCode::MsgTooLong)?;
            return Ok(());
        }

        match self.registry.lookup_fd(receiver) {
            FdLookup::NoSuchUser => {
                self.stats.error();
                write_header(own_conn, OpCode::NickUnknown)?;
            }
            lookup @ (FdLookup::Offline | FdLookup::Online(_)) => {
                let entry = HistoryEntry { op: OpCode::TxtMessage, sender, payload: payload.clone() };
                // lookup_fd just confirmed the user exists; post_history
                // cannot fail here short of a race with a concurrent
                // unregister, which the registry lock rules out.
                self.registry.post_history(receiver, entry).ok();
                self.stats.txt_queued();
                write_header(own_conn, OpCode::Ok)?;

                if let FdLookup::Online(_) = lookup {
                    if let Some(peer_conn) = self.registry.lookup_conn(receiver) {
                        let deliver = Message::new(OpCode::TxtMessage, sender, receiver, payload);
                        if Self::send_direct(&peer_conn, &deliver).is_ok() {
                            self.stats.txt_delivered_direct();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn post_txt_all(
        &self,
        sender: Nick,
        receiver: Nick,
        payload: Vec<u8>,
        own_conn: &SendHandle,
    ) -> Result<(), Failed> {
        if payload.len() > self.config.max_msg_size {
            self.stats.error();
            write_header(own_conn, OpCode::MsgTooLong)?;
            return Ok(());
        }

        let entry = HistoryEntry { op: OpCode::TxtMessage, sender, payload: payload.clone() };
        let posted = self.registry.post_history_all(sender, &entry);
        self.stats.txt_broadcast_queued(posted as u64);
        write_header(own_conn, OpCode::Ok)?;

        let deliver = Message::new(OpCode::TxtMessage, sender, receiver, payload);
        for peer_conn in self.registry.online_conns(sender) {
            if Self::send_direct(&peer_conn, &deliver).is_ok() {
                self.stats.txt_broadcast_delivered();
            }
        }
        Ok(())
    }

    fn post_file(
        &self,
        sender: Nick,
        receiver: Nick,
        name_payload: Vec<u8>,
        reader: &mut impl Read,
        own_conn: &SendHandle,
    ) -> Result<(), Failed> {
        let proposed_name = String::from_utf8_lossy(&name_payload).into_owned();

        let file_data = chatty_protocol::read_data(reader)
            .map_err(|err| {
                debug!(%err, "failed reading POSTFILE data block");
                Failed
            })?
            .ok_or(Failed)?;

        if file_data.payload.len() / 1024 > self.config.max_file_size_kib {
            self.stats.error();
            write_header(own_conn, OpCode::MsgTooLong)?;
            return Ok(());
        }

        let path = self.config.dir_name.join(basename(&proposed_name));
        if std::fs::write(&path, &file_data.payload).is_err() {
            warn!(path = %path.display(), "failed writing uploaded file");
            return Err(Failed);
        }

        match self.registry.lookup_fd(receiver) {
            FdLookup::NoSuchUser => {
                self.stats.error();
                write_header(own_conn, OpCode::NickUnknown)?;
            }
            lookup @ (FdLookup::Offline | FdLookup::Online(_)) => {
                let entry = HistoryEntry {
                    op: OpCode::FileMessage,
                    sender,
                    payload: basename(&proposed_name).as_bytes().to_vec(),
                };
                self.registry.post_history(receiver, entry).ok();
                self.stats.file_queued();
                write_header(own_conn, OpCode::Ok)?;

                if let FdLookup::Online(_) = lookup {
                    if let Some(peer_conn) = self.registry.lookup_conn(receiver) {
                        let deliver = Message::new(
                            OpCode::FileMessage,
                            sender,
                            receiver,
                            basename(&proposed_name).as_bytes().to_vec(),
                        );
                        if Self::send_direct(&peer_conn, &deliver).is_ok() {
                            self.stats.file_delivered_direct();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn get_file(&self, filename: Nick, own_conn: &SendHandle) -> Result<(), Failed> {
        let path = self.config.dir_name.join(filename.as_str());
        let is_file = std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            self.stats.error();
            write_header(own_conn, OpCode::NoSuchFile)?;
            return Ok(());
        }

        match std::fs::read(&path) {
            Ok(bytes) => {
                self.stats.file_fetched();
                write_header_and_data(own_conn, OpCode::Ok, Data::new(empty_nick(), bytes))?;
            }
            Err(err) => {
                warn!(%err, path = %path.display(), "failed reading requested file");
                self.stats.error();
                write_header(own_conn, OpCode::NoSuchFile)?;
            }
        }
        Ok(())
    }

    fn get_prev_msgs(&self, sender: Nick, own_conn: &SendHandle) -> Result<(), Failed> {
        let Some(history) = self.registry.history(sender) else {
            write_header(own_conn, OpCode::Fail)?;
            return Ok(());
        };

        let mut guard = own_conn.lock().unwrap();
        let count = history.len() as u64;
        chatty_protocol::send_header(&mut *guard, &Header::new(OpCode::Ok, empty_nick()))?;
        chatty_protocol::send_data(
            &mut *guard,
            &Data::new(empty_nick(), count.to_ne_bytes().to_vec()),
        )?;
        for entry in history {
            let frame = Message::new(entry.op, entry.sender, empty_nick(), entry.payload);
            chatty_protocol::send_request(&mut *guard, &frame)?;
        }
        Ok(())
    }

    fn usr_list(&self, own_conn: &SendHandle) -> Result<(), Failed> {
        let online = self.registry.online_list();
        write_header_and_data(
            own_conn,
            OpCode::Ok,
            Data::new(empty_nick(), encode_online_list(&online)),
        )?;
        Ok(())
    }

    fn unregister(&self, fd: RawFd, sender: Nick, own_conn: &SendHandle) -> Result<(), Failed> {
        match self.registry.unregister(sender, fd) {
            Ok(()) => {
                self.stats.user_unregistered();
                self.stats.went_offline();
                write_header(own_conn, OpCode::Ok)?;
            }
            Err(_) => {
                self.stats.error();
                write_header(own_conn, OpCode::NickUnknown)?;
            }
        }
        Ok(())
    }

    fn disconnect(&self, fd: RawFd, sender: Nick, own_conn: &SendHandle) -> Result<(), Failed> {
        match self.registry.disconnect(Some(sender), fd) {
            Ok(()) => {
                self.stats.went_offline();
                write_header(own_conn, OpCode::Ok)?;
            }
            Err(_) => {
                self.stats.error();
                write_header(own_conn, OpCode::NickUnknown)?;
            }
        }
        Ok(())
    }

    fn send_direct(conn: &SendHandle, msg: &Message) -> Result<(), CodecError> {
        let mut guard = conn.lock().unwrap();
        chatty_protocol::send_request(&mut *guard, msg)
    }
}
