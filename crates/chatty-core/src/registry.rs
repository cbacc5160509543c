use std::collections::HashMap;
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use chatty_protocol::Nick;
use thiserror::Error;

use crate::history::{BoundedHistory, HistoryEntry};

/// Outbound half of a connected client: guarded individually so a
/// broadcast to N online peers contends N independent locks rather than
/// one process-wide send lock.
pub type SendHandle = Arc<Mutex<UnixStream>>;

struct UserRecord {
    fd: Option<RawFd>,
    conn: Option<SendHandle>,
    history: BoundedHistory,
}

impl UserRecord {
    fn new(history_capacity: usize) -> Self {
        Self { fd: None, conn: None, history: BoundedHistory::new(history_capacity) }
    }

    fn is_online(&self) -> bool {
        self.fd.is_some()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    #[error("nickname already registered")]
    AlreadyExists,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    #[error("nickname is not registered")]
    Unknown,
    #[error("nickname is already online")]
    AlreadyOnline,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("nickname is not online")]
    NotOnline,
    #[error("nickname is not registered")]
    Unknown,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("nickname is not registered")]
pub struct UnknownUser;

/// Online-fd resolution, mirroring `getUserFD`'s three-way return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdLookup {
    NoSuchUser,
    Offline,
    Online(RawFd),
}

struct State {
    by_name: HashMap<Nick, UserRecord>,
    by_fd: HashMap<RawFd, Nick>,
    online_count: usize,
    history_capacity: usize,
}

/// Nickname lifecycle, online presence, and bounded per-user history,
/// shared by every worker. One mutex covers the whole thing: operations
/// are short (map lookups, a `VecDeque` push), so holding it for their
/// entire duration does not become a bottleneck the way holding it across
/// a socket write would.
pub struct Registry {
    state: Mutex<State>,
}

impl Registry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                by_name: HashMap::new(),
                by_fd: HashMap::new(),
                online_count: 0,
                history_capacity,
            }),
        }
    }

    pub fn register(&self, nick: Nick, fd: RawFd, conn: SendHandle) -> Result<(), RegisterError> {
        let mut state = self.state.lock().unwrap();
        if state.by_name.contains_key(&nick) {
            return Err(RegisterError::AlreadyExists);
        }
        let mut record = UserRecord::new(state.history_capacity);
        record.fd = Some(fd);
        record.conn = Some(conn);
        state.by_name.insert(nick, record);
        state.by_fd.insert(fd, nick);
        state.online_count += 1;
        Ok(())
    }

    pub fn connect(&self, nick: Nick, fd: RawFd, conn: SendHandle) -> Result<(), ConnectError> {
        let mut state = self.state.lock().unwrap();
        let record = state.by_name.get_mut(&nick).ok_or(ConnectError::Unknown)?;
        if record.is_online() {
            return Err(ConnectError::AlreadyOnline);
        }
        record.fd = Some(fd);
        record.conn = Some(conn);
        state.by_fd.insert(fd, nick);
        state.online_count += 1;
        Ok(())
    }

    /// `nick = None` resolves the nickname from `fd` first (an implicit
    /// disconnect, where the caller only has the dead socket to go on).
    /// Idempotent: a second call with the same `fd` returns `NotOnline`.
    pub fn disconnect(&self, nick: Option<Nick>, fd: RawFd) -> Result<(), DisconnectError> {
        let mut state = self.state.lock().unwrap();
        let nick = match nick {
            Some(n) => n,
            None => *state.by_fd.get(&fd).ok_or(DisconnectError::NotOnline)?,
        };
        let record = state.by_name.get_mut(&nick).ok_or(DisconnectError::Unknown)?;
        if !record.is_online() {
            return Err(DisconnectError::NotOnline);
        }
        record.fd = None;
        record.conn = None;
        state.by_fd.remove(&fd);
        state.online_count -= 1;
        Ok(())
    }

    pub fn unregister(&self, nick: Nick, fd: RawFd) -> Result<(), UnknownUser> {
        let mut state = self.state.lock().unwrap();
        let record = state.by_name.remove(&nick).ok_or(UnknownUser)?;
        if record.is_online() {
            state.online_count -= 1;
        }
        state.by_fd.remove(&fd);
        Ok(())
    }

    pub fn lookup_fd(&self, nick: Nick) -> FdLookup {
        let state = self.state.lock().unwrap();
        match state.by_name.get(&nick) {
            None => FdLookup::NoSuchUser,
            Some(record) => match record.fd {
                Some(fd) => FdLookup::Online(fd),
                None => FdLookup::Offline,
            },
        }
    }

    /// The send handle for a currently-online user, if any. Used by the
    /// request engine to attempt a direct delivery outside this lock.
    pub fn lookup_conn(&self, nick: Nick) -> Option<SendHandle> {
        let state = self.state.lock().unwrap();
        state.by_name.get(&nick).and_then(|r| r.conn.clone())
    }

    pub fn online_list(&self) -> Vec<Nick> {
        let state = self.state.lock().unwrap();
        state.by_name.iter().filter(|(_, r)| r.is_online()).map(|(nick, _)| *nick).collect()
    }

    /// Send handles for every online user except `except`, used to fan a
    /// broadcast out to currently-connected peers.
    pub fn online_conns(&self, except: Nick) -> Vec<SendHandle> {
        let state = self.state.lock().unwrap();
        state
            .by_name
            .iter()
            .filter(|(nick, r)| **nick != except && r.is_online())
            .filter_map(|(_, r)| r.conn.clone())
            .collect()
    }

    pub fn online_fds(&self, except: Nick) -> Vec<RawFd> {
        let state = self.state.lock().unwrap();
        state
            .by_name
            .iter()
            .filter(|(nick, r)| **nick != except && r.is_online())
            .filter_map(|(_, r)| r.fd)
            .collect()
    }

    pub fn post_history(&self, nick: Nick, entry: HistoryEntry) -> Result<(), UnknownUser> {
        let mut state = self.state.lock().unwrap();
        let record = state.by_name.get_mut(&nick).ok_or(UnknownUser)?;
        record.history.push(entry);
        Ok(())
    }

    /// Posts a copy of `entry` into every user's history except `sender`.
    /// Returns the number of users it was posted to.
    pub fn post_history_all(&self, sender: Nick, entry: &HistoryEntry) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut posted = 0;
        for (nick, record) in state.by_name.iter_mut() {
            if *nick == sender {
                continue;
            }
            record.history.push(entry.clone());
            posted += 1;
        }
        posted
    }

    pub fn history(&self, nick: Nick) -> Option<Vec<HistoryEntry>> {
        let state = self.state.lock().unwrap();
        state.by_name.get(&nick).map(|r| r.history.snapshot())
    }

    pub fn online_count(&self) -> usize {
        self.state.lock().unwrap().online_count
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn handle() -> SendHandle {
        let (a, _b) = UnixStream::pair().unwrap();
        Arc::new(Mutex::new(a))
    }

    fn nick(s: &str) -> Nick {
        Nick::from_str_truncate(s)
    }

    #[test]
    fn register_then_register_is_already_exists() {
        let reg = Registry::new(8);
        reg.register(nick("alice"), 3, handle()).unwrap();
        assert_eq!(reg.register(nick("alice"), 4, handle()), Err(RegisterError::AlreadyExists));
    }

    #[test]
    fn connect_after_register_is_already_online() {
        let reg = Registry::new(8);
        reg.register(nick("alice"), 3, handle()).unwrap();
        assert_eq!(reg.connect(nick("alice"), 4, handle()), Err(ConnectError::AlreadyOnline));
    }

    #[test]
    fn register_disconnect_connect_round_trip() {
        let reg = Registry::new(8);
        reg.register(nick("alice"), 3, handle()).unwrap();
        reg.disconnect(Some(nick("alice")), 3).unwrap();
        reg.connect(nick("alice"), 9, handle()).unwrap();
        assert_eq!(reg.lookup_fd(nick("alice")), FdLookup::Online(9));
    }

    #[test]
    fn register_unregister_register_round_trip() {
        let reg = Registry::new(8);
        reg.register(nick("alice"), 3, handle()).unwrap();
        reg.unregister(nick("alice"), 3).unwrap();
        reg.register(nick("alice"), 5, handle()).unwrap();
        assert_eq!(reg.lookup_fd(nick("alice")), FdLookup::Online(5));
    }

    #[test]
    fn double_disconnect_is_a_no_op() {
        let reg = Registry::new(8);
        reg.register(nick("alice"), 3, handle()).unwrap();
        reg.disconnect(None, 3).unwrap();
        assert_eq!(reg.disconnect(None, 3), Err(DisconnectError::NotOnline));
    }

    #[test]
    fn implicit_disconnect_resolves_nick_from_fd() {
        let reg = Registry::new(8);
        reg.register(nick("alice"), 3, handle()).unwrap();
        reg.disconnect(None, 3).unwrap();
        assert_eq!(reg.lookup_fd(nick("alice")), FdLookup::Offline);
    }

    #[test]
    fn online_count_invariant_tracks_by_fd_size() {
        let reg = Registry::new(8);
        reg.register(nick("a"), 1, handle()).unwrap();
        reg.register(nick("b"), 2, handle()).unwrap();
        assert_eq!(reg.online_count(), 2);
        reg.disconnect(Some(nick("a")), 1).unwrap();
        assert_eq!(reg.online_count(), 1);
    }

    #[test]
    fn post_history_all_skips_sender() {
        let reg = Registry::new(8);
        reg.register(nick("alice"), 1, handle()).unwrap();
        reg.register(nick("bob"), 2, handle()).unwrap();
        reg.register(nick("carol"), 3, handle()).unwrap();
        let entry = HistoryEntry {
            op: chatty_protocol::OpCode::TxtMessage,
            sender: nick("alice"),
            payload: b"hi all".to_vec(),
        };
        let posted = reg.post_history_all(nick("alice"), &entry);
        assert_eq!(posted, 2);
        assert_eq!(reg.history(nick("alice")).unwrap().len(), 0);
        assert_eq!(reg.history(nick("bob")).unwrap().len(), 1);
        assert_eq!(reg.history(nick("carol")).unwrap().len(), 1);
    }

    #[test]
    fn history_snapshot_on_unknown_user_is_none() {
        let reg = Registry::new(8);
        assert!(reg.history(nick("ghost")).is_none());
    }
}
