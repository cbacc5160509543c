use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatty_core::{Registry, SendHandle};
use chatty_queue::{WorkItem, WorkQueue};
use mio::net::UnixListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Shared table of live connections: every accepted fd, mapped to the
/// handle workers use to reply to it.
pub type Connections = Arc<Mutex<HashMap<RawFd, SendHandle>>>;

/// Accepts new clients and demultiplexes readiness on every connected
/// socket, handing each readable fd to the work queue exactly once.
///
/// A client fd is owned by exactly one of: this dispatcher's readiness
/// set, the work queue, or a worker mid-request. Handing a fd to the
/// queue means deregistering it here; a worker that finishes a request
/// without closing the connection reregisters it directly through a
/// cloned [`mio::Registry`] (see [`Dispatcher::registry`]) rather than
/// routing back through this struct.
pub struct Dispatcher {
    poll: Poll,
    events: Events,
    listener: UnixListener,
    max_connections: usize,
    registry: Arc<Registry>,
    connections: Connections,
}

impl Dispatcher {
    /// `max_connections` gates admission against `registry`'s online user
    /// count (registered and connected), not the raw accepted-socket table
    /// -- a socket mid-handshake that hasn't registered yet does not count
    /// against the cap.
    pub fn bind(path: &Path, max_connections: usize, registry: Arc<Registry>) -> io::Result<Self> {
        let _ = std::fs::remove_file(path);
        let mut listener = UnixListener::bind(path)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(256),
            listener,
            max_connections,
            registry,
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// A cloned handle to the poll registry, usable from any thread to
    /// reregister a fd this dispatcher previously deregistered.
    pub fn registry(&self) -> io::Result<mio::Registry> {
        self.poll.registry().try_clone()
    }

    pub fn connections(&self) -> Connections {
        Arc::clone(&self.connections)
    }

    /// Blocks up to `timeout` for readiness, accepts any pending
    /// connections, and hands every readable client fd to `queue`.
    pub fn poll_once(&mut self, queue: &WorkQueue, timeout: Duration) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let tokens: Vec<Token> = self.events.iter().map(mio::event::Event::token).collect();
        for token in tokens {
            if token == LISTENER_TOKEN {
                self.accept_pending();
            } else {
                self.hand_off(token.0 as RawFd, queue);
            }
        }
        Ok(())
    }

    fn accept_pending(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(%e, "accept failed");
                    return;
                }
            };

            let online = self.registry.online_count();
            if online >= self.max_connections {
                debug!(?addr, online, max = self.max_connections, "refusing connection, server full");
                drop(stream);
                continue;
            }

            let fd = stream.as_raw_fd();
            std::mem::forget(stream);

            let send_fd = unsafe { libc::dup(fd) };
            if send_fd < 0 {
                warn!(errno = io::Error::last_os_error().raw_os_error(), "dup failed on accept");
                unsafe {
                    libc::close(fd);
                }
                continue;
            }
            let send_stream = unsafe { StdUnixStream::from_raw_fd(send_fd) };
            let conn: SendHandle = Arc::new(Mutex::new(send_stream));

            let mut source = SourceFd(&fd);
            if let Err(e) = self.poll.registry().register(&mut source, Token(fd as usize), Interest::READABLE)
            {
                warn!(%e, "failed registering accepted connection");
                unsafe {
                    libc::close(fd);
                }
                continue;
            }

            self.connections.lock().unwrap().insert(fd, conn);
            info!(?addr, fd, "client connected");
        }
    }

    fn hand_off(&mut self, fd: RawFd, queue: &WorkQueue) {
        let mut source = SourceFd(&fd);
        if let Err(e) = self.poll.registry().deregister(&mut source) {
            warn!(%e, fd, "failed deregistering ready fd");
            return;
        }
        if !queue.enqueue(WorkItem::Fd(fd)) {
            // Queue is full: nobody will service this fd, so put it back
            // in the readiness set immediately rather than losing it.
            // Level-triggered readiness means it reappears next poll.
            warn!(fd, "work queue full, leaving fd for the next poll cycle");
            if let Err(e) =
                self.poll.registry().reregister(&mut source, Token(fd as usize), Interest::READABLE)
            {
                warn!(%e, fd, "failed rearming fd after full queue");
            }
        }
    }
}
