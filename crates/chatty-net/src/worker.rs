use std::mem::ManuallyDrop;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chatty_core::{Registry, Stats};
use chatty_engine::{Engine, EngineConfig, Failed};
use chatty_protocol::CodecError;
use mio::unix::SourceFd;
use mio::{Interest, Token};
use tracing::{debug, warn};

use crate::dispatcher::Connections;

/// A fixed pool of threads draining the work queue (`ThreadsInPool` in the
/// original config). Each worker services one ready fd to completion --
/// one request read, one engine call, one reply -- then either rearms the
/// fd for more readiness events or tears the connection down.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        count: usize,
        queue: Arc<chatty_queue::WorkQueue>,
        registry: Arc<Registry>,
        stats: Arc<Stats>,
        config: Arc<EngineConfig>,
        connections: Connections,
        mio_registry: Arc<mio::Registry>,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let stats = Arc::clone(&stats);
                let config = Arc::clone(&config);
                let connections = Arc::clone(&connections);
                let mio_registry = Arc::clone(&mio_registry);
                thread::Builder::new()
                    .name(format!("chatty-worker-{id}"))
                    .spawn(move || worker_loop(&queue, &registry, &stats, &config, &connections, &mio_registry))
                    .expect("failed spawning worker thread")
            })
            .collect();
        Self { handles }
    }

    /// Blocks until every worker has observed [`chatty_queue::WorkItem::Shutdown`].
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    queue: &chatty_queue::WorkQueue,
    registry: &Arc<Registry>,
    stats: &Arc<Stats>,
    config: &Arc<EngineConfig>,
    connections: &Connections,
    mio_registry: &mio::Registry,
) {
    loop {
        match queue.dequeue() {
            chatty_queue::WorkItem::Shutdown => return,
            chatty_queue::WorkItem::Fd(fd) => {
                service_one(fd, registry, stats, config, connections, mio_registry);
            }
        }
    }
}

fn service_one(
    fd: RawFd,
    registry: &Arc<Registry>,
    stats: &Arc<Stats>,
    config: &Arc<EngineConfig>,
    connections: &Connections,
    mio_registry: &mio::Registry,
) {
    let Some(conn) = connections.lock().unwrap().get(&fd).cloned() else {
        // Already torn down by a concurrent close; nothing to service.
        return;
    };

    // The fd is not otherwise owned by any Rust value right now (the
    // dispatcher deregistered it before enqueueing); borrow it for this
    // one read without taking over its lifecycle.
    let mut reader = ManuallyDrop::new(unsafe { UnixStream::from_raw_fd(fd) });

    let msg = match chatty_protocol::read_msg(&mut *reader) {
        Ok(Some(msg)) => msg,
        Ok(None) => {
            debug!(fd, "client closed connection");
            close_conn(fd, registry, connections);
            return;
        }
        Err(err) => {
            log_read_error(fd, &err);
            close_conn(fd, registry, connections);
            return;
        }
    };

    let engine = Engine::new(registry, stats, config);
    match engine.execute(fd, msg, &mut *reader, &conn) {
        Ok(()) => rearm(fd, mio_registry),
        Err(Failed) => close_conn(fd, registry, connections),
    }
}

fn log_read_error(fd: RawFd, err: &CodecError) {
    debug!(fd, %err, "failed reading request");
}

fn rearm(fd: RawFd, mio_registry: &mio::Registry) {
    let mut source = SourceFd(&fd);
    if let Err(e) = mio_registry.reregister(&mut source, Token(fd as usize), Interest::READABLE) {
        warn!(%e, fd, "failed rearming fd after servicing it");
    }
}

fn close_conn(fd: RawFd, registry: &Arc<Registry>, connections: &Connections) {
    registry.disconnect(None, fd).ok();
    connections.lock().unwrap().remove(&fd);
    unsafe {
        libc::close(fd);
    }
}
