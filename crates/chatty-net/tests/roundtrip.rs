use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chatty_core::{Registry, Stats};
use chatty_engine::EngineConfig;
use chatty_net::{Dispatcher, WorkerPool};
use chatty_protocol::{Message, Nick, OpCode};
use chatty_queue::WorkQueue;

struct Server {
    shutdown: Arc<AtomicBool>,
    dispatcher_thread: Option<thread::JoinHandle<()>>,
    workers: Option<WorkerPool>,
    queue: Arc<WorkQueue>,
    path: std::path::PathBuf,
}

impl Server {
    fn start(tmp: &std::path::Path) -> Self {
        let path = tmp.join("chatty.sock");
        let registry = Arc::new(Registry::new(8));
        let stats = Arc::new(Stats::new());
        let config = Arc::new(EngineConfig {
            max_msg_size: 4096,
            max_file_size_kib: 64,
            dir_name: tmp.to_path_buf(),
        });
        let queue = Arc::new(WorkQueue::new(32));

        let mut dispatcher = Dispatcher::bind(&path, 16, Arc::clone(&registry)).unwrap();
        let mio_registry = Arc::new(dispatcher.registry().unwrap());
        let workers = WorkerPool::spawn(
            2,
            Arc::clone(&queue),
            registry,
            stats,
            config,
            dispatcher.connections(),
            mio_registry,
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_bg = Arc::clone(&shutdown);
        let queue_bg = Arc::clone(&queue);
        let dispatcher_thread = thread::spawn(move || {
            while !shutdown_bg.load(Ordering::Relaxed) {
                dispatcher.poll_once(&queue_bg, Duration::from_millis(10)).unwrap();
            }
        });

        // Give the listener a moment to be ready for connections.
        thread::sleep(Duration::from_millis(20));

        Self { shutdown, dispatcher_thread: Some(dispatcher_thread), workers: Some(workers), queue, path }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(t) = self.dispatcher_thread.take() {
            t.join().unwrap();
        }
        self.queue.close();
        if let Some(w) = self.workers.take() {
            w.join();
        }
    }
}

fn nick(s: &str) -> Nick {
    Nick::from_str_truncate(s)
}

#[test]
fn register_then_post_txt_to_unknown_user() {
    let tmp = tempfile::tempdir().unwrap();
    let server = Server::start(tmp.path());

    let mut client = UnixStream::connect(&server.path).unwrap();
    let register = Message::new(OpCode::Register, nick("alice"), Nick::new(), Vec::new());
    chatty_protocol::send_request(&mut client, &register).unwrap();
    let header = chatty_protocol::read_header(&mut client).unwrap().unwrap();
    assert_eq!(header.op, OpCode::Ok);
    let data = chatty_protocol::read_data(&mut client).unwrap().unwrap();
    assert_eq!(data.payload.len(), chatty_protocol::NAME_FIELD_LEN);

    let post = Message::new(OpCode::PostTxt, nick("alice"), nick("ghost"), b"hi".to_vec());
    chatty_protocol::send_request(&mut client, &post).unwrap();
    let header = chatty_protocol::read_header(&mut client).unwrap().unwrap();
    assert_eq!(header.op, OpCode::NickUnknown);
}

#[test]
fn two_clients_direct_message_each_other() {
    let tmp = tempfile::tempdir().unwrap();
    let server = Server::start(tmp.path());

    let mut alice = UnixStream::connect(&server.path).unwrap();
    chatty_protocol::send_request(
        &mut alice,
        &Message::new(OpCode::Register, nick("alice"), Nick::new(), Vec::new()),
    )
    .unwrap();
    chatty_protocol::read_header(&mut alice).unwrap();
    chatty_protocol::read_data(&mut alice).unwrap();

    let mut bob = UnixStream::connect(&server.path).unwrap();
    chatty_protocol::send_request(
        &mut bob,
        &Message::new(OpCode::Register, nick("bob"), Nick::new(), Vec::new()),
    )
    .unwrap();
    chatty_protocol::read_header(&mut bob).unwrap();
    chatty_protocol::read_data(&mut bob).unwrap();

    chatty_protocol::send_request(
        &mut alice,
        &Message::new(OpCode::PostTxt, nick("alice"), nick("bob"), b"yo bob".to_vec()),
    )
    .unwrap();
    let header = chatty_protocol::read_header(&mut alice).unwrap().unwrap();
    assert_eq!(header.op, OpCode::Ok);
    let _ = chatty_protocol::read_data(&mut alice).unwrap().unwrap();

    let forwarded = chatty_protocol::read_msg(&mut bob).unwrap().unwrap();
    assert_eq!(forwarded.header.op, OpCode::TxtMessage);
    assert_eq!(forwarded.data.payload, b"yo bob");
}

