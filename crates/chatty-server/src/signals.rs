use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use signal_hook::consts::{SIGINT, SIGPIPE, SIGQUIT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;
use tracing::info;

/// Set once a termination signal arrives; the main loop checks it once
/// per poll cycle rather than unwinding out of signal context.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Set on `SIGUSR1`; the main loop drains it and appends a stats line,
/// matching the original's `plotStats` trigger.
#[derive(Clone)]
pub struct StatsDumpFlag(Arc<AtomicBool>);

impl StatsDumpFlag {
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// Spawns a background thread that turns POSIX signals into the two
/// flags above. `SIGPIPE` is drained and ignored here so a write to an
/// already-closed client socket surfaces as an `EPIPE` `io::Error`
/// instead of killing the process.
pub fn install() -> io::Result<(ShutdownFlag, StatsDumpFlag, JoinHandle<()>)> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let dump = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT, SIGUSR1, SIGPIPE])?;

    let shutdown_bg = Arc::clone(&shutdown);
    let dump_bg = Arc::clone(&dump);
    let handle = std::thread::Builder::new()
        .name("chatty-signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGINT | SIGTERM | SIGQUIT => {
                        info!(signal = sig, "shutdown requested");
                        shutdown_bg.store(true, Ordering::Relaxed);
                        break;
                    }
                    SIGUSR1 => dump_bg.store(true, Ordering::Relaxed),
                    _ => {}
                }
            }
        })
        .expect("failed spawning signal thread");

    Ok((ShutdownFlag(shutdown), StatsDumpFlag(dump), handle))
}
