mod config;
mod signals;
mod stats_file;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatty_core::{Registry, Stats};
use chatty_engine::EngineConfig;
use chatty_net::{Dispatcher, WorkerPool};
use chatty_queue::WorkQueue;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long the dispatcher blocks waiting for readiness on each cycle;
/// short enough that the shutdown flag and the stats-dump flag are never
/// stale for long. Matches the `select()` timeout in the program this was
/// ported from.
const POLL_TIMEOUT: Duration = Duration::from_micros(150);

#[derive(Parser, Debug)]
#[command(name = "chattyd", about = "Unix-domain-socket chat server")]
struct Args {
    /// Path to the server's config file (Key=Value lines).
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let cfg = match config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, path = %args.config.display(), "failed loading config");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&cfg.dir_name) {
        error!(%e, dir = %cfg.dir_name.display(), "failed creating file store directory");
        std::process::exit(1);
    }

    let registry = Arc::new(Registry::new(cfg.max_hist_msgs));
    let stats = Arc::new(Stats::new());
    let engine_config = Arc::new(EngineConfig {
        max_msg_size: cfg.max_msg_size,
        max_file_size_kib: cfg.max_file_size_kib,
        dir_name: cfg.dir_name.clone(),
    });
    let queue = Arc::new(WorkQueue::new(cfg.max_connections.max(16)));

    let mut dispatcher = match Dispatcher::bind(&cfg.unix_path, cfg.max_connections, Arc::clone(&registry)) {
        Ok(d) => d,
        Err(e) => {
            error!(%e, path = %cfg.unix_path.display(), "failed binding listener");
            std::process::exit(1);
        }
    };
    let mio_registry = match dispatcher.registry() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(%e, "failed cloning poll registry");
            std::process::exit(1);
        }
    };

    let workers = WorkerPool::spawn(
        cfg.threads_in_pool,
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&stats),
        Arc::clone(&engine_config),
        dispatcher.connections(),
        mio_registry,
    );

    let (shutdown, stats_dump, _signal_thread) = match signals::install() {
        Ok(parts) => parts,
        Err(e) => {
            error!(%e, "failed installing signal handlers");
            std::process::exit(1);
        }
    };

    info!(
        path = %cfg.unix_path.display(),
        max_connections = cfg.max_connections,
        threads = cfg.threads_in_pool,
        "chattyd listening",
    );

    while !shutdown.requested() {
        if let Err(e) = dispatcher.poll_once(&queue, POLL_TIMEOUT) {
            error!(%e, "dispatcher poll failed");
        }
        if stats_dump.take() && let Err(e) = stats_file::append_snapshot(&cfg.stat_file_name, &stats)
        {
            warn!(%e, path = %cfg.stat_file_name.display(), "failed appending stats line");
        }
    }

    info!("shutting down, draining in-flight work");
    queue.close();
    workers.join();
    let _ = std::fs::remove_file(&cfg.unix_path);
}
