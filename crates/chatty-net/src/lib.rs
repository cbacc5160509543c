mod dispatcher;
mod worker;

pub use dispatcher::{Connections, Dispatcher};
pub use worker::WorkerPool;
