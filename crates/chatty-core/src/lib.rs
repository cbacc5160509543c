mod history;
mod registry;
mod stats;

pub use history::{BoundedHistory, HistoryEntry};
pub use registry::{
    ConnectError, DisconnectError, FdLookup, RegisterError, Registry, SendHandle, UnknownUser,
};
pub use stats::{Stats, StatsSnapshot};
