use std::path::PathBuf;

/// Tuning the engine needs to enforce size caps and locate the file store.
/// A small slice of the full server `Config`, so this crate does not have
/// to depend on the config-file parser.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_msg_size: usize,
    pub max_file_size_kib: usize,
    pub dir_name: PathBuf,
}
