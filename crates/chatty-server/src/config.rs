use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading config file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed line {line}: {text:?}")]
    MalformedLine { line: usize, text: String },
    #[error("invalid value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("missing required key(s): {0}")]
    MissingKeys(String),
}

/// Server configuration, one value per `Key=Value` line. Every key listed
/// here is required; a file missing any of them fails to parse rather
/// than falling back to a built-in default.
#[derive(Debug, Clone)]
pub struct Config {
    pub unix_path: PathBuf,
    pub max_connections: usize,
    pub threads_in_pool: usize,
    pub max_msg_size: usize,
    pub max_file_size_kib: usize,
    pub max_hist_msgs: usize,
    pub dir_name: PathBuf,
    pub stat_file_name: PathBuf,
}

const REQUIRED_KEYS: [&str; 8] = [
    "UnixPath",
    "MaxConnections",
    "ThreadsInPool",
    "MaxMsgSize",
    "MaxFileSize",
    "MaxHistMsgs",
    "DirName",
    "StatFileName",
];

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)?;

    let mut unix_path = None;
    let mut max_connections = None;
    let mut threads_in_pool = None;
    let mut max_msg_size = None;
    let mut max_file_size_kib = None;
    let mut max_hist_msgs = None;
    let mut dir_name = None;
    let mut stat_file_name = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::MalformedLine { line: idx + 1, text: line.to_string() });
        };
        let key = key.trim();
        let value = value.trim();

        let parse_usize = || {
            value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        };

        match key {
            "UnixPath" => unix_path = Some(PathBuf::from(value)),
            "MaxConnections" => max_connections = Some(parse_usize()?),
            "ThreadsInPool" => threads_in_pool = Some(parse_usize()?),
            "MaxMsgSize" => max_msg_size = Some(parse_usize()?),
            "MaxFileSize" => max_file_size_kib = Some(parse_usize()?),
            "MaxHistMsgs" => max_hist_msgs = Some(parse_usize()?),
            "DirName" => dir_name = Some(PathBuf::from(value)),
            "StatFileName" => stat_file_name = Some(PathBuf::from(value)),
            _ => {}
        }
    }

    let missing: Vec<&str> = [
        (unix_path.is_none(), "UnixPath"),
        (max_connections.is_none(), "MaxConnections"),
        (threads_in_pool.is_none(), "ThreadsInPool"),
        (max_msg_size.is_none(), "MaxMsgSize"),
        (max_file_size_kib.is_none(), "MaxFileSize"),
        (max_hist_msgs.is_none(), "MaxHistMsgs"),
        (dir_name.is_none(), "DirName"),
        (stat_file_name.is_none(), "StatFileName"),
    ]
    .into_iter()
    .filter_map(|(is_missing, name)| is_missing.then_some(name))
    .collect();

    if !missing.is_empty() {
        debug_assert!(REQUIRED_KEYS.len() == 8);
        return Err(ConfigError::MissingKeys(missing.join(", ")));
    }

    Ok(Config {
        unix_path: unix_path.unwrap(),
        max_connections: max_connections.unwrap(),
        threads_in_pool: threads_in_pool.unwrap(),
        max_msg_size: max_msg_size.unwrap(),
        max_file_size_kib: max_file_size_kib.unwrap(),
        max_hist_msgs: max_hist_msgs.unwrap(),
        dir_name: dir_name.unwrap(),
        stat_file_name: stat_file_name.unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("chatty.conf");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_a_complete_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "# comment\n\
             UnixPath=/tmp/chatty.sock\n\
             MaxConnections=64\n\
             ThreadsInPool=4\n\
             MaxMsgSize=512\n\
             MaxFileSize=1024\n\
             MaxHistMsgs=16\n\
             DirName=/tmp/chatty-files\n\
             StatFileName=/tmp/chatty.stats\n",
        );
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.max_connections, 64);
        assert_eq!(cfg.threads_in_pool, 4);
        assert_eq!(cfg.unix_path, PathBuf::from("/tmp/chatty.sock"));
    }

    #[test]
    fn missing_key_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), "UnixPath=/tmp/chatty.sock\n");
        assert!(matches!(load(&path), Err(ConfigError::MissingKeys(_))));
    }

    #[test]
    fn unknown_key_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "Bogus=1\n\
             UnixPath=/tmp/chatty.sock\n\
             MaxConnections=64\n\
             ThreadsInPool=4\n\
             MaxMsgSize=512\n\
             MaxFileSize=1024\n\
             MaxHistMsgs=16\n\
             DirName=/tmp/chatty-files\n\
             StatFileName=/tmp/chatty.stats\n",
        );
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.max_connections, 64);
    }

    #[test]
    fn non_numeric_value_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), "MaxConnections=not-a-number\n");
        assert!(matches!(load(&path), Err(ConfigError::InvalidValue { .. })));
    }
}
