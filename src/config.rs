//! Command-line configuration

use crate::metadata::ReplicaOf;
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid --replicaof value {0:?}, expected \"<host> <port>\"")]
    InvalidReplicaOf(String),
}

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "In-memory key-value server speaking RESP")]
pub struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Directory holding the RDB snapshot
    #[arg(long)]
    pub dir: Option<String>,

    /// RDB snapshot file name inside --dir
    #[arg(long)]
    pub dbfilename: Option<String>,

    /// Follow a master, e.g. --replicaof "localhost 6379"
    #[arg(long, value_name = "HOST PORT")]
    pub replicaof: Option<String>,
}

impl Cli {
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let replica_of = self.replicaof.as_deref().map(parse_replica_of).transpose()?;

        Ok(ServerConfig {
            bind: self.bind,
            port: self.port,
            dir: self.dir,
            dbfilename: self.dbfilename,
            replica_of,
        })
    }
}

/// Validated server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
    pub replica_of: Option<ReplicaOf>,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// `dir/dbfilename`, when both are set
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        match (&self.dir, &self.dbfilename) {
            (Some(dir), Some(file)) => Some(PathBuf::from(dir).join(file)),
            _ => None,
        }
    }
}

/// Parse `"<host> <port>"`
fn parse_replica_of(value: &str) -> Result<ReplicaOf, ConfigError> {
    let mut parts = value.split_whitespace();

    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) => {
            let port = port
                .parse()
                .map_err(|_| ConfigError::InvalidReplicaOf(value.to_string()))?;

            Ok(ReplicaOf {
                host: host.to_string(),
                port,
            })
        }
        _ => Err(ConfigError::InvalidReplicaOf(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Cli::parse_from(["ferrumkv"]).into_config().unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:6379");
        assert!(config.replica_of.is_none());
        assert!(config.snapshot_path().is_none());
    }

    #[test]
    fn test_full_command_line() {
        let config = Cli::parse_from([
            "ferrumkv",
            "--port",
            "6380",
            "--dir",
            "/tmp/redis-files",
            "--dbfilename",
            "dump.rdb",
            "--replicaof",
            "localhost 6379",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.port, 6380);
        assert_eq!(
            config.snapshot_path(),
            Some(PathBuf::from("/tmp/redis-files/dump.rdb"))
        );
        assert_eq!(
            config.replica_of,
            Some(ReplicaOf {
                host: "localhost".to_string(),
                port: 6379,
            })
        );
    }

    #[test]
    fn test_invalid_replicaof() {
        for value in ["localhost", "localhost port", "a 1 b"] {
            let result = Cli::parse_from(["ferrumkv", "--replicaof", value]).into_config();
            assert!(matches!(result, Err(ConfigError::InvalidReplicaOf(_))), "{}", value);
        }
    }
}
