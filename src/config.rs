//! Server configuration, loaded from a YAML file at startup.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, ServerError};

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    1316
}
fn default_trigger_mode() -> u8 {
    3
}
fn default_timeout_ms() -> i64 {
    60_000
}
fn default_sql_port() -> u16 {
    3306
}
fn default_db_pool_size() -> usize {
    8
}
fn default_worker_threads() -> usize {
    6
}
fn default_log_level() -> u8 {
    1
}
fn default_log_queue_capacity() -> usize {
    1024
}
fn default_doc_root() -> String {
    "resources".to_string()
}
fn default_log_dir() -> String {
    "log".to_string()
}
/// `webserver.cpp`'s `MAX_FD`, here sized from the process's own fd soft
/// limit instead of a hardcoded constant.
fn default_max_connections() -> usize {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } == 0 {
        limit.rlim_cur as usize
    } else {
        65536
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 0=LT/LT, 1=LT/ET, 2=ET/LT, 3=ET/ET (listen, conn).
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default)]
    pub open_linger: bool,
    pub sql_host: String,
    #[serde(default = "default_sql_port")]
    pub sql_port: u16,
    pub sql_user: String,
    pub sql_password: String,
    pub sql_db: String,
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: usize,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "crate::config::default_true")]
    pub log_enable: bool,
    /// 0=debug, 1=info, 2=warn, 3=error.
    #[serde(default = "default_log_level")]
    pub log_level: u8,
    #[serde(default = "default_log_queue_capacity")]
    pub log_queue_capacity: usize,
    #[serde(default = "default_doc_root")]
    pub doc_root: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Defaults to the process's fd soft limit rather than a fixed cap.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| ServerError::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        let config: AppConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ServerError::Config(format!("parsing {}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1024..=65535).contains(&self.port) {
            return Err(ServerError::Config(format!("port {} out of range 1024-65535", self.port)));
        }
        if self.trigger_mode > 3 {
            return Err(ServerError::Config(format!("trigger_mode {} out of range 0-3", self.trigger_mode)));
        }
        if self.db_pool_size == 0 {
            return Err(ServerError::Config("db_pool_size must be >= 1".into()));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be >= 1".into()));
        }
        if self.log_level > 3 {
            return Err(ServerError::Config(format!("log_level {} out of range 0-3", self.log_level)));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be >= 1".into()));
        }
        Ok(())
    }

    /// (listen_edge_triggered, conn_edge_triggered).
    pub fn trigger_flags(&self) -> (bool, bool) {
        match self.trigger_mode {
            0 => (false, false),
            1 => (false, true),
            2 => (true, false),
            _ => (true, true),
        }
    }

    pub fn display(&self) {
        proxy_log::log_info!(
            "listening on {}:{} (trigger_mode={}, timeout_ms={}, workers={}, db_pool={}, doc_root={})",
            self.host,
            self.port,
            self.trigger_mode,
            self.timeout_ms,
            self.worker_threads,
            self.db_pool_size,
            self.doc_root
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> String {
        "sql_host: 127.0.0.1\nsql_user: root\nsql_password: root\nsql_db: webserver\n".to_string()
    }

    #[test]
    fn defaults_fill_in_missing_fields() {
        let cfg: AppConfig = serde_yaml::from_str(&base_yaml()).unwrap();
        assert_eq!(cfg.port, 1316);
        assert_eq!(cfg.trigger_mode, 3);
        assert_eq!(cfg.db_pool_size, 8);
    }

    #[test]
    fn rejects_out_of_range_trigger_mode() {
        let yaml = format!("{}\ntrigger_mode: 4\n", base_yaml());
        let cfg: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_db_pool_size() {
        let yaml = format!("{}\ndb_pool_size: 0\n", base_yaml());
        let cfg: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn trigger_flags_match_table() {
        let mut cfg: AppConfig = serde_yaml::from_str(&base_yaml()).unwrap();
        cfg.trigger_mode = 0;
        assert_eq!(cfg.trigger_flags(), (false, false));
        cfg.trigger_mode = 2;
        assert_eq!(cfg.trigger_flags(), (true, false));
    }
}
