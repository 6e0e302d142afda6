//! Boot sequence: load config, start logging, open the DB pool, bind the
//! listener, run the reactor — grounded on `webserver.cpp`'s constructor
//! and `main.cpp`'s `Log::Instance()->init(...)` call.

use std::collections::HashMap;
use std::sync::Arc;

use webserver::config::AppConfig;
use webserver::db_pool::DbPool;
use webserver::error::{BootError, ServerError};
use webserver::server::Reactor;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), BootError> {
    let config_path = parse_config_arg();
    let config = AppConfig::load(&config_path)?;

    if config.log_enable {
        proxy_log::init(&config.log_dir, level_from(config.log_level), config.log_queue_capacity)
            .map_err(|e| ServerError::Config(format!("log init: {e}")))?;
    }
    proxy_log::log_info!("========== Server init ==========");
    config.display();

    let db_pool = Some(Arc::new(DbPool::init(
        &config.sql_host,
        config.sql_port,
        &config.sql_user,
        &config.sql_password,
        &config.sql_db,
        config.db_pool_size,
    )?));

    let mut reactor = Reactor::new(&config, db_pool, HashMap::new())?;
    let result = reactor.run();
    if config.log_enable {
        proxy_log::flush();
    }
    result.map_err(BootError::from)
}

fn parse_config_arg() -> String {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return path;
            }
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

fn level_from(log_level: u8) -> proxy_log::Level {
    match log_level {
        0 => proxy_log::Level::Debug,
        1 => proxy_log::Level::Info,
        2 => proxy_log::Level::Warn,
        _ => proxy_log::Level::Error,
    }
}
