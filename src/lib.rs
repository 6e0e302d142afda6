pub mod buffer;
pub mod config;
pub mod db_pool;
pub mod error;
pub mod http;
pub mod poller;
pub mod server;
pub mod timer;
pub mod user_verify;
pub mod worker_pool;

pub use config::AppConfig;
pub use error::{Result, ServerError};
pub use server::Reactor;
