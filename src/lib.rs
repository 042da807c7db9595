// Library entrypoint for integration tests and internal reuse.
pub mod api;
pub mod config;
pub mod cron_lite;
pub mod event_parser;
pub mod heartbeat;
pub mod integrations;
pub mod kv;
pub mod llm;
pub mod security;
pub mod services;
pub mod shutdown;
pub mod state;
pub mod storage;
pub mod telegram;
pub mod tools;

pub use config::{load_config, Config};
pub use state::AppState;
