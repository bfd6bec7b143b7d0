use sqlgrade_core::config::EngineConfig;
use std::env;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub max_msg_bytes: usize,
    pub problem_cache_entries: u64,
    pub log_level: String,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_msg_bytes: 1_000_000,
            problem_cache_entries: 128,
            log_level: "info".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self {
            engine: EngineConfig::from_env(),
            ..Self::default()
        };
        if let Ok(v) = env::var("SQLGRADE_MAX_MSG_BYTES") {
            if let Ok(n) = v.parse() {
                cfg.max_msg_bytes = n;
            }
        }
        if let Ok(v) = env::var("SQLGRADE_PROBLEM_CACHE_ENTRIES") {
            if let Ok(n) = v.parse() {
                cfg.problem_cache_entries = n;
            }
        }
        cfg.log_level = cfg.engine.log_level.clone();
        cfg
    }
}
