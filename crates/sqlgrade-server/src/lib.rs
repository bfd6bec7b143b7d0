pub mod cache;
pub mod config;
pub mod methods;
pub mod security;
pub mod server;
