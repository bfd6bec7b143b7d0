pub mod cache;
pub mod compare;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod model;
pub mod normalize;
pub mod redaction;
pub mod report;
pub mod row;
pub mod sandbox;
pub mod score;
pub mod stats;
pub mod storage;
