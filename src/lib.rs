pub mod error;
pub mod storage;
pub mod security;
pub mod identity;
pub mod clients;
pub mod config;
pub mod server;
