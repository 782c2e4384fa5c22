pub mod config;
pub mod create;
