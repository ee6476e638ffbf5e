pub mod config;
pub mod listener;
