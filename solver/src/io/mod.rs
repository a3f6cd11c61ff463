//! I/O helpers: configuration, agent backends and run artifacts.

pub mod agent;
pub mod chat;
pub mod config;
pub mod process;
pub mod prompt;
pub mod report;
pub mod transcript;
