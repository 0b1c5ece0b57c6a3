pub mod actions;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod ui;
