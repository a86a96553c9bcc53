pub mod audit;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod logging;
pub mod plugin;
