pub mod config;
pub mod errors;
pub mod geometry;
pub mod interpreter;
pub mod logging;
pub mod server;
