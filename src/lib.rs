pub mod config;
pub mod engine;
pub mod io;
pub mod logging;
pub mod output;
pub mod system;
pub mod viz;
