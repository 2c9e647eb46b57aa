pub mod config;
pub mod deps;
pub mod ipc;
pub mod launcher;
pub mod port;
pub mod process_monitor;
pub mod protocol;  // store health check (RESP)
pub mod supervisor;
pub mod utils;

pub use launcher::Launcher;
