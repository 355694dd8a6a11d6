mod commands;
mod config;
mod server;

pub use config::Opts;
pub use server::{MAX_COMMANDS_PER_ITER, Server};
