mod commands;
mod handler;
mod webhook;

pub use commands::respond;
pub use handler::parse_command;
pub use webhook::{router, serve};
