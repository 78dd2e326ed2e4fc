#[macro_use]
extern crate log;

pub mod passthrough;
pub mod server;
mod util;
