#![forbid(unsafe_code)]

mod frame;
mod message;

pub use frame::PROTOCOL_VERSION;
pub use message::{Command, Request, Response, Status};
