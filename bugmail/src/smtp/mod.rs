mod command;
mod message;
mod response;
mod session;

pub use command::Command;
pub use message::*;
pub use response::{Reply, ReplyBuffer, ResponseCode};
pub use session::*;
