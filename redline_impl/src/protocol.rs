//! The wire codec: request encoding and incremental reply parsing.

mod command;
mod decode;
mod reply;

pub use command::{Command, ToArg};
pub(crate) use decode::RecvBuffer;
pub use reply::{FromReply, Reply};
