//! Wire protocol: framing, node messages and the client text protocol

pub mod command;
pub mod frame;
pub mod message;
pub mod parser;
pub mod response;

pub use command::ClientCommand;
pub use frame::{FrameCodec, FrameResult, read_frame, write_frame};
pub use message::{Reply, Request};
pub use parser::parse;
pub use response::ResponseWriter;
