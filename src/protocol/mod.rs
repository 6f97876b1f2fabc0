//! # Protocol Layer
//!
//! Typed command construction and response parsing: everything between a
//! logical control/query request and the state document a poll produces.

pub mod commands;
pub mod parser;

pub use commands::{ActionId, CommandBuilder, MsgType};
pub use parser::{
    format_status, DeviceState, Notification, NotificationPayload, PacketAssembly, StateValue,
};
