//! Inter-unit message protocol
//!
//! Text on the wire (`SOURCE:COMMAND[:ARG...]`), typed everywhere else.

mod command;
mod outbound;
mod source;

pub use command::{Command, Rejected, RepeatMode, Request, Topic};
pub use outbound::{Outbound, Outcome};
pub use source::Source;
