mod commands;
mod inbox;
mod presenter;

pub use commands::{InputCommand, HELP};
pub use inbox::Inbox;
pub use presenter::describe;
