mod command_registry;
mod command_parser;

pub use command_parser::{parse_command, SessionCommand};
pub use command_registry::SESSION_HELP_COMMANDS;
