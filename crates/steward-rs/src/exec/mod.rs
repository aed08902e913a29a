//! External process execution.

pub mod command;
mod output;
pub mod shellwords;

pub use command::{
    CommandExecutor, CommandOptions, CommandResult, ExecError, Stream, check_command,
};
pub use output::OutputBuffer;
