use crate::infrastructure::error::{CliError, Result};
use std::path::PathBuf;

/// One line typed into an interactive session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// Plain text for every connected peer
    Text(String),
    /// `/send <path>`: an image file for every connected peer
    SendImage(PathBuf),
    /// `/peers`
    Peers,
    /// `/leave` or `/quit`
    Leave,
    /// `/help`
    Help,
    /// Blank line
    Nothing,
}

pub const HELP: &str = "\
Type a message and press enter to send it to everyone.
  /send <path>   send an image file
  /peers         list connected peers
  /leave         leave the session and exit
  //text         send text that starts with '/'";

impl InputCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(InputCommand::Nothing);
        }

        let Some(command) = line.strip_prefix('/') else {
            return Ok(InputCommand::Text(line.to_string()));
        };
        if command.starts_with('/') {
            return Ok(InputCommand::Text(command.to_string()));
        }

        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        match name {
            "send" if argument.is_empty() => Err(CliError::Usage("/send <path>")),
            "send" => Ok(InputCommand::SendImage(PathBuf::from(argument))),
            "peers" => Ok(InputCommand::Peers),
            "leave" | "quit" => Ok(InputCommand::Leave),
            "help" => Ok(InputCommand::Help),
            other => Err(CliError::UnknownCommand(format!("/{other}"))),
        }
    }
}
