/// Number of sessions shown by `/sessions`.
pub const SESSION_LIST_LIMIT: usize = 20;

pub const HELP_TEXT: &str = "\
Commands:
  /help            show this help
  /new             start a new session
  /sessions        list recent sessions
  /load <id>       switch to a stored session
  /search <text>   search titles and messages
  /delete <id>     delete a stored session
  /status          show session and context status
  /copy            copy the last reply to the clipboard
  /quit, /exit     leave (Ctrl-C stops a running reply)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Sessions,
    Load(String),
    Search(String),
    Delete(String),
    Status,
    Copy,
    Quit,
    /// A known command invoked without its required argument.
    Usage(&'static str),
    Unknown(String),
}

/// Parses `input` as a slash command; plain chat text yields `None`.
pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, argument) = match trimmed.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/new" => SlashCommand::New,
        "/sessions" => SlashCommand::Sessions,
        "/load" => with_argument(argument, "/load <id>", SlashCommand::Load),
        "/search" => with_argument(argument, "/search <text>", SlashCommand::Search),
        "/delete" => with_argument(argument, "/delete <id>", SlashCommand::Delete),
        "/status" => SlashCommand::Status,
        "/copy" => SlashCommand::Copy,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

fn with_argument(
    argument: &str,
    usage: &'static str,
    build: fn(String) -> SlashCommand,
) -> SlashCommand {
    if argument.is_empty() {
        SlashCommand::Usage(usage)
    } else {
        build(argument.to_string())
    }
}
