//! Slash command parsing for the chat front end.
//!
//! Commands start with `/` and control the session locally; they are never
//! sent to the relay.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Attach the file at the given path to the next message.
    Attach(String),

    /// Remove the draft attachment.
    Detach,

    /// Clear the conversation and the draft.
    Clear,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a message.
///
/// # Examples
///
/// ```
/// # use relaychat::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert_eq!(
///     parse_command("/attach cat.png"),
///     Some(ChatCommand::Attach("cat.png".to_string()))
/// );
/// assert!(parse_command("Hello!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "attach" => match argument {
            Some(path) => ChatCommand::Attach(path.to_string()),
            None => ChatCommand::Invalid("/attach requires a file path".to_string()),
        },
        "detach" => ChatCommand::Detach,
        "clear" | "reset" => ChatCommand::Clear,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

/// Returns help text describing the available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /attach <path>         Attach a file to the next message
  /detach                Remove the pending attachment
  /clear                 Clear the conversation
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl+C while a reply is streaming to stop it."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_clear() {
        assert_eq!(parse_command("/clear"), Some(ChatCommand::Clear));
        assert_eq!(parse_command("/CLEAR"), Some(ChatCommand::Clear));
        assert_eq!(parse_command("/reset"), Some(ChatCommand::Clear));
    }

    #[test]
    fn parse_attach() {
        assert_eq!(
            parse_command("/attach  photos/my cat.png "),
            Some(ChatCommand::Attach("photos/my cat.png".to_string()))
        );
        assert_eq!(
            parse_command("/attach"),
            Some(ChatCommand::Invalid("/attach requires a file path".to_string()))
        );
        assert_eq!(parse_command("/detach"), Some(ChatCommand::Detach));
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_command("/model gemini"),
            Some(ChatCommand::Invalid("Unknown command: /model".to_string()))
        );
    }

    #[test]
    fn regular_messages_are_not_commands() {
        assert_eq!(parse_command("Hello"), None);
        assert_eq!(parse_command("what does a/b mean?"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn help_text_not_empty() {
        let help = help_text();
        assert!(help.contains("/attach"));
        assert!(help.contains("/detach"));
        assert!(help.contains("/clear"));
        assert!(help.contains("/quit"));
    }
}
