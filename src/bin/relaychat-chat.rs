//! Interactive terminal chat against a relaychat relay.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a relay on the default address
//! relaychat-chat
//!
//! # Talk to a relay elsewhere
//! relaychat-chat --relay-url http://10.0.0.5:3000/api/chat
//!
//! # Disable colors (useful for piping output)
//! relaychat-chat --no-color
//! ```
//!
//! # Commands
//!
//! - `/attach <path>` - Attach a file to the next message
//! - `/detach` - Remove the pending attachment
//! - `/clear` - Clear the conversation
//! - `/help` - Show available commands
//! - `/quit` - Exit the application

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use relaychat::chat::{
    ChatArgs, ChatCommand, ChatConfig, PlainTextRenderer, Renderer, help_text, parse_command,
};
use relaychat::{ChatSession, MessageRole, Outcome, RelayClient, Update};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Main entry point for the relaychat-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RELAYCHAT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("relaychat-chat [OPTIONS]");
    let config = ChatConfig::from(args);

    let client = RelayClient::new(&config.relay_url)?;
    let mut session = ChatSession::new(client);
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!("relaychat (relay: {})", config.relay_url);
    println!("Type /help for commands, /quit to exit\n");

    loop {
        interrupted.store(false, Ordering::Relaxed);

        let line = match rl.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_info(&format!("Input error: {}", err));
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() && session.state().draft_attachment().is_none() {
            continue;
        }
        if !line.is_empty() {
            let _ = rl.add_history_entry(line);
        }

        if let Some(cmd) = parse_command(line) {
            match cmd {
                ChatCommand::Quit => {
                    println!("Goodbye!");
                    break;
                }
                ChatCommand::Clear => {
                    session.reset()?;
                    renderer.print_info("Conversation cleared.");
                }
                ChatCommand::Help => {
                    for line in help_text().lines() {
                        println!("    {}", line);
                    }
                }
                ChatCommand::Attach(path) => match session.attach_path(&path).await {
                    Ok(_) => {
                        // Give the preview a moment so the card can say so.
                        let _ = tokio::time::timeout(POLL_INTERVAL, session.run_until_idle()).await;
                        if let Some(draft) = session.state().draft_attachment() {
                            renderer.print_attachment(draft);
                        }
                    }
                    Err(err) => renderer.print_error(&err),
                },
                ChatCommand::Detach => {
                    session.clear_attachment()?;
                    renderer.print_info("Attachment removed.");
                }
                ChatCommand::Invalid(message) => {
                    renderer.print_info(&message);
                }
            }
            continue;
        }

        session.edit_text(line)?;
        if let Err(err) = session.submit() {
            renderer.print_error(&err);
            continue;
        }
        if let Some(sent) = session
            .state()
            .messages()
            .iter()
            .rev()
            .find(|m| m.role() == MessageRole::User)
        {
            renderer.print_sent(sent);
        }
        renderer.start_response();
        stream_reply(&mut session, &mut renderer, &interrupted).await;
    }

    Ok(())
}

/// Prints the reply until it finishes or the user presses Ctrl+C.
async fn stream_reply(
    session: &mut ChatSession<RelayClient>,
    renderer: &mut PlainTextRenderer,
    interrupted: &AtomicBool,
) {
    loop {
        if interrupted.swap(false, Ordering::Relaxed) {
            match session.cancel() {
                Ok(_) => renderer.print_interrupted(),
                Err(err) => renderer.print_error(&err),
            }
            return;
        }
        let update = match tokio::time::timeout(POLL_INTERVAL, session.next_update()).await {
            Ok(Some(update)) => update,
            Ok(None) => {
                renderer.finish_response();
                return;
            }
            Err(_) => continue,
        };
        match update {
            Update::Fragment { text, .. } => renderer.print_text(&text),
            Update::PreviewReady(_) => {}
            Update::Finished { outcome, .. } => {
                match outcome {
                    Outcome::Completed => renderer.finish_response(),
                    Outcome::Cancelled => renderer.print_interrupted(),
                    Outcome::Failed(err) => renderer.print_error(&err),
                }
                return;
            }
        }
    }
}
