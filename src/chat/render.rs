//! Output rendering for the chat front end.
//!
//! A trait-based rendering abstraction so the REPL loop does not care how
//! output is styled. The default implementation writes to stdout with
//! optional ANSI escape codes.

use std::io::{self, Stdout, Write};

use crate::attachment::DraftAttachment;
use crate::error::Error;
use crate::types::Message;

/// ANSI escape code for dim text (used for attachment cards).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Marks the start of an assistant reply.
    fn start_response(&mut self);

    /// Print a chunk of response text.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &Error);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Describe the draft attachment.
    fn print_attachment(&mut self, draft: &DraftAttachment);

    /// Show the images a sent message carries.
    fn print_sent(&mut self, message: &Message);

    /// Called when a response is complete.
    fn finish_response(&mut self);

    /// Called when the user stops a response.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    in_response: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            in_response: false,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn end_response_line(&mut self) {
        if self.in_response {
            println!();
            self.in_response = false;
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// One-line description of a draft attachment, e.g.
/// `cat.png (image/png, 0.50 MB, preview ready)`.
pub fn attachment_card(draft: &DraftAttachment) -> String {
    let attachment = draft.attachment();
    let preview = if !attachment.is_previewable() {
        ""
    } else if draft.preview_url().is_some() {
        ", preview ready"
    } else {
        ", preview pending"
    };
    format!(
        "{} ({}, {}{})",
        attachment.name(),
        attachment.mime_type(),
        attachment.size_label(),
        preview
    )
}

/// Inline markers for the images in a sent message, e.g. `[image: cat.png]`.
/// None when the message has no previewable attachment.
pub fn sent_images(message: &Message) -> Option<String> {
    let markers: Vec<String> = message
        .previewable_attachments()
        .map(|a| format!("[image: {}]", a.name()))
        .collect();
    if markers.is_empty() {
        None
    } else {
        Some(markers.join(" "))
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self) {
        if self.use_color {
            print!("{ANSI_CYAN}Assistant:{ANSI_RESET} ");
        } else {
            print!("Assistant: ");
        }
        self.in_response = true;
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn print_error(&mut self, error: &Error) {
        self.end_response_line();
        if self.use_color {
            eprintln!("{ANSI_RED}{}: {}{ANSI_RESET}", error.kind(), error.message());
        } else {
            eprintln!("{}: {}", error.kind(), error.message());
        }
    }

    fn print_info(&mut self, info: &str) {
        self.end_response_line();
        println!("{info}");
    }

    fn print_attachment(&mut self, draft: &DraftAttachment) {
        let card = attachment_card(draft);
        if self.use_color {
            println!("{ANSI_DIM}[attached: {card}]{ANSI_RESET}");
        } else {
            println!("[attached: {card}]");
        }
    }

    fn print_sent(&mut self, message: &Message) {
        let Some(images) = sent_images(message) else {
            return;
        };
        if self.use_color {
            println!("{ANSI_DIM}{images}{ANSI_RESET}");
        } else {
            println!("{images}");
        }
    }

    fn finish_response(&mut self) {
        self.end_response_line();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_response_line();
        println!("[interrupted]");
        self.flush();
    }
}
