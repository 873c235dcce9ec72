//! Terminal input and output for the chat client.

use std::{io::Write, path::PathBuf};

use parlor_shared::protocol::AttachmentKind;
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::mpsc;

use crate::engine::ClientEvent;

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Ordinary text, sent to the room
    Chat(String),
    /// `/upload <path>` or `/audio <path>`: send through a side-channel
    Upload(PathBuf, AttachmentKind),
    /// `/download <id | stored path>`: receive on the control connection
    Download(String),
    /// `/fetch <attachment id>`: receive through a side-channel
    Fetch(u64),
    /// `/quit`
    Quit,
    /// A slash command that could not be understood
    Invalid(String),
}

impl Input {
    pub fn parse(line: &str) -> Input {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Input::Chat(line.to_string());
        };
        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        match (name, argument) {
            ("quit", _) => Input::Quit,
            ("upload", path) if !path.is_empty() => {
                Input::Upload(PathBuf::from(path), AttachmentKind::File)
            }
            ("audio", path) if !path.is_empty() => {
                Input::Upload(PathBuf::from(path), AttachmentKind::Audio)
            }
            ("download", target) if !target.is_empty() => Input::Download(target.to_string()),
            ("fetch", id) => match id.parse() {
                Ok(id) => Input::Fetch(id),
                Err(_) => Input::Invalid(format!("/fetch expects an attachment id, got '{}'", id)),
            },
            _ => Input::Invalid(format!("Unknown command: {}", line)),
        }
    }
}

pub const HELP: &str = "Commands: /upload <path>, /audio <path>, /download <id|path>, /fetch <id>, /quit";

/// Redisplay the prompt after printing a message
pub fn redisplay_prompt(username: &str) {
    print!("{}> ", username);
    std::io::stdout().flush().ok();
}

/// Print a receiver event above the prompt.
pub fn show_event(event: &ClientEvent, username: &str) {
    match event {
        ClientEvent::Chat(line) => println!("\n{}", line),
        ClientEvent::Reply(reply) => println!("\n[{}]", reply),
        ClientEvent::Downloaded { path, length } => {
            println!("\nSaved {} ({} bytes)", path.display(), length)
        }
        ClientEvent::DownloadFailed(reason) => println!("\nDownload failed: {}", reason),
        ClientEvent::Closed => {
            println!("\nConnection closed by server");
            return;
        }
    }
    redisplay_prompt(username);
}

/// Read lines on a dedicated thread and forward them.
///
/// The thread ends on Ctrl+C, Ctrl+D, or when the receiving side is dropped.
pub fn spawn_readline(username: String) -> mpsc::UnboundedReceiver<String> {
    let (input_tx, input_rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                tracing::error!("Failed to initialize readline: {}", e);
                return;
            }
        };
        let prompt = format!("{}> ", username);

        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line).ok();
                    if input_tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = input_tx.send("/quit".to_string());
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    input_rx
}
