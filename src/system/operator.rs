//! Operator commands read from a line-oriented input (stdin in the binary).
//!
//! Typing `r` or `reset` asks for the active engine to be replaced before the
//! next frame. The reader thread is detached: it blocks on input and dies
//! with the process.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::shared_state::SharedState;

const OPERATOR_THREAD: &str = "operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Reset,
}

/// Parse one input line. Unknown or empty lines yield `None`.
pub fn parse_command(line: &str) -> Option<OperatorCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "reset" => Some(OperatorCommand::Reset),
        _ => None,
    }
}

/// Read commands from `input` until it ends, forwarding them to `shared`.
pub fn spawn_command_reader<R>(input: R, shared: Arc<SharedState>) -> io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name(OPERATOR_THREAD.to_string())
        .spawn(move || read_commands(input, &shared))
}

fn read_commands<R: BufRead>(input: R, shared: &SharedState) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("operator input failed: {}", e);
                break;
            }
        };
        if shared.is_processing_finished() {
            break;
        }
        match parse_command(&line) {
            Some(OperatorCommand::Reset) => {
                info!("operator requested a reset");
                shared.request_reset();
            }
            None if line.trim().is_empty() => {}
            None => debug!("ignoring operator input {:?}", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_parse_command_accepts_reset_spellings() {
        assert_eq!(parse_command("r"), Some(OperatorCommand::Reset));
        assert_eq!(parse_command("  RESET \n"), Some(OperatorCommand::Reset));
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("quit"), None);
    }

    #[test]
    fn test_reset_line_sets_request() {
        let shared = SharedState::new();
        let reader = spawn_command_reader(Cursor::new("hello\nr\n"), shared.clone()).unwrap();
        reader.join().unwrap();
        assert!(shared.is_reset_requested());
    }

    #[test]
    fn test_input_after_finish_is_ignored() {
        let shared = SharedState::new();
        shared.mark_processing_finished();
        let reader = spawn_command_reader(Cursor::new("reset\n"), shared.clone()).unwrap();
        reader.join().unwrap();
        assert!(!shared.is_reset_requested());
    }

    #[test]
    fn test_unknown_lines_leave_request_clear() {
        let shared = SharedState::new();
        let reader = spawn_command_reader(Cursor::new("x\n\nhelp\n"), shared.clone()).unwrap();
        reader.join().unwrap();
        assert!(!shared.is_reset_requested());
    }
}
