//! Console line input.

mod editor;
mod reader;

pub use editor::{EditAction, LineEditor};
pub use reader::ConsoleReader;

use std::io;

/// Result of asking the user for one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Ctrl-C.
    Interrupted,
    /// Ctrl-D or end of piped input.
    Eof,
}

/// Anything that can prompt for and return a line of user input.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Line>;
}
