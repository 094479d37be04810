use std::fmt;

/// A non-empty command line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Build a command from a console line. Returns `None` for an empty line.
    ///
    /// The line terminator is stripped; any other whitespace is part of the command.
    pub fn parse(line: &str) -> Option<Self> {
        let text = line.trim_end_matches(&['\r', '\n'][..]);
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Queries end with `?` and expect the instrument to answer.
    pub fn requires_response(&self) -> bool {
        self.text.ends_with('?')
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
