use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What the reader should do after a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    /// Echo a typed character.
    Echo(char),
    /// Erase the last echoed character.
    Erase,
    Submit(String),
    Interrupt,
    EndOfInput,
    Ignore,
}

/// Minimal single-line editor driven by raw key events.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: String,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn apply(&mut self, key: KeyEvent) -> EditAction {
        if key.kind == KeyEventKind::Release {
            return EditAction::Ignore;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char('c') if ctrl => EditAction::Interrupt,
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    EditAction::EndOfInput
                } else {
                    EditAction::Ignore
                }
            }
            KeyCode::Char(_) if ctrl => EditAction::Ignore,
            KeyCode::Char(c) => {
                self.buffer.push(c);
                EditAction::Echo(c)
            }
            KeyCode::Backspace => match self.buffer.pop() {
                Some(_) => EditAction::Erase,
                None => EditAction::Ignore,
            },
            KeyCode::Enter => EditAction::Submit(std::mem::take(&mut self.buffer)),
            _ => EditAction::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn typing_and_enter_submits_line() {
        let mut editor = LineEditor::new();
        for c in "*IDN?".chars() {
            assert_eq!(editor.apply(key(KeyCode::Char(c))), EditAction::Echo(c));
        }
        assert_eq!(
            editor.apply(key(KeyCode::Enter)),
            EditAction::Submit("*IDN?".to_string())
        );
        assert!(editor.buffer().is_empty());
    }

    #[test]
    fn backspace_erases() {
        let mut editor = LineEditor::new();
        editor.apply(key(KeyCode::Char('a')));
        assert_eq!(editor.apply(key(KeyCode::Backspace)), EditAction::Erase);
        assert_eq!(editor.apply(key(KeyCode::Backspace)), EditAction::Ignore);
    }

    #[test]
    fn ctrl_c_interrupts() {
        let mut editor = LineEditor::new();
        editor.apply(key(KeyCode::Char('x')));
        assert_eq!(editor.apply(ctrl('c')), EditAction::Interrupt);
    }

    #[test]
    fn ctrl_d_only_ends_empty_line() {
        let mut editor = LineEditor::new();
        editor.apply(key(KeyCode::Char('x')));
        assert_eq!(editor.apply(ctrl('d')), EditAction::Ignore);
        editor.apply(key(KeyCode::Backspace));
        assert_eq!(editor.apply(ctrl('d')), EditAction::EndOfInput);
    }

    #[test]
    fn empty_enter_submits_empty_line() {
        let mut editor = LineEditor::new();
        assert_eq!(
            editor.apply(key(KeyCode::Enter)),
            EditAction::Submit(String::new())
        );
    }
}
