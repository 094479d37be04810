use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use std::io::{self, Write};
use std::time::Duration;

/// Redraw period of the waiting indicator.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(100);

const FRAME_COUNT: usize = 4;

/// Cyclic "still waiting" dots drawn in place on the current line.
#[derive(Debug, Default)]
pub struct ProgressIndicator {
    frame: usize,
    drawn: bool,
}

impl ProgressIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame `n` of the cycle: `n` dots padded to three columns.
    pub fn frame_text(frame: usize) -> String {
        let dots = frame % FRAME_COUNT;
        format!("{}{}", ".".repeat(dots), " ".repeat(FRAME_COUNT - 1 - dots))
    }

    /// Advance one frame and redraw it at the start of the line.
    pub fn tick<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.frame = (self.frame + 1) % FRAME_COUNT;
        out.queue(MoveToColumn(0))?
            .queue(Print(Self::frame_text(self.frame)))?
            .queue(MoveToColumn(0))?;
        out.flush()?;
        self.drawn = true;
        Ok(())
    }

    /// Erase the indicator so the result starts on a clean line.
    pub fn clear<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if !self.drawn {
            return Ok(());
        }
        out.queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?;
        out.flush()?;
        self.drawn = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_frame_cycle() {
        let frames: Vec<String> = (0..5).map(ProgressIndicator::frame_text).collect();
        assert_eq!(frames, vec!["   ", ".  ", ".. ", "...", "   "]);
    }

    #[test]
    fn tick_draws_next_frame() {
        let mut indicator = ProgressIndicator::new();
        let mut out = Vec::new();
        indicator.tick(&mut out).unwrap();
        let drawn = String::from_utf8(out).unwrap();
        assert!(drawn.contains(".  "));
    }

    #[test]
    fn clear_without_tick_writes_nothing() {
        let mut indicator = ProgressIndicator::new();
        let mut out = Vec::new();
        indicator.clear(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
