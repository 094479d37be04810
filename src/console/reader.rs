use crossterm::event::{self, Event};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::console::editor::{EditAction, LineEditor};
use crate::console::{Line, LineSource};
use crate::shutdown::InterruptHandle;

/// How often a piped read checks for Ctrl-C while waiting for the next line.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

enum Mode {
    /// Interactive terminal: raw-mode line editing. Ctrl-C arrives as a key press.
    Terminal,
    /// Redirected stdin, read on a background thread.
    Piped(LinePump),
}

/// Reads prompted lines from the process console.
pub struct ConsoleReader {
    mode: Mode,
}

impl ConsoleReader {
    /// `interrupt` ends a piped read that is still waiting for input.
    pub fn open(interrupt: InterruptHandle) -> io::Result<Self> {
        let mode = if io::stdin().is_terminal() {
            Mode::Terminal
        } else {
            Mode::Piped(LinePump::spawn(|| io::stdin().lock(), interrupt)?)
        };
        Ok(Self { mode })
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self.mode, Mode::Terminal)
    }
}

impl LineSource for ConsoleReader {
    fn read_line(&mut self, prompt: &str) -> io::Result<Line> {
        let mut stdout = io::stdout();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;

        match &mut self.mode {
            Mode::Terminal => read_raw(&mut stdout),
            Mode::Piped(pump) => pump.next_line(),
        }
    }
}

/// Buffered lines delivered from a dedicated reader thread.
///
/// A blocking `read` on stdin is restarted after SIGINT, so the console side waits on the
/// channel instead and checks the interrupt flag between polls.
pub struct LinePump {
    lines: Receiver<io::Result<Line>>,
    interrupt: InterruptHandle,
}

impl LinePump {
    pub fn spawn<R, F>(open: F, interrupt: InterruptHandle) -> io::Result<Self>
    where
        R: BufRead,
        F: FnOnce() -> R + Send + 'static,
    {
        let (sender, lines) = mpsc::channel();
        thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                let mut input = open();
                loop {
                    let line = read_buffered(&mut input);
                    let last = !matches!(line, Ok(Line::Text(_)));
                    if sender.send(line).is_err() || last {
                        break;
                    }
                }
                debug!("console input finished");
            })?;
        Ok(Self { lines, interrupt })
    }

    /// Next line, `Interrupted` once Ctrl-C is seen, or `Eof` after the input ends.
    pub fn next_line(&self) -> io::Result<Line> {
        loop {
            if self.interrupt.is_interrupted() {
                return Ok(Line::Interrupted);
            }
            match self.lines.recv_timeout(INTERRUPT_POLL) {
                Ok(line) => return line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(Line::Eof),
            }
        }
    }
}

fn read_raw<W: Write>(out: &mut W) -> io::Result<Line> {
    enable_raw_mode()?;
    let _raw_mode = scopeguard::guard((), |_| {
        let _ = disable_raw_mode();
    });

    let mut editor = LineEditor::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };

        match editor.apply(key) {
            EditAction::Echo(c) => write!(out, "{}", c)?,
            EditAction::Erase => out.write_all(b"\x08 \x08")?,
            EditAction::Submit(text) => {
                out.write_all(b"\r\n")?;
                out.flush()?;
                return Ok(Line::Text(text));
            }
            EditAction::Interrupt => {
                out.write_all(b"^C\r\n")?;
                out.flush()?;
                return Ok(Line::Interrupted);
            }
            EditAction::EndOfInput => {
                out.write_all(b"\r\n")?;
                out.flush()?;
                return Ok(Line::Eof);
            }
            EditAction::Ignore => {}
        }
        out.flush()?;
    }
}

fn read_buffered<R: BufRead>(input: &mut R) -> io::Result<Line> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(Line::Eof);
    }
    Ok(Line::Text(
        line.trim_end_matches(&['\r', '\n'][..]).to_string(),
    ))
}
