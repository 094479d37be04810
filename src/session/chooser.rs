//! Interactive device selection.

use std::io::{self, Write};

use crate::console::{Line, LineSource};
use crate::transport::{DeviceCatalog, DeviceHandle};

pub const SELECT_PROMPT: &str = "> ";

/// Interpretation of one answer on the selection screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Reload,
    Index(usize),
    OutOfRange,
    Unrecognized,
}

pub fn parse_selection(answer: &str, count: usize) -> Selection {
    if answer == "r" {
        return Selection::Reload;
    }
    match answer.trim().parse::<i64>() {
        Ok(index) if index >= 0 && (index as u64) < count as u64 => Selection::Index(index as usize),
        Ok(_) => Selection::OutOfRange,
        Err(_) => Selection::Unrecognized,
    }
}

/// List attached instruments until the user picks one or aborts.
///
/// Returns `None` on Ctrl-C / Ctrl-D.
pub fn choose_device<C, L, W>(
    catalog: &mut C,
    input: &mut L,
    out: &mut W,
) -> io::Result<Option<DeviceHandle>>
where
    C: DeviceCatalog + ?Sized,
    L: LineSource + ?Sized,
    W: Write + ?Sized,
{
    loop {
        writeln!(out, "Connected USB-TMC devices:")?;
        let devices = match catalog.devices() {
            Ok(devices) => devices,
            Err(err) => {
                writeln!(out, "Failed to enumerate USB-TMC devices: {}", err)?;
                Vec::new()
            }
        };
        for (index, device) in devices.iter().enumerate() {
            writeln!(out, "  [{}] {}", index, device)?;
        }
        writeln!(out, "Enter the index of the device you want to communicate with.")?;
        writeln!(out, "Type 'r' to reload, ^C or ^D to abort.")?;
        out.flush()?;

        let answer = loop {
            match input.read_line(SELECT_PROMPT)? {
                Line::Text(text) if text.is_empty() => continue,
                Line::Text(text) => break text,
                Line::Interrupted | Line::Eof => {
                    writeln!(out, "abort")?;
                    out.flush()?;
                    return Ok(None);
                }
            }
        };

        match parse_selection(&answer, devices.len()) {
            Selection::Reload => writeln!(out, "Reloading..")?,
            Selection::Index(index) => return Ok(devices.into_iter().nth(index)),
            Selection::OutOfRange => writeln!(out, "Invalid index")?,
            Selection::Unrecognized => {}
        }
    }
}
