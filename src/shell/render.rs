//! Response rendering: UTF-8 text as-is, anything else as a hex dump.

const BYTES_PER_LINE: usize = 16;

pub const UNKNOWN_FORMAT: &str = "<< Unknown format >>";

/// Render an optional response payload for the console.
///
/// Returns `None` when there is no payload (write-only command).
///
/// The hex dump only covers whole 16-byte lines: a trailing partial line is not shown.
/// A non-text payload shorter than one line therefore renders as [`UNKNOWN_FORMAT`].
pub fn render(payload: Option<&[u8]>) -> Option<String> {
    let bytes = payload?;
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some(text.to_string());
    }

    let dump = hex_dump(bytes);
    if dump.is_empty() {
        Some(UNKNOWN_FORMAT.to_string())
    } else {
        Some(dump)
    }
}

/// `IIII: B0 B1 .. B15` per complete 16-byte line, newline-joined.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks_exact(BYTES_PER_LINE)
        .enumerate()
        .map(|(index, line)| {
            let cells: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
            format!("{:04X}: {}", index, cells.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
