//! Operator console plumbing.
//!
//! The console transport pushes raw received bytes into [`ConsoleChannel`].
//! The ranging task feeds them through a [`LineAssembler`], executes each
//! completed line against its controller and renders the outcome with
//! [`render`].

use core::fmt::{self, Write};
use core::str;

use cs_ranging_core::repl::catalog;
use cs_ranging_core::repl::commands::{CommandError, CommandOutcome};
use embassy_sync::channel::{Channel, Receiver};
use heapless::{String, Vec};

use crate::link::LinkMutex;

/// Maximum number of bytes accepted on a single console line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Largest byte chunk the transport hands over at once.
pub const CONSOLE_CHUNK_LEN: usize = 64;

/// Chunks buffered between the console transport and the ranging task.
pub const CONSOLE_QUEUE_DEPTH: usize = 4;

/// Rendered response capacity; fits the full help listing.
pub const MAX_RESPONSE_LEN: usize = 768;

pub type ConsoleLine = String<MAX_LINE_LEN>;
pub type ConsoleResponse = String<MAX_RESPONSE_LEN>;
pub type ConsoleChunk = Vec<u8, CONSOLE_CHUNK_LEN>;

pub type ConsoleChannel = Channel<LinkMutex, ConsoleChunk, CONSOLE_QUEUE_DEPTH>;
pub type ConsoleReceiver<'a> = Receiver<'a, LinkMutex, ConsoleChunk, CONSOLE_QUEUE_DEPTH>;

/// Errors surfaced while assembling a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    /// Input exceeded [`MAX_LINE_LEN`]; the partial line was dropped.
    LineOverflow,
    /// The assembled line was not UTF-8.
    InvalidUtf8,
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::LineOverflow => {
                write!(f, "line longer than {MAX_LINE_LEN} bytes dropped")
            }
            ConsoleError::InvalidUtf8 => write!(f, "line is not UTF-8"),
        }
    }
}

/// Byte-at-a-time line editor.
#[derive(Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds one byte; a line terminator yields the completed, non-empty line.
    pub fn ingest(&mut self, byte: u8) -> Result<Option<ConsoleLine>, ConsoleError> {
        match byte {
            b'\r' | b'\n' => self.finish(),
            0x08 | 0x7f => {
                self.buffer.pop();
                Ok(None)
            }
            value => self.buffer.push(value).map(|()| None).map_err(|_| {
                self.buffer.clear();
                ConsoleError::LineOverflow
            }),
        }
    }

    fn finish(&mut self) -> Result<Option<ConsoleLine>, ConsoleError> {
        let bytes = core::mem::take(&mut self.buffer);
        let text = str::from_utf8(&bytes).map_err(|_| ConsoleError::InvalidUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let mut line = ConsoleLine::new();
        // `text` is a sub-slice of a buffer with the same capacity.
        line.push_str(text).map_err(|_| ConsoleError::LineOverflow)?;
        Ok(Some(line))
    }
}

/// Renders the outcome of one console command.
pub fn render<W: Write>(
    result: &Result<CommandOutcome, CommandError<'_>>,
    out: &mut W,
) -> fmt::Result {
    match result {
        Ok(CommandOutcome::Scheduled { conn, step }) => {
            writeln!(out, "OK {step} scheduled conn={conn}")
        }
        Ok(CommandOutcome::Status(report)) if report.is_empty() => {
            writeln!(out, "no active connections")
        }
        Ok(CommandOutcome::Status(report)) => {
            for status in report {
                writeln!(out, "{status}")?;
            }
            Ok(())
        }
        Ok(CommandOutcome::Help(Some(spec))) => {
            writeln!(out, "{}  - {}", spec.usage, spec.summary)
        }
        Ok(CommandOutcome::Help(None)) => {
            for spec in catalog::commands() {
                writeln!(out, "{}  - {}", spec.usage, spec.summary)?;
            }
            Ok(())
        }
        Err(error) => writeln!(out, "ERR {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_ranging_core::controller::TriggerError;
    use cs_ranging_core::procedure::{ConnHandle, Step};

    fn feed(assembler: &mut LineAssembler, bytes: &[u8]) -> Option<ConsoleLine> {
        let mut last = None;
        for byte in bytes {
            if let Some(line) = assembler.ingest(*byte).expect("line fits") {
                last = Some(line);
            }
        }
        last
    }

    #[test]
    fn assembles_lines_with_backspace() {
        let mut assembler = LineAssembler::new();
        let line = feed(&mut assembler, b"statuz\x08s\r\n");
        assert_eq!(line.as_deref(), Some("status"));
        assert_eq!(feed(&mut assembler, b"  \n"), None);
    }

    #[test]
    fn overflow_drops_partial_line() {
        let mut assembler = LineAssembler::new();
        for _ in 0..MAX_LINE_LEN {
            assembler.ingest(b'a').expect("fits");
        }
        assert_eq!(assembler.ingest(b'b'), Err(ConsoleError::LineOverflow));
        assert_eq!(feed(&mut assembler, b"help\n").as_deref(), Some("help"));
    }

    #[test]
    fn renders_outcomes() {
        let conn = ConnHandle::new(3).expect("valid handle");
        let mut out = ConsoleResponse::new();
        render(
            &Ok(CommandOutcome::Scheduled {
                conn,
                step: Step::ProcedureEnable,
            }),
            &mut out,
        )
        .expect("fits");
        render(
            &Err(CommandError::Trigger(TriggerError::UnknownConnection(conn))),
            &mut out,
        )
        .expect("fits");
        assert_eq!(
            out.as_str(),
            "OK procedure-enable scheduled conn=3\nERR no ranging procedure on connection 3\n"
        );
    }

    #[test]
    fn full_help_fits_response_buffer() {
        let mut out = ConsoleResponse::new();
        render(&Ok(CommandOutcome::Help(None)), &mut out).expect("fits");
        assert_eq!(out.lines().count(), catalog::commands().len());
    }
}
