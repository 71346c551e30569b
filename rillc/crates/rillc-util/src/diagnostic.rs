//! Error reporting with source excerpts.
//!
//! Every phase of the toolchain aborts on its first error (there is no
//! cross-phase recovery), so the machinery here is intentionally small: a
//! [`Diagnostic`] carries a severity, a message and a [`Span`], and
//! [`render`] prints it to a writer with an ANSI-coloured source excerpt --
//! two context lines framing the offending line, with a caret underline.

use std::fmt;
use std::io::{self, Write};

use crate::span::Span;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_BLUE: &str = "\x1b[34m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_RESET: &str = "\x1b[0m";

/// Diagnostic severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// A fatal error; the phase aborts after reporting it.
    Error,
    /// A warning that does not stop the pipeline.
    Warning,
    /// Additional information attached to another diagnostic.
    Note,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with severity and location.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level.
    pub level: Level,
    /// Main message.
    pub message: String,
    /// Source location the message points at.
    pub span: Span,
    /// Additional notes printed below the excerpt.
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic.
    pub fn new(level: Level, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    /// Create an error diagnostic.
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Error, message, span)
    }

    /// Attach a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Render a diagnostic with a source excerpt.
///
/// Prints `level: message`, then the offending line framed by up to one
/// context line on each side, with a caret underline below the offending
/// columns. `color` controls ANSI escapes; callers disable it when the
/// output is not a terminal.
pub fn render(
    diag: &Diagnostic,
    source: &str,
    out: &mut dyn Write,
    color: bool,
) -> io::Result<()> {
    let (level_color, reset, bold) = if color {
        let level_color = match diag.level {
            Level::Error => ANSI_RED,
            Level::Warning => ANSI_YELLOW,
            Level::Note => ANSI_BLUE,
        };
        (level_color, ANSI_RESET, ANSI_BOLD)
    } else {
        ("", "", "")
    };

    writeln!(
        out,
        "{}{}{}{}: {}{}",
        bold, level_color, diag.level, reset, bold, diag.message
    )?;
    if color {
        write!(out, "{}", ANSI_RESET)?;
    }

    let lines: Vec<&str> = source.lines().collect();
    let line = diag.span.begin.line as usize;
    if line < lines.len() {
        let first = line.saturating_sub(1);
        let last = (line + 1).min(lines.len().saturating_sub(1));
        let gutter = (last + 1).to_string().len();

        writeln!(
            out,
            " {:>gutter$} {}|{} line {}, column {}",
            "",
            level_color,
            reset,
            line + 1,
            diag.span.begin.column + 1,
        )?;
        for i in first..=last {
            writeln!(
                out,
                " {:>gutter$} {}|{} {}",
                i + 1,
                level_color,
                reset,
                lines[i]
            )?;
            if i == line {
                let begin = diag.span.begin.column as usize;
                let width = if diag.span.end.line == diag.span.begin.line {
                    (diag.span.end.column as usize).saturating_sub(begin).max(1)
                } else {
                    lines[i].len().saturating_sub(begin).max(1)
                };
                writeln!(
                    out,
                    " {:>gutter$} {}|{} {}{}{}{}",
                    "",
                    level_color,
                    reset,
                    " ".repeat(begin),
                    level_color,
                    "^".repeat(width),
                    reset
                )?;
            }
        }
    }

    for note in &diag.notes {
        writeln!(out, "note: {}", note)?;
    }

    Ok(())
}
