// diagnostic.rs - Compiler error rendering: file:line:col, source line, caret

use std::io::{self, Write};

/// One reportable problem, located by byte offset into the compiled text.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    /// (offset, len); `None` for problems with no source position
    pub span: Option<(usize, usize)>,
}

impl Diagnostic {
    pub fn at(message: impl Into<String>, offset: usize, len: usize) -> Self {
        Diagnostic {
            message: message.into(),
            span: Some((offset, len)),
        }
    }

    pub fn unlocated(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            span: None,
        }
    }
}

/// 1-based position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

/// Count line breaks before `offset`; the column counts characters.
pub fn line_col(text: &str, offset: usize) -> LineCol {
    let offset = floor_char_boundary(text, offset.min(text.len()));
    let before = &text[..offset];
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);

    LineCol {
        line: before.matches('\n').count() + 1,
        col: before[line_start..].chars().count() + 1,
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Renders diagnostics against one source text.
pub struct DiagnosticRenderer<'a> {
    name: &'a str,
    text: &'a str,
}

impl<'a> DiagnosticRenderer<'a> {
    pub fn new(name: &'a str, text: &'a str) -> Self {
        Self { name, text }
    }

    pub fn render<W: Write>(&self, diag: &Diagnostic, out: &mut W) -> io::Result<()> {
        writeln!(out, "error: {}", diag.message)?;

        let Some((offset, len)) = diag.span else {
            return writeln!(out, "  --> {}", self.name);
        };

        let lc = line_col(self.text, offset);
        writeln!(out, "  --> {}:{}:{}", self.name, lc.line, lc.col)?;

        let line_text = self
            .text
            .lines()
            .nth(lc.line - 1)
            .unwrap_or("")
            .trim_end_matches('\r');
        let gutter = lc.line.to_string().len();

        writeln!(out, "{:gutter$} |", "")?;
        writeln!(out, "{} | {}", lc.line, line_text)?;

        // Clamp the caret run to the rest of the line
        let start = lc.col - 1;
        let carets = len
            .min(line_text.chars().count().saturating_sub(start))
            .max(1);
        writeln!(out, "{:gutter$} | {:start$}{}", "", "", "^".repeat(carets))?;

        Ok(())
    }

    pub fn render_to_string(&self, diag: &Diagnostic) -> String {
        let mut buf = Vec::new();
        // Vec<u8> as io::Write never fails
        let _ = self.render(diag, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}
