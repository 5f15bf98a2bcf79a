//! Error types and diagnostics for the Pangea compiler.
//!
//! Analysis stages never fail with an `Err` across component boundaries;
//! they append to a [`DiagnosticEmitter`] and return sentinel values so the
//! rest of the pipeline keeps producing diagnostics. [`PangError`] covers
//! the hard failures at the library boundary (unreadable input, a backend
//! that cannot emit).

use crate::source::{SourceLocation, SourceMap};
use colored::Colorize;
use std::fmt::Write as _;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PangError>;

#[derive(Error, Debug)]
pub enum PangError {
    #[error("parse error at {file}:{line}:{col}: {message}")]
    Parse {
        file: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("module error: {0}")]
    Module(String),

    #[error("code generation error: {0}")]
    Codegen(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compilation failed with {0} error(s)")]
    Failed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
    Fatal,
}

impl DiagnosticLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub location: Option<SourceLocation>,
}

/// Accumulates diagnostics across the whole pipeline.
///
/// Logically single-writer: each stage borrows it mutably in turn.
#[derive(Default)]
pub struct DiagnosticEmitter {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, level: DiagnosticLevel, location: SourceLocation, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            level,
            message: message.into(),
            location: Some(location),
        });
    }

    /// Report without a source position (loader failures, CLI problems).
    pub fn report_bare(&mut self, level: DiagnosticLevel, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            level,
            message: message.into(),
            location: None,
        });
    }

    pub fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.report(DiagnosticLevel::Error, location, message);
    }

    pub fn warning(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.report(DiagnosticLevel::Warning, location, message);
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        self.report_bare(DiagnosticLevel::Fatal, message);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.level, DiagnosticLevel::Error | DiagnosticLevel::Fatal))
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render every diagnostic with source context. Does not mutate any
    /// state and can be invoked repeatedly.
    pub fn render_all(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        for diag in &self.diagnostics {
            self.render_one(diag, sources, &mut out);
        }
        out
    }

    /// Render to stderr.
    pub fn print_all(&self, sources: &SourceMap) {
        eprint!("{}", self.render_all(sources));
    }

    fn render_one(&self, diag: &Diagnostic, sources: &SourceMap, out: &mut String) {
        let label = match diag.level {
            DiagnosticLevel::Info => "info".blue().bold(),
            DiagnosticLevel::Warning => "warning".yellow().bold(),
            DiagnosticLevel::Error => "error".red().bold(),
            DiagnosticLevel::Fatal => "fatal".red().bold(),
        };
        let _ = writeln!(out, "{}: {}", label, diag.message);

        let Some(loc) = &diag.location else {
            return;
        };
        let _ = writeln!(out, "  {} {}", "-->".cyan(), loc);

        let Some(line) = sources.get(&loc.file).and_then(|f| f.line_text(loc.line)) else {
            return;
        };
        let gutter = loc.line.to_string().len().max(2);
        let bar = "|".cyan();
        let _ = writeln!(out, "{:>width$} {}", "", bar, width = gutter);
        let _ = writeln!(out, "{:>width$} {} {}", loc.line, bar, line, width = gutter);
        let underline = "^".repeat(loc.length.max(1));
        let _ = writeln!(
            out,
            "{:>width$} {} {}{}",
            "",
            bar,
            " ".repeat(loc.column.saturating_sub(1)),
            underline.red().bold(),
            width = gutter
        );
    }
}
