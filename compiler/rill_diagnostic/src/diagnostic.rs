use std::fmt;

use crate::ErrorCode;

/// Severity level for diagnostics.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// Where in the lowered program a diagnostic points.
///
/// Code generators see no source spans, only the enclosing function and the
/// line number the frontend attached to an instruction.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Location {
    pub function: String,
    pub line: Option<u32>,
}

impl Location {
    pub fn new(function: impl Into<String>, line: Option<u32>) -> Self {
        Location {
            function: function.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.function, line),
            None => write!(f, "{}", self.function),
        }
    }
}

/// A codegen diagnostic.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[must_use = "diagnostics should be reported or returned, not silently dropped"]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    fn new_with_severity(code: ErrorCode, severity: Severity) -> Self {
        Diagnostic {
            code,
            severity,
            message: String::new(),
            location: None,
            notes: Vec::new(),
        }
    }

    pub fn error(code: ErrorCode) -> Self {
        Self::new_with_severity(code, Severity::Error)
    }

    pub fn warning(code: ErrorCode) -> Self {
        Self::new_with_severity(code, Severity::Warning)
    }

    pub fn note(code: ErrorCode) -> Self {
        Self::new_with_severity(code, Severity::Note)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.code, self.message)?;
        if let Some(location) = &self.location {
            write!(f, "\n  --> {location}")?;
        }
        for note in &self.notes {
            write!(f, "\n  = note: {note}")?;
        }
        Ok(())
    }
}

/// Dynamic dispatch fallback chosen for a call site.
pub fn dynamic_dispatch(class: &str, method: &str, location: Location) -> Diagnostic {
    Diagnostic::note(ErrorCode::E5001)
        .with_message(format!(
            "call to `{method}` on `{class}` uses dynamic dispatch"
        ))
        .with_location(location)
        .with_note("annotate the receiver type to enable a direct call")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location_and_notes() {
        let diag = dynamic_dispatch("<untyped>", "area", Location::new("main", Some(12)));
        let text = diag.to_string();
        assert!(text.starts_with("note [E5001]: call to `area`"));
        assert!(text.contains("--> main:12"));
        assert!(text.contains("= note: annotate"));
    }

    #[test]
    fn severity_order_puts_errors_first() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Note);
    }
}
