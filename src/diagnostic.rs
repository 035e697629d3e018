use std::fmt;

/// Which class of construction-time failure a diagnostic reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Dtype incompatibility, pointer required, unsupported atomic element,
    /// non-constant shape argument.
    Type,
    /// Broadcast mismatch, rank mismatch between block-pointer arguments.
    Shape,
    /// Out-of-range axis, malformed boundary-check list, bad constant.
    Value,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Type => "type error",
            ErrorKind::Shape => "shape error",
            ErrorKind::Value => "value error",
        }
    }
}

/// A lowering diagnostic. Raised before any IR is emitted for the
/// offending builtin call; aborts lowering of the enclosing kernel.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    /// Rendered builtin call the error was raised from, e.g.
    /// `atomic_max(*f16, f16)`.
    pub call: Option<String>,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            call: None,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn type_error(message: String) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn shape_error(message: String) -> Self {
        Self::new(ErrorKind::Shape, message)
    }

    pub fn value_error(message: String) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Attach the call site. Errors unwind from the innermost builtin
    /// outwards, so the last call attached is the one the kernel wrote;
    /// inner calls are kept as notes.
    pub fn at_call(mut self, call: String) -> Self {
        if let Some(inner) = self.call.replace(call) {
            self.notes.push(format!("raised by `{}`", inner));
        }
        self
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Render the diagnostic to stderr using ariadne. The source shown is
    /// the rendered call, or the message itself when no call is attached.
    pub fn render(&self, kernel: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let source = self.call.clone().unwrap_or_else(|| self.message.clone());
        let end = source.len().max(1);

        let mut report = Report::build(ReportKind::Error, kernel, 0)
            .with_message(format!("{}: {}", self.kind.name(), self.message))
            .with_label(
                Label::new((kernel, 0..end))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        if let Err(e) = report.finish().eprint((kernel, Source::from(source))) {
            eprintln!("error: {} (rendering failed: {})", self, e);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)?;
        if let Some(call) = &self.call {
            write!(f, " (in `{}`)", call)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let d = Diagnostic::type_error("pointer required".to_string());
        assert_eq!(d.kind, ErrorKind::Type);
        assert_eq!(d.message, "pointer required");
        assert!(d.call.is_none());
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_kinds() {
        assert!(Diagnostic::shape_error("x".into()).is(ErrorKind::Shape));
        assert!(Diagnostic::value_error("x".into()).is(ErrorKind::Value));
        assert!(!Diagnostic::value_error("x".into()).is(ErrorKind::Type));
    }

    #[test]
    fn test_outermost_call_wins() {
        let d = Diagnostic::type_error("bad".into())
            .at_call("cast(i32, f32)".into())
            .at_call("atomic_add(*i32, f32)".into());
        assert_eq!(d.call.as_deref(), Some("atomic_add(*i32, f32)"));
        assert_eq!(d.notes, vec!["raised by `cast(i32, f32)`".to_string()]);
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::shape_error("incompatible".into())
            .with_note("lhs [4, 8]".into())
            .with_help("insert expand_dims".into())
            .with_note("rhs [3]".into());
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.help.as_deref(), Some("insert expand_dims"));
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::value_error("axis 3 out of range".into()).at_call("sum(f32[4])".into());
        assert_eq!(
            d.to_string(),
            "value error: axis 3 out of range (in `sum(f32[4])`)"
        );
    }

    #[test]
    fn test_render_does_not_panic() {
        let d = Diagnostic::type_error("atomic_max does not support f16".into())
            .at_call("atomic_max(*f16, f16)".into())
            .with_note("f16 is only supported by atomic_add".into());
        d.render("kernel");
        Diagnostic::value_error("no call attached".into()).render("kernel");
    }
}
