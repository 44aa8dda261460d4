//! Non-fatal diagnostics emitted while transforming programs.
//!
//! Transforms report through a [`DiagnosticSink`] instead of failing: the
//! program stays usable, but the caller learns that e.g. a volatile
//! repetition count lost its meaning. [`DiagnosticBuffer`] is the standard
//! sink; it records diagnostics in order and mirrors them to the log.

use std::fmt;

#[cfg(test)]
use mockall::automock;

/// The transform that touched a volatile repetition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatileOperation {
    Unroll,
    UnrollChildren,
    Split,
    MakeCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// Cleanup removed a node that carried measurements but no waveform.
    DroppedMeasurement { dropped: usize },
    /// A transform modified a loop whose repetition count is volatile; the
    /// parameter may no longer be changeable afterwards.
    VolatileModification(VolatileOperation),
    /// Waveforms must be concatenated to satisfy the device constraints.
    MakeCompatible,
}

#[cfg_attr(test, automock)]
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

/// Sink that keeps diagnostics in emission order and logs each one.
#[derive(Debug, Default)]
pub struct DiagnosticBuffer {
    diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DroppedMeasurement { dropped } => {
                write!(f, "dropping {dropped} measurement window(s) with no waveform attached")
            }
            Self::VolatileModification(operation) => {
                let action = match operation {
                    VolatileOperation::Unroll => "unrolling a loop",
                    VolatileOperation::UnrollChildren => "unrolling the children of a loop",
                    VolatileOperation::Split => "splitting a child",
                    VolatileOperation::MakeCompatible => "the compatibility rewrite of a loop",
                };
                write!(f, "{action} with volatile repetition count")
            }
            Self::MakeCompatible => write!(
                f,
                "waveforms will be concatenated to satisfy the device constraints; \
                 this may be slow"
            ),
        }
    }
}

impl DiagnosticBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

impl DiagnosticSink for DiagnosticBuffer {
    fn emit(&mut self, diagnostic: Diagnostic) {
        log::warn!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_keeps_emission_order() {
        let mut buffer = DiagnosticBuffer::new();
        buffer.emit(Diagnostic::MakeCompatible);
        buffer.emit(Diagnostic::DroppedMeasurement { dropped: 2 });
        assert_eq!(
            buffer.diagnostics(),
            &[
                Diagnostic::MakeCompatible,
                Diagnostic::DroppedMeasurement { dropped: 2 },
            ]
        );
        assert_eq!(buffer.take().len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn messages_name_the_operation() {
        let d = Diagnostic::VolatileModification(VolatileOperation::Split);
        assert_eq!(
            d.to_string(),
            "splitting a child with volatile repetition count"
        );
    }
}
