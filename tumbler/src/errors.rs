//! Error types for tumbler.
//!
//! Parse and validation errors are raised before anything runs. Unit
//! execution errors and cancellations are raised by the engine while the stage
//! tree is being walked.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for tumbler operations.
#[derive(Debug, Clone, Error)]
pub enum TumblerError {
    /// The pipeline source could not be parsed.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// The parsed pipeline violates a structural rule.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A unit of work exhausted its attempts or hit its timeout.
    #[error("{0}")]
    UnitExecution(#[from] UnitExecutionError),

    /// A stage observed cancellation before completing.
    #[error("Stage '{stage}' cancelled: {reason}")]
    Cancelled {
        /// The stage that observed the cancellation.
        stage: String,
        /// The reason carried by the cancelled scope.
        reason: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error (panicked branch, lost task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TumblerError {
    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error only reports an observed cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns a short machine-friendly name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::UnitExecution(_) => "unit_execution",
            Self::Cancelled { .. } => "cancelled",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

/// What went wrong while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A token other than the expected one was found.
    UnexpectedToken {
        /// Description of what the grammar expected.
        expected: String,
        /// Description of the token actually found.
        found: String,
    },
    /// The input ended while more tokens were expected.
    UnexpectedEof {
        /// Description of what the grammar expected.
        expected: String,
    },
    /// A quoted string was never closed.
    UnterminatedString,
    /// A block comment was never closed.
    UnterminatedComment,
    /// A character that cannot start any token.
    InvalidCharacter(char),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedToken { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Self::UnexpectedEof { expected } => {
                write!(f, "expected {expected}, found end of input")
            }
            Self::UnterminatedString => write!(f, "unterminated quoted string"),
            Self::UnterminatedComment => write!(f, "unterminated block comment"),
            Self::InvalidCharacter(c) => write!(f, "invalid character {c:?}"),
        }
    }
}

/// Error raised when pipeline source is malformed.
///
/// Positions are 1-based and point at the start of the offending token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    /// What went wrong.
    pub kind: ParseErrorKind,
    /// Line of the offending token.
    pub line: usize,
    /// Column of the offending token.
    pub column: usize,
}

impl ParseError {
    /// Creates a new parse error.
    #[must_use]
    pub fn new(kind: ParseErrorKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}

/// Error raised when a parsed pipeline breaks a structural rule.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Adds a single stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stages.push(stage.into());
        self
    }
}

/// Why a unit of work gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitFailure {
    /// The last attempt exceeded the hard attempt timeout.
    TimedOut(Duration),
    /// The last attempt failed with this message.
    Failed(String),
    /// The backend reported an error that retrying cannot fix.
    NotRetryable(String),
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(limit) => write!(f, "attempt timed out after {}s", limit.as_secs()),
            Self::Failed(message) => write!(f, "{message}"),
            Self::NotRetryable(message) => write!(f, "{message} (not retryable)"),
        }
    }
}

/// Terminal error of a unit of work, after all retries.
#[derive(Debug, Clone, Error)]
#[error("Unit '{unit}' failed after {attempts} attempt(s): {failure}")]
pub struct UnitExecutionError {
    /// The unit (stage) name.
    pub unit: String,
    /// Number of attempts made.
    pub attempts: usize,
    /// The failure of the last attempt.
    pub failure: UnitFailure,
}

impl UnitExecutionError {
    /// Creates a new unit execution error.
    #[must_use]
    pub fn new(unit: impl Into<String>, attempts: usize, failure: UnitFailure) -> Self {
        Self {
            unit: unit.into(),
            attempts,
            failure,
        }
    }

    /// Returns true if the unit gave up because of the attempt timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, UnitFailure::TimedOut(_))
    }
}

/// Errors reported by an execution backend for a single attempt.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// A command exited unsuccessfully.
    #[error("Command '{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        /// The rendered command text.
        command: String,
        /// Process exit code (-1 when killed by a signal).
        exit_code: i32,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// No step handler is registered for a keyword step.
    #[error("No handler registered for step '{name}'")]
    UnknownCommand {
        /// The step command name.
        name: String,
    },

    /// A keyword step is missing a required parameter.
    #[error("Step '{name}' requires parameter '{parameter}'")]
    MissingParameter {
        /// The step command name.
        name: String,
        /// The missing parameter key.
        parameter: String,
    },

    /// A process could not be spawned.
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The OS error message.
        reason: String,
    },

    /// A container lifecycle operation failed.
    #[error("Container {operation} failed for '{image}': {reason}")]
    Container {
        /// The lifecycle operation (pull, create, start, exec, stop).
        operation: String,
        /// The image involved.
        image: String,
        /// The failure message.
        reason: String,
    },
}

impl BackendError {
    /// Returns true if retrying the same unit might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CommandFailed { .. } | Self::Spawn { .. } | Self::Container { .. } => true,
            Self::UnknownCommand { .. } | Self::MissingParameter { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(
            ParseErrorKind::UnexpectedToken {
                expected: "'{'".to_string(),
                found: "identifier 'stages'".to_string(),
            },
            3,
            7,
        );

        assert_eq!(
            err.to_string(),
            "Parse error at line 3, column 7: expected '{', found identifier 'stages'"
        );
    }

    #[test]
    fn test_unit_execution_error_display() {
        let err = UnitExecutionError::new(
            "Example Build",
            3,
            UnitFailure::TimedOut(Duration::from_secs(300)),
        );

        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Unit 'Example Build' failed after 3 attempt(s): attempt timed out after 300s"
        );
    }

    #[test]
    fn test_cancellation_is_distinguished() {
        let cancelled = TumblerError::cancelled("Branch B", "Branch A failed");
        let failed: TumblerError =
            UnitExecutionError::new("Branch A", 1, UnitFailure::Failed("boom".into())).into();

        assert!(cancelled.is_cancellation());
        assert!(!failed.is_cancellation());
        assert_eq!(cancelled.kind(), "cancelled");
        assert_eq!(failed.kind(), "unit_execution");
    }

    #[test]
    fn test_validation_error_stages() {
        let err = PipelineValidationError::new("Duplicate stage name")
            .with_stage("Build")
            .with_stage("Build");

        assert_eq!(err.stages.len(), 2);
        assert_eq!(err.to_string(), "Duplicate stage name");
    }

    #[test]
    fn test_backend_error_retryable() {
        assert!(BackendError::CommandFailed {
            command: "false".into(),
            exit_code: 1,
            stderr: String::new(),
        }
        .is_retryable());
        assert!(!BackendError::UnknownCommand { name: "deploy".into() }.is_retryable());
    }
}
