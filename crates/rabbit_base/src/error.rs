use std::error::Error as StdError;
use std::fmt;

use tracing_error::{SpanTrace, SpanTraceStatus};

/* 📖 # Why one error type for parameter, pool and engine failures?

Every failure a request can run into ends up at the same place: the HTTP handler
boundary, which has to pick a status code and a body. Carrying them all as
variants of one ErrorKind lets that boundary be a single match, while the code
that raises an error only has to name what went wrong (which field, which
reason) and return it with `?`.
*/

/// Error variants that can occur while serving an analysis request.
#[derive(Debug)]
pub enum ErrorKind {
    /// A query parameter without a default was not supplied.
    MissingParameter { field: &'static str },

    /// An integer parameter could not be parsed as a decimal number.
    MalformedInteger { field: &'static str, value: String },

    /// A parameter was parsed but violates its constraint.
    ConstraintViolation { field: &'static str, reason: String },

    /// The worker pool is shutting down and accepts no more work.
    PoolStopped,

    /// The worker pool queue is at its configured capacity.
    QueueFull,

    /// The engine reported a failure or a work item panicked.
    EngineFailure { message: String },

    /// Socket or process I/O failed.
    Io { source: std::io::Error },

    /// Catch-all for other errors with a message
    Message { message: String },
}

impl ErrorKind {
    /// Returns true for failures caused by the request itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::MissingParameter { .. }
                | ErrorKind::MalformedInteger { .. }
                | ErrorKind::ConstraintViolation { .. }
        )
    }

    /// Name of the offending query parameter, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ErrorKind::MissingParameter { field }
            | ErrorKind::MalformedInteger { field, .. }
            | ErrorKind::ConstraintViolation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MissingParameter { field } => {
                write!(f, "Missing required parameter: {}", field)
            }
            ErrorKind::MalformedInteger { field, value } => {
                write!(f, "Invalid integer for parameter {}: '{}'", field, value)
            }
            ErrorKind::ConstraintViolation { reason, .. } => write!(f, "{}", reason),
            ErrorKind::PoolStopped => write!(f, "Worker pool has been stopped"),
            ErrorKind::QueueFull => write!(f, "Worker pool queue is full"),
            ErrorKind::EngineFailure { message } => write!(f, "Engine failure: {}", message),
            ErrorKind::Io { source } => write!(f, "I/O error: {}", source),
            ErrorKind::Message { message } => write!(f, "{}", message),
        }
    }
}

/// Error wrapping an ErrorKind with context, an optional cause and the span
/// trace active when it was created.
pub struct RabbitError {
    kind: ErrorKind,
    context: Vec<String>,
    cause: Option<Box<RabbitError>>,
    span_trace: SpanTrace,
}

impl RabbitError {
    /// Creates a new error from an ErrorKind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: vec![],
            cause: None,
            span_trace: SpanTrace::capture(),
        }
    }

    /// Creates a catch-all error from a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Message {
            message: message.into(),
        })
    }

    /// Attaches context to an error.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Attaches context using lazy evaluation.
    pub fn with_context<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.context.push(f());
        self
    }

    /// Records the error that led to this one.
    pub fn caused_by(mut self, cause: impl Into<Box<RabbitError>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Returns a reference to the underlying ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn get_context(&self) -> &[String] {
        &self.context
    }

    pub fn cause(&self) -> Option<&RabbitError> {
        self.cause.as_deref()
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: &str) -> fmt::Result {
        let item_count = self.context.len() + usize::from(self.cause.is_some());
        for (index, context) in self.context.iter().enumerate() {
            let branch = if index + 1 == item_count { "└─" } else { "├─" };
            writeln!(f, "{}{} {}", indent, branch, context)?;
        }
        if let Some(cause) = &self.cause {
            writeln!(f, "{}└─ cause: {}", indent, cause.kind)?;
            cause.fmt_tree(f, &format!("{}   ", indent))?;
        }
        Ok(())
    }
}

impl From<ErrorKind> for RabbitError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<ErrorKind> for Box<RabbitError> {
    fn from(kind: ErrorKind) -> Self {
        Box::new(RabbitError::new(kind))
    }
}

impl StdError for RabbitError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        if let Some(cause) = &self.cause {
            return Some(cause.as_ref());
        }
        match &self.kind {
            ErrorKind::Io { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for RabbitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ctx in &self.context {
            write!(f, "{}: ", ctx)?;
        }
        write!(f, "{}", self.kind)
    }
}

impl fmt::Debug for RabbitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;
        self.fmt_tree(f, "")?;
        if self.span_trace.status() == SpanTraceStatus::CAPTURED {
            writeln!(f, "Trace: {}", self.span_trace)?;
        }
        Ok(())
    }
}

/// Standard result type, boxed to keep the Ok path small.
pub type RabbitResult<T> = std::result::Result<T, Box<RabbitError>>;

/// Extension trait for attaching context to Results.
pub trait ResultExt<T> {
    /// Attaches context to an error, consuming and re-wrapping it.
    fn context(self, context: impl Into<String>) -> RabbitResult<T>;

    /// Attaches context using lazy evaluation.
    fn with_context<F>(self, f: F) -> RabbitResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for RabbitResult<T> {
    fn context(self, context: impl Into<String>) -> RabbitResult<T> {
        self.map_err(|err| Box::new(err.context(context)))
    }

    fn with_context<F>(self, f: F) -> RabbitResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| Box::new(err.with_context(f)))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> RabbitResult<T> {
        self.map_err(|source| Box::new(RabbitError::new(ErrorKind::Io { source }).context(context)))
    }

    fn with_context<F>(self, f: F) -> RabbitResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Box::new(RabbitError::new(ErrorKind::Io { source }).with_context(f)))
    }
}

/// Creates a boxed message error from a format string.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        Box::new($crate::RabbitError::message(format!($($arg)*)))
    };
}
