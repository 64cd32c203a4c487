/* 📖 # Why is the engine behind a trait?

The move search itself lives outside this crate. All the request layer needs from it
is "given an operation and a canonical request string, produce a response string",
and it needs that call to be safe from several pool workers at once. The Engine trait
captures exactly that, so the service can run against the real engine executable in
production and against plain closures in tests.
*/

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use rabbit_base::{ErrorKind, RabbitError, RabbitResult, ResultExt};
use tracing::{debug, instrument};

/// The analyses the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Rank candidate placements for the current piece.
    GetTopMovesHybrid,
    /// Rate the transition from `board` to `secondBoard`.
    RateMove,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::GetTopMovesHybrid, Operation::RateMove];

    /// The tag the engine uses to select the analysis.
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::GetTopMovesHybrid => "GET_TOP_MOVES_HYBRID",
            Operation::RateMove => "RATE_MOVE",
        }
    }

    /// The HTTP path serving this operation.
    pub fn path(&self) -> &'static str {
        match self {
            Operation::GetTopMovesHybrid => "/top-moves-hybrid",
            Operation::RateMove => "/rate-move",
        }
    }

    pub fn requires_second_board(&self) -> bool {
        matches!(self, Operation::RateMove)
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|operation| operation.path() == path)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The move-analysis engine.
///
/// Implementations are called concurrently from every pool worker and must be
/// reentrant.
pub trait Engine: Send + Sync + 'static {
    /// Run `operation` on a canonical request string and return the response body.
    fn evaluate(&self, operation: Operation, request: &str) -> RabbitResult<String>;
}

impl<F> Engine for F
where
    F: Fn(Operation, &str) -> RabbitResult<String> + Send + Sync + 'static,
{
    fn evaluate(&self, operation: Operation, request: &str) -> RabbitResult<String> {
        self(operation, request)
    }
}

/// Shared handle to an engine implementation.
#[derive(Clone)]
pub struct EngineHandle(Arc<dyn Engine>);

impl EngineHandle {
    pub fn new(engine: impl Engine) -> Self {
        Self(Arc::new(engine))
    }
}

impl std::ops::Deref for EngineHandle {
    type Target = dyn Engine;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

/// Engine backed by an external executable, started once per evaluation.
///
/// The executable receives the operation tag as its last argument and the
/// canonical request string on stdin. Whatever it prints to stdout is the
/// response body; a non-zero exit status is an engine failure.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    /// Arguments passed before the operation tag.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl Engine for ProcessEngine {
    #[instrument(skip(self, request), fields(program = %self.program.display()))]
    fn evaluate(&self, operation: Operation, request: &str) -> RabbitResult<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(operation.tag())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning engine process")
            .map_err(|e| {
                Box::new(
                    RabbitError::new(ErrorKind::EngineFailure {
                        message: format!("could not start {}", self.program.display()),
                    })
                    .caused_by(e),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(request.as_bytes()) {
                // An engine that exits without reading its input is judged by its exit status.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("engine closed stdin before reading the request");
                }
                result => result.context("writing request to engine")?,
            }
        }
        let output = child
            .wait_with_output()
            .context("waiting for engine process")?;
        debug!(status = %output.status, stdout_len = output.stdout.len(), "engine process finished");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Box::new(
                RabbitError::new(ErrorKind::EngineFailure {
                    message: format!("{} exited with {}", self.program.display(), output.status),
                })
                .context(format!("stderr: {}", stderr.trim())),
            ));
        }

        String::from_utf8(output.stdout).map_err(|_| {
            Box::new(RabbitError::new(ErrorKind::EngineFailure {
                message: "engine produced non UTF-8 output".to_string(),
            }))
        })
    }
}
