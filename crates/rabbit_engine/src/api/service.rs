/* 📖 # Why is error_response the only place that picks a status code?

Every failure on the request path is a RabbitError, and its ErrorKind already says
whose fault it is. Validation kinds are the client's: their message is safe and
useful, so it goes back verbatim with a 400. A full queue is a temporary condition
and gets a 503. Everything else (engine failures, panics, a stopped pool) is ours:
the details go to the log and the client only sees the fixed unknown-error body.
Keeping that mapping in one function means a new error kind cannot leak by accident
from some other handler.
*/

use std::sync::Arc;
use std::time::Instant;

use rabbit_base::http::{
    HttpMethod, HttpRequest, HttpResponse, HttpService, HttpStatusCode, QueryParams,
    UNKNOWN_ERROR_MESSAGE,
};
use rabbit_base::{ErrorKind, RabbitError, RabbitResult};
use tracing::{debug, error, warn};

use crate::engine::{EngineHandle, Operation};
use crate::params;
use crate::pool::WorkerPool;
use crate::request;

pub const PING_PATH: &str = "/ping";

/// HTTP service running analyses on the worker pool.
#[derive(Clone)]
pub struct AnalysisService {
    pool: Arc<WorkerPool>,
    engine: EngineHandle,
}

impl AnalysisService {
    pub fn new(pool: Arc<WorkerPool>, engine: EngineHandle) -> Self {
        Self { pool, engine }
    }

    /// Validate `query`, run `operation` on a pool worker and wait for the engine's answer.
    ///
    /// Invalid parameters fail before anything is submitted to the pool.
    pub fn analyze(&self, operation: Operation, query: &QueryParams) -> RabbitResult<String> {
        let record = params::validate(query, operation.requires_second_board())?;
        let request = request::serialize(&record);
        debug!(%operation, request = %request, "submitting analysis");

        let started = Instant::now();
        let engine = self.engine.clone();
        let handle = self
            .pool
            .submit(move || engine.evaluate(operation, &request))?;
        let response = handle.wait()??;
        debug!(%operation, elapsed = ?started.elapsed(), response_len = response.len(), "analysis finished");
        Ok(response)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("pool", &self.pool)
            .finish()
    }
}

impl HttpService for AnalysisService {
    fn handle_request(&self, request: HttpRequest) -> RabbitResult<HttpResponse> {
        let path = request.path();
        let operation = Operation::from_path(path);
        if operation.is_none() && path != PING_PATH {
            debug!(path, "unknown path");
            return Ok(HttpResponse::not_found().with_body(HttpStatusCode::NotFound.reason_phrase()));
        }
        if request.method() != &HttpMethod::Get {
            debug!(path, method = %request.method(), "method not allowed");
            return Ok(HttpResponse::new(HttpStatusCode::MethodNotAllowed)
                .with_body(HttpStatusCode::MethodNotAllowed.reason_phrase()));
        }

        let Some(operation) = operation else {
            return Ok(HttpResponse::ok().with_body("pong"));
        };
        let response = match self.analyze(operation, &request.query_params()) {
            Ok(body) => HttpResponse::ok().with_body(body),
            Err(e) => error_response(&e),
        };
        Ok(response)
    }
}

/// Map a failed analysis to the response the client sees.
pub fn error_response(error: &RabbitError) -> HttpResponse {
    match error.kind() {
        kind if kind.is_client_error() => {
            debug!(field = ?kind.field(), error = %error, "rejected request");
            HttpResponse::bad_request().with_body(error.to_string())
        }
        ErrorKind::QueueFull => {
            warn!("rejecting request, worker pool queue is full");
            HttpResponse::new(HttpStatusCode::ServiceUnavailable).with_body(error.to_string())
        }
        _ => {
            error!(error = ?error, "analysis failed");
            HttpResponse::internal_error().with_body(UNKNOWN_ERROR_MESSAGE)
        }
    }
}
