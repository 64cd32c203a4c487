/* 📖 # Why a thread per request on top of tiny_http?

Analysis handlers block until a pool worker has produced the engine's answer, which
can take seconds. tiny_http only hands out requests; it does not run them. If the
acceptor called the service inline, one slow analysis would stall every other
client, including `/ping`. So the acceptor thread does nothing but receive and spawn,
and CPU usage is capped by the worker pool behind the service, not here.
*/

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::http::{
    HttpMethod, HttpRequest, HttpResponse, HttpServerConfig, HttpService, HttpStatusCode,
    UNKNOWN_ERROR_MESSAGE,
};
use crate::{RabbitError, RabbitResult, ResultExt};

/// How often the acceptor checks for shutdown while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a running HTTP server.
///
/// Dropping the handle signals shutdown but does not wait for the acceptor;
/// call [`HttpServerHandle::join`] for that.
#[derive(Debug)]
pub struct HttpServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: Mutex<Option<JoinHandle<RabbitResult<()>>>>,
}

impl HttpServerHandle {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting new connections. Requests already dispatched run to completion.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block until the acceptor thread has exited.
    ///
    /// Returns an error if the acceptor stopped because it failed rather than
    /// because [`HttpServerHandle::shutdown`] was called. Only the first call
    /// observes the outcome; later calls return `Ok`.
    pub fn join(&self) -> RabbitResult<()> {
        let acceptor = self
            .acceptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match acceptor {
            Some(acceptor) => acceptor_outcome(acceptor.join()),
            None => Ok(()),
        }
    }
}

impl Drop for HttpServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind the configured address and start serving `service`.
///
/// Returns once the socket is bound; requests are handled on background threads.
pub fn start_http_server(
    service: Arc<dyn HttpService>,
    config: &HttpServerConfig,
) -> RabbitResult<HttpServerHandle> {
    let address = config.address();
    let server = tiny_http::Server::http(&address).map_err(|e| {
        Box::new(RabbitError::message(e.to_string()).context(format!("binding {}", address)))
    })?;
    let local_addr = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| crate::err!("Server bound to a non-IP address: {}", address))?;
    info!(address = %local_addr, "HTTP server listening");

    let shutdown = Arc::new(AtomicBool::new(false));
    let server_name = Arc::<str>::from(config.server_name.as_str());
    let acceptor = {
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("rabbit-http-acceptor".to_string())
            .spawn(move || accept_loop(server, service, server_name, shutdown))
            .context("spawning HTTP acceptor thread")?
    };

    Ok(HttpServerHandle {
        local_addr,
        shutdown,
        acceptor: Mutex::new(Some(acceptor)),
    })
}

fn acceptor_outcome(joined: thread::Result<RabbitResult<()>>) -> RabbitResult<()> {
    match joined {
        Ok(outcome) => outcome.context("HTTP acceptor stopped"),
        Err(_) => Err(crate::err!("HTTP acceptor thread panicked")),
    }
}

fn accept_loop(
    server: tiny_http::Server,
    service: Arc<dyn HttpService>,
    server_name: Arc<str>,
    shutdown: Arc<AtomicBool>,
) -> RabbitResult<()> {
    while !shutdown.load(Ordering::SeqCst) {
        let request = match server.recv_timeout(ACCEPT_POLL_INTERVAL) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "failed to receive HTTP request, stopping acceptor");
                return Err::<(), _>(e).context("receiving HTTP requests");
            }
        };
        let service = service.clone();
        let server_name = server_name.clone();
        let spawned = thread::Builder::new()
            .name("rabbit-http-handler".to_string())
            .spawn(move || dispatch(service.as_ref(), &server_name, request));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn HTTP handler thread");
        }
    }
    info!("HTTP server stopped accepting connections");
    Ok(())
}

fn dispatch(service: &dyn HttpService, server_name: &str, raw: tiny_http::Request) {
    let started = Instant::now();
    let url = raw.url().to_string();

    // Services only look at the method and the request target; the body is never read.
    let response = match HttpMethod::parse(raw.method().as_str()) {
        Some(method) => match service.handle_request(HttpRequest::new(method, url.as_str())) {
            Ok(response) => response,
            Err(e) => {
                error!(url = %url, error = ?e, "service failed to handle request");
                HttpResponse::internal_error().with_body(UNKNOWN_ERROR_MESSAGE)
            }
        },
        None => HttpResponse::new(HttpStatusCode::MethodNotAllowed)
            .with_body(HttpStatusCode::MethodNotAllowed.reason_phrase()),
    };

    let status = response.status().as_u16();
    if let Err(e) = raw.respond(to_tiny_response(response, server_name)) {
        // The client went away; the work has been done and its result is dropped.
        debug!(url = %url, error = %e, "failed to send HTTP response");
    }
    debug!(url = %url, status, elapsed = ?started.elapsed(), "request completed");
}

fn to_tiny_response(response: HttpResponse, server_name: &str) -> tiny_http::Response<Cursor<Vec<u8>>> {
    let status = tiny_http::StatusCode(response.status().as_u16());
    let headers: Vec<tiny_http::Header> =
        tiny_http::Header::from_bytes(&b"Server"[..], server_name.as_bytes())
            .into_iter()
            .collect();
    let body = response.into_body().into_bytes();
    let length = body.len();
    tiny_http::Response::new(status, headers, Cursor::new(body), Some(length), None)
}
