//! End-to-end tests: the analysis service behind the real HTTP server, driven over TCP.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rabbit_base::RabbitResult;
use rabbit_base::http::{HttpServerConfig, UNKNOWN_ERROR_MESSAGE};
use rabbit_base::server::{HttpServerHandle, start_http_server};
use rabbit_base::testing::http_get;
use rabbit_engine::params::BOARD_CELLS;
use rabbit_engine::{AnalysisService, EngineHandle, Operation, PoolConfig, WorkerPool};

fn board(fill: char) -> String {
    std::iter::repeat_n(fill, BOARD_CELLS).collect()
}

fn start(workers: usize, engine: EngineHandle) -> (HttpServerHandle, Arc<WorkerPool>) {
    let pool = Arc::new(WorkerPool::new(PoolConfig::new(workers)).unwrap());
    let service = AnalysisService::new(pool.clone(), engine);
    let handle = start_http_server(Arc::new(service), &HttpServerConfig::default()).unwrap();
    (handle, pool)
}

fn echo_engine() -> EngineHandle {
    EngineHandle::new(|operation: Operation, request: &str| -> RabbitResult<String> {
        Ok(format!("{} {}", operation.tag(), request))
    })
}

fn get(handle: &HttpServerHandle, target: &str) -> (u16, String) {
    http_get(handle.local_addr(), target).unwrap()
}

fn stop(handle: HttpServerHandle, pool: Arc<WorkerPool>) {
    handle.shutdown();
    handle.join().unwrap();
    pool.shutdown();
}

#[test]
fn ping_answers_pong() {
    let (handle, pool) = start(1, echo_engine());
    assert_eq!(get(&handle, "/ping"), (200, "pong".to_string()));
    stop(handle, pool);
}

#[test]
fn validation_errors_are_bad_requests() {
    let (handle, pool) = start(1, echo_engine());

    let short = &board('0')[..199];
    let (status, body) = get(&handle, &format!("/top-moves-hybrid?board={}", short));
    assert_eq!(status, 400);
    assert!(body.contains("200 characters long"), "{}", body);

    let (status, body) = get(
        &handle,
        &format!("/top-moves-hybrid?board={}&currentPiece=7", board('0')),
    );
    assert_eq!(status, 400);
    assert!(body.contains("between -1 and 6"), "{}", body);

    let (status, body) = get(&handle, &format!("/rate-move?board={}", board('0')));
    assert_eq!(status, 400);
    assert!(body.contains("secondBoard"), "{}", body);

    let (status, body) = get(
        &handle,
        &format!("/top-moves-hybrid?board={}&level=eighteen", board('0')),
    );
    assert_eq!(status, 400);
    assert_eq!(body, "Invalid integer for parameter level: 'eighteen'");

    stop(handle, pool);
}

#[test]
fn url_encoded_parameters_are_decoded() {
    let (handle, pool) = start(1, echo_engine());
    let (status, body) = get(
        &handle,
        &format!(
            "/top-moves-hybrid?board={}&inputFrameTimeline=X%2E%2E&nextPiece=%2D1&lines=%31%30",
            board('1')
        ),
    );
    assert_eq!(status, 200);
    assert_eq!(
        body,
        format!("GET_TOP_MOVES_HYBRID {}|18|10|-1|-1|X..|343|3|25|", board('1'))
    );
    stop(handle, pool);
}

#[test]
fn engine_response_is_returned_verbatim() {
    let (handle, pool) = start(2, echo_engine());
    let (status, body) = get(&handle, &format!("/top-moves-hybrid?board={}", board('0')));
    assert_eq!(status, 200);
    assert_eq!(
        body,
        format!("GET_TOP_MOVES_HYBRID {}|18|0|-1|-1|X.|343|3|25|", board('0'))
    );
    stop(handle, pool);
}

#[test]
fn engine_failure_is_generic_server_error() {
    let engine = EngineHandle::new(|_: Operation, _: &str| -> RabbitResult<String> {
        Err(rabbit_base::err!("internal evaluator state"))
    });
    let (handle, pool) = start(1, engine);
    let (status, body) = get(&handle, &format!("/rate-move?board={0}&secondBoard={0}", board('0')));
    assert_eq!(status, 500);
    assert_eq!(body, UNKNOWN_ERROR_MESSAGE);
    stop(handle, pool);
}

#[test]
fn concurrent_requests_are_capped_at_pool_size() {
    const WORKERS: usize = 2;
    const REQUESTS: usize = 4 * WORKERS;
    const DELAY: Duration = Duration::from_millis(200);

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let engine = {
        let (running, peak) = (running.clone(), peak.clone());
        EngineHandle::new(move |_: Operation, request: &str| -> RabbitResult<String> {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(DELAY);
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("lines={}", request.split('|').nth(2).unwrap_or_default()))
        })
    };
    let (handle, pool) = start(WORKERS, engine);
    let handle = Arc::new(handle);

    let started = Instant::now();
    let clients: Vec<_> = (0..REQUESTS)
        .map(|i| {
            let handle = handle.clone();
            thread::spawn(move || {
                get(
                    &handle,
                    &format!("/top-moves-hybrid?board={}&lines={}", board('0'), i),
                )
            })
        })
        .collect();
    let responses: Vec<(u16, String)> = clients.into_iter().map(|c| c.join().unwrap()).collect();
    let elapsed = started.elapsed();

    for (i, response) in responses.iter().enumerate() {
        assert_eq!(*response, (200, format!("lines={}", i)));
    }
    // Both workers were busy at the same time, and never more than that.
    assert_eq!(peak.load(Ordering::SeqCst), WORKERS);
    // Four rounds on two workers; a serial pool would need one round per request.
    assert!(elapsed >= 4 * DELAY - Duration::from_millis(20), "{:?}", elapsed);
    assert!(elapsed < REQUESTS as u32 * DELAY, "{:?}", elapsed);
    assert_eq!(pool.queued(), 0);

    handle.shutdown();
    handle.join().unwrap();
    pool.shutdown();
}
