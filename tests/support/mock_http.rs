use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Scripted behaviour of the mock `/posts/{id}` endpoint.
#[derive(Clone, Default)]
pub struct MockPosts {
    statuses: HashMap<u64, u16>,
    malformed: HashSet<u64>,
    non_objects: HashSet<u64>,
    stalls: HashMap<u64, usize>,
    stall_for: Option<Duration>,
    latency: Option<Duration>,
}

impl MockPosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `id` with `status` and a body that is not valid JSON.
    pub fn with_status(mut self, id: u64, status: u16) -> Self {
        self.statuses.insert(id, status);
        self
    }

    pub fn with_malformed_body(mut self, id: u64) -> Self {
        self.malformed.insert(id);
        self
    }

    /// Answers `id` with valid JSON that is not an object.
    pub fn with_array_body(mut self, id: u64) -> Self {
        self.non_objects.insert(id);
        self
    }

    /// The first `attempts` requests for `id` sleep for the stall duration
    /// before answering.
    pub fn with_stalled_attempts(mut self, id: u64, attempts: usize) -> Self {
        self.stalls.insert(id, attempts);
        self
    }

    pub fn with_stall_duration(mut self, duration: Duration) -> Self {
        self.stall_for = Some(duration);
        self
    }

    /// Delay applied to every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[derive(Default)]
struct RequestLog {
    by_id: Mutex<HashMap<u64, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RequestLog {
    fn record(&self, id: u64) -> usize {
        let mut by_id = self.by_id.lock().expect("request log poisoned");
        let count = by_id.entry(id).or_insert(0);
        *count += 1;
        *count
    }
}

struct ActiveRequest<'a>(&'a RequestLog);

impl<'a> ActiveRequest<'a> {
    fn enter(log: &'a RequestLog) -> Self {
        let active = log.active.fetch_add(1, Ordering::SeqCst) + 1;
        log.peak.fetch_max(active, Ordering::SeqCst);
        Self(log)
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockHttpServer {
    base_url: String,
    log: Arc<RequestLog>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockHttpServer {
    pub async fn start(posts: MockPosts) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock HTTP listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let posts = Arc::new(posts);
        let log = Arc::new(RequestLog::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let service_log = log.clone();
        let make_service = make_service_fn(move |_| {
            let posts = posts.clone();
            let log = service_log.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    serve_request(posts.clone(), log.clone(), req)
                }))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock HTTP server stopped: {err}");
            }
        });

        Ok(Self {
            base_url: format!("http://{addr}/posts/"),
            log,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Base URL ending in `/posts/`; item ids are appended verbatim.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests_for(&self, id: u64) -> usize {
        self.log
            .by_id
            .lock()
            .expect("request log poisoned")
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.log
            .by_id
            .lock()
            .expect("request log poisoned")
            .values()
            .sum()
    }

    /// Highest number of requests the server was handling at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.log.peak.load(Ordering::SeqCst)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

async fn serve_request(
    posts: Arc<MockPosts>,
    log: Arc<RequestLog>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method"));
    }

    let id = match req
        .uri()
        .path()
        .strip_prefix("/posts/")
        .and_then(|raw| raw.parse::<u64>().ok())
    {
        Some(id) => id,
        None => return Ok(respond(StatusCode::NOT_FOUND, "{}")),
    };

    let _active = ActiveRequest::enter(&log);
    let attempt = log.record(id);

    if let Some(latency) = posts.latency {
        sleep(latency).await;
    }
    if attempt <= posts.stalls.get(&id).copied().unwrap_or(0) {
        sleep(posts.stall_for.unwrap_or(Duration::from_secs(2))).await;
    }

    if let Some(status) = posts.statuses.get(&id) {
        let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Ok(respond(status, "<html>not json</html>"));
    }
    if posts.malformed.contains(&id) {
        return Ok(json_response(format!("{{\"id\": {id}, \"title\": ")));
    }
    if posts.non_objects.contains(&id) {
        return Ok(json_response(json!([id, "not an object"]).to_string()));
    }

    Ok(json_response(post_body(id).to_string()))
}

pub fn post_body(id: u64) -> serde_json::Value {
    json!({
        "userId": id.saturating_sub(1) / 10 + 1,
        "id": id,
        "title": format!("post {id}"),
        "body": format!("body of post {id}"),
    })
}

fn json_response(body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn respond(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}
