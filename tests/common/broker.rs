//! In-process fake of the ingress adapter and the event stream.
//!
//! - `POST /event/:topic` appends the body to the log and answers 201, or a
//!   configured failure status for the next N attempts.
//! - `GET /eventstream/:topic` serves the next scripted session if one is
//!   queued. Otherwise it replays the log after `Last-Event-ID` and then
//!   follows it live, ending every event with a blank line.
//!
//! Event ids are 1-based positions in the log.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::{future, stream, Stream, StreamExt};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// One recorded POST attempt.
#[derive(Debug, Clone)]
pub struct Post {
    pub topic: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// One recorded subscribe request.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: String,
    pub headers: HeaderMap,
}

impl Subscription {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Scripted response body for one subscribe request.
struct Session {
    chunks: Vec<Vec<u8>>,
    /// Keep the connection open after the last chunk.
    hold_open: bool,
}

pub struct FakeBroker {
    pub base_uri: String,
    posts: Mutex<Vec<Post>>,
    log: Mutex<Vec<String>>,
    live: broadcast::Sender<(usize, String)>,
    post_failures: AtomicUsize,
    post_failure_status: AtomicU16,
    subscribe_failures: AtomicUsize,
    sessions: Mutex<VecDeque<Session>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl FakeBroker {
    /// Bind an ephemeral port and serve until the test runtime ends.
    pub async fn start() -> Arc<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (live, _) = broadcast::channel(1024);

        let broker = Arc::new(Self {
            base_uri: format!("http://{}", addr),
            posts: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            live,
            post_failures: AtomicUsize::new(0),
            post_failure_status: AtomicU16::new(503),
            subscribe_failures: AtomicUsize::new(0),
            sessions: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/event/:topic", post(ingest))
            .route("/eventstream/:topic", get(subscribe))
            .with_state(Arc::clone(&broker));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        broker
    }

    /// Answer the next `count` POSTs with `status` (`usize::MAX` = forever).
    pub fn fail_posts(&self, count: usize, status: u16) {
        self.post_failure_status.store(status, Ordering::SeqCst);
        self.post_failures.store(count, Ordering::SeqCst);
    }

    /// Answer the next `count` subscribe requests with 503.
    pub fn fail_subscriptions(&self, count: usize) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Queue a scripted session: the chunks are written in order, then the
    /// connection closes.
    pub fn push_session(&self, chunks: Vec<String>) {
        self.push_raw_session(chunks.into_iter().map(String::into_bytes).collect());
    }

    /// Like [`push_session`](Self::push_session), for bytes that need not
    /// be UTF-8.
    pub fn push_raw_session(&self, chunks: Vec<Vec<u8>>) {
        self.sessions.lock().unwrap().push_back(Session {
            chunks,
            hold_open: false,
        });
    }

    /// Queue a session that writes its chunks and then stays open, sending
    /// nothing more.
    pub fn push_open_session(&self, chunks: Vec<Vec<u8>>) {
        self.sessions.lock().unwrap().push_back(Session {
            chunks,
            hold_open: true,
        });
    }

    /// Append `body` to the log as if it had been POSTed. Returns its id.
    pub fn publish(&self, body: String) -> usize {
        let mut log = self.log.lock().unwrap();
        log.push(body.clone());
        let id = log.len();
        let _ = self.live.send((id, body));
        id
    }

    /// Every POST attempt, accepted or not.
    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    /// Bodies accepted with 201.
    pub fn accepted(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    fn follow(&self, after: usize) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
        // Subscribe before the snapshot; the id filter drops the overlap.
        let rx = self.live.subscribe();
        let backlog: Vec<(usize, String)> = self
            .log
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, body)| (i + 1, body.clone()))
            .filter(|(id, _)| *id > after)
            .collect();
        let replayed = backlog.last().map(|(id, _)| *id).unwrap_or(after);

        let live = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(item) => return Some((item, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |(id, _)| future::ready(*id > replayed));

        stream::iter(backlog)
            .chain(live)
            .map(|(id, body)| Ok(format!("id: {}\ndata: {}\n\n", id, body)))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn last_event_id(headers: &HeaderMap) -> usize {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

async fn ingest(
    State(broker): State<Arc<FakeBroker>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    broker.posts.lock().unwrap().push(Post {
        topic,
        content_type,
        body: body.clone(),
    });

    if take_one(&broker.post_failures) {
        let status = broker.post_failure_status.load(Ordering::SeqCst);
        return StatusCode::from_u16(status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    }
    broker.publish(body);
    StatusCode::CREATED
}

async fn subscribe(
    State(broker): State<Arc<FakeBroker>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
) -> Response {
    broker.subscriptions.lock().unwrap().push(Subscription {
        topic,
        headers: headers.clone(),
    });

    if take_one(&broker.subscribe_failures) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let scripted = broker.sessions.lock().unwrap().pop_front();
    let body = match scripted {
        Some(Session { chunks, hold_open }) => {
            let written = stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
            if hold_open {
                Body::from_stream(written.chain(stream::pending()))
            } else {
                Body::from_stream(written)
            }
        }
        None => Body::from_stream(broker.follow(last_event_id(&headers))),
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
