//! Scripted HTTP server for exercising the upstream clients

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<(StatusCode, String)>>,
    hits: HashMap<String, usize>,
}

type SharedScript = Arc<Mutex<Script>>;

/// Answers by request path, ignoring method and query. Queued responses are
/// served in order; the last one repeats.
async fn respond(State(script): State<SharedScript>, uri: Uri) -> (StatusCode, String) {
    let mut script = script.lock();
    let path = uri.path().to_string();
    *script.hits.entry(path.clone()).or_default() += 1;

    let Some(queue) = script.responses.get_mut(&path) else {
        return (StatusCode::NOT_FOUND, String::new());
    };
    if queue.len() > 1 {
        queue.pop_front().unwrap()
    } else {
        queue
            .front()
            .cloned()
            .unwrap_or((StatusCode::NOT_FOUND, String::new()))
    }
}

pub struct TestServer {
    base_url: String,
    script: SharedScript,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Serve on a random localhost port
    pub async fn start() -> Self {
        let script = SharedScript::default();
        let router = Router::new().fallback(respond).with_state(script.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            script,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Queue a response for `path`
    pub fn respond(&self, path: &str, status: u16, body: impl Into<String>) {
        let status = StatusCode::from_u16(status).unwrap();
        self.script
            .lock()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.into()));
    }

    /// How many requests reached `path`
    pub fn hits(&self, path: &str) -> usize {
        self.script.lock().hits.get(path).copied().unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}
