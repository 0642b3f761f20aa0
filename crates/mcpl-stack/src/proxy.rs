use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// In-process HTTP front for one stack.
///
/// Serves the installed merged OpenAPI at `/openapi.json` (503 until one is
/// installed), `ok` at `/healthz`, and reverse-proxies every other request
/// to the gateway on loopback.
pub struct FrontProxy {
    addr: SocketAddr,
    spec: Arc<RwLock<Option<Vec<u8>>>>,
    shutdown: CancellationToken,
    server_task: tokio::task::JoinHandle<()>,
}

struct ProxyState {
    spec: Arc<RwLock<Option<Vec<u8>>>>,
    upstream: String,
    client: reqwest::Client,
}

impl FrontProxy {
    /// Bind `127.0.0.1:<front_port>` and start serving.
    pub async fn start(front_port: u16, gateway_port: u16) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", front_port))
            .await
            .with_context(|| format!("failed to bind front proxy on port {front_port}"))?;
        let addr = listener
            .local_addr()
            .context("failed to resolve front proxy address")?;

        let spec = Arc::new(RwLock::new(None));
        let state = Arc::new(ProxyState {
            spec: spec.clone(),
            upstream: format!("http://127.0.0.1:{gateway_port}"),
            client: reqwest::Client::new(),
        });

        let app = Router::new()
            .route("/openapi.json", get(serve_openapi))
            .route("/healthz", get(|| async { "ok" }))
            .fallback(forward_to_gateway)
            .with_state(state);

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let server_task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    server_shutdown.cancelled().await;
                })
                .await
            {
                warn!(error = %error, "front proxy stopped with error");
            }
        });

        Ok(Self {
            addr,
            spec,
            shutdown,
            server_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Install (or replace) the merged spec. Concurrent readers see either
    /// the old document or the new one, never a mix.
    pub async fn set_openapi(&self, bytes: Vec<u8>) {
        *self.spec.write().await = Some(bytes);
    }

    /// Graceful shutdown bounded by `grace`.
    pub async fn close(self, grace: Duration) {
        self.shutdown.cancel();
        if tokio::time::timeout(grace, self.server_task).await.is_err() {
            debug!("front proxy did not stop within grace period");
        }
    }
}

async fn serve_openapi(State(state): State<Arc<ProxyState>>) -> Response {
    match state.spec.read().await.as_ref() {
        Some(bytes) => (
            [(header::CONTENT_TYPE, "application/json")],
            bytes.clone(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "merged OpenAPI not available yet",
        )
            .into_response(),
    }
}

async fn forward_to_gateway(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{path_query}", state.upstream);

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            return (
                StatusCode::BAD_GATEWAY,
                format!("failed to read request body: {error}"),
            )
                .into_response();
        }
    };

    let mut upstream = state.client.request(parts.method, &url);
    for (name, value) in &parts.headers {
        if name == header::HOST {
            continue;
        }
        upstream = upstream.header(name, value);
    }

    match upstream.body(body).send().await {
        Ok(response) => {
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.bytes().await.unwrap_or_default();

            let mut builder = Response::builder().status(status);
            for (name, value) in &headers {
                if name == header::TRANSFER_ENCODING || name == header::CONTENT_LENGTH {
                    continue;
                }
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|error| {
                    (
                        StatusCode::BAD_GATEWAY,
                        format!("failed to build response: {error}"),
                    )
                        .into_response()
                })
        }
        Err(error) => (
            StatusCode::BAD_GATEWAY,
            format!("gateway unreachable: {error}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_upstream() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(|request: Request| async move {
            format!("upstream saw {}", request.uri().path())
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn openapi_serves_503_until_installed() {
        let proxy = FrontProxy::start(0, 1).await.unwrap();
        let base = format!("http://{}", proxy.addr());
        let client = reqwest::Client::new();

        let response = client.get(format!("{base}/openapi.json")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 503);

        proxy.set_openapi(b"{\"openapi\":\"3.1.0\"}".to_vec()).await;
        let response = client.get(format!("{base}/openapi.json")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(response.text().await.unwrap(), "{\"openapi\":\"3.1.0\"}");

        proxy.close(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let proxy = FrontProxy::start(0, 1).await.unwrap();
        let base = format!("http://{}", proxy.addr());
        let response = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");
        proxy.close(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn other_paths_are_reverse_proxied() {
        let upstream = start_upstream().await;
        let proxy = FrontProxy::start(0, upstream.port()).await.unwrap();
        let base = format!("http://{}", proxy.addr());

        let response = reqwest::get(format!("{base}/fs/read_file")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "upstream saw /fs/read_file");

        proxy.close(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn unreachable_gateway_maps_to_502() {
        // Reserve a port and close it again: nothing is listening there.
        let ghost = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let ghost_port = ghost.local_addr().unwrap().port();
        drop(ghost);

        let proxy = FrontProxy::start(0, ghost_port).await.unwrap();
        let base = format!("http://{}", proxy.addr());
        let response = reqwest::get(format!("{base}/anything")).await.unwrap();
        assert_eq!(response.status().as_u16(), 502);
        proxy.close(Duration::from_secs(2)).await;
    }
}
