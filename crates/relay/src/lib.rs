//! Same-origin relay for the hosted D1 REST API.
//!
//! Requests under the prefix are forwarded verbatim (minus the prefix) to the
//! upstream API. `{prefix}/download?url=...` fetches an arbitrary URL once and
//! hands it back as an attachment. Nothing is stored between requests.

mod error;

use std::future::Future;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};
use url::Url;

pub use error::RelayError;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8788";
pub const DEFAULT_UPSTREAM: &str = "https://api.cloudflare.com";
pub const DEFAULT_PREFIX: &str = "/api";

const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub upstream: Url,
    pub prefix: String,
}

impl RelayConfig {
    pub fn new(listen: SocketAddr, upstream: &str, prefix: &str) -> Result<Self, RelayError> {
        let upstream = Url::parse(upstream)
            .map_err(|error| RelayError::InvalidConfig(format!("upstream {upstream}: {error}")))?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(RelayError::InvalidConfig(format!(
                "upstream must be http or https, got {}",
                upstream.scheme()
            )));
        }

        let prefix = prefix.trim_end_matches('/');
        if !prefix.starts_with('/') {
            return Err(RelayError::InvalidConfig(format!(
                "prefix must start with '/', got {prefix:?}"
            )));
        }

        Ok(Self {
            listen,
            upstream,
            prefix: prefix.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RelayState {
    client: reqwest::Client,
    download_client: reqwest::Client,
    upstream: Url,
    prefix: String,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        // Upstream redirects go back to the caller untouched.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(RelayError::Client)?;
        let download_client = reqwest::Client::builder()
            .build()
            .map_err(RelayError::Client)?;
        Ok(Self {
            client,
            download_client,
            upstream: config.upstream.clone(),
            prefix: config.prefix.clone(),
        })
    }

    fn upstream_url(&self, rest: &str, query: Option<&str>) -> Url {
        let mut target = self.upstream.clone();
        let base = target.path().trim_end_matches('/').to_string();
        target.set_path(&format!("{base}{rest}"));
        target.set_query(query);
        target
    }
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    url: Option<String>,
}

pub fn router(state: RelayState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

pub async fn serve(config: RelayConfig) -> Result<(), RelayError> {
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| RelayError::Bind {
            addr: config.listen,
            source,
        })?;
    serve_with_shutdown(listener, &config, wait_for_signal()).await
}

pub async fn serve_with_shutdown(
    listener: TcpListener,
    config: &RelayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), RelayError> {
    let state = RelayState::new(config)?;
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, upstream = %config.upstream, prefix = %config.prefix, "relay listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(RelayError::Serve)?;
    info!("relay stopped");
    Ok(())
}

async fn dispatch(State(state): State<RelayState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let Some(rest) = strip_prefix(&path, &state.prefix) else {
        debug!(%path, "outside relay prefix");
        return StatusCode::NOT_FOUND.into_response();
    };

    if rest == "/download" {
        return download(&state, request.uri()).await;
    }

    let rest = rest.to_string();
    match forward(&state, request, &rest).await {
        Ok(response) => response,
        Err(relay_error) => relay_error.into_response(),
    }
}

fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

async fn forward(state: &RelayState, request: Request, rest: &str) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();
    let target = state.upstream_url(rest, parts.uri.query());
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(RelayError::Body)?;

    let mut headers = parts.headers;
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    strip_hop_by_hop(&mut headers);

    let method = parts.method;
    let upstream = state
        .client
        .request(method.clone(), target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(RelayError::Upstream)?;

    info!(%method, path = rest, status = upstream.status().as_u16(), "relayed request");
    Ok(streamed(upstream))
}

async fn download(state: &RelayState, uri: &Uri) -> Response {
    let source = Query::<DownloadQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.url)
        .filter(|url| !url.trim().is_empty());
    let Some(source) = source else {
        return (StatusCode::BAD_REQUEST, "No URL provided").into_response();
    };

    let fetched = match Url::parse(&source) {
        Ok(url) => state.download_client.get(url).send().await,
        Err(parse_error) => {
            error!(error = %parse_error, "download url is invalid");
            return fetch_failed();
        }
    };

    match fetched {
        Ok(upstream) if upstream.status().is_success() => {
            let mut response = streamed(upstream);
            response.headers_mut().insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment"),
            );
            response
        }
        Ok(upstream) => {
            error!(status = upstream.status().as_u16(), "download source returned an error");
            fetch_failed()
        }
        Err(fetch_error) => {
            error!(error = %fetch_error, "download fetch failed");
            fetch_failed()
        }
    }
}

fn fetch_failed() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Error fetching the file").into_response()
}

fn streamed(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(signal_error) = signal::ctrl_c().await {
            warn!(error = %signal_error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(signal_error) => {
                warn!(error = %signal_error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
