//! Embedded HTTP-01 responder
//!
//! A minimal HTTP/1.1 server that answers
//! `GET /.well-known/acme-challenge/<token>` with the registered key
//! authorization (`text/html`) and reports each successful fetch over a
//! channel. Anything else gets a 404.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::challenge::ChallengeManager;

/// Pause after a failed accept (e.g. descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Notification that the CA (or anyone) fetched a registered token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeServed {
    pub token: String,
    pub peer: SocketAddr,
}

/// Running responder; stops accepting when dropped
#[derive(Debug)]
pub struct ChallengeResponder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ChallengeResponder {
    /// Bind `addr` and start serving challenges from `challenges`
    pub async fn bind(
        addr: SocketAddr,
        challenges: ChallengeManager,
        served: mpsc::UnboundedSender<ChallengeServed>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "HTTP-01 challenge responder listening");

        let task = tokio::spawn(accept_loop(listener, challenges, served));
        Ok(Self { local_addr, task })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ChallengeResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_failed(error: &io::Error) {
    warn!(error = %error, "Failed to accept responder connection");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

async fn accept_loop(
    listener: TcpListener,
    challenges: ChallengeManager,
    served: mpsc::UnboundedSender<ChallengeServed>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                accept_failed(&e).await;
                continue;
            }
        };

        let challenges = challenges.clone();
        let served = served.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let response = respond(&request, &challenges, &served, peer);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer, error = %e, "Responder connection ended with error");
            }
        });
    }
}

/// Build the response for a single request
fn respond<B>(
    request: &Request<B>,
    challenges: &ChallengeManager,
    served: &mpsc::UnboundedSender<ChallengeServed>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let path = request.uri().path();

    let Some(token) = ChallengeManager::extract_token(path) else {
        debug!(peer = %peer, path = %path, "Not a challenge path");
        return status_only(StatusCode::NOT_FOUND);
    };

    if request.method() != Method::GET && request.method() != Method::HEAD {
        return status_only(StatusCode::METHOD_NOT_ALLOWED);
    }

    let Some(key_authorization) = challenges.get_response(token) else {
        warn!(peer = %peer, token = %token, "Request for unknown challenge token");
        return status_only(StatusCode::NOT_FOUND);
    };

    info!(peer = %peer, token = %token, "Serving ACME challenge");
    if served
        .send(ChallengeServed {
            token: token.to_string(),
            peer,
        })
        .is_err()
    {
        debug!(token = %token, "Nobody is waiting for challenge notifications");
    }

    let mut response = Response::new(Full::new(Bytes::from(key_authorization)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    response
}

fn status_only(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
