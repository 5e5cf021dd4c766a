// Loopback upstream server shared by the integration tests
#![allow(dead_code)]

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody, combinators::BoxBody};
use hyper::{Request, Response, StatusCode, body::Frame, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// A plain HTTP/1.1 server on 127.0.0.1 counting accepted connections.
///
/// - `/empty` answers 204 without a body
/// - `/stream` answers with a chunked body `one,two,three`
/// - anything else answers 200 with `upstream:<path and query>`
///
/// Every answer carries `x-upstream-path` and echoes `x-client` back.
pub struct Upstream {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl Upstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let accepted = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(answer))
                        .await;
                });
            }
        });

        Self { addr, connections }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn answer(
    request: Request<hyper::body::Incoming>,
) -> Result<Response<BoxBody<Bytes, Infallible>>, Infallible> {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();

    let body = match request.uri().path() {
        "/empty" => Full::new(Bytes::new()).boxed(),
        "/stream" => {
            let chunks: Vec<Result<Frame<Bytes>, Infallible>> = ["one,", "two,", "three"]
                .into_iter()
                .map(|chunk| Ok(Frame::data(Bytes::from_static(chunk.as_bytes()))))
                .collect();
            StreamBody::new(futures_util::stream::iter(chunks)).boxed()
        }
        _ => Full::new(Bytes::from(format!("upstream:{path}"))).boxed(),
    };

    let mut builder = Response::builder().header("x-upstream-path", path.as_str());
    if let Some(client) = request.headers().get("x-client") {
        builder = builder.header("x-client", client.clone());
    }
    if request.uri().path() == "/empty" {
        builder = builder.status(StatusCode::NO_CONTENT);
    }
    Ok(builder.body(body).unwrap())
}

/// A closed port on 127.0.0.1.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
