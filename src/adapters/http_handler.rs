use std::{sync::Arc, time::Instant};

use arc_swap::ArcSwap;
use axum::{
    Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Request, connect_info::Connected},
    http::{HeaderValue, StatusCode, header},
    routing::any,
    serve::IncomingStream,
};
use hyper::Response;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::{
        controller::{HandlerOutcome, RoutingController},
        error::ProxyError,
        forwarder::IncomingRequest,
        pipeline::ClientConnection,
        rule_table::RuleTable,
    },
    tracing_setup::create_request_span,
};

/// Axum entry point: picks the site, runs the routing controller and turns
/// its outcome into a response.
#[derive(Clone)]
pub struct HttpHandler {
    rules: Arc<ArcSwap<RuleTable>>,
    controller: RoutingController,
}

impl HttpHandler {
    pub fn new(rules: Arc<ArcSwap<RuleTable>>, controller: RoutingController) -> Self {
        Self { rules, controller }
    }

    /// Catch-all router. Serve it with
    /// `into_make_service_with_connect_info::<ClientConnection>()` so requests
    /// sharing a TCP connection share one pipeline.
    pub fn router(self) -> Router {
        let handler = Arc::new(self);

        let make_route = |handler: Arc<HttpHandler>| {
            any(move |req: Request| {
                let handler = handler.clone();
                async move { handler.handle_request(req).await }
            })
        };

        Router::new()
            .route("/", make_route(handler.clone()))
            .route("/{*path}", make_route(handler))
            .layer(TraceLayer::new_for_http())
    }

    /// Handle one request, using the connection handle axum attached to it.
    pub async fn handle_request(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let connection = match req.extensions().get::<ConnectInfo<ClientConnection>>() {
            Some(ConnectInfo(connection)) => connection.clone(),
            None => ClientConnection::new(None),
        };
        self.handle_with_connection(req, &connection).await
    }

    pub async fn handle_with_connection(
        &self,
        req: Request<AxumBody>,
        connection: &ClientConnection,
    ) -> Response<AxumBody> {
        let request_id = Uuid::new_v4().to_string();
        let span = create_request_span(
            req.method().as_str(),
            req.uri().path(),
            &request_id,
            connection.id(),
        );
        let started = Instant::now();

        async move {
            let response = self.dispatch(req, connection).await;
            let span = tracing::Span::current();
            span.record("http.status_code", response.status().as_u16());
            span.record("duration_ms", started.elapsed().as_millis() as u64);
            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        req: Request<AxumBody>,
        connection: &ClientConnection,
    ) -> Response<AxumBody> {
        // Hold this generation for the whole request, even across a reload.
        let table = self.rules.load_full();
        let host = request_host(&req);

        let Some((site, sub_path)) = table.site_for(host.as_deref(), req.uri().path()) else {
            tracing::debug!(host = ?host, path = %req.uri().path(), "no site for request");
            return not_found(req.uri().path());
        };
        tracing::Span::current().record("site", site.name());

        let request = IncomingRequest::from_http(req, sub_path);
        match self.controller.route(site.rules(), request, connection).await {
            HandlerOutcome::Found(deferred) => match deferred.invoke().await {
                Ok(result) => result.into_response(),
                Err(e) => error_response(&e),
            },
            HandlerOutcome::NotConcerned(request) => not_found(&request.sub_path),
            HandlerOutcome::Error(e) => error_response(&e),
        }
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for ClientConnection {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        ClientConnection::new(Some(*stream.remote_addr()))
    }
}

/// Host name from the `Host` header, or the URI authority for HTTP/2.
fn request_host(req: &Request<AxumBody>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
}

fn not_found(path: &str) -> Response<AxumBody> {
    json_response(
        StatusCode::NOT_FOUND,
        serde_json::json!({
            "error": "no revproxy rule matched",
            "path": path,
        }),
    )
}

fn error_response(error: &ProxyError) -> Response<AxumBody> {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), "{error}");
    } else {
        tracing::warn!(status = status.as_u16(), "{error}");
    }
    json_response(
        status,
        serde_json::json!({
            "error": error.to_string(),
            "status": status.as_u16(),
        }),
    )
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use hyper::HeaderMap;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::models::{ProxyConfig, VirtualHostConfig},
        core::{
            error::ForwardError, forwarder::Forwarder, resolver::ResolvedTarget,
        },
        ports::{
            address_resolver::AddressResolver,
            upstream::{UpstreamChannel, UpstreamConnector, UpstreamFrame, UpstreamResponse},
        },
    };

    struct LoopbackResolver;

    #[async_trait]
    impl AddressResolver for LoopbackResolver {
        async fn resolve(&self, _host: &str, port: u16) -> Result<Vec<SocketAddr>, ForwardError> {
            Ok(vec![SocketAddr::from(([127, 0, 0, 1], port))])
        }
    }

    /// Answers every request with its own upstream URI in the body.
    struct EchoConnector;

    struct EchoChannel {
        host: String,
    }

    #[async_trait]
    impl UpstreamConnector for EchoConnector {
        async fn connect(
            &self,
            target: &ResolvedTarget,
            _addr: SocketAddr,
        ) -> Result<Box<dyn UpstreamChannel>, ForwardError> {
            Ok(Box::new(EchoChannel {
                host: target.authority(),
            }))
        }
    }

    #[async_trait]
    impl UpstreamChannel for EchoChannel {
        async fn send(
            &mut self,
            request: hyper::Request<AxumBody>,
        ) -> Result<UpstreamFrame, ForwardError> {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
            Ok(UpstreamFrame::Answer(UpstreamResponse {
                status: StatusCode::OK,
                headers,
                body: Some(AxumBody::from(format!("{}{}", self.host, request.uri()))),
            }))
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn handler(vhosts: Vec<VirtualHostConfig>) -> HttpHandler {
        let config = ProxyConfig {
            vhosts,
            ..ProxyConfig::default()
        };
        let (table, errors) = RuleTable::build(&config);
        assert!(errors.is_empty(), "{errors:?}");
        let forwarder = Forwarder::new(Arc::new(LoopbackResolver), Arc::new(EchoConnector));
        HttpHandler::new(
            Arc::new(ArcSwap::from_pointee(table)),
            RoutingController::new(forwarder),
        )
    }

    fn site(name: &str, hosts: &[&str], mount: &str, rules: &[&str]) -> VirtualHostConfig {
        VirtualHostConfig {
            name: name.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            mount: mount.to_string(),
            rules: rules.iter().map(|r| r.to_string()).collect(),
        }
    }

    async fn body_text(response: Response<AxumBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str, host: &str) -> Request<AxumBody> {
        hyper::Request::builder()
            .uri(uri)
            .header(header::HOST, host)
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_found_streams_upstream_answer() {
        let app = handler(vec![site(
            "main",
            &[],
            "/app",
            &[r#"revproxy regexp="/p/(\d+)" server="up.example" uri="item/$1" port="8081""#],
        )])
        .router();

        let response = app.oneshot(get("/app/p/42?x=1", "client.example")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(body_text(response).await, "up.example:8081/item/42?x=1");
    }

    #[tokio::test]
    async fn test_not_concerned_is_404() {
        let app = handler(vec![site(
            "main",
            &[],
            "/",
            &[r#"revproxy regexp="/api/(.*)" server="up" uri="$1""#],
        )])
        .router();

        let response = app.oneshot(get("/other", "client.example")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["path"], "/other");
    }

    #[tokio::test]
    async fn test_bad_port_is_500() {
        let app = handler(vec![site(
            "main",
            &[],
            "/",
            &[r#"revproxy regexp="/(\w+)" server="up" uri="x" port="$1""#],
        )])
        .router();

        let response = app.oneshot(get("/abc", "client.example")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], 500);
    }

    #[tokio::test]
    async fn test_host_dispatch() {
        let handler = handler(vec![
            site(
                "default",
                &[],
                "/",
                &[r#"revproxy regexp="/(.*)" server="fallback" uri="$1""#],
            ),
            site(
                "api",
                &["api.example"],
                "/",
                &[r#"revproxy regexp="/(.*)" server="api-up" uri="$1""#],
            ),
        ]);

        let response = handler
            .clone()
            .router()
            .oneshot(get("/v1", "API.example:8080"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "api-up:80/v1");

        let connection = ClientConnection::new(None);
        let response = handler
            .handle_with_connection(get("/v1", "www.example"), &connection)
            .await;
        assert_eq!(body_text(response).await, "fallback:80/v1");
        assert_eq!(connection.session_count(), 1);
    }

    #[tokio::test]
    async fn test_reload_swaps_rules() {
        let handler = handler(vec![site(
            "main",
            &[],
            "/",
            &[r#"revproxy regexp="/(.*)" server="old" uri="$1""#],
        )]);

        let config = ProxyConfig {
            vhosts: vec![site(
                "main",
                &[],
                "/",
                &[r#"revproxy regexp="/(.*)" server="new" uri="$1""#],
            )],
            ..ProxyConfig::default()
        };
        handler.rules.store(Arc::new(RuleTable::build(&config).0));

        let response = handler.handle_request(get("/x", "h")).await;
        assert_eq!(body_text(response).await, "new:80/x");
    }
}
