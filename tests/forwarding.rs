// Integration tests forwarding through real sockets to a loopback upstream
mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body as AxumBody;
    use http_body_util::BodyExt;
    use hyper::{HeaderMap, Method, StatusCode, header::HeaderValue};
    use revproxy::{
        adapters::{DnsResolver, HyperUpstreamConnector},
        core::{
            ClientConnection, ForwardError, Forwarder, HandlerOutcome, IncomingRequest,
            ProxiedResult, ProxyError, RedirectionRule, RoutingController,
        },
    };

    use crate::common::{Upstream, unused_port};

    fn controller() -> RoutingController {
        let forwarder = Forwarder::new(
            Arc::new(DnsResolver::new()),
            Arc::new(HyperUpstreamConnector::new().unwrap()),
        );
        RoutingController::new(forwarder)
    }

    fn rules(port: u16, extra: &str) -> Vec<RedirectionRule> {
        vec![
            format!(r#"revproxy regexp="/fwd/(.*)" server="127.0.0.1" port="{port}" uri="$1" {extra}"#)
                .parse()
                .unwrap(),
        ]
    }

    fn request(path: &str, query: Option<&str>) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-client", HeaderValue::from_static("test-client"));
        IncomingRequest {
            method: Method::GET,
            sub_path: path.to_string(),
            query: query.map(str::to_string),
            headers,
            body: AxumBody::empty(),
        }
    }

    async fn forward(
        controller: &RoutingController,
        rules: &[RedirectionRule],
        request: IncomingRequest,
        connection: &ClientConnection,
    ) -> Result<ProxiedResult, ProxyError> {
        match controller.route(rules, request, connection).await {
            HandlerOutcome::Found(deferred) => deferred.invoke().await,
            HandlerOutcome::NotConcerned(request) => {
                panic!("{} should have been routed", request.sub_path)
            }
            HandlerOutcome::Error(e) => Err(e),
        }
    }

    async fn body_text(result: ProxiedResult) -> String {
        let body = result.body.expect("answer has a body");
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_forward_with_substituted_uri_and_query() {
        let upstream = Upstream::start().await;
        let controller = controller();
        let rules = rules(upstream.port(), "");
        let connection = ClientConnection::new(None);

        let result = forward(
            &controller,
            &rules,
            request("/fwd/items/7", Some("sort=asc")),
            &connection,
        )
        .await
        .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        assert!(!result.content_length_known);
        assert_eq!(result.headers.get("x-upstream-path").unwrap(), "/items/7?sort=asc");
        assert_eq!(result.headers.get("x-client").unwrap(), "test-client");
        assert_eq!(body_text(result).await, "upstream:/items/7?sort=asc");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_answer_has_no_body() {
        let upstream = Upstream::start().await;
        let controller = controller();
        let rules = rules(upstream.port(), "");
        let connection = ClientConnection::new(None);

        let result = forward(&controller, &rules, request("/fwd/empty", None), &connection)
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::NO_CONTENT);
        assert!(!result.has_body());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_streamed_body_without_length() {
        let upstream = Upstream::start().await;
        let controller = controller();
        let rules = rules(upstream.port(), "");
        let connection = ClientConnection::new(None);

        let result = forward(&controller, &rules, request("/fwd/stream", None), &connection)
            .await
            .unwrap();
        let response = result.into_response();
        assert!(response.headers().get(hyper::header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(hyper::header::TRANSFER_ENCODING).is_none());

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"one,two,three");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipelined_requests_share_upstream_connection() {
        let upstream = Upstream::start().await;
        let controller = controller();
        let rules = rules(upstream.port(), "");
        let connection = ClientConnection::new(None);

        for path in ["/fwd/a", "/fwd/b", "/fwd/c"] {
            let result = forward(&controller, &rules, request(path, None), &connection)
                .await
                .unwrap();
            body_text(result).await;
        }
        assert_eq!(upstream.connections(), 1);
        assert_eq!(connection.session_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nopipeline_opens_connection_per_request() {
        let upstream = Upstream::start().await;
        let controller = controller();
        let rules = rules(upstream.port(), "nopipeline");
        let connection = ClientConnection::new(None);

        for path in ["/fwd/a", "/fwd/b"] {
            let result = forward(&controller, &rules, request(path, None), &connection)
                .await
                .unwrap();
            body_text(result).await;
        }
        assert_eq!(upstream.connections(), 2);
        assert_eq!(connection.session_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let port = unused_port().await;
        let controller = controller();
        let rules = rules(port, "");
        let connection = ClientConnection::new(None);

        let err = forward(&controller, &rules, request("/fwd/x", None), &connection)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Forward(ForwardError::Connect { .. })));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unresolvable_host_fails_while_routing() {
        let controller = controller();
        let rules: Vec<RedirectionRule> =
            vec![r#"revproxy regexp="/(.*)" server="no-such-host.invalid" uri="$1""#
                .parse()
                .unwrap()];
        let connection = ClientConnection::new(None);

        match controller
            .route(&rules, request("/x", None), &connection)
            .await
        {
            HandlerOutcome::Error(ProxyError::Forward(ForwardError::Resolve { host, .. })) => {
                assert_eq!(host, "no-such-host.invalid");
            }
            other => panic!("expected a resolution error, got {:?}", other.state()),
        }
    }
}
