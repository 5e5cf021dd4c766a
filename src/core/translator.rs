//! Upstream answer -> local response.
use axum::body::Body as AxumBody;
use hyper::{HeaderMap, Response, StatusCode, header};

use crate::{
    core::error::TranslateError,
    ports::upstream::{UpstreamFrame, UpstreamResponse},
};

/// What the proxy hands back to the host for a forwarded request.
///
/// The length is never known: the body is streamed as it arrives and the
/// host re-frames it.
#[derive(Debug)]
pub struct ProxiedResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length_known: bool,
    pub body: Option<AxumBody>,
}

impl ProxiedResult {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Build an HTTP response. Framing headers from upstream are dropped since
    /// the length is unknown; everything else is kept as received.
    pub fn into_response(self) -> Response<AxumBody> {
        let mut response = Response::new(self.body.unwrap_or_else(AxumBody::empty));
        *response.status_mut() = self.status;
        let mut headers = self.headers;
        if !self.content_length_known {
            headers.remove(header::CONTENT_LENGTH);
        }
        headers.remove(header::TRANSFER_ENCODING);
        *response.headers_mut() = headers;
        response
    }
}

/// Check that `frame` is an answer and pass its parts through unchanged.
pub fn translate(frame: UpstreamFrame) -> Result<ProxiedResult, TranslateError> {
    let UpstreamResponse {
        status,
        headers,
        body,
    } = match frame {
        UpstreamFrame::Answer(answer) => answer,
        UpstreamFrame::Request { method, uri } => {
            return Err(TranslateError::BadAnswer(format!(
                "request frame '{method} {uri}'"
            )));
        }
    };

    Ok(ProxiedResult {
        status,
        headers,
        content_length_known: false,
        body,
    })
}
