use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use core::fmt::Write;
use idalloc::RequestContext;
use std::time::Instant;

pub static TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

const MAX_TRACE_ID_LEN: usize = 128;

/// Attaches a [`RequestContext`] to every request and writes one access log
/// line per response.
///
/// An incoming `X-Trace-Id` is reused when present and printable; otherwise a
/// random 32-character hex id is generated. The id is echoed on the response.
pub async fn trace_id(mut req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(&TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_TRACE_ID_LEN)
        .map_or_else(generate_trace_id, str::to_string);

    req.extensions_mut()
        .insert(RequestContext::new(trace_id.as_str()));
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let mut res = next.run(req).await;

    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        path = %path,
        status = res.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        res.headers_mut().insert(TRACE_ID_HEADER.clone(), value);
    }
    res
}

fn generate_trace_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().fold(String::with_capacity(32), |mut id, byte| {
        let _ = write!(id, "{byte:02x}");
        id
    })
}
