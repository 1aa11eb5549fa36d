use super::form::{self, FormValues};
use crate::http::codec::RequestHead;
use crate::http::headers::HeaderList;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Method, Version};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// The moment a request began processing, on both clocks
#[derive(Debug, Clone, Copy)]
pub struct RequestStart {
    /// Wall-clock time, reported in the summary
    pub at: DateTime<Utc>,
    /// Monotonic time, used for the processing duration
    pub instant: Instant,
}

impl RequestStart {
    pub fn now() -> Self {
        Self {
            at: Utc::now(),
            instant: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }
}

/// Everything observed about one request, captured after its body was read.
///
/// Built once per exchange and handed to the formatter; never mutated.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub start: RequestStart,
    pub method: Method,
    pub version: Version,
    pub path: String,
    pub full_url: String,
    pub host: String,
    pub remote_addr: String,
    pub client_addr: String,
    pub user_agent: String,
    pub content_type: String,
    /// `None` when the body length was not announced up front
    pub content_length: Option<u64>,
    pub headers: HeaderList,
    pub query: FormValues,
    /// Body form values followed by query values
    pub form: FormValues,
    /// Body form values only
    pub post_form: FormValues,
    pub body: Bytes,
}

impl RequestSnapshot {
    /// Captures a snapshot from a decoded head and its fully read body.
    pub fn capture(head: RequestHead, body: Bytes, remote_addr: SocketAddr, start: RequestStart) -> Self {
        let remote_addr = remote_addr.to_string();
        let client_addr = resolve_client_addr(&head.headers, &remote_addr);

        let query = head
            .query()
            .map(|q| form::parse_lenient(q.as_bytes()))
            .unwrap_or_default();

        let content_type = head.headers.get_or_empty("Content-Type").to_string();
        let post_form = if carries_form_body(&head.method, &content_type) {
            form::parse_lenient(&body)
        } else {
            FormValues::new()
        };

        let mut combined = post_form.clone();
        combined.extend_from(&query);

        let host = head
            .headers
            .get("Host")
            .or_else(|| head.authority())
            .map(str::to_string)
            .unwrap_or_default();
        let path = head.path().to_string();
        let content_length = head.declared_length();

        Self {
            start,
            path,
            full_url: head.target,
            host,
            user_agent: head.headers.get_or_empty("User-Agent").to_string(),
            content_length,
            method: head.method,
            version: head.version,
            remote_addr,
            client_addr,
            content_type,
            headers: head.headers,
            query,
            form: combined,
            post_form,
            body,
        }
    }
}

/// Best-effort address of the original client.
///
/// Checks `X-Forwarded-For` (first entry), `X-Real-IP` and `Cf-Connecting-Ip`
/// in that order, falling back to the transport peer. The headers are client
/// controlled; the result is for display only.
pub fn resolve_client_addr(headers: &HeaderList, remote_addr: &str) -> String {
    if let Some(forwarded) = headers.get("X-Forwarded-For").filter(|v| !v.is_empty()) {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    ["X-Real-IP", "Cf-Connecting-Ip"]
        .iter()
        .find_map(|name| headers.get(name).filter(|v| !v.is_empty()))
        .unwrap_or(remote_addr)
        .to_string()
}

fn carries_form_body(method: &Method, content_type: &str) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
        && form::is_form_content_type(content_type)
}
