// src/core/headers.rs

//! Proxy identification, header rewrite rules and the diagnostic result header.

use crate::config::AppInfo;
use crate::core::timeseries::ExtentList;
use axum::http::header::{ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use tracing::warn;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_BY: &str = "x-forwarded-by";
pub const X_ACCELERATOR: &str = "x-accelerator";
pub const X_RESULT: &str = "x-deltacache-result";

fn set(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!("Skipping invalid header {}: {}", name, value),
    }
}

fn append(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
        }
        _ => warn!("Skipping invalid header {}: {}", name, value),
    }
}

/// Marks a request as forwarded by this proxy on behalf of `remote_addr`.
pub fn add_proxy_headers(remote_addr: &str, headers: &mut HeaderMap, app: &AppInfo) {
    if !remote_addr.is_empty() {
        set(headers, X_FORWARDED_FOR, remote_addr);
    }
    set(headers, X_FORWARDED_BY, &app.to_string());
}

/// Returns the first value of `name` as a string, if present and valid UTF-8.
pub fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Applies rewrite rules: `name` sets, `+name` appends, `-name` removes.
/// Rules with an empty name are ignored.
pub fn update_headers(headers: &mut HeaderMap, rules: &HashMap<String, String>) {
    for (rule, value) in rules {
        if let Some(name) = rule.strip_prefix('-') {
            if let Ok(name) = HeaderName::try_from(name) {
                headers.remove(name);
            }
        } else if let Some(name) = rule.strip_prefix('+') {
            if !name.is_empty() {
                append(headers, name, value);
            }
        } else if !rule.is_empty() {
            set(headers, rule, value);
        }
    }
}

/// Strips client headers that must not reach the origin.
pub fn remove_client_headers(headers: &mut HeaderMap) {
    headers.remove(ACCEPT_ENCODING);
    headers.remove(HOST);
    headers.remove(CONNECTION);
}

/// Adds the headers every proxied response carries.
pub fn add_response_headers(headers: &mut HeaderMap, app: &AppInfo) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    set(headers, X_ACCELERATOR, &app.to_string());
}

/// Renders the diagnostic summary. Returns `None` when `engine` is empty.
/// Empty `status`, `ff_status` and `fetched` parts are left out.
pub fn format_result(
    engine: &str,
    status: &str,
    ff_status: &str,
    fetched: &ExtentList,
) -> Option<String> {
    if engine.is_empty() {
        return None;
    }
    let mut parts = vec![format!("engine={engine}")];
    if !status.is_empty() {
        parts.push(format!("status={status}"));
    }
    for extent in fetched {
        parts.push(format!("fetched={extent}"));
    }
    if !ff_status.is_empty() {
        parts.push(format!("ffstatus={ff_status}"));
    }
    Some(parts.join("; "))
}

/// Writes the diagnostic result header. Nothing is written when `engine` is empty.
pub fn set_result_header(
    headers: &mut HeaderMap,
    engine: &str,
    status: &str,
    ff_status: &str,
    fetched: &ExtentList,
) {
    if let Some(value) = format_result(engine, status, ff_status, fetched) {
        set(headers, X_RESULT, &value);
    }
}
