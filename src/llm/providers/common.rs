// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::{ApiError, PalaverError};

/// Parse token counts from an arbitrary message by extracting the first numeric tokens.
pub(crate) fn parse_numeric_token_counts(message: &str) -> (u32, u32) {
    let numbers: Vec<u32> = message
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse().ok())
        .collect();

    match numbers.as_slice() {
        [current, limit, ..] => (*current, *limit),
        [single] => (*single, 0),
        _ => (0, 0),
    }
}

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Construct a standardized server error.
pub(crate) fn server_error(status: u16, message: impl Into<String>) -> PalaverError {
    PalaverError::Api(ApiError::ServerError {
        status,
        message: message.into(),
    })
}

/// Map a status code and message when the body carries no vendor error code.
pub(crate) fn status_error(status: u16, message: String, retry_after: Option<u64>) -> PalaverError {
    match status {
        401 | 403 => PalaverError::Api(ApiError::AuthenticationFailed),
        404 => PalaverError::Api(ApiError::ModelNotFound(message)),
        429 => PalaverError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32)),
        _ if looks_like_context_overflow(&message) => {
            let (current, limit) = parse_numeric_token_counts(&message);
            PalaverError::Api(ApiError::ContextTooLong { current, limit })
        }
        _ => server_error(status, message),
    }
}

pub(crate) fn looks_like_context_overflow(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("context length")
        || lower.contains("too long")
        || (lower.contains("token") && (lower.contains("limit") || lower.contains("maximum")))
}

/// Append a body chunk, dropping carriage returns so `\r\n` framing reads as `\n`.
pub(crate) fn extend_buffer(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
}

/// Split complete lines off the front of `buffer`, leaving any partial tail.
///
/// Only whole lines are decoded, so a character split across two body
/// chunks stays buffered until its last byte arrives.
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=line_end).collect();
        let line = String::from_utf8_lossy(&line).trim().to_string();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Split blank-line terminated SSE frames off the front of `buffer`.
pub(crate) fn drain_frames(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let frame: Vec<u8> = buffer.drain(..pos + 2).collect();
        frames.push(String::from_utf8_lossy(&frame[..pos]).into_owned());
    }
    frames
}

/// Map a transport error from the body stream.
pub(crate) fn stream_error(err: reqwest::Error) -> PalaverError {
    if err.is_timeout() {
        PalaverError::Api(ApiError::Timeout)
    } else {
        PalaverError::Api(ApiError::StreamError(err.to_string()))
    }
}
