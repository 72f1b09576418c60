//! Error types for brokerage calls.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to the brokerage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Request is malformed before it reaches the broker. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Broker refused the request (HTTP 400). Never retried.
    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    /// Rate limit or server-side failure (429, 500, 502, 503, 504).
    #[error("transient broker error {status}: {message}")]
    Transient { status: u16, message: String },

    /// A single request timed out.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Any other non-success status (auth, not found, ...).
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Retryable failures persisted through every attempt.
    #[error("gave up after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// No exact or substitutable contract in the live chain.
    #[error("instrument not found: {symbol}")]
    InstrumentNotFound { symbol: String },

    /// The retry sequence ran out of its overall time budget.
    #[error("retry deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The caller cancelled the retry sequence.
    #[error("cancelled")]
    Cancelled,

    /// Response body could not be understood.
    #[error("malformed broker response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            400 => Self::OrderRejected {
                reason: rejection_reason(body),
            },
            429 | 500 | 502 | 503 | 504 => Self::Transient {
                status,
                message: body.trim().to_string(),
            },
            _ => Self::Api {
                status,
                message: body.trim().to_string(),
            },
        }
    }

    /// Returns true if the call may succeed when repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Returns true if a failed order submission certainly did not reach
    /// the book and may be sent again.
    ///
    /// Timeouts, gateway errors and dropped connections leave the order's
    /// fate unknown, so they are not resubmitted.
    #[must_use]
    pub fn is_safe_to_resubmit(&self) -> bool {
        matches!(self, Self::Transient { status: 429 | 503, .. })
    }

    /// Returns true if the broker simply could not supply real data.
    ///
    /// These are the only failures a sandbox gateway may paper over with a
    /// simulated fill; rejections and validation errors always surface.
    #[must_use]
    pub fn is_data_unavailable(&self) -> bool {
        matches!(
            self,
            Self::MaxRetriesExceeded { .. }
                | Self::DeadlineExceeded(_)
                | Self::InstrumentNotFound { .. }
                | Self::Transient { .. }
                | Self::Timeout(_)
                | Self::Network(_)
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), &e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Pull the human-readable reason out of a 400 body.
///
/// Tradier reports `{"errors":{"error":"..."}}` or a list of messages;
/// anything else is passed through verbatim.
fn rejection_reason(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        errors: Errors,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Errors {
        Wrapped { error: Messages },
        Plain(Messages),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Messages {
        Many(Vec<String>),
        One(String),
    }

    let messages = match serde_json::from_str::<Envelope>(body).map(|e| e.errors) {
        Ok(Errors::Wrapped { error }) | Ok(Errors::Plain(error)) => error,
        Err(_) => return body.trim().to_string(),
    };
    match messages {
        Messages::Many(list) => list.join("; "),
        Messages::One(message) => message,
    }
}
