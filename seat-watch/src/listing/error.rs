//! Listing query error types.

use std::fmt;

use crate::pacing::{Failure, FailureKind};

/// Errors from a listing query.
#[derive(Debug)]
pub enum QueryError {
    /// The request did not complete within the per-call timeout
    Timeout,

    /// Connection, proxy or TLS failure
    Transport(reqwest::Error),

    /// The service answered with a non-success HTTP status
    Status { status: u16, body: String },

    /// The body was not the JSON we expected
    Json {
        message: String,
        body: Option<String>,
    },

    /// The service answered but flagged the query as failed
    Rejected {
        httpstatus: Option<u16>,
        messages: Vec<String>,
    },

    /// The client could not be built from its configuration
    Setup(String),
}

impl QueryError {
    /// Describe this error for the pacing controller.
    pub fn failure(&self) -> Failure {
        match self {
            QueryError::Timeout => Failure::new(FailureKind::Timeout),
            QueryError::Transport(_) | QueryError::Setup(_) => {
                Failure::new(FailureKind::Transport)
            }
            QueryError::Status { status, body } => {
                Failure::new(FailureKind::HttpStatus(*status)).with_message(body.clone())
            }
            QueryError::Json { .. } => Failure::new(FailureKind::Malformed),
            QueryError::Rejected {
                httpstatus,
                messages,
            } => {
                let kind = match httpstatus {
                    Some(status) if *status >= 400 => FailureKind::HttpStatus(*status),
                    _ => FailureKind::Rejected,
                };
                Failure::new(kind).with_messages(messages.iter().cloned())
            }
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Timeout => write!(f, "request timed out"),
            QueryError::Transport(e) => write!(f, "transport error: {e}"),
            QueryError::Status { status, body } => {
                write!(f, "HTTP {status}")?;
                if !body.is_empty() {
                    write!(f, ": {body}")?;
                }
                Ok(())
            }
            QueryError::Json { message, body } => {
                write!(f, "JSON parse error: {message}")?;
                if let Some(body) = body {
                    write!(f, " (body: {body})")?;
                }
                Ok(())
            }
            QueryError::Rejected { messages, .. } => {
                write!(f, "query rejected")?;
                if !messages.is_empty() {
                    write!(f, ": {}", messages.join("; "))?;
                }
                Ok(())
            }
            QueryError::Setup(msg) => write!(f, "client setup failed: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QueryError::Timeout
        } else {
            QueryError::Transport(err)
        }
    }
}
