use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, send or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A body could not be encoded or decoded as JSON.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// A local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with a non-success status.
    #[error("{status} {status_text} - {body}")]
    Request {
        status: u16,
        status_text: String,
        body: Value,
    },

    /// The response did not have the shape an accessor expects.
    #[error("unexpected response shape at {path}: expected {expected}")]
    SchemaMismatch {
        path: &'static str,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub(crate) fn request(status: reqwest::StatusCode, body: Value) -> Self {
        Self::Request {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        }
    }

    /// True for failures below the HTTP status level (network or body decoding).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Json(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_error_display_includes_status_and_body() {
        let err = ClientError::request(
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            json!({"detail": "flow not found"}),
        );

        assert_eq!(err.status(), Some(422));
        assert!(!err.is_transport());
        assert_eq!(
            err.to_string(),
            r#"422 Unprocessable Entity - {"detail":"flow not found"}"#
        );
    }

    #[test]
    fn json_errors_count_as_transport() {
        let source = serde_json::from_str::<Value>("<html>").unwrap_err();
        let err = ClientError::from(source);
        assert!(err.is_transport());
        assert_eq!(err.status(), None);
    }
}
