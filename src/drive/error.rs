//! Errors raised by the remote file client.

/// Failure of a remote file or token operation.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    /// No usable credentials: token rejected, refresh failed, or consent
    /// declined. The client is signed out after this.
    #[error("authentication required: {0}")]
    Auth(String),

    /// The service answered with a non-success status.
    #[error("{operation} failed with HTTP {status}: {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The request never got a response.
    #[error("{operation}: network error: {source}")]
    Network {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be decoded.
    #[error("{operation}: could not decode response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl DriveError {
    /// Whether this error means the caller has to sign in again.
    pub fn is_auth(&self) -> bool {
        matches!(self, DriveError::Auth(_))
    }

    /// Whether `err` wraps an authentication failure.
    pub fn is_auth_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<DriveError>()
            .map(DriveError::is_auth)
            .unwrap_or(false)
    }

    pub(crate) fn network(operation: &'static str, source: reqwest::Error) -> Self {
        DriveError::Network { operation, source }
    }

    pub(crate) fn decode(operation: &'static str, message: impl ToString) -> Self {
        DriveError::Decode {
            operation,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_detected_through_anyhow() {
        let err: anyhow::Error = DriveError::Auth("token expired".into()).into();
        assert!(DriveError::is_auth_error(&err));

        let err: anyhow::Error = DriveError::Http {
            operation: "list project files",
            status: 500,
            body: String::new(),
        }
        .into();
        assert!(!DriveError::is_auth_error(&err));
        assert_eq!(
            err.to_string(),
            "list project files failed with HTTP 500: "
        );
    }
}
