//! Error taxonomy shared by the chat client, the auth layer and the session.

/// Errors surfaced to the chat surface.
///
/// Auth failures are kept distinct from generic failures so the caller can show
/// a login prompt instead of an apology.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Authentication required. Please log in to use Wally.")]
    AuthRequired,

    #[error("unauthorized ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("storage error: {0}")]
    Store(String),
}

impl ChatError {
    pub fn is_auth_error(&self) -> bool {
        match self {
            ChatError::AuthRequired | ChatError::Unauthorized { .. } => true,
            ChatError::Api { status, .. } => *status == 401,
            _ => false,
        }
    }
}

/// Classifies a free-form error message the way the chat surface does for
/// errors that arrive as plain text.
pub fn looks_like_auth_error(message: &str) -> bool {
    message.contains("Authentication required")
        || message.contains("log in")
        || message.to_lowercase().contains("unauthorized")
        || message.contains("401")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_classification() {
        assert!(ChatError::AuthRequired.is_auth_error());
        assert!(ChatError::Unauthorized {
            status: 403,
            body: String::new()
        }
        .is_auth_error());
        assert!(!ChatError::Api {
            status: 500,
            body: "boom".into()
        }
        .is_auth_error());
        assert!(!ChatError::Network("reset".into()).is_auth_error());
    }

    #[test]
    fn test_message_classification() {
        assert!(looks_like_auth_error(&ChatError::AuthRequired.to_string()));
        assert!(looks_like_auth_error("API error (401): nope"));
        assert!(looks_like_auth_error("Unauthorized"));
        assert!(!looks_like_auth_error("API error (500): boom"));
    }
}
