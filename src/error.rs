//! Resolver error types

/// Resolver error types
///
/// Payloads are plain strings so a single failed population can be handed
/// to every caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    /// The identifier cannot be mapped to bytes.
    ///
    /// `message` is safe to return to clients; `detail` may contain source
    /// URLs, local paths and status codes and is meant for logs only.
    #[error("{message}")]
    NotFound { message: String, detail: String },

    // Construction-time errors
    #[error("Server Side Error: Configuration incomplete and cannot resolve. {0}")]
    Misconfigured(String),

    #[error("configuration error: {0}")]
    Config(String),

    // Local cache errors
    #[error("IO error: {context}: {message}")]
    Io { context: String, message: String },
}

impl ResolverError {
    /// Not-found error whose public and log messages are identical.
    pub fn not_found(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::NotFound {
            detail: message.clone(),
            message,
        }
    }

    /// Not-found error with a separate, more detailed log message.
    pub fn not_found_with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            detail: detail.into(),
        }
    }

    /// Not-found error for an identifier with no further explanation.
    pub fn source_not_found(ident: &str) -> Self {
        Self::not_found(format!("Source image not found for identifier: {ident}."))
    }

    /// Wrap a local I/O failure with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: source.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status the serving layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Message that can be shown to clients without leaking internal paths.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound { message, .. } => message.clone(),
            Self::Misconfigured(_) => self.to_string(),
            Self::Config(_) | Self::Io { .. } => "Server Side Error: unable to resolve image.".into(),
        }
    }

    /// Message for operational logs.
    pub fn detail(&self) -> String {
        match self {
            Self::NotFound { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, ResolverError>;
