use thiserror::Error;

use crate::cache::StoreError;

/// Coarse classification used for logging, metrics labels and inline error blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    NotFound,
    BadArgument,
    NotSupported,
    Internal,
}

impl FetchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BadArgument => "bad_argument",
            Self::NotSupported => "not_supported",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("`{what}` not found")]
    NotFound { what: String },
    #[error("bad argument `{parameter}`: {reason}")]
    BadArgument { parameter: String, reason: String },
    #[error("fetcher `{fetcher}` does not support {operation}")]
    NotSupported {
        fetcher: &'static str,
        operation: &'static str,
    },
    #[error("internal fetch error: {message}")]
    Internal { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FetchError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn bad_argument(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadArgument {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn not_supported(fetcher: &'static str, operation: &'static str) -> Self {
        Self::NotSupported { fetcher, operation }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::NotFound { .. } => FetchErrorKind::NotFound,
            Self::BadArgument { .. } => FetchErrorKind::BadArgument,
            Self::NotSupported { .. } => FetchErrorKind::NotSupported,
            Self::Internal { .. } | Self::Io(_) | Self::Store(_) => FetchErrorKind::Internal,
        }
    }

    /// True when the caller should take the non-cached path instead of failing.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    /// Render the error as a visible, escaped HTML block so a page render can continue.
    pub fn to_inline_html(&self) -> String {
        format!(
            "<span class=\"wikifetch-error\" data-error-kind=\"{}\">{}</span>",
            self.kind().as_str(),
            ammonia::clean_text(&self.to_string())
        )
    }
}
