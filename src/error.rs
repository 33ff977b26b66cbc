use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug, PartialEq)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
pub struct Error(ErrorDetails);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(details)
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    AppState {
        message: String,
    },
    AtlasDecode {
        message: String,
    },
    /// Non-2xx, non-429 response from Atlas. Carries the upstream status for
    /// the error body; the gateway itself answers 500.
    AtlasHttp {
        status: StatusCode,
        message: String,
    },
    AtlasRateLimited {
        retry_after_ms: u64,
    },
    AtlasTransport {
        message: String,
    },
    Config {
        message: String,
    },
    InvalidBaseUrl {
        message: String,
    },
    Serialization {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AppState { .. } => tracing::Level::ERROR,
            ErrorDetails::AtlasDecode { .. } => tracing::Level::ERROR,
            ErrorDetails::AtlasHttp { .. } => tracing::Level::ERROR,
            ErrorDetails::AtlasRateLimited { .. } => tracing::Level::WARN,
            ErrorDetails::AtlasTransport { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidBaseUrl { .. } => tracing::Level::ERROR,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::AtlasDecode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::AtlasHttp { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::AtlasRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorDetails::AtlasTransport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidBaseUrl { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AppState { message } => {
                write!(f, "Error initializing application state: {}", message)
            }
            ErrorDetails::AtlasDecode { message } => {
                write!(f, "Error decoding Atlas response: {}", message)
            }
            ErrorDetails::AtlasHttp { status, message } => {
                write!(f, "Atlas API error: status {}: {}", status.as_u16(), message)
            }
            ErrorDetails::AtlasRateLimited { retry_after_ms } => {
                write!(f, "Atlas rate limited: retry after {} ms", retry_after_ms)
            }
            ErrorDetails::AtlasTransport { message } => {
                write!(f, "Error sending request to Atlas: {}", message)
            }
            ErrorDetails::Config { message } => {
                write!(f, "{}", message)
            }
            ErrorDetails::InvalidBaseUrl { message } => write!(f, "{}", message),
            ErrorDetails::Serialization { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    /// Log the error and convert it into an Axum response
    fn into_response(self) -> Response {
        let mut response =
            (self.status_code(), Json(json!({"error": self.to_string()}))).into_response();
        if let ErrorDetails::AtlasRateLimited { retry_after_ms } = self.get_details() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_ms));
        }
        response
    }
}
