//! Error types for News API operations.

use thiserror::Error;

/// Result type for News API operations.
pub type NewsApiResult<T> = Result<T, NewsApiError>;

/// Errors that can occur while talking to the News API.
///
/// The API key is never included in any variant.
#[derive(Debug, Error)]
pub enum NewsApiError {
    /// The credential environment variable is not set.
    #[error("{env_var} environment variable is not set.")]
    MissingApiKey {
        /// Name of the environment variable that should hold the key.
        env_var: String,
    },

    /// The credential environment variable holds a value that cannot be sent
    /// as an HTTP header, e.g. one containing a newline.
    #[error("{env_var} contains characters that are not valid in an HTTP header.")]
    InvalidApiKey {
        /// Name of the environment variable holding the key.
        env_var: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("request to News API failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The News API answered with an error document.
    #[error("{message} ({code})")]
    Api {
        /// HTTP status of the response.
        status: u16,
        /// Provider error code, e.g. `apiKeyInvalid`.
        code: String,
        /// Provider error message.
        message: String,
    },

    /// The response body was not a recognisable News API document.
    #[error("unexpected News API response (HTTP {status}): {message}")]
    UnexpectedResponse {
        /// HTTP status of the response.
        status: u16,
        /// What could not be understood.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_names_variable_only() {
        let error = NewsApiError::MissingApiKey {
            env_var: "NEWSAPI_KEY".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "NEWSAPI_KEY environment variable is not set."
        );
    }

    #[test]
    fn invalid_key_names_variable_only() {
        let error = NewsApiError::InvalidApiKey {
            env_var: "NEWSAPI_KEY".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "NEWSAPI_KEY contains characters that are not valid in an HTTP header."
        );
    }

    #[test]
    fn api_error_display() {
        let error = NewsApiError::Api {
            status: 401,
            code: "apiKeyInvalid".to_string(),
            message: "Your API key is invalid.".to_string(),
        };
        assert_eq!(error.to_string(), "Your API key is invalid. (apiKeyInvalid)");
    }
}
