mod castor;
mod oauth;

pub use castor::{ApiErrorBody, ApiErrorObject, CastorError};
pub use oauth::OauthError;

/// Marker for errors worth another attempt at the current layer.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
