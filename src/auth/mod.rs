pub mod callback;
pub mod flow;
mod oauth_utils;
pub mod token;

pub use flow::{AuthorizationRequest, LoginResult};
pub use token::{AuthDetails, RefreshParts, TokenManager};
