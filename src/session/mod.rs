//! Session handling for the grading API
//!
//! The grading client only sees `AuthorizedTransport`; `SessionGuard` is
//! the production implementation backed by reqwest.

mod guard;
mod tokens;
mod transport;

pub use guard::SessionGuard;
pub use tokens::{TokenCell, TokenResponse, TokenStore, Tokens};
pub use transport::{
    ApiRequest, ApiResponse, AuthorizedTransport, Method, RequestBody, TransportError, Upload,
};
