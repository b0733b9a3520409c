//! OAuth 2.0 client side of the bridge.
//!
//! - [`pkce`] - PKCE verifier/challenge generation for the SMART launch
//! - [`grant`] - Token endpoint client (client credentials, authorization code)

pub mod grant;
pub mod pkce;

pub use grant::{TokenEndpoint, TokenResponse};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
