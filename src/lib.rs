//! Azure AD token handling for a web front-end and its downstream API
//!
//! A [`TokenHandler`] redeems sign-in authorization codes, serves cached
//! tokens silently and exchanges inbound bearer tokens on behalf of the
//! signed-in user. Tokens are cached per user through a
//! [`UserTokenCacheProvider`].

pub mod auth;
pub mod cache;
pub mod config;
pub mod downstream;
pub mod pipeline;

pub use auth::{
    build_token_handler, AuthorizationCodeRequest, HandlerConfig, OnBehalfOfRequest, Protocol,
    SilentTokenRequest, TokenError, TokenHandler, TokenTarget,
};
pub use cache::{PerUserMemoryTokenCacheProvider, UserTokenCacheProvider};
pub use config::Settings;
