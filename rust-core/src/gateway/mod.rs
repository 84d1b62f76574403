//! HTTP/1.1 JSON front end over [`crate::ModerationService`].

pub mod http;

pub use http::{start_http_server, GatewayState};
