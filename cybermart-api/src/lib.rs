//! CyberMart API - client for the storefront REST API
//!
//! Three layers, leaves first:
//! - [`HttpClient`]: one base URL, bearer-token injection from the persisted slot
//! - [`operations`]: one request description per remote operation
//! - [`ApiClient`]: typed async facade, and the [`AuthApi`] seam used by sessions

pub mod client;
pub mod http;
pub mod operations;

pub use client::{ApiClient, AuthApi};
pub use http::HttpClient;
pub use operations::ApiRequest;
