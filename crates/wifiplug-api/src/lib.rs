// wifiplug-api: Async Rust client for the WIFIPLUG cloud API (REST + event stream)

pub mod auth;
pub mod client;
pub mod error;
pub mod events;
pub mod models;
pub mod pagination;
mod resources;
pub mod transport;

pub use auth::{ApiKeys, Authentication, OAuth2Auth};
pub use client::{ApiClient, ApiClientBuilder, RequestBody, RetryPolicy};
pub use error::{ApiError, ApiException, Error};
pub use events::{ClientEvent, Event, EventClient, EventClientConfig, EventSelector};
pub use pagination::{Cursor, ScanResult};
