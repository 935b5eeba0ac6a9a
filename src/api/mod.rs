//! Remote API access: transport, caching gateway and the typed client.

mod client;
mod gateway;
mod keys;
mod transport;

pub use client::LibraryClient;
pub use gateway::{ReadOptions, RequestGateway};
pub use keys::{BookQuery, CacheKey, Invalidation, Resource};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
