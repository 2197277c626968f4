//! Node-to-node transport for push-pull calls.
//!
//! `HttpPushPullClient` is what a running node uses. `InMemoryTransport`
//! routes calls straight into other nodes' services in the same process,
//! which is handy for embedding a cluster in tests.
pub mod http;
pub mod memory;
pub mod traits;

pub use http::HttpPushPullClient;
pub use memory::InMemoryTransport;
pub use traits::PushPullClient;
