//! Distributed fixed-window rate limiting.
//!
//! Every node admits requests against its own counters without waiting on
//! the network. Decisions for identifiers owned by another node are pushed
//! to that node (the origin) in batches, and the origin's corrected counts
//! are pulled back and max-merged locally.
pub mod api;
pub mod cli;
pub mod error;
pub mod limiters;
pub mod metrics;
pub mod node;
pub mod settings;
pub mod transport;
