//! Storage core for a Graphite-compatible metrics backend.
//!
//! Samples arrive on a bounded channel, are batched by size or time, and
//! written to the finest resolution tier of a wide-column store; coarser
//! tiers are filled opportunistically by reading back recent raw points and
//! writing their mean. Range reads densify sparse rows over a regular time
//! grid and reduce each bucket with a configurable aggregate.
//!
//! Ingest listeners, the path index, and the query HTTP layer are external
//! collaborators; this crate covers everything between the sample channel
//! and the database session.

pub mod config;
pub mod session;
pub mod store;

pub use config::Config;
pub use store::{FetchResult, Method, Sample, Store, StoreError};
