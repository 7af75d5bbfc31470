//! Gatehouse - a policy-driven API gateway.
//!
//! Gatehouse forwards requests shaped `/{service}/{rest...}` to configured
//! upstream services after running an ordered policy pipeline, implemented
//! with a **hexagonal architecture**. This library exposes the core building
//! blocks so you can embed the gateway or compose parts of it inside your
//! own application.
//!
//! # Features
//! - Per-service IP firewall with CIDR support (allow/block lists)
//! - Per-service User-Agent filtering (case-insensitive substring rules)
//! - Static API-key authentication per service
//! - Fixed-window rate limiting keyed by service and client IP
//! - TTL-based response caching for GET requests with periodic sweeping
//! - Hierarchical configuration (global defaults + per-service overrides)
//!   with live hot-reload & validation
//! - Structured tracing via `tracing`
//! - Graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use gatehouse::config::ConfigStore;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! // Load and validate a configuration (see `gatehouse init` for a sample)
//! let store = ConfigStore::bootstrap("config/main.yaml").await?;
//! let snapshot = store.current();
//! println!("{} services configured", snapshot.services.len());
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`. End users should prefer the
//! re-exports documented below instead of reaching into internal modules
//! directly.
//!
//! # Error Handling
//! All fallible APIs return `eyre::Result<T>` or a domain specific error
//! type. A custom error context is always attached using `WrapErr` for
//! debuggability.
//!
//! # Concurrency & Data Structures
//! The configuration snapshot lives behind an `arc_swap::ArcSwap` and is
//! replaced wholesale, never mutated in place. Shared mutable maps on hot
//! paths use `scc::HashMap` for predictable performance under contention;
//! small memo caches use plain reader/writer locks with double-checked
//! insertion.
//!
//! # License
//! Licensed under Apache-2.0.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{FileConfigProvider, HttpClientAdapter, HttpHandler},
    config::ConfigStore,
    core::{CidrCache, RateLimiterRegistry, ResponseCache, UserAgentNormalizer},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
