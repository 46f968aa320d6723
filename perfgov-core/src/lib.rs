//! # perfgov-core
//!
//! In-process performance governance for an analytics-style HTTP backend.
//!
//! ## Architecture
//!
//! - **Cache**: keyed TTL cache with pattern invalidation and coalesced compute
//! - **Metrics**: named sample buffers, counters, histograms and timers
//! - **Admission**: sliding-window rate limiting and per-key throttling
//! - **Dispatcher**: fixed pool of worker threads with a FIFO task queue
//! - **Resources**: object pools, bounded retention cache, memory-pressure cleanup
//! - **Governor**: service object wiring the above together with background loops
//!
//! ```text
//! request ──► Admission ──► handler ──► Cache ──miss──► Dispatcher ──► worker thread
//!                │                        │                  │
//!                └──────────► Metrics ◄───┴──────────────────┘
//!                               ▲
//!                   Resources ──┘ (cleanup, memory samples)
//! ```
//!
//! Every component is an owned instance; nothing is a process-wide singleton.
//! Construct a [`PerformanceGovernor`] per application (or per test).

pub mod admission;
pub mod cache;
mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod governor;
pub mod metrics;
pub mod resources;

pub use config::{ConfigLoader, GovernorConfig};
pub use error::{GovernorError, Result};
pub use governor::{
    CacheOptimization, PerformanceGovernor, PerformanceReport, PreloadEntry, Preloader,
};
