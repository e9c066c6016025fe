//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, console)
//!     → forward.rs (the same events as JSON lines on a broker subject)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → subscribers of the log subject
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod forward;
pub mod logging;
pub mod metrics;
