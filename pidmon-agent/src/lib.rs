//! Process-tree supervision engine for pidmon
//!
//! Responsibilities:
//! - Keep one dispatcher per monitored entity (registry)
//! - Discover child processes and attach dispatchers to them recursively
//! - Poll every metric domain on its own thread and log each reading
//! - Publish formatted per-entity snapshots for front ends
//! - Run post-processing jobs (report rendering) with bounded concurrency

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frontend;
pub mod introspect;
pub mod job_pool;
pub mod monitor;
pub mod registry;
pub mod report;
pub mod table;
pub mod tracer;

pub use config::MonitorConfig;
pub use dispatcher::{DispatcherHandle, DispatcherState};
pub use error::{AgentError, Result};
pub use frontend::FrontendSnapshot;
pub use introspect::Introspector;
pub use job_pool::{JobPool, JobSummary};
pub use monitor::Monitor;
pub use registry::EntityRegistry;
pub use report::{render_all, RendererConfig};
