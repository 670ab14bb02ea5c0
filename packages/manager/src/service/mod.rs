//! Manager-side services: the state machines and protocols that sit
//! between the HTTP boundary and the store.

pub mod dispatch;
pub mod export;
pub mod ingest;
pub mod jobs;
pub mod reconcile;
pub mod stats;
pub mod workers;

pub use dispatch::{PersistedTaskHandler, TaskDispatcher};
pub use export::{Exporter, ExporterRegistry, JsonExporter};
pub use ingest::{IngestConfig, ResultIngester, ResultSubmission};
pub use jobs::{CreateJobRequest, JobService};
pub use stats::{DashboardStats, StatsService};
pub use workers::{RegistryConfig, WorkerRegistry};
