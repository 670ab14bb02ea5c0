//! Durable store: per-entity repositories over one shared SQLite pool,
//! plus the schema evolver that brings legacy databases forward.

pub mod db;
pub mod jobs;
pub mod migrate;
pub mod proxies;
pub mod results;
pub mod stats;
pub mod tasks;
pub mod workers;

pub use jobs::JobRepository;
pub use proxies::ProxyRepository;
pub use results::ResultRepository;
pub use stats::StatsRepository;
pub use tasks::TaskRepository;
pub use workers::WorkerRepository;
