pub mod email;
pub mod geo;
pub mod job;
pub mod place;
pub mod proxy;
pub mod task;
pub mod worker;

pub use job::{CoverageMode, Job, JobConfig, JobProgress, JobStatus};
pub use place::Place;
pub use proxy::{FetchStatus, ProxySource};
pub use task::{SearchPayload, Task, TaskStatus};
pub use worker::{Worker, WorkerStatus};
