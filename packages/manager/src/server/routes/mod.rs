pub mod health;
pub mod jobs;
pub mod proxygate;
pub mod results;
pub mod stats;
pub mod workers;
