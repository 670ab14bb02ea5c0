pub mod error;
pub mod pagination;
pub mod time;

pub use error::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
