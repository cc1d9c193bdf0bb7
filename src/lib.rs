pub mod collector;
pub mod config;
pub mod executor;
pub mod fetch;
pub mod helm;
pub mod logging;
pub mod model;
pub mod structured;
pub mod traits;

// Re-export common types for convenience
pub use collector::MemoryErrorsCollector;
pub use config::TrackerConfig;
pub use executor::*;
pub use fetch::{Fetcher, RateLimiter};
pub use model::*;
pub use traits::*;
