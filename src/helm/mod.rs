//! Helm chart ingestion.

pub mod annotations;
pub mod assets;
pub mod chart;
pub mod worker;

pub use assets::AssetResolver;
pub use chart::{ChartMetadata, ChartVersion, LoadedChart};
pub use worker::{Job, JobError, JobKind, JobOutcome, JobStage, Services, Worker};
