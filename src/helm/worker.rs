//! Chart version job processing.
//!
//! A [`Worker`] takes one [`Job`] through its steps sequentially:
//! 1. **Download**: fetch the chart archive from its first URL
//! 2. **Load**: decode `Chart.yaml`, README and LICENSE from the archive
//! 3. **Assets**: store the logo and detect a provenance file
//! 4. **Enrichment**: merge `artifacthub.io/` annotations
//! 5. **Catalog**: register (or unregister) the package version
//!
//! Failures that end a job, and the non-fatal ones along the way, are sent
//! to the errors collector. Nothing escapes [`Worker::process`].

use crate::config::TrackerConfig;
use crate::fetch::{FetchError, Fetcher, RateLimiter};
use crate::helm::annotations::{enrich_package, AnnotationError};
use crate::helm::assets::{AssetError, AssetResolver};
use crate::helm::chart::{ChartError, ChartVersion, LoadedChart};
use crate::model::{
    Maintainer, Package, PackageData, PackageDependency, PackageIdentity, Repository,
};
use crate::traits::{ErrorsCollector, HttpClient, ImageStore, PackageManager, PackageManagerError};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

// ============================================================================
// Job Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Register,
    Unregister,
}

/// A chart version to add to or remove from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub kind: JobKind,
    pub chart_version: ChartVersion,
    /// Whether the chart icon should be fetched and stored.
    pub store_logo: bool,
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Registered,
    Unregistered,
    /// Deprecated chart whose archive could not be downloaded.
    Skipped,
    Failed,
}

/// Step of a job an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    DownloadChart,
    LoadChart,
    Logo,
    Provenance,
    Annotations,
    Register,
    Unregister,
    Timeout,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::DownloadChart => "download chart",
            Self::LoadChart => "load chart",
            Self::Logo => "logo",
            Self::Provenance => "provenance",
            Self::Annotations => "annotations",
            Self::Register => "register package",
            Self::Unregister => "unregister package",
            Self::Timeout => "job timeout",
        };
        f.write_str(stage)
    }
}

/// Broad classes of job failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network, timeout or cancellation.
    Transport,
    /// Non-2xx response for a required resource.
    Status,
    /// Malformed archive, inline asset or annotation.
    Decode,
    /// Image store or catalog rejected the write.
    Persistence,
}

#[derive(Error, Debug)]
pub enum JobFailure {
    #[error("chart version has no download url")]
    NoChartUrl,

    #[error("invalid chart url {url}: {reason}")]
    InvalidChartUrl { url: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error("chart loading task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Catalog(#[from] PackageManagerError),

    #[error("job did not finish within {0}s")]
    Timeout(u64),
}

impl JobFailure {
    pub fn class(&self) -> FailureClass {
        fn fetch_class(e: &FetchError) -> FailureClass {
            match e {
                FetchError::Status { .. } => FailureClass::Status,
                FetchError::Transport { .. } | FetchError::Cancelled { .. } => {
                    FailureClass::Transport
                }
            }
        }

        match self {
            Self::Fetch(e) => fetch_class(e),
            Self::Asset(AssetError::FetchLogo(e) | AssetError::FetchProvenance(e)) => {
                fetch_class(e)
            }
            Self::Asset(AssetError::StoreLogo(_)) | Self::Catalog(_) => FailureClass::Persistence,
            Self::Timeout(_) => FailureClass::Transport,
            Self::NoChartUrl
            | Self::InvalidChartUrl { .. }
            | Self::Chart(_)
            | Self::Task(_)
            | Self::Asset(AssetError::DecodeLogo(_))
            | Self::Annotation(_) => FailureClass::Decode,
        }
    }
}

/// A failure of one job, with what the collector needs to report it.
#[derive(Error, Debug)]
#[error("{stage} failed for {name} {version}: {failure}")]
pub struct JobError {
    pub stage: JobStage,
    pub repository: String,
    pub name: String,
    pub version: String,
    #[source]
    pub failure: JobFailure,
}

// ============================================================================
// Services
// ============================================================================

/// Shared collaborators of every worker of a pool.
pub struct Services {
    pub pm: Arc<dyn PackageManager>,
    pub is: Arc<dyn ImageStore>,
    pub ec: Arc<dyn ErrorsCollector>,
    pub fetcher: Arc<Fetcher>,
    pub cancel: CancellationToken,
    pub inline_icon_prefix: String,
    pub job_timeout: Duration,
}

impl Services {
    pub fn new(
        config: &TrackerConfig,
        hc: Arc<dyn HttpClient>,
        limiter: Arc<RateLimiter>,
        pm: Arc<dyn PackageManager>,
        is: Arc<dyn ImageStore>,
        ec: Arc<dyn ErrorsCollector>,
        cancel: CancellationToken,
    ) -> Self {
        let fetcher = Fetcher::new(
            hc,
            limiter,
            config.rate_limited_hosts.clone(),
            cancel.clone(),
        );
        Self {
            pm,
            is,
            ec,
            fetcher: Arc::new(fetcher),
            cancel,
            inline_icon_prefix: config.inline_icon_prefix.clone(),
            job_timeout: config.job_timeout(),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Processes jobs of one repository.
pub struct Worker {
    svc: Arc<Services>,
    repository: Repository,
    assets: AssetResolver,
}

impl Worker {
    pub fn new(svc: Arc<Services>, repository: Repository) -> Self {
        let assets = AssetResolver::new(
            svc.fetcher.clone(),
            svc.is.clone(),
            svc.inline_icon_prefix.clone(),
        );
        Self {
            svc,
            repository,
            assets,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.svc.cancel
    }

    /// Runs `job` to completion. Errors are recorded, never returned.
    #[instrument(
        skip_all,
        fields(
            repository = %self.repository.name,
            package = %job.chart_version.metadata.name,
            version = %job.chart_version.metadata.version,
        )
    )]
    pub async fn process(&self, job: Job) -> JobOutcome {
        let start = Instant::now();

        let result = match timeout(self.svc.job_timeout, self.run(&job)).await {
            Ok(result) => result,
            Err(_) => Err(self.job_error(
                &job,
                JobStage::Timeout,
                JobFailure::Timeout(self.svc.job_timeout.as_secs()),
            )),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(outcome) => {
                info!(duration_ms, ?outcome, "Job completed");
                outcome
            }
            Err(err) => {
                self.record(err);
                JobOutcome::Failed
            }
        }
    }

    async fn run(&self, job: &Job) -> Result<JobOutcome, JobError> {
        match job.kind {
            JobKind::Register => self.handle_register(job).await,
            JobKind::Unregister => self.handle_unregister(job).await,
        }
    }

    async fn handle_register(&self, job: &Job) -> Result<JobOutcome, JobError> {
        // ====================================================================
        // Download
        // ====================================================================

        let content_url = self
            .chart_url(&job.chart_version)
            .map_err(|e| self.job_error(job, JobStage::DownloadChart, e))?;

        let data = match self.svc.fetcher.fetch(&content_url).await {
            Ok(data) => data,
            Err(e) if job.chart_version.metadata.deprecated => {
                debug!(error = %e, "Deprecated chart archive unreachable, skipping");
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => return Err(self.job_error(job, JobStage::DownloadChart, e.into())),
        };

        // ====================================================================
        // Load
        // ====================================================================

        let chart = tokio::task::spawn_blocking(move || LoadedChart::from_archive(&data))
            .await
            .map_err(|e| self.job_error(job, JobStage::LoadChart, JobFailure::Task(e.to_string())))?
            .map_err(|e| self.job_error(job, JobStage::LoadChart, e.into()))?;

        let icon = chart.metadata.icon.clone();
        let annotations = chart.metadata.annotations.clone();
        let mut pkg = self.build_package(job, chart, content_url);

        // ====================================================================
        // Assets
        // ====================================================================

        if job.store_logo && !icon.is_empty() {
            if let Err(e) = self.assets.resolve_logo(&mut pkg, &icon).await {
                self.record(self.job_error(job, JobStage::Logo, e.into()));
            }
        }
        if let Err(e) = self.assets.resolve_provenance(&mut pkg).await {
            self.record(self.job_error(job, JobStage::Provenance, e.into()));
        }

        // ====================================================================
        // Enrichment
        // ====================================================================

        if let Err(e) = enrich_package(&mut pkg, &annotations) {
            self.record(self.job_error(job, JobStage::Annotations, e.into()));
        }

        // ====================================================================
        // Catalog
        // ====================================================================

        self.svc
            .pm
            .register(&pkg)
            .await
            .map_err(|e| self.job_error(job, JobStage::Register, e.into()))?;
        Ok(JobOutcome::Registered)
    }

    async fn handle_unregister(&self, job: &Job) -> Result<JobOutcome, JobError> {
        let identity = PackageIdentity {
            name: job.chart_version.metadata.name.clone(),
            version: job.chart_version.metadata.version.clone(),
            repository: self.repository.clone(),
        };
        self.svc
            .pm
            .unregister(&identity)
            .await
            .map_err(|e| self.job_error(job, JobStage::Unregister, e.into()))?;
        Ok(JobOutcome::Unregistered)
    }

    /// First download URL of the chart, resolved against the repository URL
    /// when relative.
    fn chart_url(&self, cv: &ChartVersion) -> Result<String, JobFailure> {
        let raw = cv.urls.first().ok_or(JobFailure::NoChartUrl)?;
        if Url::parse(raw).is_ok_and(|url| url.has_host()) {
            return Ok(raw.clone());
        }

        let invalid = |reason: String| JobFailure::InvalidChartUrl {
            url: raw.clone(),
            reason,
        };
        let mut base = self.repository.url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        // Prefixing with "./" keeps a leading "name:" from reading as a scheme.
        let relative = if raw.starts_with('/') {
            raw.clone()
        } else {
            format!("./{raw}")
        };
        Url::parse(&base)
            .and_then(|base| base.join(&relative))
            .map(String::from)
            .map_err(|e| invalid(e.to_string()))
    }

    fn build_package(&self, job: &Job, chart: LoadedChart, content_url: String) -> Package {
        let md = chart.metadata;
        let data = PackageData {
            api_version: md.api_version,
            kube_version: md.kube_version,
            chart_type: md.chart_type,
            dependencies: md
                .dependencies
                .into_iter()
                .map(|d| PackageDependency {
                    name: d.name,
                    version: d.version,
                    repository: d.repository,
                })
                .collect(),
        };

        Package {
            name: md.name,
            version: md.version,
            app_version: md.app_version,
            description: md.description,
            keywords: md.keywords,
            home_url: md.home,
            readme: chart.readme.unwrap_or_default(),
            license: chart.license.unwrap_or_default(),
            content_url,
            digest: job.chart_version.digest.clone(),
            deprecated: md.deprecated || job.chart_version.metadata.deprecated,
            maintainers: md
                .maintainers
                .into_iter()
                .filter(|m| !m.email.is_empty())
                .map(|m| Maintainer {
                    name: m.name,
                    email: m.email,
                })
                .collect(),
            data: Some(data).filter(|d| *d != PackageData::default()),
            repository: self.repository.clone(),
            created_at: job
                .chart_version
                .created
                .map(|created| created.timestamp())
                .unwrap_or(0),
            ..Default::default()
        }
    }

    fn job_error(&self, job: &Job, stage: JobStage, failure: JobFailure) -> JobError {
        JobError {
            stage,
            repository: self.repository.name.clone(),
            name: job.chart_version.metadata.name.clone(),
            version: job.chart_version.metadata.version.clone(),
            failure,
        }
    }

    fn record(&self, err: JobError) {
        warn!(
            stage = %err.stage,
            class = ?err.failure.class(),
            error = %err,
            "Job error"
        );
        self.svc.ec.append(&self.repository.repository_id, err);
    }
}

// ============================================================================
// Tests
// ============================================================================
