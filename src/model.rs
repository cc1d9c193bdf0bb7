use crate::structured::StructuredValue;
use serde::{Deserialize, Serialize};

/// Catalog record built for one chart version.
///
/// The worker that processes a job owns the `Package` until the catalog
/// call returns; every enrichment step receives it by `&mut`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub app_version: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub home_url: String,
    pub readme: String,
    pub license: String,
    pub logo_url: String,
    pub logo_image_id: String,
    pub content_url: String,
    pub digest: String,
    pub deprecated: bool,
    pub signed: bool,
    pub links: Vec<Link>,
    pub maintainers: Vec<Maintainer>,
    pub containers_images: Vec<ContainerImage>,
    pub changes: Vec<String>,
    pub crds: Vec<StructuredValue>,
    pub crds_examples: Vec<StructuredValue>,
    pub capabilities: String,
    pub is_operator: bool,
    pub prerelease: bool,
    pub contains_security_updates: bool,
    pub data: Option<PackageData>,
    pub repository: Repository,
    /// Unix seconds; 0 when the index entry carries no creation time.
    pub created_at: i64,
}

/// Chart-specific extras stored alongside the package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageData {
    pub api_version: String,
    pub kube_version: String,
    pub chart_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PackageDependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDependency {
    pub name: String,
    pub version: String,
    pub repository: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    #[serde(default)]
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub whitelisted: bool,
}

/// Repository the tracked charts belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub repository_id: String,
    pub name: String,
    /// Base URL, used to resolve relative chart URLs.
    pub url: String,
}

/// What the catalog needs to find a package version to remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub version: String,
    pub repository: Repository,
}
