//! Chart index entries and chart archives.
//!
//! A chart archive is a gzipped tarball with a single top-level directory
//! holding `Chart.yaml` plus optional `README.md` and `LICENSE` files. Only
//! those three files are read; templates and values are ignored.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path};
use tar::Archive;
use thiserror::Error;

/// One entry of a repository index: chart metadata plus download URLs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartVersion {
    #[serde(flatten)]
    pub metadata: ChartMetadata,

    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub digest: String,
}

/// Contents of `Chart.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChartMetadata {
    pub api_version: String,
    pub name: String,
    pub version: String,
    pub app_version: String,
    pub kube_version: String,
    pub description: String,
    #[serde(rename = "type")]
    pub chart_type: String,
    pub home: String,
    pub icon: String,
    pub keywords: Vec<String>,
    pub maintainers: Vec<ChartMaintainer>,
    pub dependencies: Vec<ChartDependency>,
    pub deprecated: bool,
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartMaintainer {
    pub name: String,
    pub email: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartDependency {
    pub name: String,
    pub version: String,
    pub repository: String,
}

/// What the tracker keeps from a downloaded chart archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedChart {
    pub metadata: ChartMetadata,
    pub readme: Option<String>,
    /// SPDX id detected from the chart's `LICENSE` file.
    pub license: Option<String>,
}

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("error reading chart archive: {0}")]
    Archive(#[from] std::io::Error),

    #[error("chart archive has no Chart.yaml")]
    MissingChartYaml,

    #[error("invalid Chart.yaml: {0}")]
    InvalidChartYaml(#[from] serde_yaml::Error),

    #[error("invalid chart metadata: {0}")]
    InvalidMetadata(&'static str),
}

impl LoadedChart {
    /// Decodes a `.tgz` chart archive held in memory.
    pub fn from_archive(data: &[u8]) -> Result<Self, ChartError> {
        let mut chart_yaml = None;
        let mut readme = None;
        let mut license_text = None;

        let mut archive = Archive::new(GzDecoder::new(data));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            let Some(file_name) = root_file_name(&path) else {
                continue;
            };

            let slot = match file_name.as_str() {
                "Chart.yaml" => &mut chart_yaml,
                name if name.eq_ignore_ascii_case("README.md") => &mut readme,
                "LICENSE" | "LICENSE.txt" | "LICENSE.md" => &mut license_text,
                _ => continue,
            };
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            slot.get_or_insert(content);
        }

        let chart_yaml = chart_yaml.ok_or(ChartError::MissingChartYaml)?;
        let chart_yaml = String::from_utf8(chart_yaml)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let metadata: ChartMetadata = serde_yaml::from_str(&chart_yaml)?;
        if metadata.name.is_empty() {
            return Err(ChartError::InvalidMetadata("name is required"));
        }
        if metadata.version.is_empty() {
            return Err(ChartError::InvalidMetadata("version is required"));
        }

        Ok(Self {
            metadata,
            readme: readme
                .map(|r| String::from_utf8_lossy(&r).into_owned())
                .filter(|r| !r.trim().is_empty()),
            license: license_text
                .and_then(|text| detect_license(&String::from_utf8_lossy(&text)))
                .map(str::to_string),
        })
    }
}

/// Returns the file name of `path` when it sits directly under the chart's
/// top-level directory (`<chart>/<file>`). Files of subcharts are skipped.
fn root_file_name(path: &Path) -> Option<String> {
    let parts: Vec<_> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    match parts.as_slice() {
        [Component::Normal(_), Component::Normal(file)] => Some(file.to_string_lossy().into_owned()),
        _ => None,
    }
}

/// Maps the header of well-known license texts to their SPDX identifier.
pub fn detect_license(text: &str) -> Option<&'static str> {
    let text = text.to_uppercase();
    let has = |needle: &str| text.contains(needle);

    if has("APACHE LICENSE") && has("VERSION 2.0") {
        return Some("Apache-2.0");
    }
    if has("GNU AFFERO GENERAL PUBLIC LICENSE") {
        return Some("AGPL-3.0");
    }
    if has("GNU LESSER GENERAL PUBLIC LICENSE") {
        return Some(if has("VERSION 3") { "LGPL-3.0" } else { "LGPL-2.1" });
    }
    if has("GNU GENERAL PUBLIC LICENSE") {
        if has("VERSION 3") {
            return Some("GPL-3.0");
        }
        if has("VERSION 2") {
            return Some("GPL-2.0");
        }
        return None;
    }
    if has("MOZILLA PUBLIC LICENSE") && has("2.0") {
        return Some("MPL-2.0");
    }
    if has("PERMISSION IS HEREBY GRANTED, FREE OF CHARGE") {
        return Some("MIT");
    }
    if has("REDISTRIBUTION AND USE IN SOURCE AND BINARY FORMS") {
        return Some(if has("NEITHER THE NAME") {
            "BSD-3-Clause"
        } else {
            "BSD-2-Clause"
        });
    }
    None
}

/// Builds a gzipped chart tarball from `(path, content)` pairs.
#[cfg(test)]
pub(crate) fn chart_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let files: Vec<(&str, &[u8])> = files.iter().map(|(p, c)| (*p, c.as_bytes())).collect();
    chart_archive_bytes(&files)
}

#[cfg(test)]
pub(crate) fn chart_archive_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(enc);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        tar.append_data(&mut header, path, *content).unwrap();
    }
    tar.into_inner().unwrap().finish().unwrap()
}
