//! Logo and provenance resolution for a chart version.

use crate::fetch::{FetchError, Fetcher};
use crate::model::Package;
use crate::traits::{ImageStore, ImageStoreError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Suffix appended to a chart URL to locate its provenance file.
pub const PROVENANCE_SUFFIX: &str = ".prov";

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("error fetching logo: {0}")]
    FetchLogo(FetchError),

    #[error("invalid inline logo: {0}")]
    DecodeLogo(String),

    #[error("error saving logo: {0}")]
    StoreLogo(ImageStoreError),

    #[error("error fetching provenance file: {0}")]
    FetchProvenance(FetchError),
}

pub struct AssetResolver {
    fetcher: Arc<Fetcher>,
    image_store: Arc<dyn ImageStore>,
    inline_icon_prefix: String,
}

impl AssetResolver {
    pub fn new(
        fetcher: Arc<Fetcher>,
        image_store: Arc<dyn ImageStore>,
        inline_icon_prefix: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            image_store,
            inline_icon_prefix: inline_icon_prefix.into(),
        }
    }

    /// Stores the chart icon and records its image id in `pkg`.
    ///
    /// Remote icons also set `pkg.logo_url`, even when the download fails.
    /// Inline icons are decoded locally and never hit the network.
    pub async fn resolve_logo(&self, pkg: &mut Package, icon: &str) -> Result<(), AssetError> {
        let data = if let Some(payload) = self.inline_payload(icon) {
            decode_inline(payload).map_err(AssetError::DecodeLogo)?
        } else {
            pkg.logo_url = icon.to_string();
            self.fetcher
                .fetch(icon)
                .await
                .map_err(AssetError::FetchLogo)?
        };

        pkg.logo_image_id = self
            .image_store
            .save_image(&data)
            .await
            .map_err(AssetError::StoreLogo)?;
        Ok(())
    }

    /// Marks `pkg` as signed when a provenance file sits next to its chart.
    pub async fn resolve_provenance(&self, pkg: &mut Package) -> Result<(), AssetError> {
        let url = format!("{}{}", pkg.content_url, PROVENANCE_SUFFIX);
        match self.fetcher.fetch_optional(&url).await {
            Ok(Some(_)) => {
                pkg.signed = true;
                Ok(())
            }
            Ok(None) => {
                debug!(url, "chart is not signed");
                Ok(())
            }
            Err(e) => Err(AssetError::FetchProvenance(e)),
        }
    }

    /// What follows the inline prefix of `icon`, if it has one.
    fn inline_payload<'a>(&self, icon: &'a str) -> Option<&'a str> {
        if self.inline_icon_prefix.is_empty() {
            return None;
        }
        strip_prefix_ignore_case(icon, &self.inline_icon_prefix)
    }
}

/// ASCII case-insensitive `str::strip_prefix`.
fn strip_prefix_ignore_case<'a>(raw: &'a str, prefix: &str) -> Option<&'a str> {
    raw.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &raw[prefix.len()..])
}

/// Decodes a `data:[<mediatype>][;base64],<data>` URL into raw bytes.
pub fn decode_data_url(raw: &str) -> Result<Vec<u8>, String> {
    let rest = strip_prefix_ignore_case(raw, "data:")
        .ok_or_else(|| "missing data: scheme".to_string())?;
    decode_inline(rest)
}

/// Decodes the `[<mediatype>][;base64],<data>` part of an inline asset.
fn decode_inline(rest: &str) -> Result<Vec<u8>, String> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "missing ',' separator".to_string())?;

    let is_base64 = header
        .rsplit(';')
        .next()
        .is_some_and(|param| param.trim().eq_ignore_ascii_case("base64"));

    if is_base64 {
        let payload = percent_decode_str(payload).decode_utf8_lossy();
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(compact).map_err(|e| e.to_string())
    } else {
        Ok(percent_decode_str(payload).collect())
    }
}

#[cfg(test)]
pub(crate) const RED_DOT_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAUAAAAFCAYAAACNbyblAAAAHElEQVQI12P4//8/w38GIAXDIBKE0DHxgljNBAAO9TXL0Y4OHwAAAABJRU5ErkJggg==";
