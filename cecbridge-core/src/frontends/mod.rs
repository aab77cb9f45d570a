use crate::traits::UiAssetProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use rust_embed::RustEmbed;
use std::borrow::Cow;

// Setup and admin pages, embedded at build time.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../ui/"]
struct Asset;

/// A UI asset provider that serves files embedded into the binary.
#[derive(Debug, Default)]
pub struct EmbedFrontend;

impl EmbedFrontend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UiAssetProvider for EmbedFrontend {
    async fn get_asset(&self, path: &str) -> Result<(Cow<'static, [u8]>, String)> {
        let asset = Asset::get(path).ok_or_else(|| Error::AssetNotFound(path.to_string()))?;
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        Ok((asset.data, mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_pages_are_embedded() {
        let frontend = EmbedFrontend::new();
        for page in ["setup/index.html", "admin/index.html"] {
            let (data, mime) = frontend.get_asset(page).await.unwrap();
            assert!(!data.is_empty());
            assert_eq!(mime, "text/html");
        }
    }

    #[tokio::test]
    async fn unknown_asset_is_not_found() {
        let err = EmbedFrontend::new().get_asset("nope.js").await.unwrap_err();
        assert!(matches!(err, Error::AssetNotFound(_)));
    }
}
