//! Catalog access.
//!
//! A [`CatalogProvider`] answers which formats of a track are playable and
//! turns a chosen format into a fetchable URL. [`HttpCatalog`] talks to a
//! JSON catalog over HTTP through the rate-limited client.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::{
    error::{self, Error, Result},
    http,
    protocol::{
        self,
        catalog::{PlayableFormat, PlayableInfo},
    },
    track::TrackId,
};

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Asks the catalog which formats of `id` are playable.
    async fn playable_info(&self, id: &TrackId) -> Result<PlayableInfo>;

    /// Turns `format` into the URL its bytes are fetched from.
    async fn materialize_url(&self, info: &PlayableInfo, format: &PlayableFormat) -> Result<Url>;
}

/// Catalog served at `GET {base}/tracks/{id}/playable`.
pub struct HttpCatalog {
    base: Url,
    client: Arc<http::Client>,
}

impl HttpCatalog {
    #[must_use]
    pub fn new(base: Url, client: Arc<http::Client>) -> Self {
        Self { base, client }
    }

    fn playable_url(&self, id: &TrackId) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::invalid_argument(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["tracks", id.as_str(), "playable"]);
        Ok(url)
    }
}

#[async_trait]
impl CatalogProvider for HttpCatalog {
    async fn playable_info(&self, id: &TrackId) -> Result<PlayableInfo> {
        let request = self.client.get(self.playable_url(id)?);
        let response = self.client.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error::from_status(
                status,
                format!("catalog answered {status} for {id}"),
            ));
        }

        let body = response.text().await?;
        protocol::json(&body, "playable info")
    }

    async fn materialize_url(&self, info: &PlayableInfo, format: &PlayableFormat) -> Result<Url> {
        let url = format.url.as_deref().ok_or_else(|| {
            Error::restricted_content(format!(
                "{} format {} has no url",
                info.reported_id, format.mime_type
            ))
        })?;

        // Relative URLs are served by the catalog itself.
        self.base
            .join(url)
            .map_err(|e| Error::restricted_content(format!("{}: {e}", info.reported_id)))
    }
}
