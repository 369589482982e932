//! Content item store capability.
//!
//! The products being optimized live in the commerce platform, not in
//! this service. This module defines the read/write surface the
//! generation pipeline needs (title, slug, descriptions, tags, image
//! metadata) plus a REST adapter against the platform's admin API and
//! an in-memory double for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata carried by a product image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub alt: String,
    pub title: String,
    pub caption: String,
    pub description: String,
}

/// An image attached to a content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemImage {
    pub id: Uuid,
    #[serde(flatten)]
    pub meta: ImageMeta,
}

/// A content item (product) as seen by the generation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub short_description: String,
    pub description: String,
    pub tags: Vec<String>,
    pub images: Vec<ItemImage>,
}

/// Capability trait for reading and writing content items.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_item(&self, item_id: Uuid) -> Result<Option<ContentItem>>;

    async fn set_title(&self, item_id: Uuid, title: &str) -> Result<()>;

    async fn set_slug(&self, item_id: Uuid, slug: &str) -> Result<()>;

    async fn set_short_description(&self, item_id: Uuid, text: &str) -> Result<()>;

    async fn set_description(&self, item_id: Uuid, text: &str) -> Result<()>;

    /// Replace the item's tag list wholesale.
    async fn set_tags(&self, item_id: Uuid, tags: &[String]) -> Result<()>;

    async fn set_image_meta(&self, item_id: Uuid, image_id: Uuid, meta: &ImageMeta) -> Result<()>;
}

/// Build a URL-safe slug from free text.
///
/// Lowercases, maps runs of non-alphanumerics to single hyphens, and
/// trims leading/trailing hyphens.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_hyphen = true;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    slug.trim_end_matches('-').to_string()
}

// =============================================================================
// REST adapter
// =============================================================================

#[derive(Debug, Serialize)]
struct ItemPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slug: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    short_description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a [String]>,
}

impl<'a> ItemPatch<'a> {
    fn empty() -> Self {
        Self {
            title: None,
            slug: None,
            short_description: None,
            description: None,
            tags: None,
        }
    }
}

/// Content store backed by the commerce platform's admin REST API.
pub struct RestContentStore {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

impl RestContentStore {
    pub fn new(base_url: String, api_token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            client,
        })
    }

    async fn patch_item(&self, item_id: Uuid, patch: &ItemPatch<'_>) -> Result<()> {
        let url = format!("{}/products/{}", self.base_url, item_id);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(patch)
            .send()
            .await
            .context("Failed to send product update")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("product update failed with {}: {}", status, body);
        }

        Ok(())
    }
}

#[async_trait]
impl ContentStore for RestContentStore {
    async fn get_item(&self, item_id: Uuid) -> Result<Option<ContentItem>> {
        let url = format!("{}/products/{}", self.base_url, item_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Failed to fetch product")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("product fetch failed with {}: {}", status, body);
        }

        let item: ContentItem = response
            .json()
            .await
            .context("Failed to parse product response")?;

        Ok(Some(item))
    }

    async fn set_title(&self, item_id: Uuid, title: &str) -> Result<()> {
        let patch = ItemPatch {
            title: Some(title),
            ..ItemPatch::empty()
        };
        self.patch_item(item_id, &patch).await
    }

    async fn set_slug(&self, item_id: Uuid, slug: &str) -> Result<()> {
        let patch = ItemPatch {
            slug: Some(slug),
            ..ItemPatch::empty()
        };
        self.patch_item(item_id, &patch).await
    }

    async fn set_short_description(&self, item_id: Uuid, text: &str) -> Result<()> {
        let patch = ItemPatch {
            short_description: Some(text),
            ..ItemPatch::empty()
        };
        self.patch_item(item_id, &patch).await
    }

    async fn set_description(&self, item_id: Uuid, text: &str) -> Result<()> {
        let patch = ItemPatch {
            description: Some(text),
            ..ItemPatch::empty()
        };
        self.patch_item(item_id, &patch).await
    }

    async fn set_tags(&self, item_id: Uuid, tags: &[String]) -> Result<()> {
        let patch = ItemPatch {
            tags: Some(tags),
            ..ItemPatch::empty()
        };
        self.patch_item(item_id, &patch).await
    }

    async fn set_image_meta(&self, item_id: Uuid, image_id: Uuid, meta: &ImageMeta) -> Result<()> {
        let url = format!("{}/products/{}/images/{}", self.base_url, item_id, image_id);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(meta)
            .send()
            .await
            .context("Failed to send image metadata update")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("image metadata update failed with {}: {}", status, body);
        }

        Ok(())
    }
}

// =============================================================================
// In-memory double
// =============================================================================

/// In-memory content store for tests.
///
/// Items are held in a map for direct inspection; a write-failure switch
/// lets tests exercise the restore-keeps-snapshot path.
#[derive(Default)]
pub struct InMemoryContentStore {
    items: RwLock<HashMap<Uuid, ContentItem>>,
    fail_writes: RwLock<bool>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, item: ContentItem) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item.id, item);
    }

    pub fn item(&self, item_id: Uuid) -> Option<ContentItem> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&item_id)
            .cloned()
    }

    /// Make every subsequent write fail (for restore-failure tests).
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    fn mutate<F>(&self, item_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut ContentItem),
    {
        if *self.fail_writes.read().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("content store write failure (injected)");
        }

        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        let item = items
            .get_mut(&item_id)
            .ok_or_else(|| anyhow::anyhow!("content item {} not found", item_id))?;
        f(item);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get_item(&self, item_id: Uuid) -> Result<Option<ContentItem>> {
        Ok(self.item(item_id))
    }

    async fn set_title(&self, item_id: Uuid, title: &str) -> Result<()> {
        self.mutate(item_id, |item| item.title = title.to_string())
    }

    async fn set_slug(&self, item_id: Uuid, slug: &str) -> Result<()> {
        self.mutate(item_id, |item| item.slug = slug.to_string())
    }

    async fn set_short_description(&self, item_id: Uuid, text: &str) -> Result<()> {
        self.mutate(item_id, |item| item.short_description = text.to_string())
    }

    async fn set_description(&self, item_id: Uuid, text: &str) -> Result<()> {
        self.mutate(item_id, |item| item.description = text.to_string())
    }

    async fn set_tags(&self, item_id: Uuid, tags: &[String]) -> Result<()> {
        self.mutate(item_id, |item| item.tags = tags.to_vec())
    }

    async fn set_image_meta(&self, item_id: Uuid, image_id: Uuid, meta: &ImageMeta) -> Result<()> {
        self.mutate(item_id, |item| {
            if let Some(image) = item.images.iter_mut().find(|i| i.id == image_id) {
                image.meta = meta.clone();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            title: "Walnut Desk".to_string(),
            slug: "walnut-desk".to_string(),
            short_description: String::new(),
            description: "A desk.".to_string(),
            tags: vec!["furniture".to_string()],
            images: vec![ItemImage {
                id: Uuid::new_v4(),
                meta: ImageMeta::default(),
            }],
        }
    }

    #[test]
    fn slugify_collapses_punctuation_runs() {
        assert_eq!(slugify("Walnut Desk — 120cm!"), "walnut-desk-120cm");
        assert_eq!(slugify("  Already-Slugged  "), "already-slugged");
        assert_eq!(slugify("???"), "");
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_writes() {
        let store = InMemoryContentStore::new();
        let item = sample_item();
        let item_id = item.id;
        store.insert_item(item);

        store.set_title(item_id, "Oak Desk").await.unwrap();
        store
            .set_tags(item_id, &["desk".to_string(), "oak".to_string()])
            .await
            .unwrap();

        let updated = store.item(item_id).unwrap();
        assert_eq!(updated.title, "Oak Desk");
        assert_eq!(updated.tags, vec!["desk", "oak"]);
    }

    #[tokio::test]
    async fn injected_write_failure_surfaces_as_error() {
        let store = InMemoryContentStore::new();
        let item = sample_item();
        let item_id = item.id;
        store.insert_item(item);

        store.set_fail_writes(true);
        assert!(store.set_title(item_id, "nope").await.is_err());

        store.set_fail_writes(false);
        assert!(store.set_title(item_id, "ok").await.is_ok());
    }
}
