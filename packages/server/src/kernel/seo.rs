//! SEO field provider capability.
//!
//! Wraps whichever SEO plugin/provider owns focus keywords, meta
//! descriptions, and the numeric quality score. Scoring support is
//! provider-dependent, so the capability is explicit about it.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SEO fields attached to a content item by the active provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeoFields {
    pub focus_keyword: String,
    pub meta_description: String,
}

/// What the active provider can do.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SeoCapabilities {
    pub supports_scoring: bool,
    /// Upper bound of the provider's score scale. Some providers cap at
    /// 95 rather than 100; restore thresholds are clamped to this.
    pub max_score: i32,
}

impl Default for SeoCapabilities {
    fn default() -> Self {
        Self {
            supports_scoring: true,
            max_score: 100,
        }
    }
}

/// Capability trait for the SEO plugin integration.
#[async_trait]
pub trait SeoFieldProvider: Send + Sync {
    async fn get_fields(&self, item_id: Uuid) -> Result<SeoFields>;

    async fn set_fields(&self, item_id: Uuid, fields: &SeoFields) -> Result<()>;

    /// Current quality score, or `None` when the provider cannot score.
    async fn get_score(&self, item_id: Uuid) -> Result<Option<i32>>;

    /// Ask the provider to recompute the score for an item.
    ///
    /// At-least-once, unknown latency; callers must not assume the new
    /// score is available when this returns.
    async fn refresh_score(&self, item_id: Uuid) -> Result<()>;

    fn capabilities(&self) -> SeoCapabilities;
}

// =============================================================================
// REST adapter
// =============================================================================

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: Option<i32>,
}

/// SEO provider backed by the platform plugin's REST API.
pub struct RestSeoProvider {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
    capabilities: SeoCapabilities,
}

impl RestSeoProvider {
    pub fn new(base_url: String, api_token: String, capabilities: SeoCapabilities) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            client,
            capabilities,
        })
    }
}

#[async_trait]
impl SeoFieldProvider for RestSeoProvider {
    async fn get_fields(&self, item_id: Uuid) -> Result<SeoFields> {
        let url = format!("{}/seo/{}/fields", self.base_url, item_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Failed to fetch SEO fields")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("SEO field fetch failed with {}", status);
        }

        response.json().await.context("Failed to parse SEO fields")
    }

    async fn set_fields(&self, item_id: Uuid, fields: &SeoFields) -> Result<()> {
        let url = format!("{}/seo/{}/fields", self.base_url, item_id);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(fields)
            .send()
            .await
            .context("Failed to send SEO field update")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("SEO field update failed with {}", status);
        }

        Ok(())
    }

    async fn get_score(&self, item_id: Uuid) -> Result<Option<i32>> {
        if !self.capabilities.supports_scoring {
            return Ok(None);
        }

        let url = format!("{}/seo/{}/score", self.base_url, item_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Failed to fetch SEO score")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("SEO score fetch failed with {}", status);
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .context("Failed to parse SEO score response")?;

        Ok(parsed.score)
    }

    async fn refresh_score(&self, item_id: Uuid) -> Result<()> {
        let url = format!("{}/seo/{}/score/refresh", self.base_url, item_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Failed to request score refresh")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("SEO score refresh failed with {}", status);
        }

        Ok(())
    }

    fn capabilities(&self) -> SeoCapabilities {
        self.capabilities
    }
}

// =============================================================================
// In-memory double
// =============================================================================

/// In-memory SEO provider for tests.
#[derive(Default)]
pub struct InMemorySeoProvider {
    fields: RwLock<HashMap<Uuid, SeoFields>>,
    scores: RwLock<HashMap<Uuid, i32>>,
    refresh_requests: RwLock<Vec<Uuid>>,
    capabilities: RwLock<SeoCapabilities>,
}

impl InMemorySeoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_score(&self, item_id: Uuid, score: i32) {
        self.scores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item_id, score);
    }

    pub fn set_capabilities(&self, capabilities: SeoCapabilities) {
        *self
            .capabilities
            .write()
            .unwrap_or_else(|e| e.into_inner()) = capabilities;
    }

    pub fn fields_for(&self, item_id: Uuid) -> SeoFields {
        self.fields
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&item_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Items whose score recompute has been requested, in order.
    pub fn refresh_requests(&self) -> Vec<Uuid> {
        self.refresh_requests
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SeoFieldProvider for InMemorySeoProvider {
    async fn get_fields(&self, item_id: Uuid) -> Result<SeoFields> {
        Ok(self.fields_for(item_id))
    }

    async fn set_fields(&self, item_id: Uuid, fields: &SeoFields) -> Result<()> {
        self.fields
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item_id, fields.clone());
        Ok(())
    }

    async fn get_score(&self, item_id: Uuid) -> Result<Option<i32>> {
        if !self.capabilities().supports_scoring {
            return Ok(None);
        }

        Ok(self
            .scores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&item_id)
            .copied())
    }

    async fn refresh_score(&self, item_id: Uuid) -> Result<()> {
        self.refresh_requests
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(item_id);
        Ok(())
    }

    fn capabilities(&self) -> SeoCapabilities {
        *self
            .capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_provider_round_trips_fields() {
        let provider = InMemorySeoProvider::new();
        let item_id = Uuid::new_v4();

        let fields = SeoFields {
            focus_keyword: "walnut desk".to_string(),
            meta_description: "A sturdy walnut desk.".to_string(),
        };
        provider.set_fields(item_id, &fields).await.unwrap();

        assert_eq!(provider.get_fields(item_id).await.unwrap(), fields);
    }

    #[tokio::test]
    async fn scoring_respects_capabilities() {
        let provider = InMemorySeoProvider::new();
        let item_id = Uuid::new_v4();
        provider.set_score(item_id, 82);

        assert_eq!(provider.get_score(item_id).await.unwrap(), Some(82));

        provider.set_capabilities(SeoCapabilities {
            supports_scoring: false,
            max_score: 100,
        });
        assert_eq!(provider.get_score(item_id).await.unwrap(), None);
    }
}
