use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub openai_api_key: String,
    /// Commerce platform admin API (products).
    pub store_api_url: String,
    pub store_api_token: String,
    /// SEO plugin API. Defaults to the store API when the plugin is
    /// served from the same host.
    pub seo_api_url: String,
    pub seo_api_token: String,
    /// Score ceiling of the active SEO provider.
    pub seo_max_score: i32,
    pub seo_supports_scoring: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let store_api_url = env::var("STORE_API_URL").context("STORE_API_URL must be set")?;
        let store_api_token =
            env::var("STORE_API_TOKEN").context("STORE_API_TOKEN must be set")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            openai_api_key: env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set")?,
            seo_api_url: env::var("SEO_API_URL").unwrap_or_else(|_| store_api_url.clone()),
            seo_api_token: env::var("SEO_API_TOKEN")
                .unwrap_or_else(|_| store_api_token.clone()),
            seo_max_score: env::var("SEO_MAX_SCORE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("SEO_MAX_SCORE must be a valid number")?,
            seo_supports_scoring: env::var("SEO_SUPPORTS_SCORING")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            store_api_url,
            store_api_token,
        })
    }
}
