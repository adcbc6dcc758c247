// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::driver::DriverLimits;

const ENV_PATH: &str = "EVENTS_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/sources.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Source names in dedup priority order (first wins). Unlisted sources go last.
    pub priority: Vec<String>,
    pub run: RunConfig,
    pub predicthq: PredictHqConfig,
    pub serpapi: SerpApiConfig,
    pub ticketmaster: TicketmasterConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            priority: vec![
                "ticketmaster".to_string(),
                "predicthq".to_string(),
                "serpapi".to_string(),
            ],
            run: RunConfig::default(),
            predicthq: PredictHqConfig::default(),
            serpapi: SerpApiConfig::default(),
            ticketmaster: TicketmasterConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Rank of a source in the priority list; lower wins.
    pub fn priority_of(&self, source: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p.eq_ignore_ascii_case(source))
            .unwrap_or(self.priority.len())
    }

    fn sanitize(&mut self) {
        self.priority = self
            .priority
            .iter()
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self.run.default_days = self.run.default_days.max(1);
        self.run.max_requests_per_source = self.run.max_requests_per_source.max(1);
        self.run.request_timeout_secs = self.run.request_timeout_secs.max(1);
        self.run.source_deadline_secs = self.run.source_deadline_secs.max(1);
        self.predicthq.page_size = self.predicthq.page_size.max(1);
        self.predicthq.max_pages = self.predicthq.max_pages.max(1);
        self.serpapi.page_size = self.serpapi.page_size.max(1);
        self.serpapi.max_pages = self.serpapi.max_pages.max(1);
        self.ticketmaster.page_size = self.ticketmaster.page_size.max(1);
        self.ticketmaster.max_pages = self.ticketmaster.max_pages.max(1);
        self.ticketmaster.window_days = self.ticketmaster.window_days.max(1);
        self.ticketmaster.hard_cap = self.ticketmaster.hard_cap.max(self.ticketmaster.page_size);
    }

    /// Replace `api_key = "ENV"` by the provider's env var, for enabled sources only.
    fn resolve_keys(&mut self) -> Result<()> {
        if self.predicthq.enabled {
            self.predicthq.api_key = resolve_key(&self.predicthq.api_key, "PREDICTHQ_API_KEY")?;
        }
        if self.serpapi.enabled {
            self.serpapi.api_key = resolve_key(&self.serpapi.api_key, "SERPAPI_API_KEY")?;
        }
        if self.ticketmaster.enabled {
            self.ticketmaster.api_key =
                resolve_key(&self.ticketmaster.api_key, "TICKETMASTER_API_KEY")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub default_city: String,
    pub default_days: i64,
    pub request_timeout_secs: u64,
    pub source_deadline_secs: u64,
    pub max_requests_per_source: u32,
    pub output_path: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_city: "London".to_string(),
            default_days: 30,
            request_timeout_secs: 20,
            source_deadline_secs: 120,
            max_requests_per_source: 50,
            output_path: PathBuf::from("data/events.jsonl"),
        }
    }
}

impl RunConfig {
    pub fn limits(&self) -> DriverLimits {
        DriverLimits {
            max_requests: self.max_requests_per_source,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            source_deadline: Duration::from_secs(self.source_deadline_secs),
        }
    }
}

/// Radius-based provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictHqConfig {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub page_size: u32,
    pub max_pages: u32,
    /// `"lat,lon"` of the search centre.
    pub origin: String,
    pub radius_km: u32,
    /// Optional `country` request filter.
    pub country_code: Option<String>,
    /// Country written on every event regardless of location. Empty disables the pin.
    pub country_label: Option<String>,
}

impl Default for PredictHqConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: "https://api.predicthq.com/v1/events/".to_string(),
            page_size: 100,
            max_pages: 20,
            origin: "51.5074,-0.1278".to_string(),
            radius_km: 30,
            country_code: Some("GB".to_string()),
            country_label: Some("United Kingdom".to_string()),
        }
    }
}

/// Search-engine-backed provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerpApiConfig {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub page_size: u32,
    /// Fixed request budget, not driven by the response.
    pub max_pages: u32,
    pub hl: String,
    pub gl: String,
    pub default_keyword: Option<String>,
    pub normalization: SerpNormalization,
}

impl Default for SerpApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: "https://serpapi.com/search.json".to_string(),
            page_size: 20,
            max_pages: 10,
            hl: "en".to_string(),
            gl: "us".to_string(),
            default_keyword: None,
            normalization: SerpNormalization::default(),
        }
    }
}

/// Labels stamped on every search result; the engine returns no taxonomy of its own.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerpNormalization {
    pub timezone: Option<String>,
    pub segment: Option<String>,
    pub genre: Option<String>,
    pub category: Option<String>,
    pub labels: Vec<String>,
}

impl Default for SerpNormalization {
    fn default() -> Self {
        Self {
            timezone: Some("Europe/London".to_string()),
            segment: Some("Music".to_string()),
            genre: Some("Pop".to_string()),
            category: Some("concert".to_string()),
            labels: vec!["concert".to_string()],
        }
    }
}

/// Catalog/ticketing provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TicketmasterConfig {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub page_size: u32,
    /// Pages per date window, clamped so `page_size * max_pages <= hard_cap`.
    pub max_pages: u32,
    pub window_days: i64,
    pub hard_cap: u32,
    pub locale: String,
    pub default_keyword: Option<String>,
}

impl Default for TicketmasterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: "https://app.ticketmaster.com/discovery/v2/events.json".to_string(),
            page_size: 100,
            max_pages: 5,
            window_days: 60,
            hard_cap: 1000,
            locale: "*".to_string(),
            default_keyword: None,
        }
    }
}

fn resolve_key(value: &str, env_name: &str) -> Result<String> {
    let v = value.trim();
    let key = if v.eq_ignore_ascii_case("env") {
        std::env::var(env_name).map_err(|_| anyhow!("Missing {env_name} env var"))?
    } else {
        v.to_string()
    };
    if key.trim().is_empty() {
        bail!("source is enabled but its api key is empty (set it or use \"ENV\" with {env_name})");
    }
    Ok(key)
}

pub fn parse_config(s: &str) -> Result<IngestConfig> {
    let mut cfg: IngestConfig = toml::from_str(s).context("parsing ingest config toml")?;
    cfg.sanitize();
    cfg.resolve_keys()?;
    Ok(cfg)
}

/// Load configuration from an explicit TOML file.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    parse_config(&content).with_context(|| format!("in {}", path.display()))
}

/// Load configuration using env var + fallbacks:
/// 1) $EVENTS_CONFIG_PATH
/// 2) config/sources.toml
/// 3) built-in defaults (all sources disabled)
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("EVENTS_CONFIG_PATH points to non-existent path"));
        }
    }
    let default_p = PathBuf::from(DEFAULT_PATH);
    if default_p.exists() {
        return load_config_from(&default_p);
    }
    Ok(IngestConfig::default())
}
