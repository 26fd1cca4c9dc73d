use crate::budget::KAllocSettings;
use crate::cooldown::CooldownConfig;
use crate::fusion::{AuthorityConfig, FusionConfig};
use crate::orchestrator::order::OrderMode;
use crate::orchestrator::repair::RepairConfig;
use crate::orchestrator::risk::RiskConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub kalloc: KAllocSettings,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub lore: LoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Final fused top-K before risk deceleration
    pub top_k: usize,
    /// `normal`, `off` or `exploration`
    pub memory_mode: String,
    pub locale: Option<String>,
    pub order_mode: OrderMode,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            memory_mode: "normal".to_string(),
            locale: Some("ko".to_string()),
            order_mode: OrderMode::Heuristic,
        }
    }
}

/// Per-stage time budgets in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Heavy source adapters (web, vector, kg, recall, repair)
    pub source_ms: u64,
    /// LLM-backed stages (self-ask, analyze, entity extraction)
    pub llm_stage_ms: u64,
    /// In-process stages (memory, alias correction)
    pub local_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            source_ms: 4000,
            llm_stage_ms: 8000,
            local_ms: 500,
        }
    }
}

impl TimeoutConfig {
    pub fn source(&self) -> Duration {
        Duration::from_millis(self.source_ms)
    }

    pub fn llm_stage(&self) -> Duration {
        Duration::from_millis(self.llm_stage_ms)
    }

    pub fn local(&self) -> Duration {
        Duration::from_millis(self.local_ms)
    }
}

/// High-priority recall set folded in ahead of vector results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub min_score: f64,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 4,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoreConfig {
    pub enabled: bool,
    /// Directory of `*.toml` lore catalogs
    pub catalog_dir: Option<PathBuf>,
}

impl Default for LoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            catalog_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            // Create default config
            let config = OrchestratorConfig::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load and validate configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: OrchestratorConfig =
            toml::from_str(contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;

        Ok(home.join(".evidence-orchestrator").join("config.toml"))
    }

    /// Reject settings the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        let k = &self.kalloc;
        if 3 * k.min_per_source > k.max_total_k {
            bail!(
                "kalloc.max_total_k ({}) must be at least 3 x min_per_source ({})",
                k.max_total_k,
                k.min_per_source
            );
        }
        if k.pool_multiplier == 0 {
            bail!("kalloc.pool_multiplier must be positive");
        }

        if self.cooldown.failure_threshold == 0 {
            bail!("cooldown.failure_threshold must be positive");
        }
        if self.cooldown.window_ms == 0 {
            bail!("cooldown.window_ms must be positive");
        }
        if self.cooldown.base_cooldown_ms > self.cooldown.max_cooldown_ms {
            bail!("cooldown.base_cooldown_ms exceeds max_cooldown_ms");
        }

        if !(self.fusion.rrf_k.is_finite() && self.fusion.rrf_k > 0.0) {
            bail!("fusion.rrf_k must be a positive number");
        }
        if !(self.fusion.recency.window_days.is_finite() && self.fusion.recency.window_days > 0.0) {
            bail!("fusion.recency.window_days must be a positive number");
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be positive");
        }

        let t = &self.timeouts;
        if t.source_ms == 0 || t.llm_stage_ms == 0 || t.local_ms == 0 {
            bail!("timeouts must be positive");
        }

        if self.risk.medium_threshold > self.risk.high_threshold {
            bail!("risk.medium_threshold exceeds risk.high_threshold");
        }

        Ok(())
    }

    /// Memory stage globally disabled
    pub fn memory_disabled(&self) -> bool {
        self.retrieval.memory_mode.eq_ignore_ascii_case("off")
    }
}
