use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Thresholds for the behavior state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorConfig {
    /// Scheduling tick (~60 Hz)
    pub tick_interval_ms: u64,
    /// Rolling window for scroll velocity
    pub velocity_window_ms: u64,
    /// Velocity that must be exceeded to start counting a fast scroll
    pub expand_entry_velocity: f64,
    /// Velocity a sustained fast scroll must drop below before it clears
    pub expand_exit_velocity: f64,
    /// How long the entry velocity must hold before EXPAND
    pub expand_sustain_ms: u64,
    /// Minimum time spent in EXPAND before exit is allowed
    pub expand_min_dwell_ms: u64,
    /// Idle time that starts REWRITE
    pub rewrite_idle_start_ms: u64,
    /// Idle thresholds for levels 1..=4
    pub rewrite_level_thresholds_ms: [u64; 4],
    /// Pointer moves shorter than this do not count as interaction
    pub pointer_move_threshold_px: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            velocity_window_ms: 500,
            expand_entry_velocity: 400.0,
            expand_exit_velocity: 150.0,
            expand_sustain_ms: 800,
            expand_min_dwell_ms: 2_000,
            rewrite_idle_start_ms: 5_000,
            rewrite_level_thresholds_ms: [5_000, 15_000, 30_000, 60_000],
            pointer_move_threshold_px: 8.0,
        }
    }
}

/// Discovery, visibility and persistence settings for the chunk registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    pub content_root: String,
    pub candidate_tags: Vec<String>,
    /// Elements with one of these tags, or inside one, are never chunks
    pub denylist_tags: Vec<String>,
    /// Explicit opt-out marker
    pub denylist_attribute: String,
    pub min_word_count: usize,
    pub visibility_margin_px: u32,
    pub visibility_threshold: f64,
    pub structure_debounce_ms: u64,
    pub storage_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            content_root: "main".into(),
            candidate_tags: ["p", "li", "blockquote", "h2", "h3", "h4", "figcaption"]
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
            denylist_tags: [
                "nav", "pre", "code", "script", "style", "button", "header", "footer",
            ]
            .iter()
            .map(|tag| tag.to_string())
            .collect(),
            denylist_attribute: "data-no-transform".into(),
            min_word_count: 5,
            visibility_margin_px: 100,
            visibility_threshold: 0.1,
            structure_debounce_ms: 100,
            storage_prefix: "palimpsest:".into(),
        }
    }
}

/// Fuzzy-match calibration. Kept together so thresholds can be tuned without
/// touching the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchPolicy {
    /// Keys shorter than this (normalized chars) are never indexed
    pub min_key_chars: usize,
    /// Word-overlap score must exceed this
    pub overlap_threshold: f64,
    /// Minimum significant words in the chunk for word-overlap matching
    pub min_significant_words: usize,
    /// Words longer than this count as significant
    pub significant_word_min_len: usize,
    /// Replacement must be at least this fraction of the original length
    pub min_length_ratio: f64,
    /// Shortest text accepted as valid content
    pub min_valid_chars: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            min_key_chars: 20,
            overlap_threshold: 0.6,
            min_significant_words: 3,
            significant_word_min_len: 4,
            min_length_ratio: 0.5,
            min_valid_chars: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub min_cycle_interval_ms: u64,
    pub stagger_min_ms: u64,
    pub stagger_max_ms: u64,
    pub poll_interval_ms: u64,
    pub marker_attribute: String,
    /// Markers older than this are force-cleared by the sweep
    pub marker_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub content_map_ttl_secs: u64,
    /// Upper bound on waiting for one scramble to settle
    pub animation_timeout_ms: u64,
    pub live_generation: bool,
    /// Stored versions scored below this are never shown
    pub min_version_score: f64,
    pub match_policy: MatchPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            min_cycle_interval_ms: 4_000,
            stagger_min_ms: 200,
            stagger_max_ms: 500,
            poll_interval_ms: 250,
            marker_attribute: "data-transforming".into(),
            marker_timeout_ms: 8_000,
            sweep_interval_ms: 2_000,
            content_map_ttl_secs: 300,
            animation_timeout_ms: 6_000,
            live_generation: true,
            min_version_score: 6.0,
            match_policy: MatchPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrambleConfig {
    pub frame_interval_ms: u64,
    /// Start ticks are drawn from `0..start_range_ticks`
    pub start_range_ticks: u32,
    pub min_duration_ticks: u32,
    pub max_duration_ticks: u32,
    /// Extra start/end delay per character index, for a left-to-right settle
    pub stagger_per_index: f64,
    /// Chance a scrambling position draws a new filler on a given tick
    pub reroll_chance: f64,
    pub filler_chars: String,
}

impl Default for ScrambleConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            start_range_ticks: 12,
            min_duration_ticks: 8,
            max_duration_ticks: 24,
            stagger_per_index: 0.4,
            reroll_chance: 0.28,
            filler_chars: "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!<>-_\\/[]{}=+*^?#"
                .into(),
        }
    }
}

/// Per type-key keep rates for the scoring sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingRates {
    pub expand_pregenerated: f64,
    pub expand_live: f64,
    /// Index 0 is level 1
    pub rewrite_levels: Vec<f64>,
    /// Used for rewrite levels not covered by `rewrite_levels`
    pub rewrite_fallback: f64,
}

impl Default for SamplingRates {
    fn default() -> Self {
        Self {
            expand_pregenerated: 0.0,
            expand_live: 1.0,
            rewrite_levels: vec![0.3, 0.5, 1.0, 1.0],
            rewrite_fallback: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseFormat {
    Compact,
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationConfig {
    pub rates: SamplingRates,
    /// Text fields are cut to this many chars in the scoring request
    pub max_field_chars: usize,
    pub response_format: ResponseFormat,
    pub pass_threshold: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            rates: SamplingRates::default(),
            max_field_chars: 600,
            response_format: ResponseFormat::Compact,
            pass_threshold: 6.0,
        }
    }
}

/// Remote endpoints. An empty base URL disables the HTTP client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicesConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub behavior: BehaviorConfig,
    pub registry: RegistryConfig,
    pub orchestrator: OrchestratorConfig,
    pub scramble: ScrambleConfig,
    pub evaluation: EvaluationConfig,
    pub services: ServicesConfig,
    /// Mirror every telemetry event to the log
    pub debug: bool,
}

impl EngineConfig {
    /// Apply `PALIMPSEST_DEBUG` on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("PALIMPSEST_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_mode {
            self.debug = true;
            self.orchestrator.poll_interval_ms = self.orchestrator.poll_interval_ms.min(100);
        }
        self
    }
}

/// JSON-file backed engine configuration.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<EngineConfig>,
}

impl ConfigStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(err) => {
                    log_warn!("Ignoring malformed config {}: {err}", path.display());
                    EngineConfig::default()
                }
            }
        } else {
            EngineConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> EngineConfig {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, config: EngineConfig) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = config;
        self.persist(&guard)
    }

    fn persist(&self, data: &EngineConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}
