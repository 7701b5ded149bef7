use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AnalysisError;

/// Most angles the server analyzes per document.
pub const MAX_ANGLES: usize = 8;
pub const MAX_ANGLE_TITLE_CHARS: usize = 80;
pub const MAX_ANGLE_PROMPT_CHARS: usize = 4000;
pub const MIN_INPUT_CHARS: u32 = 2_000;
pub const MAX_INPUT_CHARS: u32 = 30_000;
pub const MAX_PARALLEL_LIMIT: u8 = 8;

/// Angles used when none are configured.
pub const DEFAULT_ANGLES: &[(&str, &str)] = &[
    (
        "Research question",
        "Identify the core problem the paper addresses, its scope and target setting, and the authors' motivation and claimed value.",
    ),
    (
        "Methodology and experimental design",
        "Analyze the method, key assumptions, datasets, baselines and controls, and judge whether the design supports the conclusions.",
    ),
    (
        "Core contributions",
        "Identify what differs from prior work, separate genuine novelty from engineering integration, and state the concrete benefit of each.",
    ),
    (
        "Results and strength of evidence",
        "Summarize the main results and check significance, ablations and error analysis, pointing out where the evidence is weak.",
    ),
    (
        "Limitations and risks",
        "Assess limitations, data bias, generalization risk and potential harm, giving a risk level and the conditions that trigger it.",
    ),
    (
        "Reproducibility and implementation",
        "From a reproduction and deployment standpoint, list resource needs, implementation steps, key dependencies and a validation path.",
    ),
];

/// One analytical angle: a tab title and the instruction sent for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AngleSpec {
    pub title: String,
    pub prompt: String,
}

impl AngleSpec {
    pub fn new(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        DEFAULT_ANGLES
            .iter()
            .map(|(title, prompt)| Self::new(*title, *prompt))
            .collect()
    }
}

/// How the server orders angle work inside one document's stream. Has no
/// effect on how many documents run at once on this side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    #[default]
    High,
}

/// Model endpoint and credentials, forwarded to the analysis server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Connection {
    pub fn from_env() -> Self {
        Self {
            base_url: dotenv::var("LLM_BASE_URL").unwrap_or_default(),
            api_key: dotenv::var("LLM_API_KEY").unwrap_or_default(),
            model: dotenv::var("LLM_MODEL").unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let missing: Vec<&str> = [
            ("LLM_BASE_URL", &self.base_url),
            ("LLM_API_KEY", &self.api_key),
            ("LLM_MODEL", &self.model),
        ]
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AnalysisError::precondition(format!(
                "Model connection is not configured (missing {})",
                missing.join(", ")
            )))
        }
    }
}

/// User-tunable analysis parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSettings {
    pub angles: Vec<AngleSpec>,
    pub user_prompt: Option<String>,
    pub max_input_chars: u32,
    pub stream_mode: StreamMode,
    /// Advisory cap on concurrent angle streams, honoured by the server.
    pub parallel_limit: u8,
    pub enable_reasoning: bool,
    pub reasoning_effort: ReasoningEffort,
    pub enable_final_report: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            angles: AngleSpec::defaults(),
            user_prompt: None,
            max_input_chars: MAX_INPUT_CHARS,
            stream_mode: StreamMode::Sequential,
            parallel_limit: 3,
            enable_reasoning: false,
            reasoning_effort: ReasoningEffort::High,
            enable_final_report: false,
        }
    }
}

impl AnalysisSettings {
    /// Angles with a non-blank title and prompt, trimmed, capped at
    /// [`MAX_ANGLES`]. Only the first angle with a given title is kept.
    pub fn valid_angles(&self) -> Vec<AngleSpec> {
        let mut seen = HashSet::new();
        self.angles
            .iter()
            .map(|s| AngleSpec::new(s.title.trim(), s.prompt.trim()))
            .filter(|s| !s.title.is_empty() && !s.prompt.is_empty())
            .filter(|s| {
                let first = seen.insert(s.title.clone());
                if !first {
                    warn!(title = %s.title, "duplicate angle title ignored");
                }
                first
            })
            .take(MAX_ANGLES)
            .collect()
    }

    /// Build the wire options, failing on anything the server would reject.
    pub fn build_options(&self, conn: &Connection) -> Result<AnalyzeOptions, AnalysisError> {
        conn.validate()?;
        let angle_specs = self.valid_angles();
        if angle_specs.is_empty() {
            return Err(AnalysisError::precondition(
                "Configure at least one analysis angle with a title and a prompt",
            ));
        }
        if let Some(spec) = angle_specs
            .iter()
            .find(|s| s.title.chars().count() > MAX_ANGLE_TITLE_CHARS)
        {
            return Err(AnalysisError::precondition(format!(
                "Angle title is longer than {} characters: {}",
                MAX_ANGLE_TITLE_CHARS, spec.title
            )));
        }
        if let Some(spec) = angle_specs
            .iter()
            .find(|s| s.prompt.chars().count() > MAX_ANGLE_PROMPT_CHARS)
        {
            return Err(AnalysisError::precondition(format!(
                "Prompt for angle '{}' is longer than {} characters",
                spec.title, MAX_ANGLE_PROMPT_CHARS
            )));
        }

        Ok(AnalyzeOptions {
            api_key: conn.api_key.trim().to_string(),
            base_url: conn.base_url.trim().to_string(),
            model: conn.model.trim().to_string(),
            angle_specs,
            user_prompt: self
                .user_prompt
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            max_input_chars: self.max_input_chars.clamp(MIN_INPUT_CHARS, MAX_INPUT_CHARS),
            stream_mode: self.stream_mode,
            parallel_limit: self.parallel_limit.clamp(1, MAX_PARALLEL_LIMIT),
            enable_reasoning: self.enable_reasoning,
            reasoning_effort: self.reasoning_effort,
            enable_final_report: self.enable_final_report,
        })
    }
}

/// The `options_json` part of a streaming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzeOptions {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub angle_specs: Vec<AngleSpec>,
    pub user_prompt: Option<String>,
    pub max_input_chars: u32,
    pub stream_mode: StreamMode,
    pub parallel_limit: u8,
    pub enable_reasoning: bool,
    pub reasoning_effort: ReasoningEffort,
    pub enable_final_report: bool,
}

impl AnalyzeOptions {
    pub fn angle_titles(&self) -> Vec<String> {
        self.angle_specs.iter().map(|s| s.title.clone()).collect()
    }
}

/// Read angle specs from a JSON array of `{title, prompt}`.
pub fn load_angle_specs(path: &Path) -> Result<Vec<AngleSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read angle specs from {}", path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse angle specs JSON")
}
