//! Autopilot configuration stored at `.autopilot/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::BudgetLimits;
use crate::core::ranking::RankingCriteria;
use crate::io::workspace::PreloadLimits;

/// Autopilot configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutopilotConfig {
    /// Project name used to key the outcome log.
    pub project: String,

    /// Branch pull requests target and every run returns to.
    pub base_branch: String,

    /// Feature branches are named `<prefix><issue number>`.
    pub branch_prefix: String,

    /// Project context document included in the system prompt.
    pub context_path: Option<PathBuf>,

    /// Coding standards document included in the system prompt.
    pub standards_path: Option<PathBuf>,

    /// Usage ledger and outcome log live here, relative to the config file.
    pub state_dir: PathBuf,

    /// Environment variables whose values are masked in all output.
    pub secret_env: Vec<String>,

    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub orchestrator: OrchestratorConfig,
    pub analysis: AnalysisConfig,
    pub budget: BudgetLimits,
    pub quality: QualityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier; also selects pricing.
    pub name: String,
    /// Completion command; receives the conversation as JSON on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Output tokens assumed per call when checking quota ahead of a request.
    pub expected_output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard ceiling on model replies per implementation run.
    pub max_iterations: u32,
    /// Conversation history cap, in user/assistant pairs.
    pub max_history_pairs: usize,
    pub command_timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub preload_file_chars: usize,
    pub preload_total_chars: usize,
    /// Run quick per-file checks after file-mutating actions.
    pub incremental_validation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_strategies: usize,
    pub max_attempts_per_strategy: u32,
    pub ranking: RankingCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub min_clarity_score: u8,
    /// Halt and ask the author when clarity is below the threshold.
    pub request_clarification: bool,
    /// Let a moderately clear ticket through when it needs few assumptions.
    pub allow_assumptions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Use the tiered gate engine; when false, the legacy combined check runs.
    pub gates: bool,
    /// Include the combined AI review in verification.
    pub review: bool,
    pub min_coverage: f64,
    pub tool_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o".to_string(),
            command: vec!["autopilot-complete".to_string()],
            timeout_secs: 300,
            expected_output_tokens: 2_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_history_pairs: 10,
            command_timeout_secs: 60,
            output_limit_bytes: 100_000,
            preload_file_chars: 12_000,
            preload_total_chars: 48_000,
            incremental_validation: true,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_strategies: 3,
            max_attempts_per_strategy: 3,
            ranking: RankingCriteria::default(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_clarity_score: 70,
            request_clarification: true,
            allow_assumptions: true,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            gates: true,
            review: true,
            min_coverage: 80.0,
            tool_timeout_secs: 300,
        }
    }
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            base_branch: "main".to_string(),
            branch_prefix: "autopilot/issue-".to_string(),
            context_path: None,
            standards_path: None,
            state_dir: PathBuf::from(".autopilot"),
            secret_env: vec![
                "GITHUB_TOKEN".to_string(),
                "GH_TOKEN".to_string(),
                "OPENAI_API_KEY".to_string(),
            ],
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            analysis: AnalysisConfig::default(),
            budget: BudgetLimits::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl AutopilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_branch.trim().is_empty() {
            return Err(anyhow!("base_branch must not be empty"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.agent.max_iterations == 0 {
            return Err(anyhow!("agent.max_iterations must be > 0"));
        }
        if self.agent.command_timeout_secs == 0 {
            return Err(anyhow!("agent.command_timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.orchestrator.max_strategies == 0 {
            return Err(anyhow!("orchestrator.max_strategies must be > 0"));
        }
        if self.orchestrator.max_attempts_per_strategy == 0 {
            return Err(anyhow!("orchestrator.max_attempts_per_strategy must be > 0"));
        }
        if self.analysis.min_clarity_score > 100 {
            return Err(anyhow!("analysis.min_clarity_score must be <= 100"));
        }
        if self.quality.tool_timeout_secs == 0 {
            return Err(anyhow!("quality.tool_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.command_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.quality.tool_timeout_secs)
    }

    pub fn preload_limits(&self) -> PreloadLimits {
        PreloadLimits {
            per_file_chars: self.agent.preload_file_chars,
            total_chars: self.agent.preload_total_chars,
        }
    }

    /// Read the context and standards documents; missing files read as empty.
    pub fn load_documents(&self, base: &Path) -> Result<(String, String)> {
        let read = |path: &Option<PathBuf>| -> Result<String> {
            let Some(path) = path else {
                return Ok(String::new());
            };
            let path = base.join(path);
            if !path.exists() {
                return Ok(String::new());
            }
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
        };
        Ok((read(&self.context_path)?, read(&self.standards_path)?))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutopilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutopilotConfig> {
    if !path.exists() {
        let cfg = AutopilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutopilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutopilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AutopilotConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = AutopilotConfig::default();
        cfg.project = "shop".to_string();
        cfg.orchestrator.ranking.simplicity = 0.2;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "project = \"web\"\n[analysis]\nmin_clarity_score = 60\n[budget]\ndaily_cost_limit = 5.0\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.project, "web");
        assert_eq!(cfg.analysis.min_clarity_score, 60);
        assert!(cfg.analysis.request_clarification);
        assert_eq!(cfg.budget.daily_cost_limit, 5.0);
        assert_eq!(cfg.budget.per_issue_token_limit, 200_000);
        assert_eq!(cfg.agent.max_iterations, 20);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[agent]\nmax_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn missing_documents_read_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("CONTEXT.md"), "a shop").expect("write");
        let cfg = AutopilotConfig {
            context_path: Some(PathBuf::from("CONTEXT.md")),
            standards_path: Some(PathBuf::from("STANDARDS.md")),
            ..AutopilotConfig::default()
        };
        let (context, standards) = cfg.load_documents(temp.path()).expect("load");
        assert_eq!(context, "a shop");
        assert_eq!(standards, "");
    }
}
