//! Runtime configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ActionError, Result};

pub const DEFAULT_CONFIG_FILENAME: &str = "action-reasoner.toml";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vectorizer: VectorizerConfig,
    pub normalizer: NormalizerConfig,
    pub classifier: ClassifierConfig,
    pub aggregator: AggregatorConfig,
    pub reasoning: ReasoningConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerConfig {
    /// Joints below this confidence are treated as missing.
    pub min_joint_confidence: f32,
    /// Frames per classification window.
    pub window_size: usize,
    /// Frames between window starts.
    pub window_stride: usize,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            min_joint_confidence: 0.05,
            window_size: 1,
            window_stride: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    #[default]
    Standard,
    MinMax,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub mode: ScalingMode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    /// L2 penalty.
    pub alpha: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub tolerance: f64,
    pub n_iter_no_change: usize,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 64],
            learning_rate: 1e-3,
            alpha: 1e-4,
            batch_size: 200,
            max_epochs: 500,
            tolerance: 1e-4,
            n_iter_no_change: 10,
            seed: 42,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Highest summed probability over the windows that voted for the label.
    #[default]
    SummedMass,
    /// Lowest label index.
    FirstLabel,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceRule {
    /// Mean probability of the winner over the windows that voted for it.
    #[default]
    MeanWinningProbability,
    /// Winning votes divided by total windows.
    VoteFraction,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub tie_break: TieBreak,
    pub confidence: ConfidenceRule,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl VectorizerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_joint_confidence) {
            return Err(ActionError::Config(format!(
                "vectorizer.min_joint_confidence must be in [0, 1], got {}",
                self.min_joint_confidence
            )));
        }
        if self.window_size == 0 || self.window_stride == 0 {
            return Err(ActionError::Config(format!(
                "vectorizer window_size and window_stride must be positive, got {} and {}",
                self.window_size, self.window_stride
            )));
        }
        Ok(())
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_layers.iter().any(|&n| n == 0) {
            return Err(ActionError::Config(format!(
                "classifier.hidden_layers must not contain zero-width layers, got {:?}",
                self.hidden_layers
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ActionError::Config(format!(
                "classifier.learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return Err(ActionError::Config(format!(
                "classifier.alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(ActionError::Config(format!(
                "classifier.tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if self.batch_size == 0 || self.max_epochs == 0 || self.n_iter_no_change == 0 {
            return Err(ActionError::Config(
                "classifier batch_size, max_epochs and n_iter_no_change must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.vectorizer.validate()?;
        self.classifier.validate()?;

        let r = &self.reasoning;
        if !(0.0..=2.0).contains(&r.temperature) {
            return Err(ActionError::Config(format!(
                "reasoning.temperature must be in [0, 2], got {}",
                r.temperature
            )));
        }
        if r.timeout_secs == 0 {
            return Err(ActionError::Config(
                "reasoning.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the default file if present,
    /// otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILENAME)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ActionError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.vectorizer.window_size, 1);
        assert_eq!(config.classifier.hidden_layers, vec![128, 64]);
        assert_eq!(config.classifier.seed, 42);
        assert_eq!(config.aggregator.tie_break, TieBreak::SummedMass);
        assert_eq!(
            config.aggregator.confidence,
            ConfidenceRule::MeanWinningProbability
        );
        assert_eq!(config.reasoning.model, "gpt-4o-mini");
    }

    #[test]
    fn toml_contains_every_section() {
        let toml = Config::default().to_toml().unwrap();
        for section in [
            "[vectorizer]",
            "[normalizer]",
            "[classifier]",
            "[aggregator]",
            "[reasoning]",
        ] {
            assert!(toml.contains(section), "missing {section}");
        }
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.normalizer.mode = ScalingMode::MinMax;
        config.aggregator.confidence = ConfidenceRule::VoteFraction;
        config.vectorizer.window_size = 5;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[aggregator]\ntie_break = \"first_label\"\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.aggregator.tie_break, TieBreak::FirstLabel);
        assert_eq!(loaded.classifier, ClassifierConfig::default());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut config = Config::default();
        config.vectorizer.window_size = 0;
        assert!(matches!(config.validate(), Err(ActionError::Config(_))));

        let mut config = Config::default();
        config.classifier.hidden_layers = vec![32, 0];
        assert!(matches!(config.validate(), Err(ActionError::Config(_))));

        let mut config = Config::default();
        config.reasoning.temperature = 3.0;
        assert!(matches!(config.validate(), Err(ActionError::Config(_))));
    }
}
