//! Persisted model: normalizer plus classifier, tagged with the schema it was
//! written under.

use std::{
    collections::BTreeMap,
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::VectorizerConfig,
    error::{ActionError, Result},
    pipeline::{MlpClassifier, NormalizationParams},
    types::{FEATURE_DIM, Label},
};

/// Bump when the feature layout, label set or serialized shape changes.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub clips: usize,
    pub windows: usize,
    pub samples_per_label: BTreeMap<Label, usize>,
    pub epochs: usize,
    pub final_loss: f64,
    pub converged: bool,
    pub training_accuracy: f64,
}

/// Read-only once built. Share it through `Arc`; retraining produces a new
/// value and a new file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    schema_version: u32,
    feature_dim: usize,
    labels: Vec<Label>,
    vectorizer: VectorizerConfig,
    normalizer: NormalizationParams,
    classifier: MlpClassifier,
    summary: TrainingSummary,
}

/// Fields checked before the full document is decoded, so an incompatible
/// artifact is reported as such rather than as a shape error.
#[derive(Deserialize)]
struct ArtifactHeader {
    schema_version: u32,
    feature_dim: usize,
    labels: Vec<String>,
}

impl TrainedModel {
    pub(crate) fn new(
        vectorizer: VectorizerConfig,
        normalizer: NormalizationParams,
        classifier: MlpClassifier,
        summary: TrainingSummary,
    ) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            feature_dim: classifier.input_dim(),
            labels: Label::ALL.to_vec(),
            vectorizer,
            normalizer,
            classifier,
            summary,
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn vectorizer_config(&self) -> &VectorizerConfig {
        &self.vectorizer
    }

    pub fn normalizer(&self) -> &NormalizationParams {
        &self.normalizer
    }

    pub fn classifier(&self) -> &MlpClassifier {
        &self.classifier
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    /// Writes to a temporary sibling and renames it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        write_atomically(path, |writer| {
            serde_json::to_writer_pretty(writer, self)?;
            Ok(())
        })?;

        log::info!(
            "wrote model artifact v{} ({} features, layers {:?}) to {}",
            self.schema_version,
            self.feature_dim,
            self.classifier.layer_sizes(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let model = Self::from_json(&content).map_err(|err| match err {
            ActionError::ModelLoad(msg) => {
                ActionError::ModelLoad(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        log::info!(
            "loaded model artifact v{} from {} (trained on {} clips)",
            model.schema_version,
            path.display(),
            model.summary.clips
        );
        Ok(model)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let header: ArtifactHeader = serde_json::from_str(content)
            .map_err(|err| ActionError::ModelLoad(format!("unreadable artifact header: {err}")))?;

        if header.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(ActionError::ModelLoad(format!(
                "artifact schema version {} is not supported (expected {ARTIFACT_SCHEMA_VERSION})",
                header.schema_version
            )));
        }
        if header.feature_dim != FEATURE_DIM {
            return Err(ActionError::ModelLoad(format!(
                "artifact expects {} features but the vectorizer produces {FEATURE_DIM}",
                header.feature_dim
            )));
        }
        let expected: Vec<&str> = Label::ALL.iter().map(|l| l.as_str()).collect();
        if header.labels != expected {
            return Err(ActionError::ModelLoad(format!(
                "artifact labels {:?} do not match {:?}",
                header.labels, expected
            )));
        }

        let model: Self = serde_json::from_str(content)
            .map_err(|err| ActionError::ModelLoad(format!("malformed artifact: {err}")))?;
        model.check_consistency()?;
        Ok(model)
    }

    fn check_consistency(&self) -> Result<()> {
        let as_load_error = |err: ActionError| ActionError::ModelLoad(err.to_string());
        self.vectorizer.validate().map_err(as_load_error)?;
        self.normalizer.validate().map_err(as_load_error)?;
        self.classifier.validate().map_err(as_load_error)?;
        let dims = [self.normalizer.dim(), self.classifier.input_dim()];
        if dims.iter().any(|&d| d != self.feature_dim) {
            return Err(ActionError::ModelLoad(format!(
                "normalizer ({}) and classifier ({}) dimensions disagree with feature_dim {}",
                self.normalizer.dim(),
                self.classifier.input_dim(),
                self.feature_dim
            )));
        }
        Ok(())
    }
}

/// Writes `path` through a `.partial` sibling that is synced and renamed into
/// place. The sibling is removed when writing fails.
fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<fs::File>) -> Result<()>,
) -> Result<()> {
    let tmp_path = path.with_extension("partial");
    let written = fs::File::create(&tmp_path)
        .map_err(ActionError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        });
    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            log::warn!("could not remove {}: {cleanup}", tmp_path.display());
        }
        return Err(err);
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
