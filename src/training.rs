use std::collections::BTreeMap;

use crate::{
    artifact::{TrainedModel, TrainingSummary},
    config::{ClassifierConfig, Config, ScalingMode, VectorizerConfig},
    error::{ActionError, Result},
    pipeline::{KeypointVectorizer, MlpClassifier, NormalizationParams, TrainingEvent},
    types::{FeatureVector, KeypointSequence, Label},
};

/// One labelled clip as found on disk. The label stays a raw string until
/// training validates it.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingClip {
    pub sequence: KeypointSequence,
    pub label: String,
}

impl TrainingClip {
    pub fn new(sequence: KeypointSequence, label: impl Into<String>) -> Self {
        Self {
            sequence,
            label: label.into(),
        }
    }
}

pub struct Trainer {
    vectorizer_cfg: VectorizerConfig,
    scaling: ScalingMode,
    classifier_cfg: ClassifierConfig,
}

impl Trainer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            vectorizer_cfg: cfg.vectorizer.clone(),
            scaling: cfg.normalizer.mode,
            classifier_cfg: cfg.classifier.clone(),
        }
    }

    /// Vectorizes every clip, fits the normalizer and classifier and returns
    /// the combined artifact. Any bad clip aborts the run.
    pub fn train(
        &self,
        clips: &BTreeMap<String, TrainingClip>,
        mut on_event: impl FnMut(TrainingEvent),
    ) -> Result<TrainedModel> {
        self.vectorizer_cfg.validate()?;
        self.classifier_cfg.validate()?;
        if clips.is_empty() {
            return Err(ActionError::Data("no training clips provided".to_string()));
        }

        let labelled = clips
            .iter()
            .map(|(id, clip)| {
                clip.label
                    .parse::<Label>()
                    .map(|label| (id.as_str(), label, &clip.sequence))
                    .map_err(|_| {
                        ActionError::Config(format!(
                            "clip '{id}' has unknown label '{}'",
                            clip.label
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let vectorizer = KeypointVectorizer::new(&self.vectorizer_cfg);
        let mut raw: Vec<FeatureVector> = Vec::new();
        let mut labels: Vec<Label> = Vec::new();
        for (id, label, sequence) in &labelled {
            let windows = vectorizer
                .vectorize_windows(sequence)
                .map_err(|err| err.in_clip(id))?;
            log::debug!(
                "clip '{id}' ({label}): {} frames -> {} windows",
                sequence.len(),
                windows.len()
            );
            labels.extend(std::iter::repeat(*label).take(windows.len()));
            raw.extend(windows);
        }

        let mut samples_per_label = BTreeMap::new();
        for label in &labels {
            *samples_per_label.entry(*label).or_insert(0usize) += 1;
        }
        log::info!(
            "built dataset: {} clips, {} samples x {} features, per label {:?}",
            labelled.len(),
            raw.len(),
            vectorizer.feature_dim(),
            samples_per_label
        );

        let normalizer = NormalizationParams::fit(&raw, self.scaling)?;
        let scaled = normalizer.apply_all(&raw)?;

        let mut epochs = 0;
        let mut final_loss = f64::NAN;
        let mut converged = false;
        let classifier = MlpClassifier::train(&scaled, &labels, &self.classifier_cfg, |evt| {
            if let TrainingEvent::Finished {
                epochs: e,
                loss,
                converged: c,
            } = &evt
            {
                epochs = *e;
                final_loss = *loss;
                converged = *c;
            }
            on_event(evt);
        })?;

        let training_accuracy = classifier.accuracy(&scaled, &labels)?;
        log::info!(
            "trained classifier {:?}: {epochs} epochs, loss {final_loss:.4}, accuracy {:.3}",
            classifier.layer_sizes(),
            training_accuracy
        );

        let summary = TrainingSummary {
            clips: labelled.len(),
            windows: raw.len(),
            samples_per_label,
            epochs,
            final_loss,
            converged,
            training_accuracy,
        };
        Ok(TrainedModel::new(
            self.vectorizer_cfg.clone(),
            normalizer,
            classifier,
            summary,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Keypoint, KeypointFrame, NUM_JOINTS};

    fn clip(seed: f32, frames: usize) -> KeypointSequence {
        KeypointSequence::new(
            (0..frames)
                .map(|f| {
                    KeypointFrame::new(
                        (0..NUM_JOINTS)
                            .map(|j| {
                                Keypoint::new(seed * 40.0 + j as f32, seed * 20.0 + f as f32, 0.9)
                            })
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    fn quick_config() -> Config {
        let mut cfg = Config::default();
        cfg.classifier.hidden_layers = vec![16];
        cfg.classifier.max_epochs = 50;
        cfg
    }

    #[test]
    fn unknown_label_names_the_clip() {
        let mut clips = BTreeMap::new();
        clips.insert("a".to_string(), TrainingClip::new(clip(0.0, 3), "open_door"));
        clips.insert("jump/take1".to_string(), TrainingClip::new(clip(1.0, 3), "jump"));

        let err = Trainer::new(&quick_config()).train(&clips, |_| {}).unwrap_err();
        assert!(matches!(err, ActionError::Config(_)));
        assert!(err.to_string().contains("jump/take1"), "{err}");
    }

    #[test]
    fn empty_clip_is_reported_with_its_id() {
        let mut clips = BTreeMap::new();
        clips.insert("good".to_string(), TrainingClip::new(clip(0.0, 3), "open_door"));
        clips.insert(
            "pick_book/empty".to_string(),
            TrainingClip::new(KeypointSequence::default(), "pick_book"),
        );

        let err = Trainer::new(&quick_config()).train(&clips, |_| {}).unwrap_err();
        assert!(matches!(err, ActionError::Data(_)));
        assert!(err.to_string().contains("pick_book/empty"), "{err}");
    }

    #[test]
    fn no_clips_is_a_data_error() {
        let err = Trainer::new(&quick_config())
            .train(&BTreeMap::new(), |_| {})
            .unwrap_err();
        assert!(matches!(err, ActionError::Data(_)));
    }

    #[test]
    fn summary_counts_windows_per_label() {
        let mut clips = BTreeMap::new();
        for (i, label) in Label::ALL.iter().enumerate() {
            clips.insert(
                label.as_str().to_string(),
                TrainingClip::new(clip(i as f32, 4 + i), label.as_str()),
            );
        }
        let model = Trainer::new(&quick_config()).train(&clips, |_| {}).unwrap();
        let summary = model.summary();
        assert_eq!(summary.clips, 4);
        assert_eq!(summary.windows, 4 + 5 + 6 + 7);
        assert_eq!(summary.samples_per_label[&Label::PourWater], 6);
        assert!(summary.epochs >= 1);
        assert_eq!(model.classifier().layer_sizes(), vec![51, 16, 4]);
    }

    fn four_clips() -> BTreeMap<String, TrainingClip> {
        Label::ALL
            .iter()
            .enumerate()
            .map(|(i, label)| {
                (
                    label.as_str().to_string(),
                    TrainingClip::new(clip(i as f32, 4), label.as_str()),
                )
            })
            .collect()
    }

    #[test]
    fn zero_max_epochs_is_a_config_error() {
        let mut cfg = quick_config();
        cfg.classifier.max_epochs = 0;
        let err = Trainer::new(&cfg).train(&four_clips(), |_| {}).unwrap_err();
        assert!(matches!(err, ActionError::Config(_)), "{err}");
    }

    #[test]
    fn zero_patience_is_a_config_error() {
        let mut cfg = quick_config();
        cfg.classifier.n_iter_no_change = 0;
        let mut events = 0;
        let err = Trainer::new(&cfg)
            .train(&four_clips(), |_| events += 1)
            .unwrap_err();
        assert!(matches!(err, ActionError::Config(_)), "{err}");
        assert_eq!(events, 0);
    }

    #[test]
    fn invalid_window_settings_are_config_errors() {
        let mut cfg = quick_config();
        cfg.vectorizer.window_stride = 0;
        assert!(matches!(
            Trainer::new(&cfg).train(&four_clips(), |_| {}),
            Err(ActionError::Config(_))
        ));
    }
}
