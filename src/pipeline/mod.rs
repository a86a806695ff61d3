pub mod aggregator;
pub mod classifier;
pub mod normalizer;
pub mod vectorizer;

use std::sync::Arc;

use crate::{
    artifact::TrainedModel,
    config::AggregatorConfig,
    error::Result,
    types::{KeypointSequence, Prediction},
};

// Re-exports for convenience
pub use aggregator::{TemporalAggregator, WindowVote};
pub use classifier::{MlpClassifier, TrainingEvent};
pub use normalizer::NormalizationParams;
pub use vectorizer::KeypointVectorizer;

/// Inference over whole clips with a shared, read-only model.
///
/// Windowing follows the settings the model was trained with, so a clip is
/// cut the same way at inference as during training.
#[derive(Clone, Debug)]
pub struct ActionRecognizer {
    model: Arc<TrainedModel>,
    vectorizer: KeypointVectorizer,
    aggregator: TemporalAggregator,
}

impl ActionRecognizer {
    pub fn new(model: Arc<TrainedModel>, aggregator: &AggregatorConfig) -> Self {
        let vectorizer = KeypointVectorizer::new(model.vectorizer_config());
        Self {
            model,
            vectorizer,
            aggregator: TemporalAggregator::new(aggregator),
        }
    }

    pub fn model(&self) -> &Arc<TrainedModel> {
        &self.model
    }

    pub fn classify_clip(&self, clip_id: &str, sequence: &KeypointSequence) -> Result<Prediction> {
        self.classify(sequence).map_err(|err| err.in_clip(clip_id))
    }

    fn classify(&self, sequence: &KeypointSequence) -> Result<Prediction> {
        let missing = sequence.missing_frames();
        if missing > 0 {
            log::warn!(
                "{missing} of {} frames have no detected person",
                sequence.len()
            );
        }

        let windows = self
            .vectorizer
            .vectorize_windows(sequence)?
            .iter()
            .map(|raw| {
                let normalized = self.model.normalizer().apply(raw)?;
                self.model.classifier().predict(&normalized)
            })
            .collect::<Result<Vec<_>>>()?;

        let prediction = self.aggregator.aggregate(&windows)?;
        log::debug!(
            "{} windows -> {} votes {:?}",
            windows.len(),
            prediction.display_text(),
            prediction.votes
        );
        Ok(prediction)
    }
}
