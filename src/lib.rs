//! Action recognition over 2D pose keypoints.
//!
//! Keypoint clips are pooled into fixed-length feature vectors, normalized,
//! scored by a small MLP, and the per-window probabilities are reduced to one
//! [`Prediction`] per clip. The resulting `{action, confidence}` record can be
//! handed to a [`reasoning::ReasoningAgent`] for higher-level context.

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod reasoning;
pub mod training;
pub mod types;

pub use artifact::{ARTIFACT_SCHEMA_VERSION, TrainedModel, TrainingSummary};
pub use config::Config;
pub use error::{ActionError, Result};
pub use pipeline::{ActionRecognizer, TrainingEvent};
pub use training::{Trainer, TrainingClip};
pub use types::{
    ClassProbabilities, FEATURE_DIM, Keypoint, KeypointFrame, KeypointSequence, Label, Prediction,
    PredictionRecord,
};
