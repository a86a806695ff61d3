use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ActionError, Result};

/// Joints per frame in the COCO-17 layout written by the pose estimator.
pub const NUM_JOINTS: usize = 17;
/// Values stored per joint: x, y, confidence.
pub const VALUES_PER_JOINT: usize = 3;
/// Length of every feature vector produced by the vectorizer.
pub const FEATURE_DIM: usize = NUM_JOINTS * VALUES_PER_JOINT;

/// Tolerance used when checking that a probability vector sums to one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

pub const JOINT_NAMES: [&str; NUM_JOINTS] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

pub type FeatureVector = Vec<f64>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.confidence.is_finite()
    }
}

/// Joints for one frame. `None` means the pose estimator found nobody.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeypointFrame {
    pub joints: Option<Vec<Keypoint>>,
}

impl KeypointFrame {
    pub fn new(joints: Vec<Keypoint>) -> Self {
        Self {
            joints: Some(joints),
        }
    }

    pub fn missing() -> Self {
        Self { joints: None }
    }

    pub fn is_missing(&self) -> bool {
        self.joints.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeypointSequence {
    pub frames: Vec<KeypointFrame>,
}

impl KeypointSequence {
    pub fn new(frames: Vec<KeypointFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn missing_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_missing()).count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    OpenDoor,
    PickBook,
    PourWater,
    WalkStop,
}

impl Label {
    pub const COUNT: usize = 4;

    /// Class order of the classifier output.
    pub const ALL: [Label; Label::COUNT] = [
        Label::OpenDoor,
        Label::PickBook,
        Label::PourWater,
        Label::WalkStop,
    ];

    pub fn index(&self) -> usize {
        match self {
            Label::OpenDoor => 0,
            Label::PickBook => 1,
            Label::PourWater => 2,
            Label::WalkStop => 3,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::OpenDoor => "open_door",
            Label::PickBook => "pick_book",
            Label::PourWater => "pour_water",
            Label::WalkStop => "walk_stop",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Label::OpenDoor => "the person walks to a door and opens it",
            Label::PickBook => "the person picks up a book from a shelf or table",
            Label::PourWater => "the person pours water from a kettle or bottle into a cup",
            Label::WalkStop => "the person walks and then stops briefly",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s.trim())
            .ok_or_else(|| {
                ActionError::Config(format!(
                    "unknown action label '{s}', expected one of: {}",
                    Self::ALL.map(|l| l.as_str()).join(", ")
                ))
            })
    }
}

/// Per-label probabilities in `Label::ALL` order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ClassProbabilities([f64; Label::COUNT]);

impl ClassProbabilities {
    /// Builds a distribution, rejecting negative or non-finite entries and
    /// sums outside the tolerance.
    pub fn new(values: [f64; Label::COUNT]) -> Result<Self> {
        if let Some(bad) = values.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(ActionError::Data(format!(
                "class probability {bad} is negative or not finite"
            )));
        }
        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(ActionError::Data(format!(
                "class probabilities sum to {sum}, expected 1 within {PROBABILITY_TOLERANCE}"
            )));
        }
        Ok(Self(values))
    }

    pub fn get(&self, label: Label) -> f64 {
        self.0[label.index()]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Highest-probability label; ties resolve to the lower label index.
    pub fn argmax(&self) -> (Label, f64) {
        let mut best = 0;
        for idx in 1..Label::COUNT {
            if self.0[idx] > self.0[best] {
                best = idx;
            }
        }
        (Label::ALL[best], self.0[best])
    }
}

impl TryFrom<Vec<f64>> for ClassProbabilities {
    type Error = ActionError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        let arr: [f64; Label::COUNT] = values.as_slice().try_into().map_err(|_| {
            ActionError::Data(format!(
                "expected {} class probabilities, got {}",
                Label::COUNT,
                values.len()
            ))
        })?;
        Self::new(arr)
    }
}

impl From<ClassProbabilities> for Vec<f64> {
    fn from(value: ClassProbabilities) -> Self {
        value.0.to_vec()
    }
}

/// Aggregated result for one clip.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub action: Label,
    pub confidence: f64,
    pub votes: BTreeMap<Label, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<ClassProbabilities>,
}

impl Prediction {
    pub fn record(&self) -> PredictionRecord {
        PredictionRecord {
            action: self.action,
            confidence: self.confidence,
        }
    }

    pub fn display_text(&self) -> String {
        format!("{} ({:.0}%)", self.action, self.confidence * 100.0)
    }
}

/// The part of a prediction handed to the reasoning collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub action: Label,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_parsing_accepts_known_and_rejects_unknown() {
        assert_eq!("pour_water".parse::<Label>().unwrap(), Label::PourWater);
        assert_eq!(" walk_stop ".parse::<Label>().unwrap(), Label::WalkStop);
        let err = "jump".parse::<Label>().unwrap_err();
        assert!(matches!(err, ActionError::Config(_)));
        assert!(err.to_string().contains("jump"));
    }

    #[test]
    fn label_index_matches_class_order() {
        for (idx, label) in Label::ALL.iter().enumerate() {
            assert_eq!(label.index(), idx);
            assert_eq!(Label::from_index(idx), Some(*label));
        }
        assert_eq!(Label::from_index(4), None);
    }

    #[test]
    fn label_serializes_as_snake_case() {
        let json = serde_json::to_string(&Label::OpenDoor).unwrap();
        assert_eq!(json, "\"open_door\"");
        let back: Label = serde_json::from_str("\"pick_book\"").unwrap();
        assert_eq!(back, Label::PickBook);
    }

    #[test]
    fn class_probabilities_validate_distribution() {
        assert!(ClassProbabilities::new([0.25, 0.25, 0.25, 0.25]).is_ok());
        assert!(matches!(
            ClassProbabilities::new([0.5, 0.5, 0.5, 0.0]),
            Err(ActionError::Data(_))
        ));
        assert!(matches!(
            ClassProbabilities::new([1.2, -0.2, 0.0, 0.0]),
            Err(ActionError::Data(_))
        ));
        assert!(ClassProbabilities::try_from(vec![1.0, 0.0]).is_err());
    }

    #[test]
    fn argmax_prefers_lower_index_on_ties() {
        let probs = ClassProbabilities::new([0.1, 0.4, 0.4, 0.1]).unwrap();
        assert_eq!(probs.argmax(), (Label::PickBook, 0.4));
    }
}
