use std::ops::Range;

use crate::{
    config::VectorizerConfig,
    error::{ActionError, Result},
    types::{FEATURE_DIM, FeatureVector, Keypoint, KeypointFrame, KeypointSequence, NUM_JOINTS},
};

/// Turns keypoint sequences into fixed-length feature vectors.
///
/// Each of the 17 joints contributes the mean of its `(x, y, confidence)`
/// over the frames of the window. Joints below `min_joint_confidence`, or
/// frames where nobody was detected, reuse the last accepted value of that
/// joint; joints never seen before contribute zeros.
#[derive(Clone, Debug)]
pub struct KeypointVectorizer {
    min_joint_confidence: f32,
    window_size: usize,
    window_stride: usize,
}

impl Default for KeypointVectorizer {
    fn default() -> Self {
        Self::new(&VectorizerConfig::default())
    }
}

impl KeypointVectorizer {
    pub fn new(cfg: &VectorizerConfig) -> Self {
        Self {
            min_joint_confidence: cfg.min_joint_confidence,
            window_size: cfg.window_size.max(1),
            window_stride: cfg.window_stride.max(1),
        }
    }

    pub fn feature_dim(&self) -> usize {
        FEATURE_DIM
    }

    pub fn vectorize(&self, sequence: &KeypointSequence) -> Result<FeatureVector> {
        let resolved = self.resolve(&sequence.frames)?;
        Ok(pool(&resolved))
    }

    /// Per-frame joints after carry-forward. Carried values flow across the
    /// whole clip, not just within one window.
    fn resolve(&self, frames: &[KeypointFrame]) -> Result<Vec<ResolvedFrame>> {
        if frames.is_empty() {
            return Err(ActionError::Data(
                "cannot vectorize an empty keypoint sequence".to_string(),
            ));
        }

        let mut carried: ResolvedFrame = [None; NUM_JOINTS];
        let mut resolved = Vec::with_capacity(frames.len());
        for (frame_idx, frame) in frames.iter().enumerate() {
            if let Some(joints) = &frame.joints {
                if joints.len() != NUM_JOINTS {
                    return Err(ActionError::Data(format!(
                        "frame {frame_idx}: expected {NUM_JOINTS} joints, got {}",
                        joints.len()
                    )));
                }
                for (slot, kp) in carried.iter_mut().zip(joints) {
                    if self.accepts(kp) {
                        *slot = Some(*kp);
                    }
                }
            }
            resolved.push(carried);
        }
        Ok(resolved)
    }

    fn accepts(&self, kp: &Keypoint) -> bool {
        kp.is_finite() && kp.confidence >= self.min_joint_confidence
    }

    fn window_ranges(&self, len: usize) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut start = 0;
        while start < len {
            let end = (start + self.window_size).min(len);
            ranges.push(start..end);
            if end == len {
                break;
            }
            start += self.window_stride;
        }
        ranges
    }

    /// Splits a clip into classification windows. A trailing partial window
    /// is kept so every frame is covered; short clips form one window.
    pub fn windows<'a>(&self, sequence: &'a KeypointSequence) -> Result<Vec<&'a [KeypointFrame]>> {
        if sequence.is_empty() {
            return Err(ActionError::Data(
                "cannot window an empty keypoint sequence".to_string(),
            ));
        }
        Ok(self
            .window_ranges(sequence.len())
            .into_iter()
            .map(|range| &sequence.frames[range])
            .collect())
    }

    /// One feature vector per window of the clip.
    pub fn vectorize_windows(&self, sequence: &KeypointSequence) -> Result<Vec<FeatureVector>> {
        let resolved = self.resolve(&sequence.frames)?;
        Ok(self
            .window_ranges(resolved.len())
            .into_iter()
            .map(|range| pool(&resolved[range]))
            .collect())
    }
}

type ResolvedFrame = [Option<Keypoint>; NUM_JOINTS];

/// Mean of `(x, y, confidence)` per joint; joints never seen contribute zeros.
fn pool(frames: &[ResolvedFrame]) -> FeatureVector {
    let mut sums = [[0.0f64; 3]; NUM_JOINTS];
    for frame in frames {
        for (sum, slot) in sums.iter_mut().zip(frame) {
            if let Some(kp) = slot {
                sum[0] += kp.x as f64;
                sum[1] += kp.y as f64;
                sum[2] += kp.confidence as f64;
            }
        }
    }
    let n = frames.len().max(1) as f64;
    let features: FeatureVector = sums
        .iter()
        .flat_map(|s| [s[0] / n, s[1] / n, s[2] / n])
        .collect();
    debug_assert_eq!(features.len(), FEATURE_DIM);
    features
}
