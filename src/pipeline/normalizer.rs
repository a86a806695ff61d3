use serde::{Deserialize, Serialize};

use crate::{
    config::ScalingMode,
    error::{ActionError, Result},
    types::FeatureVector,
};

/// Scales below this are treated as a constant dimension.
const MIN_SCALE: f64 = 1e-12;

/// Per-dimension affine scaling fitted on the training features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub mode: ScalingMode,
    pub offset: Vec<f64>,
    pub scale: Vec<f64>,
}

impl NormalizationParams {
    pub fn fit(vectors: &[FeatureVector], mode: ScalingMode) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Err(ActionError::Data(
                "cannot fit normalizer on an empty feature set".to_string(),
            ));
        };
        let dim = first.len();
        if dim == 0 {
            return Err(ActionError::Data(
                "cannot fit normalizer on zero-length features".to_string(),
            ));
        }
        for (idx, v) in vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(ActionError::Data(format!(
                    "feature vector {idx} has length {}, expected {dim}",
                    v.len()
                )));
            }
            if let Some(pos) = v.iter().position(|x| !x.is_finite()) {
                return Err(ActionError::Data(format!(
                    "feature vector {idx} has a non-finite value at dimension {pos}"
                )));
            }
        }

        let n = vectors.len() as f64;
        let (offset, scale): (Vec<f64>, Vec<f64>) = (0..dim)
            .map(|d| {
                let column = vectors.iter().map(|v| v[d]);
                match mode {
                    ScalingMode::Standard => {
                        let mean = column.clone().sum::<f64>() / n;
                        let var = column.map(|x| (x - mean).powi(2)).sum::<f64>() / n;
                        (mean, non_degenerate(var.sqrt()))
                    }
                    ScalingMode::MinMax => {
                        let (min, max) = column.fold((f64::MAX, f64::MIN), |(lo, hi), x| {
                            (lo.min(x), hi.max(x))
                        });
                        (min, non_degenerate(max - min))
                    }
                }
            })
            .unzip();

        let constant = scale.iter().filter(|s| **s == 1.0).count();
        log::debug!(
            "fitted {mode:?} normalizer on {} vectors of dim {dim} ({constant} constant dims)",
            vectors.len()
        );

        Ok(Self {
            mode,
            offset,
            scale,
        })
    }

    pub fn dim(&self) -> usize {
        self.offset.len()
    }

    /// `(x - offset) / scale`, per dimension.
    pub fn apply(&self, vector: &FeatureVector) -> Result<FeatureVector> {
        if vector.len() != self.dim() {
            return Err(ActionError::Data(format!(
                "feature vector has length {}, normalizer expects {}",
                vector.len(),
                self.dim()
            )));
        }
        Ok(vector
            .iter()
            .zip(self.offset.iter().zip(&self.scale))
            .map(|(x, (o, s))| (x - o) / s)
            .collect())
    }

    pub fn apply_all(&self, vectors: &[FeatureVector]) -> Result<Vec<FeatureVector>> {
        vectors.iter().map(|v| self.apply(v)).collect()
    }

    /// Checks that the parameters are usable: matching lengths, finite
    /// values and strictly positive scales.
    pub fn validate(&self) -> Result<()> {
        if self.offset.len() != self.scale.len() {
            return Err(ActionError::Data(format!(
                "normalizer offset has {} dims but scale has {}",
                self.offset.len(),
                self.scale.len()
            )));
        }
        if self.offset.iter().any(|o| !o.is_finite())
            || self.scale.iter().any(|s| !s.is_finite() || *s <= 0.0)
        {
            return Err(ActionError::Data(
                "normalizer parameters must be finite with positive scales".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_degenerate(scale: f64) -> f64 {
    if scale < MIN_SCALE { 1.0 } else { scale }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FeatureVector> {
        vec![
            vec![1.0, 10.0, 5.0],
            vec![2.0, 20.0, 5.0],
            vec![3.0, 60.0, 5.0],
            vec![6.0, 30.0, 5.0],
        ]
    }

    #[test]
    fn standard_scaling_centres_and_whitens_fit_set() {
        let data = sample();
        let params = NormalizationParams::fit(&data, ScalingMode::Standard).unwrap();
        let scaled = params.apply_all(&data).unwrap();

        let n = scaled.len() as f64;
        for d in 0..2 {
            let mean = scaled.iter().map(|v| v[d]).sum::<f64>() / n;
            let var = scaled.iter().map(|v| (v[d] - mean).powi(2)).sum::<f64>() / n;
            assert!(mean.abs() < 1e-9, "dim {d} mean {mean}");
            assert!((var - 1.0).abs() < 1e-9, "dim {d} var {var}");
        }
    }

    #[test]
    fn zero_variance_dimension_gets_unit_scale() {
        let params = NormalizationParams::fit(&sample(), ScalingMode::Standard).unwrap();
        assert_eq!(params.scale[2], 1.0);
        assert_eq!(params.offset[2], 5.0);
        let out = params.apply(&vec![1.0, 10.0, 5.0]).unwrap();
        assert_eq!(out[2], 0.0);
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn min_max_maps_fit_set_into_unit_interval() {
        let data = sample();
        let params = NormalizationParams::fit(&data, ScalingMode::MinMax).unwrap();
        let scaled = params.apply_all(&data).unwrap();
        for v in &scaled {
            for x in &v[..2] {
                assert!((0.0..=1.0).contains(x), "{x}");
            }
        }
        assert_eq!(scaled[0][0], 0.0);
        assert_eq!(scaled[3][0], 1.0);
        assert_eq!(params.scale[2], 1.0);
    }

    #[test]
    fn apply_is_repeatable() {
        let params = NormalizationParams::fit(&sample(), ScalingMode::Standard).unwrap();
        let raw = vec![4.0, 15.0, 2.0];
        assert_eq!(params.apply(&raw).unwrap(), params.apply(&raw).unwrap());
    }

    #[test]
    fn fit_rejects_bad_input() {
        assert!(matches!(
            NormalizationParams::fit(&[], ScalingMode::Standard),
            Err(ActionError::Data(_))
        ));
        assert!(matches!(
            NormalizationParams::fit(&[vec![1.0, 2.0], vec![1.0]], ScalingMode::Standard),
            Err(ActionError::Data(_))
        ));
        assert!(matches!(
            NormalizationParams::fit(&[vec![1.0, f64::NAN]], ScalingMode::MinMax),
            Err(ActionError::Data(_))
        ));
    }

    #[test]
    fn apply_rejects_length_mismatch() {
        let params = NormalizationParams::fit(&sample(), ScalingMode::Standard).unwrap();
        let err = params.apply(&vec![1.0, 2.0]).unwrap_err();
        assert!(err.to_string().contains("expects 3"));
    }

    #[test]
    fn validate_catches_corrupted_params() {
        let mut params = NormalizationParams::fit(&sample(), ScalingMode::Standard).unwrap();
        params.validate().unwrap();
        params.scale[0] = 0.0;
        assert!(params.validate().is_err());
    }
}
