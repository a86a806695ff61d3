//! Feed-forward action classifier.
//!
//! Dense ReLU hidden layers followed by a softmax over the four labels,
//! trained with mini-batch Adam on mean cross-entropy plus an L2 penalty.

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    config::ClassifierConfig,
    error::{ActionError, Result},
    types::{ClassProbabilities, FeatureVector, Label},
};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;
/// Floor for probabilities inside the log of the loss.
const MIN_PROBABILITY: f64 = 1e-12;

#[derive(Clone, Debug)]
pub enum TrainingEvent {
    Started {
        samples: usize,
        max_epochs: usize,
    },
    Epoch {
        epoch: usize,
        loss: f64,
    },
    Finished {
        epochs: usize,
        loss: f64,
        converged: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Shape `(inputs, outputs)`.
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseLayer {
    fn glorot(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0 / (inputs + outputs) as f64).sqrt();
        let weights = Array2::from_shape_fn((inputs, outputs), |_| rng.gen_range(-bound..bound));
        let bias = Array1::from_shape_fn(outputs, |_| rng.gen_range(-bound..bound));
        Self { weights, bias }
    }

    fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlpClassifier {
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

impl MlpClassifier {
    pub fn train(
        vectors: &[FeatureVector],
        labels: &[Label],
        cfg: &ClassifierConfig,
        mut on_event: impl FnMut(TrainingEvent),
    ) -> Result<Self> {
        cfg.validate()?;
        let (x, targets) = training_matrices(vectors, labels)?;
        let (samples, input_dim) = x.dim();

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut sizes = Vec::with_capacity(cfg.hidden_layers.len() + 2);
        sizes.push(input_dim);
        sizes.extend_from_slice(&cfg.hidden_layers);
        sizes.push(Label::COUNT);
        let layers = sizes
            .windows(2)
            .map(|w| DenseLayer::glorot(w[0], w[1], &mut rng))
            .collect();
        let mut model = Self { input_dim, layers };

        let batch_size = cfg.batch_size.clamp(1, samples);
        let mut adam = AdamState::new(&model.layers, cfg.learning_rate);
        let mut order: Vec<usize> = (0..samples).collect();

        on_event(TrainingEvent::Started {
            samples,
            max_epochs: cfg.max_epochs,
        });

        let mut best_loss = f64::INFINITY;
        let mut stale_epochs = 0;
        let mut epochs = 0;
        let mut loss = f64::INFINITY;
        let mut converged = false;

        for epoch in 1..=cfg.max_epochs {
            order.shuffle(&mut rng);
            let mut accumulated = 0.0;
            for batch in order.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = targets.select(Axis(0), batch);
                let (batch_loss, grads) = model.backprop(&xb, &yb, cfg.alpha);
                adam.step(&mut model.layers, &grads);
                accumulated += batch_loss * batch.len() as f64;
            }
            loss = accumulated / samples as f64;
            epochs = epoch;
            on_event(TrainingEvent::Epoch { epoch, loss });

            if !loss.is_finite() {
                return Err(ActionError::Data(format!(
                    "training diverged at epoch {epoch} (loss {loss})"
                )));
            }

            if loss > best_loss - cfg.tolerance {
                stale_epochs += 1;
            } else {
                stale_epochs = 0;
            }
            if loss < best_loss {
                best_loss = loss;
            }
            if stale_epochs >= cfg.n_iter_no_change {
                converged = true;
                break;
            }
        }

        if converged {
            log::debug!("classifier converged after {epochs} epochs, loss {loss:.6}");
        } else {
            log::warn!(
                "classifier hit max_epochs ({}) before converging, loss {loss:.6}",
                cfg.max_epochs
            );
        }
        on_event(TrainingEvent::Finished {
            epochs,
            loss,
            converged,
        });

        Ok(model)
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![self.input_dim];
        sizes.extend(self.layers.iter().map(|l| l.bias.len()));
        sizes
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<ClassProbabilities> {
        if vector.len() != self.input_dim {
            return Err(ActionError::Data(format!(
                "feature vector has length {}, classifier was trained on {}",
                vector.len(),
                self.input_dim
            )));
        }
        if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
            return Err(ActionError::Data(format!(
                "feature vector has a non-finite value at dimension {pos}"
            )));
        }

        let input = Array2::from_shape_vec((1, self.input_dim), vector.clone())
            .map_err(|err| ActionError::Data(format!("failed to build input row: {err}")))?;
        let probs = self.forward(&input);
        let row: Vec<f64> = probs.row(0).to_vec();
        ClassProbabilities::try_from(row)
    }

    /// Row-wise class probabilities for a `(samples, features)` matrix.
    pub fn predict_batch(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        if input.ncols() != self.input_dim {
            return Err(ActionError::Data(format!(
                "input has {} columns, classifier was trained on {}",
                input.ncols(),
                self.input_dim
            )));
        }
        if input.iter().any(|x| !x.is_finite()) {
            return Err(ActionError::Data(
                "input matrix contains non-finite values".to_string(),
            ));
        }
        Ok(self.forward(input))
    }

    /// Fraction of rows whose argmax matches the given label.
    pub fn accuracy(&self, vectors: &[FeatureVector], labels: &[Label]) -> Result<f64> {
        let (x, _) = training_matrices(vectors, labels)?;
        let probs = self.predict_batch(&x)?;
        let correct = probs
            .outer_iter()
            .zip(labels)
            .filter(|(row, label)| argmax(row.iter().copied()) == label.index())
            .count();
        Ok(correct as f64 / labels.len() as f64)
    }

    /// Checks layer shapes chain from `input_dim` to the label count and
    /// that every parameter is finite.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(ActionError::Data("classifier has no layers".to_string()));
        }
        let mut expected_in = self.input_dim;
        for (idx, layer) in self.layers.iter().enumerate() {
            let (rows, cols) = layer.weights.dim();
            if rows != expected_in || cols != layer.bias.len() {
                return Err(ActionError::Data(format!(
                    "layer {idx}: weights {rows}x{cols}, bias {}, expected {expected_in} rows",
                    layer.bias.len()
                )));
            }
            if layer.weights.iter().chain(layer.bias.iter()).any(|w| !w.is_finite()) {
                return Err(ActionError::Data(format!(
                    "layer {idx} contains non-finite parameters"
                )));
            }
            expected_in = cols;
        }
        if expected_in != Label::COUNT {
            return Err(ActionError::Data(format!(
                "classifier outputs {expected_in} classes, expected {}",
                Label::COUNT
            )));
        }
        Ok(())
    }

    fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let mut activation = input.clone();
        let last = self.layers.len() - 1;
        for (idx, layer) in self.layers.iter().enumerate() {
            activation = layer.forward(&activation);
            if idx < last {
                activation.mapv_inplace(relu);
            }
        }
        softmax_rows(&mut activation);
        activation
    }

    /// Returns the batch loss and per-layer `(weight, bias)` gradients.
    fn backprop(
        &self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        alpha: f64,
    ) -> (f64, Vec<(Array2<f64>, Array1<f64>)>) {
        let n = x.nrows() as f64;
        let last = self.layers.len() - 1;

        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(x.clone());
        for (idx, layer) in self.layers.iter().enumerate() {
            let mut z = layer.forward(&activations[idx]);
            if idx < last {
                z.mapv_inplace(relu);
            } else {
                softmax_rows(&mut z);
            }
            activations.push(z);
        }

        let probs = &activations[self.layers.len()];
        let data_loss = -(probs.mapv(|p| p.max(MIN_PROBABILITY).ln()) * y).sum() / n;
        let penalty: f64 = self
            .layers
            .iter()
            .map(|l| l.weights.iter().map(|w| w * w).sum::<f64>())
            .sum();
        let loss = data_loss + 0.5 * alpha * penalty / n;

        let mut grads = Vec::with_capacity(self.layers.len());
        let mut delta = (probs - y) / n;
        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            let input = &activations[idx];
            let grad_w = input.t().dot(&delta) + &(&layer.weights * (alpha / n));
            let grad_b = delta.sum_axis(Axis(0));
            if idx > 0 {
                let mut next = delta.dot(&layer.weights.t());
                next.zip_mut_with(input, |d, a| {
                    if *a <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = next;
            }
            grads.push((grad_w, grad_b));
        }
        grads.reverse();
        (loss, grads)
    }
}

struct AdamState {
    learning_rate: f64,
    t: i32,
    moments: Vec<(Array2<f64>, Array1<f64>, Array2<f64>, Array1<f64>)>,
}

impl AdamState {
    fn new(layers: &[DenseLayer], learning_rate: f64) -> Self {
        let moments = layers
            .iter()
            .map(|l| {
                (
                    Array2::zeros(l.weights.raw_dim()),
                    Array1::zeros(l.bias.raw_dim()),
                    Array2::zeros(l.weights.raw_dim()),
                    Array1::zeros(l.bias.raw_dim()),
                )
            })
            .collect();
        Self {
            learning_rate,
            t: 0,
            moments,
        }
    }

    fn step(&mut self, layers: &mut [DenseLayer], grads: &[(Array2<f64>, Array1<f64>)]) {
        self.t += 1;
        let lr = self.learning_rate * (1.0 - ADAM_BETA2.powi(self.t)).sqrt()
            / (1.0 - ADAM_BETA1.powi(self.t));

        for ((layer, (gw, gb)), (mw, mb, vw, vb)) in
            layers.iter_mut().zip(grads).zip(self.moments.iter_mut())
        {
            update_moments(mw, vw, gw);
            update_moments(mb, vb, gb);
            layer.weights.zip_mut_with(&(&*mw / &vw.mapv(|v| v.sqrt() + ADAM_EPSILON)), |w, s| {
                *w -= lr * s
            });
            layer.bias.zip_mut_with(&(&*mb / &vb.mapv(|v| v.sqrt() + ADAM_EPSILON)), |b, s| {
                *b -= lr * s
            });
        }
    }
}

fn update_moments<D: ndarray::Dimension>(
    m: &mut ndarray::Array<f64, D>,
    v: &mut ndarray::Array<f64, D>,
    g: &ndarray::Array<f64, D>,
) {
    m.zip_mut_with(g, |m, g| *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g);
    v.zip_mut_with(g, |v, g| *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g);
}

fn training_matrices(
    vectors: &[FeatureVector],
    labels: &[Label],
) -> Result<(Array2<f64>, Array2<f64>)> {
    let Some(first) = vectors.first() else {
        return Err(ActionError::Data(
            "cannot train on an empty feature set".to_string(),
        ));
    };
    if vectors.len() != labels.len() {
        return Err(ActionError::Data(format!(
            "{} feature vectors but {} labels",
            vectors.len(),
            labels.len()
        )));
    }
    let dim = first.len();
    let mut flat = Vec::with_capacity(vectors.len() * dim);
    for (idx, v) in vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(ActionError::Data(format!(
                "feature vector {idx} has length {}, expected {dim}",
                v.len()
            )));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(ActionError::Data(format!(
                "feature vector {idx} contains non-finite values"
            )));
        }
        flat.extend_from_slice(v);
    }
    let x = Array2::from_shape_vec((vectors.len(), dim), flat)
        .map_err(|err| ActionError::Data(format!("failed to build feature matrix: {err}")))?;

    let mut y = Array2::zeros((labels.len(), Label::COUNT));
    for (row, label) in labels.iter().enumerate() {
        y[[row, label.index()]] = 1.0;
    }
    Ok((x, y))
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Max-subtracted softmax per row. Non-finite logits are pinned to the
/// finite range first so the output is always a distribution.
fn softmax_rows(logits: &mut Array2<f64>) {
    for mut row in logits.outer_iter_mut() {
        row.mapv_inplace(|z| {
            if z.is_nan() {
                f64::MIN
            } else {
                z.clamp(f64::MIN, f64::MAX)
            }
        });
        let max = row.iter().copied().fold(f64::MIN, f64::max);
        row.mapv_inplace(|z| (z - max).exp());
        let sum: f64 = row.sum();
        row.mapv_inplace(|z| z / sum);
    }
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::MIN);
    for (idx, v) in values.enumerate() {
        if v > best.1 {
            best = (idx, v);
        }
    }
    best.0
}
