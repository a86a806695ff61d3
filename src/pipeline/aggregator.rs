use std::collections::BTreeMap;

use crate::{
    config::{AggregatorConfig, ConfidenceRule, TieBreak},
    error::{ActionError, Result},
    types::{ClassProbabilities, Label, Prediction},
};

/// Argmax label of one window and the probability it was given.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowVote {
    pub label: Label,
    pub probability: f64,
}

impl From<&ClassProbabilities> for WindowVote {
    fn from(probs: &ClassProbabilities) -> Self {
        let (label, probability) = probs.argmax();
        Self { label, probability }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    votes: usize,
    mass: f64,
}

/// Combines per-window predictions of one clip into a single label by
/// majority vote.
#[derive(Clone, Debug, Default)]
pub struct TemporalAggregator {
    tie_break: TieBreak,
    confidence: ConfidenceRule,
}

impl TemporalAggregator {
    pub fn new(cfg: &AggregatorConfig) -> Self {
        Self {
            tie_break: cfg.tie_break,
            confidence: cfg.confidence,
        }
    }

    pub fn aggregate(&self, windows: &[ClassProbabilities]) -> Result<Prediction> {
        let votes: Vec<WindowVote> = windows.iter().map(WindowVote::from).collect();
        let mut prediction = self.aggregate_votes(&votes)?;
        prediction.windows = windows.to_vec();
        Ok(prediction)
    }

    pub fn aggregate_votes(&self, votes: &[WindowVote]) -> Result<Prediction> {
        if votes.is_empty() {
            return Err(ActionError::Data(
                "cannot aggregate an empty prediction sequence".to_string(),
            ));
        }

        let mut tallies = [Tally::default(); Label::COUNT];
        for (idx, vote) in votes.iter().enumerate() {
            if !(0.0..=1.0).contains(&vote.probability) {
                return Err(ActionError::Data(format!(
                    "window {idx} has probability {} outside [0, 1]",
                    vote.probability
                )));
            }
            let tally = &mut tallies[vote.label.index()];
            tally.votes += 1;
            tally.mass += vote.probability;
        }

        let top_votes = tallies.iter().map(|t| t.votes).max().unwrap_or(0);
        let tied: Vec<Label> = Label::ALL
            .into_iter()
            .filter(|l| tallies[l.index()].votes == top_votes)
            .collect();

        let winner = match self.tie_break {
            TieBreak::FirstLabel => tied[0],
            // Strict comparison keeps the lowest index on an exact mass tie.
            TieBreak::SummedMass => tied.iter().copied().fold(tied[0], |best, l| {
                if tallies[l.index()].mass > tallies[best.index()].mass {
                    l
                } else {
                    best
                }
            }),
        };
        if tied.len() > 1 {
            log::debug!("vote tie between {tied:?} resolved to {winner} ({:?})", self.tie_break);
        }

        let won = tallies[winner.index()];
        let confidence = match self.confidence {
            ConfidenceRule::MeanWinningProbability => won.mass / won.votes as f64,
            ConfidenceRule::VoteFraction => won.votes as f64 / votes.len() as f64,
        };
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ActionError::Data(format!(
                "aggregated confidence {confidence} is outside [0, 1]"
            )));
        }

        let votes_by_label = Label::ALL
            .into_iter()
            .filter(|l| tallies[l.index()].votes > 0)
            .map(|l| (l, tallies[l.index()].votes))
            .collect::<BTreeMap<_, _>>();

        Ok(Prediction {
            action: winner,
            confidence,
            votes: votes_by_label,
            windows: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Label = Label::OpenDoor;
    const B: Label = Label::PickBook;

    fn vote(label: Label, probability: f64) -> WindowVote {
        WindowVote { label, probability }
    }

    fn window(label: Label, p: f64) -> ClassProbabilities {
        let rest = (1.0 - p) / 3.0;
        let mut values = [rest; Label::COUNT];
        values[label.index()] = p;
        ClassProbabilities::new(values).unwrap()
    }

    #[test]
    fn majority_wins_with_mean_voter_probability() {
        let agg = TemporalAggregator::default();
        let pred = agg
            .aggregate_votes(&[vote(A, 0.9), vote(A, 0.8), vote(B, 0.95)])
            .unwrap();
        assert_eq!(pred.action, A);
        assert!((pred.confidence - 0.85).abs() < 1e-12);
        assert_eq!(pred.votes[&A], 2);
        assert_eq!(pred.votes[&B], 1);
    }

    #[test]
    fn tie_breaks_on_summed_mass() {
        let agg = TemporalAggregator::default();
        let pred = agg.aggregate_votes(&[vote(A, 0.6), vote(B, 0.9)]).unwrap();
        assert_eq!(pred.action, B);
        assert!((pred.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn tie_can_prefer_first_label() {
        let agg = TemporalAggregator::new(&AggregatorConfig {
            tie_break: TieBreak::FirstLabel,
            ..AggregatorConfig::default()
        });
        let pred = agg.aggregate_votes(&[vote(B, 0.9), vote(A, 0.6)]).unwrap();
        assert_eq!(pred.action, A);
        assert!((pred.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn exact_mass_tie_falls_back_to_lowest_index() {
        let agg = TemporalAggregator::default();
        let pred = agg.aggregate_votes(&[vote(B, 0.7), vote(A, 0.7)]).unwrap();
        assert_eq!(pred.action, A);
    }

    #[test]
    fn vote_fraction_confidence() {
        let agg = TemporalAggregator::new(&AggregatorConfig {
            confidence: ConfidenceRule::VoteFraction,
            ..AggregatorConfig::default()
        });
        let pred = agg
            .aggregate_votes(&[vote(A, 0.9), vote(A, 0.8), vote(B, 0.95), vote(A, 0.4)])
            .unwrap();
        assert_eq!(pred.action, A);
        assert!((pred.confidence - 0.75).abs() < 1e-12);
    }

    #[test]
    fn single_window_uses_its_argmax_probability() {
        let agg = TemporalAggregator::default();
        let pred = agg.aggregate(&[window(Label::PourWater, 0.7)]).unwrap();
        assert_eq!(pred.action, Label::PourWater);
        assert!((pred.confidence - 0.7).abs() < 1e-12);
        assert_eq!(pred.windows.len(), 1);
    }

    #[test]
    fn aggregates_probability_vectors() {
        let agg = TemporalAggregator::default();
        let pred = agg
            .aggregate(&[
                window(Label::WalkStop, 0.6),
                window(Label::WalkStop, 0.8),
                window(Label::OpenDoor, 0.99),
            ])
            .unwrap();
        assert_eq!(pred.action, Label::WalkStop);
        assert!((pred.confidence - 0.7).abs() < 1e-12);
        assert_eq!(pred.windows.len(), 3);
    }

    #[test]
    fn empty_input_is_a_data_error() {
        let agg = TemporalAggregator::default();
        assert!(matches!(agg.aggregate(&[]), Err(ActionError::Data(_))));
        assert!(matches!(agg.aggregate_votes(&[]), Err(ActionError::Data(_))));
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let agg = TemporalAggregator::default();
        let err = agg.aggregate_votes(&[vote(A, 1.2)]).unwrap_err();
        assert!(err.to_string().contains("window 0"));
        assert!(agg.aggregate_votes(&[vote(A, f64::NAN)]).is_err());
    }
}
