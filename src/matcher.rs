use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reference::ReferenceFace;
use crate::Embedding;

/// Logistic map from cosine distance to a 0-100 likeness score.
/// `inflection` is the distance that scores exactly 50; `k` sets how sharply
/// the score falls around it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreCurve {
    pub k: f64,
    pub inflection: f64,
}

impl Default for ScoreCurve {
    fn default() -> Self {
        Self {
            k: 22.0,
            inflection: 0.4,
        }
    }
}

impl ScoreCurve {
    pub fn new(k: f64, inflection: f64) -> Self {
        Self { k, inflection }
    }

    pub fn score(&self, distance: f64) -> f64 {
        100.0 / (1.0 + (self.k * (distance - self.inflection)).exp())
    }
}

/// Nearest reference face by cosine distance; the first one wins ties.
pub fn best_match<'a>(faces: &'a [ReferenceFace], probe: &Embedding) -> Option<(&'a str, f32)> {
    faces
        .iter()
        .map(|f| (f.filename.as_str(), f.embedding.cosine_distance(probe)))
        .fold(None, |acc, (name, d)| match acc {
            Some((_, best)) if best <= d => acc,
            _ => Some((name, d)),
        })
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Coarse verdict for a score, used for human-facing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Identical,
    VeryClose,
    Resemblance,
    Somewhat,
    Faint,
    Unlike,
}

impl Verdict {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s > 90.0 => Verdict::Identical,
            s if s > 75.0 => Verdict::VeryClose,
            s if s > 60.0 => Verdict::Resemblance,
            s if s > 40.0 => Verdict::Somewhat,
            s if s > 20.0 => Verdict::Faint,
            _ => Verdict::Unlike,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Verdict::Identical => "practically the same person",
            Verdict::VeryClose => "a striking resemblance, worth a double take",
            Verdict::Resemblance => "captures the features well",
            Verdict::Somewhat => "somewhat alike",
            Verdict::Faint => "a few shared features, not much more",
            Verdict::Unlike => "hard to call a resemblance",
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(name: &str, v: Vec<f32>) -> ReferenceFace {
        ReferenceFace {
            filename: name.to_string(),
            embedding: Embedding::new(v),
        }
    }

    #[test]
    fn inflection_scores_fifty() {
        let curve = ScoreCurve::default();
        assert_eq!(curve.score(0.4), 50.0);
    }

    #[test]
    fn score_decreases_with_distance() {
        let curve = ScoreCurve::default();
        let scores: Vec<f64> = (0..=40).map(|i| curve.score(i as f64 * 0.05)).collect();
        for pair in scores.windows(2) {
            assert!(pair[0] > pair[1], "{} !> {}", pair[0], pair[1]);
        }
        assert!(scores[0] > 99.0 && scores[0] <= 100.0);
        assert!(*scores.last().unwrap() >= 0.0);
    }

    #[test]
    fn custom_curve_moves_inflection() {
        let curve = ScoreCurve::new(10.0, 0.6);
        assert_eq!(curve.score(0.6), 50.0);
        assert!(curve.score(0.4) > 50.0);
    }

    #[test]
    fn best_match_picks_minimal_distance() {
        let faces = vec![
            face("far.jpg", vec![0.0, 1.0]),
            face("near.jpg", vec![1.0, 0.1]),
            face("mid.jpg", vec![1.0, 1.0]),
        ];
        let probe = Embedding::new(vec![1.0, 0.0]);
        let (name, d) = best_match(&faces, &probe).unwrap();
        assert_eq!(name, "near.jpg");
        for f in &faces {
            assert!(d <= f.embedding.cosine_distance(&probe));
        }
    }

    #[test]
    fn best_match_ties_go_to_first() {
        let faces = vec![
            face("first.jpg", vec![2.0, 0.0]),
            face("second.jpg", vec![1.0, 0.0]),
        ];
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(best_match(&faces, &probe).unwrap().0, "first.jpg");
    }

    #[test]
    fn best_match_of_nothing() {
        assert!(best_match(&[], &Embedding::new(vec![1.0])).is_none());
    }

    #[test]
    fn rounding_and_verdicts() {
        assert_eq!(round2(50.0), 50.0);
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(Verdict::from_score(95.0), Verdict::Identical);
        assert_eq!(Verdict::from_score(75.0), Verdict::Resemblance);
        assert_eq!(Verdict::from_score(41.0), Verdict::Somewhat);
        assert_eq!(Verdict::from_score(0.0), Verdict::Unlike);
    }
}
