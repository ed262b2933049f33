//! Loss values scraped from training log text, paired with wall-clock timing

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::debug;

/// Values at or above this are treated as accidental matches (step counts, sizes)
pub const LOSS_UPPER_BOUND: f64 = 100.0;

const FLOAT: &str = r"([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)";

struct LossPatterns {
    per_token: Regex,
    fallbacks: Vec<Regex>,
}

fn patterns() -> &'static LossPatterns {
    static PATTERNS: OnceLock<LossPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let build = |label: &str| {
            Regex::new(&format!(r"(?i){}\s*{}", label, FLOAT)).expect("loss pattern is valid")
        };
        LossPatterns {
            per_token: build(r"train loss/token:"),
            fallbacks: vec![
                build(r"training loss:"),
                build(r"train_loss:"),
                build(r"avg_loss:"),
                build(r"epoch\s+\d+.*?loss:"),
            ],
        }
    })
}

/// Pull a loss value out of one payload.
///
/// The first pattern that matches decides; a rejected value does not fall
/// through to later patterns.
pub fn extract_loss(payload: &str) -> Option<f64> {
    let patterns = patterns();
    let captures = std::iter::once(&patterns.per_token)
        .chain(patterns.fallbacks.iter())
        .find_map(|re| re.captures(payload))?;

    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    (value.is_finite() && value < LOSS_UPPER_BOUND).then_some(value)
}

/// One point of a loss-vs-time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossSample {
    pub value: f64,
    /// Seconds since the previous sample of the run (or since run start)
    pub elapsed_secs: f64,
}

/// Accumulates the loss series of a single run
#[derive(Debug)]
pub struct LossTracker {
    samples: Vec<LossSample>,
    last: Instant,
}

impl LossTracker {
    pub fn new(started_at: Instant) -> Self {
        Self {
            samples: Vec::new(),
            last: started_at,
        }
    }

    /// Record a sample if `payload` reports a loss
    pub fn observe(&mut self, payload: &str, now: Instant) -> Option<LossSample> {
        let value = extract_loss(payload)?;
        let sample = LossSample {
            value,
            elapsed_secs: now.saturating_duration_since(self.last).as_secs_f64(),
        };
        self.last = now.max(self.last);
        self.samples.push(sample);

        debug!(
            loss = sample.value,
            elapsed_secs = sample.elapsed_secs,
            count = self.samples.len(),
            "Loss sample"
        );
        Some(sample)
    }

    pub fn samples(&self) -> &[LossSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<LossSample> {
        self.samples
    }

    /// Cumulative time of each sample since run start
    pub fn cumulative_secs(&self) -> Vec<f64> {
        self.samples
            .iter()
            .scan(0.0, |total, s| {
                *total += s.elapsed_secs;
                Some(*total)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_per_token_loss() {
        assert_eq!(extract_loss("train loss/token: 0.4532"), Some(0.4532));
        assert_eq!(extract_loss("Step 40 | TRAIN LOSS/TOKEN: 1.5e-1"), Some(0.15));
    }

    #[test]
    fn test_per_token_takes_precedence() {
        assert_eq!(
            extract_loss("training loss: 2.0 train loss/token: 0.4532"),
            Some(0.4532)
        );
    }

    #[test]
    fn test_fallback_patterns_in_order() {
        assert_eq!(extract_loss("training loss: 2.13"), Some(2.13));
        assert_eq!(extract_loss("{'train_loss': 0.9}"), None);
        assert_eq!(extract_loss("train_loss: 0.9"), Some(0.9));
        assert_eq!(extract_loss("avg_loss: .75"), Some(0.75));
        assert_eq!(extract_loss("Epoch 3 finished, val loss: 0.31"), Some(0.31));
        assert_eq!(extract_loss("avg_loss: 0.2 training loss: 0.3"), Some(0.3));
    }

    #[test]
    fn test_bound_rejection() {
        assert_eq!(extract_loss("training loss: 150.2"), None);
        assert_eq!(extract_loss("training loss: 100"), None);
        assert_eq!(extract_loss("training loss: 99.99"), Some(99.99));
    }

    #[test]
    fn test_rejected_candidate_does_not_fall_through() {
        assert_eq!(extract_loss("train loss/token: 512 training loss: 0.5"), None);
    }

    #[test]
    fn test_no_loss() {
        assert_eq!(extract_loss("Loading dataset ag_news"), None);
        assert_eq!(extract_loss("training loss: n/a"), None);
    }

    #[test]
    fn test_tracker_elapsed_is_delta_since_previous() {
        let start = Instant::now();
        let mut tracker = LossTracker::new(start);

        let first = tracker
            .observe("training loss: 1.0", start + Duration::from_secs(2))
            .unwrap();
        assert_eq!(first.elapsed_secs, 2.0);

        assert!(tracker
            .observe("nothing here", start + Duration::from_secs(3))
            .is_none());

        let second = tracker
            .observe("training loss: 0.5", start + Duration::from_secs(5))
            .unwrap();
        assert_eq!(second.elapsed_secs, 3.0);

        assert_eq!(tracker.samples().len(), 2);
        assert_eq!(tracker.cumulative_secs(), vec![2.0, 5.0]);
    }
}
