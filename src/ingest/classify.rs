//! Classification of server-sent lines into log, results and completion events

/// Prefix carried by every event line
pub const EVENT_PREFIX: &str = "data: ";

/// Marker the backend prints when a run has finished
pub const COMPLETION_MARKER: &str = "Training complete";

/// Substrings that route a payload to the results buffer.
///
/// This is a keyword heuristic: an ordinary log line that happens to contain
/// one of these (e.g. "World") lands in the results buffer too.
const RESULT_MARKERS: &[&str] = &[
    "Sample Results and Predictions:",
    "Sample Text Examples with Predictions:",
    "First 10 predictions:",
    "Last 10 predictions:",
    "Unique predicted classes:",
    "Prediction distribution:",
    "Calculated accuracy:",
    "Text (truncated)",
    "✓",
    "✗",
    "Class",
    "Society & Culture",
    "Science & Mathematics",
    "Health",
    "Education",
    "World",
    "Sports",
    "Business",
    "Negative",
    "Positive",
];

/// A classified event line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// Plain training log output
    Log(&'a str),
    /// Part of the results/comparison section
    Results(&'a str),
    /// The completion marker; ingestion stops here
    Complete(&'a str),
}

impl<'a> Event<'a> {
    pub fn payload(&self) -> &'a str {
        match self {
            Event::Log(p) | Event::Results(p) | Event::Complete(p) => p,
        }
    }
}

/// Classify one framed line. Lines without the event prefix yield `None`.
pub fn classify(line: &str) -> Option<Event<'_>> {
    let payload = line.strip_prefix(EVENT_PREFIX)?;

    if payload.contains(COMPLETION_MARKER) {
        Some(Event::Complete(payload))
    } else if is_results_payload(payload) {
        Some(Event::Results(payload))
    } else {
        Some(Event::Log(payload))
    }
}

/// Whether a payload belongs to the results section
pub fn is_results_payload(payload: &str) -> bool {
    RESULT_MARKERS.iter().any(|marker| payload.contains(marker))
        || (payload.contains("True") && payload.contains("Pred"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_event_lines_are_ignored() {
        assert_eq!(classify(": keep-alive"), None);
        assert_eq!(classify(""), None);
        assert_eq!(classify("event: message"), None);
        assert_eq!(classify("data:no space"), None);
        assert_eq!(classify(" data: indented"), None);
    }

    #[test]
    fn test_plain_log() {
        assert_eq!(
            classify("data: Epoch 1/3 training loss: 0.52"),
            Some(Event::Log("Epoch 1/3 training loss: 0.52"))
        );
        assert_eq!(classify("data: "), Some(Event::Log("")));
    }

    #[test]
    fn test_results_markers() {
        assert!(matches!(
            classify("data: Sample Results and Predictions:"),
            Some(Event::Results(_))
        ));
        assert!(matches!(
            classify("data: True label vs Pred label"),
            Some(Event::Results(_))
        ));
        assert!(matches!(classify("data: row ✗"), Some(Event::Results(_))));
        // Only one half of the pair is not enough
        assert!(matches!(classify("data: True"), Some(Event::Log(_))));
    }

    #[test]
    fn test_coincidental_marker_is_results() {
        assert!(matches!(
            classify("data: Loading World Bank tokenizer"),
            Some(Event::Results(_))
        ));
    }

    #[test]
    fn test_completion_wins_over_results() {
        assert_eq!(
            classify("data: ✓ Training complete"),
            Some(Event::Complete("✓ Training complete"))
        );
    }
}
