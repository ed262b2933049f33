//! Human-readable class names per dataset

use std::collections::HashMap;

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "yahoo_answers_topics",
        &[
            "Society & Culture", "Science & Mathematics", "Health", "Education & Reference",
            "Computers & Internet", "Sports", "Business & Finance", "Entertainment & Music",
            "Family & Relationships", "Politics & Government",
        ],
    ),
    ("ag_news", &["World", "Sports", "Business", "Sci/Tech"]),
    ("emotion", &["joy", "sadness", "anger", "fear", "surprise", "love"]),
    ("imdb", &["Negative", "Positive"]),
    ("yelp_polarity", &["Negative", "Positive"]),
    ("amazon_polarity", &["Negative", "Positive"]),
    ("rotten_tomatoes", &["Negative", "Positive"]),
    ("trec", &["Description", "Entity", "Abbreviation", "Human", "Location", "Numeric"]),
    ("yelp_review_full", &["1 Star", "2 Stars", "3 Stars", "4 Stars", "5 Stars"]),
    (
        "dbpedia_14",
        &[
            "Company", "EducationalInstitution", "Artist", "Athlete", "OfficeHolder",
            "MeanOfTransportation", "Building", "NaturalPlace", "Village", "Animal",
            "Plant", "Album", "Film", "WrittenWork",
        ],
    ),
    (
        "go_emotions",
        &[
            "admiration", "amusement", "anger", "annoyance", "approval", "caring",
            "confusion", "curiosity", "desire", "disappointment", "disapproval",
            "disgust", "embarrassment", "excitement", "fear", "gratitude", "grief",
            "joy", "love", "nervousness", "optimism", "pride", "realization",
            "relief", "remorse", "sadness", "surprise", "neutral",
        ],
    ),
    (
        "banking77",
        &[
            "General inquiries", "Account management", "Card services", "Loan services",
            "Investment services", "Insurance services", "Fraud and security",
            "Technical support", "Mobile banking", "Online banking", "ATM services",
            "Branch services", "International services", "Payment services",
            "Credit services", "Debit services", "Savings accounts", "Checking accounts",
            "Mortgage services", "Personal loans", "Business loans", "Student loans",
            "Auto loans", "Home equity loans", "Credit cards", "Debit cards",
            "Prepaid cards", "Gift cards", "Travel cards", "Business cards",
            "Rewards cards", "Cash back cards", "Balance transfer cards",
            "Secured cards", "Unsecured cards", "Co-branded cards", "Affinity cards",
            "Corporate cards", "Fleet cards", "Purchasing cards", "Virtual cards",
            "Contactless cards", "Chip cards", "Magnetic stripe cards", "EMV cards",
            "NFC cards", "QR code cards", "Barcode cards", "Smart cards",
            "Memory cards", "Processor cards", "Contact cards", "Contactless cards",
            "Dual interface cards", "Hybrid cards", "Combo cards", "Multi-application cards",
            "Single application cards", "Open loop cards", "Closed loop cards",
            "Private label cards", "White label cards", "Co-branded cards",
            "Affinity cards", "Corporate cards", "Fleet cards", "Purchasing cards",
            "Virtual cards", "Contactless cards", "Chip cards", "Magnetic stripe cards",
            "EMV cards", "NFC cards", "QR code cards", "Barcode cards", "Smart cards",
        ],
    ),
];

/// Dataset id → ordered class names. Built once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ClassLabelTable {
    datasets: HashMap<String, Vec<String>>,
}

impl ClassLabelTable {
    /// Table of the datasets the backend offers
    pub fn builtin() -> Self {
        let datasets = BUILTIN
            .iter()
            .map(|(name, labels)| {
                (
                    name.to_string(),
                    labels.iter().map(|l| l.to_string()).collect(),
                )
            })
            .collect();
        Self { datasets }
    }

    /// Add or replace datasets, e.g. from the `[labels]` config table
    pub fn with_overrides(mut self, overrides: &HashMap<String, Vec<String>>) -> Self {
        for (name, labels) in overrides {
            self.datasets.insert(name.clone(), labels.clone());
        }
        self
    }

    /// Class names for a dataset; empty when the dataset is unknown
    pub fn labels_for(&self, dataset: &str) -> &[String] {
        self.datasets.get(dataset).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn resolve(&self, dataset: &str, raw: &str) -> String {
        resolve_label(self.labels_for(dataset), raw)
    }
}

impl Default for ClassLabelTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Translate a raw label from backend text into a class name.
///
/// Known names pass through; otherwise the digits of `raw` are read as a
/// class index. Anything that does not resolve is returned unchanged.
pub fn resolve_label(labels: &[String], raw: &str) -> String {
    if labels.iter().any(|l| l == raw) {
        return raw.to_string();
    }

    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits
        .parse::<usize>()
        .ok()
        .and_then(|idx| labels.get(idx))
        .cloned()
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ag_news() {
        let table = ClassLabelTable::builtin();
        assert_eq!(table.resolve("ag_news", "2"), "Business");
        assert_eq!(table.resolve("ag_news", "Sports"), "Sports");
        assert_eq!(table.resolve("ag_news", "7"), "7");
    }

    #[test]
    fn test_resolve_strips_non_digits() {
        let table = ClassLabelTable::builtin();
        assert_eq!(table.resolve("ag_news", "Class 3"), "Sci/Tech");
        assert_eq!(table.resolve("imdb", "label_1"), "Positive");
        assert_eq!(table.resolve("imdb", "unknown"), "unknown");
        assert_eq!(table.resolve("imdb", ""), "");
    }

    #[test]
    fn test_unknown_dataset_keeps_raw() {
        let table = ClassLabelTable::builtin();
        assert!(table.labels_for("mnist").is_empty());
        assert_eq!(table.resolve("mnist", "3"), "3");
    }

    #[test]
    fn test_builtin_sizes() {
        let table = ClassLabelTable::builtin();
        assert_eq!(table.labels_for("dbpedia_14").len(), 14);
        assert_eq!(table.labels_for("go_emotions").len(), 28);
        assert_eq!(table.labels_for("yelp_review_full")[0], "1 Star");
    }

    #[test]
    fn test_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("sst2".to_string(), vec!["neg".to_string(), "pos".to_string()]);
        let table = ClassLabelTable::builtin().with_overrides(&overrides);
        assert_eq!(table.resolve("sst2", "1"), "pos");
        assert_eq!(table.resolve("ag_news", "0"), "World");
    }
}
