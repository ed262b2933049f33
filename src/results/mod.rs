//! Structured data recovered from the backend's results text
//!
//! The backend prints its evaluation as human-readable text. Everything that
//! depends on that layout (column offsets, markers, label phrasing) lives in
//! this module, so a structured event feed could replace it in one place.

mod labels;
mod table;

pub use labels::{resolve_label, ClassLabelTable};
pub use table::{
    parse_results, parse_row, parse_summary, AccuracySummary, ComparisonRow,
    CustomSampleAnalysis, ParsedResults, Verdict,
};
