//! Core domain model for the judgment conversion pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "judgmental-core";

/// One judgment row, joined with the name of its court.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentRecord {
    pub id: i64,
    pub title: String,
    /// Exactly as stored; never reformatted.
    pub date: String,
    pub court_name: String,
    pub source_url: Option<String>,
}

/// "This judgment cites X."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReference {
    pub citation: String,
    pub title: String,
    pub filename: String,
}

/// "Y cites this judgment."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundReference {
    pub title: String,
    pub filename: String,
}

/// Everything the store knows about one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentMetadata {
    pub judgment: JudgmentRecord,
    /// In store-retrieval order.
    pub citations: Vec<String>,
    pub outbound: Vec<OutboundReference>,
    pub inbound: Vec<InboundReference>,
}

impl JudgmentMetadata {
    pub fn joined_citations(&self) -> String {
        self.citations.join(", ")
    }
}

/// Repair passes that can fire while cleaning an opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairLabel {
    MendUnclosedTags,
    EmptyParagraphsToBreaks,
}

impl RepairLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MendUnclosedTags => "mend_unclosed_tags",
            Self::EmptyParagraphsToBreaks => "empty_paragraphs_to_breaks",
        }
    }
}

impl fmt::Display for RepairLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NoMetadata,
    CantFindElement,
    StandardConversionError,
    StoreError,
    IoError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoMetadata => "NoMetadata",
            Self::CantFindElement => "CantFindElement",
            Self::StandardConversionError => "StandardConversionError",
            Self::StoreError => "StoreError",
            Self::IoError => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of converting one document, passed by value to the completion handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Success { repairs: Vec<RepairLabel> },
    Failure { kind: ErrorKind, message: String },
}

impl ConversionOutcome {
    pub fn success(repairs: Vec<RepairLabel>) -> Self {
        Self::Success { repairs }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(citations: &[&str]) -> JudgmentMetadata {
        JudgmentMetadata {
            judgment: JudgmentRecord {
                id: 1,
                title: "R v Smith".into(),
                date: "12 March 2004".into(),
                court_name: "Court of Appeal".into(),
                source_url: None,
            },
            citations: citations.iter().map(|c| c.to_string()).collect(),
            outbound: vec![],
            inbound: vec![],
        }
    }

    #[test]
    fn citations_join_with_comma_space_in_order() {
        let meta = metadata(&["[2004] EWCA Crim 1", "[2004] 2 Cr App R 5"]);
        assert_eq!(meta.joined_citations(), "[2004] EWCA Crim 1, [2004] 2 Cr App R 5");
        assert_eq!(metadata(&[]).joined_citations(), "");
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let ok = ConversionOutcome::success(vec![RepairLabel::MendUnclosedTags]);
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["repairs"][0], "mend_unclosed_tags");

        let failed = ConversionOutcome::failure(ErrorKind::NoMetadata, "no metadata found");
        assert!(!failed.is_success());
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["kind"], "NoMetadata");
    }
}
