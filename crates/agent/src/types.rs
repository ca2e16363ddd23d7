//! Run-scoped data: queries, passages, verdicts and answers.
//!
//! Nothing here is shared between runs. Values are created by the
//! orchestrator or its collaborators and never mutated afterwards; a new
//! retrieval replaces the evidence set wholesale.

use serde::{Deserialize, Serialize};

/// Collections are addressed by validated, case-insensitive names.
pub type TableId = quarry_knowledge::TableName;

/// A question at some rewrite generation.
///
/// `text` is what gets retrieved with; `original` is what the user asked and
/// is what evidence is judged and answered against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    original: String,
    generation: u32,
}

impl Query {
    /// The user's question, generation 0.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            original: text.clone(),
            text,
            generation: 0,
        }
    }

    /// A reformulation of this query, one generation later.
    pub fn rewritten(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            original: self.original.clone(),
            generation: self.generation + 1,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether `candidate` says the same thing, ignoring case and spacing.
    pub fn is_same_text(&self, candidate: &str) -> bool {
        normalize(&self.text) == normalize(candidate)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: String,

    /// Similarity in [-1, 1]
    pub score: f32,

    /// 0-based position within its retrieval batch
    pub rank: usize,
}

/// Ordered passages retrieved for one query generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSet {
    generation: u32,
    passages: Vec<Passage>,
}

impl EvidenceSet {
    /// Build an evidence set from passages in retrieval order.
    ///
    /// Ranks are assigned from the order given and scores are clamped to
    /// [-1, 1].
    pub fn from_ranked<I>(generation: u32, passages: I) -> Self
    where
        I: IntoIterator<Item = (String, String, f32)>,
    {
        let passages = passages
            .into_iter()
            .enumerate()
            .map(|(rank, (text, source, score))| Passage {
                text,
                source,
                score: if score.is_nan() { 0.0 } else { score.clamp(-1.0, 1.0) },
                rank,
            })
            .collect();

        Self {
            generation,
            passages,
        }
    }

    /// An empty evidence set for `generation`.
    pub fn empty(generation: u32) -> Self {
        Self {
            generation,
            passages: Vec::new(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Distinct sources in rank order.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for passage in &self.passages {
            if !seen.contains(&passage.source) {
                seen.push(passage.source.clone());
            }
        }
        seen
    }

    /// Render passages as numbered documents for a prompt.
    pub fn to_context(&self) -> String {
        self.passages
            .iter()
            .map(|p| format!("[Document {}]\n{}", p.rank + 1, p.text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

/// Whether an evidence set is enough to answer a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub sufficient: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    /// Generation of the query/evidence pair this verdict is about
    pub generation: u32,
}

impl RelevanceVerdict {
    pub fn sufficient(generation: u32) -> Self {
        Self {
            sufficient: true,
            rationale: None,
            generation,
        }
    }

    pub fn insufficient(generation: u32) -> Self {
        Self {
            sufficient: false,
            rationale: None,
            generation,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Synthesized from non-empty evidence
    Grounded,

    /// The configured fallback message; no generation call was made
    Fallback,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grounded => "grounded",
            Self::Fallback => "fallback",
        }
    }
}

/// The terminal result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub provenance: Provenance,

    /// Generation counter reached when the run finished
    pub generation: u32,
}

impl Answer {
    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewritten_query_keeps_original() {
        let q0 = Query::new("what is rust");
        let q1 = q0.rewritten("What is the Rust programming language?");

        assert_eq!(q0.generation(), 0);
        assert_eq!(q1.generation(), 1);
        assert_eq!(q1.original(), "what is rust");
        assert_eq!(q1.text(), "What is the Rust programming language?");
    }

    #[test]
    fn test_same_text_ignores_case_and_spacing() {
        let q = Query::new("What  is Rust?");
        assert!(q.is_same_text("what is rust?"));
        assert!(q.is_same_text("  WHAT is\nRust? "));
        assert!(!q.is_same_text("what is cargo?"));
    }

    #[test]
    fn test_evidence_ranks_and_clamps() {
        let evidence = EvidenceSet::from_ranked(
            2,
            vec![
                ("a".to_string(), "x.md".to_string(), 1.5),
                ("b".to_string(), "y.md".to_string(), f32::NAN),
                ("c".to_string(), "x.md".to_string(), -0.2),
            ],
        );

        assert_eq!(evidence.generation(), 2);
        let ranks: Vec<usize> = evidence.passages().iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(evidence.passages()[0].score, 1.0);
        assert_eq!(evidence.passages()[1].score, 0.0);
        assert_eq!(evidence.sources(), vec!["x.md", "y.md"]);
    }

    #[test]
    fn test_context_format() {
        let evidence = EvidenceSet::from_ranked(
            0,
            vec![
                ("first".to_string(), "a".to_string(), 0.9),
                ("second".to_string(), "b".to_string(), 0.8),
            ],
        );
        assert_eq!(
            evidence.to_context(),
            "[Document 1]\nfirst\n\n---\n\n[Document 2]\nsecond"
        );
    }

    #[test]
    fn test_provenance_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Provenance::Fallback).unwrap(),
            "\"fallback\""
        );
    }
}
