//! Terminal card for a query response.
//!
//! Sections with nothing to show are skipped. The disclaimer always closes
//! the card.

use std::fmt;

use precedent_core::Citation;
use precedent_rag::{NoteSeverity, QueryResponse};

const MAX_SOURCES: usize = 10;

/// `Display` adapter that renders a [`QueryResponse`] as a card.
pub struct AnswerCard<'a>(pub &'a QueryResponse);

impl fmt::Display for AnswerCard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;

        writeln!(f, "=== Answer ===")?;
        writeln!(f, "{}", r.answer)?;
        writeln!(f)?;

        writeln!(f, "Confidence")?;
        writeln!(f, "  {:<18} {} ({:.2})", "overall", r.confidence, r.confidence_score)?;
        writeln!(f, "  {:<18} {:.2}", "retrieval", r.retrieval_confidence)?;
        writeln!(
            f,
            "  {:<18} {} ({:.2})",
            "model", r.model_confidence_level, r.model_confidence
        )?;
        if let Some(model) = &r.answered_by {
            writeln!(f, "  {:<18} {}", "answered by", model)?;
        }
        writeln!(f)?;

        if !r.citations.is_empty() {
            writeln!(f, "Citations ({})", r.citations.len())?;
            for (i, c) in r.citations.iter().enumerate() {
                write_citation(f, i + 1, c)?;
            }
            writeln!(f)?;
        }

        if !r.passages.is_empty() {
            writeln!(f, "Sources ({})", r.passages.len())?;
            for p in r.passages.iter().take(MAX_SOURCES) {
                writeln!(
                    f,
                    "  {:.2}  {} (chunk {}/{})",
                    p.score,
                    p.case_name,
                    p.chunk_index + 1,
                    p.total_chunks
                )?;
            }
            if r.passages.len() > MAX_SOURCES {
                writeln!(f, "    ... and {} more", r.passages.len() - MAX_SOURCES)?;
            }
            writeln!(f)?;
        }

        if !r.notes.is_empty() {
            writeln!(f, "Notes")?;
            for n in &r.notes {
                let severity = match n.severity {
                    NoteSeverity::Soft => "soft",
                    NoteSeverity::Hard => "hard",
                };
                writeln!(f, "  [{severity}] {}: {}", n.stage.as_str(), n.message)?;
            }
            writeln!(f)?;
        }

        write!(f, "{}", r.disclaimer)
    }
}

fn write_citation(f: &mut fmt::Formatter<'_>, n: usize, c: &Citation) -> fmt::Result {
    writeln!(f, "  [{n}] {}, {}", c.case_name, c.citation)?;
    writeln!(f, "      {}, {}", c.court, c.date)?;
    if let Some(url) = &c.url {
        writeln!(f, "      {url}")?;
    }
    writeln!(f, "      \"{}\"", c.excerpt)
}
