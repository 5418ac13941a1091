//! Prompt text and fixed response strings.

use std::fmt::Write;

use precedent_core::{Passage, Turn};

/// Prior turns folded into a reformulation prompt.
pub const HISTORY_WINDOW: usize = 10;

pub const NO_CASES: &str = "No relevant cases found.";

pub const APOLOGY: &str =
    "I apologize, but I'm currently unable to generate a response. Please try again later.";

pub const DISCLAIMER: &str = "This information is for educational purposes only and does not \
constitute legal advice. Consult a licensed attorney for advice specific to your situation.";

pub const SYSTEM_PROMPT: &str = "\
You are a legal research assistant that answers questions about case law.

Rules:
- Base every statement on the retrieved cases supplied with the question. Do not rely on outside knowledge.
- Cite cases inline as [Case Name, Citation] using the names and citations exactly as given.
- If the retrieved cases do not adequately address the question, say that you do not have enough information rather than guessing.
- Distinguish holdings from dicta where the text allows it, and note the court and date when they matter.
- Write for a non-lawyer: plain language, short paragraphs.
- End with this disclaimer: This information is for educational purposes only and does not constitute legal advice. Consult a licensed attorney for advice specific to your situation.";

/// `User: ...` / `Assistant: ...` lines for the most recent turns.
pub fn format_history(turns: &[Turn]) -> String {
    let start = turns.len().saturating_sub(HISTORY_WINDOW);
    turns[start..]
        .iter()
        .map(|t| format!("{}: {}", t.role.label(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn reformulation_prompt(history: &[Turn], follow_up: &str) -> String {
    format!(
        "Given the conversation history and the follow-up question, rewrite the follow-up \
question to be a standalone question that includes necessary context.

Conversation history:
{}

Follow-up question: {follow_up}

Rewritten standalone question:",
        format_history(history)
    )
}

/// Render retrieved passages as numbered case blocks for the generation prompt.
pub fn format_context(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return NO_CASES.to_string();
    }

    let mut out = String::new();
    for (i, p) in passages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "\n--- Case {n} ---\n\
             Case Name: {}\n\
             Court: {}\n\
             Date: {}\n\
             Citation: {}\n\
             Relevance Score: {:.2}\n\
             Content:\n{}\n",
            or_unknown(&p.case_name),
            or_unknown(&p.court),
            or_unknown(&p.date),
            or_unknown(&p.citation),
            p.score,
            p.text,
            n = i + 1,
        );
    }
    out
}

pub fn generation_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following retrieved legal cases, answer the user's question.

Retrieved Cases:
{context}

User Question: {question}

Remember to:
1. Cite specific cases using [Case Name, Citation] format
2. Ground all claims in the retrieved cases
3. If the retrieved cases don't adequately address the question, say so
4. Include the legal disclaimer

Answer:"
    )
}

pub fn self_assessment_prompt(answer: &str) -> String {
    format!(
        "You previously generated this answer to a legal research question:

\"{answer}\"

Assess your confidence in this answer based on:
1. How directly the retrieved documents addressed the question
2. The quality and relevance of the citations
3. Whether you had to make inferences beyond what was explicitly stated

Provide ONLY one word as your confidence level: HIGH, MEDIUM, LOW, or INSUFFICIENT

Confidence:"
    )
}

fn or_unknown(s: &str) -> &str {
    if s.trim().is_empty() { "Unknown" } else { s }
}
