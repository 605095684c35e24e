//! Prompt templates for grounded answer generation.

use crate::models::AssembledContext;

/// System prompt sent alongside [`grounded_answer_prompt`].
pub const ANALYST_SYSTEM_PROMPT: &str = "You are a cyber threat intelligence analyst. \
Answer strictly from the supplied sources and cite them by number.";

/// Generate a prompt asking for an answer grounded in `context`.
///
/// Each source block carries its citation number; the model is told to cite
/// those numbers and to say so when the sources do not answer the question.
///
/// # Example
/// ```
/// use threatrag::llm::prompts::grounded_answer_prompt;
/// use threatrag::models::{AssembledContext, ContextBudget};
///
/// let context = AssembledContext::empty("Who is APT29?", ContextBudget::chars(100));
/// let prompt = grounded_answer_prompt("Who is APT29?", &context);
/// assert!(prompt.contains("Who is APT29?"));
/// ```
pub fn grounded_answer_prompt(question: &str, context: &AssembledContext) -> String {
    let sources = if context.is_empty() {
        "(no sources matched the query)".to_string()
    } else {
        context.render()
    };

    format!(
        r#"Answer the question using only the numbered sources below.

Rules:
- Cite every factual sentence with the number of its source, e.g. [1] or [1][3].
- Do not use knowledge that is not in the sources.
- If the sources do not contain the answer, say that the available intelligence is insufficient.
- Keep threat actor names, technique IDs and CVE IDs exactly as written in the sources.

Sources:
{sources}

Question: {question}

Answer:"#
    )
}
