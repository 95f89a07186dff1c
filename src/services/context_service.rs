use crate::error::{Error, Result};
use crate::models::paper::Paper;
use crate::models::request::GenerationRequest;
use crate::models::resource::ResourceExcerpt;
use crate::services::paper_store::PaperStore;
use crate::utils::text::truncate_chars;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const RESOURCE_LIMIT: i64 = 100;
const RESOURCE_EXCERPT_CHARS: usize = 2000;
const APPROVED_LIMIT: i64 = 50;
const APPROVED_RENDERED: usize = 5;
const QUESTIONS_PER_PAPER: usize = 8;
const QUESTION_SNIPPET_CHARS: usize = 400;
const ANSWER_SNIPPET_CHARS: usize = 200;
const REGENERATED_LIMIT: i64 = 10;
const REGENERATED_RENDERED: usize = 3;
const PROMPT_SNIPPET_CHARS: usize = 300;
const RULE: &str = "============================================================";

/// Builds the bounded reference blob handed to the generation prompt.
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn PaperStore>,
    char_budget: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn PaperStore>, char_budget: usize) -> Self {
        Self { store, char_budget }
    }

    pub async fn gather(&self, request: &GenerationRequest) -> Result<String> {
        let subject = request.subject.as_str();
        let department = request.department.as_str();
        tracing::info!("Gathering context for {} ({})", subject, department);

        let resources = self
            .store
            .resource_excerpts(request.requester, subject, department, RESOURCE_LIMIT)
            .await
            .map_err(store_error)?;
        let approved = self
            .store
            .approved_papers(subject, department, APPROVED_LIMIT)
            .await
            .map_err(store_error)?;
        let regenerated = self
            .store
            .regenerated_papers(request.requester, subject, department, REGENERATED_LIMIT)
            .await
            .map_err(store_error)?;

        tracing::info!(
            resources = resources.len(),
            approved = approved.len(),
            regenerated = regenerated.len(),
            "Context sources loaded"
        );
        if resources.is_empty() {
            tracing::warn!("No resources uploaded for {}; generating from general knowledge", subject);
        }

        let context = render_context(subject, department, &resources, &approved, &regenerated, self.char_budget);
        tracing::info!("Context size: {} characters", context.chars().count());
        Ok(context)
    }
}

fn store_error(e: Error) -> Error {
    match e {
        Error::ExternalService(_) => e,
        other => Error::ExternalService(format!("Document store error: {}", other)),
    }
}

pub fn render_context(
    subject: &str,
    department: &str,
    resources: &[ResourceExcerpt],
    approved: &[Paper],
    regenerated: &[Paper],
    char_budget: usize,
) -> String {
    let mut sections: Vec<String> = vec![
        format!("=== SUBJECT: {} ===", subject),
        format!("=== DEPARTMENT: {} ===", department),
    ];

    for resource in resources {
        if let Some(text) = resource.extracted_text.as_deref().filter(|t| !t.trim().is_empty()) {
            sections.push(format!("--- Resource: {} ---", resource.filename));
            sections.push(truncate_chars(text, RESOURCE_EXCERPT_CHARS).to_string());
        }
    }

    if approved.is_empty() {
        sections.push(format!("No approved papers found for {}", subject));
        sections.push(format!(
            "Generate questions strictly based on the {} curriculum and uploaded resources.",
            subject
        ));
    } else {
        sections.push(format!(
            "{RULE}\nREFERENCE: Previously Approved Papers for {subject}\nUse these as examples for question style and topics.\nDo not repeat these exact questions.\n{RULE}"
        ));
        for (i, paper) in approved.iter().take(APPROVED_RENDERED).enumerate() {
            sections.push(render_approved(i + 1, paper));
        }
        sections.push(format!(
            "{RULE}\nDUPLICATION PREVENTION RULES:\n\
             1. Do not copy questions word-for-word from above\n\
             2. If using similar topics, rephrase completely\n\
             3. Use different examples and scenarios\n\
             4. Vary the question format and approach\n\
             5. Generate unique questions while maintaining quality\n{RULE}"
        ));
    }

    if !regenerated.is_empty() {
        sections.push(format!(
            "{RULE}\nLEARNING FROM REGENERATED PAPERS:\nThese papers were regenerated; avoid repeating their patterns.\n{RULE}"
        ));
        for (i, paper) in regenerated.iter().take(REGENERATED_RENDERED).enumerate() {
            sections.push(render_regenerated(i + 1, paper));
        }
    }

    let full = sections.join("\n\n");
    truncate_chars(&full, char_budget).to_string()
}

fn render_approved(n: usize, paper: &Paper) -> String {
    let mut out = format!("--- Approved Paper {} ({} marks) ---", n, paper.total_marks);
    for (j, q) in paper.questions.iter().take(QUESTIONS_PER_PAPER).enumerate() {
        out.push_str(&format!(
            "\nQ{}. [{}] [{}] [{} marks]\nQuestion: {}\nAnswer: {}",
            j + 1,
            q.question_type,
            q.blooms_level,
            q.marks,
            truncate_chars(&q.question_text, QUESTION_SNIPPET_CHARS),
            truncate_chars(&q.answer_key, ANSWER_SNIPPET_CHARS),
        ));
    }

    let topics: BTreeSet<&str> = paper
        .questions
        .iter()
        .map(|q| q.unit.as_deref().unwrap_or("General"))
        .collect();
    let types: BTreeSet<&str> = paper.questions.iter().map(|q| q.question_type.as_str()).collect();
    out.push_str(&format!(
        "\nTopics covered: {}\nQuestion types used: {}",
        topics.into_iter().collect::<Vec<_>>().join(", "),
        types.into_iter().collect::<Vec<_>>().join(", ")
    ));
    out
}

fn render_regenerated(n: usize, paper: &Paper) -> String {
    let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
    for q in paper.questions.iter() {
        *distribution.entry(q.question_type.as_str()).or_default() += 1;
    }
    let distribution = distribution
        .iter()
        .map(|(t, c)| format!("{}: {}", t, c))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "--- Regenerated Paper {} (Regenerated {}x) ---\nFeedback: {}\nQuestion distribution: {}",
        n,
        paper.regeneration_count,
        truncate_chars(&paper.generation_prompt, PROMPT_SNIPPET_CHARS),
        distribution
    )
}
