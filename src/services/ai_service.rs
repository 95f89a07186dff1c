use crate::error::{Error, Result};
use crate::models::question::{BloomsLevel, CandidateQuestion, QuestionType};
use crate::models::request::GenerationRequest;
use crate::services::planner::PlanOutline;
use crate::utils::text::{strip_markdown_fences, truncate_chars};
use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = r#"You are an expert exam question generator for university-level courses.

Rules you must follow exactly:
1. Generate exactly the requested number of questions.
2. Each question carries exactly the marks listed for its slot; the total must match.
3. Every question must belong to the stated subject and department.
4. Use the syllabus context and approved paper examples as reference for topics and style.
5. Never copy a question from the context word-for-word; rephrase and use new scenarios.
6. Return ONLY a JSON array. No markdown, no commentary.

Question types: MCQ, Short Answer, Medium Answer, Long Answer, Reasoning, Analytical, Calculation, Diagrammatic.
Cognitive levels: Remember, Understand, Apply, Analyze, Evaluate, Create.

Each array element has this shape:
{
  "question_text": "What is the time complexity of binary search?\nA) O(n)\nB) O(log n)\nC) O(n^2)\nD) O(1)",
  "blooms_level": "Remember",
  "question_type": "MCQ",
  "marks": 1,
  "answer_key": "B) O(log n). The search space halves every step.",
  "unit": "Algorithm Analysis"
}
MCQ options go inside question_text, one per line as A) B) C) D), separated by \n.
All four options must be plausible and exactly one correct."#;

/// One system + user message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Raw model text for one prompt.
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        client: Client,
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
            timeout,
        }
    }

    async fn chat(&self, payload: JsonValue) -> anyhow::Result<String> {
        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .context("chat completion request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("chat completion status {}: {}", status, text);
        }

        let body: JsonValue = res.json().await.context("chat completion body")?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("chat completion response has no message content"))
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": self.temperature
        });
        self.chat(payload)
            .await
            .map_err(|e| Error::ExternalService(format!("Generation service error: {:#}", e)))
    }
}

/// What one generation call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Parsed model output, unmodified.
    Candidates(Vec<CandidateQuestion>),
    /// The model output could not be decoded; deterministic templates stand in.
    Fallback(Vec<CandidateQuestion>),
    /// Valid JSON of the wrong shape. Retryable.
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseFailure {
    #[error("response is not valid JSON: {0}")]
    Undecodable(#[from] serde_json::Error),
    #[error("response is not a list of question records")]
    NotAList,
}

/// Inputs for a single attempt.
pub struct Attempt<'a> {
    pub request: &'a GenerationRequest,
    pub outline: &'a PlanOutline,
    pub context: &'a str,
    pub attempt: u32,
    pub feedback: Option<&'a str>,
}

#[derive(Clone)]
pub struct GenerationAgent {
    generator: Arc<dyn TextGenerator>,
    prompt_context_chars: usize,
}

impl GenerationAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, prompt_context_chars: usize) -> Self {
        Self {
            generator,
            prompt_context_chars,
        }
    }

    pub async fn generate(&self, attempt: &Attempt<'_>) -> Result<GenerationOutcome> {
        let plan = &attempt.outline.plan;
        tracing::info!(
            subject = %attempt.request.subject,
            questions = plan.len(),
            total_marks = attempt.request.total_marks,
            attempt = attempt.attempt,
            "Requesting question generation"
        );
        if attempt.request.instruction().to_uppercase().contains("REGENERATION") {
            tracing::info!("Regeneration prompt; original requirements restated");
        }

        let prompt = build_prompt(attempt, self.prompt_context_chars);
        let raw = self.generator.complete(&prompt).await?;

        match parse_candidates(&raw) {
            Ok(candidates) => {
                tracing::info!("Model returned {} candidate questions", candidates.len());
                Ok(GenerationOutcome::Candidates(candidates))
            }
            Err(ParseFailure::Undecodable(e)) => {
                tracing::warn!("Model output was not JSON ({}); using fallback questions", e);
                Ok(GenerationOutcome::Fallback(fallback_questions(
                    &attempt.request.subject,
                    attempt.request.total_marks,
                )))
            }
            Err(ParseFailure::NotAList) => {
                tracing::warn!("Model output was JSON but not a question list");
                Ok(GenerationOutcome::Rejected(ParseFailure::NotAList.to_string()))
            }
        }
    }
}

/// Accepts a bare array or an object with a `questions` array, optionally fenced.
pub fn parse_candidates(raw: &str) -> std::result::Result<Vec<CandidateQuestion>, ParseFailure> {
    let value: JsonValue = serde_json::from_str(strip_markdown_fences(raw))?;
    let items = match &value {
        JsonValue::Array(items) => items,
        JsonValue::Object(map) => match map.get("questions") {
            Some(JsonValue::Array(items)) => items,
            _ => return Err(ParseFailure::NotAList),
        },
        _ => return Err(ParseFailure::NotAList),
    };

    items
        .iter()
        .map(|item| {
            if !item.is_object() {
                return Err(ParseFailure::NotAList);
            }
            CandidateQuestion::deserialize(item).map_err(|_| ParseFailure::NotAList)
        })
        .collect()
}

/// Five ten-mark templates, cut down to `total / 10`.
pub fn fallback_questions(subject: &str, total_marks: u32) -> Vec<CandidateQuestion> {
    const TEMPLATES: [(BloomsLevel, QuestionType); 5] = [
        (BloomsLevel::Remember, QuestionType::Reasoning),
        (BloomsLevel::Understand, QuestionType::Analytical),
        (BloomsLevel::Apply, QuestionType::Calculation),
        (BloomsLevel::Analyze, QuestionType::Reasoning),
        (BloomsLevel::Evaluate, QuestionType::Analytical),
    ];
    let keep = (total_marks / 10) as usize;

    TEMPLATES
        .iter()
        .take(keep)
        .enumerate()
        .map(|(i, (level, kind))| CandidateQuestion {
            question_text: Some(format!("Question {} for {} - {} level question", i + 1, subject, level)),
            blooms_level: Some(*level),
            question_type: Some(*kind),
            marks: Some(10),
            answer_key: Some(format!("Answer for question {}", i + 1)),
            ..Default::default()
        })
        .collect()
}

/// Share of candidates whose text or answer mentions any word of the subject.
pub fn relevance_ratio(candidates: &[CandidateQuestion], subject: &str) -> f32 {
    let keywords: Vec<String> = subject.split_whitespace().map(|w| w.to_lowercase()).collect();
    if keywords.is_empty() {
        return 1.0;
    }
    if candidates.is_empty() {
        return 0.0;
    }
    let relevant = candidates
        .iter()
        .filter(|c| {
            let combined = format!(
                "{} {}",
                c.text().to_lowercase(),
                c.answer_key.as_deref().unwrap_or("").to_lowercase()
            );
            keywords.iter().any(|k| combined.contains(k.as_str()))
        })
        .count();
    relevant as f32 / candidates.len() as f32
}

/// Cognitive levels suggested for a question type when the request gives no hints.
pub fn default_blooms(kind: QuestionType) -> &'static [BloomsLevel] {
    use BloomsLevel::*;
    match kind {
        QuestionType::Mcq => &[Remember, Understand],
        QuestionType::ShortAnswer => &[Understand, Apply],
        QuestionType::MediumAnswer => &[Apply, Analyze],
        QuestionType::LongAnswer => &[Analyze, Evaluate, Create],
        _ => &[Apply, Analyze],
    }
}

pub fn build_prompt(attempt: &Attempt<'_>, context_chars: usize) -> GenerationPrompt {
    let request = attempt.request;
    let plan = &attempt.outline.plan;
    let types = attempt.outline.slot_types();

    let requirements = plan
        .slots()
        .iter()
        .zip(&types)
        .enumerate()
        .map(|(i, (marks, kind))| {
            let unit = if *marks == 1 { "mark" } else { "marks" };
            match kind {
                Some(kind) => format!("Q{}: {} {} ({})", i + 1, marks, unit, kind),
                None => format!("Q{}: {} {}", i + 1, marks, unit),
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let blooms_target = if request.blooms_hints.is_empty() {
        let mut kinds: Vec<QuestionType> = types.iter().flatten().copied().collect();
        kinds.sort();
        kinds.dedup();
        if kinds.is_empty() {
            "Spread questions across Remember, Understand, Apply, Analyze, Evaluate and Create.".to_string()
        } else {
            kinds
                .iter()
                .map(|k| {
                    let levels: Vec<&str> = default_blooms(*k).iter().map(|l| l.as_str()).collect();
                    format!("{} -> {}", k, levels.join("/"))
                })
                .collect::<Vec<_>>()
                .join("; ")
        }
    } else {
        request
            .blooms_hints
            .iter()
            .map(|(level, count)| format!("{}: {}", level, count))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let instruction = match request.instruction() {
        "" => "Generate diverse questions covering the syllabus.",
        text => text,
    };
    let mix = request.source_mix;

    let mut user = format!(
        "SUBJECT: {subject}\nDEPARTMENT: {department}\nTOTAL MARKS: {total}\n\n\
         Every question must be about {subject} topics, using {subject} terminology.\n\n\
         TEACHER'S INSTRUCTIONS (follow strictly):\n{instruction}\n\n\
         MANDATORY REQUIREMENTS:\n\
         - Generate exactly {count} questions\n\
         - Total marks exactly {total}\n\
         - Per-question requirements:\n{requirements}\n\
         - Cognitive level targets: {blooms_target}\n\
         - Aim for roughly {previous}% questions in the style of previous papers, {creative}% creative variations and {new}% entirely new questions\n\n\
         SYLLABUS CONTEXT AND APPROVED PAPER EXAMPLES:\n{context}\n\n\
         Do not reuse any question shown above. Questions that are off-subject or duplicated will be rejected.\n\n\
         Attempt: {attempt}",
        subject = request.subject,
        department = request.department,
        total = request.total_marks,
        instruction = instruction,
        count = plan.len(),
        requirements = requirements,
        blooms_target = blooms_target,
        previous = mix.previous,
        creative = mix.creative,
        new = mix.new,
        context = truncate_chars(attempt.context, context_chars),
        attempt = attempt.attempt + 1,
    );
    if let Some(feedback) = attempt.feedback.filter(|f| !f.is_empty()) {
        user.push_str(&format!("\n\nThe previous attempt was rejected: {}\nFix this while keeping every requirement above.", feedback));
    }
    user.push_str(&format!("\n\nNow generate {} questions as a JSON array:", plan.len()));

    GenerationPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::planner::outline_instruction;
    use uuid::Uuid;

    fn request() -> GenerationRequest {
        GenerationRequest::new(Uuid::new_v4(), "Data Structures", "CS", 20)
            .with_instruction("10 mcqs of 1 marks each, 5 short questions of 2 marks each")
    }

    #[test]
    fn parses_fenced_array() {
        let raw = "```json\n[{\"question_text\": \"What is a stack?\", \"marks\": 2}]\n```";
        let parsed = parse_candidates(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text(), "What is a stack?");
        assert_eq!(parsed[0].marks, Some(2));
    }

    #[test]
    fn parses_questions_wrapper() {
        let raw = r#"{"questions": [{"question_text": "Q1"}, {"question_text": "Q2"}]}"#;
        assert_eq!(parse_candidates(raw).unwrap().len(), 2);
    }

    #[test]
    fn classifies_parse_failures() {
        assert!(matches!(parse_candidates("Sure! Here are your questions"), Err(ParseFailure::Undecodable(_))));
        assert!(matches!(parse_candidates(r#"{"answer": 42}"#), Err(ParseFailure::NotAList)));
        assert!(matches!(parse_candidates(r#"["just", "strings"]"#), Err(ParseFailure::NotAList)));
    }

    #[test]
    fn fallback_is_truncated_to_total_over_ten() {
        assert_eq!(fallback_questions("Physics", 100).len(), 5);
        let three = fallback_questions("Physics", 35);
        assert_eq!(three.len(), 3);
        assert_eq!(three[2].question_type, Some(QuestionType::Calculation));
        assert!(three.iter().all(|q| q.marks == Some(10) && q.missing_fields().is_empty()));
        assert!(fallback_questions("Physics", 9).is_empty());
    }

    #[test]
    fn relevance_counts_subject_keywords() {
        let on = CandidateQuestion {
            question_text: Some("Explain a binary tree.".into()),
            answer_key: Some("A tree-based data structure".into()),
            ..Default::default()
        };
        let off = CandidateQuestion {
            question_text: Some("Who painted the Mona Lisa?".into()),
            ..Default::default()
        };
        assert_eq!(relevance_ratio(&[on.clone(), off], "Data Structures"), 0.5);
        assert_eq!(relevance_ratio(&[on], "Data Structures"), 1.0);
        assert_eq!(relevance_ratio(&[], "Data Structures"), 0.0);
    }

    #[test]
    fn prompt_lists_every_slot() {
        let req = request();
        let outline = outline_instruction(req.instruction(), req.total_marks);
        let attempt = Attempt {
            request: &req,
            outline: &outline,
            context: "context",
            attempt: 1,
            feedback: Some("Expected 15 questions, got 12"),
        };
        let prompt = build_prompt(&attempt, 5000);
        assert!(prompt.user.contains("Q1: 1 mark (MCQ)"));
        assert!(prompt.user.contains("Q15: 2 marks (Short Answer)"));
        assert!(prompt.user.contains("Generate exactly 15 questions"));
        assert!(prompt.user.contains("MCQ -> Remember/Understand"));
        assert!(prompt.user.contains("Attempt: 2"));
        assert!(prompt.user.contains("Expected 15 questions, got 12"));
    }

    #[test]
    fn prompt_context_is_capped() {
        let req = request();
        let outline = outline_instruction(req.instruction(), req.total_marks);
        let context = "x".repeat(6000);
        let attempt = Attempt { request: &req, outline: &outline, context: &context, attempt: 0, feedback: None };
        let prompt = build_prompt(&attempt, 5000);
        assert!(prompt.user.contains(&"x".repeat(5000)));
        assert!(!prompt.user.contains(&"x".repeat(5001)));
    }

    #[tokio::test]
    async fn undecodable_output_falls_back() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .times(1)
            .returning(|_| Ok("I cannot help with that".to_string()));
        let agent = GenerationAgent::new(Arc::new(generator), 5000);
        let req = GenerationRequest::new(Uuid::new_v4(), "Optics", "Physics", 30);
        let outline = outline_instruction("", 30);
        let attempt = Attempt { request: &req, outline: &outline, context: "", attempt: 0, feedback: None };
        match agent.generate(&attempt).await.unwrap() {
            GenerationOutcome::Fallback(qs) => assert_eq!(qs.len(), 3),
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn generator_errors_propagate() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .returning(|_| Err(Error::ExternalService("quota exceeded".into())));
        let agent = GenerationAgent::new(Arc::new(generator), 5000);
        let req = request();
        let outline = outline_instruction(req.instruction(), req.total_marks);
        let attempt = Attempt { request: &req, outline: &outline, context: "", attempt: 0, feedback: None };
        assert!(matches!(agent.generate(&attempt).await, Err(Error::ExternalService(m)) if m == "quota exceeded"));
    }
}
