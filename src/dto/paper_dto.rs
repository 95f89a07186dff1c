use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::paper::Paper;
use crate::models::question::{BloomsLevel, Question, QuestionType};
use crate::models::request::{GenerationRequest, SourceMix, TypeHint};
use crate::services::assembler::PaperSummary;
use crate::services::pipeline::HistoryEntry;

fn default_exam_type() -> String {
    "Final".to_string()
}
fn one() -> u32 {
    1
}
fn two() -> u32 {
    2
}
fn five() -> u32 {
    5
}
fn ten() -> u32 {
    10
}
fn thirty() -> u32 {
    30
}
fn forty() -> u32 {
    40
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_generate_payload"))]
pub struct GeneratePaperPayload {
    #[validate(length(min = 1, message = "Subject cannot be empty"))]
    pub subject: String,
    #[validate(length(min = 1, message = "Department cannot be empty"))]
    pub department: String,
    #[serde(default = "default_exam_type")]
    pub exam_type: String,
    /// Only used when no per-type counts are given.
    #[validate(range(max = 1000))]
    pub total_marks: Option<u32>,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub prompt: Option<String>,

    #[validate(range(max = 200))]
    #[serde(default)]
    pub mcq_count: u32,
    #[serde(default = "one")]
    #[validate(range(max = 100))]
    pub mcq_marks: u32,
    #[validate(range(max = 200))]
    #[serde(default)]
    pub short_count: u32,
    #[serde(default = "two")]
    #[validate(range(max = 100))]
    pub short_marks: u32,
    #[validate(range(max = 200))]
    #[serde(default)]
    pub medium_count: u32,
    #[serde(default = "five")]
    #[validate(range(max = 100))]
    pub medium_marks: u32,
    #[validate(range(max = 200))]
    #[serde(default)]
    pub long_count: u32,
    #[serde(default = "ten")]
    #[validate(range(max = 100))]
    pub long_marks: u32,

    #[validate(range(max = 100))]
    #[serde(default = "thirty")]
    pub previous_percent: u32,
    #[validate(range(max = 100))]
    #[serde(default = "forty")]
    pub creative_percent: u32,
    #[validate(range(max = 100))]
    #[serde(default = "thirty")]
    pub new_percent: u32,

    #[serde(default)]
    pub blooms_distribution: BTreeMap<BloomsLevel, u32>,
}

const MAX_TOTAL_MARKS: u32 = 1000;

fn validate_generate_payload(payload: &GeneratePaperPayload) -> Result<(), ValidationError> {
    let percent_sum = payload
        .previous_percent
        .checked_add(payload.creative_percent)
        .and_then(|sum| sum.checked_add(payload.new_percent));
    if percent_sum != Some(100) {
        let mut err = ValidationError::new("source_mix");
        err.message = Some("Source percentages must add up to 100".into());
        return Err(err);
    }
    if payload
        .counted_marks()
        .map_or(true, |marks| marks > MAX_TOTAL_MARKS)
    {
        let mut err = ValidationError::new("total_marks");
        err.message = Some(format!("A paper can carry at most {} marks", MAX_TOTAL_MARKS).into());
        return Err(err);
    }
    if payload.total_marks() == 0 {
        let mut err = ValidationError::new("total_marks");
        err.message = Some("Give question counts or a positive total_marks".into());
        return Err(err);
    }
    if payload.type_hints().iter().any(|h| h.marks == 0) {
        let mut err = ValidationError::new("marks");
        err.message = Some("Marks per question must be at least 1".into());
        return Err(err);
    }
    Ok(())
}

impl GeneratePaperPayload {
    /// Per-type groups in paper order: MCQ, short, medium, long.
    pub fn type_hints(&self) -> Vec<TypeHint> {
        [
            (QuestionType::Mcq, self.mcq_count, self.mcq_marks),
            (QuestionType::ShortAnswer, self.short_count, self.short_marks),
            (QuestionType::MediumAnswer, self.medium_count, self.medium_marks),
            (QuestionType::LongAnswer, self.long_count, self.long_marks),
        ]
        .into_iter()
        .filter(|(_, count, _)| *count > 0)
        .map(|(question_type, count, marks)| TypeHint {
            question_type,
            count,
            marks,
        })
        .collect()
    }

    /// Marks implied by the per-type counts, `None` on overflow.
    fn counted_marks(&self) -> Option<u32> {
        self.type_hints()
            .iter()
            .try_fold(0u32, |sum, h| h.count.checked_mul(h.marks)?.checked_add(sum))
    }

    pub fn total_marks(&self) -> u32 {
        match self.counted_marks() {
            Some(0) => self.total_marks.unwrap_or(0),
            Some(from_counts) => from_counts,
            None => u32::MAX,
        }
    }

    pub fn source_mix(&self) -> SourceMix {
        SourceMix {
            previous: self.previous_percent,
            creative: self.creative_percent,
            new: self.new_percent,
        }
    }

    /// The full requirement text kept on the paper and in prompt history.
    pub fn detailed_prompt(&self) -> String {
        let mut out = format!(
            "Generate a {} exam paper for {} ({}) worth {} marks.\n",
            self.exam_type,
            self.subject,
            self.department,
            self.total_marks()
        );

        let hints = self.type_hints();
        if !hints.is_empty() {
            out.push_str("\nQUESTION DISTRIBUTION:\n");
            for h in &hints {
                out.push_str(&format!(
                    "- {}: {} x {} marks = {} marks\n",
                    h.question_type,
                    h.count,
                    h.marks,
                    h.count.saturating_mul(h.marks)
                ));
            }
        }

        out.push_str(&format!(
            "\nQUESTION SOURCES:\n- {}% from previous year papers\n- {}% creative variations\n- {}% new\n",
            self.previous_percent, self.creative_percent, self.new_percent
        ));

        match &self.prompt {
            Some(focus) => out.push_str(&format!("\nTOPIC FOCUS: {}\n", focus)),
            None => out.push_str("\nCover all major topics from the syllabus.\n"),
        }
        out
    }

    pub fn parameters(&self) -> JsonValue {
        json!({
            "subject": self.subject,
            "department": self.department,
            "exam_type": self.exam_type,
            "total_marks": self.total_marks(),
            "mcq_count": self.mcq_count,
            "short_count": self.short_count,
            "medium_count": self.medium_count,
            "long_count": self.long_count,
            "source_distribution": {
                "previous": self.previous_percent,
                "creative": self.creative_percent,
                "new": self.new_percent,
            },
        })
    }

    /// Planning runs off the type hints when counts are given, otherwise off the topic text.
    pub fn to_request(&self, requester: Uuid) -> GenerationRequest {
        let mut request = GenerationRequest::new(requester, &self.subject, &self.department, self.total_marks())
            .with_type_hints(self.type_hints());
        if let Some(focus) = &self.prompt {
            request = request.with_instruction(focus.clone());
        }
        request.blooms_hints = self.blooms_distribution.clone();
        request.source_mix = self.source_mix();
        request
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RegeneratePaperPayload {
    #[validate(length(max = 4000))]
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub feedback: Option<String>,
}

/// Consecutive runs of equal type and marks, so a regeneration keeps the original layout.
pub fn layout_hints(questions: &[Question]) -> Vec<TypeHint> {
    let mut hints: Vec<TypeHint> = Vec::new();
    for q in questions {
        match hints.last_mut() {
            Some(last) if last.question_type == q.question_type && last.marks == q.marks => last.count += 1,
            _ => hints.push(TypeHint {
                question_type: q.question_type,
                count: 1,
                marks: q.marks,
            }),
        }
    }
    hints
}

/// Restates the original count and marks so feedback cannot drift them.
pub fn regeneration_prompt(paper: &Paper, feedback: Option<&str>) -> String {
    let questions = &paper.questions.0;
    let count = questions.len();
    let marks: u32 = questions.iter().map(|q| q.marks).sum();

    let mut types: Vec<String> = questions.iter().map(|q| q.question_type.to_string()).collect();
    types.sort();
    types.dedup();
    let mut levels: Vec<BloomsLevel> = questions.iter().map(|q| q.blooms_level).collect();
    levels.sort();
    levels.dedup();
    let levels: Vec<&str> = levels.iter().map(|l| l.as_str()).collect();

    let mut out = format!(
        "REQUIREMENTS (must be followed exactly):\n\
         - Total marks: {total}\n\
         - Number of questions: {count}\n\
         - Subject: {subject}\n\
         - Department: {department}\n\n\
         ORIGINAL INSTRUCTIONS:\n{original}\n\n\
         PREVIOUS GENERATION:\n\
         - {count} questions with {marks} marks\n\
         - Question types: {types}\n\
         - Cognitive levels: {levels}\n",
        total = paper.total_marks,
        count = count,
        subject = paper.subject,
        department = paper.department,
        original = paper.generation_prompt.trim(),
        marks = marks,
        types = types.join(", "),
        levels = levels.join(", "),
    );

    match feedback {
        Some(feedback) => out.push_str(&format!(
            "\nREGENERATION FEEDBACK (apply it without changing the requirements above):\n{}\n",
            feedback
        )),
        None => out.push_str("\nGenerate a fresh set of questions with the same layout.\n"),
    }
    out
}

pub fn regeneration_request(paper: &Paper, requester: Uuid, prompt: &str) -> GenerationRequest {
    GenerationRequest::new(
        requester,
        &paper.subject,
        &paper.department,
        u32::try_from(paper.total_marks).unwrap_or(0),
    )
    .with_instruction(prompt)
    .with_type_hints(layout_hints(&paper.questions.0))
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratePaperResponse {
    pub paper_id: Uuid,
    pub questions: Vec<Question>,
    pub summary: PaperSummary,
    pub blooms_distribution: BTreeMap<BloomsLevel, usize>,
    pub total_marks: u32,
    pub status: String,
    pub rejected_count: usize,
    pub history: Vec<HistoryEntry>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperResponse {
    pub id: Uuid,
    pub subject: String,
    pub department: String,
    pub exam_type: Option<String>,
    pub total_marks: i32,
    pub questions: Vec<Question>,
    pub summary: Option<JsonValue>,
    pub blooms_distribution: JsonValue,
    pub status: String,
    pub regeneration_count: i32,
    pub original_paper_id: Option<Uuid>,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl From<Paper> for PaperResponse {
    fn from(paper: Paper) -> Self {
        Self {
            id: paper.id,
            subject: paper.subject,
            department: paper.department,
            exam_type: paper.exam_type,
            total_marks: paper.total_marks,
            questions: paper.questions.0,
            summary: paper.summary,
            blooms_distribution: paper.blooms_distribution,
            status: paper.status,
            regeneration_count: paper.regeneration_count,
            original_paper_id: paper.original_paper_id,
            superseded_by: paper.superseded_by,
            created_at: paper.created_at,
            approved_at: paper.approved_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovePaperResponse {
    pub paper_id: Uuid,
    pub indexed_questions: usize,
    pub message: String,
}

fn trim_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}
