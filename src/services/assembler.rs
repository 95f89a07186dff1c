use crate::models::question::{BloomsLevel, Question, QuestionSource};
use crate::models::request::{GenerationRequest, SourceMix};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBreakdown {
    pub total: usize,
    pub previous: usize,
    pub creative: usize,
    pub new: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub total_questions: usize,
    pub total_marks: u32,
    pub question_distribution: BTreeMap<String, usize>,
    pub source_distribution: BTreeMap<String, usize>,
    pub blooms_distribution: BTreeMap<BloomsLevel, usize>,
    pub blooms_with_sources: BTreeMap<BloomsLevel, SourceBreakdown>,
}

/// The finished paper. Nothing touches it after assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperArtifact {
    pub subject: String,
    pub department: String,
    pub total_marks: u32,
    pub questions: Vec<Question>,
    pub blooms_distribution: BTreeMap<BloomsLevel, usize>,
    pub summary: PaperSummary,
}

/// Source for position `i` of `n`: the leading share is previous, then creative, then new.
pub fn source_for_position(i: usize, n: usize, mix: SourceMix) -> QuestionSource {
    let previous = n * mix.previous as usize / 100;
    let creative = n * mix.creative as usize / 100;
    if i < previous {
        QuestionSource::Previous
    } else if i < previous + creative {
        QuestionSource::Creative
    } else {
        QuestionSource::New
    }
}

pub fn assemble(request: &GenerationRequest, mut questions: Vec<Question>) -> PaperArtifact {
    let n = questions.len();
    for (i, q) in questions.iter_mut().enumerate() {
        q.source = Some(source_for_position(i, n, request.source_mix));
        if q.explanation.as_deref().map_or(true, str::is_empty) {
            q.explanation = Some(q.answer_key.clone());
        }
    }

    let mut blooms_distribution: BTreeMap<BloomsLevel, usize> = BTreeMap::new();
    let mut blooms_with_sources: BTreeMap<BloomsLevel, SourceBreakdown> = BTreeMap::new();
    let mut question_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut source_distribution: BTreeMap<String, usize> = BTreeMap::new();

    for q in &questions {
        *blooms_distribution.entry(q.blooms_level).or_default() += 1;
        *question_distribution.entry(q.question_type.to_string()).or_default() += 1;

        let breakdown = blooms_with_sources.entry(q.blooms_level).or_default();
        breakdown.total += 1;
        let source = q.source.unwrap_or(QuestionSource::New);
        match source {
            QuestionSource::Previous => breakdown.previous += 1,
            QuestionSource::Creative => breakdown.creative += 1,
            QuestionSource::New => breakdown.new += 1,
        }
        *source_distribution.entry(source_label(source).to_string()).or_default() += 1;
    }

    let total_marks = questions.iter().map(|q| q.marks).sum();
    tracing::info!(
        "Assembled {} questions / {} marks for {}",
        n,
        total_marks,
        request.subject
    );

    PaperArtifact {
        subject: request.subject.clone(),
        department: request.department.clone(),
        total_marks,
        blooms_distribution: blooms_distribution.clone(),
        summary: PaperSummary {
            total_questions: n,
            total_marks,
            question_distribution,
            source_distribution,
            blooms_distribution,
            blooms_with_sources,
        },
        questions,
    }
}

fn source_label(source: QuestionSource) -> &'static str {
    match source {
        QuestionSource::Previous => "Previous",
        QuestionSource::Creative => "Creative",
        QuestionSource::New => "New",
    }
}
