//! Deterministic repairs applied to model output before verification, and the last-resort
//! forced match applied after the verification budget runs out.

use crate::models::question::{
    text_has_option_block, CandidateQuestion, Question, QuestionType, MCQ_PLACEHOLDER_OPTIONS,
};
use crate::services::planner::PlanOutline;
use regex::Regex;
use std::sync::OnceLock;

const PADDING_PREFIX: &str = "[Generated] ";

fn inline_option_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[,;]?\s*([A-D]\))").expect("static pattern"))
}

/// Moves `A)`..`D)` options that were emitted on one line onto their own lines.
pub fn split_inline_options(text: &str) -> Option<String> {
    if !text.contains("A)") || text.contains('\n') {
        return None;
    }
    let split = inline_option_marker().replace_all(text, "\n$1");
    let split = split.trim_start_matches('\n');
    if split == text {
        None
    } else {
        Some(split.to_string())
    }
}

/// Normalizes `candidates` onto the plan. `correct(correct(x)) == correct(x)`.
pub fn correct(mut candidates: Vec<CandidateQuestion>, outline: &PlanOutline) -> Vec<CandidateQuestion> {
    let plan = outline.plan.slots();
    let slot_types = outline.slot_types();
    let received = candidates.len();
    let received_marks: u32 = candidates.iter().filter_map(|c| c.marks).sum();

    for (i, c) in candidates.iter_mut().enumerate() {
        let slotted_mcq = slot_types.get(i).copied().flatten() == Some(QuestionType::Mcq);
        if c.question_type == Some(QuestionType::Mcq) || slotted_mcq {
            if let Some(split) = c.question_text.as_deref().and_then(split_inline_options) {
                c.question_text = Some(split);
            }
        }
    }

    if candidates.len() > plan.len() {
        tracing::warn!("Too many questions ({}), trimming to {}", candidates.len(), plan.len());
        candidates.truncate(plan.len());
    } else if candidates.len() < plan.len() {
        if let Some(last) = candidates.last().cloned() {
            tracing::warn!("Too few questions ({}), padding to {}", candidates.len(), plan.len());
            while candidates.len() < plan.len() {
                let mut clone = last.clone();
                clone.question_text = clone
                    .question_text
                    .map(|t| format!("{}{}", PADDING_PREFIX, t));
                candidates.push(clone);
            }
        }
    }

    for (c, marks) in candidates.iter_mut().zip(plan) {
        c.marks = Some(*marks);
    }

    if !outline.type_groups.is_empty() {
        for (c, slot_type) in candidates.iter_mut().zip(&slot_types) {
            let Some(kind) = slot_type else { continue };
            if c.question_type != Some(*kind) {
                tracing::debug!("Changing question type to {}", kind);
                c.question_type = Some(*kind);
            }
            if *kind == QuestionType::Mcq && !c.has_options() {
                if let Some(text) = c.question_text.as_mut() {
                    text.push_str(MCQ_PLACEHOLDER_OPTIONS);
                }
            }
        }
    }

    let total = outline.plan.total() as i64;
    let sum: i64 = candidates.iter().filter_map(|c| c.marks).map(i64::from).sum();
    if sum != total {
        if let Some(last) = candidates.last_mut() {
            let adjusted = last.marks.map(i64::from).unwrap_or(0) + (total - sum);
            tracing::warn!("Residual of {} marks moved onto the last question", total - sum);
            last.marks = Some(adjusted.max(0) as u32);
        }
    }

    tracing::info!(
        "Corrected {} questions / {} marks into {} questions / {} marks",
        received,
        received_marks,
        candidates.len(),
        candidates.iter().filter_map(|c| c.marks).sum::<u32>()
    );
    candidates
}

/// Makes `questions` exactly `expected` long and exactly `total` marks, whatever it costs.
pub fn force_match(mut questions: Vec<Question>, expected: usize, total: u32) -> Vec<Question> {
    tracing::warn!(
        "Forcing {} questions / {} marks to {} questions / {} marks",
        questions.len(),
        questions.iter().map(|q| q.marks).sum::<u32>(),
        expected,
        total
    );

    if questions.len() > expected {
        questions.truncate(expected);
    }
    while questions.len() < expected {
        let next = match questions.last() {
            Some(last) => {
                let mut clone = last.clone();
                clone.question_text = format!(
                    "Additional question {}: {}",
                    questions.len() + 1,
                    last.question_text
                );
                clone
            }
            None => Question::placeholder(),
        };
        questions.push(next);
    }

    if questions.is_empty() {
        return questions;
    }

    let n = questions.len() as u32;
    let sum: u32 = questions.iter().map(|q| q.marks).sum();
    if sum < total {
        let deficit = total - sum;
        let (per_question, extra) = (deficit / n, deficit % n);
        for (i, q) in questions.iter_mut().enumerate() {
            q.marks += per_question;
            if (i as u32) < extra {
                q.marks += 1;
            }
        }
    } else if sum > total {
        let mut excess = sum - total;
        while excess > 0 {
            let mut reduced = false;
            for q in questions.iter_mut() {
                if excess == 0 {
                    break;
                }
                if q.marks > 1 {
                    q.marks -= 1;
                    excess -= 1;
                    reduced = true;
                }
            }
            if !reduced {
                break;
            }
        }
    }

    questions
}
