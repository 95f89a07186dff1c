//! Mark distribution planning: turns a free-form instruction and a required total into an
//! ordered per-slot mark plan, plus the type grouping and question count it declares.

use crate::models::question::QuestionType;
use crate::models::request::GenerationRequest;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::OnceLock;

const TYPE_ALTERNATIVES: &str = r"mcqs?|short\s*(?:answer\s*)?questions?|medium\s*(?:answer\s*)?questions?|long\s*(?:answer\s*)?questions?|problems?";

/// Ordered per-question mark targets. `sum == total` and `len >= 1` by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkPlan {
    slots: Vec<u32>,
}

impl MarkPlan {
    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn total(&self) -> u32 {
        self.slots.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TypeRequirement {
    pub question_type: QuestionType,
    pub count: u32,
}

/// Everything the rest of the pipeline needs from the instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanOutline {
    pub plan: MarkPlan,
    pub type_groups: Vec<TypeRequirement>,
    /// Question count the instruction asked for, before clamping to the total.
    pub declared_count: Option<usize>,
}

impl PlanOutline {
    /// Declared type for each slot, walking the type groups in order.
    pub fn slot_types(&self) -> Vec<Option<QuestionType>> {
        let mut types = Vec::with_capacity(self.plan.len());
        for group in &self.type_groups {
            for _ in 0..group.count {
                if types.len() == self.plan.len() {
                    return types;
                }
                types.push(Some(group.question_type));
            }
        }
        types.resize(self.plan.len(), None);
        types
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QuestionGroup {
    count: u32,
    question_type: QuestionType,
    marks: u32,
    span: Range<usize>,
}

/// Explicit type hints on the request win over the instruction text.
pub fn outline(request: &GenerationRequest) -> PlanOutline {
    let hinted: Vec<QuestionGroup> = request
        .type_hints
        .iter()
        .filter(|h| h.count > 0)
        .map(|h| QuestionGroup {
            count: h.count.min(request.total_marks.max(1)),
            question_type: h.question_type,
            marks: h.marks.max(1),
            span: 0..0,
        })
        .collect();

    if hinted.is_empty() {
        outline_instruction(request.instruction(), request.total_marks)
    } else {
        tracing::info!(groups = hinted.len(), "Planning from explicit type hints");
        let mut outline = outline_from_groups(&hinted, request.total_marks);
        outline.declared_count = Some(request.type_hints.iter().map(|h| h.count as usize).sum());
        outline
    }
}

pub fn outline_instruction(instruction: &str, total_marks: u32) -> PlanOutline {
    let declared_count = declared_question_count(instruction).map(|n| n as usize);
    let groups = structured_groups(instruction, total_marks);
    if !groups.is_empty() {
        return PlanOutline {
            declared_count,
            ..outline_from_groups(&groups, total_marks)
        };
    }

    let type_groups = standalone_type_groups(instruction);
    let loose = if type_groups.is_empty() {
        loose_question_count(instruction)
    } else {
        Some(type_groups.iter().fold(0u32, |sum, g| sum.saturating_add(g.count)))
    };

    let count = match loose {
        Some(n) => {
            tracing::info!("Detected {} questions in instruction", n);
            n
        }
        None => {
            let n = default_slot_count(instruction, total_marks);
            tracing::info!("Using default of {} questions for {} marks", n, total_marks);
            n
        }
    };

    let plan = even_plan(count, total_marks);
    PlanOutline {
        plan,
        type_groups,
        declared_count,
    }
}

pub fn plan_marks(instruction: &str, total_marks: u32) -> MarkPlan {
    outline_instruction(instruction, total_marks).plan
}

/// Per-type counts the instruction declares, in text order.
pub fn declared_type_groups(instruction: &str) -> Vec<TypeRequirement> {
    let structured = structured_groups(instruction, u32::MAX);
    if structured.is_empty() {
        return standalone_type_groups(instruction);
    }
    structured
        .iter()
        .map(|g| TypeRequirement {
            question_type: g.question_type,
            count: g.count,
        })
        .collect()
}

/// Question count as written in the instruction, before any clamping to the total.
pub fn declared_question_count(instruction: &str) -> Option<u32> {
    let groups = declared_type_groups(instruction);
    if groups.is_empty() {
        loose_question_count(instruction)
    } else {
        Some(groups.iter().fold(0u32, |sum, g| sum.saturating_add(g.count)))
    }
}

fn outline_from_groups(groups: &[QuestionGroup], total_marks: u32) -> PlanOutline {
    let mut slots = Vec::new();
    for group in groups {
        tracing::debug!(
            count = group.count,
            question_type = %group.question_type,
            marks = group.marks,
            "Question group"
        );
        slots.extend(std::iter::repeat(group.marks).take(group.count as usize));
    }

    let detected: u32 = slots.iter().sum();
    if detected != total_marks {
        tracing::warn!(
            "Instruction totals {} marks but {} are required; reconciling",
            detected,
            total_marks
        );
    }

    let plan = MarkPlan {
        slots: reconcile(slots, total_marks),
    };
    debug_assert_eq!(plan.total(), total_marks.max(1));

    let type_groups = groups
        .iter()
        .map(|g| TypeRequirement {
            question_type: g.question_type,
            count: g.count,
        })
        .collect();

    PlanOutline {
        plan,
        type_groups,
        declared_count: None,
    }
}

/// Moves the plan onto `total` one unit at a time from the trailing slots, never below 1.
fn reconcile(mut slots: Vec<u32>, total: u32) -> Vec<u32> {
    let target = total.max(1) as u64;
    if slots.is_empty() {
        return vec![target as u32];
    }

    let mut sum: u64 = slots.iter().map(|&m| m as u64).sum();
    if sum < target {
        let len = slots.len() as u64;
        let diff = target - sum;
        let per_slot = (diff / len) as u32;
        let extra = (diff % len) as usize;
        let first_extra = slots.len() - extra;
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot += per_slot;
            if i >= first_extra {
                *slot += 1;
            }
        }
        sum = target;
    }

    while sum > target {
        let mut progressed = false;
        for slot in slots.iter_mut().rev() {
            if sum == target {
                break;
            }
            if *slot > 1 {
                *slot -= 1;
                sum -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    // Every slot is at the floor; the plan has more slots than marks.
    while sum > target && slots.len() > 1 {
        if let Some(dropped) = slots.pop() {
            sum -= dropped as u64;
        }
    }

    slots
}

fn even_plan(count: u32, total_marks: u32) -> MarkPlan {
    let total = total_marks.max(1);
    let count = count.clamp(1, total);
    let base = total / count;
    let remainder = total % count;
    let slots = (0..count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect();
    MarkPlan { slots }
}

fn default_slot_count(instruction: &str, total_marks: u32) -> u32 {
    let lower = instruction.to_lowercase();
    if lower.contains("mcq") || lower.contains("multiple choice") {
        (total_marks / 2).max(10)
    } else if total_marks <= 20 {
        4
    } else {
        10
    }
}

fn structured_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\b(\d+)\s*({T})\s+of\s+(\d+)\s*marks?\s*each",
            r"\b(\d+)\s*({T})\s+each\s+bearing\s+(\d+)\s*marks?",
            r"\b(\d+)\s*({T})\s+bearing\s+(\d+)\s*marks?\s*each",
            r"\b(\d+)\s*({T})\s+with\s+(\d+)\s*marks?",
            r"\b(\d+)\s*({T})\s+(\d+)\s*marks?",
        ]
        .iter()
        .map(|p| Regex::new(&p.replace("{T}", TYPE_ALTERNATIVES)).expect("static pattern"))
        .collect()
    })
}

fn standalone_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d+)\s*(mcqs?|multiple\s*choice|short\s*(?:answer\s*)?questions?|medium\s*(?:answer\s*)?questions?|long\s*(?:answer\s*)?questions?)")
            .expect("static pattern")
    })
}

fn loose_count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(\d+)\s*(?:questions?|mcqs?|problems?)").expect("static pattern"))
}

/// `(count, type, marks)` clauses in text order; a span is never consumed twice.
fn structured_groups(instruction: &str, total_marks: u32) -> Vec<QuestionGroup> {
    let lower = instruction.to_lowercase();
    let mut groups: Vec<QuestionGroup> = Vec::new();

    for pattern in structured_patterns() {
        for caps in pattern.captures_iter(&lower) {
            let Some(whole) = caps.get(0) else { continue };
            let span = whole.range();
            if groups
                .iter()
                .any(|g| g.span.start < span.end && span.start < g.span.end)
            {
                continue;
            }
            let (Some(count), Some(marks)) = (capture_u32(&caps, 1), capture_u32(&caps, 3)) else {
                continue;
            };
            if count == 0 || marks == 0 {
                continue;
            }
            let question_type = caps[2].parse().unwrap_or(QuestionType::ShortAnswer);
            tracing::debug!("Matched '{}' -> {} x {} marks", whole.as_str(), count, marks);
            groups.push(QuestionGroup {
                count: count.min(total_marks.max(1)),
                question_type,
                marks,
                span,
            });
        }
    }

    groups.sort_by_key(|g| g.span.start);
    groups
}

fn standalone_type_groups(instruction: &str) -> Vec<TypeRequirement> {
    let lower = instruction.to_lowercase();
    standalone_type_pattern()
        .captures_iter(&lower)
        .filter_map(|caps| {
            let count = capture_u32(&caps, 1).filter(|c| *c > 0)?;
            let question_type = caps[2].parse().ok()?;
            Some(TypeRequirement {
                question_type,
                count,
            })
        })
        .collect()
}

fn loose_question_count(instruction: &str) -> Option<u32> {
    let lower = instruction.to_lowercase();
    loose_count_pattern()
        .captures_iter(&lower)
        .filter_map(|caps| capture_u32(&caps, 1))
        .find(|n| *n > 0)
}

fn capture_u32(caps: &regex::Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx).and_then(|m| m.as_str().parse().ok())
}
