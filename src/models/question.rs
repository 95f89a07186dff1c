use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Option block appended to questions forced into the MCQ type without options.
pub const MCQ_PLACEHOLDER_OPTIONS: &str = "\nA) Option A\nB) Option B\nC) Option C\nD) Option D";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "MCQ")]
    Mcq,
    #[serde(rename = "Short Answer")]
    ShortAnswer,
    #[serde(rename = "Medium Answer")]
    MediumAnswer,
    #[serde(rename = "Long Answer")]
    LongAnswer,
    Reasoning,
    Analytical,
    Calculation,
    Diagrammatic,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::ShortAnswer => "Short Answer",
            QuestionType::MediumAnswer => "Medium Answer",
            QuestionType::LongAnswer => "Long Answer",
            QuestionType::Reasoning => "Reasoning",
            QuestionType::Analytical => "Analytical",
            QuestionType::Calculation => "Calculation",
            QuestionType::Diagrammatic => "Diagrammatic",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let kind = if lower.starts_with("mcq")
            || lower.contains("multiple")
            || lower == "objective"
        {
            QuestionType::Mcq
        } else if lower.starts_with("short") {
            QuestionType::ShortAnswer
        } else if lower.starts_with("medium") {
            QuestionType::MediumAnswer
        } else if lower.starts_with("long") {
            QuestionType::LongAnswer
        } else if lower.starts_with("reason") {
            QuestionType::Reasoning
        } else if lower.starts_with("analytic") {
            QuestionType::Analytical
        } else if lower.starts_with("calculat") || lower.starts_with("problem") {
            QuestionType::Calculation
        } else if lower.starts_with("diagram") {
            QuestionType::Diagrammatic
        } else {
            return Err(format!("unknown question type: {}", s));
        };
        Ok(kind)
    }
}

/// Six-level cognitive taxonomy (Bloom's).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BloomsLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl BloomsLevel {
    pub const ALL: [BloomsLevel; 6] = [
        BloomsLevel::Remember,
        BloomsLevel::Understand,
        BloomsLevel::Apply,
        BloomsLevel::Analyze,
        BloomsLevel::Evaluate,
        BloomsLevel::Create,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloomsLevel::Remember => "Remember",
            BloomsLevel::Understand => "Understand",
            BloomsLevel::Apply => "Apply",
            BloomsLevel::Analyze => "Analyze",
            BloomsLevel::Evaluate => "Evaluate",
            BloomsLevel::Create => "Create",
        }
    }
}

impl fmt::Display for BloomsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloomsLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let level = if lower.starts_with("remember") || lower.starts_with("recall") {
            BloomsLevel::Remember
        } else if lower.starts_with("understand") || lower.starts_with("comprehen") {
            BloomsLevel::Understand
        } else if lower.starts_with("appl") {
            BloomsLevel::Apply
        } else if lower.starts_with("analy") {
            BloomsLevel::Analyze
        } else if lower.starts_with("evaluat") {
            BloomsLevel::Evaluate
        } else if lower.starts_with("creat") || lower.starts_with("synthes") {
            BloomsLevel::Create
        } else {
            return Err(format!("unknown blooms level: {}", s));
        };
        Ok(level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    Previous,
    Creative,
    New,
}

impl FromStr for QuestionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "previous" => Ok(QuestionSource::Previous),
            "creative" => Ok(QuestionSource::Creative),
            "new" => Ok(QuestionSource::New),
            other => Err(format!("unknown question source: {}", other)),
        }
    }
}

/// A question as emitted by the generation model: every field may be missing or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuestion {
    #[serde(default, deserialize_with = "lenient_string")]
    pub question_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_parse")]
    pub blooms_level: Option<BloomsLevel>,
    #[serde(default, deserialize_with = "lenient_parse")]
    pub question_type: Option<QuestionType>,
    #[serde(default, deserialize_with = "lenient_marks")]
    pub marks: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub answer_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_options", skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, deserialize_with = "lenient_parse", skip_serializing_if = "Option::is_none")]
    pub source: Option<QuestionSource>,
}

impl CandidateQuestion {
    pub fn text(&self) -> &str {
        self.question_text.as_deref().unwrap_or("")
    }

    pub fn has_options(&self) -> bool {
        self.options.as_ref().is_some_and(|o| !o.is_empty()) || text_has_option_block(self.text())
    }

    /// Required fields that are absent, in schema order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.question_text.is_none() {
            missing.push("question_text");
        }
        if self.blooms_level.is_none() {
            missing.push("blooms_level");
        }
        if self.question_type.is_none() {
            missing.push("question_type");
        }
        if self.marks.is_none() {
            missing.push("marks");
        }
        if self.answer_key.is_none() {
            missing.push("answer_key");
        }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_text: String,
    pub blooms_level: BloomsLevel,
    pub question_type: QuestionType,
    pub marks: u32,
    pub answer_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<QuestionSource>,
}

impl Question {
    /// Minimal stand-in used when a paper must be filled and no survivor exists to clone.
    pub fn placeholder() -> Self {
        Self {
            question_text: "Generated question to meet requirements".to_string(),
            blooms_level: BloomsLevel::Remember,
            question_type: QuestionType::ShortAnswer,
            marks: 1,
            answer_key: "Answer provided".to_string(),
            unit: None,
            options: None,
            correct_answer: None,
            explanation: None,
            source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required fields: {}", .0.join(", "))]
pub struct MissingFields(pub Vec<&'static str>);

impl TryFrom<CandidateQuestion> for Question {
    type Error = MissingFields;

    fn try_from(c: CandidateQuestion) -> Result<Self, Self::Error> {
        let missing = c.missing_fields();
        if !missing.is_empty() {
            return Err(MissingFields(missing));
        }
        match (c.question_text, c.blooms_level, c.question_type, c.marks, c.answer_key) {
            (Some(question_text), Some(blooms_level), Some(question_type), Some(marks), Some(answer_key)) => {
                Ok(Question {
                    question_text,
                    blooms_level,
                    question_type,
                    marks,
                    answer_key,
                    unit: c.unit,
                    options: c.options,
                    correct_answer: c.correct_answer,
                    explanation: c.explanation,
                    source: c.source,
                })
            }
            _ => Err(MissingFields(missing)),
        }
    }
}

pub fn text_has_option_block(text: &str) -> bool {
    text.starts_with("A)") || text.contains("\nA)")
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }))
}

fn lenient_parse<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().and_then(|s| s.parse().ok())))
}

fn lenient_marks<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.trunc() as u64))
            .and_then(|m| u32::try_from(m).ok()),
        JsonValue::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        }
        _ => None,
    }))
}

fn lenient_options<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        let items: Vec<String> = v
            .as_array()?
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(s) => Some(s.trim().to_string()),
                JsonValue::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() {
            None
        } else {
            Some(items)
        }
    }))
}
