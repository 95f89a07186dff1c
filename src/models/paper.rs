use crate::models::question::Question;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Draft,
    Pending,
    Approved,
    Superseded,
}

impl PaperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperStatus::Draft => "draft",
            PaperStatus::Pending => "pending",
            PaperStatus::Approved => "approved",
            PaperStatus::Superseded => "superseded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Paper {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub subject: String,
    pub department: String,
    pub exam_type: Option<String>,
    pub total_marks: i32,
    pub generation_prompt: String,
    pub questions: Json<Vec<Question>>,
    pub summary: Option<JsonValue>,
    pub blooms_distribution: JsonValue,
    pub status: String,
    pub regeneration_count: i32,
    pub original_paper_id: Option<Uuid>,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Paper {
    pub fn is_approved(&self) -> bool {
        self.status == PaperStatus::Approved.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct NewPaper {
    pub teacher_id: Uuid,
    pub subject: String,
    pub department: String,
    pub exam_type: Option<String>,
    pub total_marks: i32,
    pub generation_prompt: String,
    pub questions: Vec<Question>,
    pub summary: JsonValue,
    pub blooms_distribution: JsonValue,
    pub status: PaperStatus,
    pub regeneration_count: i32,
    pub original_paper_id: Option<Uuid>,
}
