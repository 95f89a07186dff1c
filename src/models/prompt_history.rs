use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    InProgress,
    Success,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::InProgress => "in_progress",
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPromptHistory {
    pub teacher_id: Uuid,
    pub prompt: String,
    pub parameters: JsonValue,
    pub original_paper_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptHistoryUpdate {
    pub status: HistoryStatus,
    pub paper_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}
