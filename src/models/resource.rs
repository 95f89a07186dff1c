use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The slice of an uploaded resource the pipeline reads: text extraction happens upstream.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResourceExcerpt {
    pub filename: String,
    pub extracted_text: Option<String>,
}
