use crate::error::{Error, Result};
use crate::models::paper::{NewPaper, Paper, PaperStatus};
use crate::models::prompt_history::{NewPromptHistory, PromptHistoryUpdate};
use crate::models::resource::ResourceExcerpt;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Reads the pipeline needs plus the paper and prompt-history writes of the HTTP layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Processed resources owned by `teacher_id` whose subject or department partially
    /// matches, case-insensitively.
    async fn resource_excerpts(
        &self,
        teacher_id: Uuid,
        subject: &str,
        department: &str,
        limit: i64,
    ) -> Result<Vec<ResourceExcerpt>>;

    /// Approved papers from any teacher in the same subject and department, newest first.
    async fn approved_papers(&self, subject: &str, department: &str, limit: i64) -> Result<Vec<Paper>>;

    /// The teacher's draft or pending papers that came out of a regeneration, newest first.
    async fn regenerated_papers(
        &self,
        teacher_id: Uuid,
        subject: &str,
        department: &str,
        limit: i64,
    ) -> Result<Vec<Paper>>;

    async fn insert_paper(&self, paper: NewPaper) -> Result<Paper>;

    async fn get_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Paper>;

    async fn mark_superseded(&self, id: Uuid, superseded_by: Uuid) -> Result<()>;

    /// `None` when the paper was already approved, so only one caller ever wins.
    async fn approve_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Option<Paper>>;

    /// Removes the paper and returns it as it was.
    async fn delete_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Paper>;

    async fn insert_history(&self, entry: NewPromptHistory) -> Result<Uuid>;

    async fn update_history(&self, id: Uuid, update: PromptHistoryUpdate) -> Result<()>;
}

const PAPER_COLUMNS: &str = r#"
    id, teacher_id, subject, department, exam_type, total_marks, generation_prompt,
    questions, summary, blooms_distribution, status, regeneration_count,
    original_paper_id, superseded_by, created_at, approved_at
"#;

#[derive(Clone)]
pub struct PgPaperStore {
    pool: PgPool,
}

impl PgPaperStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaperStore for PgPaperStore {
    async fn resource_excerpts(
        &self,
        teacher_id: Uuid,
        subject: &str,
        department: &str,
        limit: i64,
    ) -> Result<Vec<ResourceExcerpt>> {
        let rows = sqlx::query_as::<_, ResourceExcerpt>(
            r#"
            SELECT filename, extracted_text
            FROM resources
            WHERE teacher_id = $1
              AND processed = TRUE
              AND (subject ILIKE '%' || $2 || '%' OR department ILIKE '%' || $3 || '%')
            ORDER BY uploaded_at DESC
            LIMIT $4
            "#,
        )
        .bind(teacher_id)
        .bind(subject)
        .bind(department)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn approved_papers(&self, subject: &str, department: &str, limit: i64) -> Result<Vec<Paper>> {
        let sql = format!(
            r#"
            SELECT {PAPER_COLUMNS}
            FROM papers
            WHERE status = 'approved'
              AND subject ILIKE '%' || $1 || '%'
              AND department ILIKE '%' || $2 || '%'
            ORDER BY created_at DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, Paper>(&sql)
            .bind(subject)
            .bind(department)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn regenerated_papers(
        &self,
        teacher_id: Uuid,
        subject: &str,
        department: &str,
        limit: i64,
    ) -> Result<Vec<Paper>> {
        let sql = format!(
            r#"
            SELECT {PAPER_COLUMNS}
            FROM papers
            WHERE teacher_id = $1
              AND status IN ('draft', 'pending')
              AND regeneration_count > 0
              AND subject ILIKE '%' || $2 || '%'
              AND department ILIKE '%' || $3 || '%'
            ORDER BY created_at DESC
            LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, Paper>(&sql)
            .bind(teacher_id)
            .bind(subject)
            .bind(department)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_paper(&self, paper: NewPaper) -> Result<Paper> {
        let sql = format!(
            r#"
            INSERT INTO papers (
                teacher_id, subject, department, exam_type, total_marks, generation_prompt,
                questions, summary, blooms_distribution, status, regeneration_count,
                original_paper_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {PAPER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, Paper>(&sql)
            .bind(paper.teacher_id)
            .bind(&paper.subject)
            .bind(&paper.department)
            .bind(&paper.exam_type)
            .bind(paper.total_marks)
            .bind(&paper.generation_prompt)
            .bind(Json(&paper.questions))
            .bind(&paper.summary)
            .bind(&paper.blooms_distribution)
            .bind(paper.status.as_str())
            .bind(paper.regeneration_count)
            .bind(paper.original_paper_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Paper> {
        let sql = format!("SELECT {PAPER_COLUMNS} FROM papers WHERE id = $1 AND teacher_id = $2");
        sqlx::query_as::<_, Paper>(&sql)
            .bind(id)
            .bind(teacher_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Paper not found".to_string()))
    }

    async fn mark_superseded(&self, id: Uuid, superseded_by: Uuid) -> Result<()> {
        sqlx::query("UPDATE papers SET status = $2, superseded_by = $3 WHERE id = $1")
            .bind(id)
            .bind(PaperStatus::Superseded.as_str())
            .bind(superseded_by)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn approve_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Option<Paper>> {
        let sql = format!(
            r#"
            UPDATE papers SET status = $3, approved_at = NOW()
            WHERE id = $1 AND teacher_id = $2 AND status <> $3
            RETURNING {PAPER_COLUMNS}
            "#
        );
        let approved = sqlx::query_as::<_, Paper>(&sql)
            .bind(id)
            .bind(teacher_id)
            .bind(PaperStatus::Approved.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if approved.is_some() {
            return Ok(approved);
        }
        // Distinguish "already approved" from "not yours / missing".
        self.get_paper(id, teacher_id).await?;
        Ok(None)
    }

    async fn delete_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Paper> {
        let sql = format!("DELETE FROM papers WHERE id = $1 AND teacher_id = $2 RETURNING {PAPER_COLUMNS}");
        sqlx::query_as::<_, Paper>(&sql)
            .bind(id)
            .bind(teacher_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Paper not found".to_string()))
    }

    async fn insert_history(&self, entry: NewPromptHistory) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO prompt_history (teacher_id, prompt, parameters, status, original_paper_id)
            VALUES ($1, $2, $3, 'in_progress', $4)
            RETURNING id
            "#,
        )
        .bind(entry.teacher_id)
        .bind(&entry.prompt)
        .bind(&entry.parameters)
        .bind(entry.original_paper_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_history(&self, id: Uuid, update: PromptHistoryUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE prompt_history
            SET status = $2, paper_id = $3, error_message = $4, completed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.paper_id)
        .bind(&update.error_message)
        .bind(update.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
