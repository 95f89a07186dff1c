#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use exam_paper_backend::{
    error::{Error, Result},
    models::paper::{NewPaper, Paper, PaperStatus},
    models::prompt_history::{HistoryStatus, NewPromptHistory, PromptHistoryUpdate},
    models::resource::ResourceExcerpt,
    routes,
    services::{
        ai_service::{GenerationPrompt, TextGenerator},
        embed_service::Embedder,
        paper_store::PaperStore,
        pipeline::PipelineSettings,
        similarity_index::SimilarityIndex,
    },
    AppState,
};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use sqlx::types::Json;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEACHER: &str = "6f1c2b9e-3d47-4a5e-9c1a-2f8e7d6b5a40";

pub fn teacher_id() -> Uuid {
    Uuid::parse_str(TEACHER).unwrap()
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: Uuid,
    pub entry: NewPromptHistory,
    pub status: HistoryStatus,
    pub paper_id: Option<Uuid>,
    pub error_message: Option<String>,
}

/// `PaperStore` over plain vectors, with the same ownership rules as the Postgres one.
#[derive(Default)]
pub struct MemoryStore {
    pub papers: Mutex<Vec<Paper>>,
    pub resources: Mutex<Vec<(Uuid, String, ResourceExcerpt)>>,
    pub history: Mutex<Vec<HistoryRow>>,
}

impl MemoryStore {
    pub fn paper(&self, id: Uuid) -> Option<Paper> {
        self.papers.lock().iter().find(|p| p.id == id).cloned()
    }
}

fn not_found() -> Error {
    Error::NotFound("Paper not found".to_string())
}

#[async_trait]
impl PaperStore for MemoryStore {
    async fn resource_excerpts(
        &self,
        teacher_id: Uuid,
        subject: &str,
        _department: &str,
        limit: i64,
    ) -> Result<Vec<ResourceExcerpt>> {
        let subject = subject.to_lowercase();
        Ok(self
            .resources
            .lock()
            .iter()
            .filter(|(owner, s, _)| *owner == teacher_id && s.to_lowercase().contains(&subject))
            .take(limit as usize)
            .map(|(_, _, r)| r.clone())
            .collect())
    }

    async fn approved_papers(&self, subject: &str, _department: &str, limit: i64) -> Result<Vec<Paper>> {
        Ok(self
            .papers
            .lock()
            .iter()
            .rev()
            .filter(|p| p.is_approved() && p.subject == subject)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn regenerated_papers(
        &self,
        teacher_id: Uuid,
        subject: &str,
        _department: &str,
        limit: i64,
    ) -> Result<Vec<Paper>> {
        Ok(self
            .papers
            .lock()
            .iter()
            .rev()
            .filter(|p| p.teacher_id == teacher_id && p.subject == subject && p.regeneration_count > 0)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_paper(&self, paper: NewPaper) -> Result<Paper> {
        let row = Paper {
            id: Uuid::new_v4(),
            teacher_id: paper.teacher_id,
            subject: paper.subject,
            department: paper.department,
            exam_type: paper.exam_type,
            total_marks: paper.total_marks,
            generation_prompt: paper.generation_prompt,
            questions: Json(paper.questions),
            summary: Some(paper.summary),
            blooms_distribution: paper.blooms_distribution,
            status: paper.status.as_str().to_string(),
            regeneration_count: paper.regeneration_count,
            original_paper_id: paper.original_paper_id,
            superseded_by: None,
            created_at: Utc::now(),
            approved_at: None,
        };
        self.papers.lock().push(row.clone());
        Ok(row)
    }

    async fn get_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Paper> {
        self.papers
            .lock()
            .iter()
            .find(|p| p.id == id && p.teacher_id == teacher_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn mark_superseded(&self, id: Uuid, superseded_by: Uuid) -> Result<()> {
        let mut papers = self.papers.lock();
        let paper = papers.iter_mut().find(|p| p.id == id).ok_or_else(not_found)?;
        paper.status = PaperStatus::Superseded.as_str().to_string();
        paper.superseded_by = Some(superseded_by);
        Ok(())
    }

    async fn approve_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Option<Paper>> {
        let mut papers = self.papers.lock();
        let paper = papers
            .iter_mut()
            .find(|p| p.id == id && p.teacher_id == teacher_id)
            .ok_or_else(not_found)?;
        if paper.is_approved() {
            return Ok(None);
        }
        paper.status = PaperStatus::Approved.as_str().to_string();
        paper.approved_at = Some(Utc::now());
        Ok(Some(paper.clone()))
    }

    async fn delete_paper(&self, id: Uuid, teacher_id: Uuid) -> Result<Paper> {
        let mut papers = self.papers.lock();
        let pos = papers
            .iter()
            .position(|p| p.id == id && p.teacher_id == teacher_id)
            .ok_or_else(not_found)?;
        Ok(papers.remove(pos))
    }

    async fn insert_history(&self, entry: NewPromptHistory) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.history.lock().push(HistoryRow {
            id,
            entry,
            status: HistoryStatus::InProgress,
            paper_id: None,
            error_message: None,
        });
        Ok(id)
    }

    async fn update_history(&self, id: Uuid, update: PromptHistoryUpdate) -> Result<()> {
        let mut history = self.history.lock();
        let row = history
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| Error::NotFound("History entry not found".to_string()))?;
        row.status = update.status;
        row.paper_id = update.paper_id;
        row.error_message = update.error_message;
        Ok(())
    }
}

/// Answers every prompt with the same canned output and counts the calls.
pub struct ScriptedGenerator {
    pub output: std::result::Result<String, String>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<GenerationPrompt>>,
}

impl ScriptedGenerator {
    pub fn answering(output: impl Into<String>) -> Self {
        Self {
            output: Ok(output.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            output: Err(message.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.clone());
        self.output
            .clone()
            .map_err(|message| Error::ExternalService(format!("Generation service error: {}", message)))
    }
}

/// Two-dimensional embedding from the text alone: equal texts land on the same point.
pub struct TextLengthEmbedder;

pub const EMBED_DIMENSION: usize = 2;

#[async_trait]
impl Embedder for TextLengthEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let bytes = t.as_bytes();
                let checksum: u32 = bytes.iter().map(|b| *b as u32).sum();
                vec![bytes.len() as f32, (checksum % 1000) as f32]
            })
            .collect())
    }
}

/// `count` questions of `marks` each, all about `subject`.
pub fn questions_json(subject: &str, count: usize, marks: u32) -> String {
    let items: Vec<JsonValue> = (0..count)
        .map(|i| {
            json!({
                "question_text": format!("Explain {} concept number {}", subject, i + 1),
                "blooms_level": "Understand",
                "question_type": "Short Answer",
                "marks": marks,
                "answer_key": format!("Definition of {} concept {}", subject, i + 1),
            })
        })
        .collect();
    JsonValue::Array(items).to_string()
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub index: Arc<SimilarityIndex>,
    pub index_path: PathBuf,
    _dir: tempfile::TempDir,
}

pub fn test_app(generator: ScriptedGenerator) -> TestApp {
    test_app_with_rps(generator, 100)
}

pub fn test_app_with_rps(generator: ScriptedGenerator, generate_rps: u32) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let index_path = dir.path().join("index.json");
    let store = Arc::new(MemoryStore::default());
    let generator = Arc::new(generator);
    let index = Arc::new(SimilarityIndex::new(EMBED_DIMENSION));

    let state = AppState::from_parts(
        store.clone(),
        generator.clone(),
        Arc::new(TextLengthEmbedder),
        index.clone(),
        PipelineSettings::default(),
        index_path.clone(),
    );

    TestApp {
        router: routes::router(state, generate_rps),
        store,
        generator,
        index,
        index_path,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-teacher-id", TEACHER);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let res = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
        };
        (status, json)
    }
}
