use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::paper_dto::{
        regeneration_prompt, regeneration_request, ApprovePaperResponse, GeneratePaperPayload,
        GeneratePaperResponse, PaperResponse, RegeneratePaperPayload,
    },
    error::{Error, Result},
    middleware::auth::Requester,
    models::paper::{NewPaper, Paper, PaperStatus},
    models::prompt_history::{HistoryStatus, NewPromptHistory, PromptHistoryUpdate},
    models::request::GenerationRequest,
    services::pipeline::GeneratedPaper,
    services::similarity_index::{key_paper, question_key},
    AppState,
};

/// How a freshly generated paper is filed.
struct Filing {
    exam_type: Option<String>,
    prompt: String,
    status: PaperStatus,
    regeneration_count: i32,
    original_paper_id: Option<Uuid>,
}

#[axum::debug_handler]
pub async fn generate_paper(
    State(state): State<AppState>,
    Extension(Requester(teacher_id)): Extension<Requester>,
    Json(payload): Json<GeneratePaperPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let prompt = payload.detailed_prompt();
    tracing::info!(
        %teacher_id,
        subject = %payload.subject,
        total_marks = payload.total_marks(),
        "Paper generation requested"
    );

    let history_id = state
        .store
        .insert_history(NewPromptHistory {
            teacher_id,
            prompt: prompt.clone(),
            parameters: payload.parameters(),
            original_paper_id: None,
        })
        .await?;

    let filing = Filing {
        exam_type: Some(payload.exam_type.clone()),
        prompt,
        status: PaperStatus::Draft,
        regeneration_count: 0,
        original_paper_id: None,
    };
    let (paper, generated) =
        generate_and_file(&state, history_id, payload.to_request(teacher_id), filing).await?;

    Ok((
        StatusCode::CREATED,
        Json(paper_response(paper, generated, "Paper generated successfully")),
    ))
}

#[axum::debug_handler]
pub async fn regenerate_paper(
    State(state): State<AppState>,
    Extension(Requester(teacher_id)): Extension<Requester>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RegeneratePaperPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let original = state.store.get_paper(id, teacher_id).await?;
    if original.questions.0.is_empty() {
        return Err(Error::BadRequest("Paper has no questions to regenerate".to_string()));
    }

    let prompt = regeneration_prompt(&original, payload.feedback.as_deref());
    let history_id = state
        .store
        .insert_history(NewPromptHistory {
            teacher_id,
            prompt: prompt.clone(),
            parameters: json!({
                "subject": original.subject,
                "department": original.department,
                "total_marks": original.total_marks,
                "question_count": original.questions.0.len(),
                "feedback": payload.feedback,
                "regeneration_count": original.regeneration_count + 1,
            }),
            original_paper_id: Some(original.id),
        })
        .await?;

    let filing = Filing {
        exam_type: original.exam_type.clone(),
        prompt: prompt.clone(),
        status: PaperStatus::Pending,
        regeneration_count: original.regeneration_count + 1,
        original_paper_id: Some(original.id),
    };
    let request = regeneration_request(&original, teacher_id, &prompt);
    let (paper, generated) = generate_and_file(&state, history_id, request, filing).await?;

    state.store.mark_superseded(original.id, paper.id).await?;
    tracing::info!(old = %original.id, new = %paper.id, "Paper regenerated");

    Ok((
        StatusCode::CREATED,
        Json(paper_response(paper, generated, "Paper regenerated successfully")),
    ))
}

#[axum::debug_handler]
pub async fn get_paper(
    State(state): State<AppState>,
    Extension(Requester(teacher_id)): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let paper = state.store.get_paper(id, teacher_id).await?;
    Ok(Json(PaperResponse::from(paper)))
}

/// Approval feeds the paper's questions into the duplicate corpus. Indexing failures are
/// logged, never surfaced: the approval itself already stands.
#[axum::debug_handler]
pub async fn approve_paper(
    State(state): State<AppState>,
    Extension(Requester(teacher_id)): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let Some(paper) = state.store.approve_paper(id, teacher_id).await? else {
        return Ok(Json(ApprovePaperResponse {
            paper_id: id,
            indexed_questions: 0,
            message: "Paper already approved".to_string(),
        }));
    };
    let indexed = match index_paper(&state, &paper).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(paper_id = %paper.id, "Failed to index approved paper: {}", e);
            0
        }
    };

    Ok(Json(ApprovePaperResponse {
        paper_id: paper.id,
        indexed_questions: indexed,
        message: "Paper approved successfully".to_string(),
    }))
}

#[axum::debug_handler]
pub async fn delete_paper(
    State(state): State<AppState>,
    Extension(Requester(teacher_id)): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let paper = state.store.delete_paper(id, teacher_id).await?;

    if paper.is_approved() {
        let _guard = state.index_writes.lock().await;
        let removed = state.index.rebuild(|key| key_paper(key) != Some(paper.id));
        tracing::info!(paper_id = %paper.id, removed, "Removed paper questions from the similarity index");
        if let Err(e) = state.index.save(&state.index_path).await {
            tracing::error!("Failed to save similarity index: {}", e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn index_paper(state: &AppState, paper: &Paper) -> Result<usize> {
    let questions = &paper.questions.0;
    if questions.is_empty() {
        return Ok(0);
    }
    let texts: Vec<String> = questions.iter().map(|q| q.question_text.clone()).collect();
    let vectors = state.embedder.embed_texts(&texts).await?;

    let batch: Vec<(String, Vec<f32>)> = vectors
        .into_iter()
        .enumerate()
        .map(|(position, vector)| (question_key(paper.teacher_id, paper.id, position), vector))
        .collect();

    let _guard = state.index_writes.lock().await;
    let added = state.index.add_batch(batch)?;
    state.index.save(&state.index_path).await?;
    tracing::info!(paper_id = %paper.id, added, "Indexed approved paper");
    Ok(added)
}

/// Runs the pipeline and files the result, closing the prompt-history entry either way.
async fn generate_and_file(
    state: &AppState,
    history_id: Uuid,
    request: GenerationRequest,
    filing: Filing,
) -> Result<(Paper, GeneratedPaper)> {
    let teacher_id = request.requester;
    let outcome = match state.generator.generate_paper(request).await {
        Ok(generated) => file_paper(state, teacher_id, &generated, filing)
            .await
            .map(|paper| (paper, generated)),
        Err(e) => Err(e),
    };

    let update = match &outcome {
        Ok((paper, _)) => PromptHistoryUpdate {
            status: HistoryStatus::Success,
            paper_id: Some(paper.id),
            error_message: None,
            completed_at: Utc::now(),
        },
        Err(e) => {
            tracing::error!(%teacher_id, "Paper generation failed: {}", e);
            PromptHistoryUpdate {
                status: HistoryStatus::Failed,
                paper_id: None,
                error_message: Some(e.to_string()),
                completed_at: Utc::now(),
            }
        }
    };
    if let Err(e) = state.store.update_history(history_id, update).await {
        tracing::warn!(%history_id, "Failed to update prompt history: {}", e);
    }

    outcome
}

async fn file_paper(
    state: &AppState,
    teacher_id: Uuid,
    generated: &GeneratedPaper,
    filing: Filing,
) -> Result<Paper> {
    let artifact = &generated.artifact;
    let new_paper = NewPaper {
        teacher_id,
        subject: artifact.subject.clone(),
        department: artifact.department.clone(),
        exam_type: filing.exam_type,
        total_marks: i32::try_from(artifact.total_marks)
            .map_err(|_| Error::BadRequest("Total marks out of range".to_string()))?,
        generation_prompt: filing.prompt,
        questions: artifact.questions.clone(),
        summary: serde_json::to_value(&artifact.summary)?,
        blooms_distribution: serde_json::to_value(&artifact.blooms_distribution)?,
        status: filing.status,
        regeneration_count: filing.regeneration_count,
        original_paper_id: filing.original_paper_id,
    };
    state.store.insert_paper(new_paper).await
}

fn paper_response(paper: Paper, generated: GeneratedPaper, message: &str) -> GeneratePaperResponse {
    let artifact = generated.artifact;
    GeneratePaperResponse {
        paper_id: paper.id,
        questions: artifact.questions,
        summary: artifact.summary,
        blooms_distribution: artifact.blooms_distribution,
        total_marks: artifact.total_marks,
        status: paper.status,
        rejected_count: generated.rejected.len(),
        history: generated.history,
        message: message.to_string(),
    }
}
