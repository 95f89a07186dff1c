//! The generation pipeline as an explicit state machine.
//!
//! Each run owns one [`PipelineState`]; stage functions mutate it and report an [`Event`],
//! and [`transition`] alone decides the next [`Stage`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::question::{CandidateQuestion, Question};
use crate::models::request::GenerationRequest;
use crate::services::ai_service::{relevance_ratio, Attempt, GenerationAgent, GenerationOutcome, TextGenerator};
use crate::services::assembler::{self, PaperArtifact};
use crate::services::context_service::ContextAssembler;
use crate::services::corrector;
use crate::services::embed_service::Embedder;
use crate::services::paper_store::PaperStore;
use crate::services::planner::{self, PlanOutline};
use crate::services::similarity_index::SimilarityIndex;
use crate::services::verifier::{constraint_mismatch, RejectedQuestion, Verifier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ContextGather,
    Generate,
    Verify,
    Assemble,
    Error,
    Complete,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Error | Stage::Complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ContextGathered,
    CollaboratorFailed,
    CandidatesProduced,
    GenerationRejected { retry: bool },
    Verified,
    Mismatch { retry: bool },
    Assembled,
}

pub fn transition(stage: Stage, event: Event) -> Stage {
    match (stage, event) {
        (Stage::ContextGather, Event::ContextGathered) => Stage::Generate,
        (Stage::Generate, Event::CandidatesProduced) => Stage::Verify,
        (Stage::Generate, Event::GenerationRejected { retry: true }) => Stage::Generate,
        (Stage::Verify, Event::Mismatch { retry: true }) => Stage::Generate,
        (Stage::Verify, Event::Mismatch { retry: false }) => Stage::Assemble,
        (Stage::Verify, Event::Verified) => Stage::Assemble,
        (Stage::Assemble, Event::Assembled) => Stage::Complete,
        _ => Stage::Error,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum HistoryEvent {
    Generation {
        attempt: u32,
        questions_generated: usize,
        marks_generated: u32,
        fallback: bool,
        error: Option<String>,
    },
    VerificationFailed {
        attempt: u32,
        reason: String,
        retry_triggered: bool,
    },
    ForcedMatch {
        questions: usize,
        marks: u32,
    },
    Completed {
        questions_final: usize,
        marks_final: u32,
        total_retries: u32,
        total_rejected: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

impl HistoryEntry {
    fn now(event: HistoryEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub max_generation_retries: u32,
    pub max_verification_retries: u32,
    pub relevance_threshold: f32,
    pub duplicate_threshold: f32,
    pub duplicate_neighbors: usize,
    pub context_char_budget: usize,
    pub prompt_context_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_generation_retries: 3,
            max_verification_retries: 5,
            relevance_threshold: 0.40,
            duplicate_threshold: 0.90,
            duplicate_neighbors: 5,
            context_char_budget: 15_000,
            prompt_context_chars: 5_000,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_generation_retries: config.max_generation_retries,
            max_verification_retries: config.max_verification_retries,
            relevance_threshold: config.relevance_threshold,
            duplicate_threshold: config.duplicate_threshold,
            duplicate_neighbors: config.duplicate_neighbors,
            context_char_budget: config.context_char_budget,
            prompt_context_chars: config.prompt_context_chars,
        }
    }
}

#[derive(Debug)]
pub struct PipelineState {
    pub request: GenerationRequest,
    pub outline: PlanOutline,
    pub context: String,
    pub candidates: Vec<CandidateQuestion>,
    pub verified: Vec<Question>,
    pub generation_failures: u32,
    pub verification_retries: u32,
    pub errors: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub rejected: Vec<RejectedQuestion>,
    pub stage: Stage,
    pub feedback: Option<String>,
    pub artifact: Option<PaperArtifact>,
}

impl PipelineState {
    pub fn new(request: GenerationRequest) -> Self {
        let outline = planner::outline(&request);
        tracing::info!(
            subject = %request.subject,
            total_marks = request.total_marks,
            questions = outline.plan.len(),
            "Mark plan {:?}",
            outline.plan.slots()
        );
        Self {
            request,
            outline,
            context: String::new(),
            candidates: Vec::new(),
            verified: Vec::new(),
            generation_failures: 0,
            verification_retries: 0,
            errors: Vec::new(),
            history: Vec::new(),
            rejected: Vec::new(),
            stage: Stage::ContextGather,
            feedback: None,
            artifact: None,
        }
    }

    fn attempt(&self) -> u32 {
        self.generation_failures + self.verification_retries
    }
}

/// What a successful run hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPaper {
    pub artifact: PaperArtifact,
    pub history: Vec<HistoryEntry>,
    pub rejected: Vec<RejectedQuestion>,
}

#[derive(Clone)]
pub struct PaperGenerator {
    context: ContextAssembler,
    agent: GenerationAgent,
    verifier: Verifier,
    settings: PipelineSettings,
}

impl PaperGenerator {
    pub fn new(
        store: Arc<dyn PaperStore>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        index: Arc<SimilarityIndex>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            context: ContextAssembler::new(store, settings.context_char_budget),
            agent: GenerationAgent::new(generator, settings.prompt_context_chars),
            verifier: Verifier::new(
                embedder,
                index,
                settings.duplicate_threshold,
                settings.duplicate_neighbors,
            ),
            settings,
        }
    }

    pub async fn generate_paper(&self, request: GenerationRequest) -> Result<GeneratedPaper> {
        let state = self.run(request).await;
        match (state.stage, state.artifact) {
            (Stage::Complete, Some(artifact)) => Ok(GeneratedPaper {
                artifact,
                history: state.history,
                rejected: state.rejected,
            }),
            _ => {
                let message = if state.errors.is_empty() {
                    "Paper generation failed".to_string()
                } else {
                    state.errors.join("; ")
                };
                Err(Error::Generation(message))
            }
        }
    }

    /// Drives one request to a terminal stage.
    pub async fn run(&self, request: GenerationRequest) -> PipelineState {
        let mut state = PipelineState::new(request);

        while !state.stage.is_terminal() {
            let event = match state.stage {
                Stage::ContextGather => self.gather_context(&mut state).await,
                Stage::Generate => self.generate(&mut state).await,
                Stage::Verify => self.verify(&mut state).await,
                Stage::Assemble => self.assemble(&mut state),
                Stage::Error | Stage::Complete => break,
            };
            let next = transition(state.stage, event);
            tracing::debug!(from = ?state.stage, to = ?next, ?event, "Pipeline transition");
            state.stage = next;
        }

        match state.stage {
            Stage::Complete => tracing::info!(
                "Paper generation complete after {} generation failures and {} verification retries",
                state.generation_failures,
                state.verification_retries
            ),
            _ => tracing::error!("Paper generation failed: {}", state.errors.join("; ")),
        }
        state
    }

    async fn gather_context(&self, state: &mut PipelineState) -> Event {
        match self.context.gather(&state.request).await {
            Ok(context) => {
                state.context = context;
                Event::ContextGathered
            }
            Err(e) => {
                tracing::error!("Context gathering failed: {}", e);
                state.errors.push(format!("Context gathering error: {}", e));
                Event::CollaboratorFailed
            }
        }
    }

    async fn generate(&self, state: &mut PipelineState) -> Event {
        let attempt_no = state.attempt();
        let outcome = {
            let attempt = Attempt {
                request: &state.request,
                outline: &state.outline,
                context: &state.context,
                attempt: attempt_no,
                feedback: state.feedback.as_deref(),
            };
            self.agent.generate(&attempt).await
        };

        let candidates = match outcome {
            Err(e) => {
                tracing::error!("Generation service failed: {}", e);
                state.errors.push(format!("Question generation error: {}", e));
                return Event::CollaboratorFailed;
            }
            Ok(GenerationOutcome::Rejected(reason)) => {
                return self.generation_failed(state, attempt_no, reason);
            }
            Ok(GenerationOutcome::Fallback(fallback)) => {
                record_generation(state, attempt_no, &fallback, true);
                state.candidates = fallback;
                return Event::CandidatesProduced;
            }
            Ok(GenerationOutcome::Candidates(raw)) => corrector::correct(raw, &state.outline),
        };

        let relevance = relevance_ratio(&candidates, &state.request.subject);
        if relevance < self.settings.relevance_threshold {
            if state.generation_failures + 1 < self.settings.max_generation_retries {
                let reason = format!(
                    "Questions not sufficiently relevant to {} ({:.0}% relevant)",
                    state.request.subject,
                    relevance * 100.0
                );
                return self.generation_failed(state, attempt_no, reason);
            }
            tracing::warn!(
                "Low relevance ({:.0}%) but generation retries are spent; proceeding",
                relevance * 100.0
            );
        }

        record_generation(state, attempt_no, &candidates, false);
        state.candidates = candidates;
        Event::CandidatesProduced
    }

    fn generation_failed(&self, state: &mut PipelineState, attempt: u32, reason: String) -> Event {
        state.generation_failures += 1;
        let retry = state.generation_failures < self.settings.max_generation_retries;
        tracing::warn!(
            "Generation attempt rejected ({}/{}): {}",
            state.generation_failures,
            self.settings.max_generation_retries,
            reason
        );
        state.history.push(HistoryEntry::now(HistoryEvent::Generation {
            attempt,
            questions_generated: 0,
            marks_generated: 0,
            fallback: false,
            error: Some(reason.clone()),
        }));
        state.errors.push(format!("Question generation error: {}", reason));
        state.feedback = Some(reason);
        Event::GenerationRejected { retry }
    }

    async fn verify(&self, state: &mut PipelineState) -> Event {
        let attempt = state.attempt();
        let candidates = std::mem::take(&mut state.candidates);
        let report = self
            .verifier
            .verify(candidates, state.request.requester, attempt)
            .await;
        let rejected_now = report.rejected.len();
        state.rejected.extend(report.rejected);

        let Some(reason) = constraint_mismatch(&report.accepted, &state.outline) else {
            tracing::info!(
                "Verification passed: {} questions, {} marks",
                report.accepted.len(),
                state.outline.plan.total()
            );
            state.verified = report.accepted;
            return Event::Verified;
        };

        if state.verification_retries < self.settings.max_verification_retries {
            state.verification_retries += 1;
            tracing::warn!(
                "Verification failed ({}/{}): {}",
                state.verification_retries,
                self.settings.max_verification_retries,
                reason
            );
            state.history.push(HistoryEntry::now(HistoryEvent::VerificationFailed {
                attempt,
                reason: reason.clone(),
                retry_triggered: true,
            }));
            state.feedback = Some(if rejected_now > 0 {
                format!(
                    "{}. {} questions were rejected as duplicates of existing questions or for missing fields; write new ones.",
                    reason, rejected_now
                )
            } else {
                reason
            });
            return Event::Mismatch { retry: true };
        }

        state.history.push(HistoryEntry::now(HistoryEvent::VerificationFailed {
            attempt,
            reason,
            retry_triggered: false,
        }));
        let forced = corrector::force_match(
            report.accepted,
            state.outline.plan.len(),
            state.outline.plan.total(),
        );
        state.history.push(HistoryEntry::now(HistoryEvent::ForcedMatch {
            questions: forced.len(),
            marks: forced.iter().map(|q| q.marks).sum(),
        }));
        state.verified = forced;
        Event::Mismatch { retry: false }
    }

    fn assemble(&self, state: &mut PipelineState) -> Event {
        let questions = std::mem::take(&mut state.verified);
        debug_assert_eq!(questions.len(), state.outline.plan.len());
        debug_assert_eq!(
            questions.iter().map(|q| q.marks).sum::<u32>(),
            state.outline.plan.total()
        );

        let artifact = assembler::assemble(&state.request, questions);
        state.history.push(HistoryEntry::now(HistoryEvent::Completed {
            questions_final: artifact.questions.len(),
            marks_final: artifact.total_marks,
            total_retries: state.attempt(),
            total_rejected: state.rejected.len(),
        }));
        state.artifact = Some(artifact);
        Event::Assembled
    }
}

fn record_generation(state: &mut PipelineState, attempt: u32, candidates: &[CandidateQuestion], fallback: bool) {
    state.history.push(HistoryEntry::now(HistoryEvent::Generation {
        attempt,
        questions_generated: candidates.len(),
        marks_generated: candidates.iter().filter_map(|c| c.marks).sum(),
        fallback,
        error: None,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai_service::MockTextGenerator;
    use crate::services::embed_service::MockEmbedder;
    use crate::services::paper_store::MockPaperStore;
    use crate::services::similarity_index::question_key;
    use uuid::Uuid;

    fn empty_store() -> MockPaperStore {
        let mut store = MockPaperStore::new();
        store.expect_resource_excerpts().returning(|_, _, _, _| Ok(vec![]));
        store.expect_approved_papers().returning(|_, _, _| Ok(vec![]));
        store.expect_regenerated_papers().returning(|_, _, _, _| Ok(vec![]));
        store
    }

    fn questions_json(count: usize, marks: u32, subject_word: &str) -> String {
        let items: Vec<_> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "question_text": format!("Explain {} concept number {}", subject_word, i),
                    "blooms_level": "Understand",
                    "question_type": "Short Answer",
                    "marks": marks,
                    "answer_key": "See notes",
                })
            })
            .collect();
        serde_json::to_string(&items).unwrap()
    }

    fn generator_returning(text: String, times: usize) -> MockTextGenerator {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .times(times)
            .returning(move |_| Ok(text.clone()));
        generator
    }

    fn any_embedder() -> MockEmbedder {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed_texts()
            .returning(|texts| Ok(vec![vec![0.0]; texts.len()]));
        embedder
    }

    fn pipeline(generator: MockTextGenerator, embedder: MockEmbedder, index: SimilarityIndex) -> PaperGenerator {
        PaperGenerator::new(
            Arc::new(empty_store()),
            Arc::new(generator),
            Arc::new(embedder),
            Arc::new(index),
            PipelineSettings::default(),
        )
    }

    fn request(owner: Uuid) -> GenerationRequest {
        GenerationRequest::new(owner, "Thermodynamics", "Physics", 8).with_instruction("4 questions")
    }

    #[test]
    fn transition_table() {
        use Event::*;
        assert_eq!(transition(Stage::ContextGather, ContextGathered), Stage::Generate);
        assert_eq!(transition(Stage::ContextGather, CollaboratorFailed), Stage::Error);
        assert_eq!(transition(Stage::Generate, CandidatesProduced), Stage::Verify);
        assert_eq!(transition(Stage::Generate, GenerationRejected { retry: true }), Stage::Generate);
        assert_eq!(transition(Stage::Generate, GenerationRejected { retry: false }), Stage::Error);
        assert_eq!(transition(Stage::Generate, CollaboratorFailed), Stage::Error);
        assert_eq!(transition(Stage::Verify, Mismatch { retry: true }), Stage::Generate);
        assert_eq!(transition(Stage::Verify, Mismatch { retry: false }), Stage::Assemble);
        assert_eq!(transition(Stage::Verify, Verified), Stage::Assemble);
        assert_eq!(transition(Stage::Assemble, Assembled), Stage::Complete);
        assert_eq!(transition(Stage::Assemble, Verified), Stage::Error);
        assert_eq!(transition(Stage::Complete, ContextGathered), Stage::Error);
        assert_eq!(transition(Stage::ContextGather, Assembled), Stage::Error);
    }

    #[tokio::test]
    async fn happy_path_completes_in_one_attempt() {
        let generator = generator_returning(questions_json(4, 2, "thermodynamics"), 1);
        let generated = pipeline(generator, any_embedder(), SimilarityIndex::new(1))
            .generate_paper(request(Uuid::new_v4()))
            .await
            .unwrap();

        let paper = generated.artifact;
        assert_eq!(paper.questions.len(), 4);
        assert_eq!(paper.total_marks, 8);
        assert!(generated.rejected.is_empty());
        assert!(matches!(
            generated.history.last().map(|h| &h.event),
            Some(HistoryEvent::Completed { questions_final: 4, marks_final: 8, .. })
        ));
    }

    #[tokio::test]
    async fn corrector_repairs_marks_before_verification() {
        let generator = generator_returning(questions_json(6, 5, "thermodynamics"), 1);
        let state = pipeline(generator, any_embedder(), SimilarityIndex::new(1))
            .run(request(Uuid::new_v4()))
            .await;
        assert_eq!(state.stage, Stage::Complete);
        let paper = state.artifact.unwrap();
        assert_eq!(paper.questions.iter().map(|q| q.marks).collect::<Vec<_>>(), vec![2, 2, 2, 2]);
    }

    #[tokio::test]
    async fn persistent_duplicates_end_in_forced_match() {
        let owner = Uuid::new_v4();
        let index = SimilarityIndex::new(1);
        index.add(question_key(owner, Uuid::new_v4(), 0), vec![0.0]).unwrap();
        // one initial attempt plus five verification retries
        let generator = generator_returning(questions_json(4, 2, "thermodynamics"), 6);

        let state = pipeline(generator, any_embedder(), index).run(request(owner)).await;
        assert_eq!(state.stage, Stage::Complete);
        assert_eq!(state.verification_retries, 5);
        assert_eq!(state.rejected.len(), 24);
        let paper = state.artifact.unwrap();
        assert_eq!(paper.questions.len(), 4);
        assert_eq!(paper.total_marks, 8);
        assert!(state
            .history
            .iter()
            .any(|h| matches!(h.event, HistoryEvent::ForcedMatch { questions: 4, marks: 8 })));
    }

    #[tokio::test]
    async fn wrong_shape_exhausts_generation_budget() {
        let generator = generator_returning(r#"{"result": "ok"}"#.to_string(), 3);
        let owner = Uuid::new_v4();
        let engine = pipeline(generator, any_embedder(), SimilarityIndex::new(1));
        let state = engine.run(request(owner)).await;
        assert_eq!(state.stage, Stage::Error);
        assert_eq!(state.generation_failures, 3);
        assert!(state.artifact.is_none());
    }

    #[tokio::test]
    async fn collaborator_failure_stops_immediately() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .times(1)
            .returning(|_| Err(Error::ExternalService("Generation service error: timed out".into())));
        let err = pipeline(generator, any_embedder(), SimilarityIndex::new(1))
            .generate_paper(request(Uuid::new_v4()))
            .await
            .unwrap_err();
        match err {
            Error::Generation(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn store_failure_fails_context_stage() {
        let mut store = MockPaperStore::new();
        store
            .expect_resource_excerpts()
            .returning(|_, _, _, _| Err(Error::Internal("pool closed".into())));
        let mut generator = MockTextGenerator::new();
        generator.expect_complete().never();
        let engine = PaperGenerator::new(
            Arc::new(store),
            Arc::new(generator),
            Arc::new(any_embedder()),
            Arc::new(SimilarityIndex::new(1)),
            PipelineSettings::default(),
        );
        let state = engine.run(request(Uuid::new_v4())).await;
        assert_eq!(state.stage, Stage::Error);
        assert!(state.errors[0].contains("pool closed"));
    }

    #[tokio::test]
    async fn low_relevance_retries_then_proceeds() {
        // two rejections for relevance, the third attempt proceeds with a warning
        let generator = generator_returning(questions_json(4, 2, "cooking"), 3);
        let state = pipeline(generator, any_embedder(), SimilarityIndex::new(1))
            .run(request(Uuid::new_v4()))
            .await;
        assert_eq!(state.stage, Stage::Complete);
        assert_eq!(state.generation_failures, 2);
    }

    #[tokio::test]
    async fn undecodable_output_uses_fallback_then_forces() {
        let generator = generator_returning("not json at all".to_string(), 6);
        let request = GenerationRequest::new(Uuid::new_v4(), "Thermodynamics", "Physics", 20)
            .with_instruction("4 questions");
        let state = pipeline(generator, any_embedder(), SimilarityIndex::new(1))
            .run(request)
            .await;
        assert_eq!(state.stage, Stage::Complete);
        let paper = state.artifact.unwrap();
        assert_eq!(paper.questions.len(), 4);
        assert_eq!(paper.total_marks, 20);
    }
}
