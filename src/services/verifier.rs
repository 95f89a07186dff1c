use crate::models::question::{CandidateQuestion, Question};
use crate::services::embed_service::Embedder;
use crate::services::planner::PlanOutline;
use crate::services::similarity_index::{key_owner, SimilarityIndex};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    MissingFields { fields: Vec<&'static str> },
    Duplicate { similarity: f32, neighbor: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedQuestion {
    pub question: CandidateQuestion,
    pub reason: RejectionReason,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct VerificationReport {
    pub accepted: Vec<Question>,
    pub rejected: Vec<RejectedQuestion>,
}

#[derive(Clone)]
pub struct Verifier {
    embedder: Arc<dyn Embedder>,
    index: Arc<SimilarityIndex>,
    threshold: f32,
    neighbors: usize,
}

impl Verifier {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<SimilarityIndex>, threshold: f32, neighbors: usize) -> Self {
        Self {
            embedder,
            index,
            threshold,
            neighbors,
        }
    }

    /// Drops incomplete candidates and near-duplicates of `owner`'s accepted questions,
    /// keeping arrival order.
    pub async fn verify(&self, candidates: Vec<CandidateQuestion>, owner: Uuid, attempt: u32) -> VerificationReport {
        let mut report = VerificationReport::default();
        let mut complete = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let missing = candidate.missing_fields();
            if missing.is_empty() {
                complete.push(candidate);
            } else {
                tracing::info!("Rejected question missing {}", missing.join(", "));
                report.rejected.push(RejectedQuestion {
                    question: candidate,
                    reason: RejectionReason::MissingFields { fields: missing },
                    attempt,
                    timestamp: Utc::now(),
                });
            }
        }

        let vectors = if complete.is_empty() || self.index.is_empty() {
            None
        } else {
            let texts: Vec<String> = complete.iter().map(|c| c.text().to_string()).collect();
            match self.embedder.embed_texts(&texts).await {
                Ok(vectors) => Some(vectors),
                Err(e) => {
                    tracing::warn!("Duplicate check skipped, embedding failed: {}", e);
                    None
                }
            }
        };

        for (i, candidate) in complete.into_iter().enumerate() {
            let vector = vectors.as_ref().and_then(|v| v.get(i));
            if let Some(hit) = vector.and_then(|v| self.nearest_owned(v, owner)) {
                if hit.0 >= self.threshold {
                    tracing::info!(
                        similarity = hit.0,
                        neighbor = %hit.1,
                        "Rejected duplicate question"
                    );
                    report.rejected.push(RejectedQuestion {
                        question: candidate,
                        reason: RejectionReason::Duplicate {
                            similarity: hit.0,
                            neighbor: hit.1,
                        },
                        attempt,
                        timestamp: Utc::now(),
                    });
                    continue;
                }
            }
            match Question::try_from(candidate) {
                Ok(q) => report.accepted.push(q),
                Err(e) => tracing::warn!("Unexpected incomplete question: {}", e),
            }
        }

        tracing::info!(
            "Verification accepted {} and rejected {} questions",
            report.accepted.len(),
            report.rejected.len()
        );
        report
    }

    fn nearest_owned(&self, vector: &[f32], owner: Uuid) -> Option<(f32, String)> {
        match self
            .index
            .search_filtered(vector, self.neighbors, |id| key_owner(id) == Some(owner))
        {
            Ok(hits) => hits.into_iter().next().map(|n| (n.similarity, n.id)),
            Err(e) => {
                tracing::warn!("Duplicate search failed: {}", e);
                None
            }
        }
    }
}

/// `None` when survivors match the plan length, its total and any declared count.
pub fn constraint_mismatch(accepted: &[Question], outline: &PlanOutline) -> Option<String> {
    let count = accepted.len();
    let marks: u32 = accepted.iter().map(|q| q.marks).sum();
    let expected_count = outline.plan.len();
    let expected_marks = outline.plan.total();

    let mut problems = Vec::new();
    if count != expected_count {
        problems.push(format!("expected {} questions, got {}", expected_count, count));
    }
    if let Some(declared) = outline.declared_count.filter(|d| *d != count) {
        problems.push(format!("instruction asks for {} questions, got {}", declared, count));
    }
    if marks != expected_marks {
        problems.push(format!("expected {} marks, got {}", expected_marks, marks));
    }

    if problems.is_empty() {
        None
    } else {
        Some(problems.join("; "))
    }
}
