use crate::models::question::{BloomsLevel, QuestionType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Explicit "N questions of type T worth M marks each" hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeHint {
    pub question_type: QuestionType,
    pub count: u32,
    pub marks: u32,
}

/// Percentages of questions tagged previous / creative / new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMix {
    pub previous: u32,
    pub creative: u32,
    pub new: u32,
}

impl Default for SourceMix {
    fn default() -> Self {
        Self {
            previous: 30,
            creative: 40,
            new: 30,
        }
    }
}

/// Input to one pipeline run. Never mutated once the pipeline takes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub requester: Uuid,
    pub subject: String,
    pub department: String,
    pub total_marks: u32,
    pub instruction: Option<String>,
    #[serde(default)]
    pub type_hints: Vec<TypeHint>,
    #[serde(default)]
    pub blooms_hints: BTreeMap<BloomsLevel, u32>,
    #[serde(default)]
    pub source_mix: SourceMix,
}

impl GenerationRequest {
    pub fn new(requester: Uuid, subject: impl Into<String>, department: impl Into<String>, total_marks: u32) -> Self {
        Self {
            requester,
            subject: subject.into(),
            department: department.into(),
            total_marks,
            instruction: None,
            type_hints: Vec::new(),
            blooms_hints: BTreeMap::new(),
            source_mix: SourceMix::default(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_type_hints(mut self, hints: Vec<TypeHint>) -> Self {
        self.type_hints = hints;
        self
    }

    pub fn instruction(&self) -> &str {
        self.instruction.as_deref().unwrap_or("")
    }
}
