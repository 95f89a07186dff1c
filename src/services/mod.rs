pub mod ai_service;
pub mod assembler;
pub mod context_service;
pub mod corrector;
pub mod embed_service;
pub mod paper_store;
pub mod pipeline;
pub mod planner;
pub mod similarity_index;
pub mod verifier;
