mod common;

use std::sync::Arc;

use common::{questions_json, teacher_id, MemoryStore, ScriptedGenerator, TextLengthEmbedder, EMBED_DIMENSION};
use exam_paper_backend::{
    error::Error,
    models::request::GenerationRequest,
    models::resource::ResourceExcerpt,
    services::{
        pipeline::{PaperGenerator, PipelineSettings, Stage},
        similarity_index::{question_key, SimilarityIndex},
    },
};
use uuid::Uuid;

fn generator_over(store: Arc<MemoryStore>, text: Arc<ScriptedGenerator>, index: Arc<SimilarityIndex>) -> PaperGenerator {
    PaperGenerator::new(
        store,
        text,
        Arc::new(TextLengthEmbedder),
        index,
        PipelineSettings::default(),
    )
}

#[tokio::test]
async fn eight_questions_over_forty_marks() {
    let text = Arc::new(ScriptedGenerator::answering(questions_json("Databases", 8, 5)));
    let pipeline = generator_over(
        Arc::new(MemoryStore::default()),
        text.clone(),
        Arc::new(SimilarityIndex::new(EMBED_DIMENSION)),
    );

    let request = GenerationRequest::new(teacher_id(), "Databases", "CS", 40).with_instruction("8 questions");
    let paper = pipeline.generate_paper(request).await.unwrap();

    assert_eq!(paper.artifact.questions.len(), 8);
    assert!(paper.artifact.questions.iter().all(|q| q.marks == 5));
    assert_eq!(paper.artifact.total_marks, 40);
    assert!(paper.rejected.is_empty());
    assert_eq!(text.calls(), 1);

    let prompt = &text.prompts.lock()[0];
    assert!(prompt.user.contains("Generate exactly 8 questions"));
    assert!(prompt.user.contains("Q8: 5 marks"));
}

#[tokio::test]
async fn teacher_resources_reach_the_generation_prompt() {
    let store = Arc::new(MemoryStore::default());
    store.resources.lock().push((
        teacher_id(),
        "Algorithms".to_string(),
        ResourceExcerpt {
            filename: "graphs-week3.pdf".to_string(),
            extracted_text: Some("Dijkstra relaxes every outgoing edge once.".to_string()),
        },
    ));
    store.resources.lock().push((
        Uuid::new_v4(),
        "Algorithms".to_string(),
        ResourceExcerpt {
            filename: "someone-else.pdf".to_string(),
            extracted_text: Some("Not yours.".to_string()),
        },
    ));

    let text = Arc::new(ScriptedGenerator::answering(questions_json("Algorithms", 4, 2)));
    let pipeline = generator_over(store, text.clone(), Arc::new(SimilarityIndex::new(EMBED_DIMENSION)));
    let request = GenerationRequest::new(teacher_id(), "Algorithms", "CS", 8).with_instruction("4 questions");
    pipeline.generate_paper(request).await.unwrap();

    let prompt = &text.prompts.lock()[0];
    assert!(prompt.user.contains("graphs-week3.pdf"));
    assert!(prompt.user.contains("Dijkstra relaxes every outgoing edge once."));
    assert!(!prompt.user.contains("someone-else.pdf"));
    assert!(prompt.user.contains("No approved papers found for Algorithms"));
}

#[tokio::test]
async fn collaborator_failure_ends_in_error_without_artifact() {
    let text = Arc::new(ScriptedGenerator::failing("connection reset by peer"));
    let pipeline = generator_over(
        Arc::new(MemoryStore::default()),
        text.clone(),
        Arc::new(SimilarityIndex::new(EMBED_DIMENSION)),
    );
    let request = GenerationRequest::new(teacher_id(), "Algorithms", "CS", 8);

    let state = pipeline.run(request.clone()).await;
    assert_eq!(state.stage, Stage::Error);
    assert!(state.artifact.is_none());

    match pipeline.generate_paper(request).await {
        Err(Error::Generation(message)) => assert!(message.contains("connection reset by peer")),
        other => panic!("unexpected outcome {:?}", other.map(|p| p.artifact.total_marks)),
    }
    assert_eq!(text.calls(), 2);
}

#[tokio::test]
async fn another_teachers_corpus_does_not_trigger_retries() {
    let index = Arc::new(SimilarityIndex::new(EMBED_DIMENSION));
    let text = Arc::new(ScriptedGenerator::answering(questions_json("Algorithms", 4, 2)));

    // Seed the index with exactly what the first run will produce, owned by someone else.
    let first = generator_over(Arc::new(MemoryStore::default()), text.clone(), index.clone())
        .generate_paper(GenerationRequest::new(teacher_id(), "Algorithms", "CS", 8).with_instruction("4 questions"))
        .await
        .unwrap();
    let other = Uuid::new_v4();
    let paper_id = Uuid::new_v4();
    let texts: Vec<String> = first.artifact.questions.iter().map(|q| q.question_text.clone()).collect();
    let vectors = exam_paper_backend::services::embed_service::Embedder::embed_texts(&TextLengthEmbedder, &texts)
        .await
        .unwrap();
    index
        .add_batch(
            vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| (question_key(other, paper_id, i), v))
                .collect(),
        )
        .unwrap();

    let second = generator_over(Arc::new(MemoryStore::default()), text.clone(), index)
        .generate_paper(GenerationRequest::new(teacher_id(), "Algorithms", "CS", 8).with_instruction("4 questions"))
        .await
        .unwrap();
    assert!(second.rejected.is_empty());
    assert_eq!(text.calls(), 2);
}

#[tokio::test]
async fn concurrent_requests_keep_independent_state() {
    let index = Arc::new(SimilarityIndex::new(EMBED_DIMENSION));
    let physics = generator_over(
        Arc::new(MemoryStore::default()),
        Arc::new(ScriptedGenerator::answering(questions_json("Physics", 5, 4))),
        index.clone(),
    );
    let chemistry = generator_over(
        Arc::new(MemoryStore::default()),
        Arc::new(ScriptedGenerator::answering(questions_json("Chemistry", 3, 10))),
        index,
    );

    let (a, b) = tokio::join!(
        physics.generate_paper(GenerationRequest::new(teacher_id(), "Physics", "Science", 20).with_instruction("5 questions")),
        chemistry.generate_paper(GenerationRequest::new(teacher_id(), "Chemistry", "Science", 30).with_instruction("3 questions")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.artifact.subject, "Physics");
    assert_eq!(a.artifact.questions.len(), 5);
    assert_eq!(b.artifact.subject, "Chemistry");
    assert_eq!(b.artifact.total_marks, 30);
}
