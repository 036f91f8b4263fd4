//! End-to-end tests of the index lifecycle and conversational turns over the
//! SQLite store, with deterministic providers in place of the network.

mod common;

use common::{setup_env, MOBY_DICK, PHOTOSYNTHESIS};
use rag_chat::pipeline;
use rag_chat::sqlite_store::SqliteVectorStore;
use rag_chat_core::embedding::Embedder;
use rag_chat_core::models::{ConversationHistory, Role};
use rag_chat_core::orchestrator::Session;
use rag_chat_core::testing::{HashEmbedder, ScriptedChat};
use rag_chat_core::RagError;
use std::sync::Arc;

#[tokio::test]
async fn test_index_is_built_once_and_reused_across_runs() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");

    let first = HashEmbedder::new(64);
    let index = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &first, false)
        .await
        .unwrap();
    assert_eq!(index.store_id(), "chroma_db");
    assert!(first.texts_embedded() > 0);
    assert!(cfg.store.root.join("chroma_db.sqlite").is_file());

    // A fresh manager and embedder stand in for the next process run.
    let second = HashEmbedder::new(64);
    let reloaded = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &second, false)
        .await
        .unwrap();
    assert_eq!(second.texts_embedded(), 0);
    assert_eq!(reloaded.meta(), index.meta());
}

#[tokio::test]
async fn test_rebuild_reembeds() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    let manager = pipeline::index_manager(&cfg);

    let embedder = HashEmbedder::new(64);
    pipeline::prepare_index(&cfg, &manager, &embedder, false)
        .await
        .unwrap();
    let after_first = embedder.texts_embedded();

    pipeline::prepare_index(&cfg, &manager, &embedder, true)
        .await
        .unwrap();
    assert_eq!(embedder.texts_embedded(), after_first * 2);
}

#[tokio::test]
async fn test_stale_corpus_is_served_under_same_name() {
    let (tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    let embedder = HashEmbedder::new(64);
    let original = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &embedder, false)
        .await
        .unwrap();

    std::fs::write(tmp.path().join("documents/extra.txt"), PHOTOSYNTHESIS).unwrap();

    let reused = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &embedder, false)
        .await
        .unwrap();
    assert_eq!(reused.meta().corpus_fingerprint, original.meta().corpus_fingerprint);
    assert_eq!(reused.len(), original.len());
}

#[tokio::test]
async fn test_content_keyed_store_follows_corpus() {
    let (tmp, mut cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    cfg.store.key_by_content = true;
    let embedder = HashEmbedder::new(64);

    let first = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &embedder, false)
        .await
        .unwrap();
    assert!(first.store_id().starts_with("chroma_db-"));

    std::fs::write(tmp.path().join("documents/extra.txt"), PHOTOSYNTHESIS).unwrap();
    let second = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &embedder, false)
        .await
        .unwrap();
    assert_ne!(first.store_id(), second.store_id());
    assert!(second.len() > first.len());

    // open_index derives the same id from the corpus.
    let opened = pipeline::open_index(&cfg, &pipeline::index_manager(&cfg), None)
        .await
        .unwrap();
    assert_eq!(opened.store_id(), second.store_id());
}

#[tokio::test]
async fn test_dimension_change_is_rejected_on_reuse() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &HashEmbedder::new(64), false)
        .await
        .unwrap();

    let err = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), &HashEmbedder::new(32), false)
        .await
        .unwrap_err();
    let rag = err.downcast_ref::<RagError>().expect("RagError in chain");
    assert!(matches!(
        rag,
        RagError::DimensionMismatch {
            expected: 64,
            actual: 32
        }
    ));
}

#[tokio::test]
async fn test_open_index_checks_embedder_dims() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    let manager = pipeline::index_manager(&cfg);
    pipeline::prepare_index(&cfg, &manager, &HashEmbedder::new(64), false)
        .await
        .unwrap();

    let same: &dyn Embedder = &HashEmbedder::new(64);
    assert!(pipeline::open_index(&cfg, &manager, Some(same)).await.is_ok());

    let narrower: &dyn Embedder = &HashEmbedder::new(16);
    let err = pipeline::open_index(&cfg, &manager, Some(narrower))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::DimensionMismatch { expected: 64, actual: 16 })
    ));
}

#[tokio::test]
async fn test_open_index_before_build_fails() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    let err = pipeline::open_index(&cfg, &pipeline::index_manager(&cfg), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::IndexNotFound { .. })
    ));
}

#[tokio::test]
async fn test_single_turn_moby_dick() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    let embedder = Arc::new(HashEmbedder::new(64));
    let chat = Arc::new(ScriptedChat::new(["Moby Dick was written by Herman Melville."]));

    let index = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), embedder.as_ref(), false)
        .await
        .unwrap();
    let chain = pipeline::assemble_chain(&cfg, index, embedder, chat.clone()).unwrap();

    let mut history = ConversationHistory::new();
    let outcome = chain.turn(&mut history, "Who wrote Moby Dick?").await.unwrap();

    assert!(outcome.answer.contains("Melville"));
    assert!(!outcome.passages.is_empty());
    assert!(outcome.passages[0].text.contains("Herman Melville"));
    assert_eq!(history.len(), 2);

    let calls = chat.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].system.contains("Herman Melville"));
}

#[tokio::test]
async fn test_multi_turn_conversation_over_sqlite() {
    let (_tmp, cfg, _) = setup_env(
        &[("moby_dick.txt", MOBY_DICK), ("plants.txt", PHOTOSYNTHESIS)],
        "",
    );
    let embedder = Arc::new(HashEmbedder::new(128));
    let chat = Arc::new(ScriptedChat::new([
        "Herman Melville wrote Moby Dick.",
        "When was Moby Dick published?",
        "It was published in 1851.",
    ]));

    let index = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), embedder.as_ref(), false)
        .await
        .unwrap();
    let chain = pipeline::assemble_chain(&cfg, index, embedder, chat.clone()).unwrap();
    let mut session = Session::new(chain);

    session.ask("Who wrote Moby Dick?").await.unwrap();
    let second = session.ask_detailed("When was it published?").await.unwrap();

    assert_eq!(second.standalone_query, "When was Moby Dick published?");
    assert_eq!(second.passages[0].metadata.source, "moby_dick.txt");
    assert!(second.answer.contains("1851"));

    let turns = session.history().turns();
    assert_eq!(turns.len(), 4);
    for (i, t) in turns.iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(t.role, expected);
    }
    assert_eq!(turns[2].text, "When was it published?");
}

#[tokio::test]
async fn test_generation_failure_keeps_history() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    let embedder = Arc::new(HashEmbedder::new(64));
    let chat = Arc::new(ScriptedChat::empty());
    chat.push_error("503 Service Unavailable");

    let index = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), embedder.as_ref(), false)
        .await
        .unwrap();
    let chain = pipeline::assemble_chain(&cfg, index, embedder, chat).unwrap();

    let mut history = ConversationHistory::new();
    let err = chain.turn(&mut history, "Who wrote Moby Dick?").await.unwrap_err();
    assert!(matches!(err, RagError::GenerationService(_)));
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_retrieval_k_from_config() {
    let (_tmp, cfg, _) = setup_env(
        &[("moby_dick.txt", MOBY_DICK), ("plants.txt", PHOTOSYNTHESIS)],
        "\n[retrieval]\nk = 1\n",
    );
    let embedder = Arc::new(HashEmbedder::new(64));
    let index = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), embedder.as_ref(), false)
        .await
        .unwrap();
    assert!(index.len() >= 2);

    let retriever = pipeline::retriever(&cfg, index, embedder).unwrap();
    assert_eq!(retriever.k(), 1);
    assert_eq!(retriever.retrieve("white whale").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_store_directory_layout() {
    let (_tmp, cfg, _) = setup_env(&[("moby_dick.txt", MOBY_DICK)], "");
    let store = SqliteVectorStore::new(&cfg.store.root);
    assert_eq!(store.index_path("chroma_db"), cfg.store.root.join("chroma_db.sqlite"));
}
