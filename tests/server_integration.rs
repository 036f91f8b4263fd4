//! HTTP server tests: a real listener on an ephemeral port, driven with
//! reqwest, backed by a SQLite index and scripted chat responses.

mod common;

use common::{setup_env, MOBY_DICK, PHOTOSYNTHESIS};
use rag_chat::pipeline;
use rag_chat::server::{serve, AppState};
use rag_chat_core::testing::{HashEmbedder, ScriptedChat};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

async fn start(chat: Arc<ScriptedChat>) -> (TempDir, String) {
    let (tmp, cfg, _) = setup_env(
        &[("moby_dick.txt", MOBY_DICK), ("plants.txt", PHOTOSYNTHESIS)],
        "",
    );
    let embedder = Arc::new(HashEmbedder::new(64));
    let index = pipeline::prepare_index(&cfg, &pipeline::index_manager(&cfg), embedder.as_ref(), false)
        .await
        .unwrap();
    let chain = pipeline::assemble_chain(&cfg, index, embedder, chat).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        serve(listener, AppState::new(chain)).await.unwrap();
    });
    (tmp, base)
}

#[tokio::test]
async fn test_health() {
    let (_tmp, base) = start(Arc::new(ScriptedChat::empty())).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store_id"], "chroma_db");
    assert_eq!(body["records"], 2);
}

#[tokio::test]
async fn test_chat_round_trip_returns_extended_history() {
    let chat = Arc::new(ScriptedChat::new([
        "Herman Melville wrote Moby Dick.",
        "When was Moby Dick published?",
        "It was published in 1851.",
    ]));
    let (_tmp, base) = start(chat.clone()).await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({ "input": "Who wrote Moby Dick?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["answer"], "Herman Melville wrote Moby Dick.");
    assert_eq!(first["history"].as_array().unwrap().len(), 2);

    let second: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({ "history": first["history"], "input": "When was it published?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["standalone_query"], "When was Moby Dick published?");
    assert_eq!(second["passages"][0]["metadata"]["source"], "moby_dick.txt");

    let history = second["history"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[2]["role"], "user");
    assert_eq!(history[2]["text"], "When was it published?");
    assert_eq!(history[3]["role"], "assistant");

    // The rewrite call saw the first exchange as history.
    assert_eq!(chat.calls()[1].history.len(), 2);
}

#[tokio::test]
async fn test_chat_rejects_empty_input() {
    let (_tmp, base) = start(Arc::new(ScriptedChat::empty())).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "input": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_generation_failure_maps_to_bad_gateway() {
    let chat = Arc::new(ScriptedChat::empty());
    chat.push_error("upstream timeout");
    let (_tmp, base) = start(chat).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "input": "Who wrote Moby Dick?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "generation_service");
}

#[tokio::test]
async fn test_search_respects_k() {
    let (_tmp, base) = start(Arc::new(ScriptedChat::empty())).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/search", base))
        .json(&json!({ "query": "white whale", "k": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let passages = body["passages"].as_array().unwrap();
    assert_eq!(passages.len(), 1);
    assert_eq!(passages[0]["metadata"]["source"], "moby_dick.txt");

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({ "query": "whale", "k": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "configuration");
}
