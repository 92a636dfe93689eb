mod helpers;

use std::sync::Arc;
use std::time::Duration;

use convo_rag::config::RagConfig;
use convo_rag::index::metadata_path;
use convo_rag::paths::DataDirResolver;
use convo_rag::tokens::EstimateTokenCounter;
use convo_rag::{Engine, Turn};
use helpers::{hash_generator, interview_transcript, test_engine, test_engine_with, turns};

#[tokio::test]
async fn conversation_is_chunked_indexed_and_saved() {
    let (engine, _tmp) = test_engine();
    let report = engine.process_conversation_history("interview-1", &interview_transcript()).await;

    assert!(report.success, "{report:?}");
    assert_eq!(report.chunks_processed, 4);
    assert_eq!(report.index_ids, vec![0, 1, 2, 3]);
    assert!(report.reason.is_none());

    let stats = engine.index_stats();
    assert_eq!(stats.num_elements, 4);
    assert_eq!(stats.num_dimensions, 384);

    let path = engine.index_path();
    assert!(path.exists());
    assert!(metadata_path(&path).exists());
}

#[tokio::test]
async fn second_engine_sees_saved_chunks() {
    let (engine, tmp) = test_engine();
    engine.process_conversation_history("s1", &interview_transcript()).await;

    let reopened = Engine::with_parts(
        RagConfig::default(),
        hash_generator(),
        Arc::new(EstimateTokenCounter),
        Arc::new(DataDirResolver::new(Some(tmp.path().to_path_buf()))),
    );
    assert_eq!(reopened.index_path(), engine.index_path());
    reopened.ensure_index().await.unwrap();
    assert_eq!(reopened.index_stats().num_elements, 4);
    assert_eq!(reopened.index().session_counts().get("s1"), Some(&4));
}

#[tokio::test]
async fn invalid_inputs_are_rejected_without_error() {
    let (engine, _tmp) = test_engine();

    let blank = engine.process_conversation_history("  ", &interview_transcript()).await;
    assert!(!blank.success);
    assert_eq!(blank.reason.as_deref(), Some("invalid_session_id"));

    let empty = engine.process_conversation_history("s1", &[]).await;
    assert!(!empty.success);
    assert_eq!(empty.reason.as_deref(), Some("no_turns"));

    let single = engine.process_conversation_history("s1", &turns(&["only one turn"])).await;
    assert!(single.success);
    assert_eq!(single.chunks_processed, 0);
    assert_eq!(single.reason.as_deref(), Some("no_chunks"));

    assert!(!engine.index().is_initialized() || engine.index_stats().num_elements == 0);
}

#[tokio::test]
async fn capacity_overflow_is_reported() {
    let mut config = RagConfig::default();
    config.index.max_elements = 2;
    let (engine, _tmp) = test_engine_with(config);

    let report = engine.process_conversation_history("s1", &interview_transcript()).await;
    assert!(!report.success);
    assert_eq!(report.reason.as_deref(), Some("index_failed"));
    assert!(report.error.unwrap().contains("capacity"));
    assert_eq!(engine.index_stats().num_elements, 0);
}

#[tokio::test]
async fn forgetting_a_session_keeps_the_others() {
    let (engine, _tmp) = test_engine();
    engine.process_conversation_history("keep", &interview_transcript()).await;
    engine.process_conversation_history("drop", &interview_transcript()).await;
    assert_eq!(engine.index_stats().num_elements, 8);

    assert_eq!(engine.remove_session("drop").await.unwrap(), 4);
    let counts = engine.index().session_counts();
    assert_eq!(counts.get("keep"), Some(&4));
    assert!(!counts.contains_key("drop"));

    engine.save_index().await.unwrap();
    engine.clear_index().await.unwrap();
    assert!(engine.load_index().await.unwrap());
    assert_eq!(engine.index_stats().num_elements, 4);
}

#[tokio::test]
async fn report_json_is_camel_case() {
    let (engine, _tmp) = test_engine();
    let report = engine.process_conversation_history("s1", &interview_transcript()).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["chunksProcessed"], 4);
    assert_eq!(json["indexIds"][3], 3);
    assert!(json.get("reason").is_none());
}

#[tokio::test]
async fn turns_parse_from_transcript_json() {
    let raw = r#"[
        {"speaker": "interviewer", "message": "Hi there", "timestamp": "2026-01-05T10:00:00Z"},
        {"speaker": "candidate", "message": "Hello, thanks for having me"}
    ]"#;
    let parsed: Vec<Turn> = serde_json::from_str(raw).unwrap();
    assert!(parsed[0].timestamp.is_some());
    assert!(parsed[1].timestamp.is_none());

    let (engine, _tmp) = test_engine();
    let report = engine.process_conversation_history("s1", &parsed).await;
    assert_eq!(report.chunks_processed, 1);
}

#[tokio::test]
async fn rapid_schedules_ingest_only_the_last() {
    let mut config = RagConfig::default();
    config.ingest.debounce_ms = 100;
    let (engine, _tmp) = test_engine_with(config);

    let transcript = interview_transcript();
    let mut handles = Vec::new();
    for n in [4, 8, 12] {
        handles.push(engine.schedule_ingest("live", transcript[..n].to_vec()));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap());
    }
    assert!(reports[0].is_none());
    assert!(reports[1].is_none());
    let last = reports[2].as_ref().unwrap();
    assert!(last.success);
    assert_eq!(last.chunks_processed, 4);
    assert_eq!(engine.index_stats().num_elements, 4);
}

#[tokio::test]
async fn cancelled_ingest_never_runs() {
    let mut config = RagConfig::default();
    config.ingest.debounce_ms = 50;
    let (engine, _tmp) = test_engine_with(config);

    let handle = engine.schedule_ingest("live", interview_transcript());
    assert!(engine.cancel_ingest("live"));
    assert!(handle.await.unwrap().is_none());
    assert!(!engine.index().is_initialized());
}
