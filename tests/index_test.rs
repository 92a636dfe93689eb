mod helpers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use convo_rag::embedding::EMBEDDING_DIM;
use convo_rag::index::{metadata_path, IndexMetadata, IndexOptions, VectorIndex};
use convo_rag::IndexError;
use helpers::{chunk, random_unit_vector, spike, test_index};
use tempfile::TempDir;

#[tokio::test]
async fn save_clear_load_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index.bin");
    let index = test_index(500).await;

    let vectors: Vec<Vec<f32>> = (0..50).map(|_| random_unit_vector(EMBEDDING_DIM)).collect();
    for (i, v) in vectors.iter().enumerate() {
        index
            .insert(v.clone(), chunk("s1", &format!("chunk number {i}")))
            .await
            .unwrap();
    }
    let before = index.stats();

    let saved = index.save(&path).await.unwrap();
    assert_eq!(saved, path);
    assert!(path.exists());
    assert!(metadata_path(&path).exists());

    index.clear().await.unwrap();
    assert_eq!(index.stats().num_elements, 0);

    assert!(index.load(&path).await.unwrap());
    let after = index.stats();
    assert_eq!(after.num_elements, before.num_elements);
    assert_eq!(after.num_dimensions, before.num_dimensions);
    assert_eq!(after.max_elements, 500);

    let hits = index.search(&vectors[17], 1, 0.0).unwrap();
    assert_eq!(hits[0].id, 17);
    assert!(hits[0].score > 0.99);
    assert_eq!(hits[0].chunk.text, "chunk number 17");
}

#[tokio::test]
async fn load_restores_persisted_shape_not_configured_one() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index.bin");

    let small = VectorIndex::new(IndexOptions::default());
    small.initialize(8, 20).await.unwrap();
    let mut v = vec![0.0; 8];
    v[3] = 1.0;
    small.insert(v, chunk("s", "eight dims")).await.unwrap();
    small.save(&path).await.unwrap();

    let fresh = VectorIndex::new(IndexOptions::default());
    assert!(fresh.load(&path).await.unwrap());
    let stats = fresh.stats();
    assert_eq!(stats.num_dimensions, 8);
    assert_eq!(stats.max_elements, 20);
    assert_eq!(stats.num_elements, 1);
}

#[tokio::test]
async fn missing_snapshot_loads_as_false() {
    let tmp = TempDir::new().unwrap();
    let index = VectorIndex::new(IndexOptions::default());
    assert!(!index.load(&tmp.path().join("nothing.bin")).await.unwrap());
    assert!(!index.is_initialized());
}

#[tokio::test]
async fn corrupt_sidecar_is_deleted() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index.bin");
    let index = test_index(10).await;
    index.insert(spike(1), chunk("s", "hello")).await.unwrap();
    index.save(&path).await.unwrap();

    std::fs::write(metadata_path(&path), "{ not json").unwrap();

    let reloaded = VectorIndex::new(IndexOptions::default());
    assert!(!reloaded.load(&path).await.unwrap());
    assert!(!path.exists());
    assert!(!metadata_path(&path).exists());
}

#[tokio::test]
async fn corrupt_graph_file_is_deleted() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index.bin");
    let index = test_index(10).await;
    index.insert(spike(1), chunk("s", "hello")).await.unwrap();
    index.save(&path).await.unwrap();

    std::fs::write(&path, b"definitely not a graph").unwrap();

    // a failed load leaves the live index untouched
    assert!(!index.load(&path).await.unwrap());
    assert_eq!(index.stats().num_elements, 1);
    assert!(!path.exists());
    assert!(!metadata_path(&path).exists());
}

#[tokio::test]
async fn orphaned_graph_file_is_deleted() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index.bin");
    std::fs::write(&path, b"leftover").unwrap();

    let index = VectorIndex::new(IndexOptions::default());
    assert!(!index.load(&path).await.unwrap());
    assert!(!path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_get_unique_ids() {
    let index = Arc::new(test_index(100).await);

    let mut handles = Vec::new();
    for i in 0..20 {
        let index = Arc::clone(&index);
        handles.push(tokio::spawn(async move {
            let v = random_unit_vector(EMBEDDING_DIM);
            let id = index.insert(v, chunk("s", &format!("writer {i}"))).await.unwrap();
            (id, i)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let (id, writer) = handle.await.unwrap();
        // metadata under each id belongs to the writer that got it
        assert_eq!(index.chunk(id).unwrap().text, format!("writer {writer}"));
        ids.push(id);
    }
    ids.sort_unstable();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());
    assert_eq!(index.stats().num_elements, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn searches_run_alongside_writes() {
    let index = Arc::new(test_index(200).await);
    index.insert(spike(0), chunk("s", "anchor")).await.unwrap();

    let writer = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for i in 1..100 {
                index.insert(random_unit_vector(EMBEDDING_DIM), chunk("s", &format!("w{i}"))).await.unwrap();
            }
        })
    };
    let reader = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for _ in 0..100 {
                let hits = index.search(&spike(0), 1, 0.0).unwrap();
                assert_eq!(hits[0].chunk.text, "anchor");
                tokio::task::yield_now().await;
            }
        })
    };
    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(index.len(), 100);
}

#[tokio::test]
async fn batch_with_one_bad_vector_is_rejected_whole() {
    let index = test_index(100).await;
    let batch = vec![
        (spike(1), chunk("s", "ok one")),
        (vec![0.5; 10], chunk("s", "wrong length")),
        (spike(2), chunk("s", "ok two")),
    ];
    let err = index.insert_batch(batch).await.unwrap_err();
    assert!(matches!(err, IndexError::DimensionMismatch { expected: 384, actual: 10 }));
    assert!(index.is_empty());

    let ids = index
        .insert_batch(vec![(spike(1), chunk("s", "a")), (spike(2), chunk("s", "b"))])
        .await
        .unwrap();
    assert_eq!(ids, vec![0, 1]);
}

#[tokio::test]
async fn batch_over_capacity_is_rejected_whole() {
    let index = test_index(3).await;
    index.insert(spike(0), chunk("s", "first")).await.unwrap();
    let batch: Vec<_> = (1..4).map(|i| (spike(i), chunk("s", "more"))).collect();
    let err = index.insert_batch(batch).await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::CapacityExceeded { current: 1, requested: 3, max: 3 }
    ));
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn dimension_mismatch_on_search_is_an_error() {
    let index = test_index(10).await;
    index.insert(spike(0), chunk("s", "x")).await.unwrap();
    assert!(matches!(
        index.search(&[1.0, 0.0], 1, 0.0),
        Err(IndexError::DimensionMismatch { .. })
    ));
}

#[tokio::test]
async fn empty_index_search_is_empty() {
    let index = test_index(10).await;
    assert!(index.search(&spike(0), 5, 0.0).unwrap().is_empty());
}

#[tokio::test]
async fn remove_session_rebuilds_with_dense_ids() {
    let index = test_index(100).await;
    for i in 0..6 {
        let session = if i % 2 == 0 { "keep" } else { "drop" };
        index.insert(spike(i), chunk(session, &format!("{session} {i}"))).await.unwrap();
    }

    let removed = index.remove_session("drop").await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(index.len(), 3);

    // stale vectors are unreachable
    let hits = index.search(&spike(1), 3, 0.0).unwrap();
    assert!(hits.iter().all(|h| h.chunk.session_id == "keep"));

    // survivors are renumbered 0..n in their original order
    let texts: Vec<String> = (0..3).map(|id| index.chunk(id).unwrap().text).collect();
    assert_eq!(texts, vec!["keep 0", "keep 2", "keep 4"]);
    let hit = index.search(&spike(4), 1, 0.0).unwrap();
    assert_eq!(hit[0].id, 2);

    assert_eq!(index.remove_session("missing").await.unwrap(), 0);
}

#[tokio::test]
async fn removal_survives_a_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index.bin");
    let index = test_index(100).await;
    index.insert(spike(0), chunk("a", "alpha")).await.unwrap();
    index.insert(spike(1), chunk("b", "beta")).await.unwrap();
    index.remove_session("a").await.unwrap();
    index.save(&path).await.unwrap();

    let reloaded = VectorIndex::new(IndexOptions::default());
    assert!(reloaded.load(&path).await.unwrap());
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.chunk(0).unwrap().session_id, "b");
}

/// Unit vector close to `base`, perturbed by `noise` in random directions.
fn near(base: &[f32], noise: f32) -> Vec<f32> {
    let jitter = random_unit_vector(base.len());
    let v: Vec<f32> = base.iter().zip(&jitter).map(|(b, j)| b + noise * j).collect();
    convo_rag::embedding::l2_normalize(&v)
}

#[tokio::test]
async fn outnumbered_session_is_still_found() {
    let index = test_index(200).await;
    let query = random_unit_vector(EMBEDDING_DIM);

    let crowd: Vec<_> = (0..100)
        .map(|i| (near(&query, 0.05), chunk("a", &format!("crowd {i}"))))
        .collect();
    index.insert_batch(crowd).await.unwrap();
    for i in 0..3 {
        index.insert(near(&query, 1.5), chunk("b", &format!("minority {i}"))).await.unwrap();
    }

    let hits = index.search_scoped(&query, 5, 0.0, Some("b")).unwrap();
    assert_eq!(hits.len(), 3, "session b has 3 entries");
    assert!(hits.iter().all(|h| h.chunk.session_id == "b"));

    // unscoped search is still dominated by the crowd
    let global = index.search(&query, 5, 0.0).unwrap();
    assert!(global.iter().all(|h| h.chunk.session_id == "a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_is_not_blocked_by_session_rebuild() {
    let index = Arc::new(test_index(5_000).await);
    let batch: Vec<_> = (0..5_000)
        .map(|i| {
            let session = if i % 2 == 0 { "a" } else { "b" };
            (random_unit_vector(EMBEDDING_DIM), chunk(session, &format!("entry {i}")))
        })
        .collect();
    index.insert_batch(batch).await.unwrap();
    let query = random_unit_vector(EMBEDDING_DIM);

    let started = Instant::now();
    let removal = {
        let index = Arc::clone(&index);
        tokio::spawn(async move { index.remove_session("a").await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let search_started = Instant::now();
    let hits = index.search(&query, 5, 0.0).unwrap();
    let search_took = search_started.elapsed();

    assert_eq!(removal.await.unwrap(), 2_500);
    let rebuild_took = started.elapsed();
    assert_eq!(hits.len(), 5);
    // a blocked search would wait out most of the rebuild
    assert!(
        search_took < rebuild_took / 2,
        "search took {search_took:?} during a {rebuild_took:?} rebuild"
    );
    assert_eq!(index.len(), 2_500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_and_batches_leave_a_consistent_snapshot() {
    let tmp = TempDir::new().unwrap();
    let path = Arc::new(tmp.path().join("index.bin"));
    let index = Arc::new(test_index(1_000).await);

    let mut handles = Vec::new();
    for round in 0..5 {
        let writer = {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                let batch: Vec<_> = (0..50)
                    .map(|i| (random_unit_vector(EMBEDDING_DIM), chunk("s", &format!("r{round} c{i}"))))
                    .collect();
                index.insert_batch(batch).await.unwrap();
            })
        };
        handles.push(writer);
        for _ in 0..2 {
            let index = Arc::clone(&index);
            let path = Arc::clone(&path);
            handles.push(tokio::spawn(async move {
                index.save(&path).await.unwrap();
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // every save wrote a whole batch boundary, never a torn one
    let sidecar: IndexMetadata =
        serde_json::from_str(&std::fs::read_to_string(metadata_path(&path)).unwrap()).unwrap();
    assert_eq!(sidecar.num_elements, sidecar.chunks.len());
    assert_eq!(sidecar.num_elements % 50, 0);

    let reloaded = VectorIndex::new(IndexOptions::default());
    assert!(reloaded.load(&path).await.unwrap());
    assert_eq!(reloaded.stats().num_elements, sidecar.num_elements);

    index.save(&path).await.unwrap();
    assert!(reloaded.load(&path).await.unwrap());
    assert_eq!(reloaded.stats().num_elements, 250);
    assert_eq!(reloaded.session_counts().get("s"), Some(&250));
}
