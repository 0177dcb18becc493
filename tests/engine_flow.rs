use std::sync::Arc;
use std::time::Duration;

use palimpsest_lib::chunks::{MemorySessionStore, VisibilityEntry};
use palimpsest_lib::clock::ManualClock;
use palimpsest_lib::config::EngineConfig;
use palimpsest_lib::db::Database;
use palimpsest_lib::dom::{Document, ElementHandle, ElementSpec, MemoryDocument};
use palimpsest_lib::engine::{Engine, EngineServices};
use palimpsest_lib::evaluation::VisitorMeta;
use palimpsest_lib::remote::{FixedContentStore, FixedPageSource, FixedScoringService};
use palimpsest_lib::transform::ContentSource;
use palimpsest_lib::Mode;
use pretty_assertions::assert_eq;

const ORIGINAL: [&str; 2] = [
    "The results have been published.",
    "Careful readers will notice every small change here.",
];
const REWRITTEN: [&str; 2] = [
    "Findings are now public.",
    "Attentive readers may spot each tiny edit in this text.",
];

struct Fixture {
    clock: ManualClock,
    doc: Arc<MemoryDocument>,
    elements: Vec<ElementHandle>,
    engine: Engine,
    db: Database,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let clock = ManualClock::new(0);
    let doc = Arc::new(MemoryDocument::new("/essay"));
    let elements = ORIGINAL
        .iter()
        .map(|text| doc.insert("main", ElementSpec::new("p", text)))
        .collect();

    let pages = FixedPageSource::new().with_page(
        "/essay",
        1,
        &ORIGINAL.join("\n\n"),
        &REWRITTEN.join("\n\n"),
    );
    let services = EngineServices {
        pages: Arc::new(pages),
        store: Arc::new(FixedContentStore::new()),
        generator: None,
        scoring: Arc::new(FixedScoringService::new(
            "Evaluation follows.\n```json\n{\"scores\": [{\"chunkId\": \"a\", \"score\": 8, \"note\": \"natural\"}, {\"chunkId\": \"b\", \"score\": 7, \"note\": \"fine\"}], \"averageScore\": 7.5}\n```",
        )),
    };

    let mut config = EngineConfig::default();
    config.evaluation.rates.rewrite_levels = vec![1.0; 4];

    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("engine.db")).unwrap();
    let engine = Engine::with_clock(
        config,
        doc.clone(),
        Arc::new(MemorySessionStore::new()),
        services,
        Arc::new(clock.clone()),
    )
    .unwrap()
    .with_database(db.clone());

    Fixture {
        clock,
        doc,
        elements,
        engine,
        db,
        _dir: dir,
    }
}

#[tokio::test(start_paused = true)]
async fn idle_reader_gets_rewritten_content_and_the_batch_is_scored() {
    let f = fixture();
    f.engine.start();
    let visible: Vec<VisibilityEntry> = f.elements.iter().map(|el| VisibilityEntry::visible(*el)).collect();
    assert_eq!(f.engine.registry().apply_visibility(&visible), 2);

    f.clock.set(5_000);
    for _ in 0..300 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if f.engine.debug_snapshot().transforms_applied >= 2 {
            break;
        }
    }
    assert_eq!(f.engine.behavior().get_state().mode, Mode::Rewrite);
    assert_eq!(f.engine.debug_snapshot().transforms_applied, 2);

    for (el, expected) in f.elements.iter().zip(REWRITTEN) {
        assert_eq!(f.doc.text(*el).as_deref(), Some(expected));
        assert_eq!(f.doc.attribute(*el, "data-transforming"), None);
    }
    let records = f.engine.transformation_log().records();
    assert!(records.iter().all(|r| r.source == ContentSource::ContentMap));
    assert!(records.iter().all(|r| r.level == Some(1)));

    let report = f
        .engine
        .evaluate_pending(VisitorMeta::default())
        .await
        .expect("transformations were applied");
    assert_eq!(report.total_count, 2);
    assert_eq!(report.sampled_count, 2);
    assert_eq!(report.scored_count, 2);
    assert!(report.passed);
    assert!(f.engine.transformation_log().is_empty());

    let stored = f.db.get_report(&report.batch_id).await.unwrap().unwrap();
    assert_eq!(stored.average_score, 7.5);
    assert_eq!(f.db.list_transformations(Some("/essay".into()), None).await.unwrap().len(), 2);

    assert_eq!(f.engine.reset(), 2);
    for (el, original) in f.elements.iter().zip(ORIGINAL) {
        assert_eq!(f.doc.text(*el).as_deref(), Some(original));
    }

    f.engine.stop();
    assert!(!f.engine.orchestrator().is_running());
}

#[tokio::test(start_paused = true)]
async fn hidden_page_is_left_alone() {
    let f = fixture();
    f.engine.start();
    let visible: Vec<VisibilityEntry> = f.elements.iter().map(|el| VisibilityEntry::visible(*el)).collect();
    f.engine.registry().apply_visibility(&visible);
    assert!(f.engine.sampler().on_visibility(false));

    f.clock.set(5_000);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(f.engine.behavior().get_state().mode, Mode::Rewrite);
    assert_eq!(f.engine.debug_snapshot().transforms_applied, 0);
    for (el, original) in f.elements.iter().zip(ORIGINAL) {
        assert_eq!(f.doc.text(*el).as_deref(), Some(original));
    }
    f.engine.stop();
}
