use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use docdb::subdb::{NOTREADY_SUB_DB_ID, READY_SUB_DB_ID};
use docdb::{
    ConfigSnapshot, DataType, DocDbConfig, DocDbError, DocDbState, Document, DocumentDb,
    DocumentId, FeedOutcome, FieldSpec, FieldValue, PruneOutcome, ReconfigOutcome, Schema,
    SubDbType, WipeOutcome,
};

fn config(tmp: &TempDir) -> DocDbConfig {
    DocDbConfig::new("music", tmp.path().to_path_buf(), 0)
        .with_worker_threads(2)
        .with_background_reprocessing(false)
}

fn base_schema() -> Schema {
    Schema::new()
        .field("title", FieldSpec::text())
        .field("year", FieldSpec::new(DataType::Int64))
}

fn snapshot(generation: u64, schema: Schema) -> ConfigSnapshot {
    ConfigSnapshot::new(generation, "music", schema)
}

fn song(n: u64) -> Document {
    Document::new(format!("id:music:{}", n))
        .with_field("title", format!("song number {}", n))
        .with_field("year", 1999i64)
}

fn open(tmp: &TempDir) -> DocumentDb {
    DocumentDb::open(config(tmp), snapshot(1, base_schema())).unwrap()
}

#[test]
fn restart_replays_only_the_unflushed_tail() {
    let tmp = TempDir::new().unwrap();
    {
        let db = open(&tmp);
        for n in 1..=50 {
            db.put(song(n)).unwrap();
        }
        let report = db.flush().unwrap();
        assert_eq!(report.target_serial, 50);
        assert!(report.failed.is_empty());
        assert!(matches!(report.prune, PruneOutcome::Pruned { serial: 50, .. }));

        for n in 51..=100 {
            db.put(song(n)).unwrap();
        }
        assert_eq!(db.last_serial(), 100);
        db.close().unwrap();
    }

    let db = open(&tmp);
    assert_eq!(db.state(), DocDbState::Online);
    assert!(db.oldest_flushed_serial() <= 50);
    let replay = db.replay_stats();
    assert_eq!(replay.records, 50);
    assert_eq!(replay.last_serial, 100);
    assert_eq!(db.last_serial(), 100);
    assert_eq!(db.num_docs(), 100);
    assert_eq!(db.match_term("default", "title", "song").unwrap().len(), 100);

    // Feed continues without gaps
    assert_eq!(db.put(song(101)).unwrap(), FeedOutcome::Accepted(101));
}

#[test]
fn restart_after_full_flush_replays_nothing() {
    let tmp = TempDir::new().unwrap();
    {
        let db = open(&tmp);
        for n in 1..=10 {
            db.put(song(n)).unwrap();
        }
        db.remove(DocumentId::new("id:music:3")).unwrap();
        db.flush().unwrap();
    }

    let db = open(&tmp);
    assert_eq!(db.replay_stats().records, 0);
    assert_eq!(db.last_serial(), 11);
    assert_eq!(db.num_docs(), 9);
    assert!(db.get_document(&DocumentId::new("id:music:3")).unwrap().is_none());
}

#[test]
fn lost_log_tail_fails_open() {
    let tmp = TempDir::new().unwrap();
    let tlog_dir = config(&tmp).tlog_dir();
    {
        let db = open(&tmp);
        for n in 1..=10 {
            db.put(song(n)).unwrap();
        }
        db.flush().unwrap();
    }
    fs::remove_dir_all(&tlog_dir).unwrap();

    match DocumentDb::open(config(&tmp), snapshot(1, base_schema())) {
        Err(DocDbError::LogTailLost {
            newest_flushed,
            last_logged,
        }) => {
            assert_eq!(newest_flushed, 10);
            assert_eq!(last_logged, 0);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("open must fail when the log tail is lost"),
    }
}

#[test]
fn lost_log_head_fails_open() {
    let tmp = TempDir::new().unwrap();
    let db_dir = config(&tmp).db_dir();
    {
        let db = open(&tmp);
        for n in 1..=10 {
            db.put(song(n)).unwrap();
        }
        db.flush().unwrap();
        assert_eq!(db.prune_serial(), 10);
        for n in 11..=12 {
            db.put(song(n)).unwrap();
        }
        db.close().unwrap();
    }
    for ty in SubDbType::all() {
        let summary_dir = db_dir.join(ty.dir_name()).join("summary");
        if summary_dir.exists() {
            fs::remove_dir_all(&summary_dir).unwrap();
        }
    }

    match DocumentDb::open(config(&tmp), snapshot(1, base_schema())) {
        Err(DocDbError::LogHeadLost {
            needed_from,
            pruned,
        }) => {
            assert_eq!(needed_from, 0);
            assert_eq!(pruned, 10);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("open must fail when the log head is pruned away"),
    }
}

#[test]
fn failed_apply_takes_database_offline_until_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let db = open(&tmp);
        for n in 1..=5 {
            db.put(song(n)).unwrap();
        }
        db.flush().unwrap();
        assert_eq!(db.prune_serial(), 5);

        db.sub_db(READY_SUB_DB_ID)
            .unwrap()
            .get_document_meta_store_context()
            .unwrap()
            .fail_next_apply();
        assert!(db.put(song(6)).is_err());
        assert_eq!(db.state(), DocDbState::Failed);
        assert_eq!(db.last_serial(), 6);

        assert!(db.put(song(7)).unwrap_err().is_fatal());
        assert!(db.flush().is_err());
        assert!(db.prune().is_err());
        assert!(db.apply_config(snapshot(2, base_schema().field("genre", FieldSpec::text()))).is_err());
        assert_eq!(db.prune_serial(), 5);
        db.close().unwrap();
    }

    // The logged put is applied on replay
    let db = open(&tmp);
    assert_eq!(db.state(), DocDbState::Online);
    assert_eq!(db.replay_stats().records, 1);
    assert_eq!(db.num_docs(), 6);
    assert!(db.get_document(&DocumentId::new("id:music:6")).unwrap().is_some());
}

#[test]
fn added_attribute_is_populated_by_one_deferred_task() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    for n in 1..=100 {
        db.put(song(n)).unwrap();
    }

    let with_year = Schema::new()
        .field("title", FieldSpec::text())
        .field("year", FieldSpec::attribute(DataType::Int64));
    let outcome = db.apply_config(snapshot(2, with_year)).unwrap();
    assert_eq!(outcome, ReconfigOutcome::Applied { serial: 101, tasks: 1 });
    assert_eq!(db.active_config().serial, 101);
    assert_eq!(db.pending_reprocessing(), 1);

    // Nothing runs the task yet, so the done signal is not accepted
    let tracker = db.sub_db(READY_SUB_DB_ID).unwrap().reprocessing_tracker();
    assert!(tracker.accepted_serial() < 101);

    let records = db.run_reprocessing().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].outcome.is_completed());
    assert_eq!(records[0].serial, 101);
    assert_eq!(tracker.accepted_serial(), 101);
    assert!(db.reprocessing_failures().is_empty());

    let view = db.sub_db(READY_SUB_DB_ID).unwrap().get_search_view().unwrap();
    let hits = view
        .match_attribute("default", "year", &FieldValue::Long(1999))
        .unwrap();
    assert_eq!(hits.len(), 100);
}

#[test]
fn identical_config_is_unchanged() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    db.put(song(1)).unwrap();
    assert_eq!(
        db.apply_config(snapshot(2, base_schema())).unwrap(),
        ReconfigOutcome::Unchanged
    );
    assert_eq!(db.last_serial(), 1);
}

#[test]
fn config_survives_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let db = open(&tmp);
        db.put(song(1)).unwrap();
        let v2 = base_schema().field("genre", FieldSpec::text());
        assert!(matches!(
            db.apply_config(snapshot(2, v2)).unwrap(),
            ReconfigOutcome::Applied { serial: 2, .. }
        ));
    }
    // The offered generation 1 loses against the persisted generation 2
    let db = open(&tmp);
    assert_eq!(db.active_config().generation, 2);
    assert!(db.active_config().schema.has_field("genre"));
}

#[test]
fn wipe_denied_leaves_serials_unchanged() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp).with_allow_prune(false);
    let v1 = Schema::new()
        .field("title", FieldSpec::text())
        .field("year", FieldSpec::attribute(DataType::Int64));
    let db = DocumentDb::open(cfg, snapshot(1, v1)).unwrap();
    for n in 1..=5 {
        db.put(song(n)).unwrap();
    }
    db.apply_config(snapshot(2, Schema::new().field("title", FieldSpec::text())))
        .unwrap();
    assert_eq!(db.history_schema().field_names(), vec!["year"]);

    let last = db.last_serial();
    let oldest = db.oldest_flushed_serial();
    let newest = db.newest_flushed_serial();
    assert_eq!(db.wipe_history().unwrap(), WipeOutcome::Denied);
    assert_eq!(db.last_serial(), last);
    assert_eq!(db.oldest_flushed_serial(), oldest);
    assert_eq!(db.newest_flushed_serial(), newest);
    assert_eq!(db.history_schema().field_names(), vec!["year"]);

    // Pruning is denied as well
    assert_eq!(db.flush().unwrap().prune, PruneOutcome::Denied);
    assert_eq!(db.prune_serial(), 0);
}

#[test]
fn wipe_drops_history_attributes() {
    let tmp = TempDir::new().unwrap();
    let v1 = Schema::new()
        .field("title", FieldSpec::text())
        .field("year", FieldSpec::attribute(DataType::Int64));
    let db = DocumentDb::open(config(&tmp), snapshot(1, v1)).unwrap();
    for n in 1..=5 {
        db.put(song(n)).unwrap();
    }
    db.apply_config(snapshot(2, Schema::new().field("title", FieldSpec::text())))
        .unwrap();

    match db.wipe_history().unwrap() {
        WipeOutcome::Applied { wiped } => assert_eq!(wiped, vec!["year".to_string()]),
        other => panic!("unexpected wipe outcome {:?}", other),
    }
    assert!(db.history_schema().is_empty());
    // The wipe itself is a logged operation
    assert_eq!(db.last_serial(), 7);
}

#[test]
fn prune_serial_never_decreases() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    for n in 1..=20 {
        db.put(song(n)).unwrap();
    }
    db.flush().unwrap();
    let first = db.prune_serial();
    assert_eq!(first, 20);

    assert_eq!(db.prune().unwrap(), PruneOutcome::Unchanged(20));
    assert_eq!(db.prune_serial(), first);

    db.put(song(21)).unwrap();
    db.flush().unwrap();
    assert!(db.prune_serial() >= first);
    let stats = db.tlog_stats().unwrap();
    assert_eq!(stats.last_serial, 21);
    assert_eq!(stats.pruned_serial, 21);
}

#[test]
fn rejected_config_blocks_feed_until_compatible_config() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp);
    db.put(song(1)).unwrap();

    let video = ConfigSnapshot::new(2, "video", base_schema());
    assert!(matches!(
        db.apply_config(video).unwrap(),
        ReconfigOutcome::Rejected { .. }
    ));
    assert!(db.is_feed_blocked());
    assert!(matches!(db.put(song(2)).unwrap(), FeedOutcome::Rejected { .. }));
    assert_eq!(db.last_serial(), 1);

    let v3 = base_schema().field("genre", FieldSpec::text());
    assert!(matches!(
        db.apply_config(snapshot(3, v3)).unwrap(),
        ReconfigOutcome::Applied { serial: 2, .. }
    ));
    assert!(!db.is_feed_blocked());
    assert_eq!(db.put(song(2)).unwrap(), FeedOutcome::Accepted(3));
}

#[test]
fn move_between_ready_and_notready_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let id = DocumentId::new("id:music:2");
    {
        let db = open(&tmp);
        for n in 1..=3 {
            db.put(song(n)).unwrap();
        }
        db.move_document(&id, SubDbType::NotReady).unwrap();
        assert_eq!(db.num_docs(), 3);
        assert_eq!(db.num_active_docs(), 2);
    }

    let db = open(&tmp);
    assert_eq!(db.replay_stats().records, 4);
    assert!(db.sub_db(NOTREADY_SUB_DB_ID).unwrap().has_document(&id));
    assert!(!db.sub_db(READY_SUB_DB_ID).unwrap().has_document(&id));
    assert_eq!(db.match_term("default", "title", "song").unwrap().len(), 2);

    db.move_document(&id, SubDbType::Ready).unwrap();
    assert_eq!(db.num_active_docs(), 3);
    let doc = db.get_document(&id).unwrap().unwrap();
    assert_eq!(doc.get("title").and_then(|v| v.as_text()), Some("song number 2"));
}

#[test]
fn background_worker_drains_reprocessing() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(&tmp).with_background_reprocessing(true);
    let db = DocumentDb::open(cfg, snapshot(1, base_schema())).unwrap();
    for n in 1..=10 {
        db.put(song(n)).unwrap();
    }
    let with_year = Schema::new()
        .field("title", FieldSpec::text())
        .field("year", FieldSpec::attribute(DataType::Int64));
    db.apply_config(snapshot(2, with_year)).unwrap();
    assert!(db.wait_for_reprocessing(Duration::from_secs(10)).unwrap());
    assert_eq!(db.pending_reprocessing(), 0);
}
