//! Storage integration tests against on-disk databases.

use parlametric::model::{
    ScoreResult, SessionEvent, SessionReport, SkillEvaluation,
};
use parlametric::storage::SessionStore;

fn report(session_id: &str, started_at: &str, username: &str) -> SessionReport {
    SessionReport {
        session_id: session_id.to_owned(),
        started_at_rfc3339: started_at.to_owned(),
        finished_at_rfc3339: started_at.to_owned(),
        username: username.to_owned(),
        prompt_code: None,
        prompt_text: None,
        transcript: "je voudrais un café s'il vous plaît".to_owned(),
        transcript_sha256: "feedface".to_owned(),
        duration_minutes: 0.15,
        metrics: ScoreResult {
            total_lemmas: 8,
            unique_lemmas: 8,
            median_frequency: 0.0008,
            fluency_score: 17,
            vocabulary_score: 90,
            wpm: 53.3,
        },
        skills: vec![SkillEvaluation {
            skill: "politeness".to_owned(),
            score: Some(95),
            feedback: "very polite".to_owned(),
        }],
        events: vec![SessionEvent {
            seq: 1,
            ts_rfc3339: started_at.to_owned(),
            stage: "session".to_owned(),
            code: "session.start".to_owned(),
            message: "session started".to_owned(),
            payload: serde_json::json!({}),
        }],
        warnings: Vec::new(),
    }
}

#[test]
fn reports_survive_process_style_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sessions.sqlite3");

    {
        let mut store = SessionStore::open(&db_path).unwrap();
        store
            .upsert_report(&report("s-1", "2026-04-01T09:00:00Z", "ana"))
            .unwrap();
        store
            .upsert_report(&report("s-2", "2026-04-01T11:00:00Z", "bob"))
            .unwrap();
    }

    let store = SessionStore::open(&db_path).unwrap();
    let summaries = store.list_recent(10).unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].session_id, "s-2");
    assert_eq!(summaries[0].username, "bob");

    let loaded = store.load_session("s-1").unwrap().unwrap();
    assert_eq!(loaded.skills[0].skill, "politeness");
    assert_eq!(loaded.events[0].code, "session.start");
}

#[test]
fn csv_export_emits_all_rows_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sessions.sqlite3");
    let mut store = SessionStore::open(&db_path).unwrap();
    store
        .upsert_report(&report("s-old", "2026-04-01T08:00:00Z", "ana"))
        .unwrap();
    store
        .upsert_report(&report("s-new", "2026-04-01T10:00:00Z", "bob"))
        .unwrap();

    let mut buffer = Vec::new();
    let count = store.export_csv(&mut buffer).unwrap();
    assert_eq!(count, 2);

    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3, "header plus two rows");
    assert!(lines[0].starts_with("session_id,"));
    assert!(lines[1].starts_with("s-new,"));
    assert!(lines[2].starts_with("s-old,"));
}

#[test]
fn empty_database_exports_header_only() {
    let mut buffer = Vec::new();
    let store = SessionStore::open_in_memory().unwrap();
    let count = store.export_csv(&mut buffer).unwrap();
    assert_eq!(count, 0);

    let text = String::from_utf8(buffer).unwrap();
    assert_eq!(text.lines().count(), 1);
}
