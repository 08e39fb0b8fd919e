//! SQLite persistence for session reports.
//!
//! One session row, its per-skill scores, and its ordered events live in
//! three tables keyed by session id. Saving the same session id again
//! replaces the previous rows (upsert), so a rescored session never leaves
//! stale skill or event rows behind.

use std::fs;
use std::io::Write;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PmError, PmResult};
use crate::model::{
    ScoreResult, SessionEvent, SessionReport, SessionSummary, SkillEvaluation,
};

const SCHEMA_VERSION: &str = "1";

impl From<rusqlite::Error> for PmError {
    fn from(error: rusqlite::Error) -> Self {
        PmError::Storage(error.to_string())
    }
}

pub struct SessionStore {
    connection: Connection,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn open(db_path: &Path) -> PmResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let connection = Connection::open(db_path)?;
        let store = Self { connection };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests and `--db-path :memory:`.
    pub fn open_in_memory() -> PmResult<Self> {
        let connection = Connection::open_in_memory()?;
        let store = Self { connection };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> PmResult<()> {
        self.connection.execute_batch(
            "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    username TEXT NOT NULL,
    prompt_code TEXT,
    prompt_text TEXT,
    transcript TEXT NOT NULL,
    transcript_sha256 TEXT NOT NULL,
    duration_minutes REAL NOT NULL,
    total_lemmas INTEGER NOT NULL,
    unique_lemmas INTEGER NOT NULL,
    median_frequency REAL NOT NULL,
    wpm REAL NOT NULL,
    fluency_score INTEGER NOT NULL,
    vocabulary_score INTEGER NOT NULL,
    warnings_json TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS skill_scores (
    session_id TEXT NOT NULL,
    skill TEXT NOT NULL,
    score INTEGER,
    feedback TEXT NOT NULL,
    PRIMARY KEY (session_id, skill)
);
CREATE TABLE IF NOT EXISTS events (
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    ts_rfc3339 TEXT NOT NULL,
    stage TEXT NOT NULL,
    code TEXT NOT NULL,
    message TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    PRIMARY KEY (session_id, seq)
);
CREATE TABLE IF NOT EXISTS _meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
",
        )?;

        self.connection.execute(
            "INSERT OR REPLACE INTO _meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Insert or replace the full report for `report.session_id`.
    pub fn upsert_report(&mut self, report: &SessionReport) -> PmResult<()> {
        tracing::debug!(session_id = %report.session_id, "persisting session");
        let warnings_json = serde_json::to_string(&report.warnings)?;

        let tx = self.connection.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO sessions (
                id, started_at, finished_at, username, prompt_code, prompt_text,
                transcript, transcript_sha256, duration_minutes,
                total_lemmas, unique_lemmas, median_frequency, wpm,
                fluency_score, vocabulary_score, warnings_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                report.session_id,
                report.started_at_rfc3339,
                report.finished_at_rfc3339,
                report.username,
                report.prompt_code,
                report.prompt_text,
                report.transcript,
                report.transcript_sha256,
                report.duration_minutes,
                report.metrics.total_lemmas as i64,
                report.metrics.unique_lemmas as i64,
                report.metrics.median_frequency,
                report.metrics.wpm,
                i64::from(report.metrics.fluency_score),
                i64::from(report.metrics.vocabulary_score),
                warnings_json,
            ],
        )?;

        // Replace, never append: a rescored session drops its old rows.
        tx.execute(
            "DELETE FROM skill_scores WHERE session_id = ?1",
            params![report.session_id],
        )?;
        for skill in &report.skills {
            tx.execute(
                "INSERT INTO skill_scores (session_id, skill, score, feedback)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    report.session_id,
                    skill.skill,
                    skill.score.map(i64::from),
                    skill.feedback,
                ],
            )?;
        }

        tx.execute(
            "DELETE FROM events WHERE session_id = ?1",
            params![report.session_id],
        )?;
        for event in &report.events {
            tx.execute(
                "INSERT INTO events (session_id, seq, ts_rfc3339, stage, code, message, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    report.session_id,
                    event.seq as i64,
                    event.ts_rfc3339,
                    event.stage,
                    event.code,
                    event.message,
                    serde_json::to_string(&event.payload)?,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn list_recent(&self, limit: usize) -> PmResult<Vec<SessionSummary>> {
        let mut statement = self.connection.prepare(
            "SELECT id, started_at, username, wpm, fluency_score, vocabulary_score, transcript
             FROM sessions ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = statement.query_map(params![limit as i64], |row| {
            let transcript: String = row.get(6)?;
            Ok(SessionSummary {
                session_id: row.get(0)?,
                started_at_rfc3339: row.get(1)?,
                username: row.get(2)?,
                wpm: row.get(3)?,
                fluency_score: row.get::<_, i64>(4)? as u8,
                vocabulary_score: row.get::<_, i64>(5)? as u8,
                transcript_preview: transcript.chars().take(140).collect(),
            })
        })?;
        rows.map(|row| row.map_err(PmError::from)).collect()
    }

    pub fn load_session(&self, session_id: &str) -> PmResult<Option<SessionReport>> {
        let row = self
            .connection
            .query_row(
                "SELECT id, started_at, finished_at, username, prompt_code, prompt_text,
                        transcript, transcript_sha256, duration_minutes,
                        total_lemmas, unique_lemmas, median_frequency, wpm,
                        fluency_score, vocabulary_score, warnings_json
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionReport {
                        session_id: row.get(0)?,
                        started_at_rfc3339: row.get(1)?,
                        finished_at_rfc3339: row.get(2)?,
                        username: row.get(3)?,
                        prompt_code: row.get(4)?,
                        prompt_text: row.get(5)?,
                        transcript: row.get(6)?,
                        transcript_sha256: row.get(7)?,
                        duration_minutes: row.get(8)?,
                        metrics: ScoreResult {
                            total_lemmas: row.get::<_, i64>(9)? as usize,
                            unique_lemmas: row.get::<_, i64>(10)? as usize,
                            median_frequency: row.get(11)?,
                            wpm: row.get(12)?,
                            fluency_score: row.get::<_, i64>(13)? as u8,
                            vocabulary_score: row.get::<_, i64>(14)? as u8,
                        },
                        skills: Vec::new(),
                        events: Vec::new(),
                        warnings: serde_json::from_str(&row.get::<_, String>(15)?)
                            .unwrap_or_default(),
                    })
                },
            )
            .optional()?;

        let Some(mut report) = row else {
            return Ok(None);
        };

        let mut statement = self.connection.prepare(
            "SELECT skill, score, feedback FROM skill_scores
             WHERE session_id = ?1 ORDER BY skill ASC",
        )?;
        let skills = statement.query_map(params![session_id], |row| {
            Ok(SkillEvaluation {
                skill: row.get(0)?,
                score: row.get::<_, Option<i64>>(1)?.map(|s| s as u8),
                feedback: row.get(2)?,
            })
        })?;
        report.skills = skills
            .map(|row| row.map_err(PmError::from))
            .collect::<PmResult<Vec<_>>>()?;

        let mut statement = self.connection.prepare(
            "SELECT seq, ts_rfc3339, stage, code, message, payload_json FROM events
             WHERE session_id = ?1 ORDER BY seq ASC",
        )?;
        let events = statement.query_map(params![session_id], |row| {
            let payload_json: String = row.get(5)?;
            Ok(SessionEvent {
                seq: row.get::<_, i64>(0)? as u64,
                ts_rfc3339: row.get(1)?,
                stage: row.get(2)?,
                code: row.get(3)?,
                message: row.get(4)?,
                payload: serde_json::from_str(&payload_json)
                    .unwrap_or(serde_json::Value::Null),
            })
        })?;
        report.events = events
            .map(|row| row.map_err(PmError::from))
            .collect::<PmResult<Vec<_>>>()?;

        Ok(Some(report))
    }

    pub fn load_latest(&self) -> PmResult<Option<SessionReport>> {
        let session_id: Option<String> = self
            .connection
            .query_row(
                "SELECT id FROM sessions ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match session_id {
            Some(id) => self.load_session(&id),
            None => Ok(None),
        }
    }

    /// Write all session rows as CSV, newest first. Returns the row count.
    pub fn export_csv(&self, writer: &mut dyn Write) -> PmResult<usize> {
        writeln!(
            writer,
            "session_id,started_at,username,prompt_code,duration_minutes,wpm,\
             fluency_score,vocabulary_score,total_lemmas,unique_lemmas,\
             median_frequency,transcript"
        )?;

        let mut statement = self.connection.prepare(
            "SELECT id, started_at, username, prompt_code, duration_minutes, wpm,
                    fluency_score, vocabulary_score, total_lemmas, unique_lemmas,
                    median_frequency, transcript
             FROM sessions ORDER BY started_at DESC",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, f64>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;

        let mut count = 0usize;
        for row in rows {
            let (
                id,
                started_at,
                username,
                prompt_code,
                duration_minutes,
                wpm,
                fluency,
                vocabulary,
                total,
                unique,
                median,
                transcript,
            ) = row?;
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                csv_field(&id),
                csv_field(&started_at),
                csv_field(&username),
                csv_field(prompt_code.as_deref().unwrap_or("")),
                duration_minutes,
                wpm,
                fluency,
                vocabulary,
                total,
                unique,
                median,
                csv_field(&transcript),
            )?;
            count += 1;
        }
        Ok(count)
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_owned()
    }
}
