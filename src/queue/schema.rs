//! SQLite schema for the job queue database.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, SqlType, Table, VersionedSchema};

/// Every job ever submitted. Claimability is `state = 'queued' AND available_at <= now`.
const JOBS_TABLE_V0: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("target", &SqlType::Text, non_null = true),
        sqlite_column!("config", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Integer, non_null = true),
        // Submission order, tie-breaker within a priority band.
        sqlite_column!("seq", &SqlType::Integer, non_null = true),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("claimed_by", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("available_at", &SqlType::Integer, non_null = true),
        sqlite_column!("results", &SqlType::Text),
        sqlite_column!("security_meta", &SqlType::Text),
        sqlite_column!("ai_analysis", &SqlType::Text),
    ],
    indices: &[
        ("idx_jobs_claim", "state, priority, created_at, seq"),
        ("idx_jobs_claimed_by", "claimed_by"),
    ],
};

const JOB_FK: ForeignKey = ForeignKey {
    foreign_table: "jobs",
    foreign_column: "id",
    cascade_delete: true,
};

const DEAD_LETTERS_TABLE_V0: Table = Table {
    name: "dead_letters",
    columns: &[
        sqlite_column!(
            "job_id",
            &SqlType::Text,
            is_primary_key = true,
            foreign_key = Some(&JOB_FK)
        ),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("attempts", &SqlType::Integer, non_null = true),
        sqlite_column!("error", &SqlType::Text, non_null = true),
        sqlite_column!("dead_lettered_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_dead_letters_time", "dead_lettered_at")],
};

/// Append-only result sink: one row per job id, written once.
const JOB_RESULTS_TABLE_V0: Table = Table {
    name: "job_results",
    columns: &[
        sqlite_column!(
            "job_id",
            &SqlType::Text,
            is_primary_key = true,
            foreign_key = Some(&JOB_FK)
        ),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("published_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

pub const JOB_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[JOBS_TABLE_V0, DEAD_LETTERS_TABLE_V0, JOB_RESULTS_TABLE_V0],
    migration: None,
}];
