/// Inline SQL migrations for the diligence database schema.
///
/// Each entry is applied once, in order, and recorded in `_migrations`.
pub const MIGRATIONS: &[&str] = &[
    // Migration 1: job records
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    target_project_id TEXT,
    payload TEXT NOT NULL DEFAULT '{}',
    progress_current INTEGER NOT NULL DEFAULT 0,
    progress_total INTEGER NOT NULL DEFAULT 0,
    progress_message TEXT,
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(target_project_id);"#,
    // Migration 2: project aggregates, stored whole as JSON
    r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#,
];
