//! SQL migration definitions for the researchflow database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: projects, project_history, contributions",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Research projects and their pipeline position
CREATE TABLE IF NOT EXISTS projects (
    id                   TEXT PRIMARY KEY,
    title                TEXT NOT NULL,
    description          TEXT NOT NULL DEFAULT '',
    stage                TEXT NOT NULL,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    stalled              INTEGER NOT NULL DEFAULT 0,
    applied_digest       TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_stage ON projects(stage);

-- Append-only project history
CREATE TABLE IF NOT EXISTS project_history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    run_id     TEXT,
    kind       TEXT NOT NULL,
    detail     TEXT NOT NULL,
    from_stage TEXT,
    to_stage   TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_project ON project_history(project_id);

-- Model contribution ledger
CREATE TABLE IF NOT EXISTS contributions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id    TEXT NOT NULL,
    task_type   TEXT NOT NULL,
    reference   TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    UNIQUE(model_id, task_type, reference)
);

CREATE INDEX IF NOT EXISTS idx_contributions_model ON contributions(model_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run leases on projects",
            sql: r#"
ALTER TABLE projects ADD COLUMN lease_run_id TEXT;
ALTER TABLE projects ADD COLUMN lease_expires_at INTEGER;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
