//! libSQL storage layer (embedded, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding research projects,
//! their append-only history, run leases and the model contribution ledger.
//! It implements both [`ProjectStore`] and [`ContributionLedger`].
//!
//! **Access rules:**
//! - Pipeline runs and project edits: read-write via [`Storage::open`]
//! - Inspection commands: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Row, params};
use tracing::{debug, info};

use researchflow_shared::{
    Contribution, ContributionLedger, HistoryKind, HistoryRecord, Project, ProjectId,
    ProjectStore, ResearchFlowError, Result, RetryState, Stage, StageUpdate, TaskType,
};

/// History entries loaded with a project view.
pub const HISTORY_LIMIT: usize = 20;

/// Lease lifetime used when none is configured.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(3600);

const PROJECT_COLUMNS: &str = "id, title, description, stage, consecutive_failures, stalled, \
                               applied_digest, created_at, updated_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    lease_ttl: Duration,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResearchFlowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            lease_ttl: DEFAULT_LEASE_TTL,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ResearchFlowError::NotFound(format!(
                "database {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            lease_ttl: DEFAULT_LEASE_TTL,
        })
    }

    /// Set how long a run lease stays valid without being released.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ResearchFlowError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ResearchFlowError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Project operations
    // -----------------------------------------------------------------------

    /// Insert a new project and its `created` history entry.
    pub async fn create_project(&self, project: &Project) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO projects (id, title, description, stage, consecutive_failures,
                                       stalled, applied_digest, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    project.id.to_string(),
                    project.title.as_str(),
                    project.description.as_str(),
                    project.stage.as_str(),
                    i64::from(project.retry.consecutive_failures),
                    i64::from(project.retry.stalled),
                    project.applied_digest.as_deref(),
                    project.created_at.to_rfc3339(),
                    project.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;

        let record = HistoryRecord::new(
            None,
            HistoryKind::Created,
            format!("created in stage {}", project.stage),
        );
        self.insert_history(&project.id, &record).await?;
        debug!(id = %project.id, stage = %project.stage, "project created");
        Ok(())
    }

    /// All projects, earliest stage first, then oldest update.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY updated_at, id");
        let mut rows = self.conn.query(&sql, params![]).await.map_err(db_err)?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            projects.push(row_to_project(&row)?);
        }
        projects.sort_by_key(|p| p.stage);
        Ok(projects)
    }

    /// History for a project, oldest first. `limit` keeps only the newest entries.
    pub async fn list_history(
        &self,
        id: &ProjectId,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryRecord>> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, kind, detail, from_stage, to_stage, created_at
                 FROM project_history WHERE project_id = ?1
                 ORDER BY id DESC LIMIT ?2",
                params![id.to_string(), limit],
            )
            .await
            .map_err(db_err)?;

        let mut history = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            history.push(row_to_history(&row)?);
        }
        history.reverse();
        Ok(history)
    }

    async fn insert_history(&self, id: &ProjectId, record: &HistoryRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO project_history
                   (project_id, run_id, kind, detail, from_stage, to_stage, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    record.run_id.as_deref(),
                    record.kind.as_str(),
                    record.detail.as_str(),
                    record.from_stage.map(|s| s.as_str()),
                    record.to_stage.map(|s| s.as_str()),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn stored_stage(&self, id: &ProjectId) -> Result<Option<Stage>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage FROM projects WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let label: String = row.get(0).map_err(db_err)?;
                parse_stage(&label).map(Some)
            }
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Contribution ledger
    // -----------------------------------------------------------------------

    /// Ledger entries, newest first, optionally for one model.
    pub async fn list_contributions(&self, model_id: Option<&str>) -> Result<Vec<Contribution>> {
        let mut rows = self
            .conn
            .query(
                "SELECT model_id, task_type, reference, recorded_at FROM contributions
                 WHERE ?1 IS NULL OR model_id = ?1
                 ORDER BY id DESC",
                params![model_id],
            )
            .await
            .map_err(db_err)?;

        let mut contributions = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let task_type: String = row.get(1).map_err(db_err)?;
            contributions.push(Contribution {
                model_id: row.get(0).map_err(db_err)?,
                task_type: task_type
                    .parse::<TaskType>()
                    .map_err(|e| ResearchFlowError::Storage(format!("invalid task type: {e}")))?,
                reference: row.get(2).map_err(db_err)?,
                recorded_at: parse_time(&row.get::<String>(3).map_err(db_err)?)?,
            });
        }
        Ok(contributions)
    }
}

// ---------------------------------------------------------------------------
// ProjectStore
// ---------------------------------------------------------------------------

impl ProjectStore for Storage {
    /// Projects without history; use [`ProjectStore::get_project`] for the full view.
    async fn list_eligible(&self) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects
             WHERE stage != ?1 AND (lease_run_id IS NULL OR lease_expires_at <= ?2)"
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![Stage::Complete.as_str(), Utc::now().timestamp()],
            )
            .await
            .map_err(db_err)?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            projects.push(row_to_project(&row)?);
        }
        Ok(projects)
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id.to_string()])
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let mut project = row_to_project(&row)?;
        project.history = self.list_history(id, Some(HISTORY_LIMIT)).await?;
        Ok(Some(project))
    }

    async fn get_stage(&self, id: &ProjectId) -> Result<Stage> {
        self.stored_stage(id)
            .await?
            .ok_or_else(|| ResearchFlowError::NotFound(format!("project {id}")))
    }

    async fn set_stage(&self, id: &ProjectId, update: &StageUpdate) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE projects
                 SET stage = ?1, consecutive_failures = ?2, stalled = ?3,
                     applied_digest = ?4, updated_at = ?5
                 WHERE id = ?6 AND stage = ?7",
                params![
                    update.stage.as_str(),
                    i64::from(update.retry.consecutive_failures),
                    i64::from(update.retry.stalled),
                    update.applied_digest.as_deref(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    update.expected.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            return match self.stored_stage(id).await? {
                None => Err(ResearchFlowError::NotFound(format!("project {id}"))),
                Some(found) => Err(ResearchFlowError::ConcurrentModification {
                    project_id: id.to_string(),
                    expected: update.expected,
                    found,
                }),
            };
        }
        debug!(%id, from = %update.expected, to = %update.stage, "stage written");
        Ok(())
    }

    async fn append_history(&self, id: &ProjectId, record: &HistoryRecord) -> Result<()> {
        self.check_writable()?;
        self.insert_history(id, record).await
    }

    async fn acquire_lease(&self, id: &ProjectId, run_id: &str) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.lease_ttl.as_secs()).unwrap_or(i64::MAX);
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET lease_run_id = ?1, lease_expires_at = ?2
                 WHERE id = ?3
                   AND (lease_run_id IS NULL OR lease_run_id = ?1 OR lease_expires_at <= ?4)",
                params![run_id, now.saturating_add(ttl), id.to_string(), now],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 && self.stored_stage(id).await?.is_none() {
            return Err(ResearchFlowError::NotFound(format!("project {id}")));
        }
        Ok(changed > 0)
    }

    async fn release_lease(&self, id: &ProjectId, run_id: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE projects SET lease_run_id = NULL, lease_expires_at = NULL
                 WHERE id = ?1 AND lease_run_id = ?2",
                params![id.to_string(), run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ContributionLedger
// ---------------------------------------------------------------------------

impl ContributionLedger for Storage {
    async fn record_contribution(
        &self,
        model_id: &str,
        task_type: TaskType,
        reference: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO contributions (model_id, task_type, reference, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(model_id, task_type, reference) DO NOTHING",
                params![model_id, task_type.as_str(), reference, timestamp.to_rfc3339()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> ResearchFlowError {
    ResearchFlowError::Storage(e.to_string())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ResearchFlowError::Storage(format!("invalid date: {e}")))
}

fn parse_stage(s: &str) -> Result<Stage> {
    s.parse()
        .map_err(|e| ResearchFlowError::Storage(format!("invalid stored stage: {e}")))
}

/// Convert a row selected with [`PROJECT_COLUMNS`] into a [`Project`].
fn row_to_project(row: &Row) -> Result<Project> {
    let id: String = row.get(0).map_err(db_err)?;
    let stage: String = row.get(3).map_err(db_err)?;
    let failures: i64 = row.get(4).map_err(db_err)?;
    let stalled: i64 = row.get(5).map_err(db_err)?;

    Ok(Project {
        id: id
            .parse()
            .map_err(|e| ResearchFlowError::Storage(format!("invalid project id: {e}")))?,
        title: row.get(1).map_err(db_err)?,
        description: row.get(2).map_err(db_err)?,
        stage: parse_stage(&stage)?,
        retry: RetryState {
            consecutive_failures: u32::try_from(failures).unwrap_or(u32::MAX),
            stalled: stalled != 0,
        },
        applied_digest: row.get::<String>(6).ok(),
        history: Vec::new(),
        created_at: parse_time(&row.get::<String>(7).map_err(db_err)?)?,
        updated_at: parse_time(&row.get::<String>(8).map_err(db_err)?)?,
    })
}

fn row_to_history(row: &Row) -> Result<HistoryRecord> {
    let kind: String = row.get(1).map_err(db_err)?;
    Ok(HistoryRecord {
        run_id: row.get::<String>(0).ok(),
        kind: kind.parse::<HistoryKind>()?,
        detail: row.get(2).map_err(db_err)?,
        from_stage: row
            .get::<String>(3)
            .ok()
            .map(|s| parse_stage(&s))
            .transpose()?,
        to_stage: row
            .get::<String>(4)
            .ok()
            .map(|s| parse_stage(&s))
            .transpose()?,
        created_at: parse_time(&row.get::<String>(5).map_err(db_err)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("rf_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn seeded(storage: &Storage, stage: Stage) -> Project {
        let project = Project::new("Sparse attention study", "Measure recall", stage);
        storage.create_project(&project).await.expect("create project");
        project
    }

    fn update(expected: Stage, stage: Stage) -> StageUpdate {
        StageUpdate {
            expected,
            stage,
            retry: RetryState::default(),
            applied_digest: Some("digest".into()),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("rf_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn project_roundtrip_with_history() {
        let storage = test_storage().await;
        let project = seeded(&storage, Stage::Review).await;

        let found = storage.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Sparse attention study");
        assert_eq!(found.stage, Stage::Review);
        assert_eq!(found.retry, RetryState::default());
        assert_eq!(found.history.len(), 1);
        assert_eq!(found.history[0].kind, HistoryKind::Created);

        assert_eq!(storage.get_stage(&project.id).await.unwrap(), Stage::Review);
        assert!(storage.get_project(&ProjectId::new()).await.unwrap().is_none());
        assert!(matches!(
            storage.get_stage(&ProjectId::new()).await,
            Err(ResearchFlowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn set_stage_is_compare_and_set() {
        let storage = test_storage().await;
        let project = seeded(&storage, Stage::Review).await;

        storage
            .set_stage(&project.id, &update(Stage::Review, Stage::Implementation))
            .await
            .expect("first write");
        let found = storage.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(found.stage, Stage::Implementation);
        assert_eq!(found.applied_digest.as_deref(), Some("digest"));

        // Stale expectation loses.
        let err = storage
            .set_stage(&project.id, &update(Stage::Review, Stage::Design))
            .await
            .unwrap_err();
        match err {
            ResearchFlowError::ConcurrentModification {
                expected, found, ..
            } => {
                assert_eq!(expected, Stage::Review);
                assert_eq!(found, Stage::Implementation);
            }
            other => panic!("expected ConcurrentModification, got {other:?}"),
        }
        assert!(err_is_retryable(&storage, &project.id).await);

        let missing = storage
            .set_stage(&ProjectId::new(), &update(Stage::Review, Stage::Design))
            .await;
        assert!(matches!(missing, Err(ResearchFlowError::NotFound(_))));
    }

    async fn err_is_retryable(storage: &Storage, id: &ProjectId) -> bool {
        storage
            .set_stage(id, &update(Stage::Backlog, Stage::Design))
            .await
            .unwrap_err()
            .is_retryable_write()
    }

    #[tokio::test]
    async fn retry_state_persists() {
        let storage = test_storage().await;
        let project = seeded(&storage, Stage::Design).await;
        let stalled = StageUpdate {
            expected: Stage::Design,
            stage: Stage::Design,
            retry: RetryState {
                consecutive_failures: 3,
                stalled: true,
            },
            applied_digest: None,
        };
        storage.set_stage(&project.id, &stalled).await.unwrap();

        let found = storage.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(found.retry.consecutive_failures, 3);
        assert!(found.retry.stalled);
        assert!(found.applied_digest.is_none());
    }

    #[tokio::test]
    async fn eligibility_excludes_complete_and_leased() {
        let storage = test_storage().await;
        let open = seeded(&storage, Stage::Backlog).await;
        let leased = seeded(&storage, Stage::Design).await;
        seeded(&storage, Stage::Complete).await;

        assert!(storage.acquire_lease(&leased.id, "run-a").await.unwrap());

        let eligible = storage.list_eligible().await.unwrap();
        let ids: Vec<_> = eligible.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![open.id]);
    }

    #[tokio::test]
    async fn leases_are_exclusive_until_released() {
        let storage = test_storage().await;
        let project = seeded(&storage, Stage::Review).await;

        assert!(storage.acquire_lease(&project.id, "run-a").await.unwrap());
        assert!(!storage.acquire_lease(&project.id, "run-b").await.unwrap());
        // Re-entrant for the holder.
        assert!(storage.acquire_lease(&project.id, "run-a").await.unwrap());

        // Releasing someone else's lease does nothing.
        storage.release_lease(&project.id, "run-b").await.unwrap();
        assert!(!storage.acquire_lease(&project.id, "run-b").await.unwrap());

        storage.release_lease(&project.id, "run-a").await.unwrap();
        assert!(storage.acquire_lease(&project.id, "run-b").await.unwrap());

        assert!(matches!(
            storage.acquire_lease(&ProjectId::new(), "run-a").await,
            Err(ResearchFlowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_leases_can_be_taken_over() {
        let storage = test_storage().await.with_lease_ttl(Duration::ZERO);
        let project = seeded(&storage, Stage::Review).await;

        assert!(storage.acquire_lease(&project.id, "crashed-run").await.unwrap());
        assert_eq!(storage.list_eligible().await.unwrap().len(), 1);
        assert!(storage.acquire_lease(&project.id, "next-run").await.unwrap());
    }

    #[tokio::test]
    async fn history_is_append_only_and_limited() {
        let storage = test_storage().await;
        let project = seeded(&storage, Stage::Review).await;

        for i in 0..3 {
            let record =
                HistoryRecord::new(Some("run-1"), HistoryKind::TaskRecorded, format!("task {i}"))
                    .with_transition(Stage::Review, Stage::Implementation);
            storage.append_history(&project.id, &record).await.unwrap();
        }

        let all = storage.list_history(&project.id, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].kind, HistoryKind::Created);
        assert_eq!(all[3].detail, "task 2");
        assert_eq!(all[3].to_stage, Some(Stage::Implementation));
        assert_eq!(all[3].run_id.as_deref(), Some("run-1"));

        let recent = storage.list_history(&project.id, Some(2)).await.unwrap();
        let details: Vec<_> = recent.iter().map(|r| r.detail.as_str()).collect();
        assert_eq!(details, vec!["task 1", "task 2"]);
    }

    #[tokio::test]
    async fn ledger_is_idempotent() {
        let storage = test_storage().await;
        let now = Utc::now();

        for _ in 0..2 {
            storage
                .record_contribution("local-7b-q4", TaskType::ReviewProposal, "p#abc", now)
                .await
                .unwrap();
        }
        storage
            .record_contribution("local-7b-q4", TaskType::RequestRevision, "p#abc", now)
            .await
            .unwrap();
        storage
            .record_contribution("other-model", TaskType::ReviewProposal, "p#abc", now)
            .await
            .unwrap();

        assert_eq!(storage.list_contributions(None).await.unwrap().len(), 3);
        let mine = storage.list_contributions(Some("local-7b-q4")).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].task_type, TaskType::RequestRevision);
    }

    #[tokio::test]
    async fn list_projects_orders_by_stage() {
        let storage = test_storage().await;
        seeded(&storage, Stage::Validation).await;
        seeded(&storage, Stage::Backlog).await;
        let stages: Vec<_> = storage
            .list_projects()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.stage)
            .collect();
        assert_eq!(stages, vec![Stage::Backlog, Stage::Validation]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("rf_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        let project = seeded(&rw, Stage::Backlog).await;
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_projects().await.unwrap().len(), 1);
        let result = ro
            .set_stage(&project.id, &update(Stage::Backlog, Stage::Design))
            .await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
