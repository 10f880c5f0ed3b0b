use chrono::{DateTime, Utc};
use tracing::instrument;

use policy_core::{Policy, PolicyDraft, PolicyId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::storage::Storage;

const SELECT_COLUMNS: &str =
    "SELECT id, name, author, controls, created_at, updated_at FROM policies";

/// SQLite-backed [`Storage`].
#[derive(Clone)]
pub struct PolicyRepo {
    db: Database,
}

impl PolicyRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl Storage for PolicyRepo {
    #[instrument(skip(self, draft), fields(name = %draft.name))]
    fn create(&self, draft: &PolicyDraft) -> Result<Policy, StoreError> {
        let controls = serde_json::to_string(&draft.control_data)?;
        let now = Utc::now();
        let stamp = now.to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO policies (name, author, controls, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![draft.name, draft.author, controls, stamp, stamp],
            )?;

            Ok(Policy {
                id: conn.last_insert_rowid(),
                name: draft.name.clone(),
                author: draft.author.clone(),
                control_data: draft.control_data.clone(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(policy_id = id))]
    fn read(&self, id: PolicyId) -> Result<Policy, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_policy(row),
                None => Err(StoreError::NotFound(format!("policy {id}"))),
            }
        })
    }

    #[instrument(skip(self))]
    fn read_all(&self) -> Result<Vec<Policy>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
            let mut rows = stmt.query([])?;
            let mut policies = Vec::new();
            while let Some(row) = rows.next()? {
                policies.push(row_to_policy(row)?);
            }
            Ok(policies)
        })
    }

    #[instrument(skip(self, draft), fields(policy_id = id))]
    fn update(
        &self,
        id: PolicyId,
        draft: &PolicyDraft,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let controls = serde_json::to_string(&draft.control_data)?;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE policies SET name = ?1, author = ?2, controls = ?3, updated_at = ?4
                 WHERE id = ?5",
                rusqlite::params![draft.name, draft.author, controls, updated_at.to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("policy {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(policy_id = id))]
    fn delete(&self, id: PolicyId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM policies WHERE id = ?1", [id])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("policy {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_policy(row: &rusqlite::Row<'_>) -> Result<Policy, StoreError> {
    let controls: String = row_helpers::get(row, 3, "policies", "controls")?;
    let created_at: String = row_helpers::get(row, 4, "policies", "created_at")?;
    let updated_at: String = row_helpers::get(row, 5, "policies", "updated_at")?;

    Ok(Policy {
        id: row_helpers::get(row, 0, "policies", "id")?,
        name: row_helpers::get(row, 1, "policies", "name")?,
        author: row_helpers::get(row, 2, "policies", "author")?,
        control_data: row_helpers::parse_json(&controls, "policies", "controls")?,
        created_at: row_helpers::parse_timestamp(&created_at, "policies", "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated_at, "policies", "updated_at")?,
    })
}
