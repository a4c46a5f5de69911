// ⚖️ Reconciler - Apply upstream change batches to local storage
//
// One batch = one SQLite transaction. Either every added/modified/removed
// record lands, or none does.
//
//   added    -> insert by (account_id, transaction_id); live duplicate is a no-op
//   modified -> overwrite, unless the row carries a local edit: then only
//               provider-owned fields move and the rest becomes a conflict
//   removed  -> soft-delete (removed = 1), never purge

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{
    category_to_json, format_date, get_transaction, insert_event, parse_datetime, Database, Event,
};
use crate::entities::Transaction;
use crate::provider::UpstreamTransaction;

const ACTOR: &str = "sync";

// ============================================================================
// RECONCILE REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// New rows
    pub inserted: usize,
    /// Soft-deleted rows brought back by an upstream add
    pub restored: usize,
    /// Adds for rows that already exist (retry / overlap)
    pub duplicates: usize,
    /// Rows updated from a modification
    pub updated: usize,
    /// Conflicts recorded against locally edited rows
    pub conflicts: usize,
    pub soft_deleted: usize,
    /// Removals for rows that are unknown or already removed
    pub skipped_removals: usize,
}

impl ReconcileReport {
    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} restored, {} duplicates, {} updated, {} conflicts, {} removed, {} removals skipped",
            self.inserted,
            self.restored,
            self.duplicates,
            self.updated,
            self.conflicts,
            self.soft_deleted,
            self.skipped_removals
        )
    }
}

// ============================================================================
// CONFLICTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    AcceptUpstream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    Pending,
    KeptLocal,
    AcceptedUpstream,
}

impl ConflictState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictState::Pending => "pending",
            ConflictState::KeptLocal => "kept_local",
            ConflictState::AcceptedUpstream => "accepted_upstream",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ConflictState::Pending),
            "kept_local" => Some(ConflictState::KeptLocal),
            "accepted_upstream" => Some(ConflictState::AcceptedUpstream),
            _ => None,
        }
    }
}

impl From<Resolution> for ConflictState {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::KeepLocal => ConflictState::KeptLocal,
            Resolution::AcceptUpstream => ConflictState::AcceptedUpstream,
        }
    }
}

/// Upstream change held back because the user edited the field locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub account_id: String,
    pub transaction_id: String,
    pub field: String,
    pub local_value: serde_json::Value,
    pub upstream_value: serde_json::Value,
    pub detected_at: DateTime<Utc>,
    pub resolution: ConflictState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

const CONFLICT_COLUMNS: &str = "id, account_id, transaction_id, field, local_value, upstream_value,
     detected_at, resolution, resolved_at";

fn row_to_conflict(row: &Row) -> rusqlite::Result<SyncConflict> {
    let json_column = |idx: usize| -> rusqlite::Result<serde_json::Value> {
        let raw: String = row.get(idx)?;
        serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    let detected_at: String = row.get(6)?;
    let resolution: String = row.get(7)?;
    let resolved_at: Option<String> = row.get(8)?;

    Ok(SyncConflict {
        id: row.get(0)?,
        account_id: row.get(1)?,
        transaction_id: row.get(2)?,
        field: row.get(3)?,
        local_value: json_column(4)?,
        upstream_value: json_column(5)?,
        detected_at: parse_datetime(6, &detected_at)?,
        resolution: ConflictState::parse(&resolution).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(7, "resolution".to_string(), rusqlite::types::Type::Text)
        })?,
        resolved_at: resolved_at.map(|s| parse_datetime(8, &s)).transpose()?,
    })
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Apply one accumulated batch atomically. Any error rolls back everything.
    pub fn apply_changes(
        &self,
        account_id: &str,
        added: &[UpstreamTransaction],
        modified: &[UpstreamTransaction],
        removed: &[String],
    ) -> Result<ReconcileReport> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let mut report = ReconcileReport::default();

            for upstream in added {
                match get_transaction(&tx, account_id, &upstream.transaction_id)? {
                    None => {
                        insert_upstream(&tx, account_id, upstream, now)?;
                        report.inserted += 1;
                    }
                    Some(existing) if existing.removed => {
                        write_upstream(&tx, &existing, upstream, true, now, &mut report)?;
                        report.restored += 1;
                    }
                    Some(_) => report.duplicates += 1,
                }
            }

            for upstream in modified {
                match get_transaction(&tx, account_id, &upstream.transaction_id)? {
                    None => {
                        insert_upstream(&tx, account_id, upstream, now)?;
                        report.inserted += 1;
                    }
                    Some(existing) => {
                        write_upstream(&tx, &existing, upstream, false, now, &mut report)?;
                        report.updated += 1;
                    }
                }
            }

            for transaction_id in removed {
                if soft_delete(&tx, account_id, transaction_id, now)? {
                    report.soft_deleted += 1;
                } else {
                    report.skipped_removals += 1;
                }
            }

            tx.commit().context("Failed to commit change batch")?;
            Ok(report)
        })
    }

    pub fn list_conflicts(&self, account_id: &str, pending_only: bool) -> Result<Vec<SyncConflict>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM sync_conflicts
                 WHERE account_id = ?1 AND (NOT ?2 OR resolution = 'pending')
                 ORDER BY detected_at, id",
                CONFLICT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let conflicts = stmt
                .query_map(params![account_id, pending_only], row_to_conflict)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conflicts)
        })
    }

    /// Close a conflict. AcceptUpstream writes the upstream value into the
    /// transaction; KeepLocal leaves it untouched. Resolving twice is a no-op.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
    ) -> Result<Option<SyncConflict>> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;

            let Some(conflict) = load_conflict(&tx, conflict_id)? else {
                return Ok(None);
            };
            if conflict.resolution != ConflictState::Pending {
                return Ok(Some(conflict));
            }

            if resolution == Resolution::AcceptUpstream {
                accept_upstream_value(&tx, &conflict)?;
            }

            let now = Utc::now();
            let state = ConflictState::from(resolution);
            tx.execute(
                "UPDATE sync_conflicts SET resolution = ?1, resolved_at = ?2 WHERE id = ?3",
                params![state.as_str(), now.to_rfc3339(), conflict_id],
            )?;

            let event = Event::new(
                "conflict_resolved",
                "transaction",
                &conflict.transaction_id,
                serde_json::json!({
                    "conflict_id": conflict_id,
                    "field": conflict.field,
                    "resolution": state.as_str(),
                }),
                "user",
            );
            insert_event(&tx, &event)?;

            let resolved = load_conflict(&tx, conflict_id)?;
            tx.commit().context("Failed to commit conflict resolution")?;
            Ok(resolved)
        })
    }
}

fn load_conflict(conn: &Connection, conflict_id: &str) -> Result<Option<SyncConflict>> {
    let sql = format!("SELECT {} FROM sync_conflicts WHERE id = ?1", CONFLICT_COLUMNS);
    let conflict = conn
        .query_row(&sql, [conflict_id], row_to_conflict)
        .optional()
        .context("Failed to load conflict")?;
    Ok(conflict)
}

fn insert_upstream(
    conn: &Connection,
    account_id: &str,
    upstream: &UpstreamTransaction,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (
            account_id, transaction_id, amount, currency, date, name, category,
            pending, local_edit, removed, removed_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, NULL, ?9, ?9)",
        params![
            account_id,
            upstream.transaction_id,
            upstream.amount,
            upstream.currency,
            format_date(upstream.date),
            upstream.name,
            category_to_json(&upstream.category)?,
            upstream.pending,
            now.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to insert transaction {}", upstream.transaction_id))?;

    let event = Event::new(
        "transaction_added",
        "transaction",
        &upstream.transaction_id,
        serde_json::json!({
            "account_id": account_id,
            "amount": upstream.amount,
            "currency": upstream.currency,
        }),
        ACTOR,
    );
    insert_event(conn, &event)
}

/// Overwrite an existing row with upstream data, honoring the local-edit flag
fn write_upstream(
    conn: &Connection,
    existing: &Transaction,
    upstream: &UpstreamTransaction,
    restore: bool,
    now: DateTime<Utc>,
    report: &mut ReconcileReport,
) -> Result<()> {
    let (name, category) = if existing.local_edit {
        let conflicts = [
            (
                "category",
                serde_json::json!(existing.category),
                serde_json::json!(upstream.category),
            ),
            (
                "name",
                serde_json::json!(existing.name),
                serde_json::json!(upstream.name),
            ),
        ];
        for (field, local_value, upstream_value) in conflicts {
            if local_value != upstream_value
                && record_conflict(conn, existing, field, &local_value, &upstream_value, now)?
            {
                report.conflicts += 1;
            }
        }
        (&existing.name, &existing.category)
    } else {
        (&upstream.name, &upstream.category)
    };

    conn.execute(
        "UPDATE transactions
         SET amount = ?1, currency = ?2, date = ?3, pending = ?4,
             name = ?5, category = ?6, updated_at = ?7,
             removed = CASE WHEN ?8 THEN 0 ELSE removed END,
             removed_at = CASE WHEN ?8 THEN NULL ELSE removed_at END
         WHERE account_id = ?9 AND transaction_id = ?10",
        params![
            upstream.amount,
            upstream.currency,
            format_date(upstream.date),
            upstream.pending,
            name,
            category_to_json(category)?,
            now.to_rfc3339(),
            restore,
            existing.account_id,
            existing.transaction_id,
        ],
    )
    .with_context(|| format!("Failed to update transaction {}", existing.transaction_id))?;

    let event = Event::new(
        if restore { "transaction_restored" } else { "transaction_modified" },
        "transaction",
        &existing.transaction_id,
        serde_json::json!({
            "account_id": existing.account_id,
            "amount": upstream.amount,
            "pending": upstream.pending,
            "local_edit": existing.local_edit,
        }),
        ACTOR,
    );
    insert_event(conn, &event)
}

/// Returns false when the same pending conflict already exists (re-applied batch)
fn record_conflict(
    conn: &Connection,
    existing: &Transaction,
    field: &str,
    local_value: &serde_json::Value,
    upstream_value: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<bool> {
    let upstream_json = upstream_value.to_string();

    let already_recorded: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sync_conflicts
            WHERE account_id = ?1 AND transaction_id = ?2 AND field = ?3
              AND upstream_value = ?4 AND resolution = 'pending'
        )",
        params![existing.account_id, existing.transaction_id, field, upstream_json],
        |row| row.get(0),
    )?;
    if already_recorded {
        return Ok(false);
    }

    let conflict_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sync_conflicts (
            id, account_id, transaction_id, field, local_value, upstream_value,
            detected_at, resolution, resolved_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', NULL)",
        params![
            conflict_id,
            existing.account_id,
            existing.transaction_id,
            field,
            local_value.to_string(),
            upstream_json,
            now.to_rfc3339(),
        ],
    )
    .context("Failed to record conflict")?;

    let event = Event::new(
        "transaction_conflict",
        "transaction",
        &existing.transaction_id,
        serde_json::json!({
            "conflict_id": conflict_id,
            "field": field,
            "local": local_value,
            "upstream": upstream_value,
        }),
        ACTOR,
    );
    insert_event(conn, &event)?;

    Ok(true)
}

fn soft_delete(
    conn: &Connection,
    account_id: &str,
    transaction_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE transactions
         SET removed = 1, removed_at = ?1, updated_at = ?1
         WHERE account_id = ?2 AND transaction_id = ?3 AND removed = 0",
        params![now.to_rfc3339(), account_id, transaction_id],
    )?;

    if changed > 0 {
        let event = Event::new(
            "transaction_removed",
            "transaction",
            transaction_id,
            serde_json::json!({ "account_id": account_id }),
            ACTOR,
        );
        insert_event(conn, &event)?;
    }

    Ok(changed > 0)
}

fn accept_upstream_value(conn: &Connection, conflict: &SyncConflict) -> Result<()> {
    let value = match conflict.field.as_str() {
        "category" => conflict.upstream_value.to_string(),
        "name" => conflict
            .upstream_value
            .as_str()
            .map(|s| s.to_string())
            .context("Upstream name is not a string")?,
        other => bail!("Unsupported conflict field: {}", other),
    };

    // Column name comes from the match above, never from input
    let sql = format!(
        "UPDATE transactions SET {} = ?1, updated_at = ?2
         WHERE account_id = ?3 AND transaction_id = ?4",
        conflict.field
    );
    conn.execute(
        &sql,
        params![
            value,
            Utc::now().to_rfc3339(),
            conflict.account_id,
            conflict.transaction_id
        ],
    )?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
