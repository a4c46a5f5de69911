use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::entities::{AccountStatus, LinkedAccount, Transaction, TransactionEdit};
use crate::vault::SealedToken;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Shared handle to the SQLite store
///
/// One connection behind a mutex; every repository call is short and never
/// held across an await point.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        setup_database(&conn)?;
        Ok(Database::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        setup_database(&conn)?;
        Ok(Database::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Database {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Database lock poisoned"))?;
        f(&mut conn)
    }
}

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery (in-memory databases report "memory")
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Linked Accounts (cursor column is owned by the cursor store,
    // access_token holds the sealed form only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS linked_accounts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            provider_account_id TEXT NOT NULL,
            access_token TEXT NOT NULL,
            cursor TEXT,
            last_synced_at TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            last_error TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (item_id, provider_account_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Transactions (soft-deleted rows stay for audit)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            account_id TEXT NOT NULL REFERENCES linked_accounts(id) ON DELETE CASCADE,
            transaction_id TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL,
            date TEXT NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            pending INTEGER NOT NULL DEFAULT 0,
            local_edit INTEGER NOT NULL DEFAULT 0,
            removed INTEGER NOT NULL DEFAULT 0,
            removed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (account_id, transaction_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Sync Conflicts (upstream changes held back by a local edit)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES linked_accounts(id) ON DELETE CASCADE,
            transaction_id TEXT NOT NULL,
            field TEXT NOT NULL,
            local_value TEXT NOT NULL,
            upstream_value TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            resolution TEXT NOT NULL DEFAULT 'pending',
            resolved_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_item ON linked_accounts(item_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(account_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_conflicts_account ON sync_conflicts(account_id, resolution)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// Row helpers
// ============================================================================

pub(crate) fn parse_datetime(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_datetime(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_datetime(idx, &s)).transpose()
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn category_to_json(category: &[String]) -> Result<String> {
    serde_json::to_string(category).context("Failed to serialize category")
}

fn parse_category(idx: usize, value: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// Audit events
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_datetime(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// Linked accounts
// ============================================================================

const ACCOUNT_COLUMNS: &str = "id, user_id, institution_id, item_id, provider_account_id,
     access_token, cursor, last_synced_at, status, last_error, created_at";

fn row_to_account(row: &Row) -> rusqlite::Result<LinkedAccount> {
    let status_str: String = row.get(8)?;
    let status = status_str.parse::<AccountStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let created_at: String = row.get(10)?;

    Ok(LinkedAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        institution_id: row.get(2)?,
        item_id: row.get(3)?,
        provider_account_id: row.get(4)?,
        access_token: SealedToken::from_stored(row.get(5)?),
        cursor: row.get(6)?,
        last_synced_at: parse_optional_datetime(7, row.get(7)?)?,
        status,
        last_error: row.get(9)?,
        created_at: parse_datetime(10, &created_at)?,
    })
}

/// Fails when the item already has a linked account for the same bank account
pub fn insert_account(conn: &Connection, account: &LinkedAccount) -> Result<()> {
    conn.execute(
        "INSERT INTO linked_accounts (
            id, user_id, institution_id, item_id, provider_account_id, access_token,
            cursor, last_synced_at, status, last_error, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            account.id,
            account.user_id,
            account.institution_id,
            account.item_id,
            account.provider_account_id,
            account.access_token.as_str(),
            account.cursor,
            account.last_synced_at.map(|dt| dt.to_rfc3339()),
            account.status.as_str(),
            account.last_error,
            account.created_at.to_rfc3339(),
        ],
    )
    .context("Failed to insert linked account")?;

    let event = Event::new(
        "account_linked",
        "account",
        &account.id,
        serde_json::json!({
            "user_id": account.user_id,
            "institution_id": account.institution_id,
            "item_id": account.item_id,
            "provider_account_id": account.provider_account_id,
        }),
        "api",
    );
    insert_event(conn, &event)?;

    Ok(())
}

pub fn get_account(conn: &Connection, id: &str) -> Result<Option<LinkedAccount>> {
    let sql = format!("SELECT {} FROM linked_accounts WHERE id = ?1", ACCOUNT_COLUMNS);
    let account = conn
        .query_row(&sql, [id], row_to_account)
        .optional()
        .context("Failed to load linked account")?;
    Ok(account)
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<LinkedAccount>> {
    let sql = format!(
        "SELECT {} FROM linked_accounts ORDER BY created_at",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map([], row_to_account)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// All accounts belonging to one upstream item (webhook routing)
pub fn find_accounts_by_item(conn: &Connection, item_id: &str) -> Result<Vec<LinkedAccount>> {
    let sql = format!(
        "SELECT {} FROM linked_accounts WHERE item_id = ?1 ORDER BY created_at",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map([item_id], row_to_account)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// Returns false when the account does not exist
pub fn update_account_status(
    conn: &Connection,
    id: &str,
    status: AccountStatus,
    last_error: Option<&str>,
) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE linked_accounts SET status = ?1, last_error = ?2 WHERE id = ?3",
            params![status.as_str(), last_error, id],
        )
        .context("Failed to update account status")?;

    if changed > 0 {
        let event = Event::new(
            "account_status_changed",
            "account",
            id,
            serde_json::json!({ "status": status.as_str(), "error": last_error }),
            "sync",
        );
        insert_event(conn, &event)?;
    }

    Ok(changed > 0)
}

/// Record a successful sync: status back to active, error cleared
pub fn mark_synced(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE linked_accounts
         SET last_synced_at = ?1, status = 'active', last_error = NULL
         WHERE id = ?2",
        params![at.to_rfc3339(), id],
    )
    .context("Failed to record sync time")?;
    Ok(())
}

/// Unlink: remove the account with its transactions and conflicts
pub fn delete_account(conn: &mut Connection, id: &str) -> Result<bool> {
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM sync_conflicts WHERE account_id = ?1", [id])?;
    tx.execute("DELETE FROM transactions WHERE account_id = ?1", [id])?;
    let deleted = tx.execute("DELETE FROM linked_accounts WHERE id = ?1", [id])?;

    if deleted > 0 {
        let event = Event::new(
            "account_unlinked",
            "account",
            id,
            serde_json::json!({}),
            "api",
        );
        insert_event(&tx, &event)?;
    }

    tx.commit().context("Failed to commit unlink")?;
    Ok(deleted > 0)
}

// ============================================================================
// Transactions
// ============================================================================

const TRANSACTION_COLUMNS: &str = "transaction_id, account_id, amount, currency, date, name,
     category, pending, local_edit, removed, removed_at, created_at, updated_at";

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let date: String = row.get(4)?;
    let category: String = row.get(6)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Transaction {
        transaction_id: row.get(0)?,
        account_id: row.get(1)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        date: parse_date(4, &date)?,
        name: row.get(5)?,
        category: parse_category(6, &category)?,
        pending: row.get(7)?,
        local_edit: row.get(8)?,
        removed: row.get(9)?,
        removed_at: parse_optional_datetime(10, row.get(10)?)?,
        created_at: parse_datetime(11, &created_at)?,
        updated_at: parse_datetime(12, &updated_at)?,
    })
}

pub fn get_transaction(
    conn: &Connection,
    account_id: &str,
    transaction_id: &str,
) -> Result<Option<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE account_id = ?1 AND transaction_id = ?2",
        TRANSACTION_COLUMNS
    );
    let tx = conn
        .query_row(&sql, params![account_id, transaction_id], row_to_transaction)
        .optional()
        .context("Failed to load transaction")?;
    Ok(tx)
}

pub fn get_transactions(
    conn: &Connection,
    account_id: &str,
    include_removed: bool,
) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions
         WHERE account_id = ?1 AND (?2 OR removed = 0)
         ORDER BY date DESC, transaction_id",
        TRANSACTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let transactions = stmt
        .query_map(params![account_id, include_removed], row_to_transaction)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transactions)
}

/// Number of stored rows for an account, soft-deleted included
pub fn count_transactions(conn: &Connection, account_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE account_id = ?1",
        [account_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Apply a user edit; sets the local-edit flag so upstream can't overwrite it.
/// Returns None when the transaction does not exist.
pub fn edit_transaction(
    conn: &Connection,
    account_id: &str,
    transaction_id: &str,
    edit: &TransactionEdit,
) -> Result<Option<Transaction>> {
    let Some(mut tx) = get_transaction(conn, account_id, transaction_id)? else {
        return Ok(None);
    };

    if edit.is_empty() {
        return Ok(Some(tx));
    }

    tx.apply_edit(edit);

    conn.execute(
        "UPDATE transactions
         SET category = ?1, name = ?2, local_edit = 1, updated_at = ?3
         WHERE account_id = ?4 AND transaction_id = ?5",
        params![
            category_to_json(&tx.category)?,
            tx.name,
            tx.updated_at.to_rfc3339(),
            account_id,
            transaction_id,
        ],
    )
    .context("Failed to save transaction edit")?;

    let event = Event::new(
        "transaction_edited",
        "transaction",
        transaction_id,
        serde_json::json!({
            "account_id": account_id,
            "category": edit.category,
            "name": edit.name,
        }),
        "user",
    );
    insert_event(conn, &event)?;

    Ok(Some(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{sealed, test_cipher};

    fn setup() -> (Connection, LinkedAccount) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let account = LinkedAccount::new(
            "user-1",
            "ins_109508",
            "item-1",
            "acc-checking",
            sealed("access-sandbox-1"),
        );
        insert_account(&conn, &account).unwrap();

        (conn, account)
    }

    fn insert_raw_transaction(conn: &Connection, account_id: &str, tx_id: &str) {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO transactions (
                account_id, transaction_id, amount, currency, date, name, category,
                pending, local_edit, removed, removed_at, created_at, updated_at
            ) VALUES (?1, ?2, 12.5, 'USD', '2025-01-15', 'Coffee', '[\"Food and Drink\"]',
                      0, 0, 0, NULL, ?3, ?3)",
            params![account_id, tx_id, now],
        )
        .unwrap();
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_account_round_trip() {
        let (conn, account) = setup();

        let loaded = get_account(&conn, &account.id).unwrap().unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.item_id, "item-1");
        assert_eq!(loaded.provider_account_id, "acc-checking");
        assert_eq!(
            test_cipher().open(&loaded.access_token).unwrap(),
            "access-sandbox-1"
        );
        assert_eq!(loaded.status, AccountStatus::Active);
        assert!(loaded.cursor.is_none());

        assert!(get_account(&conn, "missing").unwrap().is_none());
        assert_eq!(list_accounts(&conn).unwrap().len(), 1);
        assert_eq!(find_accounts_by_item(&conn, "item-1").unwrap().len(), 1);
        assert!(find_accounts_by_item(&conn, "item-2").unwrap().is_empty());
    }

    #[test]
    fn test_access_token_column_is_sealed() {
        let (conn, account) = setup();

        let raw: String = conn
            .query_row(
                "SELECT access_token FROM linked_accounts WHERE id = ?1",
                [&account.id],
                |row| row.get(0),
            )
            .unwrap();

        assert!(!raw.contains("access-sandbox-1"));
        assert_eq!(raw, account.access_token.as_str());
        assert_eq!(
            test_cipher()
                .open(&SealedToken::from_stored(raw))
                .unwrap(),
            "access-sandbox-1"
        );
    }

    #[test]
    fn test_item_accounts_are_unique_per_bank_account() {
        let (conn, _) = setup();

        let savings =
            LinkedAccount::new("user-1", "ins_109508", "item-1", "acc-savings", sealed("t"));
        insert_account(&conn, &savings).unwrap();
        assert_eq!(find_accounts_by_item(&conn, "item-1").unwrap().len(), 2);

        let duplicate =
            LinkedAccount::new("user-1", "ins_109508", "item-1", "acc-checking", sealed("t"));
        assert!(insert_account(&conn, &duplicate).is_err());
    }

    #[test]
    fn test_status_update_and_mark_synced() {
        let (conn, account) = setup();

        assert!(update_account_status(
            &conn,
            &account.id,
            AccountStatus::Error,
            Some("ITEM_LOGIN_REQUIRED")
        )
        .unwrap());
        let errored = get_account(&conn, &account.id).unwrap().unwrap();
        assert_eq!(errored.status, AccountStatus::Error);
        assert_eq!(errored.last_error.as_deref(), Some("ITEM_LOGIN_REQUIRED"));

        mark_synced(&conn, &account.id, Utc::now()).unwrap();
        let synced = get_account(&conn, &account.id).unwrap().unwrap();
        assert_eq!(synced.status, AccountStatus::Active);
        assert!(synced.last_error.is_none());
        assert!(synced.last_synced_at.is_some());

        assert!(!update_account_status(&conn, "missing", AccountStatus::Error, None).unwrap());
    }

    #[test]
    fn test_edit_transaction_sets_local_edit() {
        let (conn, account) = setup();
        insert_raw_transaction(&conn, &account.id, "tx-1");

        let edit = TransactionEdit {
            category: Some(vec!["Business".to_string(), "Client Meals".to_string()]),
            name: None,
        };
        let edited = edit_transaction(&conn, &account.id, "tx-1", &edit)
            .unwrap()
            .unwrap();
        assert!(edited.local_edit);

        let stored = get_transaction(&conn, &account.id, "tx-1").unwrap().unwrap();
        assert!(stored.local_edit);
        assert_eq!(stored.category, vec!["Business", "Client Meals"]);
        assert_eq!(stored.name, "Coffee");

        let events = get_events_for_entity(&conn, "transaction", "tx-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "transaction_edited");
        assert_eq!(events[0].actor, "user");

        assert!(edit_transaction(&conn, &account.id, "missing", &edit)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_get_transactions_filters_removed() {
        let (conn, account) = setup();
        insert_raw_transaction(&conn, &account.id, "tx-1");
        insert_raw_transaction(&conn, &account.id, "tx-2");
        conn.execute(
            "UPDATE transactions SET removed = 1 WHERE transaction_id = 'tx-2'",
            [],
        )
        .unwrap();

        assert_eq!(get_transactions(&conn, &account.id, false).unwrap().len(), 1);
        assert_eq!(get_transactions(&conn, &account.id, true).unwrap().len(), 2);
        assert_eq!(count_transactions(&conn, &account.id).unwrap(), 2);
    }

    #[test]
    fn test_delete_account_removes_transactions() {
        let (mut conn, account) = setup();
        insert_raw_transaction(&conn, &account.id, "tx-1");

        assert!(delete_account(&mut conn, &account.id).unwrap());
        assert!(get_account(&conn, &account.id).unwrap().is_none());
        assert_eq!(count_transactions(&conn, &account.id).unwrap(), 0);

        let events = get_events_for_entity(&conn, "account", &account.id).unwrap();
        assert_eq!(events[0].event_type, "account_unlinked");

        assert!(!delete_account(&mut conn, &account.id).unwrap());
    }

    #[test]
    fn test_database_handle_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finsync.db");

        let db = Database::open(&path).unwrap();
        let account = LinkedAccount::new("user-1", "ins_1", "item-1", "acc-1", sealed("token"));
        db.with_conn(|conn| insert_account(conn, &account)).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        let loaded = reopened
            .with_conn(|conn| get_account(conn, &account.id))
            .unwrap();
        assert!(loaded.is_some());
    }
}
