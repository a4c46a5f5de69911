// Cursor Store - last acknowledged upstream cursor per linked account
//
// Each write is a single UPDATE statement, so SQLite either applies it fully
// or not at all. Nothing else in the crate writes linked_accounts.cursor.

use anyhow::{bail, Context, Result};
use log::debug;
use rusqlite::{params, OptionalExtension};

use crate::db::Database;

#[derive(Clone)]
pub struct CursorStore {
    db: Database,
}

impl CursorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// None before the first successful sync (or after an invalidation)
    pub fn get_cursor(&self, account_id: &str) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let cursor: Option<Option<String>> = conn
                .query_row(
                    "SELECT cursor FROM linked_accounts WHERE id = ?1",
                    [account_id],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to read cursor")?;

            match cursor {
                Some(cursor) => Ok(cursor),
                None => bail!("Unknown account: {}", account_id),
            }
        })
    }

    pub fn set_cursor(&self, account_id: &str, cursor: &str) -> Result<()> {
        self.write(account_id, Some(cursor))
    }

    /// Force the next sync to start from the beginning
    pub fn reset_cursor(&self, account_id: &str) -> Result<()> {
        self.write(account_id, None)
    }

    fn write(&self, account_id: &str, cursor: Option<&str>) -> Result<()> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE linked_accounts SET cursor = ?1 WHERE id = ?2",
                    params![cursor, account_id],
                )
                .context("Failed to write cursor")?;

            if changed == 0 {
                bail!("Unknown account: {}", account_id);
            }

            debug!("Cursor for {} set to {:?}", account_id, cursor);
            Ok(())
        })
    }
}
