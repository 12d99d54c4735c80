//! Explicit transaction control.
//!
//! SQLite runs every statement in its own transaction unless one was opened
//! with `BEGIN`. Bulk inserts are only fast inside an explicit transaction, so
//! writers group their statements between [`begin`] and [`end`]. Whether a
//! transaction is open is read from the connection's autocommit flag, which
//! `BEGIN` turns off and `COMMIT`/`ROLLBACK` turn back on.

use rusqlite::Connection;

use crate::error::Result;
use crate::library::sql::sql_stmt;

/// Start a new transaction, committing any transaction that is still open.
///
/// Explicit transactions cannot be nested, so calling `begin` twice commits
/// the work of the first call and opens a fresh transaction.
pub fn begin(conn: &Connection) -> Result<()> {
    if !conn.is_autocommit() {
        sql_stmt(conn, "COMMIT")?;
    }
    sql_stmt(conn, "BEGIN")
}

/// Commit the open transaction. Does nothing if none is open.
pub fn end(conn: &Connection) -> Result<()> {
    if conn.is_autocommit() {
        log::debug!("No open transaction to end.");
        return Ok(());
    }
    sql_stmt(conn, "COMMIT")
}

/// Roll back the open transaction. Does nothing if none is open.
pub fn rollback(conn: &Connection) -> Result<()> {
    if conn.is_autocommit() {
        log::debug!("No open transaction to roll back.");
        return Ok(());
    }
    sql_stmt(conn, "ROLLBACK")
}

/// A transaction that rolls back unless it is committed.
pub struct TransactionGuard<'conn> {
    conn: &'conn Connection,
    finished: bool,
}

impl<'conn> TransactionGuard<'conn> {
    pub fn new(conn: &'conn Connection) -> Result<Self> {
        begin(conn)?;
        Ok(TransactionGuard { conn, finished: false })
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        end(self.conn)
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = rollback(self.conn) {
            log::error!("Failed to roll back transaction: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Numbers (value INTEGER)").unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT count(*) FROM Numbers", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_begin_is_idempotent() {
        let conn = memory_db();
        begin(&conn).unwrap();
        conn.execute("INSERT INTO Numbers VALUES(1)", []).unwrap();
        begin(&conn).unwrap();
        assert!(!conn.is_autocommit());
        // the first insert was committed by the second begin
        rollback(&conn).unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_end_without_transaction() {
        let conn = memory_db();
        end(&conn).unwrap();
        rollback(&conn).unwrap();
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_rollback_discards_changes() {
        let conn = memory_db();
        begin(&conn).unwrap();
        conn.execute("INSERT INTO Numbers VALUES(1)", []).unwrap();
        conn.execute("INSERT INTO Numbers VALUES(2)", []).unwrap();
        rollback(&conn).unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_guard_rolls_back_on_drop() {
        let conn = memory_db();
        {
            let _guard = TransactionGuard::new(&conn).unwrap();
            conn.execute("INSERT INTO Numbers VALUES(1)", []).unwrap();
        }
        assert_eq!(count(&conn), 0);

        let guard = TransactionGuard::new(&conn).unwrap();
        conn.execute("INSERT INTO Numbers VALUES(1)", []).unwrap();
        guard.commit().unwrap();
        assert_eq!(count(&conn), 1);
        assert!(conn.is_autocommit());
    }
}
