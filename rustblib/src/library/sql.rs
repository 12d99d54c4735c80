use rusqlite::{Connection, OptionalExtension, Params};

use crate::error::{Result, SqlContext};

/// Name under which SQLite addresses the library that was opened.
pub const MAIN_SCHEMA: &str = "main";

/// Execute one or more statements that return no rows.
pub fn sql_stmt(conn: &Connection, statement: &str) -> Result<()> {
    conn.execute_batch(statement)
        .sql_context(statement, "SQL failure.")
}

/// Execute a single parameterized statement, returning the number of changed rows.
pub fn execute<P: Params>(conn: &Connection, statement: &str, params: P, message: &str) -> Result<usize> {
    conn.execute(statement, params).sql_context(statement, message)
}

/// Check if the given schema contains a table of the given name.
///
/// Schema and table names cannot be bound as parameters in the `FROM` clause, so
/// the schema is expected to be `main` or an alias chosen by this crate.
pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let query = format!(
        "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        schema
    );
    let found: Option<String> = conn
        .query_row(&query, [table], |row| row.get(0))
        .optional()
        .sql_context(&query, "Failed checking for the existence of a table")?;
    Ok(found.is_some())
}

/// List the column names of a table, in declaration order.
///
/// A missing table yields an empty list.
pub fn table_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    let query = format!("PRAGMA {}.table_info({})", schema, table);
    let mut stmt = conn
        .prepare(&query)
        .sql_context(&query, "Failed checking for existence of a column")?;
    let columns: rusqlite::Result<Vec<String>> = stmt
        .query_map([], |row| row.get(1))
        .sql_context(&query, "Failed checking for existence of a column")?
        .collect();
    columns.sql_context(&query, "Failed reading table info")
}

/// Check if the given table contains the given column.
pub fn column_exists(conn: &Connection, schema: &str, table: &str, column: &str) -> Result<bool> {
    Ok(table_columns(conn, schema, table)?
        .iter()
        .any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Things (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn
    }

    #[test]
    fn test_table_exists() {
        let conn = memory_db();
        assert!(table_exists(&conn, MAIN_SCHEMA, "Things").unwrap());
        assert!(!table_exists(&conn, MAIN_SCHEMA, "Other").unwrap());
    }

    #[test]
    fn test_column_exists() {
        let conn = memory_db();
        assert!(column_exists(&conn, MAIN_SCHEMA, "Things", "name").unwrap());
        assert!(!column_exists(&conn, MAIN_SCHEMA, "Things", "score").unwrap());
        assert!(table_columns(&conn, MAIN_SCHEMA, "Missing").unwrap().is_empty());
    }

    #[test]
    fn test_failed_statement_names_sql() {
        let conn = memory_db();
        let err = sql_stmt(&conn, "INSERT INTO Nowhere VALUES(1)").unwrap_err();
        assert!(err.to_string().contains("INSERT INTO Nowhere VALUES(1)"));
    }
}
