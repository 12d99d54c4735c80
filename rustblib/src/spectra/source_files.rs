use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlContext};
use crate::library::sql::{column_exists, execute, table_exists, MAIN_SCHEMA};
use crate::spectra::spectrum::{integer, real, text};

/// File name of the entry spectra without known provenance point to.
pub const UNKNOWN_FILE_NAME: &str = "UNKNOWN";

/// Cutoff stored for the unknown file and for files seen with conflicting cutoffs.
pub const AMBIGUOUS_CUTOFF: f64 = -1.0;

/// A row of the `SpectrumSourceFiles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: i64,
    pub file_name: String,
    pub cutoff_score: f64,
}

/// Maps source file names to their ids in the open library.
///
/// Lookups are cached for the lifetime of the registry, which is one library
/// session. Only statements issued through the registry keep the cache valid,
/// so every source file insert of a session has to go through it.
#[derive(Debug, Default)]
pub struct SourceFileRegistry {
    cache: HashMap<String, (i64, f64)>,
}

impl SourceFileRegistry {
    pub fn new() -> Self {
        SourceFileRegistry::default()
    }

    /// Get the id of a source file, adding the file if the library does not know it yet.
    ///
    /// When the file is already known with a different cutoff score, its stored
    /// cutoff becomes [`AMBIGUOUS_CUTOFF`] instead of either value.
    pub fn resolve(&mut self, conn: &Connection, file_name: &str, cutoff_score: f64) -> Result<i64> {
        let (id, known_cutoff) = match self.cache.get(file_name) {
            Some(&entry) => entry,
            None => match find_file(conn, file_name)? {
                Some(entry) => entry,
                None => {
                    let id = add_file(conn, file_name, cutoff_score)?;
                    self.cache.insert(file_name.to_string(), (id, cutoff_score));
                    return Ok(id);
                }
            },
        };

        let mut cutoff = known_cutoff;
        if known_cutoff != cutoff_score && known_cutoff != AMBIGUOUS_CUTOFF {
            log::warn!(
                "Source file '{}' was filtered with cutoff scores {} and {}, marking its cutoff as ambiguous",
                file_name, known_cutoff, cutoff_score
            );
            execute(
                conn,
                "UPDATE SpectrumSourceFiles SET cutoffScore = ?1 WHERE id = ?2",
                rusqlite::params![AMBIGUOUS_CUTOFF, id],
                "Failed updating cutoff score.",
            )?;
            cutoff = AMBIGUOUS_CUTOFF;
        }

        self.cache.insert(file_name.to_string(), (id, cutoff));
        Ok(id)
    }

    /// Id of the `UNKNOWN` source file, added on first use.
    pub fn unknown_file_id(&mut self, conn: &Connection) -> Result<i64> {
        self.resolve(conn, UNKNOWN_FILE_NAME, AMBIGUOUS_CUTOFF)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

fn find_file(conn: &Connection, file_name: &str) -> Result<Option<(i64, f64)>> {
    let query = "SELECT id, cutoffScore FROM SpectrumSourceFiles WHERE fileName = ?1 ORDER BY id";
    conn.query_row(query, [file_name], |row| {
        let cutoff: Option<f64> = row.get(1)?;
        Ok((row.get(0)?, cutoff.unwrap_or(AMBIGUOUS_CUTOFF)))
    })
    .optional()
    .sql_context(query, "Failed looking up spectrum source file.")
}

fn add_file(conn: &Connection, file_name: &str, cutoff_score: f64) -> Result<i64> {
    execute(
        conn,
        "INSERT INTO SpectrumSourceFiles(fileName, cutoffScore) VALUES(?1, ?2)",
        rusqlite::params![file_name, cutoff_score],
        "Failed adding spectrum source file.",
    )?;
    Ok(conn.last_insert_rowid())
}

/// Read all source files of a library schema.
///
/// A schema without a `SpectrumSourceFiles` table has no source files; a table
/// without the `cutoffScore` column reports every cutoff as ambiguous.
pub fn read_source_files(conn: &Connection, schema: &str) -> Result<Vec<SourceFile>> {
    if !table_exists(conn, schema, "SpectrumSourceFiles")? {
        return Ok(Vec::new());
    }

    let cutoff_select = if column_exists(conn, schema, "SpectrumSourceFiles", "cutoffScore")? {
        "cutoffScore"
    } else {
        "-1"
    };
    let query = format!(
        "SELECT id, fileName, {} FROM {}.SpectrumSourceFiles ORDER BY id",
        cutoff_select, schema
    );

    let mut stmt = conn
        .prepare(&query)
        .sql_context(&query, "Failed selecting file names.")?;
    let files: rusqlite::Result<Vec<SourceFile>> = stmt
        .query_map([], |row| {
            Ok(SourceFile {
                id: row.get(0)?,
                file_name: text(row, 1)?,
                cutoff_score: match row.get_ref(2)? {
                    rusqlite::types::ValueRef::Null => AMBIGUOUS_CUTOFF,
                    _ => real(row, 2)?,
                },
            })
        })
        .sql_context(&query, "Failed selecting file names.")?
        .collect();
    files.sql_context(&query, "Failed selecting file names.")
}

/// Read a single source file of a library schema by id.
pub fn read_source_file(conn: &Connection, schema: &str, id: i64) -> Result<Option<SourceFile>> {
    Ok(read_source_files(conn, schema)?
        .into_iter()
        .find(|file| file.id == id))
}

/// Count of spectra per source file id, used for reporting.
///
/// Libraries written before source files were tracked give an empty map.
pub fn count_spectra_per_file(conn: &Connection) -> Result<HashMap<i64, i64>> {
    if !column_exists(conn, MAIN_SCHEMA, "RefSpectra", "fileID")? {
        return Ok(HashMap::new());
    }
    let query = "SELECT fileID, count(*) FROM RefSpectra GROUP BY fileID";
    let mut stmt = conn.prepare(query).sql_context(query, "Failed counting spectra per file.")?;
    let rows: rusqlite::Result<HashMap<i64, i64>> = stmt
        .query_map([], |row| Ok((integer(row, 0)?, row.get(1)?)))
        .sql_context(query, "Failed counting spectra per file.")?
        .collect();
    rows.sql_context(query, "Failed counting spectra per file.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE SpectrumSourceFiles (id INTEGER PRIMARY KEY autoincrement not null, \
             fileName VARCHAR(512), cutoffScore REAL)",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_resolve_adds_and_caches() {
        let conn = memory_db();
        let mut registry = SourceFileRegistry::new();
        let a = registry.resolve(&conn, "a.raw", 0.95).unwrap();
        let b = registry.resolve(&conn, "b.raw", 0.95).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.resolve(&conn, "a.raw", 0.95).unwrap(), a);

        let files = read_source_files(&conn, MAIN_SCHEMA).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].cutoff_score, 0.95);
    }

    #[test]
    fn test_conflicting_cutoff_is_ambiguous() {
        let conn = memory_db();
        let mut registry = SourceFileRegistry::new();
        let id = registry.resolve(&conn, "a.raw", 0.95).unwrap();
        assert_eq!(registry.resolve(&conn, "a.raw", 0.99).unwrap(), id);
        assert_eq!(registry.resolve(&conn, "a.raw", 0.95).unwrap(), id);

        let file = read_source_file(&conn, MAIN_SCHEMA, id).unwrap().unwrap();
        assert_eq!(file.cutoff_score, AMBIGUOUS_CUTOFF);
    }

    #[test]
    fn test_existing_row_with_other_cutoff() {
        let conn = memory_db();
        conn.execute(
            "INSERT INTO SpectrumSourceFiles(fileName, cutoffScore) VALUES('a.raw', 0.9)",
            [],
        )
        .unwrap();

        // a fresh registry only knows the file from the store
        let mut registry = SourceFileRegistry::new();
        let id = registry.resolve(&conn, "a.raw", 0.5).unwrap();
        assert_eq!(id, 1);
        let files = read_source_files(&conn, MAIN_SCHEMA).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].cutoff_score, AMBIGUOUS_CUTOFF);
    }

    #[test]
    fn test_file_names_are_bound_not_spliced() {
        let conn = memory_db();
        let mut registry = SourceFileRegistry::new();
        let name = "it's a file'); DROP TABLE SpectrumSourceFiles; --";
        let id = registry.resolve(&conn, name, 0.0).unwrap();
        let file = read_source_file(&conn, MAIN_SCHEMA, id).unwrap().unwrap();
        assert_eq!(file.file_name, name);
    }

    #[test]
    fn test_unknown_file() {
        let conn = memory_db();
        let mut registry = SourceFileRegistry::new();
        let unknown = registry.unknown_file_id(&conn).unwrap();
        assert_eq!(registry.unknown_file_id(&conn).unwrap(), unknown);
        let file = read_source_file(&conn, MAIN_SCHEMA, unknown).unwrap().unwrap();
        assert_eq!(file.file_name, UNKNOWN_FILE_NAME);
        assert_eq!(file.cutoff_score, AMBIGUOUS_CUTOFF);
    }
}
