//! Table layout of a library and its upgrades.
//!
//! The library format never had a dedicated schema version. The unused
//! `LibInfo.minorVersion` field holds it instead, while `majorVersion` counts
//! data revisions.
//!
//! * 4: adds `driftTimeMsec`/`collisionalCrossSectionSqA`, drops the ion mobility type
//! * 3: adds the product ion mobility offset for Waters MSe IMS
//! * 2: adds ion mobility value and type
//! * earlier: none of the optional ion mobility columns

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result, SqlContext};
use crate::library::sql::{column_exists, execute, sql_stmt, table_exists, MAIN_SCHEMA};
use crate::library::transaction::TransactionGuard;
use crate::spectra::score::ScoreType;
use crate::spectra::source_files::SourceFileRegistry;

/// `ionMobilityType` of version 2 and 3 libraries.
pub const ION_MOBILITY_DRIFT_TIME: i64 = 1;
pub const ION_MOBILITY_CCS: i64 = 2;

pub const MAJOR_VERSION_CURRENT: i32 = 0;
pub const MINOR_VERSION_CURRENT: i32 = 4;

/// `numSpecs` of a library whose spectra have not been counted yet.
pub const NUM_SPECS_NOT_COUNTED: i64 = -1;

/// Columns of `RefSpectra` that older libraries may lack, in the order they are added.
pub const ADDED_SPECTRUM_COLUMNS: [(&str, &str); 8] = [
    ("retentionTime", "REAL"),
    ("fileID", "INTEGER"),
    ("SpecIDinFile", "VARCHAR(256)"),
    ("score", "REAL"),
    ("scoreType", "TINYINT"),
    ("driftTimeMsec", "REAL"),
    ("collisionalCrossSectionSqA", "REAL"),
    ("driftTimeHighEnergyOffsetMsec", "REAL"),
];

/// Indexes dropped during bulk inserts and rebuilt on commit.
pub const INDEXES: [(&str, &str); 3] = [
    ("idxPeptide", "RefSpectra (peptideSeq, precursorCharge)"),
    ("idxPeptideMod", "RefSpectra (peptideModSeq, precursorCharge)"),
    ("idxRefIdPeaks", "RefSpectraPeaks (RefSpectraID)"),
];

/// Tables that can be added to an existing library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalTable {
    SpectrumSourceFiles,
    ScoreTypes,
}

/// Revision and schema version of a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    /// `LibInfo.majorVersion`
    pub revision: i32,
    /// `LibInfo.minorVersion`
    pub schema_version: i32,
}

/// Creation time in the format of C's `ctime`, without the trailing newline.
pub fn create_time() -> String {
    chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Create all tables of a new library and fill `LibInfo` and `ScoreTypes`.
pub fn create_tables(conn: &Connection, lsid: &str) -> Result<()> {
    sql_stmt(
        conn,
        "CREATE TABLE LibInfo(libLSID TEXT, \
         createTime TEXT, \
         numSpecs INTEGER, \
         majorVersion INTEGER, \
         minorVersion INTEGER)",
    )?;

    execute(
        conn,
        "INSERT INTO LibInfo VALUES(?1, ?2, ?3, ?4, ?5)",
        params![lsid, create_time(), NUM_SPECS_NOT_COUNTED, MAJOR_VERSION_CURRENT, MINOR_VERSION_CURRENT],
        "Failed filling LibInfo.",
    )?;

    sql_stmt(
        conn,
        "CREATE TABLE RefSpectra (id INTEGER primary key autoincrement not null, \
         peptideSeq VARCHAR(150), \
         precursorMZ REAL, \
         precursorCharge INTEGER, \
         peptideModSeq VARCHAR(200), \
         prevAA CHAR(1), \
         nextAA CHAR(1), \
         copies INTEGER, \
         numPeaks INTEGER, \
         driftTimeMsec REAL, \
         collisionalCrossSectionSqA REAL, \
         driftTimeHighEnergyOffsetMsec REAL, \
         retentionTime REAL, \
         fileID INTEGER, \
         SpecIDinFile VARCHAR(256), \
         score REAL, \
         scoreType TINYINT)",
    )?;

    sql_stmt(
        conn,
        "CREATE TABLE Modifications (id INTEGER primary key autoincrement not null, \
         RefSpectraID INTEGER, \
         position INTEGER, \
         mass REAL)",
    )?;

    sql_stmt(
        conn,
        "CREATE TABLE RefSpectraPeaks(RefSpectraID INTEGER, \
         peakMZ BLOB, \
         peakIntensity BLOB)",
    )?;

    create_table(conn, OptionalTable::SpectrumSourceFiles)?;
    create_table(conn, OptionalTable::ScoreTypes)
}

/// Create one of the tables that may be missing from older libraries.
pub fn create_table(conn: &Connection, table: OptionalTable) -> Result<()> {
    match table {
        OptionalTable::SpectrumSourceFiles => sql_stmt(
            conn,
            "CREATE TABLE SpectrumSourceFiles (id INTEGER PRIMARY KEY autoincrement not null, \
             fileName VARCHAR(512), \
             cutoffScore REAL)",
        ),
        OptionalTable::ScoreTypes => {
            // key is the enum value of the score type, no autoincrement
            sql_stmt(conn, "CREATE TABLE ScoreTypes (id INTEGER PRIMARY KEY, scoreType VARCHAR(128))")?;
            for score_type in ScoreType::ALL.iter() {
                execute(
                    conn,
                    "INSERT INTO ScoreTypes(id, scoreType) VALUES(?1, ?2)",
                    params![score_type.to_i32(), score_type.to_str()],
                    "Failed filling ScoreTypes.",
                )?;
            }
            Ok(())
        }
    }
}

/// Add missing tables and columns to an existing library.
///
/// Running this on an up to date library changes nothing. The whole upgrade
/// is one transaction, a failure leaves the library as it was.
pub fn update_tables(conn: &Connection, registry: &mut SourceFileRegistry) -> Result<()> {
    if !table_exists(conn, MAIN_SCHEMA, "RefSpectra")? || !table_exists(conn, MAIN_SCHEMA, "LibInfo")? {
        return Err(LibraryError::InvalidLibrary(
            "missing RefSpectra or LibInfo table".to_string(),
        ));
    }

    let guard = TransactionGuard::new(conn)?;

    if !table_exists(conn, MAIN_SCHEMA, "SpectrumSourceFiles")? {
        create_table(conn, OptionalTable::SpectrumSourceFiles)?;
        registry.unknown_file_id(conn)?;
    } else if !column_exists(conn, MAIN_SCHEMA, "SpectrumSourceFiles", "cutoffScore")? {
        sql_stmt(conn, "ALTER TABLE SpectrumSourceFiles ADD cutoffScore REAL")?;
    }

    if !table_exists(conn, MAIN_SCHEMA, "ScoreTypes")? {
        create_table(conn, OptionalTable::ScoreTypes)?;
    }

    for (column, column_type) in ADDED_SPECTRUM_COLUMNS.iter() {
        if !column_exists(conn, MAIN_SCHEMA, "RefSpectra", column)? {
            log::debug!("Adding column {} to RefSpectra", column);
            sql_stmt(conn, &format!("ALTER TABLE RefSpectra ADD {} {}", column, column_type))?;
        }
    }
    move_ion_mobility_values(conn)?;

    // spectra from before source files were tracked belong to the unknown file
    let query = "SELECT count(*) FROM RefSpectra WHERE fileID IS NULL";
    let without_file: i64 = conn
        .query_row(query, [], |row| row.get(0))
        .sql_context(query, "Failed counting spectra without source file.")?;
    if without_file > 0 {
        let unknown_file_id = registry.unknown_file_id(conn)?;
        execute(
            conn,
            "UPDATE RefSpectra SET fileID = ?1 WHERE fileID IS NULL",
            [unknown_file_id],
            "Failed assigning unknown source file.",
        )?;
    }

    execute(
        conn,
        "UPDATE RefSpectra SET scoreType = ?1 WHERE scoreType IS NULL",
        [ScoreType::Unknown.to_i32()],
        "Failed assigning unknown score type.",
    )?;

    execute(
        conn,
        "UPDATE LibInfo SET minorVersion = ?1 WHERE minorVersion IS NULL OR minorVersion < ?1",
        [MINOR_VERSION_CURRENT],
        "Failed updating schema version.",
    )?;

    guard.commit()
}

/// Fill the drift time columns of rows written with the ion mobility value and type columns.
///
/// Rows that already have a drift time or cross section are left alone.
fn move_ion_mobility_values(conn: &Connection) -> Result<()> {
    if !column_exists(conn, MAIN_SCHEMA, "RefSpectra", "ionMobilityValue")?
        || !column_exists(conn, MAIN_SCHEMA, "RefSpectra", "ionMobilityType")?
    {
        return Ok(());
    }

    let moved = execute(
        conn,
        "UPDATE RefSpectra SET \
         driftTimeMsec = CASE WHEN ionMobilityType = ?1 THEN ionMobilityValue ELSE 0 END, \
         collisionalCrossSectionSqA = CASE WHEN ionMobilityType = ?2 THEN ionMobilityValue ELSE 0 END \
         WHERE driftTimeMsec IS NULL AND collisionalCrossSectionSqA IS NULL",
        [ION_MOBILITY_DRIFT_TIME, ION_MOBILITY_CCS],
        "Failed moving ion mobility values.",
    )?;

    if column_exists(conn, MAIN_SCHEMA, "RefSpectra", "ionMobilityHighEnergyDriftTimeOffsetMsec")? {
        execute(
            conn,
            "UPDATE RefSpectra SET driftTimeHighEnergyOffsetMsec = ionMobilityHighEnergyDriftTimeOffsetMsec \
             WHERE driftTimeHighEnergyOffsetMsec IS NULL",
            [],
            "Failed moving ion mobility offsets.",
        )?;
    }

    if moved > 0 {
        log::debug!("Moved ion mobility values of {} spectra to drift time columns", moved);
    }
    Ok(())
}

/// Drop the lookup indexes so bulk inserts do not have to maintain them.
pub fn drop_indexes(conn: &Connection) -> Result<()> {
    for (name, _) in INDEXES.iter() {
        sql_stmt(conn, &format!("DROP INDEX IF EXISTS {}", name))?;
    }
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    for (name, target) in INDEXES.iter() {
        sql_stmt(conn, &format!("CREATE INDEX IF NOT EXISTS {} ON {}", name, target))?;
    }
    Ok(())
}

/// Read revision and schema version from `LibInfo` of the given schema.
pub fn read_revision_info(conn: &Connection, schema: &str) -> Result<RevisionInfo> {
    let query = format!("SELECT majorVersion, minorVersion FROM {}.LibInfo", schema);
    conn.query_row(&query, [], |row| {
        let revision: Option<i32> = row.get(0)?;
        let schema_version: Option<i32> = row.get(1)?;
        Ok(RevisionInfo {
            revision: revision.unwrap_or(0),
            schema_version: schema_version.unwrap_or(0),
        })
    })
    .sql_context(&query, "Failed reading library revision.")
}

/// Count the rows of `RefSpectra`, ignoring `LibInfo.numSpecs`.
pub fn count_spectra(conn: &Connection, schema: &str) -> Result<i64> {
    let query = format!("SELECT count(*) FROM {}.RefSpectra", schema);
    conn.query_row(&query, [], |row| row.get(0))
        .sql_context(&query, "Failed getting spectrum count.")
}

/// Number of spectra as recorded in `LibInfo`, counted if it was never recorded.
pub fn spectrum_count(conn: &Connection, schema: &str) -> Result<i64> {
    let query = format!("SELECT numSpecs FROM {}.LibInfo", schema);
    let recorded: rusqlite::Result<Option<i64>> = conn.query_row(&query, [], |row| row.get(0));
    match recorded {
        Ok(Some(count)) if count != NUM_SPECS_NOT_COUNTED => Ok(count),
        Ok(_) => count_spectra(conn, schema),
        Err(e) => {
            log::debug!("Failed to get spectrum count ({}), so count them.", e);
            count_spectra(conn, schema)
        }
    }
}

/// Record the spectrum count and advance the revision.
pub fn update_lib_info(conn: &Connection) -> Result<RevisionInfo> {
    let current = read_revision_info(conn, MAIN_SCHEMA)?;
    let next = RevisionInfo {
        revision: current.revision + 1,
        ..current
    };
    let spectrum_count = count_spectra(conn, MAIN_SCHEMA)?;
    execute(
        conn,
        "UPDATE LibInfo SET numSpecs = ?1, majorVersion = ?2",
        params![spectrum_count, next.revision],
        "Failed updating LibInfo.",
    )?;
    Ok(next)
}

pub fn read_lsid(conn: &Connection) -> Result<String> {
    let query = "SELECT libLSID FROM LibInfo";
    conn.query_row(query, [], |row| row.get(0))
        .sql_context(query, "Failed reading library LSID.")
}
