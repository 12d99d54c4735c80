//! Column layouts of `RefSpectra` across library versions.
//!
//! Spectra copied from another library are read with the layout that library
//! was written with and mapped onto the current columns. Values a layout does
//! not have are copied as zero.

use std::fmt::Display;

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::library::schema::{ION_MOBILITY_CCS, ION_MOBILITY_DRIFT_TIME};
use crate::library::sql::table_columns;
use crate::spectra::score::ScoreType;
use crate::spectra::spectrum::{integer, real, text, RefSpectrum};

/// Leading columns every layout shares, followed by the file id.
const COMMON_COLUMNS: &str =
    "peptideSeq, precursorMZ, precursorCharge, peptideModSeq, prevAA, nextAA, copies, numPeaks";
const FIRST_LAYOUT_COLUMN: usize = 9;

/// Historic `RefSpectra` layouts, identified by probing for their columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableVersion {
    /// Peptide, precursor and peak count only
    Bare,
    /// Adds retention time, source file, spectrum id and score
    Legacy,
    /// Adds an ion mobility value with a type tag
    IonMobility,
    /// Adds the high energy drift time offset to `IonMobility`
    IonMobilityOffset,
    /// Current layout with drift time and collisional cross section columns
    DriftTime,
}

/// A spectrum read from another library, before its file id is remapped.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpectrum {
    pub spectrum: RefSpectrum,
    pub num_peaks: i32,
    pub file_id: Option<i64>,
}

impl TableVersion {
    /// Find the layout of `RefSpectra` in the given schema.
    pub fn detect(conn: &Connection, schema: &str) -> Result<Self> {
        let columns = table_columns(conn, schema, "RefSpectra")?;
        let has = |name: &str| columns.iter().any(|column| column.eq_ignore_ascii_case(name));

        let version = if has("driftTimeMsec") {
            TableVersion::DriftTime
        } else if has("ionMobilityHighEnergyDriftTimeOffsetMsec") {
            TableVersion::IonMobilityOffset
        } else if has("ionMobilityValue") {
            TableVersion::IonMobility
        } else if has("retentionTime") {
            TableVersion::Legacy
        } else {
            TableVersion::Bare
        };
        log::debug!("Library '{}' uses table version {}", schema, version);
        Ok(version)
    }

    pub fn to_i32(&self) -> i32 {
        match self {
            TableVersion::Bare => 0,
            TableVersion::Legacy => 1,
            TableVersion::IonMobility => 2,
            TableVersion::IonMobilityOffset => 3,
            TableVersion::DriftTime => 4,
        }
    }

    fn layout_columns(&self) -> &'static str {
        match self {
            TableVersion::Bare => "",
            TableVersion::Legacy => ", retentionTime, SpecIDinFile, score, scoreType",
            TableVersion::IonMobility => {
                ", ionMobilityValue, ionMobilityType, retentionTime, SpecIDinFile, score, scoreType"
            }
            TableVersion::IonMobilityOffset => {
                ", ionMobilityValue, ionMobilityType, ionMobilityHighEnergyDriftTimeOffsetMsec, \
                 retentionTime, SpecIDinFile, score, scoreType"
            }
            TableVersion::DriftTime => {
                ", driftTimeMsec, collisionalCrossSectionSqA, driftTimeHighEnergyOffsetMsec, \
                 retentionTime, SpecIDinFile, score, scoreType"
            }
        }
    }

    /// Query for one spectrum by id, to be read with [`TableVersion::map_row`].
    pub fn select_statement(&self, schema: &str, has_file_id: bool) -> String {
        format!(
            "SELECT {}, {}{} FROM {}.RefSpectra WHERE id = ?1",
            COMMON_COLUMNS,
            if has_file_id { "fileID" } else { "NULL" },
            self.layout_columns(),
            schema
        )
    }

    pub fn map_row(&self, row: &Row) -> rusqlite::Result<SourceSpectrum> {
        match self {
            TableVersion::Bare => map_bare(row),
            TableVersion::Legacy => map_legacy(row),
            TableVersion::IonMobility => map_ion_mobility(row, false),
            TableVersion::IonMobilityOffset => map_ion_mobility(row, true),
            TableVersion::DriftTime => map_drift_time(row),
        }
    }
}

impl Display for TableVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_i32())
    }
}

fn map_common(row: &Row) -> rusqlite::Result<SourceSpectrum> {
    let file_id: Option<i64> = row.get(8)?;
    Ok(SourceSpectrum {
        spectrum: RefSpectrum {
            peptide_seq: text(row, 0)?,
            precursor_mz: real(row, 1)?,
            precursor_charge: integer(row, 2)? as i32,
            peptide_mod_seq: text(row, 3)?,
            prev_aa: text(row, 4)?,
            next_aa: text(row, 5)?,
            copies: integer(row, 6)? as i32,
            ..Default::default()
        },
        num_peaks: integer(row, 7)? as i32,
        file_id,
    })
}

/// Copy retention time, spectrum id and score starting at `first`.
fn map_identification(row: &Row, first: usize, spectrum: &mut RefSpectrum) -> rusqlite::Result<()> {
    spectrum.retention_time = real(row, first)?;
    spectrum.spec_id_in_file = text(row, first + 1)?;
    spectrum.score = real(row, first + 2)?;
    spectrum.score_type = ScoreType::from(integer(row, first + 3)? as i32);
    Ok(())
}

fn map_bare(row: &Row) -> rusqlite::Result<SourceSpectrum> {
    let mut source = map_common(row)?;
    source.spectrum.spec_id_in_file = "0".to_string();
    Ok(source)
}

fn map_legacy(row: &Row) -> rusqlite::Result<SourceSpectrum> {
    let mut source = map_common(row)?;
    map_identification(row, FIRST_LAYOUT_COLUMN, &mut source.spectrum)?;
    Ok(source)
}

fn map_ion_mobility(row: &Row, with_offset: bool) -> rusqlite::Result<SourceSpectrum> {
    let mut source = map_common(row)?;
    let value = real(row, FIRST_LAYOUT_COLUMN)?;
    match integer(row, FIRST_LAYOUT_COLUMN + 1)? {
        ION_MOBILITY_DRIFT_TIME => source.spectrum.drift_time_msec = value,
        ION_MOBILITY_CCS => source.spectrum.collisional_cross_section_sq_a = value,
        _ => {}
    }

    let mut next = FIRST_LAYOUT_COLUMN + 2;
    if with_offset {
        source.spectrum.drift_time_high_energy_offset_msec = real(row, next)?;
        next += 1;
    }
    map_identification(row, next, &mut source.spectrum)?;
    Ok(source)
}

fn map_drift_time(row: &Row) -> rusqlite::Result<SourceSpectrum> {
    let mut source = map_common(row)?;
    source.spectrum.drift_time_msec = real(row, FIRST_LAYOUT_COLUMN)?;
    source.spectrum.collisional_cross_section_sq_a = real(row, FIRST_LAYOUT_COLUMN + 1)?;
    source.spectrum.drift_time_high_energy_offset_msec = real(row, FIRST_LAYOUT_COLUMN + 2)?;
    map_identification(row, FIRST_LAYOUT_COLUMN + 3, &mut source.spectrum)?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::sql::MAIN_SCHEMA;

    const BASE: &str = "id INTEGER primary key autoincrement not null, peptideSeq VARCHAR(150), \
         precursorMZ REAL, precursorCharge INTEGER, peptideModSeq VARCHAR(200), prevAA CHAR(1), \
         nextAA CHAR(1), copies INTEGER, numPeaks INTEGER";

    fn library_with(extra_columns: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!("CREATE TABLE RefSpectra ({}{})", BASE, extra_columns))
            .unwrap();
        conn
    }

    fn read(conn: &Connection, version: TableVersion, has_file_id: bool) -> SourceSpectrum {
        conn.query_row(&version.select_statement(MAIN_SCHEMA, has_file_id), [1], |row| {
            version.map_row(row)
        })
        .unwrap()
    }

    #[test]
    fn test_detect() {
        let cases = [
            ("", TableVersion::Bare),
            (", retentionTime REAL, fileID INTEGER", TableVersion::Legacy),
            (", ionMobilityValue REAL, ionMobilityType INTEGER", TableVersion::IonMobility),
            (
                ", ionMobilityValue REAL, ionMobilityType INTEGER, ionMobilityHighEnergyDriftTimeOffsetMsec REAL",
                TableVersion::IonMobilityOffset,
            ),
            (", driftTimeMsec REAL, collisionalCrossSectionSqA REAL", TableVersion::DriftTime),
        ];
        for (columns, expected) in cases.iter() {
            let conn = library_with(columns);
            assert_eq!(TableVersion::detect(&conn, MAIN_SCHEMA).unwrap(), *expected);
        }
    }

    #[test]
    fn test_bare_defaults_to_zero() {
        let conn = library_with("");
        conn.execute_batch(
            "INSERT INTO RefSpectra(peptideSeq, precursorMZ, precursorCharge, peptideModSeq, \
             prevAA, nextAA, copies, numPeaks) VALUES('PEPTIDE', 400.5, 2, 'PEPTIDE', 'K', 'A', 3, 10)",
        )
        .unwrap();
        let source = read(&conn, TableVersion::Bare, false);
        assert_eq!(source.file_id, None);
        assert_eq!(source.num_peaks, 10);
        assert_eq!(source.spectrum.copies, 3);
        assert_eq!(source.spectrum.retention_time, 0.0);
        assert_eq!(source.spectrum.score, 0.0);
        assert_eq!(source.spectrum.spec_id_in_file, "0");
    }

    #[test]
    fn test_ion_mobility_types() {
        let conn = library_with(
            ", ionMobilityValue REAL, ionMobilityType INTEGER, ionMobilityHighEnergyDriftTimeOffsetMsec REAL, \
             retentionTime REAL, fileID INTEGER, SpecIDinFile VARCHAR(256), score REAL, scoreType TINYINT",
        );
        conn.execute_batch(
            "INSERT INTO RefSpectra(peptideSeq, precursorMZ, precursorCharge, peptideModSeq, prevAA, \
             nextAA, copies, numPeaks, ionMobilityValue, ionMobilityType, \
             ionMobilityHighEnergyDriftTimeOffsetMsec, retentionTime, fileID, SpecIDinFile, score, scoreType) \
             VALUES('PEPTIDE', 400.5, 2, 'PEPTIDE', 'K', 'A', 1, 10, 310.5, 2, -0.25, 12.5, 7, 'scan=3', 0.01, 1)",
        )
        .unwrap();
        let source = read(&conn, TableVersion::IonMobilityOffset, true);
        assert_eq!(source.file_id, Some(7));
        assert_eq!(source.spectrum.drift_time_msec, 0.0);
        assert_eq!(source.spectrum.collisional_cross_section_sq_a, 310.5);
        assert_eq!(source.spectrum.drift_time_high_energy_offset_msec, -0.25);
        assert_eq!(source.spectrum.retention_time, 12.5);
        assert_eq!(source.spectrum.spec_id_in_file, "scan=3");
        assert_eq!(source.spectrum.score_type, ScoreType::PercolatorQValue);

        conn.execute_batch("UPDATE RefSpectra SET ionMobilityType = 3").unwrap();
        let source = read(&conn, TableVersion::IonMobilityOffset, true);
        assert_eq!(source.spectrum.drift_time_msec, 0.0);
        assert_eq!(source.spectrum.collisional_cross_section_sq_a, 0.0);
    }
}
