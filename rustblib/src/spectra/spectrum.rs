use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result, SqlContext};
use crate::spectra::codec::{decode_intensity, decode_mz};
use crate::spectra::score::ScoreType;

/// Metadata of a reference spectrum, everything except its peaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefSpectrum {
    pub peptide_seq: String,
    pub precursor_mz: f64,
    pub precursor_charge: i32,
    pub peptide_mod_seq: String,
    pub prev_aa: String,
    pub next_aa: String,
    pub copies: i32,
    pub drift_time_msec: f64,
    pub collisional_cross_section_sq_a: f64,
    pub drift_time_high_energy_offset_msec: f64,
    pub retention_time: f64,
    /// Source file the spectrum was read from, `None` for unknown provenance
    pub file_name: Option<String>,
    pub spec_id_in_file: String,
    pub score: f64,
    pub score_type: ScoreType,
}

impl RefSpectrum {
    pub fn new(peptide_seq: &str, precursor_mz: f64, precursor_charge: i32) -> Self {
        RefSpectrum {
            peptide_seq: peptide_seq.to_string(),
            precursor_mz,
            precursor_charge,
            peptide_mod_seq: peptide_seq.to_string(),
            ..Default::default()
        }
    }
}

impl Default for RefSpectrum {
    fn default() -> Self {
        RefSpectrum {
            peptide_seq: String::new(),
            precursor_mz: 0.0,
            precursor_charge: 0,
            peptide_mod_seq: String::new(),
            prev_aa: "-".to_string(),
            next_aa: "-".to_string(),
            copies: 1,
            drift_time_msec: 0.0,
            collisional_cross_section_sq_a: 0.0,
            drift_time_high_energy_offset_msec: 0.0,
            retention_time: 0.0,
            file_name: None,
            spec_id_in_file: String::new(),
            score: 0.0,
            score_type: ScoreType::Unknown,
        }
    }
}

/// A mass shift at a residue position of the peptide.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub position: i32,
    pub mass: f64,
}

impl Modification {
    pub fn new(position: i32, mass: f64) -> Self {
        Modification { position, mass }
    }
}

/// The peak arrays of one spectrum.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Peaks {
    pub mz: Vec<f64>,
    pub intensity: Vec<f32>,
}

impl Peaks {
    pub fn new(mz: Vec<f64>, intensity: Vec<f32>) -> Result<Self> {
        let peaks = Peaks { mz, intensity };
        peaks.check_lengths()?;
        Ok(peaks)
    }

    pub fn check_lengths(&self) -> Result<()> {
        if self.mz.len() != self.intensity.len() {
            return Err(LibraryError::PeakLengthMismatch {
                mz: self.mz.len(),
                intensity: self.intensity.len(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }
}

/// A spectrum as it is stored in a library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSpectrum {
    pub id: i64,
    pub file_id: Option<i64>,
    pub num_peaks: i32,
    pub spectrum: RefSpectrum,
}

// Older libraries may hold NULL in columns added later, or store numbers
// where text is expected. Reads are lenient and fall back to zero values.

pub(crate) fn real(row: &Row, index: usize) -> rusqlite::Result<f64> {
    Ok(match row.get_ref(index)? {
        ValueRef::Integer(value) => value as f64,
        ValueRef::Real(value) => value,
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).trim().parse().unwrap_or(0.0),
        ValueRef::Null | ValueRef::Blob(_) => 0.0,
    })
}

pub(crate) fn integer(row: &Row, index: usize) -> rusqlite::Result<i64> {
    Ok(match row.get_ref(index)? {
        ValueRef::Integer(value) => value,
        ValueRef::Real(value) => value as i64,
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).trim().parse().unwrap_or(0),
        ValueRef::Null | ValueRef::Blob(_) => 0,
    })
}

pub(crate) fn text(row: &Row, index: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(value) => value.to_string(),
        ValueRef::Real(value) => value.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

const SELECT_SPECTRUM: &str = "SELECT r.id, r.peptideSeq, r.precursorMZ, r.precursorCharge, \
     r.peptideModSeq, r.prevAA, r.nextAA, r.copies, r.numPeaks, r.driftTimeMsec, \
     r.collisionalCrossSectionSqA, r.driftTimeHighEnergyOffsetMsec, r.retentionTime, \
     r.fileID, f.fileName, r.SpecIDinFile, r.score, r.scoreType \
     FROM RefSpectra r LEFT JOIN SpectrumSourceFiles f ON r.fileID = f.id \
     WHERE r.id = ?1";

/// Read the metadata of a stored spectrum.
pub fn read_spectrum(conn: &Connection, id: i64) -> Result<Option<StoredSpectrum>> {
    conn.query_row(SELECT_SPECTRUM, [id], |row| {
        let file_name: Option<String> = row.get(14)?;
        Ok(StoredSpectrum {
            id: row.get(0)?,
            file_id: row.get(13)?,
            num_peaks: integer(row, 8)? as i32,
            spectrum: RefSpectrum {
                peptide_seq: text(row, 1)?,
                precursor_mz: real(row, 2)?,
                precursor_charge: integer(row, 3)? as i32,
                peptide_mod_seq: text(row, 4)?,
                prev_aa: text(row, 5)?,
                next_aa: text(row, 6)?,
                copies: integer(row, 7)? as i32,
                drift_time_msec: real(row, 9)?,
                collisional_cross_section_sq_a: real(row, 10)?,
                drift_time_high_energy_offset_msec: real(row, 11)?,
                retention_time: real(row, 12)?,
                file_name,
                spec_id_in_file: text(row, 15)?,
                score: real(row, 16)?,
                score_type: ScoreType::from(integer(row, 17)? as i32),
            },
        })
    })
    .optional()
    .sql_context(SELECT_SPECTRUM, "Failed reading spectrum.")
}

/// Read the modifications of a stored spectrum in insertion order.
pub fn read_modifications(conn: &Connection, spectrum_id: i64) -> Result<Vec<Modification>> {
    let query = "SELECT position, mass FROM Modifications WHERE RefSpectraID = ?1 ORDER BY id";
    let mut stmt = conn.prepare(query).sql_context(query, "Failed getting modifications.")?;
    let modifications: rusqlite::Result<Vec<Modification>> = stmt
        .query_map([spectrum_id], |row| {
            Ok(Modification::new(integer(row, 0)? as i32, real(row, 1)?))
        })
        .sql_context(query, "Failed getting modifications.")?
        .collect();
    modifications.sql_context(query, "Failed getting modifications.")
}

/// Read the raw peak blobs of a spectrum from the given schema.
pub fn read_peak_blobs(conn: &Connection, schema: &str, spectrum_id: i64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let query = format!(
        "SELECT peakMZ, peakIntensity FROM {}.RefSpectraPeaks WHERE RefSpectraID = ?1",
        schema
    );
    conn.query_row(&query, [spectrum_id], |row| {
        let mz: Option<Vec<u8>> = row.get(0)?;
        let intensity: Option<Vec<u8>> = row.get(1)?;
        Ok((mz.unwrap_or_default(), intensity.unwrap_or_default()))
    })
    .optional()
    .sql_context(&query, "Failed getting peaks.")
}

/// Read and decode the peaks of a stored spectrum.
pub fn read_peaks(conn: &Connection, spectrum_id: i64) -> Result<Option<Peaks>> {
    let query = "SELECT numPeaks FROM RefSpectra WHERE id = ?1";
    let num_peaks: Option<Option<i64>> = conn
        .query_row(query, [spectrum_id], |row| row.get(0))
        .optional()
        .sql_context(query, "Failed getting peak count.")?;
    let num_peaks = match num_peaks {
        Some(count) => count.unwrap_or(0).max(0) as usize,
        None => return Ok(None),
    };

    match read_peak_blobs(conn, crate::library::sql::MAIN_SCHEMA, spectrum_id)? {
        Some((mz, intensity)) => Ok(Some(Peaks {
            mz: decode_mz(&mz, num_peaks)?,
            intensity: decode_intensity(&intensity, num_peaks)?,
        })),
        None => Ok(None),
    }
}
