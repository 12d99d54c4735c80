use rusqlite::{params, Connection};

use crate::error::{Result, SqlContext};
use crate::library::sql::{execute, sql_stmt};
use crate::spectra::codec::{encode_intensity, encode_mz, DEFAULT_COMPRESSION_LEVEL};
use crate::spectra::source_files::{SourceFileRegistry, AMBIGUOUS_CUTOFF};
use crate::spectra::spectrum::{Modification, Peaks, RefSpectrum};

const INSERT_SPECTRUM: &str = "INSERT INTO RefSpectra(peptideSeq, precursorMZ, precursorCharge, \
     peptideModSeq, prevAA, nextAA, copies, numPeaks, driftTimeMsec, collisionalCrossSectionSqA, \
     driftTimeHighEnergyOffsetMsec, retentionTime, fileID, SpecIDinFile, score, scoreType) \
     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)";

const INSERT_MODIFICATION: &str =
    "INSERT INTO Modifications(RefSpectraID, position, mass) VALUES(?1, ?2, ?3)";

const INSERT_SAVEPOINT: &str = "insert_spectrum";

const INSERT_PEAKS: &str =
    "INSERT INTO RefSpectraPeaks(RefSpectraID, peakMZ, peakIntensity) VALUES(?1, ?2, ?3)";

/// Insert a `RefSpectra` row and return its id.
///
/// `spectrum.file_name` is ignored, the caller has already resolved it to `file_id`.
pub fn insert_spectrum_row(conn: &Connection, spectrum: &RefSpectrum, num_peaks: i32, file_id: i64) -> Result<i64> {
    let mut stmt = conn
        .prepare_cached(INSERT_SPECTRUM)
        .sql_context(INSERT_SPECTRUM, "Failed preparing spectrum insert.")?;
    stmt.execute(params![
        spectrum.peptide_seq,
        spectrum.precursor_mz,
        spectrum.precursor_charge,
        spectrum.peptide_mod_seq,
        spectrum.prev_aa,
        spectrum.next_aa,
        spectrum.copies,
        num_peaks,
        spectrum.drift_time_msec,
        spectrum.collisional_cross_section_sq_a,
        spectrum.drift_time_high_energy_offset_msec,
        spectrum.retention_time,
        file_id,
        spectrum.spec_id_in_file,
        spectrum.score,
        spectrum.score_type.to_i32(),
    ])
    .sql_context(INSERT_SPECTRUM, "Failed inserting spectrum.")?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_modifications(conn: &Connection, spectrum_id: i64, modifications: &[Modification]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(INSERT_MODIFICATION)
        .sql_context(INSERT_MODIFICATION, "Failed preparing modification insert.")?;
    for modification in modifications {
        stmt.execute(params![spectrum_id, modification.position, modification.mass])
            .sql_context(INSERT_MODIFICATION, "Failed inserting modification.")?;
    }
    Ok(())
}

/// Store already encoded peak blobs for a spectrum.
pub fn insert_peak_blobs(conn: &Connection, spectrum_id: i64, mz: &[u8], intensity: &[u8]) -> Result<()> {
    execute(
        conn,
        INSERT_PEAKS,
        params![spectrum_id, mz, intensity],
        "Failed importing peaks.",
    )?;
    Ok(())
}

/// Adds new reference spectra to a library.
#[derive(Debug, Clone)]
pub struct SpectrumIngestor {
    pub compression_level: u32,
    /// Score threshold the spectra were selected with, recorded per source file
    pub cutoff_score: f64,
}

impl Default for SpectrumIngestor {
    fn default() -> Self {
        SpectrumIngestor {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            cutoff_score: AMBIGUOUS_CUTOFF,
        }
    }
}

impl SpectrumIngestor {
    pub fn new(compression_level: u32, cutoff_score: f64) -> Self {
        SpectrumIngestor { compression_level, cutoff_score }
    }

    /// Insert a spectrum with its modifications and peaks, returning the new spectrum id.
    ///
    /// The rows of one spectrum are written inside a savepoint, so a failure
    /// leaves no part of it behind, whether or not the caller opened a
    /// transaction.
    pub fn insert_spectrum(
        &self,
        conn: &Connection,
        registry: &mut SourceFileRegistry,
        spectrum: &RefSpectrum,
        modifications: &[Modification],
        peaks: &Peaks,
    ) -> Result<i64> {
        peaks.check_lengths()?;

        sql_stmt(conn, &format!("SAVEPOINT {}", INSERT_SAVEPOINT))?;
        match self.insert_rows(conn, registry, spectrum, modifications, peaks) {
            Ok(spectrum_id) => {
                sql_stmt(conn, &format!("RELEASE {}", INSERT_SAVEPOINT))?;
                Ok(spectrum_id)
            }
            Err(e) => {
                sql_stmt(conn, &format!("ROLLBACK TO {0}; RELEASE {0}", INSERT_SAVEPOINT))?;
                // a source file added by this spectrum was rolled back too
                registry.clear();
                Err(e)
            }
        }
    }

    fn insert_rows(
        &self,
        conn: &Connection,
        registry: &mut SourceFileRegistry,
        spectrum: &RefSpectrum,
        modifications: &[Modification],
        peaks: &Peaks,
    ) -> Result<i64> {
        let file_id = match &spectrum.file_name {
            Some(file_name) => registry.resolve(conn, file_name, self.cutoff_score)?,
            None => registry.unknown_file_id(conn)?,
        };

        let spectrum_id = insert_spectrum_row(conn, spectrum, peaks.len() as i32, file_id)?;
        insert_modifications(conn, spectrum_id, modifications)?;
        insert_peak_blobs(
            conn,
            spectrum_id,
            &encode_mz(&peaks.mz, self.compression_level),
            &encode_intensity(&peaks.intensity, self.compression_level),
        )?;

        Ok(spectrum_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LibraryError;
    use crate::library::schema::{count_spectra, create_tables};
    use crate::library::sql::MAIN_SCHEMA;
    use crate::spectra::source_files::read_source_files;
    use crate::spectra::spectrum::{read_modifications, read_peak_blobs, read_peaks, read_spectrum};

    fn library() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn, "urn:lsid:test").unwrap();
        conn
    }

    fn peaks() -> Peaks {
        Peaks::new(vec![110.07, 175.12, 262.15, 375.23], vec![5.0, 120.5, 33.0, 0.0]).unwrap()
    }

    #[test]
    fn test_insert_spectrum() {
        let conn = library();
        let mut registry = SourceFileRegistry::new();
        let ingestor = SpectrumIngestor::new(DEFAULT_COMPRESSION_LEVEL, 0.01);

        let mut spectrum = RefSpectrum::new("PEPTIDEK", 452.73, 2);
        spectrum.file_name = Some("run7.mzML".to_string());
        spectrum.spec_id_in_file = "scan=1042".to_string();
        let modifications = [Modification::new(7, 0.984), Modification::new(2, -17.026)];

        let id = ingestor
            .insert_spectrum(&conn, &mut registry, &spectrum, &modifications, &peaks())
            .unwrap();

        let stored = read_spectrum(&conn, id).unwrap().unwrap();
        assert_eq!(stored.num_peaks, 4);
        assert_eq!(stored.spectrum, spectrum);
        assert_eq!(read_modifications(&conn, id).unwrap(), modifications.to_vec());
        assert_eq!(read_peaks(&conn, id).unwrap().unwrap(), peaks());

        let files = read_source_files(&conn, MAIN_SCHEMA).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].cutoff_score, 0.01);
    }

    #[test]
    fn test_raw_peaks_when_compression_disabled() {
        let conn = library();
        let ingestor = SpectrumIngestor::new(0, AMBIGUOUS_CUTOFF);
        let id = ingestor
            .insert_spectrum(&conn, &mut SourceFileRegistry::new(), &RefSpectrum::new("AK", 109.5, 2), &[], &peaks())
            .unwrap();

        let (mz, intensity) = read_peak_blobs(&conn, MAIN_SCHEMA, id).unwrap().unwrap();
        assert_eq!(mz.len(), 4 * 8);
        assert_eq!(intensity.len(), 4 * 4);
    }

    #[test]
    fn test_mismatched_peaks_write_nothing() {
        let conn = library();
        let bad = Peaks {
            mz: vec![100.0],
            intensity: vec![],
        };
        let result = SpectrumIngestor::default().insert_spectrum(
            &conn,
            &mut SourceFileRegistry::new(),
            &RefSpectrum::new("AK", 109.5, 2),
            &[],
            &bad,
        );
        assert!(matches!(result, Err(LibraryError::PeakLengthMismatch { .. })));
        assert_eq!(count_spectra(&conn, MAIN_SCHEMA).unwrap(), 0);
        assert!(read_source_files(&conn, MAIN_SCHEMA).unwrap().is_empty());
    }

    #[test]
    fn test_failed_insert_leaves_nothing() {
        let conn = library();
        conn.execute_batch("DROP TABLE RefSpectraPeaks").unwrap();

        let mut registry = SourceFileRegistry::new();
        let mut spectrum = RefSpectrum::new("PEPTIDEK", 452.73, 2);
        spectrum.file_name = Some("run7.mzML".to_string());
        let result = SpectrumIngestor::default().insert_spectrum(
            &conn,
            &mut registry,
            &spectrum,
            &[Modification::new(1, 15.9949)],
            &peaks(),
        );

        assert!(matches!(result, Err(LibraryError::Sql { .. })));
        assert!(conn.is_autocommit());
        assert_eq!(count_spectra(&conn, MAIN_SCHEMA).unwrap(), 0);
        let modifications: i64 = conn
            .query_row("SELECT count(*) FROM Modifications", [], |row| row.get(0))
            .unwrap();
        assert_eq!(modifications, 0);
        assert!(read_source_files(&conn, MAIN_SCHEMA).unwrap().is_empty());

        // the file is added again rather than served from the cache
        conn.execute_batch("CREATE TABLE RefSpectraPeaks(RefSpectraID INTEGER, peakMZ BLOB, peakIntensity BLOB)")
            .unwrap();
        let id = SpectrumIngestor::default()
            .insert_spectrum(&conn, &mut registry, &spectrum, &[], &peaks())
            .unwrap();
        let stored = read_spectrum(&conn, id).unwrap().unwrap();
        assert_eq!(stored.spectrum.file_name.as_deref(), Some("run7.mzML"));
    }

    #[test]
    fn test_insert_inside_caller_transaction() {
        let conn = library();
        conn.execute_batch("BEGIN").unwrap();
        let id = SpectrumIngestor::default()
            .insert_spectrum(&conn, &mut SourceFileRegistry::new(), &RefSpectrum::new("AK", 109.5, 2), &[], &peaks())
            .unwrap();
        assert!(!conn.is_autocommit());
        conn.execute_batch("ROLLBACK").unwrap();
        assert!(read_spectrum(&conn, id).unwrap().is_none());
    }

    #[test]
    fn test_empty_spectrum() {
        let conn = library();
        let id = SpectrumIngestor::default()
            .insert_spectrum(
                &conn,
                &mut SourceFileRegistry::new(),
                &RefSpectrum::new("AK", 109.5, 2),
                &[],
                &Peaks::default(),
            )
            .unwrap();
        assert!(read_peaks(&conn, id).unwrap().unwrap().is_empty());
    }
}
