use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{LibraryError, Result, SqlContext};
use crate::library::sql::{column_exists, execute, sql_stmt, table_exists};
use crate::library::transaction::{end, TransactionGuard};
use crate::merge::table_version::{SourceSpectrum, TableVersion};
use crate::spectra::ingest::{insert_modifications, insert_peak_blobs, insert_spectrum_row};
use crate::spectra::source_files::{read_source_file, read_source_files, SourceFileRegistry};
use crate::spectra::spectrum::{integer, read_peak_blobs, real, Modification};

/// Alias the library being merged from is attached under.
pub const MERGE_SCHEMA: &str = "merge_source";

const TRANSFER_SAVEPOINT: &str = "transfer_spectrum";

/// One spectrum to copy, optionally with a new replicate count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub id: i64,
    pub copies: Option<i32>,
}

impl TransferRequest {
    pub fn new(id: i64) -> Self {
        TransferRequest { id, copies: None }
    }

    pub fn with_copies(id: i64, copies: i32) -> Self {
        TransferRequest { id, copies: Some(copies) }
    }
}

/// Spectra to copy from the source library.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeSelection {
    /// Every spectrum, in id order
    All,
    Spectra(Vec<TransferRequest>),
}

/// A spectrum that could not be copied. The merge continued without it.
#[derive(Debug, Clone, Serialize)]
pub struct TransferFailure {
    pub id: i64,
    pub reason: String,
}

/// Outcome of merging one library into another.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub source: PathBuf,
    pub table_version: TableVersion,
    /// Source spectrum id and the id it received in the target
    pub transferred: Vec<(i64, i64)>,
    pub failures: Vec<TransferFailure>,
}

impl MergeReport {
    pub fn count(&self) -> usize {
        self.transferred.len()
    }
}

/// Attaches a library under an alias and detaches it again when dropped.
struct AttachGuard<'conn> {
    conn: &'conn Connection,
    alias: &'static str,
}

impl<'conn> AttachGuard<'conn> {
    fn attach(conn: &'conn Connection, path: &Path, alias: &'static str) -> Result<Self> {
        if !path.is_file() {
            return Err(LibraryError::InvalidLibrary(format!(
                "library '{}' does not exist",
                path.display()
            )));
        }
        let statement = format!("ATTACH DATABASE ?1 AS {}", alias);
        execute(
            conn,
            &statement,
            [read_only_uri(path)],
            "Failed attaching library.",
        )?;
        Ok(AttachGuard { conn, alias })
    }
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        let statement = format!("DETACH DATABASE {}", self.alias);
        if let Err(e) = sql_stmt(self.conn, &statement) {
            log::error!("Failed to detach library: {}", e);
        }
    }
}

/// SQLite URI opening `path` read-only.
fn read_only_uri(path: &Path) -> String {
    let mut uri = String::from("file:");
    for c in path.to_string_lossy().chars() {
        match c {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3f"),
            '#' => uri.push_str("%23"),
            '\\' => uri.push('/'),
            _ => uri.push(c),
        }
    }
    uri.push_str("?mode=ro");
    uri
}

/// How the attached library stores file provenance.
struct SourceLayout {
    table_version: TableVersion,
    has_file_id: bool,
    has_source_files: bool,
}

/// Copies spectra from another library into the open one.
///
/// The mapping from source file ids of the other library to file ids of the
/// open one lives only as long as one [`LibraryMerger::merge_from`] call.
pub struct LibraryMerger<'a> {
    conn: &'a Connection,
    registry: &'a mut SourceFileRegistry,
    batch_size: usize,
    file_id_map: HashMap<i64, i64>,
}

impl<'a> LibraryMerger<'a> {
    pub fn new(conn: &'a Connection, registry: &'a mut SourceFileRegistry, batch_size: usize) -> Self {
        LibraryMerger {
            conn,
            registry,
            batch_size: batch_size.max(1),
            file_id_map: HashMap::new(),
        }
    }

    /// Merge the selected spectra of the library at `path`.
    ///
    /// Any open transaction is committed first, a database cannot be attached
    /// inside one. Spectra are copied in transactions of `batch_size` spectra.
    /// A spectrum missing from the source is reported in the returned
    /// [`MergeReport`] and skipped; any other error aborts the merge and rolls
    /// back the current batch, earlier batches stay committed.
    pub fn merge_from(&mut self, path: &Path, selection: &MergeSelection) -> Result<MergeReport> {
        end(self.conn)?;
        self.file_id_map.clear();

        let _attached = AttachGuard::attach(self.conn, path, MERGE_SCHEMA)?;
        if !table_exists(self.conn, MERGE_SCHEMA, "RefSpectra")? {
            return Err(LibraryError::InvalidLibrary(format!(
                "'{}' has no RefSpectra table",
                path.display()
            )));
        }

        let layout = SourceLayout {
            table_version: TableVersion::detect(self.conn, MERGE_SCHEMA)?,
            has_file_id: column_exists(self.conn, MERGE_SCHEMA, "RefSpectra", "fileID")?,
            has_source_files: table_exists(self.conn, MERGE_SCHEMA, "SpectrumSourceFiles")?,
        };

        let guard = TransactionGuard::new(self.conn)?;
        self.transfer_source_files(&layout)?;
        guard.commit()?;

        let requests = match selection {
            MergeSelection::All => self.all_spectra()?,
            MergeSelection::Spectra(requests) => requests.clone(),
        };

        let mut report = MergeReport {
            source: path.to_path_buf(),
            table_version: layout.table_version,
            transferred: Vec::with_capacity(requests.len()),
            failures: Vec::new(),
        };

        for batch in requests.chunks(self.batch_size) {
            let guard = TransactionGuard::new(self.conn)?;
            for request in batch {
                self.transfer_in_savepoint(&layout, request, &mut report)?;
            }
            guard.commit()?;
        }

        log::info!(
            "Merged {} spectra from '{}' (table version {}), {} skipped",
            report.count(),
            path.display(),
            layout.table_version,
            report.failures.len()
        );
        Ok(report)
    }

    /// Copy every source file of the attached library, remembering its new id.
    fn transfer_source_files(&mut self, layout: &SourceLayout) -> Result<()> {
        if !layout.has_source_files {
            log::warn!("Original library does not contain filenames for the library spectra");
            self.registry.unknown_file_id(self.conn)?;
            return Ok(());
        }

        for file in read_source_files(self.conn, MERGE_SCHEMA)? {
            let new_id = self.registry.resolve(self.conn, &file.file_name, file.cutoff_score)?;
            self.file_id_map.insert(file.id, new_id);
        }
        Ok(())
    }

    fn all_spectra(&self) -> Result<Vec<TransferRequest>> {
        let query = format!("SELECT id FROM {}.RefSpectra ORDER BY id", MERGE_SCHEMA);
        let mut stmt = self
            .conn
            .prepare(&query)
            .sql_context(&query, "Failed selecting spectra.")?;
        let ids: rusqlite::Result<Vec<i64>> = stmt
            .query_map([], |row| row.get(0))
            .sql_context(&query, "Failed selecting spectra.")?
            .collect();
        Ok(ids
            .sql_context(&query, "Failed selecting spectra.")?
            .into_iter()
            .map(TransferRequest::new)
            .collect())
    }

    fn transfer_in_savepoint(
        &mut self,
        layout: &SourceLayout,
        request: &TransferRequest,
        report: &mut MergeReport,
    ) -> Result<()> {
        sql_stmt(self.conn, &format!("SAVEPOINT {}", TRANSFER_SAVEPOINT))?;
        match self.transfer_spectrum(layout, request) {
            Ok(new_id) => {
                sql_stmt(self.conn, &format!("RELEASE {}", TRANSFER_SAVEPOINT))?;
                report.transferred.push((request.id, new_id));
                Ok(())
            }
            Err(e) => {
                sql_stmt(
                    self.conn,
                    &format!("ROLLBACK TO {0}; RELEASE {0}", TRANSFER_SAVEPOINT),
                )?;
                match e {
                    LibraryError::MissingSpectrum { .. } | LibraryError::MissingPeaks { .. } => {
                        log::warn!("Skipping spectrum {}: {}", request.id, e);
                        report.failures.push(TransferFailure {
                            id: request.id,
                            reason: e.to_string(),
                        });
                        Ok(())
                    }
                    _ => Err(e),
                }
            }
        }
    }

    /// Copy one spectrum with its modifications and peaks, returning its new id.
    fn transfer_spectrum(&mut self, layout: &SourceLayout, request: &TransferRequest) -> Result<i64> {
        let version = layout.table_version;
        let query = version.select_statement(MERGE_SCHEMA, layout.has_file_id);
        let source: Option<SourceSpectrum> = self
            .conn
            .query_row(&query, [request.id], |row| version.map_row(row))
            .optional()
            .sql_context(&query, "Failed reading spectrum.")?;
        let mut source = source.ok_or_else(|| LibraryError::MissingSpectrum {
            schema: MERGE_SCHEMA.to_string(),
            id: request.id,
        })?;

        if let Some(copies) = request.copies {
            source.spectrum.copies = copies;
        }

        let (mz, intensity) = read_peak_blobs(self.conn, MERGE_SCHEMA, request.id)?.ok_or_else(|| {
            LibraryError::MissingPeaks {
                schema: MERGE_SCHEMA.to_string(),
                id: request.id,
            }
        })?;

        let file_id = self.new_file_id(layout, source.file_id)?;
        let new_id = insert_spectrum_row(self.conn, &source.spectrum, source.num_peaks, file_id)?;
        insert_peak_blobs(self.conn, new_id, &mz, &intensity)?;

        let modifications = self.source_modifications(request.id)?;
        insert_modifications(self.conn, new_id, &modifications)?;

        Ok(new_id)
    }

    /// File id in the open library for a file id of the attached one.
    fn new_file_id(&mut self, layout: &SourceLayout, old_file_id: Option<i64>) -> Result<i64> {
        let old_file_id = match old_file_id {
            Some(id) if layout.has_source_files => id,
            _ => return self.registry.unknown_file_id(self.conn),
        };

        if let Some(&new_id) = self.file_id_map.get(&old_file_id) {
            return Ok(new_id);
        }

        // a file the source library references without listing it up front
        let new_id = match read_source_file(self.conn, MERGE_SCHEMA, old_file_id)? {
            Some(file) => self.registry.resolve(self.conn, &file.file_name, file.cutoff_score)?,
            None => self.registry.unknown_file_id(self.conn)?,
        };
        self.file_id_map.insert(old_file_id, new_id);
        Ok(new_id)
    }

    fn source_modifications(&self, spectrum_id: i64) -> Result<Vec<Modification>> {
        let query = format!(
            "SELECT position, mass FROM {}.Modifications WHERE RefSpectraID = ?1 ORDER BY id",
            MERGE_SCHEMA
        );
        let mut stmt = self
            .conn
            .prepare(&query)
            .sql_context(&query, "Failed getting modifications.")?;
        let modifications: rusqlite::Result<Vec<Modification>> = stmt
            .query_map([spectrum_id], |row| {
                Ok(Modification::new(integer(row, 0)? as i32, real(row, 1)?))
            })
            .sql_context(&query, "Failed getting modifications.")?
            .collect();
        modifications.sql_context(&query, "Failed getting modifications.")
    }
}
