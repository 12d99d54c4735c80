use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::config::LibraryConfig;
use crate::error::{LibraryError, Result};
use crate::library::schema::{
    count_spectra, create_indexes, create_tables, drop_indexes, read_lsid, read_revision_info,
    spectrum_count, update_lib_info, update_tables, RevisionInfo,
};
use crate::library::sql::{sql_stmt, table_exists, MAIN_SCHEMA};
use crate::library::transaction::{begin, end, rollback, TransactionGuard};
use crate::merge::merger::{LibraryMerger, MergeReport, MergeSelection};
use crate::spectra::ingest::SpectrumIngestor;
use crate::spectra::source_files::{
    count_spectra_per_file, read_source_files, SourceFile, SourceFileRegistry, AMBIGUOUS_CUTOFF,
};
use crate::spectra::spectrum::{
    read_modifications, read_peaks, read_spectrum, Modification, Peaks, RefSpectrum, StoredSpectrum,
};

/// Summary of a library, as printed by `rustblib info`.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryInfo {
    pub path: PathBuf,
    pub lsid: String,
    pub revision: i32,
    pub schema_version: i32,
    pub spectrum_count: i64,
    pub source_files: Vec<SourceFileInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFileInfo {
    #[serde(flatten)]
    pub file: SourceFile,
    pub spectra: i64,
}

/// An open spectral library file.
///
/// Opening creates the file or brings an existing one up to the current
/// layout. Spectra added or merged become a new revision on [`BlibLibrary::commit`].
pub struct BlibLibrary {
    connection: Connection,
    path: PathBuf,
    config: LibraryConfig,
    registry: SourceFileRegistry,
    ingestor: SpectrumIngestor,
}

impl BlibLibrary {
    /// Create a new library at `path`, or open an existing one for appending.
    ///
    /// A missing or empty file gives a new library, as does an existing one
    /// when `config.overwrite` is set. Otherwise the existing library has its
    /// lookup indexes dropped until the next commit and its tables upgraded.
    pub fn open(path: impl AsRef<Path>, config: LibraryConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let has_content = fs::metadata(&path).map(|meta| meta.len() > 0).unwrap_or(false);

        if has_content && config.overwrite {
            fs::remove_file(&path).map_err(|source| LibraryError::Remove {
                path: path.clone(),
                source,
            })?;
        }
        let create = !has_content || config.overwrite;

        let connection = Connection::open(&path).map_err(|source| LibraryError::Open {
            path: path.clone(),
            source,
        })?;

        sql_stmt(&connection, "PRAGMA synchronous=OFF")?;
        sql_stmt(&connection, &format!("PRAGMA cache_size={}", config.cache_size_pages()))?;
        sql_stmt(&connection, "PRAGMA temp_store=MEMORY")?;

        let mut registry = SourceFileRegistry::new();
        if create {
            let lsid = config.lsid_for(&path);
            let guard = TransactionGuard::new(&connection)?;
            create_tables(&connection, &lsid)?;
            guard.commit()?;
            log::info!("Created library '{}' ({})", path.display(), lsid);
        } else {
            drop_indexes(&connection)?;
            update_tables(&connection, &mut registry)?;
            log::info!("Opened library '{}' for appending", path.display());
        }

        let ingestor = SpectrumIngestor::new(config.compression_level, AMBIGUOUS_CUTOFF);
        Ok(BlibLibrary {
            connection,
            path,
            config,
            registry,
            ingestor,
        })
    }

    /// Open an existing library without changing it, for inspection.
    ///
    /// Inserting, merging or committing fails on a library opened this way.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(&path, flags).map_err(|source| LibraryError::Open {
            path: path.clone(),
            source,
        })?;

        if !table_exists(&connection, MAIN_SCHEMA, "RefSpectra")? || !table_exists(&connection, MAIN_SCHEMA, "LibInfo")? {
            return Err(LibraryError::InvalidLibrary(format!(
                "'{}' is missing RefSpectra or LibInfo",
                path.display()
            )));
        }

        Ok(BlibLibrary {
            connection,
            path,
            config: LibraryConfig::default(),
            registry: SourceFileRegistry::new(),
            ingestor: SpectrumIngestor::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Cutoff score recorded for the source files of spectra inserted from now on.
    pub fn set_cutoff_score(&mut self, cutoff_score: f64) {
        self.ingestor.cutoff_score = cutoff_score;
    }

    /// Start a transaction, committing any transaction still open.
    pub fn begin_transaction(&self) -> Result<()> {
        begin(&self.connection)
    }

    pub fn end_transaction(&self) -> Result<()> {
        end(&self.connection)
    }

    /// Roll back the open transaction. Its spectra and source files are discarded.
    pub fn undo_transaction(&mut self) -> Result<()> {
        rollback(&self.connection)?;
        self.registry.clear();
        Ok(())
    }

    /// Add a spectrum with its modifications and peaks, returning its id.
    ///
    /// Run inside [`BlibLibrary::begin_transaction`] when inserting many
    /// spectra; on error the caller should call [`BlibLibrary::undo_transaction`].
    pub fn insert_spectrum(
        &mut self,
        spectrum: &RefSpectrum,
        modifications: &[Modification],
        peaks: &Peaks,
    ) -> Result<i64> {
        self.ingestor
            .insert_spectrum(&self.connection, &mut self.registry, spectrum, modifications, peaks)
    }

    /// Copy spectra from the library at `source` into this one.
    pub fn merge_from(&mut self, source: impl AsRef<Path>, selection: &MergeSelection) -> Result<MergeReport> {
        let result = {
            let mut merger = LibraryMerger::new(&self.connection, &mut self.registry, self.config.batch_size);
            merger.merge_from(source.as_ref(), selection)
        };
        if result.is_err() {
            // ids cached during a rolled back batch are gone from the library
            self.registry.clear();
        }
        result
    }

    /// Record the spectrum count, advance the revision and rebuild the indexes.
    ///
    /// Safe to run again after a session that crashed before finishing.
    pub fn commit(&mut self) -> Result<RevisionInfo> {
        let guard = TransactionGuard::new(&self.connection)?;
        let info = update_lib_info(&self.connection)?;
        create_indexes(&self.connection)?;
        guard.commit()?;
        log::info!(
            "Committed revision {} of '{}'",
            info.revision,
            self.path.display()
        );
        Ok(info)
    }

    /// Count the spectra of the library, or of a library attached as `schema`.
    pub fn count_spectra(&self, schema: &str) -> Result<i64> {
        count_spectra(&self.connection, schema)
    }

    pub fn spectrum_count(&self) -> Result<i64> {
        spectrum_count(&self.connection, MAIN_SCHEMA)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count_spectra(MAIN_SCHEMA)? == 0)
    }

    pub fn revision_info(&self) -> Result<RevisionInfo> {
        read_revision_info(&self.connection, MAIN_SCHEMA)
    }

    pub fn lsid(&self) -> Result<String> {
        read_lsid(&self.connection)
    }

    pub fn source_files(&self) -> Result<Vec<SourceFile>> {
        read_source_files(&self.connection, MAIN_SCHEMA)
    }

    /// Number of spectra per source file id.
    pub fn spectra_per_file(&self) -> Result<HashMap<i64, i64>> {
        count_spectra_per_file(&self.connection)
    }

    pub fn resolve_source_file(&mut self, file_name: &str, cutoff_score: f64) -> Result<i64> {
        self.registry.resolve(&self.connection, file_name, cutoff_score)
    }

    pub fn read_spectrum(&self, id: i64) -> Result<Option<StoredSpectrum>> {
        read_spectrum(&self.connection, id)
    }

    pub fn read_modifications(&self, spectrum_id: i64) -> Result<Vec<Modification>> {
        read_modifications(&self.connection, spectrum_id)
    }

    pub fn read_peaks(&self, spectrum_id: i64) -> Result<Option<Peaks>> {
        read_peaks(&self.connection, spectrum_id)
    }

    pub fn info(&self) -> Result<LibraryInfo> {
        let revision = self.revision_info()?;
        let per_file = self.spectra_per_file()?;
        let source_files = self
            .source_files()?
            .into_iter()
            .map(|file| SourceFileInfo {
                spectra: per_file.get(&file.id).copied().unwrap_or(0),
                file,
            })
            .collect();

        Ok(LibraryInfo {
            path: self.path.clone(),
            lsid: self.lsid()?,
            revision: revision.revision,
            schema_version: revision.schema_version,
            spectrum_count: self.spectrum_count()?,
            source_files,
        })
    }

    /// Close the library and delete its file.
    pub fn abort(self) -> Result<()> {
        let path = self.path;
        self.connection.close().map_err(|(_, source)| LibraryError::Sql {
            statement: "close".to_string(),
            message: "Failed closing library.".to_string(),
            source,
        })?;
        fs::remove_file(&path).map_err(|source| LibraryError::Remove { path: path.clone(), source })?;
        log::info!("Removed aborted library '{}'", path.display());
        Ok(())
    }
}
