//! Library build settings, optionally read from a TOML file.
//!
//! ```toml
//! # rustblib.toml
//! [library]
//! authority = "proteome.gs.washington.edu"
//! redundant = true
//! cache_size_mb = 250
//! compression_level = 6
//! batch_size = 5000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result};
use crate::spectra::codec::DEFAULT_COMPRESSION_LEVEL;

/// SQLite pages are 1.5K, `PRAGMA cache_size` is given in pages.
pub const PAGES_PER_MEG: u32 = (1024.0 / 1.5) as u32;

/// Root structure of a configuration file.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub library: LibraryConfig,
}

/// Settings for creating, opening and filling a library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Authority part of the library LSID
    pub authority: String,

    /// Library id part of the LSID, defaults to the file name of the library
    pub library_id: Option<String>,

    /// Redundant libraries keep every spectrum, non-redundant ones one per peptide
    pub redundant: bool,

    /// Replace an existing library instead of appending to it
    pub overwrite: bool,

    /// SQLite page cache in megabytes
    pub cache_size_mb: u32,

    /// zlib level for peak arrays, 0 stores them uncompressed
    pub compression_level: u32,

    /// Spectra copied per transaction while merging
    pub batch_size: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            authority: "proteome.gs.washington.edu".to_string(),
            library_id: None,
            redundant: true,
            overwrite: false,
            cache_size_mb: 250,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            batch_size: 5000,
        }
    }
}

impl LibraryConfig {
    /// Load the `[library]` section of a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LibraryError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse the `[library]` section of a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| LibraryError::Config(format!("Failed to parse TOML configuration: {}", e)))?;
        Ok(file.library)
    }

    pub fn cache_size_pages(&self) -> u32 {
        self.cache_size_mb.saturating_mul(PAGES_PER_MEG)
    }

    /// The configured library id, or the file name of `library_path`.
    pub fn library_id_for(&self, library_path: &Path) -> String {
        match &self.library_id {
            Some(id) => id.clone(),
            None => library_id_from_name(&library_path.to_string_lossy()).to_string(),
        }
    }

    /// Life science identifier of a library built with these settings.
    pub fn lsid_for(&self, library_path: &Path) -> String {
        let library_type = if self.redundant { "redundant" } else { "nr" };
        format!(
            "urn:lsid:{}:spectral_library:bibliospec:{}:{}",
            self.authority,
            library_type,
            self.library_id_for(library_path)
        )
    }
}

/// Strip everything up to the last path separator of either platform.
pub fn library_id_from_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}
