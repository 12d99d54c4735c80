// src/lib.rs
pub mod config;
pub mod error;

pub mod library {
    pub mod handle;
    pub mod schema;
    pub mod sql;
    pub mod transaction;
}

pub mod spectra {
    pub mod codec;
    pub mod ingest;
    pub mod score;
    pub mod source_files;
    pub mod spectrum;
}

pub mod merge {
    pub mod merger;
    pub mod table_version;
}
