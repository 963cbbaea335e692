//! Persisted knowledge store: the vector index plus the statement texts it was
//! built from, kept in lockstep.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::embedder::Embedder;
use crate::index::{FlatL2Index, IndexError};
use crate::knowledge::{self, KnowledgeStatement, KNOWLEDGE_VERSION};

/// File name of the binary vector index inside a store directory.
pub const INDEX_FILE: &str = "index.bin";
/// File name of the ordered statement list inside a store directory.
pub const STATEMENTS_FILE: &str = "knowledge.json";
/// File name of the plain-text knowledge snapshot inside a store directory.
pub const SNAPSHOT_FILE: &str = "knowledge_base.txt";

/// Errors raised while building or loading a knowledge store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Index construction or decoding failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Embedding the statements failed.
    #[error("failed to embed knowledge statements: {0}")]
    Embedding(String),
    /// Index rows and statements are out of sync.
    #[error("index has {index_rows} rows but {statements} statements are stored")]
    Mismatch {
        /// Rows in the vector index.
        index_rows: usize,
        /// Stored statements.
        statements: usize,
    },
    /// Statements file was written from another knowledge revision.
    #[error("store built from knowledge version {found}, expected {expected}")]
    VersionMismatch {
        /// Version compiled into this binary.
        expected: u32,
        /// Version recorded on disk.
        found: u32,
    },
    /// Statements file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// Statements file is not valid JSON.
    #[error("{}: {source}", path.display())]
    Json {
        /// Offending path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize)]
struct StatementsFile {
    version: u32,
    statements: Vec<String>,
}

/// Immutable pairing of knowledge statements and their embedded rows.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    statements: Vec<KnowledgeStatement>,
    index: FlatL2Index,
}

impl KnowledgeStore {
    /// Pairs statements with an index, rejecting mismatched lengths.
    pub fn from_parts(
        statements: Vec<KnowledgeStatement>,
        index: FlatL2Index,
    ) -> Result<Self, StoreError> {
        if statements.len() != index.len() {
            return Err(StoreError::Mismatch {
                index_rows: index.len(),
                statements: statements.len(),
            });
        }
        Ok(Self { statements, index })
    }

    /// Embeds `statements` in order and indexes them.
    pub fn build(
        statements: Vec<KnowledgeStatement>,
        embedder: &dyn Embedder,
    ) -> Result<Self, StoreError> {
        let texts: Vec<&str> = statements.iter().map(|s| s.text.as_str()).collect();
        let vectors = embedder
            .encode(&texts)
            .map_err(|err| StoreError::Embedding(format!("{err:#}")))?;
        if vectors.len() != statements.len() {
            return Err(StoreError::Embedding(format!(
                "embedder returned {} vectors for {} statements",
                vectors.len(),
                statements.len()
            )));
        }
        let index = FlatL2Index::build(&vectors)?;
        info!(
            rows = index.len(),
            dimension = index.dimension(),
            "built knowledge index"
        );
        Self::from_parts(statements, index)
    }

    /// Builds from the compiled-in knowledge base.
    pub fn build_default(embedder: &dyn Embedder) -> Result<Self, StoreError> {
        Self::build(knowledge::load(), embedder)
    }

    /// Ordered statements.
    pub fn statements(&self) -> &[KnowledgeStatement] {
        &self.statements
    }

    /// Vector index whose row `i` embeds `statements()[i]`.
    pub fn index(&self) -> &FlatL2Index {
        &self.index
    }

    /// Writes the index, the statement list, and the text snapshot into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        self.index.save(&dir.join(INDEX_FILE))?;

        let path = dir.join(STATEMENTS_FILE);
        let file = File::create(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let payload = StatementsFile {
            version: KNOWLEDGE_VERSION,
            statements: self.statements.iter().map(|s| s.text.clone()).collect(),
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &payload).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        writer
            .flush()
            .map_err(|source| StoreError::Io { path, source })?;

        let snapshot = dir.join(SNAPSHOT_FILE);
        knowledge::write_snapshot(&snapshot).map_err(|source| StoreError::Io {
            path: snapshot,
            source,
        })?;
        debug!(?dir, "saved knowledge store");
        Ok(())
    }

    /// Loads a store written by [`KnowledgeStore::save`].
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let index = FlatL2Index::load(&dir.join(INDEX_FILE))?;
        let path = dir.join(STATEMENTS_FILE);
        let file = File::open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let payload: StatementsFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| StoreError::Json { path, source })?;
        if payload.version != KNOWLEDGE_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: KNOWLEDGE_VERSION,
                found: payload.version,
            });
        }
        let statements = payload
            .statements
            .into_iter()
            .enumerate()
            .map(|(id, text)| KnowledgeStatement { id, text })
            .collect();
        let store = Self::from_parts(statements, index)?;
        info!(rows = store.index.len(), ?dir, "loaded knowledge store");
        Ok(store)
    }
}
