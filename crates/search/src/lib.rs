//! Chunk retrieval for answer generation.
//!
//! Uses Tantivy to index document chunks. Each chunk becomes a Tantivy
//! document carrying the owning project, document and chunk ids as exact-match
//! fields plus a full-text `content` field for BM25-ranked retrieval.
//!
//! # Architecture
//!
//! - **Schema**: 5 fields per chunk (see `build_schema`)
//! - **Write path**: `ChunkIndex::index_document` -> `commit` (reloads reader)
//! - **Read path**: `ChunkIndex::search` -> BooleanQuery -> `RetrievedChunk`s
//! - **Storage**: in RAM, rebuilt from persisted chunks at startup; on disk
//!   when opened with `ChunkIndex::open`

pub mod indexer;
pub mod query;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};

/// Writer heap for a single indexing thread.
const WRITER_HEAP_BYTES: usize = 15_000_000;

/// Errors that can occur during search operations.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Directory error: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index writer lock poisoned")]
    Poisoned,
}

/// Build the Tantivy schema for document chunks.
///
/// Fields:
/// - `project_id`: STRING | STORED — scope filter, delete-by-project
/// - `document_id`: STRING | STORED — delete-by-document, citations
/// - `chunk_id`: STRING | STORED — citations
/// - `filename`: STRING | STORED — prompt context
/// - `content`: TEXT | STORED — full-text BM25 search
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    schema_builder.add_text_field("project_id", STRING | STORED);
    schema_builder.add_text_field("document_id", STRING | STORED);
    schema_builder.add_text_field("chunk_id", STRING | STORED);
    schema_builder.add_text_field("filename", STRING | STORED);
    schema_builder.add_text_field("content", TEXT | STORED);

    schema_builder.build()
}

/// Tantivy index of document chunks across all projects.
pub struct ChunkIndex {
    pub index: Index,
    /// Reader for executing queries. Reloaded explicitly on every commit.
    pub reader: IndexReader,
    pub writer: Mutex<IndexWriter>,
    pub schema: Schema,

    pub(crate) project_id_field: Field,
    pub(crate) document_id_field: Field,
    pub(crate) chunk_id_field: Field,
    pub(crate) filename_field: Field,
    pub(crate) content_field: Field,
}

impl ChunkIndex {
    /// Open or create an on-disk index at the given directory.
    pub fn open(path: &Path) -> Result<Self, SearchError> {
        std::fs::create_dir_all(path)?;
        let schema = build_schema();
        let directory = tantivy::directory::MmapDirectory::open(path)?;
        let index = Index::open_or_create(directory, schema.clone())?;
        tracing::info!(path = %path.display(), "opened chunk index");
        Self::from_index(index, schema)
    }

    /// Create an index entirely in RAM.
    pub fn open_in_ram() -> Result<Self, SearchError> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        Self::from_index(index, schema)
    }

    fn from_index(index: Index, schema: Schema) -> Result<Self, SearchError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;

        let field = |name: &str| schema.get_field(name);
        Ok(Self {
            project_id_field: field("project_id")?,
            document_id_field: field("document_id")?,
            chunk_id_field: field("chunk_id")?,
            filename_field: field("filename")?,
            content_field: field("content")?,
            index,
            reader,
            writer: Mutex::new(writer),
            schema,
        })
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, IndexWriter>, SearchError> {
        self.writer.lock().map_err(|_| SearchError::Poisoned)
    }

    /// Number of chunks visible to searches.
    pub fn num_chunks(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}
