use diligence_core::Document;
use tantivy::{doc, Term};
use tracing::debug;

use crate::{ChunkIndex, SearchError};

impl ChunkIndex {
    /// Index every chunk of a document under `project_id`, replacing any
    /// chunks previously indexed for the same document id. Does NOT commit.
    pub fn index_document(&self, project_id: &str, document: &Document) -> Result<(), SearchError> {
        let writer = self.writer()?;

        writer.delete_term(Term::from_field_text(self.document_id_field, &document.id));

        for chunk in &document.chunks {
            writer.add_document(doc!(
                self.project_id_field => project_id,
                self.document_id_field => document.id.as_str(),
                self.chunk_id_field => chunk.id.as_str(),
                self.filename_field => document.filename.as_str(),
                self.content_field => chunk.text.as_str(),
            ))?;
        }

        debug!(
            project_id,
            document_id = %document.id,
            chunk_count = document.chunks.len(),
            "indexed document chunks"
        );
        Ok(())
    }

    /// Delete all chunks of a document. Does NOT commit.
    pub fn delete_document(&self, document_id: &str) -> Result<(), SearchError> {
        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.document_id_field, document_id));
        debug!(document_id, "deleted document from chunk index");
        Ok(())
    }

    /// Delete all chunks belonging to a project. Does NOT commit.
    pub fn delete_project(&self, project_id: &str) -> Result<(), SearchError> {
        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.project_id_field, project_id));
        debug!(project_id, "deleted project from chunk index");
        Ok(())
    }

    /// Commit pending writes and make them visible to searches.
    pub fn commit(&self) -> Result<(), SearchError> {
        let mut writer = self.writer()?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }
}
