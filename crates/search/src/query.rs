use std::collections::BTreeSet;

use diligence_core::RetrievedChunk;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{TantivyDocument, Term};
use tracing::debug;

use crate::{ChunkIndex, SearchError};

/// Lowercased alphanumeric tokens, mirroring Tantivy's default tokenizer.
fn query_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

impl ChunkIndex {
    /// Retrieve the `limit` best chunks for `text`.
    ///
    /// With `project_id` set only that project's chunks are considered;
    /// `None` searches the whole corpus. Any shared term is enough to match;
    /// ranking is BM25.
    pub fn search(
        &self,
        text: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let terms = query_terms(text);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let should: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|t| {
                let term = Term::from_field_text(self.content_field, t);
                let q: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, q)
            })
            .collect();

        let mut clauses: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Must, Box::new(BooleanQuery::new(should)))];
        if let Some(project_id) = project_id {
            let term = Term::from_field_text(self.project_id_field, project_id);
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
            ));
        }
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(addr)?;
            let text_of = |field| {
                retrieved
                    .get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            hits.push(RetrievedChunk {
                document_id: text_of(self.document_id_field),
                chunk_id: text_of(self.chunk_id_field),
                filename: text_of(self.filename_field),
                text: text_of(self.content_field),
                score,
            });
        }

        debug!(
            terms = terms.len(),
            project_id = project_id.unwrap_or("*"),
            hits = hits.len(),
            "chunk search completed"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use diligence_core::{Chunk, Document};

    use super::*;

    fn document(id: &str, chunks: &[&str]) -> Document {
        Document {
            id: id.into(),
            filename: format!("{id}.txt"),
            content: chunks.join("\n\n"),
            chunks: chunks
                .iter()
                .enumerate()
                .map(|(i, t)| Chunk {
                    id: format!("{id}:{i}"),
                    index: i as u32,
                    text: t.to_string(),
                })
                .collect(),
            indexed_at: Utc::now(),
        }
    }

    fn seeded() -> ChunkIndex {
        let idx = ChunkIndex::open_in_ram().unwrap();
        idx.index_document(
            "p1",
            &document(
                "d1",
                &[
                    "The auditor of the fund is Deloitte.",
                    "The fund invests in European mid-market buyouts.",
                ],
            ),
        )
        .unwrap();
        idx.index_document("p2", &document("d2", &["The auditor of the company is KPMG."]))
            .unwrap();
        idx.commit().unwrap();
        idx
    }

    #[test]
    fn test_search_ranks_relevant_chunk_first() {
        let idx = seeded();
        let hits = idx.search("Who is the fund auditor?", Some("p1"), 3).unwrap();
        assert_eq!(hits[0].chunk_id, "d1:0");
        assert_eq!(hits[0].filename, "d1.txt");
        assert!(hits.iter().all(|h| h.document_id == "d1"));
    }

    #[test]
    fn test_search_without_project_spans_corpus() {
        let idx = seeded();
        let hits = idx.search("auditor", None, 10).unwrap();
        let mut docs: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        docs.sort();
        assert_eq!(docs, vec!["d1", "d2"]);
    }

    #[test]
    fn test_search_limit_and_empty_query() {
        let idx = seeded();
        assert_eq!(idx.search("the", None, 1).unwrap().len(), 1);
        assert!(idx.search("?!", None, 5).unwrap().is_empty());
        assert!(idx.search("nonexistentterm", None, 5).unwrap().is_empty());
    }
}
