use std::cmp::Ordering;
use std::collections::BTreeSet;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::{debug, info};

use reportdb_core::error::{Error, Result};
use reportdb_core::types::{Chunk, ChunkId, RankedCandidate};

use crate::tantivy_utils::{analyze, build_schema, fields, register_analyzer, text_analyzer};

const WRITER_HEAP_BYTES: usize = 50_000_000;

fn index_err(e: tantivy::TantivyError) -> Error {
	Error::Operation(format!("keyword index: {e}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermStats {
	/// The analyzed form of the requested term.
	pub term: String,
	/// Number of chunks containing the term.
	pub doc_freq: u64,
}

/// BM25 index over one chunk set. Built in memory with a single indexing
/// thread and never mutated afterwards.
pub struct KeywordIndex {
	searcher: Searcher,
	id_field: Field,
	text_field: Field,
	chunk_ids: Vec<ChunkId>,
}

impl KeywordIndex {
	pub fn build(chunks: &[Chunk]) -> Result<Self> {
		let schema = build_schema();
		let index = Index::create_in_ram(schema.clone());
		register_analyzer(&index);
		let (id_field, text_field) = fields(&schema).map_err(index_err)?;

		let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(index_err)?;
		for c in chunks {
			writer
				.add_document(doc!(id_field => c.id.clone(), text_field => c.text.clone()))
				.map_err(index_err)?;
		}
		writer.commit().map_err(index_err)?;

		let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(index_err)?;
		let searcher = reader.searcher();
		let mut chunk_ids: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
		chunk_ids.sort();
		info!(chunks = chunk_ids.len(), segments = searcher.segment_readers().len(), "built keyword index");
		Ok(Self { searcher, id_field, text_field, chunk_ids })
	}

	pub fn num_chunks(&self) -> usize {
		self.searcher.num_docs() as usize
	}

	/// Indexed chunk ids, sorted.
	pub fn chunk_ids(&self) -> &[ChunkId] {
		&self.chunk_ids
	}

	/// BM25 top-k. Ties are broken by chunk id so equal inputs give equal
	/// output regardless of segment layout.
	pub fn search(&self, query_text: &str, k: usize) -> Result<Vec<RankedCandidate>> {
		let mut analyzer = text_analyzer();
		let terms: BTreeSet<String> = analyze(&mut analyzer, query_text).into_iter().collect();
		let limit = self.num_chunks();
		if k == 0 || terms.is_empty() || limit == 0 {
			return Ok(vec![]);
		}
		let clauses: Vec<(Occur, Box<dyn Query>)> = terms
			.iter()
			.map(|t| {
				let q = TermQuery::new(Term::from_field_text(self.text_field, t), IndexRecordOption::WithFreqs);
				(Occur::Should, Box::new(q) as Box<dyn Query>)
			})
			.collect();
		let query = BooleanQuery::new(clauses);

		let top_docs = self.searcher.search(&query, &TopDocs::with_limit(limit)).map_err(index_err)?;
		let mut hits: Vec<(ChunkId, f32)> = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			if score <= 0.0 {
				continue;
			}
			let doc: TantivyDocument = self.searcher.doc(addr).map_err(index_err)?;
			let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) else {
				return Err(Error::IndexCorrupt(format!("keyword index document {addr:?} has no chunk id")));
			};
			hits.push((id.to_string(), score));
		}
		hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
		hits.truncate(k);
		debug!(terms = terms.len(), hits = hits.len(), "keyword search");
		Ok(hits
			.into_iter()
			.enumerate()
			.map(|(i, (chunk_id, score))| RankedCandidate { chunk_id, score, rank: i + 1 })
			.collect())
	}

	pub fn term_stats(&self, term: &str) -> Result<TermStats> {
		let mut analyzer = text_analyzer();
		let Some(analyzed) = analyze(&mut analyzer, term).into_iter().next() else {
			return Ok(TermStats { term: String::new(), doc_freq: 0 });
		};
		let doc_freq = self
			.searcher
			.doc_freq(&Term::from_field_text(self.text_field, &analyzed))
			.map_err(index_err)?;
		Ok(TermStats { term: analyzed, doc_freq })
	}
}
