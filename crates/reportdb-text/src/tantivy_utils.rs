//! Schema and analyzer shared by indexing and querying.
use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};
use tantivy::Index;

pub const ANALYZER: &str = "reportdb_text";
pub const ID_FIELD: &str = "chunk_id";
pub const TEXT_FIELD: &str = "text";
/// Longest indexed token in bytes. Hangul syllables take three bytes each, so
/// this keeps compound Korean terms of up to 33 syllables.
pub const MAX_TOKEN_BYTES: usize = 100;

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field(ID_FIELD, STRING | STORED);
	let indexing = TextFieldIndexing::default().set_tokenizer(ANALYZER).set_index_option(IndexRecordOption::WithFreqs);
	schema_builder.add_text_field(TEXT_FIELD, TextOptions::default().set_indexing_options(indexing));
	schema_builder.build()
}

/// Word segmentation on non-alphanumerics (Hangul, Latin and digits stay
/// inside words), lowercase, English stop words dropped.
pub fn text_analyzer() -> TextAnalyzer {
	let stop_words = [
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(MAX_TOKEN_BYTES))
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(str::to_string)))
		.build()
}

pub fn register_analyzer(index: &Index) {
	index.tokenizers().register(ANALYZER, text_analyzer());
}

/// Terms `text` would be indexed under, in order of appearance.
pub fn analyze(analyzer: &mut TextAnalyzer, text: &str) -> Vec<String> {
	let mut terms = Vec::new();
	let mut stream = analyzer.token_stream(text);
	while stream.advance() {
		terms.push(stream.token().text.clone());
	}
	terms
}

pub fn fields(schema: &Schema) -> tantivy::Result<(Field, Field)> {
	Ok((schema.get_field(ID_FIELD)?, schema.get_field(TEXT_FIELD)?))
}
