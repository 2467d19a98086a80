use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const CODE_TOKENIZER: &str = "code_text";

/// Field handles resolved once from the schema.
#[derive(Clone, Copy)]
pub struct LexicalFields {
    pub chunk_id: Field,
    pub text: Field,
    pub file_path: Field,
    pub kind: Field,
    pub metadata: Field,
}

impl LexicalFields {
    pub fn resolve(schema: &Schema) -> anyhow::Result<Self> {
        Ok(Self {
            chunk_id: schema.get_field("chunk_id")?,
            text: schema.get_field("text")?,
            file_path: schema.get_field("file_path")?,
            kind: schema.get_field("kind")?,
            metadata: schema.get_field("metadata")?,
        })
    }
}

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("chunk_id", STRING | STORED);
    schema_builder.add_text_field("file_path", STRING | STORED);
    schema_builder.add_text_field("kind", STRING | STORED);
    let text_field_indexing = TextFieldIndexing::default().set_tokenizer(CODE_TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text_options = TextOptions::default().set_indexing_options(text_field_indexing);
    schema_builder.add_text_field("text", text_options);
    // Serialized ChunkMetadata, returned with hits.
    schema_builder.add_text_field("metadata", STORED);
    schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
    let stop_words = vec![
        "a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
    ];
    let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
        .build();
    index.tokenizers().register(CODE_TOKENIZER, tokenizer);
}
