use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, STORED, STRING};

/// Field layout of the lexical index.
///
/// `text` is indexed with the built-in `en_stem` analyzer (case folding +
/// Porter stemming) with frequencies and positions, so BM25 scoring sees
/// stemmed, case-folded terms. `seq` is the insertion ordinal used to break
/// score ties deterministically.
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    let text_indexing = TextFieldIndexing::default()
        .set_tokenizer("en_stem")
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text_options = TextOptions::default().set_indexing_options(text_indexing).set_stored();
    schema_builder.add_text_field("text", text_options);
    schema_builder.add_text_field("source", STRING | STORED);
    schema_builder.add_text_field("heading", STRING | STORED);
    schema_builder.add_u64_field("position", STORED | FAST);
    schema_builder.add_u64_field("seq", STORED | FAST);
    schema_builder.build()
}
