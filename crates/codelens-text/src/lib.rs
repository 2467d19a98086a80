//! codelens-text
//!
//! Tantivy-backed keyword index implementing [`codelens_core::traits::LexicalIndex`].
//! Chunk metadata is stored alongside each document so hits carry it without a
//! round-trip to the dense store.

pub mod index;
pub mod tantivy_utils;

pub use index::TantivyLexicalIndex;
