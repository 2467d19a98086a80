//! codelens-vector
//!
//! LanceDB-backed vector store implementing [`codelens_core::traits::DenseIndex`].
//! Each row keeps the serialized chunk metadata next to its embedding, which
//! makes this table the store the keyword index is rebuilt from.

pub mod index;
pub mod schema;
pub mod table;
pub mod writer;

pub use index::LanceDenseIndex;
pub use schema::build_chunk_schema;
