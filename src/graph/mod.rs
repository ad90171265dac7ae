//! RDF data model shared by the triple store, the path engine and the wire protocol

mod triple;

pub use triple::{dedup_batch, Literal, StoredTriple, Term, Triple, TripleFilter};
