use thiserror::Error;

/// Descriptor types the vocabulary can quantize, and their distances.
pub mod descriptor;
pub use descriptor::{Binary, Descriptor, Orb, Sift, SiftFloat};

/// Pre-trained hierarchical vocabulary, which maps descriptors to visual words.
pub mod vocab;
pub use vocab::Vocabulary;

/// Sparse per-image histograms ("documents") and the builder producing them.
pub mod histogram;
pub use histogram::{HistogramBuilder, SparseHistogram};

/// Inverted index over documents with tf-idf weighting.
pub mod database;
pub use database::Database;

/// Similarity metrics, ranked results and the query engine.
pub mod query;
pub use query::{DocMatch, DocMatches, Metric, QueryEngine, SanityReport};

/// Cheap feature correspondences from shared, unambiguous visual words.
pub mod correspondence;
pub use correspondence::{Correspondence, PairwiseCorrespondences};

/// Retrieval settings: result count, descriptor cap and metric.
pub mod config;
pub use config::Config;

/// Id of a visual word, i.e. a leaf of the vocabulary tree.
pub type Word = u32;

/// Id of a document (an indexed image).
pub type DocId = u32;

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "bincode")]
    #[error("Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[error("Malformed vocabulary tree: {0}")]
    MalformedTree(String),
    #[error("Descriptor dimension mismatch: vocabulary has {expected}, descriptor type has {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Weight table has {found} entries but the vocabulary has {expected} words")]
    WeightSizeMismatch { expected: usize, found: usize },
    #[error("No descriptors in the database")]
    EmptyDatabase,
    #[error("Database weights have not been loaded or computed")]
    NotWeighted,
    #[error("Document {0} is already in the database")]
    DuplicateDocument(DocId),
    #[error("Document {0} histogram references word {1} outside the vocabulary")]
    WordOutOfRange(DocId, Word),
    #[error("Unknown metric {name:?}, available: {available}")]
    UnknownMetric { name: String, available: String },
}
