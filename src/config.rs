//! Retrieval settings shared by the histogram builder and the query engine.

use serde::{Deserialize, Serialize};

use crate::Metric;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Matches returned per query, `0` for every document.
    pub results: usize,
    /// Descriptors used per image (the first ones), `0` for all.
    pub max_descriptors: usize,
    /// Similarity metric. Unknown names are rejected while deserializing.
    pub metric: Metric,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            results: 10,
            max_descriptors: 0,
            metric: Metric::default(),
        }
    }
}
