use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::database::weighted_norm;
use crate::*;

/// A document and its similarity to a query. Higher scores are better.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DocMatch {
    pub id: DocId,
    pub score: f32,
}

/// Matches sorted by descending score, ties by ascending document id.
pub type DocMatches = Vec<DocMatch>;

/// Similarity between a query and a database document.
///
/// Both sides are turned into `tf * weight` vectors normalized to unit L1 norm.
/// Only the words of the query are visited.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    /// `1 - 0.5 * |q - d|_1`, i.e. the sum over shared words of `min(q_w, d_w)`. In `[0, 1]`.
    Classic,
    /// Number of words present in both documents.
    CommonPoints,
    /// Number of shared discriminative words, plus the classic score.
    ///
    /// A shared word is discriminative when its weight is positive and it holds
    /// exactly one descriptor on each side.
    StrongCommonPoints,
    /// Sum of the weights of the shared discriminative words, plus the classic score.
    WeightedStrongCommonPoints,
}

impl Metric {
    const ALL: [Metric; 4] = [
        Metric::Classic,
        Metric::CommonPoints,
        Metric::StrongCommonPoints,
        Metric::WeightedStrongCommonPoints,
    ];

    /// Every supported metric.
    pub fn available() -> &'static [Metric] {
        &Self::ALL
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Classic => "classic",
            Metric::CommonPoints => "commonPoints",
            Metric::StrongCommonPoints => "strongCommonPoints",
            Metric::WeightedStrongCommonPoints => "weightedStrongCommonPoints",
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        Metric::StrongCommonPoints
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = BowErr;

    fn from_str(s: &str) -> BowResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| BowErr::UnknownMetric {
                name: s.to_string(),
                available: Self::ALL
                    .iter()
                    .map(Metric::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl TryFrom<String> for Metric {
    type Error = BowErr;

    fn try_from(s: String) -> BowResult<Self> {
        s.parse()
    }
}

impl From<Metric> for String {
    fn from(m: Metric) -> Self {
        m.name().to_string()
    }
}

/// Outcome of querying a database with its own documents.
#[derive(Debug, Clone, Default)]
pub struct SanityReport {
    pub matches: BTreeMap<DocId, DocMatches>,
    /// Documents whose best match is another document
    pub wrong: Vec<DocId>,
}

impl SanityReport {
    pub fn wrong_matches(&self) -> usize {
        self.wrong.len()
    }
}

/// Queries a populated, weighted [`Database`] with a fixed metric.
///
/// The metric is resolved when the engine is built, so a bad name never
/// reaches the scoring code.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    db: &'a Database,
    metric: Metric,
    results: usize,
}

impl<'a> QueryEngine<'a> {
    /// Engine using the metric called `metric`, returning 10 results per query.
    pub fn new(db: &'a Database, metric: &str) -> BowResult<Self> {
        Ok(Self {
            db,
            metric: metric.parse()?,
            results: Config::default().results,
        })
    }

    pub fn with_config(db: &'a Database, config: &Config) -> Self {
        Self {
            db,
            metric: config.metric,
            results: config.results,
        }
    }

    /// Number of matches returned per query, `0` for all documents.
    pub fn results(mut self, results: usize) -> Self {
        self.results = results;
        self
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn query(&self, doc: &SparseHistogram) -> BowResult<DocMatches> {
        rank(self.db, doc, self.results, self.metric)
    }

    /// Run independent queries in parallel, keyed by query id.
    pub fn query_batch(
        &self,
        queries: &[(DocId, SparseHistogram)],
    ) -> BowResult<BTreeMap<DocId, DocMatches>> {
        self.db.ready()?;
        queries
            .par_iter()
            .map(|(id, doc)| self.query(doc).map(|m| (*id, m)))
            .collect()
    }

    pub fn sanity_check(&self) -> BowResult<SanityReport> {
        self_retrieval(self.db, self.results, self.metric)
    }
}

/// Score `doc` against every document of `db` and keep the best `k` (all if `k == 0`).
pub(crate) fn rank(db: &Database, doc: &SparseHistogram, k: usize, metric: Metric) -> BowResult<DocMatches> {
    let weights = db.ready()?;
    let scores = score_all(db, doc, weights, metric);
    let matches = top_k(db.doc_ids(), &scores, k);
    if let Some(best) = matches.first() {
        tracing::debug!(
            "query with {} words: {} matches, best {} with score {}",
            doc.num_words(),
            matches.len(),
            best.id,
            best.score
        );
    }
    Ok(matches)
}

pub(crate) fn self_retrieval(db: &Database, k: usize, metric: Metric) -> BowResult<SanityReport> {
    db.ready()?;
    tracing::info!("Sanity check: querying the database with the same documents");
    let matches: BTreeMap<DocId, DocMatches> = db
        .sparse_histograms()
        .par_iter()
        .map(|(id, doc)| rank(db, doc, k, metric).map(|m| (*id, m)))
        .collect::<BowResult<_>>()?;

    let wrong: Vec<DocId> = matches
        .iter()
        .filter(|(id, m)| m.first().map(|best| best.id) != Some(**id))
        .map(|(id, _)| *id)
        .collect();
    for id in wrong.iter() {
        tracing::info!("wrong match for document {}", id);
    }
    if wrong.is_empty() {
        tracing::info!("no wrong matches");
    } else {
        tracing::info!("there are {} wrong matches", wrong.len());
    }

    Ok(SanityReport { matches, wrong })
}

/// Accumulate the score of every document slot, visiting only the query's words.
fn score_all(db: &Database, doc: &SparseHistogram, weights: &[f32], metric: Metric) -> Vec<f32> {
    let mut scores = vec![0f32; db.size()];
    let q_norm = weighted_norm(doc, weights);

    for (word, bin) in doc.iter() {
        let weight = weights.get(word as usize).copied().unwrap_or(0.);
        let q_count = bin.len() as u32;
        let q = if q_norm > 0. {
            q_count as f32 * weight / q_norm
        } else {
            0.
        };

        for posting in db.postings(word) {
            let d_norm = db.norm(posting.slot);
            let d = if d_norm > 0. {
                posting.count as f32 * weight / d_norm
            } else {
                0.
            };
            let strong = weight > 0. && q_count == 1 && posting.count == 1;
            let score = &mut scores[posting.slot as usize];
            *score += match metric {
                Metric::Classic => q.min(d),
                Metric::CommonPoints => 1.,
                Metric::StrongCommonPoints => q.min(d) + if strong { 1. } else { 0. },
                Metric::WeightedStrongCommonPoints => q.min(d) + if strong { weight } else { 0. },
            };
        }
    }
    scores
}

/// Best `k` slots by descending score then ascending id; `k == 0` ranks everything.
fn top_k(ids: &[DocId], scores: &[f32], k: usize) -> DocMatches {
    let mut matches: DocMatches = ids
        .iter()
        .zip(scores)
        .map(|(&id, &score)| DocMatch { id, score })
        .collect();
    let order = |a: &DocMatch, b: &DocMatch| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id));

    if k > 0 && k < matches.len() {
        matches.select_nth_unstable_by(k - 1, order);
        matches.truncate(k);
    }
    matches.sort_unstable_by(order);
    matches
}
