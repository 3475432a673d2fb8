#[cfg(feature = "bincode")]
use bincode;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;

use crate::*;

/// Inverted index of documents over the words of a vocabulary, with tf-idf weights.
///
/// Lifecycle:
/// 1. [`Database::new`] with the vocabulary size.
/// 2. Optionally [`Database::load_weights`] / [`Database::set_weights`].
/// 3. [`Database::populate`] / [`Database::insert`] documents.
/// 4. [`Database::compute_weights`] unless weights were loaded.
/// 5. Query through a [`QueryEngine`] or [`Database::query`]. Queries only borrow
///    the database, so any number of threads may run them at once.
#[derive(Debug, Clone)]
pub struct Database {
    num_words: usize,
    /// Per word, one posting for every document containing it, in insertion order
    word_files: Vec<Vec<Posting>>,
    doc_ids: Vec<DocId>,
    slots: HashMap<DocId, usize>,
    histograms: BTreeMap<DocId, SparseHistogram>,
    weights: Weights,
    /// Per document slot: sum of `tf * weight` over its words
    norms: Vec<f32>,
    total_descriptors: usize,
    next_id: DocId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Posting {
    pub(crate) slot: u32,
    pub(crate) count: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum Weights {
    Missing,
    Loaded(Vec<f32>),
    Computed(Vec<f32>),
}

impl Database {
    /// Create an empty database for a vocabulary of `num_words` words.
    pub fn new(num_words: usize) -> Self {
        Self {
            num_words,
            word_files: vec![Vec::new(); num_words],
            doc_ids: Vec::new(),
            slots: HashMap::new(),
            histograms: BTreeMap::new(),
            weights: Weights::Missing,
            norms: Vec::new(),
            total_descriptors: 0,
            next_id: 0,
        }
    }

    /// Insert a document under the next unused id and return that id.
    pub fn insert(&mut self, doc: SparseHistogram) -> BowResult<DocId> {
        let id = self.next_id;
        self.insert_with_id(id, doc)?;
        Ok(id)
    }

    /// Insert a document under a caller-chosen id.
    ///
    /// Documents without descriptors are kept but add no postings. Computed
    /// weights no longer describe the population afterwards and are dropped,
    /// so queries fail with [`BowErr::NotWeighted`] until
    /// [`Database::compute_weights`] runs again. Loaded weights are kept.
    pub fn insert_with_id(&mut self, id: DocId, doc: SparseHistogram) -> BowResult<()> {
        self.check_insertable(id, &doc)?;
        if let Weights::Computed(_) = self.weights {
            tracing::debug!("document {} invalidates the computed weights", id);
            self.weights = Weights::Missing;
        }

        let slot = self.doc_ids.len();
        let norm = self.norm_of(&doc);
        for (word, bin) in doc.iter() {
            self.word_files[word as usize].push(Posting {
                slot: slot as u32,
                count: bin.len() as u32,
            });
        }
        self.norms.push(norm);
        self.doc_ids.push(id);
        self.slots.insert(id, slot);
        self.total_descriptors += doc.num_descriptors();
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.histograms.insert(id, doc);
        Ok(())
    }

    /// Insert all `documents` and return the number of descriptors they hold.
    ///
    /// Every document is checked before any is inserted, so a duplicate id or a
    /// word outside the vocabulary leaves the database untouched. Fails with
    /// [`BowErr::EmptyDatabase`] when nothing at all was ingested, since such a
    /// database cannot answer any query; the empty documents stay inserted.
    pub fn populate<I>(&mut self, documents: I) -> BowResult<usize>
    where
        I: IntoIterator<Item = (DocId, SparseHistogram)>,
    {
        let documents: Vec<_> = documents.into_iter().collect();
        let mut batch = HashSet::with_capacity(documents.len());
        for (id, doc) in documents.iter() {
            self.check_insertable(*id, doc)?;
            if !batch.insert(*id) {
                return Err(BowErr::DuplicateDocument(*id));
            }
        }

        let num_docs = documents.len();
        let mut num_descriptors = 0;
        for (id, doc) in documents {
            num_descriptors += doc.num_descriptors();
            self.insert_with_id(id, doc)?;
        }
        if num_descriptors == 0 {
            tracing::error!("No descriptors loaded");
            return Err(BowErr::EmptyDatabase);
        }
        tracing::info!(
            "{} sets of descriptors read for a total of {} features",
            num_docs,
            num_descriptors
        );
        Ok(num_descriptors)
    }

    /// Compute inverse document frequency weights from the current documents:
    /// `ln(N / N_w)` where `N_w` documents contain word `w`, `0` for unused words.
    ///
    /// Weights that were loaded take precedence and are left untouched.
    pub fn compute_weights(&mut self) -> BowResult<()> {
        if let Weights::Loaded(_) = self.weights {
            tracing::info!("Weights were loaded, skipping computation");
            return Ok(());
        }
        if self.total_descriptors == 0 {
            return Err(BowErr::EmptyDatabase);
        }
        let n = self.size() as f32;
        let weights = self
            .word_files
            .iter()
            .map(|postings| match postings.len() {
                0 => 0.,
                containing => (n / containing as f32).ln(),
            })
            .collect();
        self.weights = Weights::Computed(weights);
        self.update_norms();
        tracing::info!("Computed weights of {} words over {} documents", self.num_words, n);
        Ok(())
    }

    /// Replace the weight table. Its length must match the vocabulary size.
    ///
    /// The table counts as loaded: later calls to [`Database::compute_weights`] keep it.
    pub fn set_weights(&mut self, weights: Vec<f32>) -> BowResult<()> {
        if weights.len() != self.num_words {
            return Err(BowErr::WeightSizeMismatch {
                expected: self.num_words,
                found: weights.len(),
            });
        }
        self.weights = Weights::Loaded(weights);
        self.update_norms();
        Ok(())
    }

    /// Load a weight table saved with [`Database::save_weights`].
    #[cfg(feature = "bincode")]
    pub fn load_weights<P: AsRef<std::path::Path>>(&mut self, file: P) -> BowResult<()> {
        let mut file = std::fs::File::open(file)?;
        let mut buffer: Vec<u8> = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut buffer)?;
        let weights: Vec<f32> = bincode::deserialize(&buffer)?;
        self.set_weights(weights)?;
        tracing::info!("Loaded weights of {} words", self.num_words);
        Ok(())
    }

    #[cfg(feature = "bincode")]
    pub fn save_weights<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        let serialized = bincode::serialize(self.weights().ok_or(BowErr::NotWeighted)?)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(&serialized)?;
        Ok(())
    }

    pub fn weights(&self) -> Option<&[f32]> {
        match &self.weights {
            Weights::Missing => None,
            Weights::Loaded(w) | Weights::Computed(w) => Some(w),
        }
    }

    /// Rank every document against `doc` and keep the best `k` (`0` for all).
    pub fn query(&self, doc: &SparseHistogram, k: usize, metric: Metric) -> BowResult<DocMatches> {
        query::rank(self, doc, k, metric)
    }

    /// Query the database with each of its own documents.
    pub fn sanity_check(&self, k: usize, metric: Metric) -> BowResult<SanityReport> {
        query::self_retrieval(self, k, metric)
    }

    /// Number of documents.
    pub fn size(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn total_descriptors(&self) -> usize {
        self.total_descriptors
    }

    pub fn sparse_histograms(&self) -> &BTreeMap<DocId, SparseHistogram> {
        &self.histograms
    }

    /// Write the document map, one `d{<id>} = [<word>, ...]` line per document.
    pub fn write_document_map<W: Write>(&self, mut out: W) -> BowResult<()> {
        for (id, doc) in self.histograms.iter() {
            writeln!(out, "d{{{}}} = {}", id, doc)?;
        }
        Ok(())
    }

    /// Weights, provided the database holds descriptors and has been weighted.
    pub(crate) fn ready(&self) -> BowResult<&[f32]> {
        if self.total_descriptors == 0 {
            return Err(BowErr::EmptyDatabase);
        }
        self.weights().ok_or(BowErr::NotWeighted)
    }

    pub(crate) fn postings(&self, word: Word) -> &[Posting] {
        self.word_files
            .get(word as usize)
            .map(|postings| postings.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn doc_ids(&self) -> &[DocId] {
        &self.doc_ids
    }

    pub(crate) fn norm(&self, slot: u32) -> f32 {
        self.norms[slot as usize]
    }

    fn check_insertable(&self, id: DocId, doc: &SparseHistogram) -> BowResult<()> {
        if self.slots.contains_key(&id) {
            return Err(BowErr::DuplicateDocument(id));
        }
        if let Some(word) = doc.words().find(|&w| w as usize >= self.num_words) {
            return Err(BowErr::WordOutOfRange(id, word));
        }
        Ok(())
    }

    fn norm_of(&self, doc: &SparseHistogram) -> f32 {
        match self.weights() {
            Some(weights) => weighted_norm(doc, weights),
            None => 0.,
        }
    }

    fn update_norms(&mut self) {
        let norms = self
            .doc_ids
            .iter()
            .map(|id| self.norm_of(&self.histograms[id]))
            .collect();
        self.norms = norms;
    }
}

/// Sum of `tf * weight` over the words of `doc`; words outside the table weigh nothing.
pub(crate) fn weighted_norm(doc: &SparseHistogram, weights: &[f32]) -> f32 {
    doc.iter()
        .map(|(w, bin)| bin.len() as f32 * weights.get(w as usize).copied().unwrap_or(0.))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(bins: &[(Word, &[u32])]) -> SparseHistogram {
        SparseHistogram::from_bins(bins.iter().map(|(w, b)| (*w, b.iter().copied())))
    }

    fn abc() -> Database {
        let mut db = Database::new(4);
        let n = db
            .populate(vec![
                (0, h(&[(0, &[0]), (1, &[1])])),
                (1, h(&[(0, &[5])])),
                (2, h(&[(2, &[9])])),
            ])
            .unwrap();
        assert_eq!(n, 4);
        db
    }

    #[test]
    fn idf_weights() {
        let mut db = abc();
        db.compute_weights().unwrap();
        let w = db.weights().unwrap();
        assert!((w[0] - (3f32 / 2.).ln()).abs() < 1e-6);
        assert!((w[1] - 3f32.ln()).abs() < 1e-6);
        assert!((w[2] - 3f32.ln()).abs() < 1e-6);
        assert_eq!(w[3], 0.);
        assert!(w[0] <= w[1]);
    }

    #[test]
    fn word_in_every_document_weighs_nothing() {
        let mut db = Database::new(3);
        db.populate(vec![
            (0, h(&[(0, &[0]), (1, &[1])])),
            (1, h(&[(0, &[0, 1])])),
        ])
        .unwrap();
        db.compute_weights().unwrap();
        assert_eq!(db.weights().unwrap()[0], 0.);
        assert!(db.weights().unwrap()[1] > 0.);
    }

    #[test]
    fn populate_nothing_fails() {
        let mut db = Database::new(4);
        assert!(matches!(db.populate(Vec::new()), Err(BowErr::EmptyDatabase)));
        assert!(matches!(db.compute_weights(), Err(BowErr::EmptyDatabase)));
        assert!(matches!(
            db.query(&h(&[(0, &[0])]), 1, Metric::Classic),
            Err(BowErr::EmptyDatabase)
        ));
    }

    #[test]
    fn populate_only_empty_documents_fails() {
        let mut db = Database::new(4);
        let res = db.populate(vec![(0, SparseHistogram::new()), (1, SparseHistogram::new())]);
        assert!(matches!(res, Err(BowErr::EmptyDatabase)));
        assert!(matches!(db.sanity_check(1, Metric::Classic), Err(BowErr::EmptyDatabase)));
    }

    #[test]
    fn empty_documents_are_kept_without_postings() {
        let mut db = Database::new(4);
        db.populate(vec![(3, SparseHistogram::new()), (7, h(&[(1, &[0, 1])]))])
            .unwrap();
        assert_eq!(db.size(), 2);
        assert_eq!(db.total_descriptors(), 2);
        assert_eq!(db.postings(1), &[Posting { slot: 1, count: 2 }]);
        assert!(db.postings(0).is_empty());
    }

    #[test]
    fn insert_assigns_fresh_ids_and_rejects_duplicates() {
        let mut db = Database::new(4);
        db.insert_with_id(5, h(&[(0, &[0])])).unwrap();
        assert_eq!(db.insert(h(&[(1, &[0])])).unwrap(), 6);
        assert!(matches!(
            db.insert_with_id(5, h(&[(2, &[0])])),
            Err(BowErr::DuplicateDocument(5))
        ));
        assert!(matches!(
            db.insert_with_id(9, h(&[(4, &[0])])),
            Err(BowErr::WordOutOfRange(9, 4))
        ));
        assert_eq!(db.size(), 2);
    }

    #[test]
    fn query_requires_weights() {
        let db = abc();
        assert!(matches!(
            db.query(&h(&[(0, &[0])]), 1, Metric::Classic),
            Err(BowErr::NotWeighted)
        ));
    }

    #[test]
    fn weight_size_mismatch() {
        let mut db = abc();
        assert!(matches!(
            db.set_weights(vec![1.; 3]),
            Err(BowErr::WeightSizeMismatch { expected: 4, found: 3 })
        ));
        assert!(db.weights().is_none());
    }

    #[test]
    fn loaded_weights_survive_compute() {
        let mut db = Database::new(4);
        db.set_weights(vec![1., 2., 3., 4.]).unwrap();
        db.populate(vec![(0, h(&[(0, &[0]), (3, &[1, 2])]))]).unwrap();
        assert_eq!(db.norm(0), 1. + 2. * 4.);
        db.compute_weights().unwrap();
        assert_eq!(db.weights().unwrap(), &[1., 2., 3., 4.]);
    }

    #[test]
    fn recomputing_weights_keeps_histograms() {
        let mut db = abc();
        db.compute_weights().unwrap();
        let before = db.sparse_histograms().clone();
        db.insert(h(&[(3, &[0])])).unwrap();
        db.compute_weights().unwrap();
        assert_eq!(db.weights().unwrap()[3], 4f32.ln());
        assert_eq!(&db.sparse_histograms()[&0], &before[&0]);
        assert_eq!(db.size(), 4);
    }

    #[test]
    fn insert_after_computing_drops_stale_weights() {
        let mut db = Database::new(4);
        db.populate(vec![(0, h(&[(0, &[0])])), (1, h(&[(1, &[0])]))])
            .unwrap();
        db.compute_weights().unwrap();
        db.insert_with_id(2, h(&[(2, &[0])])).unwrap();
        assert!(db.weights().is_none());
        let query = h(&[(2, &[3])]);
        assert!(matches!(
            db.query(&query, 0, Metric::Classic),
            Err(BowErr::NotWeighted)
        ));

        db.compute_weights().unwrap();
        let matches = db.query(&query, 0, Metric::Classic).unwrap();
        assert_eq!(matches[0].id, 2);
        assert!((matches[0].score - 1.).abs() < 1e-6);
    }

    #[test]
    fn insert_keeps_loaded_weights() {
        let mut db = Database::new(4);
        db.set_weights(vec![1.; 4]).unwrap();
        db.populate(vec![(0, h(&[(0, &[0])]))]).unwrap();
        db.insert(h(&[(1, &[0])])).unwrap();
        assert_eq!(db.weights().unwrap(), &[1.; 4]);
        assert!(db.query(&h(&[(1, &[0])]), 1, Metric::Classic).is_ok());
    }

    #[test]
    fn populate_checks_all_documents_first() {
        let mut db = Database::new(4);
        db.insert_with_id(1, h(&[(0, &[0])])).unwrap();

        let res = db.populate(vec![(2, h(&[(1, &[0])])), (1, h(&[(2, &[0])]))]);
        assert!(matches!(res, Err(BowErr::DuplicateDocument(1))));
        let res = db.populate(vec![(2, h(&[(1, &[0])])), (3, h(&[(4, &[0])]))]);
        assert!(matches!(res, Err(BowErr::WordOutOfRange(3, 4))));
        let res = db.populate(vec![(2, h(&[(1, &[0])])), (2, h(&[(2, &[0])]))]);
        assert!(matches!(res, Err(BowErr::DuplicateDocument(2))));

        assert_eq!(db.size(), 1);
        assert_eq!(db.total_descriptors(), 1);
        assert!(db.postings(1).is_empty());
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn weights_file_round_trip_and_mismatch() {
        let mut db = abc();
        db.compute_weights().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.weights");
        db.save_weights(&path).unwrap();

        let mut other = Database::new(4);
        other.load_weights(&path).unwrap();
        assert_eq!(other.weights(), db.weights());

        let mut small = Database::new(3);
        assert!(matches!(
            small.load_weights(&path),
            Err(BowErr::WeightSizeMismatch { expected: 3, found: 4 })
        ));
        assert!(matches!(
            Database::new(4).save_weights(dir.path().join("none")),
            Err(BowErr::NotWeighted)
        ));
    }

    #[test]
    fn document_map() {
        let db = abc();
        let mut out = Vec::new();
        db.write_document_map(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "d{0} = [0, 1, ]\nd{1} = [0, ]\nd{2} = [2, ]\n"
        );
    }
}
