use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{collections::BTreeMap, fmt};

use crate::*;

/// Descriptor indices assigned to one visual word. Most bins hold a single index.
pub type Bin = SmallVec<[u32; 2]>;

/// Sparse bag-of-words representation of one image (a "document").
///
/// Maps each visual word present in the image to the indices of the
/// descriptors quantized to it, in the order they were seen. Every descriptor
/// index belongs to exactly one word.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SparseHistogram {
    bins: BTreeMap<Word, Bin>,
    num_descriptors: usize,
}

impl SparseHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append descriptor `index` to the bin of `word`.
    pub fn push(&mut self, word: Word, index: u32) {
        self.bins.entry(word).or_default().push(index);
        self.num_descriptors += 1;
    }

    pub fn get(&self, word: Word) -> Option<&Bin> {
        self.bins.get(&word)
    }

    /// Iterate over `(word, descriptor indices)` by ascending word id.
    pub fn iter(&self) -> impl Iterator<Item = (Word, &Bin)> + '_ {
        self.bins.iter().map(|(w, b)| (*w, b))
    }

    pub fn words(&self) -> impl Iterator<Item = Word> + '_ {
        self.bins.keys().copied()
    }

    /// Number of distinct words.
    pub fn num_words(&self) -> usize {
        self.bins.len()
    }

    pub fn num_descriptors(&self) -> usize {
        self.num_descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Build a histogram from explicit bins, e.g. `[(0, vec![0]), (1, vec![1])]`.
    /// Bins given twice for the same word are concatenated; empty bins are dropped.
    pub fn from_bins<I, B>(bins: I) -> Self
    where
        I: IntoIterator<Item = (Word, B)>,
        B: IntoIterator<Item = u32>,
    {
        let mut h = Self::new();
        for (word, indices) in bins {
            for i in indices {
                h.push(word, i);
            }
        }
        h
    }
}

/// One line of the document map: the words of the document, in ascending order.
impl fmt::Display for SparseHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for word in self.bins.keys() {
            write!(f, "{}, ", word)?;
        }
        write!(f, "]")
    }
}

/// Turns descriptor sets into [`SparseHistogram`]s using a vocabulary.
///
/// Holds no state between calls besides its settings.
pub struct HistogramBuilder<'a, D: Descriptor, const L: usize> {
    voc: &'a Vocabulary<D, L>,
    max_descriptors: Option<usize>,
}

impl<'a, D: Descriptor, const L: usize> HistogramBuilder<'a, D, { L }> {
    pub fn new(voc: &'a Vocabulary<D, L>) -> Self {
        Self {
            voc,
            max_descriptors: None,
        }
    }

    /// Only use the first `n` descriptors of every image. `0` means no limit.
    pub fn max_descriptors(mut self, n: usize) -> Self {
        self.max_descriptors = if n == 0 { None } else { Some(n) };
        self
    }

    /// Quantize every descriptor and record its index under its word.
    pub fn build(&self, features: &[D]) -> SparseHistogram {
        let n = self
            .max_descriptors
            .map_or(features.len(), |max| max.min(features.len()));
        let mut h = SparseHistogram::new();
        for (i, f) in features[..n].iter().enumerate() {
            h.push(self.voc.quantize(f), i as u32);
        }
        h
    }

    /// Build the histograms of many images in parallel. Output order follows input order.
    pub fn build_all<F>(&self, images: &[(DocId, F)]) -> Vec<(DocId, SparseHistogram)>
    where
        F: AsRef<[D]> + Sync,
    {
        images
            .par_iter()
            .map(|(id, features)| (*id, self.build(features.as_ref())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type P = [f32; 1];

    fn line_tree() -> Vocabulary<P, 2> {
        let l0: Vec<P> = vec![[0.], [10.], [20.], [30.]];
        Vocabulary::from_levels(4, &[l0]).unwrap()
    }

    #[test]
    fn build_groups_indices_by_word_in_order() {
        let voc = line_tree();
        let features: Vec<P> = vec![[11.], [1.], [9.], [29.], [-3.], [12.]];
        let h = HistogramBuilder::new(&voc).build(&features);
        assert_eq!(h.num_descriptors(), 6);
        assert_eq!(h.num_words(), 3);
        assert_eq!(h.get(0).unwrap().as_slice(), &[1, 4]);
        assert_eq!(h.get(1).unwrap().as_slice(), &[0, 2, 5]);
        assert_eq!(h.get(3).unwrap().as_slice(), &[3]);
        assert!(h.get(2).is_none());
        assert_eq!(h.to_string(), "[0, 1, 3, ]");
    }

    #[test]
    fn cap_keeps_first_descriptors() {
        let voc = line_tree();
        let features: Vec<P> = vec![[11.], [1.], [9.], [29.]];
        let h = HistogramBuilder::new(&voc).max_descriptors(2).build(&features);
        assert_eq!(h, SparseHistogram::from_bins([(1, vec![0]), (0, vec![1])]));

        let all = HistogramBuilder::new(&voc).max_descriptors(0).build(&features);
        assert_eq!(all.num_descriptors(), 4);
        let over = HistogramBuilder::new(&voc).max_descriptors(100).build(&features);
        assert_eq!(over, all);
    }

    #[test]
    fn empty_descriptor_set() {
        let voc = line_tree();
        let h = HistogramBuilder::new(&voc).build(&[]);
        assert!(h.is_empty());
        assert_eq!(h.num_descriptors(), 0);
    }

    #[test]
    fn build_all_preserves_order() {
        let voc = line_tree();
        let images: Vec<(DocId, Vec<P>)> = (0..20)
            .map(|i| (100 - i, vec![[(i % 4) as f32 * 10.]; i as usize]))
            .collect();
        let docs = HistogramBuilder::new(&voc).build_all(&images);
        assert_eq!(docs.len(), 20);
        for (i, (id, h)) in docs.iter().enumerate() {
            assert_eq!(*id, 100 - i as DocId);
            assert_eq!(h.num_descriptors(), i);
            if i > 0 {
                assert_eq!(h.words().collect::<Vec<_>>(), vec![(i % 4) as Word]);
            }
        }
    }
}
