#[cfg(feature = "bincode")]
use bincode;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, ToSmallVec};
use std::{fmt, marker::PhantomData};

use crate::*;

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
/// Pre-trained vocabulary tree over descriptors of type `D`, at most `L` levels deep. Can be:
/// 1. Assembled from level-ordered centroids of a complete k-ary tree.
/// 2. Saved to a file & loaded from a file (requires bincode feature, enabled by default).
/// 3. Used to quantize descriptors into visual words (and optionally get the
///    path of tree nodes each descriptor visited).
///
/// The vocabulary is immutable once built; share it by reference between threads.
pub struct Vocabulary<D: Descriptor, const L: usize> {
    blocks: Vec<Block<D::Elem, L>>,
    k: usize,
    dim: usize,
    num_blocks: usize,
    num_leaves: usize,
    #[serde(skip)]
    _desc: PhantomData<fn() -> D>,
}

/// Vocabulary API
impl<D: Descriptor, const L: usize> Vocabulary<D, { L }> {
    /// Map a descriptor to its visual word by descending the tree, picking the
    /// nearest child centroid at every level.
    pub fn quantize(&self, feature: &D) -> Word {
        word_of(self.descend(feature))
    }

    /// Same as [`Vocabulary::quantize`], also returning the ids of the internal
    /// nodes visited below the root. `path[j]` is the node matching the feature
    /// at level `j + 1`, the last entry is the word id itself.
    pub fn quantize_with_path(&self, feature: &D) -> (Word, SmallVec<[usize; L]>) {
        let path = self.descend(feature);
        (word_of(path), path.clone())
    }

    /// Build a complete tree with branching factor `k` from level-ordered centroids.
    ///
    /// `levels[l]` holds the `k^(l+1)` centroids of level `l`, children of the same
    /// parent being contiguous. Words are the centroids of the last level, in order.
    pub fn from_levels(k: usize, levels: &[Vec<D>]) -> BowResult<Self> {
        let depth = levels.len();
        if k == 0 || depth == 0 {
            return Err(BowErr::MalformedTree(format!(
                "branching factor {} with {} levels",
                k, depth
            )));
        }
        if depth > L {
            return Err(BowErr::MalformedTree(format!(
                "{} levels exceed the supported maximum of {}",
                depth, L
            )));
        }
        let mut expected = 1;
        for (l, centroids) in levels.iter().enumerate() {
            expected *= k;
            if centroids.len() != expected {
                return Err(BowErr::MalformedTree(format!(
                    "level {} has {} centroids, expected {}",
                    l,
                    centroids.len(),
                    expected
                )));
            }
        }

        // Block ids of the first internal node at each level, root is block 0
        let mut first_block = vec![0; depth];
        let mut next = 1;
        for (l, first) in first_block.iter_mut().enumerate().take(depth - 1) {
            *first = next;
            next += levels[l].len();
        }

        let child_id = |level: usize, index: usize| -> NodeId<L> {
            if level + 1 == depth {
                let mut path: SmallVec<[usize; L]> = SmallVec::new();
                for m in 0..level {
                    path.push(first_block[m] + index / k.pow((level - m) as u32));
                }
                path.push(index);
                NodeId::Leaf(path)
            } else {
                NodeId::Block(first_block[level] + index)
            }
        };

        let mut v = Self::empty(k);
        v.num_leaves = levels[depth - 1].len();
        v.blocks.push(Block::new(0, &levels[0], (0..k).map(|i| child_id(0, i)).collect()));
        for l in 0..(depth - 1) {
            for (j, group) in levels[l + 1].chunks(k).enumerate() {
                let ids = (j * k..(j + 1) * k).map(|i| child_id(l + 1, i)).collect();
                v.blocks.push(Block::new(first_block[l] + j, group, ids));
            }
        }
        v.num_blocks = v.blocks.len();
        v.validate()?;

        Ok(v)
    }

    /// Load a vocabulary from a file. The tree structure is validated before use.
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let mut file = std::fs::File::open(file)?;
        let mut buffer: Vec<u8> = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut buffer)?;
        let v: Self = bincode::deserialize(&buffer)?;
        v.validate()?;
        tracing::info!(
            "Loaded vocabulary tree: {} words, {} levels, branching factor {}",
            v.words(),
            v.levels(),
            v.splits()
        );
        Ok(v)
    }

    /// Save vocabulary to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        let serialized = bincode::serialize(&self)?;
        let mut file = std::fs::File::create(file)?;
        std::io::Write::write_all(&mut file, &serialized)?;
        Ok(())
    }

    /// Number of visual words (leaves).
    pub fn words(&self) -> usize {
        self.num_leaves
    }

    /// Branching factor.
    pub fn splits(&self) -> usize {
        self.k
    }

    /// Depth of the deepest leaf.
    pub fn levels(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| b.children.ids.iter())
            .filter_map(|id| match id {
                NodeId::Leaf(path) => Some(path.len()),
                NodeId::Block(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Number of internal nodes, root included.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }
}

/////////////////////                Helpers                 ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
/// A unit representing a non-leaf node in the vocabulary
struct Block<E, const L: usize> {
    id: NodeId<L>,
    children: Children<E, L>,
}

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Data structure representing the child nodes of a block, which may
/// or may not be leaves. Centroids are stored back to back, `dim` elements each.
struct Children<E, const L: usize> {
    features: Vec<E>,
    ids: Vec<NodeId<L>>,
}

#[derive(Debug, Clone, PartialEq)]
/// Unique identifier for a node. The Leaf variant stores ids of all its parents
/// below the root, followed by the word id.
enum NodeId<const L: usize> {
    Block(usize),
    Leaf(SmallVec<[usize; L]>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum SerializableNodeId {
    Block(usize),
    Leaf(Vec<usize>),
}

impl<const L: usize> Serialize for NodeId<{ L }> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let ser = match self {
            NodeId::Block(id) => SerializableNodeId::Block(*id),
            NodeId::Leaf(l_id) => SerializableNodeId::Leaf(l_id.to_vec()),
        };

        ser.serialize(serializer)
    }
}
impl<'de, const L: usize> Deserialize<'de> for NodeId<{ L }> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let ser = SerializableNodeId::deserialize(deserializer)?;

        Ok(match ser {
            SerializableNodeId::Block(id) => NodeId::Block(id),
            SerializableNodeId::Leaf(l_id) => NodeId::Leaf(l_id.to_smallvec()),
        })
    }
}

impl<E: Copy, const L: usize> Block<E, L> {
    fn new<D: Descriptor<Elem = E>>(id: usize, centroids: &[D], ids: Vec<NodeId<L>>) -> Self {
        let features = centroids.iter().flat_map(|c| c.elems().iter().copied()).collect();
        Self {
            id: NodeId::Block(id),
            children: Children { features, ids },
        }
    }
}

/// Leaf paths are validated to be non-empty when the vocabulary is built or loaded.
#[inline]
fn word_of<const L: usize>(path: &SmallVec<[usize; L]>) -> Word {
    path[path.len() - 1] as Word
}

impl<D: Descriptor, const L: usize> Vocabulary<D, { L }> {
    fn descend(&self, feature: &D) -> &SmallVec<[usize; L]> {
        let feature = feature.elems();

        // start at root block
        let mut block = &self.blocks[0];

        // traverse tree
        loop {
            let mut best_child: (f32, usize) = (f32::INFINITY, 0);
            for (child, centroid) in block.children.features.chunks_exact(self.dim).enumerate() {
                let d = D::distance(feature, centroid);
                if d < best_child.0 {
                    best_child = (d, child)
                }
            }
            match &block.children.ids[best_child.1] {
                NodeId::Block(id) => {
                    block = &self.blocks[*id];
                }
                NodeId::Leaf(path) => return path,
            }
        }
    }

    /// Check that the node structure forms a proper tree whose leaves number the
    /// words `0..num_leaves` exactly once, so traversal can never go astray.
    fn validate(&self) -> BowResult<()> {
        let malformed = |msg: String| Err(BowErr::MalformedTree(msg));

        if self.dim != D::DIM {
            return Err(BowErr::DimensionMismatch {
                expected: self.dim,
                found: D::DIM,
            });
        }
        if self.dim == 0 {
            return malformed("descriptors have no elements".into());
        }
        if self.k == 0 || self.blocks.is_empty() || self.num_leaves == 0 {
            return malformed("empty tree".into());
        }
        if self.num_blocks != self.blocks.len() {
            return malformed(format!(
                "{} blocks declared, {} stored",
                self.num_blocks,
                self.blocks.len()
            ));
        }

        let mut referenced = vec![0usize; self.blocks.len()];
        let mut depth = vec![0usize; self.blocks.len()];
        let mut parent = vec![0usize; self.blocks.len()];
        let mut seen_words = vec![false; self.num_leaves];
        for (i, block) in self.blocks.iter().enumerate() {
            if block.id != NodeId::Block(i) {
                return malformed(format!("block {} is stored out of order", i));
            }
            let n = block.children.ids.len();
            if n == 0 || n > self.k {
                return malformed(format!(
                    "block {} has {} children, branching factor is {}",
                    i, n, self.k
                ));
            }
            if block.children.features.len() != n * self.dim {
                return malformed(format!("block {} has inconsistent centroid data", i));
            }
            if i > 0 && referenced[i] != 1 {
                return malformed(format!("block {} is not reachable from the root", i));
            }
            for id in block.children.ids.iter() {
                match id {
                    NodeId::Block(c) => {
                        // children are always stored after their parent, which rules out cycles
                        if *c <= i || *c >= self.blocks.len() {
                            return malformed(format!("block {} links to invalid block {}", i, c));
                        }
                        referenced[*c] += 1;
                        depth[*c] = depth[i] + 1;
                        parent[*c] = i;
                    }
                    NodeId::Leaf(path) => {
                        let level = depth[i] + 1;
                        if level > L {
                            return malformed(format!(
                                "leaf at level {} exceeds the supported maximum of {}",
                                level, L
                            ));
                        }
                        // ancestors below the root, walked back from block i
                        let mut ancestor = i;
                        let consistent = path.len() == level
                            && path[..level - 1].iter().rev().all(|&b| {
                                let on_chain = b == ancestor;
                                ancestor = parent[ancestor];
                                on_chain
                            });
                        if !consistent {
                            return malformed(format!("leaf under block {} has an inconsistent path", i));
                        }
                        let word = path[level - 1];
                        match seen_words.get_mut(word) {
                            Some(seen) if !*seen => *seen = true,
                            Some(_) => return malformed(format!("word {} appears twice", word)),
                            None => {
                                return malformed(format!(
                                    "word {} is outside the {} words of the tree",
                                    word, self.num_leaves
                                ))
                            }
                        }
                    }
                }
            }
        }
        if depth.iter().any(|&d| d + 1 > L) {
            return malformed(format!("tree is deeper than the supported {} levels", L));
        }
        if let Some(word) = seen_words.iter().position(|seen| !seen) {
            return malformed(format!("word {} has no leaf", word));
        }
        Ok(())
    }

    fn empty(k: usize) -> Self {
        Self {
            blocks: Vec::new(),
            k,
            dim: D::DIM,
            num_blocks: 0,
            num_leaves: 0,
            _desc: PhantomData,
        }
    }
}

impl<D: Descriptor, const L: usize> Clone for Vocabulary<D, { L }> {
    fn clone(&self) -> Self {
        Self {
            blocks: self.blocks.clone(),
            k: self.k,
            dim: self.dim,
            num_blocks: self.num_blocks,
            num_leaves: self.num_leaves,
            _desc: PhantomData,
        }
    }
}

impl<D: Descriptor, const L: usize> PartialEq for Vocabulary<D, { L }> {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks
            && self.k == other.k
            && self.dim == other.dim
            && self.num_blocks == other.num_blocks
            && self.num_leaves == other.num_leaves
    }
}

impl<E, const L: usize> fmt::Debug for Children<E, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Children").field("ids", &self.ids).finish()
    }
}

impl<D: Descriptor, const L: usize> fmt::Debug for Vocabulary<D, { L }> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocabulary")
            .field("Word/Leaf Nodes", &self.num_leaves)
            .field("Other Nodes", &self.num_blocks)
            .field("Levels", &self.levels())
            .field("Max Levels", &L)
            .field("Branching Factor", &self.k)
            .field("Descriptor Dimension", &self.dim)
            .finish()
    }
}
