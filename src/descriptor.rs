use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// A fixed-dimension local feature descriptor.
///
/// The vocabulary stores centroids as flat arrays of [`Descriptor::Elem`], so
/// distances are defined over element slices of length [`Descriptor::DIM`].
pub trait Descriptor: Send + Sync {
    type Elem: Copy + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Number of elements in one descriptor.
    const DIM: usize;

    fn elems(&self) -> &[Self::Elem];

    /// Distance used both for tree traversal and correspondence scoring.
    /// Smaller is closer.
    fn distance(a: &[Self::Elem], b: &[Self::Elem]) -> f32;
}

/// Binary descriptor compared with the Hamming distance (ORB, BRIEF, ...).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Binary<const N: usize>(pub [u8; N]);

/// 256-bit ORB descriptor.
pub type Orb = Binary<32>;

/// SIFT descriptor with unsigned char elements.
pub type Sift = [u8; 128];

/// SIFT descriptor with float elements.
pub type SiftFloat = [f32; 128];

impl<const N: usize> Descriptor for Binary<N> {
    type Elem = u8;
    const DIM: usize = N;

    fn elems(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    fn distance(a: &[u8], b: &[u8]) -> f32 {
        hamming(a, b) as f32
    }
}

impl<const N: usize> Descriptor for [u8; N] {
    type Elem = u8;
    const DIM: usize = N;

    fn elems(&self) -> &[u8] {
        self
    }

    #[inline]
    fn distance(a: &[u8], b: &[u8]) -> f32 {
        a.iter()
            .zip(b)
            .fold(0u64, |acc, (&x, &y)| {
                let d = x as i64 - y as i64;
                acc + (d * d) as u64
            }) as f32
    }
}

impl<const N: usize> Descriptor for [f32; N] {
    type Elem = f32;
    const DIM: usize = N;

    fn elems(&self) -> &[f32] {
        self
    }

    #[inline]
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).fold(0., |acc, (x, y)| acc + (x - y) * (x - y))
    }
}

#[inline]
/// Hamming distance between two binary arrays (descriptors).
fn hamming(x: &[u8], y: &[u8]) -> u32 {
    x.iter()
        .zip(y)
        .fold(0, |a, (b, c)| a + (*b ^ *c).count_ones())
}

impl<const N: usize> fmt::Debug for Binary<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl<const N: usize> From<[u8; N]> for Binary<N> {
    fn from(bytes: [u8; N]) -> Self {
        Binary(bytes)
    }
}

#[derive(Serialize, Deserialize)]
struct BinaryBytes(Vec<u8>);

impl<const N: usize> Serialize for Binary<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        BinaryBytes(self.0.to_vec()).serialize(serializer)
    }
}

impl<'de, const N: usize> Deserialize<'de> for Binary<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let BinaryBytes(bytes) = BinaryBytes::deserialize(deserializer)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map(Binary)
            .map_err(|_| serde::de::Error::invalid_length(len, &"a binary descriptor of fixed size"))
    }
}
