//! Feature hashing
//!
//! A [`FeatureHash`] is a pure function of a feature's type tag, its ordered
//! parameters and the hashes of its upstream features. It never depends on
//! the built geometry. [`HashAccumulator`] folds those inputs into one digest.

use std::fmt;
use std::str::FromStr;

use glam::{DMat4, DVec3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xxhash_rust::xxh3::{Xxh3, xxh3_128};

use crate::constants::HASH_PRECISION;

/// A 128-bit feature fingerprint computed with XXH3
///
/// Serialized as a 32-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureHash([u8; 16]);

impl FeatureHash {
    /// Hash an arbitrary byte slice
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxh3_128(data).to_le_bytes())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Shard index for a table of `shards` buckets
    pub(crate) fn shard(&self, shards: usize) -> usize {
        let low = u64::from_le_bytes([
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5], self.0[6], self.0[7],
        ]);
        (low % shards.max(1) as u64) as usize
    }
}

impl fmt::Display for FeatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for FeatureHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.is_ascii() {
            return Err(format!("expected 32 hex digits, got '{s}'"));
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|e| format!("invalid hash '{s}': {e}"))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for FeatureHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FeatureHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for FeatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeatureHash({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

// Discriminators written before every value so that different value kinds
// with the same byte payload never collide.
const TAG_KIND: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;
const TAG_STR: u8 = 0x05;
const TAG_VEC3: u8 = 0x06;
const TAG_MAT4: u8 = 0x07;
const TAG_HASH: u8 = 0x08;
const TAG_SEQ: u8 = 0x09;
const TAG_NONE: u8 = 0x0a;
const TAG_SOME: u8 = 0x0b;
const TAG_UINT: u8 = 0x0c;

/// Values that can be folded into a [`HashAccumulator`]
pub trait HashInput {
    /// Append this value's contribution
    fn feed(&self, acc: &mut HashAccumulator);
}

/// Order-sensitive digest builder for one feature
///
/// Calls to [`combine`](Self::combine) must follow the feature's canonical
/// declaration order. [`finish`](Self::finish) consumes the accumulator.
pub struct HashAccumulator {
    hasher: Xxh3,
}

impl HashAccumulator {
    /// Start a digest for a feature of the given type tag
    pub fn new(kind: &str) -> Self {
        let mut acc = Self {
            hasher: Xxh3::new(),
        };
        acc.write_tag(TAG_KIND);
        acc.write_len(kind.len());
        acc.hasher.update(kind.as_bytes());
        acc
    }

    /// Append one parameter's contribution
    pub fn combine<T: HashInput + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.feed(self);
        self
    }

    /// Finalize the digest
    pub fn finish(self) -> FeatureHash {
        FeatureHash(self.hasher.digest128().to_le_bytes())
    }

    pub(crate) fn write_tag(&mut self, tag: u8) {
        self.hasher.update(&[tag]);
    }

    pub(crate) fn write_len(&mut self, len: usize) {
        self.hasher.update(&(len as u64).to_le_bytes());
    }

    pub(crate) fn write_i64(&mut self, value: i64) {
        self.hasher.update(&value.to_le_bytes());
    }

    pub(crate) fn write_u64(&mut self, value: u64) {
        self.hasher.update(&value.to_le_bytes());
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.hasher.update(bytes);
    }

    /// Quantised float; `-0.0` folds to `0.0` and every NaN folds to one value
    pub(crate) fn write_f64(&mut self, value: f64) {
        let bits = if value.is_nan() {
            f64::NAN.to_bits()
        } else {
            let q = (value * HASH_PRECISION).round();
            if q == 0.0 { 0u64 } else { q.to_bits() }
        };
        self.hasher.update(&bits.to_le_bytes());
    }
}

// Signed and unsigned integers hash in separate domains, so `u64::MAX`
// and `-1` stay distinct.
macro_rules! impl_hash_input_int {
    ($tag:expr, $write:ident as $wide:ty: $($t:ty),*) => {
        $(
            impl HashInput for $t {
                fn feed(&self, acc: &mut HashAccumulator) {
                    acc.write_tag($tag);
                    acc.$write(*self as $wide);
                }
            }
        )*
    };
}

impl_hash_input_int!(TAG_INT, write_i64 as i64: i8, i16, i32, i64, isize);
impl_hash_input_int!(TAG_UINT, write_u64 as u64: u8, u16, u32, u64, usize);

impl HashInput for f64 {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_FLOAT);
        acc.write_f64(*self);
    }
}

impl HashInput for f32 {
    fn feed(&self, acc: &mut HashAccumulator) {
        f64::from(*self).feed(acc);
    }
}

impl HashInput for bool {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_BOOL);
        acc.write_i64(i64::from(*self));
    }
}

impl HashInput for str {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_STR);
        acc.write_bytes(self.as_bytes());
    }
}

impl HashInput for String {
    fn feed(&self, acc: &mut HashAccumulator) {
        self.as_str().feed(acc);
    }
}

impl HashInput for DVec3 {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_VEC3);
        for v in self.to_array() {
            acc.write_f64(v);
        }
    }
}

impl HashInput for DMat4 {
    fn feed(&self, acc: &mut HashAccumulator) {
        // Column-major, matching glam's storage order
        acc.write_tag(TAG_MAT4);
        for v in self.to_cols_array() {
            acc.write_f64(v);
        }
    }
}

impl HashInput for FeatureHash {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_HASH);
        acc.hasher.update(&self.0);
    }
}

impl<T: HashInput> HashInput for [T] {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_SEQ);
        acc.write_len(self.len());
        for item in self {
            item.feed(acc);
        }
    }
}

impl<T: HashInput> HashInput for Vec<T> {
    fn feed(&self, acc: &mut HashAccumulator) {
        self.as_slice().feed(acc);
    }
}

impl<T: HashInput> HashInput for Option<T> {
    fn feed(&self, acc: &mut HashAccumulator) {
        match self {
            Some(value) => {
                acc.write_tag(TAG_SOME);
                value.feed(acc);
            }
            None => acc.write_tag(TAG_NONE),
        }
    }
}

impl<T: HashInput + ?Sized> HashInput for &T {
    fn feed(&self, acc: &mut HashAccumulator) {
        (**self).feed(acc);
    }
}
