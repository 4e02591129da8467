//! Parameter values
//!
//! The values a feature is declared with. Each one feeds the feature hash;
//! equal logical values always produce equal contributions.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::hash::{FeatureHash, HashAccumulator, HashInput};

const TAG_FILE: u8 = 0x20;
const TAG_FILE_MISSING: u8 = 0x21;
const TAG_PARAM: u8 = 0x30;

/// A filesystem path together with its modification time at capture
///
/// Both feed the hash, so editing the file on disk yields a new hash
/// the next time the feature is declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PathBuf", into = "PathBuf")]
pub struct FileStamp {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl FileStamp {
    /// Record a path and its current modification time
    pub fn capture(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Self { path, modified }
    }

    /// Build a stamp with an explicit modification time
    pub fn with_modified(path: impl Into<PathBuf>, modified: Option<SystemTime>) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }

    /// The recorded path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded modification time (None if the file did not exist)
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Check whether the file still has the recorded modification time
    pub fn is_current(&self) -> bool {
        Self::capture(self.path.clone()).modified == self.modified
    }
}

impl From<PathBuf> for FileStamp {
    fn from(path: PathBuf) -> Self {
        Self::capture(path)
    }
}

impl From<FileStamp> for PathBuf {
    fn from(stamp: FileStamp) -> Self {
        stamp.path
    }
}

impl HashInput for FileStamp {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_FILE);
        acc.write_bytes(self.path.to_string_lossy().as_bytes());
        match self.modified.map(|t| t.duration_since(UNIX_EPOCH)) {
            Some(Ok(since)) => {
                acc.write_i64(since.as_secs() as i64);
                acc.write_i64(i64::from(since.subsec_nanos()));
            }
            Some(Err(before)) => {
                let before = before.duration();
                acc.write_i64(-(before.as_secs() as i64));
                acc.write_i64(-i64::from(before.subsec_nanos()));
            }
            None => acc.write_tag(TAG_FILE_MISSING),
        }
    }
}

/// A declared parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Scalar
    Number(f64),
    /// Integer (counts, indices)
    Integer(i64),
    /// 3D vector or point
    Vector(DVec3),
    /// 4x4 matrix (placements)
    Matrix(DMat4),
    /// Free text
    Text(String),
    /// Named choice out of a fixed set
    Enum(String),
    /// File on disk with its modification time
    File(FileStamp),
    /// Reference to another feature by hash
    Feature(FeatureHash),
    /// Variable-length sequence
    Sequence(Vec<ParamValue>),
}

impl ParamValue {
    /// Name of the value kind, used in parameter error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            ParamValue::Number(_) => "number",
            ParamValue::Integer(_) => "integer",
            ParamValue::Vector(_) => "vector",
            ParamValue::Matrix(_) => "matrix",
            ParamValue::Text(_) => "text",
            ParamValue::Enum(_) => "enum",
            ParamValue::File(_) => "file",
            ParamValue::Feature(_) => "feature",
            ParamValue::Sequence(_) => "sequence",
        }
    }

    /// Scalar value; integers widen to numbers
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<DVec3> {
        match self {
            ParamValue::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<DMat4> {
        match self {
            ParamValue::Matrix(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Enum choice; plain text is accepted as well
    pub fn as_enum(&self) -> Option<&str> {
        match self {
            ParamValue::Enum(s) | ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileStamp> {
        match self {
            ParamValue::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_feature(&self) -> Option<FeatureHash> {
        match self {
            ParamValue::Feature(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::Sequence(items) => Some(items),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<DVec3> for ParamValue {
    fn from(v: DVec3) -> Self {
        ParamValue::Vector(v)
    }
}

impl From<DMat4> for ParamValue {
    fn from(m: DMat4) -> Self {
        ParamValue::Matrix(m)
    }
}

impl From<FileStamp> for ParamValue {
    fn from(f: FileStamp) -> Self {
        ParamValue::File(f)
    }
}

impl From<FeatureHash> for ParamValue {
    fn from(h: FeatureHash) -> Self {
        ParamValue::Feature(h)
    }
}

impl HashInput for ParamValue {
    fn feed(&self, acc: &mut HashAccumulator) {
        acc.write_tag(TAG_PARAM);
        match self {
            ParamValue::Number(v) => {
                acc.write_tag(0);
                v.feed(acc);
            }
            ParamValue::Integer(v) => {
                acc.write_tag(1);
                v.feed(acc);
            }
            ParamValue::Vector(v) => {
                acc.write_tag(2);
                v.feed(acc);
            }
            ParamValue::Matrix(m) => {
                acc.write_tag(3);
                m.feed(acc);
            }
            ParamValue::Text(s) => {
                acc.write_tag(4);
                s.feed(acc);
            }
            ParamValue::Enum(s) => {
                acc.write_tag(5);
                s.feed(acc);
            }
            ParamValue::File(f) => {
                acc.write_tag(6);
                f.feed(acc);
            }
            ParamValue::Feature(h) => {
                acc.write_tag(7);
                h.feed(acc);
            }
            ParamValue::Sequence(items) => {
                acc.write_tag(8);
                items.feed(acc);
            }
        }
    }
}
