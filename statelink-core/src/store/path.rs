//! Store paths.
//!
//! A path addresses one field of a stored value. Paths are written as dotted
//! strings (`"context.items.0.name"`); all-digit segments are array indexes.
//! Object keys that happen to be all digits normalize to the same segment, so
//! a reader and the reconcile walk always agree on a field's identity.

use std::fmt;

use serde_json::Value;
use smallvec::SmallVec;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// Segment for an object key.
    pub fn key(key: &str) -> Self {
        let canonical = key.bytes().all(|b| b.is_ascii_digit())
            && (key == "0" || !key.starts_with('0'));
        match key.parse::<usize>() {
            Ok(index) if canonical => Segment::Index(index),
            _ => Segment::Key(key.to_owned()),
        }
    }

    fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match (self, value) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Address of a field inside a stored value. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(SmallVec<[Segment; 4]>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path. Empty segments are skipped, so `""` and `"."`
    /// are both the root.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|segment| !segment.is_empty())
                .map(Segment::key)
                .collect(),
        )
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.0.pop()
    }

    /// A new path one segment below this one.
    pub fn child(&self, segment: Segment) -> Self {
        let mut child = self.clone();
        child.push(segment);
        child
    }

    /// `other` appended below this path.
    pub fn join(&self, other: &Path) -> Self {
        let mut joined = self.clone();
        joined.0.extend(other.0.iter().cloned());
        joined
    }

    /// Whether `self` lies inside the subtree rooted at `prefix`.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Look the path up inside `value`.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, segment| segment.lookup(current))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Path::parse(path)
    }
}

impl From<&String> for Path {
    fn from(path: &String) -> Self {
        Path::parse(path)
    }
}

impl From<&Path> for Path {
    fn from(path: &Path) -> Self {
        path.clone()
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
