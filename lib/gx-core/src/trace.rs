//! Call-path propagation
//!
//! A [`TracePath`] encodes the position of a call in the overall call tree:
//! `[1]` is the root frame, `[2, 1]` the first sub-call of the second call made
//! from the root. Paths are advisory and only used for correlating logs.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable call-tree position
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TracePath(Vec<u32>);

impl TracePath {
    pub fn root() -> Self {
        Self(vec![1])
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    /// Derive the path for the next call made from this frame.
    ///
    /// Returns `(child, advanced)`: the child is `self ++ [1]` and `advanced` is
    /// `self` with its last segment incremented, which is where the following
    /// sibling call derives from. An empty path has nothing to advance.
    pub fn derive_child(&self) -> (TracePath, TracePath) {
        let mut child = self.0.clone();
        child.push(1);

        let mut advanced = self.0.clone();
        if let Some(last) = advanced.last_mut() {
            *last = last.saturating_add(1);
        }

        (TracePath(child), TracePath(advanced))
    }
}

impl Default for TracePath {
    fn default() -> Self {
        Self::root()
    }
}

impl From<Vec<u32>> for TracePath {
    fn from(segments: Vec<u32>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for TracePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
            first = false;
        }
        Ok(())
    }
}

/// The active trace path of one frame: the idle instance or one executing
/// invocation.
///
/// Child derivation swaps in the advanced path under a short lock, so two calls
/// issued concurrently from the same frame always receive distinct children.
#[derive(Debug)]
pub struct TraceContext {
    current: Mutex<TracePath>,
}

impl TraceContext {
    pub fn new(path: TracePath) -> Self {
        Self {
            current: Mutex::new(path),
        }
    }

    pub fn root() -> Self {
        Self::new(TracePath::root())
    }

    /// Snapshot of the frame's current path
    pub fn current(&self) -> TracePath {
        self.current.lock().clone()
    }

    /// Path to stamp on the next outbound call from this frame
    pub fn child_path(&self) -> TracePath {
        let mut current = self.current.lock();
        let (child, advanced) = current.derive_child();
        *current = advanced;
        child
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::root()
    }
}
