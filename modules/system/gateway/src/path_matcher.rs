//! Hierarchical path index mapping request paths to policy values.
//!
//! Exact registrations are checked first through a direct map lookup. Prefix
//! matching then walks the registered prefix lengths of each level in
//! descending order, so the longest registered prefix wins; a prefix only
//! matches on a `/` boundary. A `*` path component registers a nested
//! sub-tree: the wildcard swallows one or more characters of the request path
//! up to a `/` boundary, longest candidate first, which keeps overlapping
//! nested prefixes deterministic. Registering `"/"` sets the default handler
//! returned when nothing else matches.
//!
//! Writers synchronize externally; matching takes `&self`.

use std::collections::HashMap;

use thiserror::Error;

const PATH_SEPARATOR: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathMatcherError {
    #[error("path not specified")]
    EmptyPath,
}

/// Result of a successful match: the matched prefix, the rest of the request
/// path, and the registered value.
#[derive(Debug, PartialEq, Eq)]
pub struct PathMatch<'p, 'v, T> {
    pub matched: &'p str,
    pub remaining: &'p str,
    pub value: &'v T,
}

#[derive(Debug)]
struct PrefixNode<T> {
    value: Option<T>,
    /// Sub-tree for the path tail after a `*` component.
    sub: Option<PrefixLevel<T>>,
}

impl<T> Default for PrefixNode<T> {
    fn default() -> Self {
        Self {
            value: None,
            sub: None,
        }
    }
}

#[derive(Debug)]
struct PrefixLevel<T> {
    /// Registered prefix lengths, longest first.
    lengths: Vec<usize>,
    nodes: HashMap<String, PrefixNode<T>>,
}

impl<T> Default for PrefixLevel<T> {
    fn default() -> Self {
        Self {
            lengths: Vec::new(),
            nodes: HashMap::new(),
        }
    }
}

impl<T> PrefixLevel<T> {
    fn insert(&mut self, path: &str, value: T) {
        match split_at_wildcard(path) {
            None => {
                self.nodes.entry(path.to_owned()).or_default().value = Some(value);
            }
            Some((head, tail)) => {
                let node = self.nodes.entry(head.to_owned()).or_default();
                node.sub.get_or_insert_default().insert(tail, value);
            }
        }
        self.rebuild_lengths();
    }

    fn remove(&mut self, path: &str) {
        match split_at_wildcard(path) {
            None => {
                if let Some(node) = self.nodes.get_mut(path) {
                    node.value = None;
                    if node.sub.is_none() {
                        self.nodes.remove(path);
                    }
                }
            }
            Some((head, tail)) => {
                if let Some(node) = self.nodes.get_mut(head) {
                    if let Some(sub) = &mut node.sub {
                        sub.remove(tail);
                        if sub.nodes.is_empty() {
                            node.sub = None;
                        }
                    }
                    if node.value.is_none() && node.sub.is_none() {
                        self.nodes.remove(head);
                    }
                }
            }
        }
        self.rebuild_lengths();
    }

    fn rebuild_lengths(&mut self) {
        let mut lengths: Vec<usize> = self.nodes.keys().map(String::len).collect();
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        lengths.dedup();
        self.lengths = lengths;
    }

    /// Returns the number of request-path characters consumed and the value.
    fn find(&self, path: &str) -> Option<(usize, &T)> {
        for &length in &self.lengths {
            if length == path.len() {
                if let Some(node) = self.nodes.get(path)
                    && let Some(value) = &node.value
                {
                    return Some((length, value));
                }
            } else if length < path.len() && path.as_bytes()[length] == b'/' {
                if let Some(node) = self.nodes.get(&path[..length]) {
                    // A deeper sub-tree is more specific than this node's value.
                    if let Some(sub) = &node.sub
                        && let Some((consumed, value)) = match_wildcard(sub, &path[length..])
                    {
                        return Some((length + consumed, value));
                    }
                    if let Some(value) = &node.value {
                        return Some((length, value));
                    }
                }
            }
        }
        None
    }
}

/// The wildcard consumes one or more characters of `suffix` (which starts
/// with `/`) up to a candidate `/` boundary; longer candidates are tried
/// first so the most specific registration wins.
fn match_wildcard<'v, T>(sub: &'v PrefixLevel<T>, suffix: &str) -> Option<(usize, &'v T)> {
    let bytes = suffix.as_bytes();
    for boundary in (1..bytes.len()).rev() {
        if bytes[boundary] == b'/'
            && let Some((consumed, value)) = sub.find(&suffix[boundary..])
        {
            return Some((boundary + consumed, value));
        }
    }
    None
}

/// Split a registered path at its first interior `*` component:
/// `/a/*/b` becomes `("/a", "/b")`. A trailing `/*` is plain prefix syntax
/// and does not split.
fn split_at_wildcard(path: &str) -> Option<(&str, &str)> {
    let mut search_from = 0;
    while let Some(offset) = path[search_from..].find("/*") {
        let start = search_from + offset;
        let after = start + 2;
        if after == path.len() {
            // trailing "/*": prefix syntax, handled by the caller
            return None;
        }
        if path.as_bytes()[after] == b'/' {
            return Some((&path[..start], &path[after..]));
        }
        // a segment merely starting with '*' (e.g. "/*x") is literal
        search_from = after;
    }
    None
}

/// Generic hierarchical path-to-value matcher.
#[derive(Debug)]
pub struct PathMatcher<T> {
    default_handler: Option<T>,
    exact: HashMap<String, T>,
    prefix: PrefixLevel<T>,
}

impl<T> Default for PathMatcher<T> {
    fn default() -> Self {
        Self {
            default_handler: None,
            exact: HashMap::new(),
            prefix: PrefixLevel::default(),
        }
    }
}

impl<T> PathMatcher<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prefix path. Matching happens on `/` boundaries, so `/foo`
    /// matches `/foo` and `/foo/bar` but not `/foobar`. A trailing `/*` is
    /// equivalent to the bare prefix; an interior `*` component matches one
    /// or more path segments. Registering `"/"` replaces the default handler.
    ///
    /// # Errors
    ///
    /// [`PathMatcherError::EmptyPath`] for an empty path.
    pub fn add_prefix_path(&mut self, path: &str, value: T) -> Result<(), PathMatcherError> {
        if path.is_empty() {
            return Err(PathMatcherError::EmptyPath);
        }
        let path = path.strip_suffix("/*").unwrap_or(path);
        if path.is_empty() || path == PATH_SEPARATOR {
            self.default_handler = Some(value);
            return Ok(());
        }
        self.prefix.insert(path, value);
        Ok(())
    }

    /// Register an exact path; exact matches take precedence over prefixes.
    ///
    /// # Errors
    ///
    /// [`PathMatcherError::EmptyPath`] for an empty path.
    pub fn add_exact_path(&mut self, path: &str, value: T) -> Result<(), PathMatcherError> {
        if path.is_empty() {
            return Err(PathMatcherError::EmptyPath);
        }
        self.exact.insert(path.to_owned(), value);
        Ok(())
    }

    /// Remove a prefix registration. Removing `"/"` clears the default
    /// handler.
    ///
    /// # Errors
    ///
    /// [`PathMatcherError::EmptyPath`] for an empty path.
    pub fn remove_prefix_path(&mut self, path: &str) -> Result<(), PathMatcherError> {
        if path.is_empty() {
            return Err(PathMatcherError::EmptyPath);
        }
        let path = path.strip_suffix("/*").unwrap_or(path);
        if path.is_empty() || path == PATH_SEPARATOR {
            self.default_handler = None;
            return Ok(());
        }
        self.prefix.remove(path);
        Ok(())
    }

    /// # Errors
    ///
    /// [`PathMatcherError::EmptyPath`] for an empty path.
    pub fn remove_exact_path(&mut self, path: &str) -> Result<(), PathMatcherError> {
        if path.is_empty() {
            return Err(PathMatcherError::EmptyPath);
        }
        self.exact.remove(path);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.default_handler = None;
        self.exact.clear();
        self.prefix = PrefixLevel::default();
    }

    #[must_use]
    pub fn get_exact_path(&self, path: &str) -> Option<&T> {
        self.exact.get(path)
    }

    /// Match a request path. Exact first, then longest registered prefix,
    /// then the default handler with the full path as remainder. `None` only
    /// when nothing matched and no default handler is set.
    #[must_use]
    pub fn match_path<'p>(&self, path: &'p str) -> Option<PathMatch<'p, '_, T>> {
        if !self.exact.is_empty()
            && let Some(value) = self.exact.get(path)
        {
            return Some(PathMatch {
                matched: path,
                remaining: "",
                value,
            });
        }
        if let Some((consumed, value)) = self.prefix.find(path) {
            return Some(PathMatch {
                matched: &path[..consumed],
                remaining: &path[consumed..],
                value,
            });
        }
        self.default_handler.as_ref().map(|value| PathMatch {
            matched: "",
            remaining: path,
            value,
        })
    }
}
