//! Hierarchy builder: turns a flat prefix scan into a nested [`Node`] tree.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::key::{KeyPath, DELIMITER};

/// Maximum length of a [`Node::preview`] before it is truncated.
const PREVIEW_LEN: usize = 72;

/// Decoded shape of a subtree.
///
/// Leaves hold the raw store value; branches map a path segment to a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Leaf(String),
    Branch(BTreeMap<String, Node>),
}

impl Default for Node {
    fn default() -> Self {
        Node::Branch(BTreeMap::new())
    }
}

impl Node {
    pub fn leaf(&self) -> Option<&str> {
        match self {
            Node::Leaf(value) => Some(value),
            Node::Branch(_) => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Leaf(_) => None,
            Node::Branch(children) => Some(children),
        }
    }

    /// Human readable kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Leaf(_) => "leaf",
            Node::Branch(_) => "branch",
        }
    }

    /// True for a branch without children.
    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Branch(children) if children.is_empty())
    }

    /// Look up a descendant by relative path (`redis/timeout`).
    pub fn get(&self, relative: &str) -> Option<&Node> {
        relative
            .split(DELIMITER)
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| node.children()?.get(segment))
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Branch(children) => children.values().map(Node::leaf_count).sum(),
        }
    }

    /// Flatten back into absolute key/value pairs rooted at `base`.
    pub fn flatten(&self, base: &KeyPath) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.flatten_into(base.as_str().trim_end_matches(DELIMITER), &mut out);
        out
    }

    fn flatten_into(&self, path: &str, out: &mut BTreeMap<String, String>) {
        match self {
            Node::Leaf(value) => {
                out.insert(path.to_string(), value.clone());
            }
            Node::Branch(children) => {
                for (segment, child) in children {
                    child.flatten_into(&format!("{path}{DELIMITER}{segment}"), out);
                }
            }
        }
    }

    /// Compact JSON rendering for log lines, truncated with `...`.
    pub fn preview(&self) -> String {
        let mut json = serde_json::to_string(self).unwrap_or_default();
        if json.len() > PREVIEW_LEN {
            let mut cut = PREVIEW_LEN;
            while !json.is_char_boundary(cut) {
                cut -= 1;
            }
            json.truncate(cut);
            json.push_str("...");
        }
        json
    }
}

/// Build a tree from the result of a prefix scan under `base`.
///
/// Keys outside the base or failing [`KeyPath::is_valid`] are dropped. When a
/// segment is both a leaf and the parent of deeper keys, the branch wins.
pub fn build<I, K, V>(base: &KeyPath, kvs: I) -> Node
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let prefix = base.scan_prefix();
    let entries = kvs
        .into_iter()
        .filter_map(|(key, value)| {
            let key = key.as_ref();
            if !KeyPath::is_valid(key) {
                return None;
            }
            let relative = key.strip_prefix(prefix.as_str())?;
            Some((relative.to_string(), value.into()))
        })
        .collect();
    Node::Branch(group(entries))
}

fn group(entries: Vec<(String, String)>) -> BTreeMap<String, Node> {
    let mut children = BTreeMap::new();
    let mut buckets: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();

    for (relative, value) in entries {
        match relative.split_once(DELIMITER) {
            Some((head, rest)) => buckets
                .entry(head.to_string())
                .or_default()
                .push((rest.to_string(), value)),
            None => {
                children.insert(relative, Node::Leaf(value));
            }
        }
    }

    for (head, nested) in buckets {
        children.insert(head, Node::Branch(group(nested)));
    }
    children
}
