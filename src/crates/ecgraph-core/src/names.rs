//! The qualified-name protocol.
//!
//! Values flowing through a graph are addressed by dotted names of the form
//! `subgraph_path.node_id.output_label`. The last segment is the output
//! label, the segment before it the owning node, and any leading segments a
//! path of enclosing subgraphs. A two-segment name such as `external.text`
//! therefore resolves to a single-segment producer id (`external`), which is
//! how a graph's external-input namespace is addressed.

use regex::Regex;
use std::sync::OnceLock;

/// Grammar for qualified names: `segment(.segment)+` with word-character
/// segments.
const QUALIFIED_NAME_PATTERN: &str = r"^(([A-Za-z0-9_]+)\.)+([A-Za-z0-9_]+)$";

fn qualified_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(QUALIFIED_NAME_PATTERN).expect("static pattern compiles"))
}

/// True iff `name` is a well-formed qualified output name (two or more
/// dot-separated word segments).
pub fn is_valid_qualified_name(name: &str) -> bool {
    qualified_name_regex().is_match(name)
}

/// The producer node id of a qualified name: every segment but the last,
/// rejoined. `None` for malformed names.
pub fn node_id_of(name: &str) -> Option<String> {
    if !is_valid_qualified_name(name) {
        return None;
    }
    let (node_id, _) = name.rsplit_once('.')?;
    Some(node_id.to_string())
}

/// The output label of a qualified name: its last segment. `None` for
/// malformed names.
pub fn output_label_of(name: &str) -> Option<&str> {
    if !is_valid_qualified_name(name) {
        return None;
    }
    name.rsplit('.').next()
}

/// True when a node id is itself dotted, i.e. the reference crosses into a
/// nested subgraph.
pub fn has_subgraph_prefix(node_id: &str) -> bool {
    qualified_name_regex().is_match(node_id)
}

/// Split a subgraph-qualified node id into the leading subgraph id and the
/// remainder. `None` when there is no subgraph prefix.
pub fn split_subgraph(node_id: &str) -> Option<(&str, &str)> {
    if !has_subgraph_prefix(node_id) {
        return None;
    }
    node_id.split_once('.')
}

/// Drop the leading subgraph segment from a qualified name.
pub fn strip_subgraph(name: &str) -> &str {
    match name.split_once('.') {
        Some((_, rest)) => rest,
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_qualified_name("node.output"));
        assert!(is_valid_qualified_name("graph_1.node_2.out"));
        assert!(is_valid_qualified_name("a.b.c.d"));
    }

    #[test]
    fn test_invalid_names() {
        assert!(!is_valid_qualified_name(""));
        assert!(!is_valid_qualified_name("plain"));
        assert!(!is_valid_qualified_name(".leading"));
        assert!(!is_valid_qualified_name("trailing."));
        assert!(!is_valid_qualified_name("a..b"));
        assert!(!is_valid_qualified_name("a.b c"));
    }

    #[test]
    fn test_node_id_and_label() {
        assert_eq!(node_id_of("A.value").as_deref(), Some("A"));
        assert_eq!(output_label_of("A.value"), Some("value"));
        assert_eq!(node_id_of("sub.node.out").as_deref(), Some("sub.node"));
        assert_eq!(output_label_of("sub.node.out"), Some("out"));
        assert!(node_id_of("invalid").is_none());
        assert!(output_label_of("invalid").is_none());
    }

    #[test]
    fn test_subgraph_prefix_detection() {
        assert!(!has_subgraph_prefix("node"));
        assert!(has_subgraph_prefix("sub.node"));
        assert!(has_subgraph_prefix("outer.inner.node"));
    }

    #[test]
    fn test_split_and_strip() {
        assert_eq!(split_subgraph("sub.node"), Some(("sub", "node")));
        assert_eq!(split_subgraph("a.b.c"), Some(("a", "b.c")));
        assert!(split_subgraph("node").is_none());
        assert_eq!(strip_subgraph("sub.node.out"), "node.out");
        assert_eq!(strip_subgraph("plain"), "plain");
    }
}
