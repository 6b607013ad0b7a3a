//! Hierarchical state persistence.
//!
//! The mixture engine and its candidates never commit to a serialization
//! technology. They talk to an abstract cursor: a [`StateWriter`] that builds
//! an ordered tree of named nodes and scalar fields, and a [`StateReader`]
//! that walks one. [`StateNode`] is the in-memory tree both sides share; hosts
//! that want a concrete wire format can ship it through `serde`.

use itertools::Itertools;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// One element of a persisted document: either an internal node with ordered
/// children or a leaf field carrying a scalar value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StateNode>,
}

impl StateNode {
    /// An internal node with no children yet.
    pub fn node(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: None,
            children: Vec::new(),
        }
    }

    /// A leaf field holding a scalar.
    pub fn field(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: Some(value.to_owned()),
            children: Vec::new(),
        }
    }
}

/// Write half of the persistence cursor.
pub trait StateWriter {
    /// Open a child node and descend into it.
    fn open_node(&mut self, name: &str);
    /// Append a scalar field to the current node.
    fn write_field(&mut self, name: &str, value: &str);
    /// Close the current node and ascend.
    fn close_node(&mut self);
}

/// Read half of the persistence cursor.
///
/// The cursor starts positioned at the document root. `enter` descends to the
/// first child, `advance` moves across siblings, `leave` returns to the
/// parent. All three report whether the move happened.
pub trait StateReader {
    /// Name of the current element.
    fn name(&self) -> &str;
    /// Scalar value of the current element, if it is a leaf field.
    fn value(&self) -> Option<&str>;
    /// Descend to the first child of the current element.
    fn enter(&mut self) -> bool;
    /// Move to the next sibling of the current element.
    fn advance(&mut self) -> bool;
    /// Ascend to the parent of the current element.
    fn leave(&mut self) -> bool;
}

/// Builds a [`StateNode`] tree through the [`StateWriter`] interface.
pub struct DocumentWriter {
    stack: Vec<StateNode>,
}

impl DocumentWriter {
    pub fn new(root_name: &str) -> Self {
        Self {
            stack: vec![StateNode::node(root_name)],
        }
    }

    /// Close any nodes still open and hand back the finished document.
    pub fn finish(mut self) -> StateNode {
        while self.stack.len() > 1 {
            self.close_node();
        }
        self.stack.pop().expect("writer stack holds the root")
    }
}

impl StateWriter for DocumentWriter {
    fn open_node(&mut self, name: &str) {
        self.stack.push(StateNode::node(name));
    }

    fn write_field(&mut self, name: &str, value: &str) {
        self.stack
            .last_mut()
            .expect("writer stack holds the root")
            .children
            .push(StateNode::field(name, value));
    }

    fn close_node(&mut self) {
        // The root only closes through `finish`.
        if self.stack.len() > 1 {
            let node = self.stack.pop().expect("stack length checked");
            self.stack
                .last_mut()
                .expect("stack length checked")
                .children
                .push(node);
        }
    }
}

/// Cursor over a borrowed [`StateNode`] tree.
pub struct DocumentReader<'a> {
    stack: Vec<(&'a StateNode, usize)>,
    current: &'a StateNode,
}

impl<'a> DocumentReader<'a> {
    pub fn new(root: &'a StateNode) -> Self {
        Self {
            stack: Vec::new(),
            current: root,
        }
    }
}

impl StateReader for DocumentReader<'_> {
    fn name(&self) -> &str {
        &self.current.name
    }

    fn value(&self) -> Option<&str> {
        self.current.value.as_deref()
    }

    fn enter(&mut self) -> bool {
        match self.current.children.first() {
            Some(child) => {
                self.stack.push((self.current, 0));
                self.current = child;
                true
            }
            None => false,
        }
    }

    fn advance(&mut self) -> bool {
        let Some((parent, idx)) = self.stack.last_mut() else {
            return false;
        };
        match parent.children.get(*idx + 1) {
            Some(child) => {
                *idx += 1;
                self.current = child;
                true
            }
            None => false,
        }
    }

    fn leave(&mut self) -> bool {
        match self.stack.pop() {
            Some((parent, _)) => {
                self.current = parent;
                true
            }
            None => false,
        }
    }
}

/// Format a scalar for persistence. Rust's `f64` `Display` emits the shortest
/// representation that parses back to the identical bits, which is what makes
/// the round-trip contract exact.
pub fn fmt_f64(v: f64) -> String {
    format!("{v}")
}

pub fn parse_f64(s: &str) -> Option<f64> {
    s.parse().ok()
}

/// Join scalars into one delimited field value.
pub fn fmt_scalars(vs: &[f64]) -> String {
    vs.iter().map(|v| fmt_f64(*v)).join(";")
}

/// Parse exactly `n` delimited scalars.
pub fn parse_scalars(s: &str, n: usize) -> Option<Vec<f64>> {
    let vs: Option<Vec<f64>> = s.split(';').map(parse_f64).collect();
    let vs = vs?;
    (vs.len() == n).then_some(vs)
}

pub fn fmt_vector(v: &DVector<f64>) -> String {
    fmt_scalars(v.as_slice())
}

pub fn parse_vector(s: &str, dimension: usize) -> Option<DVector<f64>> {
    parse_scalars(s, dimension).map(DVector::from_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> StateNode {
        let mut w = DocumentWriter::new("root");
        w.write_field("alpha", "1.5");
        w.open_node("inner");
        w.write_field("beta", "two");
        w.open_node("deep");
        w.write_field("gamma", "3");
        w.close_node();
        w.close_node();
        w.write_field("tail", "end");
        w.finish()
    }

    #[test]
    fn writer_builds_ordered_tree() {
        let doc = sample_doc();
        assert_eq!(doc.name, "root");
        assert_eq!(doc.children.len(), 3);
        assert_eq!(doc.children[0], StateNode::field("alpha", "1.5"));
        assert_eq!(doc.children[1].name, "inner");
        assert_eq!(doc.children[1].children.len(), 2);
        assert_eq!(doc.children[2], StateNode::field("tail", "end"));
    }

    #[test]
    fn writer_finish_closes_open_nodes() {
        let mut w = DocumentWriter::new("root");
        w.open_node("a");
        w.open_node("b");
        let doc = w.finish();
        assert_eq!(doc.children.len(), 1);
        assert_eq!(doc.children[0].children.len(), 1);
    }

    #[test]
    fn reader_walks_the_tree() {
        let doc = sample_doc();
        let mut r = DocumentReader::new(&doc);
        assert_eq!(r.name(), "root");
        assert!(r.value().is_none());

        assert!(r.enter());
        assert_eq!(r.name(), "alpha");
        assert_eq!(r.value(), Some("1.5"));

        assert!(r.advance());
        assert_eq!(r.name(), "inner");
        assert!(r.enter());
        assert_eq!(r.name(), "beta");
        assert!(r.advance());
        assert_eq!(r.name(), "deep");
        assert!(r.enter());
        assert_eq!(r.value(), Some("3"));
        assert!(!r.advance());
        assert!(!r.enter());
        assert!(r.leave());
        assert!(!r.advance());
        assert!(r.leave());

        assert!(r.advance());
        assert_eq!(r.name(), "tail");
        assert!(!r.advance());
        assert!(r.leave());
        assert_eq!(r.name(), "root");
        assert!(!r.leave());
    }

    #[test]
    fn document_survives_serde() {
        let doc = sample_doc();
        let json = serde_json::to_string(&doc).unwrap();
        let back: StateNode = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn scalars_round_trip_exactly() {
        for v in [
            0.0,
            -0.0,
            0.1,
            -3.25e-17,
            1.0 / 3.0,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::NEG_INFINITY,
        ] {
            let back = parse_f64(&fmt_f64(v)).unwrap();
            assert_eq!(v.to_bits(), back.to_bits());
        }
    }

    #[test]
    fn vectors_round_trip() {
        let v = DVector::from_vec(vec![1.5, -2.0, 1.0 / 7.0]);
        let s = fmt_vector(&v);
        assert_eq!(parse_vector(&s, 3).unwrap(), v);
        assert!(parse_vector(&s, 2).is_none());
        assert!(parse_vector("1.0;nope", 2).is_none());
        assert!(parse_vector("", 1).is_none());
    }
}
