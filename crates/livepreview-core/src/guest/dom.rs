//! Virtual DOM rendered by guest code.

use crate::protocol::Frame;
use rhai::{Array, Dynamic, FnPtr, Map};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// A node of the guest's render tree.
///
/// Trees built through [`children_of`] never hold a fragment inside another
/// node: fragments are spliced into their parent's children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<Node>,
        /// Height of this subtree, counting this element.
        depth: usize,
    },
    Text(String),
    Fragment(Vec<Node>),
}

impl Node {
    pub fn element(tag: impl Into<String>, attrs: BTreeMap<String, String>, children: Vec<Node>) -> Self {
        let depth = 1 + children.iter().map(Node::depth).max().unwrap_or(0);
        Node::Element {
            tag: tag.into(),
            attrs,
            children,
            depth,
        }
    }

    /// Element nesting below and including this node.
    pub fn depth(&self) -> usize {
        match self {
            Node::Element { depth, .. } => *depth,
            Node::Text(_) => 0,
            Node::Fragment(children) => children.iter().map(Node::depth).max().unwrap_or(0),
        }
    }

    /// The inline panel shown in place of the render when guest code fails.
    pub fn error_fallback(message: &str) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("class".to_string(), "preview-error".to_string());
        Node::element("pre", attrs, vec![Node::Text(message.to_string())])
    }

    /// Build an element from the values markup lowering passes to `el`.
    ///
    /// Fails once the element would nest deeper than `max_depth`, so guest
    /// code cannot build a tree too deep to serialize or drop.
    pub fn from_parts(tag: &str, attrs: Map, children: Array, max_depth: usize) -> Result<Self, String> {
        let mut rendered = BTreeMap::new();
        for (key, value) in attrs {
            if let Some(value) = attr_value(&value) {
                rendered.insert(attr_name(&key).to_string(), value);
            }
        }
        let node = Node::element(tag, rendered, children_of(children)?);
        if node.depth() > max_depth {
            return Err(format!(
                "Render tree nested too deeply (limit {}) at <{}>",
                max_depth, tag
            ));
        }
        Ok(node)
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(&escape(text, false)),
            Node::Fragment(children) => {
                for child in children {
                    child.write_html(out);
                }
            }
            Node::Element {
                tag,
                attrs,
                children,
                ..
            } => {
                out.push('<');
                out.push_str(tag);
                for (key, value) in attrs {
                    if value.is_empty() {
                        let _ = write!(out, " {}", key);
                    } else {
                        let _ = write!(out, " {}=\"{}\"", key, escape(value, true));
                    }
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                for child in children {
                    child.write_html(out);
                }
                let _ = write!(out, "</{}>", tag);
            }
        }
    }

    /// Indented plain-text rendering for terminals.
    pub fn to_outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(0, &mut out);
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        match self {
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    let _ = writeln!(out, "{:indent$}{:?}", "", text, indent = depth * 2);
                }
            }
            Node::Fragment(children) => {
                for child in children {
                    child.write_outline(depth, out);
                }
            }
            Node::Element {
                tag,
                attrs,
                children,
                ..
            } => {
                let _ = write!(out, "{:indent$}<{}", "", tag, indent = depth * 2);
                for (key, value) in attrs {
                    if value.is_empty() {
                        let _ = write!(out, " {}", key);
                    } else {
                        let _ = write!(out, " {}={:?}", key, value);
                    }
                }
                out.push_str(">\n");
                for child in children {
                    child.write_outline(depth + 1, out);
                }
            }
        }
    }
}

/// Serialize whatever is mounted.
pub fn frame_of(root: Option<&Node>) -> Frame {
    match root {
        Some(node) => Frame {
            html: node.to_html(),
            outline: node.to_outline(),
        },
        None => Frame::default(),
    }
}

/// Flatten renderable values into nodes.
///
/// Arrays and fragments flatten, `()` and booleans render nothing, scalars
/// become text.
pub fn children_of(values: Array) -> Result<Vec<Node>, String> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        collect(value, &mut out)?;
    }
    Ok(out)
}

/// Turn the argument of `render` into a single mountable node.
pub fn mountable(value: Dynamic) -> Result<Node, String> {
    let mut nodes = Vec::new();
    collect(value, &mut nodes)?;
    if nodes.len() == 1 {
        Ok(nodes.remove(0))
    } else {
        Ok(Node::Fragment(nodes))
    }
}

fn collect(value: Dynamic, out: &mut Vec<Node>) -> Result<(), String> {
    // Explicit stack: guest arrays can nest arbitrarily deep.
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        if value.is_unit() || value.is_bool() {
            continue;
        }
        if value.is::<Node>() {
            match value.cast::<Node>() {
                Node::Fragment(children) => out.extend(children),
                node => out.push(node),
            }
            continue;
        }
        if value.is_array() {
            pending.extend(value.cast::<Array>().into_iter().rev());
            continue;
        }
        if value.is_string() || value.is_char() || value.is_int() || value.is_float() {
            out.push(Node::Text(value.to_string()));
            continue;
        }
        return Err(format!(
            "Cannot render a value of type '{}' as a child",
            value.type_name()
        ));
    }
    Ok(())
}

fn attr_name(key: &str) -> &str {
    match key {
        "className" => "class",
        "htmlFor" => "for",
        other => other,
    }
}

fn attr_value(value: &Dynamic) -> Option<String> {
    if value.is_unit() || value.is::<FnPtr>() {
        return None;
    }
    if let Ok(flag) = value.as_bool() {
        return flag.then(String::new);
    }
    if value.is_map() {
        let map = value.clone().cast::<Map>();
        let style = map
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect::<Vec<_>>()
            .join("; ");
        return Some(style);
    }
    Some(value.to_string())
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_html_serialization() {
        let node = Node::element(
            "div",
            attrs(&[("class", "card"), ("hidden", "")]),
            vec![
                Node::Text("a < b".to_string()),
                Node::element("br", BTreeMap::new(), vec![]),
                Node::Fragment(vec![Node::Text("!".to_string())]),
            ],
        );
        assert_eq!(
            node.to_html(),
            r#"<div class="card" hidden>a &lt; b<br>!</div>"#
        );
    }

    #[test]
    fn test_outline() {
        let node = Node::element(
            "ul",
            BTreeMap::new(),
            vec![Node::element("li", attrs(&[("id", "x")]), vec![Node::Text(" one ".to_string())])],
        );
        assert_eq!(node.to_outline(), "<ul>\n  <li id=\"x\">\n    \"one\"\n");
    }

    #[test]
    fn test_children_flatten() {
        let inner: Array = vec![Dynamic::from("a".to_string()), Dynamic::from(2_i64)];
        let values: Array = vec![
            Dynamic::from(inner),
            Dynamic::UNIT,
            Dynamic::from(false),
            Dynamic::from(Node::Text("b".to_string())),
        ];
        let nodes = children_of(values).unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("a".to_string()),
                Node::Text("2".to_string()),
                Node::Text("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_fragments_spliced_into_parent() {
        let fragment = Node::Fragment(vec![Node::element("b", BTreeMap::new(), vec![])]);
        let node = Node::from_parts("p", Map::new(), vec![Dynamic::from(fragment)], 8).unwrap();
        let Node::Element { children, depth, .. } = &node else {
            panic!("expected an element");
        };
        assert_eq!(children, &vec![Node::element("b", BTreeMap::new(), vec![])]);
        assert_eq!(*depth, 2);
    }

    #[test]
    fn test_depth_limit() {
        let mut node = Node::Text("x".to_string());
        for _ in 0..3 {
            node = Node::from_parts("div", Map::new(), vec![Dynamic::from(node)], 3).unwrap();
        }
        assert_eq!(node.depth(), 3);
        let err = Node::from_parts("div", Map::new(), vec![Dynamic::from(node)], 3).unwrap_err();
        assert_eq!(err, "Render tree nested too deeply (limit 3) at <div>");
    }

    #[test]
    fn test_map_child_rejected() {
        let err = children_of(vec![Dynamic::from(Map::new())]).unwrap_err();
        assert!(err.contains("Cannot render"));
    }

    #[test]
    fn test_attribute_conversion() {
        let mut map = Map::new();
        map.insert("className".into(), Dynamic::from("x".to_string()));
        map.insert("disabled".into(), Dynamic::from(true));
        map.insert("checked".into(), Dynamic::from(false));
        map.insert("width".into(), Dynamic::from(3_i64));
        let node = Node::from_parts("input", map, Array::new(), 8).unwrap();
        assert_eq!(node.to_html(), r#"<input class="x" disabled width="3">"#);
    }

    #[test]
    fn test_frame_of_nothing_is_blank() {
        assert!(frame_of(None).is_blank());
        let fallback = Node::error_fallback("boom");
        let frame = frame_of(Some(&fallback));
        assert_eq!(frame.html, r#"<pre class="preview-error">boom</pre>"#);
    }
}
