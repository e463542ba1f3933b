//! GraphML export for third-party visualization tools.
//!
//! GraphML has no list type, so aliases and relationship types are
//! comma-joined strings.

use std::fmt::Write;

use crate::graph::KnowledgeBase;

const NODE_KEYS: [&str; 4] = ["label", "entity_type", "aliases", "description"];

/// Escape the five XML special characters.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn data(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "      <data key=\"{key}\">{}</data>", escape_xml(value));
}

/// Render the whole knowledge base as a directed GraphML document.
pub fn export_graphml(kb: &KnowledgeBase) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xsi:schemaLocation=\"http://graphml.graphdrawing.org/xmlns \
         http://graphml.graphdrawing.org/xmlns/1.0/graphml.xsd\">\n",
    );
    for key in NODE_KEYS {
        let _ = writeln!(
            out,
            "  <key id=\"{key}\" for=\"node\" attr.name=\"{key}\" attr.type=\"string\"/>"
        );
    }
    out.push_str(
        "  <key id=\"relationship_types\" for=\"edge\" attr.name=\"relationship_types\" attr.type=\"string\"/>\n",
    );
    out.push_str("  <key id=\"count\" for=\"edge\" attr.name=\"count\" attr.type=\"int\"/>\n");
    let _ = writeln!(
        out,
        "  <graph id=\"{}\" edgedefault=\"directed\">",
        escape_xml(kb.id())
    );

    for node in kb.nodes() {
        let _ = writeln!(out, "    <node id=\"{}\">", escape_xml(&node.id));
        data(&mut out, "label", &node.label);
        data(&mut out, "entity_type", &node.entity_type);
        data(&mut out, "aliases", &node.aliases.join(","));
        if let Some(description) = &node.description {
            data(&mut out, "description", description);
        }
        out.push_str("    </node>\n");
    }

    for edge in kb.edges() {
        let _ = writeln!(
            out,
            "    <edge id=\"{}\" source=\"{}\" target=\"{}\">",
            escape_xml(&edge.id),
            escape_xml(&edge.source_node_id),
            escape_xml(&edge.target_node_id)
        );
        data(&mut out, "relationship_types", &edge.relationship_types().join(","));
        data(&mut out, "count", &edge.relationships.len().to_string());
        out.push_str("    </edge>\n");
    }

    out.push_str("  </graph>\n</graphml>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, RelationshipDetail};

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_xml("AT&T <\"x\">"), "AT&amp;T &lt;&quot;x&quot;&gt;");
    }

    #[test]
    fn exports_nodes_and_edges() {
        let mut kb = KnowledgeBase::new("t", "");
        kb.add_node(
            Node::new("AT&T", "organization")
                .with_aliases(["Ma Bell", "Bell System"])
                .with_description("Telephone company"),
        )
        .unwrap();
        kb.add_node(Node::new("Bell Labs", "organization")).unwrap();
        for kind in ["owns", "funds", "owns"] {
            kb.add_relationship("AT&T", "Bell Labs", RelationshipDetail::new(kind, "s"))
                .unwrap();
        }

        let xml = export_graphml(&kb);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<key id=\"aliases\" for=\"node\""));
        assert!(xml.contains("<data key=\"label\">AT&amp;T</data>"));
        assert!(xml.contains("<data key=\"aliases\">Ma Bell,Bell System</data>"));
        assert!(xml.contains("<data key=\"description\">Telephone company</data>"));
        assert!(xml.contains("<data key=\"relationship_types\">owns,funds</data>"));
        assert!(xml.contains("<data key=\"count\">3</data>"));
        assert_eq!(xml.matches("<node ").count(), 2);
        assert_eq!(xml.matches("<edge ").count(), 1);
    }
}
