//! Template parsing and dependency ordering shared by the fake and format
//! transformers.
//!
//! Two placeholder grammars exist: `{{NAME}}` inside fake specs and
//! `{NAME}` / `{NAME:format}` inside format templates. Both resolve column
//! names case-insensitively; a placeholder that never resolves is kept as
//! literal text, braces included.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tabdump_core::{ExportError, Result};

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Placeholder {
        /// Column name as written (matching is case-insensitive).
        name: String,
        /// Format hint, only produced by the single-brace grammar.
        format: Option<String>,
    },
}

/// Parses the `{{NAME}}` grammar. Text without a matching `}}` stays
/// literal.
pub fn parse_double_brace(spec: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = spec;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_owned()));
        }
        segments.push(Segment::Placeholder {
            name: rest[start + 2..start + 2 + end].to_owned(),
            format: None,
        });
        rest = &rest[start + 2 + end + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_owned()));
    }
    segments
}

/// Parses the `{NAME}` / `{NAME:format}` grammar. An unclosed `{` and an
/// empty `{}` stay literal.
pub fn parse_single_brace(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start + 1..].find('}') else {
            break;
        };
        let inner = &rest[start + 1..start + 1 + end];
        if inner.is_empty() {
            segments.push(Segment::Literal(rest[..start + 2 + end].to_owned()));
            rest = &rest[start + 2 + end..];
            continue;
        }
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_owned()));
        }
        let (name, format) = match inner.split_once(':') {
            Some((name, fmt)) => (name, Some(fmt.to_owned())),
            None => (inner, None),
        };
        segments.push(Segment::Placeholder {
            name: name.to_owned(),
            format,
        });
        rest = &rest[start + 2 + end..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_owned()));
    }
    segments
}

/// Restores a placeholder to its literal source form, braces included.
pub fn restore_single_brace(name: &str, format: Option<&str>) -> String {
    match format {
        Some(fmt) => format!("{{{name}:{fmt}}}"),
        None => format!("{{{name}}}"),
    }
}

pub fn restore_double_brace(name: &str) -> String {
    format!("{{{{{name}}}}}")
}

/// Computes the order in which targets must be generated so that every
/// referenced target is produced before its referrer. `deps[i]` lists the
/// target indices that target `i` reads; self-references are not
/// dependencies (they resolve to the pre-transform cell).
///
/// A reference cycle is a configuration error, reported before any row is
/// read.
pub fn generation_order(names: &[String], deps: &[Vec<usize>]) -> Result<Vec<usize>> {
    let mut graph = DiGraph::<usize, ()>::with_capacity(names.len(), deps.len());
    let nodes: Vec<NodeIndex> = (0..names.len()).map(|i| graph.add_node(i)).collect();
    for (target, targets_read) in deps.iter().enumerate() {
        for &dep in targets_read {
            if dep != target {
                graph.add_edge(nodes[dep], nodes[target], ());
            }
        }
    }
    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|n| graph[n]).collect()),
        Err(cycle) => Err(ExportError::Config(format!(
            "circular reference involving column `{}`",
            names[graph[cycle.node_id()]]
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_brace_parsing() {
        let segments = parse_double_brace("{{FIRSTNAME}} {{LASTNAME}}");
        assert_eq!(
            segments,
            vec![
                Segment::Placeholder { name: "FIRSTNAME".into(), format: None },
                Segment::Literal(" ".into()),
                Segment::Placeholder { name: "LASTNAME".into(), format: None },
            ]
        );
    }

    #[test]
    fn double_brace_without_closing_stays_literal() {
        let segments = parse_double_brace("hello {{WORLD");
        assert_eq!(segments, vec![Segment::Literal("hello {{WORLD".into())]);
    }

    #[test]
    fn single_brace_with_format_hint() {
        let segments = parse_single_brace("total: {AMOUNT:0.00} EUR");
        assert_eq!(
            segments,
            vec![
                Segment::Literal("total: ".into()),
                Segment::Placeholder {
                    name: "AMOUNT".into(),
                    format: Some("0.00".into())
                },
                Segment::Literal(" EUR".into()),
            ]
        );
    }

    #[test]
    fn empty_braces_stay_literal() {
        let segments = parse_single_brace("a{}b");
        assert_eq!(
            segments,
            vec![Segment::Literal("a{}".into()), Segment::Literal("b".into())]
        );
    }

    #[test]
    fn order_respects_dependencies() {
        // 0 reads 1, 1 reads 2: generate 2, 1, 0.
        let names = vec!["A".to_owned(), "B".to_owned(), "C".to_owned()];
        let order = generation_order(&names, &[vec![1], vec![2], vec![]]).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let names = vec!["A".to_owned()];
        assert_eq!(generation_order(&names, &[vec![0]]).unwrap(), vec![0]);
    }

    #[test]
    fn cycle_is_a_config_error() {
        let names = vec!["A".to_owned(), "B".to_owned()];
        let err = generation_order(&names, &[vec![1], vec![0]]).unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }
}
