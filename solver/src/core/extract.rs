//! Single-function extraction from synthesized Python source.
//!
//! The source is parsed with tree-sitter and inspected structurally. It is never
//! compiled or executed.

use thiserror::Error;
use tree_sitter::{Node, Parser};

/// Why synthesized source was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },
    #[error("expected exactly one top-level statement, found {count}")]
    MultipleStatements { count: usize },
    #[error("top-level statement is a `{kind}`, not a function definition")]
    NotAFunction { kind: String },
    #[error("python parser unavailable: {0}")]
    Parser(String),
}

/// A validated top-level function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonFunction {
    pub name: String,
    pub parameters: String,
    /// Complete definition text, including decorators.
    pub source: String,
}

impl PythonFunction {
    /// `name(parameters)` as written in the source.
    pub fn header(&self) -> String {
        format!("{}{}", self.name, self.parameters)
    }
}

/// Accept `source` only if it is exactly one (optionally decorated) function definition.
pub fn extract_single_function(source: &str) -> Result<PythonFunction, ValidationError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|err| ValidationError::Parser(err.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ValidationError::Parser("parse returned no tree".to_string()))?;
    let root = tree.root_node();

    if root.has_error() {
        let at = first_error(root).unwrap_or(root).start_position();
        return Err(ValidationError::Syntax {
            line: at.row + 1,
            column: at.column + 1,
        });
    }

    let mut cursor = root.walk();
    let statements: Vec<Node> = root
        .named_children(&mut cursor)
        .filter(|node| node.kind() != "comment")
        .collect();
    if statements.len() != 1 {
        return Err(ValidationError::MultipleStatements {
            count: statements.len(),
        });
    }

    let statement = statements[0];
    let definition = match statement.kind() {
        "function_definition" => statement,
        "decorated_definition" => statement
            .child_by_field_name("definition")
            .filter(|node| node.kind() == "function_definition")
            .ok_or_else(|| ValidationError::NotAFunction {
                kind: "decorated_definition".to_string(),
            })?,
        other => {
            return Err(ValidationError::NotAFunction {
                kind: other.to_string(),
            });
        }
    };

    let bytes = source.as_bytes();
    let field_text = |field: &str| {
        definition
            .child_by_field_name(field)
            .and_then(|node| node.utf8_text(bytes).ok())
            .unwrap_or_default()
            .to_string()
    };

    Ok(PythonFunction {
        name: field_text("name"),
        parameters: field_text("parameters"),
        source: source[statement.byte_range()].trim_end().to_string(),
    })
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if (child.has_error() || child.is_missing())
            && let Some(found) = first_error(child)
        {
            return Some(found);
        }
    }
    None
}
