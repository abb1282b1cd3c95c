// Abstract Syntax Tree definitions

use serde::{Deserialize, Serialize};

/// AST Node types
///
/// The subset of the JSONata expression tree the evaluator understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// String literal (e.g., "hello", 'world')
    String(String),

    /// Field name in a path expression (e.g., foo in foo.bar)
    Name(String),

    /// Number literal
    Number(f64),

    /// Boolean literal
    Boolean(bool),

    /// Null literal
    Null,

    /// Variable reference (e.g., $var). `$` alone has an empty name and
    /// refers to the current context value.
    Variable(String),

    /// Path expression (e.g., foo.bar), one node per step
    Path { steps: Vec<AstNode> },

    Binary {
        op: BinaryOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<AstNode>,
    },

    /// Function call by name
    Function {
        name: String,
        args: Vec<AstNode>,
        /// True for `$string(x)`, false for `string(x)`
        is_builtin: bool,
    },

    /// Lambda function definition: `function($a, $b) { body }`
    Lambda {
        params: Vec<String>,
        body: Box<AstNode>,
    },

    /// Array constructor
    Array(Vec<AstNode>),

    /// Object constructor
    Object(Vec<(AstNode, AstNode)>),

    /// Block expression `(a; b; c)`, evaluated in its own scope
    Block(Vec<AstNode>),

    /// Conditional expression (? :)
    Conditional {
        condition: Box<AstNode>,
        then_branch: Box<AstNode>,
        else_branch: Option<Box<AstNode>>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,

    // String
    Concatenate,

    Range,
    In,

    // Variable binding
    ColonEqual, // :=

    // Function chaining
    ChainPipe, // ~>
}

impl BinaryOp {
    /// Operator text, for error messages.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Concatenate => "&",
            BinaryOp::Range => "..",
            BinaryOp::In => "in",
            BinaryOp::ColonEqual => ":=",
            BinaryOp::ChainPipe => "~>",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Negation (-)
    Negate,
}

impl AstNode {
    pub fn string(s: impl Into<String>) -> Self {
        AstNode::String(s.into())
    }

    pub fn number(n: f64) -> Self {
        AstNode::Number(n)
    }

    pub fn boolean(b: bool) -> Self {
        AstNode::Boolean(b)
    }

    pub fn variable(name: impl Into<String>) -> Self {
        AstNode::Variable(name.into())
    }

    /// `$name(args)` call node
    pub fn call(name: impl Into<String>, args: Vec<AstNode>) -> Self {
        AstNode::Function {
            name: name.into(),
            args,
            is_builtin: true,
        }
    }

    pub fn lambda(params: &[&str], body: AstNode) -> Self {
        AstNode::Lambda {
            params: params.iter().map(|p| p.to_string()).collect(),
            body: Box::new(body),
        }
    }

    pub fn binary(op: BinaryOp, lhs: AstNode, rhs: AstNode) -> Self {
        AstNode::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ast_node_creation() {
        assert!(matches!(AstNode::string("hello"), AstNode::String(_)));
        assert!(matches!(AstNode::number(42.0), AstNode::Number(_)));
        assert!(matches!(AstNode::boolean(true), AstNode::Boolean(true)));
        assert!(matches!(
            AstNode::call("reduce", vec![]),
            AstNode::Function { is_builtin: true, .. }
        ));
    }

    #[test]
    fn test_lambda_helper() {
        let node = AstNode::lambda(
            &["i", "j"],
            AstNode::binary(BinaryOp::Multiply, AstNode::variable("i"), AstNode::variable("j")),
        );
        match node {
            AstNode::Lambda { params, .. } => assert_eq!(params, vec!["i", "j"]),
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn test_tree_serializes() {
        let node = AstNode::binary(BinaryOp::Add, AstNode::number(1.0), AstNode::number(2.0));
        let text = serde_json::to_string(&node).unwrap();
        let back: AstNode = serde_json::from_str(&text).unwrap();
        assert_eq!(back, node);
    }
}
