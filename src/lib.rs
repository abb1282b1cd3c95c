// jsonata-fold - JSONata evaluator built around the $reduce fold protocol
// Copyright (c) 2025 jsonata-fold contributors
// Licensed under the MIT License

//! # jsonata-fold
//!
//! A tree-walking evaluator for a subset of JSONata, centred on `$reduce`:
//! folding a builtin, a declared function or an inline lambda across an array.
//!
//! ## Architecture
//!
//! - `parser` - Expression parser (converts JSONata strings to AST)
//! - `evaluator` - Expression evaluator (executes AST against data), scopes and closures
//! - `reduce` - The fold itself, written against the `FoldHost` capability trait
//! - `functions` - Built-in function implementations and their registry
//! - `signature` - Function signature parsing and validation
//! - `value` - `JValue`, the Rc-backed value type
//! - `utils` - Utility functions and helpers
//! - `ast` - Abstract Syntax Tree definitions
//!
//! ```
//! use jsonata_fold::{Expression, value::JValue};
//!
//! let expr = Expression::compile("$reduce(items, function($a, $b){ $a + $b }, 10)").unwrap();
//! let data = JValue::from_json_str(r#"{"items": [1, 2, 3]}"#).unwrap();
//! assert_eq!(expr.evaluate(&data).unwrap(), JValue::from(16i64));
//! ```

use thiserror::Error;

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod reduce;
pub mod signature;
pub mod utils;
pub mod value;

use evaluator::{Context, Evaluator, EvaluatorConfig, EvaluatorError};
use parser::ParserError;
use value::JValue;

/// Errors surfaced by the crate-level API.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParserError),

    #[error(transparent)]
    Evaluate(#[from] EvaluatorError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A compiled JSONata expression that can be evaluated against data.
///
/// Compile an expression once, then evaluate it multiple times against
/// different data.
#[derive(Debug, Clone)]
pub struct Expression {
    ast: ast::AstNode,
    config: EvaluatorConfig,
}

impl Expression {
    pub fn compile(expression: &str) -> Result<Self, Error> {
        Ok(Expression {
            ast: parser::parse(expression)?,
            config: EvaluatorConfig::default(),
        })
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ast(&self) -> &ast::AstNode {
        &self.ast
    }

    pub fn evaluate(&self, data: &JValue) -> Result<JValue, Error> {
        self.evaluate_with(data, Context::new())
    }

    /// Evaluate with caller-supplied variable bindings.
    pub fn evaluate_with(&self, data: &JValue, bindings: Context) -> Result<JValue, Error> {
        let mut evaluator = Evaluator::with_context(bindings).with_config(self.config.clone());
        Ok(evaluator.evaluate(&self.ast, data)?)
    }

    /// Evaluate against JSON text and return the result as JSON text.
    ///
    /// An undefined result serializes as `null`.
    pub fn evaluate_json(&self, json: &str) -> Result<String, Error> {
        let data = JValue::from_json_str(json)?;
        let result = self.evaluate(&data)?;
        Ok(result.to_json_string()?)
    }
}

/// Compile and evaluate in one step.
pub fn evaluate(expression: &str, data: &JValue) -> Result<JValue, Error> {
    Expression::compile(expression)?.evaluate(data)
}
