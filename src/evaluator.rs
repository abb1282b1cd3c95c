// Expression evaluator
//
// Walks an `AstNode` tree against a `JValue` input. Variable scopes, closures
// and the recursion guard live here; `$reduce` is delegated to the fold core
// in `crate::reduce` through the `FoldHost` implementation at the bottom.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::ast::{AstNode, BinaryOp, UnaryOp};
use crate::functions::{self, Builtin, BuiltinRegistry, FunctionError, Implementation};
use crate::reduce::{self, FoldHost, FunctionRef};
use crate::signature::SignatureError;
use crate::utils::to_array;
use crate::value::JValue;

/// Largest sequence a range expression may produce.
const MAX_RANGE: usize = 10_000_000;

/// Evaluator errors
#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("T0410: Argument {position} of function {function} does not match function signature (expected {expected}, got {found})")]
    ArgumentType {
        function: String,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("T1006: Expected function variable reference ${name} to resolve to a declared function")]
    UnresolvedFunctionReference { name: String },

    #[error("D3050: The function passed to {function} must take at least two arguments (it takes {arity})")]
    CallableArity { function: String, arity: usize },

    #[error("T0410: Function {function} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Reference error: {0}")]
    ReferenceError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),
}

impl EvaluatorError {
    /// Attach the function name and offending argument to a signature failure.
    pub fn from_signature(function: &str, error: SignatureError, args: &[JValue]) -> Self {
        match error {
            SignatureError::ArgumentCountMismatch { expected, actual } => EvaluatorError::ArgumentCount {
                function: function.to_string(),
                expected,
                actual,
            },
            SignatureError::ArgumentTypeMismatch { index, expected } => EvaluatorError::ArgumentType {
                function: function.to_string(),
                position: index,
                expected,
                found: args
                    .get(index - 1)
                    .map_or("undefined", JValue::type_name)
                    .to_string(),
            },
            SignatureError::InvalidSignature(message) => EvaluatorError::EvaluationError(message),
        }
    }
}

impl From<FunctionError> for EvaluatorError {
    fn from(e: FunctionError) -> Self {
        EvaluatorError::EvaluationError(e.to_string())
    }
}

impl From<SignatureError> for EvaluatorError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::InvalidSignature(message) => EvaluatorError::EvaluationError(message),
            other => EvaluatorError::TypeError(format!("T0410: {}", other)),
        }
    }
}

/// Evaluator settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Nesting depth at which evaluation fails with U1001.
    pub max_recursion_depth: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            max_recursion_depth: 302,
        }
    }
}

/// A user-defined function: lambda parameters and body plus the bindings
/// visible where the lambda was evaluated.
#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: AstNode,
    pub captured_env: HashMap<String, JValue>,
    /// Variable name the closure was bound to, if any
    pub name: Option<String>,
}

impl Closure {
    /// A closure that captures nothing, e.g. a lambda written directly in a
    /// function argument position.
    pub fn anonymous(params: Vec<String>, body: AstNode) -> Self {
        Closure {
            params,
            body,
            captured_env: HashMap::new(),
            name: None,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Variable bindings.
///
/// Scopes form a stack: blocks and closure invocations push a scope, lookups
/// search innermost first. The bottom scope holds bindings supplied by the
/// caller and top-level assignments.
#[derive(Debug)]
pub struct Context {
    scopes: Vec<HashMap<String, JValue>>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            scopes: vec![HashMap::new()],
        }
    }

    /// Bind `name` in the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, value: JValue) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&JValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Drop the innermost scope. The caller's scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Bind `name` to `closure`.
    pub fn bind_lambda(&mut self, name: impl Into<String>, mut closure: Closure) {
        let name = name.into();
        closure.name = Some(name.clone());
        self.bind(name, JValue::lambda(closure));
    }

    pub fn lookup_lambda(&self, name: &str) -> Option<Rc<Closure>> {
        match self.lookup(name)? {
            JValue::Lambda(closure) => Some(Rc::clone(closure)),
            _ => None,
        }
    }

    /// Bindings a lambda literal closes over: every scope above the bottom
    /// one, inner ones shadowing outer ones. The bottom scope stays reachable
    /// through the scope stack for the whole evaluation.
    fn captured_bindings(&self) -> HashMap<String, JValue> {
        let mut bindings = HashMap::new();
        for scope in self.scopes.iter().skip(1) {
            for (name, value) in scope {
                bindings.insert(name.clone(), value.clone());
            }
        }
        bindings
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// How a function call was reached.
#[derive(Debug, Clone, Copy)]
pub enum CallSite<'a> {
    /// `$f(args)` on its own
    Standalone,
    /// Right-hand side of `~>` or a path step; carries the value flowing in
    Chained(&'a JValue),
}

impl<'a> CallSite<'a> {
    pub fn context(self) -> Option<&'a JValue> {
        match self {
            CallSite::Standalone => None,
            CallSite::Chained(value) => Some(value),
        }
    }
}

/// Evaluator for JSONata expressions
pub struct Evaluator {
    context: Context,
    config: EvaluatorConfig,
    registry: &'static BuiltinRegistry,
    recursion_depth: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_context(Context::new())
    }

    pub fn with_context(context: Context) -> Self {
        Evaluator {
            context,
            config: EvaluatorConfig::default(),
            registry: BuiltinRegistry::standard(),
            recursion_depth: 0,
        }
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Evaluate an expression tree against input data.
    pub fn evaluate(&mut self, node: &AstNode, data: &JValue) -> Result<JValue, EvaluatorError> {
        self.recursion_depth = 0;
        self.evaluate_internal(node, data)
    }

    fn evaluate_internal(&mut self, node: &AstNode, data: &JValue) -> Result<JValue, EvaluatorError> {
        self.recursion_depth += 1;
        if self.recursion_depth > self.config.max_recursion_depth {
            self.recursion_depth -= 1;
            tracing::warn!(limit = self.config.max_recursion_depth, "recursion limit exceeded");
            return Err(EvaluatorError::EvaluationError(format!(
                "U1001: Stack overflow - maximum recursion depth ({}) exceeded",
                self.config.max_recursion_depth
            )));
        }

        let result = self.evaluate_node(node, data);
        self.recursion_depth -= 1;
        result
    }

    fn evaluate_node(&mut self, node: &AstNode, data: &JValue) -> Result<JValue, EvaluatorError> {
        match node {
            AstNode::String(s) => Ok(JValue::string(s.as_str())),
            AstNode::Number(n) => Ok(JValue::Number(*n)),
            AstNode::Boolean(b) => Ok(JValue::Bool(*b)),
            AstNode::Null => Ok(JValue::Null),
            AstNode::Name(field) => Ok(field_of(data, field)),
            AstNode::Variable(name) => Ok(self.variable(name, data)),
            AstNode::Path { steps } => self.evaluate_path(steps, data),
            AstNode::Binary { op, lhs, rhs } => self.evaluate_binary_op(*op, lhs, rhs, data),
            AstNode::Unary { op, operand } => self.evaluate_unary_op(*op, operand, data),
            AstNode::Function { name, args, is_builtin } => {
                self.evaluate_function_call(name, args, *is_builtin, CallSite::Standalone, data)
            }
            AstNode::Lambda { params, body } => {
                Ok(JValue::lambda(Closure {
                    params: params.clone(),
                    body: (**body).clone(),
                    captured_env: self.context.captured_bindings(),
                    name: None,
                }))
            }
            AstNode::Array(items) => self.evaluate_array(items, data),
            AstNode::Object(pairs) => self.evaluate_object(pairs, data),
            AstNode::Block(expressions) => {
                self.context.push_scope();
                let result = self.evaluate_block(expressions, data);
                self.context.pop_scope();
                result
            }
            AstNode::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate_internal(condition, data)?.is_truthy() {
                    self.evaluate_internal(then_branch, data)
                } else if let Some(else_branch) = else_branch {
                    self.evaluate_internal(else_branch, data)
                } else {
                    Ok(JValue::Undefined)
                }
            }
        }
    }

    /// `$name`: bound value, else a builtin function value, else undefined.
    /// `$` alone is the context value.
    fn variable(&self, name: &str, data: &JValue) -> JValue {
        if name.is_empty() {
            return data.clone();
        }
        if let Some(value) = self.context.lookup(name) {
            return value.clone();
        }
        if self.registry.contains(name) {
            return JValue::builtin(name);
        }
        JValue::Undefined
    }

    fn evaluate_block(&mut self, expressions: &[AstNode], data: &JValue) -> Result<JValue, EvaluatorError> {
        let mut result = JValue::Undefined;
        for expression in expressions {
            result = self.evaluate_internal(expression, data)?;
        }
        Ok(result)
    }

    fn evaluate_path(&mut self, steps: &[AstNode], data: &JValue) -> Result<JValue, EvaluatorError> {
        let Some((first, rest)) = steps.split_first() else {
            return Ok(JValue::Undefined);
        };

        let mut current = self.evaluate_internal(first, data)?;
        for step in rest {
            if current.is_undefined() {
                return Ok(JValue::Undefined);
            }
            current = self.evaluate_path_step(step, &current)?;
        }
        Ok(current)
    }

    /// A function step receives the whole sequence as its context; any other
    /// step is mapped over the members of an array and the results flattened.
    fn evaluate_path_step(&mut self, step: &AstNode, current: &JValue) -> Result<JValue, EvaluatorError> {
        match (step, current) {
            (AstNode::Function { name, args, is_builtin }, _) => {
                self.evaluate_function_call(name, args, *is_builtin, CallSite::Chained(current), current)
            }
            (_, JValue::Array(items)) => {
                let mut results = Vec::new();
                for item in items.iter() {
                    match self.evaluate_internal(step, item)? {
                        JValue::Undefined => {}
                        JValue::Array(inner) => results.extend(inner.iter().cloned()),
                        value => results.push(value),
                    }
                }
                Ok(JValue::from_sequence(results))
            }
            _ => self.evaluate_internal(step, current),
        }
    }

    /// Array constructor: nested constructors stay nested, other array values
    /// are spliced in, undefined members are dropped.
    fn evaluate_array(&mut self, items: &[AstNode], data: &JValue) -> Result<JValue, EvaluatorError> {
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let value = self.evaluate_internal(item, data)?;
            match value {
                JValue::Undefined => {}
                JValue::Array(inner) if !matches!(item, AstNode::Array(_)) => {
                    result.extend(inner.iter().cloned())
                }
                value => result.push(value),
            }
        }
        Ok(JValue::array(result))
    }

    fn evaluate_object(&mut self, pairs: &[(AstNode, AstNode)], data: &JValue) -> Result<JValue, EvaluatorError> {
        let mut map = IndexMap::with_capacity(pairs.len());
        for (key_node, value_node) in pairs {
            let key = match self.evaluate_internal(key_node, data)? {
                JValue::String(s) => s.to_string(),
                other => {
                    return Err(EvaluatorError::TypeError(format!(
                        "T1003: Key in object structure must evaluate to a string; got: {}",
                        other
                    )))
                }
            };
            let value = self.evaluate_internal(value_node, data)?;
            if !value.is_undefined() {
                map.insert(key, value);
            }
        }
        Ok(JValue::object(map))
    }

    fn evaluate_unary_op(&mut self, op: UnaryOp, operand: &AstNode, data: &JValue) -> Result<JValue, EvaluatorError> {
        match op {
            UnaryOp::Negate => match self.evaluate_internal(operand, data)? {
                JValue::Number(n) => Ok(JValue::Number(-n)),
                JValue::Undefined => Ok(JValue::Undefined),
                other => Err(EvaluatorError::TypeError(format!(
                    "D1002: Cannot negate a non-numeric value: {}",
                    other
                ))),
            },
        }
    }

    fn evaluate_binary_op(
        &mut self,
        op: BinaryOp,
        lhs: &AstNode,
        rhs: &AstNode,
        data: &JValue,
    ) -> Result<JValue, EvaluatorError> {
        match op {
            BinaryOp::And => {
                let left = self.evaluate_internal(lhs, data)?.is_truthy();
                Ok(JValue::Bool(left && self.evaluate_internal(rhs, data)?.is_truthy()))
            }
            BinaryOp::Or => {
                let left = self.evaluate_internal(lhs, data)?.is_truthy();
                Ok(JValue::Bool(left || self.evaluate_internal(rhs, data)?.is_truthy()))
            }
            BinaryOp::ColonEqual => {
                let AstNode::Variable(name) = lhs else {
                    return Err(EvaluatorError::EvaluationError(
                        "The left side of := must be a variable name".to_string(),
                    ));
                };
                let value = self.evaluate_internal(rhs, data)?;
                // an anonymous lambda takes the name it is first assigned to
                let value = match value {
                    JValue::Lambda(closure) if closure.name.is_none() => JValue::lambda(Closure {
                        name: Some(name.clone()),
                        ..(*closure).clone()
                    }),
                    other => other,
                };
                self.context.bind(name.clone(), value.clone());
                Ok(value)
            }
            BinaryOp::ChainPipe => {
                let input = self.evaluate_internal(lhs, data)?;
                self.evaluate_chain(&input, rhs, data)
            }
            _ => {
                let left = self.evaluate_internal(lhs, data)?;
                let right = self.evaluate_internal(rhs, data)?;
                match op {
                    BinaryOp::Add
                    | BinaryOp::Subtract
                    | BinaryOp::Multiply
                    | BinaryOp::Divide
                    | BinaryOp::Modulo => arithmetic(op, &left, &right),
                    BinaryOp::Equal => Ok(JValue::Bool(
                        !left.is_undefined() && !right.is_undefined() && left == right,
                    )),
                    BinaryOp::NotEqual => Ok(JValue::Bool(
                        !left.is_undefined() && !right.is_undefined() && left != right,
                    )),
                    BinaryOp::LessThan
                    | BinaryOp::LessThanOrEqual
                    | BinaryOp::GreaterThan
                    | BinaryOp::GreaterThanOrEqual => compare(op, &left, &right),
                    BinaryOp::Concatenate => {
                        let mut text = stringify(&left)?;
                        text.push_str(&stringify(&right)?);
                        Ok(JValue::from(text))
                    }
                    BinaryOp::Range => range(&left, &right),
                    BinaryOp::In => {
                        if left.is_undefined() {
                            return Ok(JValue::Bool(false));
                        }
                        Ok(JValue::Bool(to_array(&right).contains(&left)))
                    }
                    BinaryOp::And | BinaryOp::Or | BinaryOp::ColonEqual | BinaryOp::ChainPipe => {
                        unreachable!("handled above")
                    }
                }
            }
        }
    }

    /// `input ~> rhs`: a call on the right receives `input` as its context,
    /// any other function value is applied to `input`.
    fn evaluate_chain(&mut self, input: &JValue, rhs: &AstNode, data: &JValue) -> Result<JValue, EvaluatorError> {
        if let AstNode::Function { name, args, is_builtin } = rhs {
            return self.evaluate_function_call(name, args, *is_builtin, CallSite::Chained(input), data);
        }

        let function = self.evaluate_internal(rhs, data)?;
        if !function.is_function() {
            return Err(EvaluatorError::TypeError(
                "T2006: The right side of the function application operator ~> must be a function".to_string(),
            ));
        }
        self.apply_function(&function, std::slice::from_ref(input), data)
    }

    fn evaluate_function_call(
        &mut self,
        name: &str,
        args: &[AstNode],
        is_builtin: bool,
        site: CallSite<'_>,
        data: &JValue,
    ) -> Result<JValue, EvaluatorError> {
        if let Some(bound) = self.context.lookup(name).filter(|_| is_builtin).cloned() {
            if !bound.is_function() {
                return Err(EvaluatorError::TypeError(format!(
                    "T1006: Attempted to invoke a non-function: ${}",
                    name
                )));
            }
            let values = self.evaluate_args(args, site, data)?;
            return self.apply_function(&bound, &values, data);
        }

        let registry = self.registry;
        let Some(builtin) = registry.lookup(name) else {
            return Err(EvaluatorError::ReferenceError(format!(
                "T1006: Attempted to invoke a non-function: ${}",
                name
            )));
        };
        if !is_builtin {
            return Err(EvaluatorError::ReferenceError(format!(
                "T1005: Attempted to invoke a non-function. Did you mean ${}?",
                name
            )));
        }

        match builtin.implementation() {
            Implementation::Evaluator => reduce::reduce(self, registry, args, site.context(), data),
            Implementation::Native(_) => {
                let mut values = self.evaluate_args(args, site, data)?;
                // `-` parameters default to the context value
                let takes_context = builtin.signature().params.first().map_or(false, |p| p.context);
                if takes_context && site.context().is_none() && values.len() < builtin.arity() {
                    values.insert(0, data.clone());
                }
                self.call_builtin(builtin, &values, data)
            }
        }
    }

    fn evaluate_args(
        &mut self,
        args: &[AstNode],
        site: CallSite<'_>,
        data: &JValue,
    ) -> Result<Vec<JValue>, EvaluatorError> {
        let mut values = Vec::with_capacity(args.len() + 1);
        if let Some(context) = site.context() {
            values.push(context.clone());
        }
        for arg in args {
            values.push(self.evaluate_internal(arg, data)?);
        }
        Ok(values)
    }

    /// Apply a function value to evaluated arguments.
    pub fn apply_function(
        &mut self,
        function: &JValue,
        args: &[JValue],
        data: &JValue,
    ) -> Result<JValue, EvaluatorError> {
        match self.function_value(function) {
            Some(FunctionRef::Closure(closure)) => self.invoke_closure(&closure, args, data),
            Some(FunctionRef::Builtin(name)) => {
                let registry = self.registry;
                let builtin = registry.lookup(&name).ok_or_else(|| EvaluatorError::UnresolvedFunctionReference {
                    name: name.to_string(),
                })?;
                self.call_builtin(builtin, args, data)
            }
            None => Err(EvaluatorError::TypeError(format!(
                "T1006: Attempted to invoke a non-function: {}",
                function
            ))),
        }
    }

    fn call_builtin(&mut self, builtin: &Builtin, args: &[JValue], data: &JValue) -> Result<JValue, EvaluatorError> {
        match builtin.implementation() {
            Implementation::Native(f) => {
                builtin
                    .signature()
                    .validate_args(args)
                    .map_err(|e| EvaluatorError::from_signature(builtin.name(), e, args))?;
                Ok(f(args)?)
            }
            Implementation::Evaluator => {
                let registry = self.registry;
                reduce::reduce_values(self, registry, args, data)
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl FoldHost for Evaluator {
    fn evaluate(&mut self, node: &AstNode, data: &JValue) -> Result<JValue, EvaluatorError> {
        self.evaluate_internal(node, data)
    }

    fn lookup_function(&self, name: &str) -> Option<FunctionRef> {
        self.context.lookup(name).and_then(|value| self.function_value(value))
    }

    fn function_value(&self, value: &JValue) -> Option<FunctionRef> {
        match value {
            JValue::Lambda(closure) => Some(FunctionRef::Closure(Rc::clone(closure))),
            JValue::Builtin { name } => Some(FunctionRef::Builtin(Rc::clone(name))),
            _ => None,
        }
    }

    fn invoke_builtin(&mut self, builtin: &Builtin, args: &[JValue], data: &JValue) -> Result<JValue, EvaluatorError> {
        self.call_builtin(builtin, args, data)
    }

    /// Parameters beyond the supplied arguments are bound to undefined;
    /// surplus arguments are ignored.
    fn invoke_closure(&mut self, closure: &Closure, args: &[JValue], data: &JValue) -> Result<JValue, EvaluatorError> {
        tracing::trace!(
            function = closure.name.as_deref().unwrap_or("lambda"),
            args = args.len(),
            "invoking closure"
        );

        self.context.push_scope();
        for (name, value) in &closure.captured_env {
            self.context.bind(name.clone(), value.clone());
        }
        for (index, param) in closure.params.iter().enumerate() {
            let value = args.get(index).cloned().unwrap_or(JValue::Undefined);
            self.context.bind(param.clone(), value);
        }
        let result = self.evaluate_internal(&closure.body, data);
        self.context.pop_scope();
        result
    }
}

/// Field access; arrays are mapped and flattened.
fn field_of(data: &JValue, field: &str) -> JValue {
    match data {
        JValue::Object(map) => map.get(field).cloned().unwrap_or(JValue::Undefined),
        JValue::Array(items) => {
            let mut results = Vec::new();
            for item in items.iter() {
                match field_of(item, field) {
                    JValue::Undefined => {}
                    JValue::Array(inner) => results.extend(inner.iter().cloned()),
                    value => results.push(value),
                }
            }
            JValue::from_sequence(results)
        }
        _ => JValue::Undefined,
    }
}

fn arithmetic(op: BinaryOp, left: &JValue, right: &JValue) -> Result<JValue, EvaluatorError> {
    let operand = |value: &JValue, side: &str| match value {
        JValue::Number(n) => Ok(Some(*n)),
        JValue::Undefined => Ok(None),
        _ => Err(EvaluatorError::TypeError(format!(
            "T2001: The {} side of the {} operator must evaluate to a number",
            side,
            op.symbol()
        ))),
    };

    let (Some(a), Some(b)) = (operand(left, "left")?, operand(right, "right")?) else {
        return Ok(JValue::Undefined);
    };

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        _ => unreachable!("not an arithmetic operator"),
    };

    if !result.is_finite() {
        return Err(EvaluatorError::EvaluationError(
            "D1001: Number out of range".to_string(),
        ));
    }
    Ok(JValue::Number(result))
}

fn compare(op: BinaryOp, left: &JValue, right: &JValue) -> Result<JValue, EvaluatorError> {
    use std::cmp::Ordering;

    let comparable = |v: &JValue| v.is_number() || v.is_string() || v.is_undefined();
    if !comparable(left) || !comparable(right) {
        return Err(EvaluatorError::TypeError(format!(
            "T2010: The expressions either side of operator \"{}\" must evaluate to numbers or strings",
            op.symbol()
        )));
    }

    let ordering = match (left, right) {
        (JValue::Undefined, _) | (_, JValue::Undefined) => return Ok(JValue::Undefined),
        (JValue::Number(a), JValue::Number(b)) => a.partial_cmp(b),
        (JValue::String(a), JValue::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(EvaluatorError::TypeError(format!(
                "T2009: The values {} and {} either side of operator \"{}\" must be of the same data type",
                left,
                right,
                op.symbol()
            )))
        }
    };

    let Some(ordering) = ordering else {
        return Ok(JValue::Bool(false));
    };
    Ok(JValue::Bool(match op {
        BinaryOp::LessThan => ordering == Ordering::Less,
        BinaryOp::LessThanOrEqual => ordering != Ordering::Greater,
        BinaryOp::GreaterThan => ordering == Ordering::Greater,
        BinaryOp::GreaterThanOrEqual => ordering != Ordering::Less,
        _ => unreachable!("not a comparison operator"),
    }))
}

/// `&` operand text; undefined concatenates as the empty string.
fn stringify(value: &JValue) -> Result<String, EvaluatorError> {
    match functions::string::string(std::slice::from_ref(value))? {
        JValue::String(s) => Ok(s.to_string()),
        _ => Ok(String::new()),
    }
}

fn range(left: &JValue, right: &JValue) -> Result<JValue, EvaluatorError> {
    let bound = |value: &JValue, code: &str, side: &str| match value {
        JValue::Undefined => Ok(None),
        JValue::Number(n) if n.fract() == 0.0 => Ok(Some(*n)),
        _ => Err(EvaluatorError::TypeError(format!(
            "{}: The {} side of the range operator (..) must evaluate to an integer",
            code, side
        ))),
    };

    let (Some(start), Some(end)) = (bound(left, "T2003", "left")?, bound(right, "T2004", "right")?) else {
        return Ok(JValue::Undefined);
    };
    if start > end {
        return Ok(JValue::array(Vec::new()));
    }

    // sized in f64 so bounds far outside i64 are rejected rather than wrapped
    let size = end - start + 1.0;
    if size > MAX_RANGE as f64 || start < i64::MIN as f64 || end >= i64::MAX as f64 {
        return Err(EvaluatorError::EvaluationError(format!(
            "D2014: The size of the sequence allocated by the range operator (..) must not exceed 1e7.  Attempted to allocate {}",
            size
        )));
    }
    let (start, end) = (start as i64, end as i64);
    Ok(JValue::array((start..=end).map(|n| JValue::Number(n as f64)).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvalue;
    use crate::parser::parse;
    use serde_json::json;

    fn eval(expr: &str) -> Result<JValue, EvaluatorError> {
        eval_with(expr, JValue::Null)
    }

    fn eval_with(expr: &str, data: JValue) -> Result<JValue, EvaluatorError> {
        let ast = parse(expr).unwrap();
        Evaluator::new().evaluate(&ast, &data)
    }

    #[test]
    fn test_reduce_product() {
        assert_eq!(
            eval("$reduce([1,2,3,4,5], function($i, $j){$i * $j})").unwrap(),
            JValue::from(120i64)
        );
    }

    #[test]
    fn test_reduce_with_initial_value() {
        assert_eq!(
            eval("$reduce([1,2,3], function($i, $j){$i + $j}, 10)").unwrap(),
            JValue::from(16i64)
        );
    }

    #[test]
    fn test_reduce_with_declared_function() {
        assert_eq!(
            eval("($product := function($i, $j){$i * $j}; $reduce([2,3,4], $product))").unwrap(),
            JValue::from(24i64)
        );
    }

    #[test]
    fn test_reduce_is_a_left_fold() {
        assert_eq!(
            eval("$reduce([10,3,2], function($a, $b){$a - $b})").unwrap(),
            JValue::from(5i64)
        );
    }

    #[test]
    fn test_reduce_single_element_skips_the_callable() {
        // the callable would turn the number into a string
        assert_eq!(
            eval("$reduce([7], function($a, $b){$a & $b})").unwrap(),
            JValue::from(7i64)
        );
    }

    #[test]
    fn test_reduce_empty_array() {
        assert!(eval("$reduce([], function($a, $b){$a + $b})").unwrap().is_undefined());
        assert_eq!(
            eval("$reduce([], function($a, $b){$a + $b}, 'seed')").unwrap(),
            JValue::string("seed")
        );
    }

    #[test]
    fn test_reduce_undefined_initial_value_still_seeds() {
        let expr = "$reduce([1,2], function($a, $b){$exists($a) ? $a + $b : 100}, $nothing)";
        assert_eq!(eval(expr).unwrap(), JValue::from(102i64));
    }

    #[test]
    fn test_reduce_builtin_matches_lambda() {
        let via_builtin = eval("$reduce([[1],[2],[3]], $append)").unwrap();
        let via_lambda = eval("$reduce([[1],[2],[3]], function($a, $b){$append($a, $b)})").unwrap();
        assert_eq!(via_builtin, jvalue!([1i64, 2i64, 3i64]));
        assert_eq!(via_builtin, via_lambda);
    }

    #[test]
    fn test_reduce_index_and_array_arguments() {
        assert_eq!(
            eval("$reduce([10,20,30], function($acc, $v, $i){$acc + $i})").unwrap(),
            JValue::from(13i64)
        );
        assert_eq!(
            eval("$reduce([10,20,30], function($acc, $v, $i, $arr){$acc + $count($arr)})").unwrap(),
            JValue::from(16i64)
        );
        // a fifth parameter is never supplied
        assert_eq!(
            eval("$reduce([10,20,30], function($acc, $v, $i, $arr, $x){$exists($x) ? 1000 : $acc + $v})").unwrap(),
            JValue::from(60i64)
        );
    }

    #[test]
    fn test_reduce_chained_and_path_step() {
        assert_eq!(
            eval("[1,2,3] ~> $reduce(function($a, $b){$a + $b})").unwrap(),
            JValue::from(6i64)
        );

        let data = JValue::from(json!({"items": [1, 2, 3]}));
        assert_eq!(
            eval_with("items.$reduce(function($a, $b){$a + $b}, 100)", data).unwrap(),
            JValue::from(106i64)
        );
    }

    #[test]
    fn test_reduce_nested_folds() {
        let expr = "$reduce([[1,2],[3,4]], function($acc, $row){$acc + $reduce($row, function($a, $b){$a * $b})}, 0)";
        assert_eq!(eval(expr).unwrap(), JValue::from(14i64));
    }

    #[test]
    fn test_reduce_parameters_shadow_outer_bindings() {
        let expr = "($a := 100; $r := $reduce([1,2,3], function($a, $b){$a + $b}); $a + $r)";
        assert_eq!(eval(expr).unwrap(), JValue::from(106i64));
    }

    #[test]
    fn test_reduce_as_function_value() {
        assert_eq!(
            eval("($r := $reduce; $r([1,2,3], function($a, $b){$a + $b}))").unwrap(),
            JValue::from(6i64)
        );
        assert_eq!(
            eval("($f := $append; $reduce([[1],[2]], $f))").unwrap(),
            jvalue!([1i64, 2i64])
        );
    }

    #[test]
    fn test_reduce_errors() {
        assert!(matches!(
            eval("$reduce('not-an-array', function($a, $b){$a + $b})"),
            Err(EvaluatorError::ArgumentType { position: 1, .. })
        ));
        assert!(matches!(
            eval("$reduce($missing, function($a, $b){$a + $b})"),
            Err(EvaluatorError::ArgumentType { position: 1, .. })
        ));
        assert!(matches!(
            eval("$reduce([1,2], $nosuch)"),
            Err(EvaluatorError::UnresolvedFunctionReference { ref name }) if name == "nosuch"
        ));
        assert!(matches!(
            eval("$reduce([1,2], function($a){$a})"),
            Err(EvaluatorError::CallableArity { arity: 1, .. })
        ));
        assert!(matches!(
            eval("$reduce([1,2])"),
            Err(EvaluatorError::ArgumentCount { actual: 1, .. })
        ));
    }

    #[test]
    fn test_reduce_propagates_callable_errors() {
        let err = eval("$reduce([1,'x'], function($a, $b){$a + $b})").unwrap_err();
        assert!(err.to_string().contains("T2001"));
    }

    #[test]
    fn test_recursion_limit() {
        let ast = parse("($f := function($n){ $f($n + 1) }; $f(0))").unwrap();
        let mut evaluator = Evaluator::new().with_config(EvaluatorConfig {
            max_recursion_depth: 40,
        });
        let err = evaluator.evaluate(&ast, &JValue::Null).unwrap_err();
        assert!(err.to_string().contains("U1001"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EvaluatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EvaluatorConfig::default());
        let config: EvaluatorConfig = serde_json::from_str(r#"{"max_recursion_depth": 10}"#).unwrap();
        assert_eq!(config.max_recursion_depth, 10);
    }

    #[test]
    fn test_paths() {
        let data = JValue::from(json!({
            "order": {"lines": [{"qty": 2}, {"qty": 3}, {"sku": "x"}]}
        }));
        assert_eq!(eval_with("order.lines.qty", data.clone()).unwrap(), jvalue!([2i64, 3i64]));
        assert!(eval_with("order.missing.qty", data.clone()).unwrap().is_undefined());
        assert_eq!(eval_with("order.lines.sku", data).unwrap(), JValue::string("x"));
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), JValue::from(7i64));
        assert_eq!(eval("-(2 - 5)").unwrap(), JValue::from(3i64));
        assert!(eval("1 + $missing").unwrap().is_undefined());
        assert!(matches!(eval("1 + 'a'"), Err(EvaluatorError::TypeError(_))));
        assert!(eval("1 / 0").is_err());
        assert_eq!(eval("3 > 2 and 'a' < 'b'").unwrap(), JValue::Bool(true));
        assert!(eval("1 < 'a'").is_err());
        assert_eq!(eval("[1,2] = [1,2]").unwrap(), JValue::Bool(true));
        assert_eq!(eval("2 in [1,2,3]").unwrap(), JValue::Bool(true));
    }

    #[test]
    fn test_constructors() {
        assert_eq!(eval("[1..4]").unwrap(), jvalue!([1i64, 2i64, 3i64, 4i64]));
        assert_eq!(eval("[[1,2],[3]]").unwrap(), jvalue!([[1i64, 2i64], [3i64]]));
        assert_eq!(
            eval("{'a': 1, 'b': $missing}").unwrap(),
            jvalue!({"a": 1i64})
        );
        assert!(eval("{1: 2}").is_err());
        assert!(eval("[1..20000000]").is_err());
    }

    #[test]
    fn test_range_bounds_beyond_i64() {
        let err = eval("[-1e19..1e19]").unwrap_err();
        assert!(err.to_string().contains("D2014"), "{}", err);

        let err = eval("$reduce([-1..9.3e18], function($a, $b){ $a + $b })").unwrap_err();
        assert!(err.to_string().contains("D2014"), "{}", err);

        assert_eq!(eval("[-2..0]").unwrap(), JValue::from(json!([-2, -1, 0])));
    }

    #[test]
    fn test_strings_and_conditionals() {
        assert_eq!(eval("'n=' & 5").unwrap(), JValue::string("n=5"));
        assert_eq!(eval("true ? 'y' : 'n'").unwrap(), JValue::string("y"));
        assert!(eval("false ? 'y'").unwrap().is_undefined());
        assert_eq!(eval("$uppercase('abc')").unwrap(), JValue::string("ABC"));
        assert_eq!(eval_with("$uppercase()", JValue::string("ctx")).unwrap(), JValue::string("CTX"));
        assert_eq!(eval("'abc' ~> $uppercase()").unwrap(), JValue::string("ABC"));
    }

    #[test]
    fn test_block_scope_is_discarded() {
        assert!(eval("(($inner := 1; $inner); $inner)").unwrap().is_undefined());
        assert_eq!(eval("($x := 2; ($x := 3; $x); $x)").unwrap(), JValue::from(2i64));
    }

    #[test]
    fn test_function_call_errors() {
        assert!(matches!(eval("$nosuch(1)"), Err(EvaluatorError::ReferenceError(_))));
        assert!(matches!(eval("uppercase('a')"), Err(EvaluatorError::ReferenceError(_))));
        assert!(matches!(
            eval("$uppercase(1)"),
            Err(EvaluatorError::ArgumentType { position: 1, .. })
        ));
        assert!(matches!(
            eval("$append(1)"),
            Err(EvaluatorError::ArgumentCount { actual: 1, .. })
        ));
        assert!(eval("($x := 1; $x(2))").is_err());
    }

    #[test]
    fn test_signature_errors_convert() {
        let err: EvaluatorError = SignatureError::InvalidSignature("bad".to_string()).into();
        assert!(matches!(err, EvaluatorError::EvaluationError(_)));

        let err = EvaluatorError::from_signature(
            "sum",
            SignatureError::ArgumentTypeMismatch {
                index: 1,
                expected: "array".to_string(),
            },
            &[JValue::Bool(true)],
        );
        assert_eq!(
            err.to_string(),
            "T0410: Argument 1 of function sum does not match function signature (expected array, got boolean)"
        );
    }

    #[test]
    fn test_context_bindings() {
        let mut context = Context::new();
        context.bind("limit", JValue::from(3i64));
        let body = parse("$a + $b").unwrap();
        context.bind_lambda("plus", Closure::anonymous(vec!["a".to_string(), "b".to_string()], body));
        assert!(context.lookup_lambda("plus").is_some());

        let ast = parse("$reduce([1,2,3], $plus, $limit)").unwrap();
        let mut evaluator = Evaluator::with_context(context);
        assert_eq!(evaluator.evaluate(&ast, &JValue::Null).unwrap(), JValue::from(9i64));
    }

    #[test]
    fn test_closures_are_owned_by_values() {
        // each step builds a fresh closure; only the last one survives
        let result = eval("$reduce([1,2,3], function($acc, $v){ function($x){ $x + $v } }, 0)").unwrap();
        let JValue::Lambda(closure) = &result else {
            panic!("expected a lambda, got {:?}", result);
        };
        assert_eq!(Rc::strong_count(closure), 1);
        assert_eq!(closure.captured_env.get("v"), Some(&JValue::from(3i64)));

        let adder = "($add := function($n){ function($x){ $x + $n } }; $inc := $add(1); $inc(5))";
        assert_eq!(eval(adder).unwrap(), JValue::from(6i64));
    }

    #[test]
    fn test_assignment_names_anonymous_lambda() {
        let mut evaluator = Evaluator::new();
        let ast = parse("$sum := function($a, $b){ $a + $b }").unwrap();
        evaluator.evaluate(&ast, &JValue::Null).unwrap();

        let closure = evaluator.context().lookup_lambda("sum").unwrap();
        assert_eq!(closure.name.as_deref(), Some("sum"));
        assert_eq!(closure.arity(), 2);
    }
}
