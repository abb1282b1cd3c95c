// $reduce: fold a callable across an array
//
// `$reduce(array, function [, init])` applies `function(accumulator, value[,
// index[, array]])` to each member of `array` left to right, threading the
// result of each call into the next. Without `init` the first member seeds the
// accumulator and folding starts at the second member.
//
// The evaluator reaches this module through `reduce` (call site with
// unevaluated arguments) or `reduce_values` (`$reduce` invoked as a function
// value). Everything the fold needs from the evaluator goes through
// `FoldHost`, so the driver can be exercised with a stub host.

use std::fmt;
use std::rc::Rc;

use crate::ast::AstNode;
use crate::evaluator::{Closure, EvaluatorError};
use crate::functions::{Builtin, BuiltinRegistry};
use crate::value::JValue;

const FUNCTION_NAME: &str = "reduce";

/// Positions in a call frame: accumulator, element, index, array.
const FRAME_SLOTS: usize = 4;

/// Minimum parameters a fold callable must declare (accumulator and element).
const MIN_ARITY: usize = 2;

/// A function reachable by name or carried in a value.
#[derive(Debug, Clone)]
pub enum FunctionRef {
    Closure(Rc<Closure>),
    Builtin(Rc<str>),
}

/// Capabilities the fold borrows from the evaluator.
pub trait FoldHost {
    /// Evaluate an argument expression against `data` in the current scope.
    fn evaluate(&mut self, node: &AstNode, data: &JValue) -> Result<JValue, EvaluatorError>;

    /// Resolve a name through the user function table.
    fn lookup_function(&self, name: &str) -> Option<FunctionRef>;

    /// Resolve a function-valued argument (`JValue::Lambda` / `JValue::Builtin`).
    fn function_value(&self, value: &JValue) -> Option<FunctionRef>;

    fn invoke_builtin(
        &mut self,
        builtin: &Builtin,
        args: &[JValue],
        data: &JValue,
    ) -> Result<JValue, EvaluatorError>;

    /// Run a closure body in a nested scope with `args` bound to its parameters.
    fn invoke_closure(
        &mut self,
        closure: &Closure,
        args: &[JValue],
        data: &JValue,
    ) -> Result<JValue, EvaluatorError>;
}

/// The function being folded, resolved once before the loop starts.
#[derive(Debug, Clone)]
pub enum Callable<'r> {
    Builtin(&'r Builtin),
    UserFunction { name: String, closure: Rc<Closure> },
    InlineLambda(Rc<Closure>),
}

impl Callable<'_> {
    /// Declared parameter count.
    pub fn arity(&self) -> usize {
        match self {
            Callable::Builtin(builtin) => builtin.arity(),
            Callable::UserFunction { closure, .. } | Callable::InlineLambda(closure) => closure.arity(),
        }
    }

    fn invoke<H: FoldHost>(&self, host: &mut H, args: &[JValue], data: &JValue) -> Result<JValue, EvaluatorError> {
        match self {
            Callable::Builtin(builtin) => host.invoke_builtin(builtin, args, data),
            Callable::UserFunction { closure, .. } | Callable::InlineLambda(closure) => {
                host.invoke_closure(closure, args, data)
            }
        }
    }
}

impl fmt::Display for Callable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Builtin(builtin) => write!(f, "builtin ${}", builtin.name()),
            Callable::UserFunction { name, .. } => write!(f, "function ${}", name),
            Callable::InlineLambda(_) => write!(f, "lambda"),
        }
    }
}

/// Argument bindings for a single invocation of the callable.
#[derive(Debug)]
pub struct CallFrame {
    slots: [JValue; FRAME_SLOTS],
}

impl CallFrame {
    pub fn new(accumulator: JValue, element: JValue, index: usize, array: JValue) -> Self {
        CallFrame {
            slots: [accumulator, element, JValue::from(index), array],
        }
    }

    /// The leading slots a callable of `arity` parameters accepts.
    pub fn arguments(&self, arity: usize) -> &[JValue] {
        &self.slots[..arity.min(FRAME_SLOTS)]
    }
}

/// `$reduce(...)` at a call site.
///
/// `context` is the value flowing into the call when it is the target of `~>`
/// or a path step; the array then comes from the context and every argument
/// shifts one position left.
#[tracing::instrument(level = "debug", skip_all, fields(chained = context.is_some()))]
pub fn reduce<H: FoldHost>(
    host: &mut H,
    registry: &BuiltinRegistry,
    args: &[AstNode],
    context: Option<&JValue>,
    data: &JValue,
) -> Result<JValue, EvaluatorError> {
    let offset = usize::from(context.is_none());
    check_arg_count(args.len() + usize::from(context.is_some()))?;

    let input = match context {
        Some(value) => value.clone(),
        None => host.evaluate(&args[0], data)?,
    };
    let items = expect_array(&input)?;

    let callable = classify(&*host, registry, &args[offset])?;

    let seed = match args.get(offset + 1) {
        Some(node) => Some(host.evaluate(node, data)?),
        None => None,
    };

    fold(host, &callable, items, seed, data)
}

/// `$reduce` applied to already-evaluated arguments, e.g. through
/// `$r := $reduce; $r($items, $f)`.
#[tracing::instrument(level = "debug", skip_all)]
pub fn reduce_values<H: FoldHost>(
    host: &mut H,
    registry: &BuiltinRegistry,
    args: &[JValue],
    data: &JValue,
) -> Result<JValue, EvaluatorError> {
    check_arg_count(args.len())?;
    let items = expect_array(&args[0])?;
    let callable = classify_value(&*host, registry, &args[1])?;
    fold(host, &callable, items, args.get(2).cloned(), data)
}

fn check_arg_count(supplied: usize) -> Result<(), EvaluatorError> {
    if (MIN_ARITY..=3).contains(&supplied) {
        Ok(())
    } else {
        Err(EvaluatorError::ArgumentCount {
            function: FUNCTION_NAME.to_string(),
            expected: "2 to 3".to_string(),
            actual: supplied,
        })
    }
}

fn expect_array(value: &JValue) -> Result<Rc<Vec<JValue>>, EvaluatorError> {
    match value {
        JValue::Array(items) => Ok(Rc::clone(items)),
        _ => Err(EvaluatorError::ArgumentType {
            function: FUNCTION_NAME.to_string(),
            position: 1,
            expected: "array".to_string(),
            found: value.type_name().to_string(),
        }),
    }
}

/// Classify the node in the function position of the call.
///
/// A variable name resolves through the builtin registry first and the user
/// function table second; a lambda literal becomes an anonymous closure.
pub fn classify<'r, H: FoldHost>(
    host: &H,
    registry: &'r BuiltinRegistry,
    node: &AstNode,
) -> Result<Callable<'r>, EvaluatorError> {
    let callable = match node {
        AstNode::Variable(name) => {
            if let Some(builtin) = registry.lookup(name) {
                Callable::Builtin(builtin)
            } else {
                match host.lookup_function(name) {
                    Some(FunctionRef::Closure(closure)) => Callable::UserFunction {
                        name: name.clone(),
                        closure,
                    },
                    Some(FunctionRef::Builtin(builtin)) => registry
                        .lookup(&builtin)
                        .map(Callable::Builtin)
                        .ok_or_else(|| unresolved(name))?,
                    None => return Err(unresolved(name)),
                }
            }
        }
        AstNode::Lambda { params, body } => {
            Callable::InlineLambda(Rc::new(Closure::anonymous(params.clone(), (**body).clone())))
        }
        other => {
            return Err(EvaluatorError::ArgumentType {
                function: FUNCTION_NAME.to_string(),
                position: 2,
                expected: "function".to_string(),
                found: format!("{:?}", other),
            })
        }
    };

    check_arity(callable)
}

fn classify_value<'r, H: FoldHost>(
    host: &H,
    registry: &'r BuiltinRegistry,
    value: &JValue,
) -> Result<Callable<'r>, EvaluatorError> {
    let not_a_function = || EvaluatorError::ArgumentType {
        function: FUNCTION_NAME.to_string(),
        position: 2,
        expected: "function".to_string(),
        found: value.type_name().to_string(),
    };

    let callable = match host.function_value(value).ok_or_else(not_a_function)? {
        FunctionRef::Builtin(name) => Callable::Builtin(registry.lookup(&name).ok_or_else(|| unresolved(&name))?),
        FunctionRef::Closure(closure) => match closure.name.clone() {
            Some(name) => Callable::UserFunction { name, closure },
            None => Callable::InlineLambda(closure),
        },
    };

    check_arity(callable)
}

fn check_arity(callable: Callable<'_>) -> Result<Callable<'_>, EvaluatorError> {
    let arity = callable.arity();
    if arity < MIN_ARITY {
        return Err(EvaluatorError::CallableArity {
            function: FUNCTION_NAME.to_string(),
            arity,
        });
    }
    Ok(callable)
}

fn unresolved(name: &str) -> EvaluatorError {
    EvaluatorError::UnresolvedFunctionReference {
        name: name.to_string(),
    }
}

/// The fold loop proper.
fn fold<H: FoldHost>(
    host: &mut H,
    callable: &Callable<'_>,
    items: Rc<Vec<JValue>>,
    seed: Option<JValue>,
    data: &JValue,
) -> Result<JValue, EvaluatorError> {
    let (mut accumulator, start) = match seed {
        Some(seed) => (seed, 0),
        None => match items.first() {
            Some(first) => (first.clone(), 1),
            // empty array, nothing to seed from
            None => {
                tracing::debug!(%callable, "empty array without initial value");
                return Ok(JValue::Undefined);
            }
        },
    };

    let arity = callable.arity();
    let array = JValue::Array(Rc::clone(&items));
    tracing::debug!(%callable, arity, start, len = items.len(), "folding");

    for (index, element) in items.iter().enumerate().skip(start) {
        let frame = CallFrame::new(accumulator, element.clone(), index, array.clone());
        tracing::trace!(index, "fold step");
        accumulator = callable.invoke(host, frame.arguments(arity), data)?;
    }

    Ok(accumulator)
}
