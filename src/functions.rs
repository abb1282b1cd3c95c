// Built-in function implementations and the registry that names them

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use indexmap::IndexMap;
use thiserror::Error;

use crate::signature::{Signature, SignatureError};
use crate::utils::{flatten, number_to_string, to_array};
use crate::value::JValue;

/// Function errors
#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("Argument error: {0}")]
    ArgumentError(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// A builtin that works on already-evaluated arguments.
pub type NativeFn = fn(&[JValue]) -> Result<JValue, FunctionError>;

/// How a builtin is carried out.
#[derive(Clone, Copy)]
pub enum Implementation {
    Native(NativeFn),
    /// Implemented by the evaluator itself because it needs the unevaluated
    /// call site (higher-order functions such as `reduce`).
    Evaluator,
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Implementation::Native(_) => write!(f, "Native"),
            Implementation::Evaluator => write!(f, "Evaluator"),
        }
    }
}

/// A registered builtin function.
#[derive(Debug, Clone)]
pub struct Builtin {
    name: &'static str,
    signature: Signature,
    implementation: Implementation,
}

impl Builtin {
    pub fn new(
        name: &'static str,
        signature: &str,
        implementation: Implementation,
    ) -> Result<Self, SignatureError> {
        Ok(Builtin {
            name,
            signature: Signature::parse(signature)?,
            implementation,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of parameters the builtin declares.
    pub fn arity(&self) -> usize {
        self.signature.arity()
    }

    pub fn implementation(&self) -> Implementation {
        self.implementation
    }
}

/// Name → builtin lookup table.
///
/// [`BuiltinRegistry::standard`] is the process-wide, read-only registry used
/// by the evaluator; other registries can be assembled with
/// [`BuiltinRegistry::register`] (mostly useful in tests).
#[derive(Debug, Default)]
pub struct BuiltinRegistry {
    functions: HashMap<&'static str, Builtin>,
}

const STANDARD_LIBRARY: &[(&str, &str, Implementation)] = &[
    ("reduce", "<afj?:j>", Implementation::Evaluator),
    ("sum", "<a<n>:n>", Implementation::Native(numeric::sum)),
    ("max", "<a<n>:n>", Implementation::Native(numeric::max)),
    ("min", "<a<n>:n>", Implementation::Native(numeric::min)),
    ("average", "<a<n>:n>", Implementation::Native(numeric::average)),
    ("abs", "<n-:n>", Implementation::Native(numeric::abs)),
    ("floor", "<n-:n>", Implementation::Native(numeric::floor)),
    ("ceil", "<n-:n>", Implementation::Native(numeric::ceil)),
    ("sqrt", "<n-:n>", Implementation::Native(numeric::sqrt)),
    ("power", "<n-n:n>", Implementation::Native(numeric::power)),
    ("number", "<(nsb)-:n>", Implementation::Native(numeric::number)),
    ("string", "<x-:s>", Implementation::Native(string::string)),
    ("length", "<s-:n>", Implementation::Native(string::length)),
    ("uppercase", "<s-:s>", Implementation::Native(string::uppercase)),
    ("lowercase", "<s-:s>", Implementation::Native(string::lowercase)),
    ("join", "<a<s>s?:s>", Implementation::Native(string::join)),
    ("contains", "<s-s:b>", Implementation::Native(string::contains)),
    ("substringBefore", "<s-s:s>", Implementation::Native(string::substring_before)),
    ("substringAfter", "<s-s:s>", Implementation::Native(string::substring_after)),
    ("count", "<a:n>", Implementation::Native(array::count)),
    ("append", "<xx:a>", Implementation::Native(array::append)),
    ("keys", "<x-:a<s>>", Implementation::Native(object::keys)),
    ("lookup", "<x-s:x>", Implementation::Native(object::lookup)),
    ("merge", "<a<o>:o>", Implementation::Native(object::merge)),
    ("boolean", "<x-:b>", Implementation::Native(logic::boolean)),
    ("not", "<x-:b>", Implementation::Native(logic::not)),
    ("exists", "<x:b>", Implementation::Native(logic::exists)),
];

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard library, built once per process.
    pub fn standard() -> &'static BuiltinRegistry {
        static STANDARD: OnceLock<BuiltinRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| {
            let mut registry = BuiltinRegistry::new();
            for &(name, signature, implementation) in STANDARD_LIBRARY {
                // signatures above are static and covered by tests
                if let Err(e) = registry.register(name, signature, implementation) {
                    panic!("builtin {} has an invalid signature: {}", name, e);
                }
            }
            registry
        })
    }

    pub fn register(
        &mut self,
        name: &'static str,
        signature: &str,
        implementation: Implementation,
    ) -> Result<(), SignatureError> {
        self.functions
            .insert(name, Builtin::new(name, signature, implementation)?);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Builtin> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Collect numbers out of an `a<n>` argument.
fn numbers(function: &str, value: &JValue) -> Result<Vec<f64>, FunctionError> {
    flatten(&to_array(value))
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                FunctionError::TypeError(format!(
                    "T0412: Argument 1 of function {} must be an array of numbers",
                    function
                ))
            })
        })
        .collect()
}

fn arg(args: &[JValue], index: usize) -> &JValue {
    args.get(index).unwrap_or(&JValue::Undefined)
}

/// Built-in numeric functions
pub mod numeric {
    use super::*;

    /// $sum() - Sum array of numbers
    pub fn sum(args: &[JValue]) -> Result<JValue, FunctionError> {
        let value = arg(args, 0);
        if value.is_undefined() {
            return Ok(JValue::Undefined);
        }
        Ok(JValue::Number(numbers("sum", value)?.iter().sum()))
    }

    pub fn max(args: &[JValue]) -> Result<JValue, FunctionError> {
        let values = numbers("max", arg(args, 0))?;
        Ok(values
            .into_iter()
            .reduce(f64::max)
            .map_or(JValue::Undefined, JValue::Number))
    }

    pub fn min(args: &[JValue]) -> Result<JValue, FunctionError> {
        let values = numbers("min", arg(args, 0))?;
        Ok(values
            .into_iter()
            .reduce(f64::min)
            .map_or(JValue::Undefined, JValue::Number))
    }

    pub fn average(args: &[JValue]) -> Result<JValue, FunctionError> {
        let values = numbers("average", arg(args, 0))?;
        if values.is_empty() {
            return Ok(JValue::Undefined);
        }
        Ok(JValue::Number(values.iter().sum::<f64>() / values.len() as f64))
    }

    fn unary(args: &[JValue], op: fn(f64) -> f64) -> Result<JValue, FunctionError> {
        Ok(arg(args, 0)
            .as_f64()
            .map_or(JValue::Undefined, |n| JValue::Number(op(n))))
    }

    pub fn abs(args: &[JValue]) -> Result<JValue, FunctionError> {
        unary(args, f64::abs)
    }

    pub fn floor(args: &[JValue]) -> Result<JValue, FunctionError> {
        unary(args, f64::floor)
    }

    pub fn ceil(args: &[JValue]) -> Result<JValue, FunctionError> {
        unary(args, f64::ceil)
    }

    pub fn sqrt(args: &[JValue]) -> Result<JValue, FunctionError> {
        if arg(args, 0).as_f64().map_or(false, |n| n < 0.0) {
            return Err(FunctionError::ArgumentError(
                "D3060: The sqrt function cannot be applied to a negative number".to_string(),
            ));
        }
        unary(args, f64::sqrt)
    }

    pub fn power(args: &[JValue]) -> Result<JValue, FunctionError> {
        match (arg(args, 0).as_f64(), arg(args, 1).as_f64()) {
            (Some(base), Some(exponent)) => {
                let result = base.powf(exponent);
                if result.is_finite() {
                    Ok(JValue::Number(result))
                } else {
                    Err(FunctionError::RuntimeError(format!(
                        "D3061: The power function has resulted in a value that cannot be represented as a JSON number: base={}, exponent={}",
                        base, exponent
                    )))
                }
            }
            _ => Ok(JValue::Undefined),
        }
    }

    /// $number() - Cast value to number
    pub fn number(args: &[JValue]) -> Result<JValue, FunctionError> {
        match arg(args, 0) {
            JValue::Undefined => Ok(JValue::Undefined),
            JValue::Number(n) => Ok(JValue::Number(*n)),
            JValue::Bool(b) => Ok(JValue::Number(if *b { 1.0 } else { 0.0 })),
            JValue::String(s) => s.trim().parse::<f64>().map(JValue::Number).map_err(|_| {
                FunctionError::TypeError(format!(
                    "D3030: Unable to cast value to a number: \"{}\"",
                    s
                ))
            }),
            other => Err(FunctionError::TypeError(format!(
                "D3030: Unable to cast value to a number: {}",
                other
            ))),
        }
    }
}

/// Built-in string functions
pub mod string {
    use super::*;

    /// $string() - Cast value to string
    pub fn string(args: &[JValue]) -> Result<JValue, FunctionError> {
        Ok(match arg(args, 0) {
            JValue::Undefined => JValue::Undefined,
            JValue::String(s) => JValue::String(s.clone()),
            JValue::Number(n) => JValue::from(number_to_string(*n)),
            JValue::Lambda(_) | JValue::Builtin { .. } => JValue::string(""),
            other => JValue::from(other.to_string()),
        })
    }

    fn with_str(args: &[JValue], f: impl Fn(&str) -> JValue) -> Result<JValue, FunctionError> {
        Ok(arg(args, 0).as_str().map_or(JValue::Undefined, f))
    }

    pub fn length(args: &[JValue]) -> Result<JValue, FunctionError> {
        with_str(args, |s| JValue::from(s.chars().count()))
    }

    pub fn uppercase(args: &[JValue]) -> Result<JValue, FunctionError> {
        with_str(args, |s| JValue::from(s.to_uppercase()))
    }

    pub fn lowercase(args: &[JValue]) -> Result<JValue, FunctionError> {
        with_str(args, |s| JValue::from(s.to_lowercase()))
    }

    pub fn join(args: &[JValue]) -> Result<JValue, FunctionError> {
        let value = arg(args, 0);
        if value.is_undefined() {
            return Ok(JValue::Undefined);
        }
        let separator = arg(args, 1).as_str().unwrap_or("");
        let parts = to_array(value)
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    FunctionError::TypeError(
                        "T0412: Argument 1 of function join must be an array of strings".to_string(),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JValue::from(parts.join(separator)))
    }

    pub fn contains(args: &[JValue]) -> Result<JValue, FunctionError> {
        match (arg(args, 0).as_str(), arg(args, 1).as_str()) {
            (Some(s), Some(pattern)) => Ok(JValue::Bool(s.contains(pattern))),
            _ => Ok(JValue::Undefined),
        }
    }

    pub fn substring_before(args: &[JValue]) -> Result<JValue, FunctionError> {
        match (arg(args, 0).as_str(), arg(args, 1).as_str()) {
            (Some(s), Some(chars)) => Ok(JValue::string(s.split_once(chars).map_or(s, |(before, _)| before))),
            _ => Ok(JValue::Undefined),
        }
    }

    pub fn substring_after(args: &[JValue]) -> Result<JValue, FunctionError> {
        match (arg(args, 0).as_str(), arg(args, 1).as_str()) {
            (Some(s), Some(chars)) => Ok(JValue::string(s.split_once(chars).map_or(s, |(_, after)| after))),
            _ => Ok(JValue::Undefined),
        }
    }
}

/// Built-in array functions
pub mod array {
    use super::*;

    /// $count() - Count array elements
    pub fn count(args: &[JValue]) -> Result<JValue, FunctionError> {
        Ok(JValue::from(to_array(arg(args, 0)).len()))
    }

    /// $append() - Append to array
    pub fn append(args: &[JValue]) -> Result<JValue, FunctionError> {
        let (first, second) = (arg(args, 0), arg(args, 1));
        if first.is_undefined() {
            return Ok(second.clone());
        }
        if second.is_undefined() {
            return Ok(first.clone());
        }
        let mut result = to_array(first);
        result.extend(to_array(second));
        Ok(JValue::array(result))
    }
}

/// Built-in object functions
pub mod object {
    use super::*;

    /// $keys() - Get object keys; for an array of objects, the union of their keys
    pub fn keys(args: &[JValue]) -> Result<JValue, FunctionError> {
        let mut keys: Vec<String> = Vec::new();
        for item in to_array(arg(args, 0)) {
            if let Some(map) = item.as_object() {
                for key in map.keys() {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        Ok(JValue::from_sequence(keys.into_iter().map(JValue::from).collect()))
    }

    pub fn lookup(args: &[JValue]) -> Result<JValue, FunctionError> {
        let key = arg(args, 1).as_str().unwrap_or_default();
        let found: Vec<JValue> = to_array(arg(args, 0))
            .iter()
            .filter_map(|item| item.get(key).cloned())
            .collect();
        Ok(JValue::from_sequence(found))
    }

    pub fn merge(args: &[JValue]) -> Result<JValue, FunctionError> {
        let value = arg(args, 0);
        if value.is_undefined() {
            return Ok(JValue::Undefined);
        }
        let mut merged = IndexMap::new();
        for item in to_array(value) {
            let map = item.as_object().ok_or_else(|| {
                FunctionError::TypeError(
                    "T0412: Argument 1 of function merge must be an array of objects".to_string(),
                )
            })?;
            for (k, v) in map.iter() {
                merged.insert(k.clone(), v.clone());
            }
        }
        Ok(JValue::object(merged))
    }
}

/// Built-in boolean functions
pub mod logic {
    use super::*;

    pub fn boolean(args: &[JValue]) -> Result<JValue, FunctionError> {
        let value = arg(args, 0);
        if value.is_undefined() {
            return Ok(JValue::Undefined);
        }
        Ok(JValue::Bool(value.is_truthy()))
    }

    pub fn not(args: &[JValue]) -> Result<JValue, FunctionError> {
        let value = arg(args, 0);
        if value.is_undefined() {
            return Ok(JValue::Undefined);
        }
        Ok(JValue::Bool(!value.is_truthy()))
    }

    pub fn exists(args: &[JValue]) -> Result<JValue, FunctionError> {
        Ok(JValue::Bool(!arg(args, 0).is_undefined()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvalue;

    #[test]
    fn test_standard_registry_parses_all_signatures() {
        let registry = BuiltinRegistry::standard();
        for (name, _, _) in STANDARD_LIBRARY {
            assert!(registry.contains(name), "missing builtin {}", name);
        }
        assert!(registry.lookup("nosuch").is_none());
    }

    #[test]
    fn test_reduce_is_evaluator_implemented_and_returns_any_value() {
        let reduce = BuiltinRegistry::standard().lookup("reduce").unwrap();
        assert!(matches!(reduce.implementation(), Implementation::Evaluator));
        assert_eq!(reduce.arity(), 3);
        assert_eq!(reduce.signature().return_type, crate::signature::ParamType::Json);
    }

    #[test]
    fn test_arity_comes_from_signature() {
        let registry = BuiltinRegistry::standard();
        assert_eq!(registry.lookup("append").unwrap().arity(), 2);
        assert_eq!(registry.lookup("sum").unwrap().arity(), 1);
        assert_eq!(registry.lookup("join").unwrap().arity(), 2);
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(numeric::sum(&[jvalue!([1i64, 2i64, 3.5])]).unwrap(), JValue::Number(6.5));
        assert_eq!(numeric::sum(&[JValue::Number(4.0)]).unwrap(), JValue::Number(4.0));
        assert!(numeric::sum(&[jvalue!([1i64, "x"])]).is_err());
        assert_eq!(numeric::max(&[jvalue!([3i64, 9i64, 2i64])]).unwrap(), JValue::Number(9.0));
        assert!(numeric::min(&[jvalue!([])]).unwrap().is_undefined());
        assert_eq!(numeric::average(&[jvalue!([2i64, 4i64])]).unwrap(), JValue::Number(3.0));
        assert_eq!(
            numeric::power(&[JValue::Number(2.0), JValue::Number(10.0)]).unwrap(),
            JValue::Number(1024.0)
        );
        assert!(numeric::sqrt(&[JValue::Number(-1.0)]).is_err());
        assert_eq!(numeric::number(&[JValue::string(" 12.5")]).unwrap(), JValue::Number(12.5));
        assert!(numeric::number(&[JValue::string("abc")]).is_err());
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            string::uppercase(&[JValue::string("hello")]).unwrap(),
            JValue::string("HELLO")
        );
        assert_eq!(
            string::lowercase(&[JValue::string("HELLO")]).unwrap(),
            JValue::string("hello")
        );
        assert_eq!(string::length(&[JValue::string("héllo")]).unwrap(), JValue::from(5usize));
        assert_eq!(string::string(&[JValue::Number(120.0)]).unwrap(), JValue::string("120"));
        assert_eq!(string::string(&[jvalue!([1i64, "a"])]).unwrap(), JValue::string(r#"[1,"a"]"#));
        assert_eq!(
            string::join(&[jvalue!(["a", "b", "c"]), JValue::string("-")]).unwrap(),
            JValue::string("a-b-c")
        );
        assert_eq!(
            string::substring_before(&[JValue::string("key=value"), JValue::string("=")]).unwrap(),
            JValue::string("key")
        );
        assert_eq!(
            string::substring_after(&[JValue::string("key=value"), JValue::string("=")]).unwrap(),
            JValue::string("value")
        );
    }

    #[test]
    fn test_append() {
        assert_eq!(
            array::append(&[jvalue!([1i64, 2i64]), JValue::Number(3.0)]).unwrap(),
            jvalue!([1i64, 2i64, 3i64])
        );
        assert_eq!(
            array::append(&[JValue::Undefined, jvalue!([1i64])]).unwrap(),
            jvalue!([1i64])
        );
    }

    #[test]
    fn test_object_functions() {
        let data = jvalue!({"a": 1i64, "b": 2i64});
        assert_eq!(object::keys(&[data.clone()]).unwrap(), jvalue!(["a", "b"]));
        assert_eq!(
            object::lookup(&[data, JValue::string("b")]).unwrap(),
            JValue::Number(2.0)
        );
        assert_eq!(
            object::merge(&[jvalue!([{"a": 1i64}, {"b": 2i64}, {"a": 3i64}])]).unwrap(),
            jvalue!({"a": 3i64, "b": 2i64})
        );
        assert!(object::merge(&[jvalue!([1i64])]).is_err());
    }

    #[test]
    fn test_logic_functions() {
        assert_eq!(logic::not(&[JValue::string("")]).unwrap(), JValue::Bool(true));
        assert!(logic::boolean(&[JValue::Undefined]).unwrap().is_undefined());
        assert_eq!(logic::exists(&[JValue::Null]).unwrap(), JValue::Bool(true));
        assert_eq!(logic::exists(&[JValue::Undefined]).unwrap(), JValue::Bool(false));
    }
}
