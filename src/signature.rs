// Function signature parsing and argument validation
//
// Signatures use the JSONata notation, e.g. `<afj?:j>`:
//   b boolean, n number, s string, l null, a array (optionally `a<n>`),
//   o object, f function, j any JSON value, x anything, u = (bnsl),
//   `(sao)` a choice of types.
// Modifiers: `?` optional, `+` one or more, `-` defaults to the context value.

use thiserror::Error;

use crate::value::JValue;

/// Signature validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Argument count mismatch: expected {expected}, got {actual}")]
    ArgumentCountMismatch { expected: String, actual: usize },

    #[error("Argument {index} does not match function signature (expected {expected})")]
    ArgumentTypeMismatch { index: usize, expected: String },
}

/// Parameter type
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Null,
    Array,
    Object,
    Function,
    /// `j`: any JSON value (not a function)
    Json,
    /// `x`: anything
    Any,
    Choice(Vec<ParamType>),
}

impl ParamType {
    fn from_symbol(symbol: char) -> Option<ParamType> {
        Some(match symbol {
            'b' => ParamType::Boolean,
            'n' => ParamType::Number,
            's' => ParamType::String,
            'l' => ParamType::Null,
            'a' => ParamType::Array,
            'o' => ParamType::Object,
            'f' => ParamType::Function,
            'j' => ParamType::Json,
            'x' => ParamType::Any,
            'u' => ParamType::Choice(vec![
                ParamType::Boolean,
                ParamType::Number,
                ParamType::String,
                ParamType::Null,
            ]),
            _ => return None,
        })
    }

    /// Whether `value` may be passed for a parameter of this type.
    ///
    /// Undefined always passes: functions decide for themselves what an
    /// undefined argument means. Array parameters also take single values,
    /// which the callee treats as a one-element array.
    pub fn accepts(&self, value: &JValue) -> bool {
        if value.is_undefined() {
            return true;
        }
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => matches!(value, JValue::Bool(_)),
            ParamType::Null => value.is_null(),
            ParamType::Array => !value.is_function(),
            ParamType::Object => value.is_object(),
            ParamType::Function => value.is_function(),
            ParamType::Json => !value.is_function(),
            ParamType::Any => true,
            ParamType::Choice(options) => options.iter().any(|t| t.accepts(value)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Number => "number".to_string(),
            ParamType::Boolean => "boolean".to_string(),
            ParamType::Null => "null".to_string(),
            ParamType::Array => "array".to_string(),
            ParamType::Object => "object".to_string(),
            ParamType::Function => "function".to_string(),
            ParamType::Json => "JSON value".to_string(),
            ParamType::Any => "any value".to_string(),
            ParamType::Choice(options) => options
                .iter()
                .map(ParamType::describe)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

/// Function parameter definition
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub param_type: ParamType,
    pub optional: bool,
    /// `+`: accepts one or more arguments
    pub variadic: bool,
    /// `-`: the context value is used when the argument is missing
    pub context: bool,
}

/// Function signature
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<Parameter>,
    pub return_type: ParamType,
}

impl Signature {
    pub fn new(params: Vec<Parameter>, return_type: ParamType) -> Self {
        Signature {
            params,
            return_type,
        }
    }

    /// Parse a signature string such as `<a<n>:n>` or `<afj?:j>`.
    pub fn parse(text: &str) -> Result<Signature, SignatureError> {
        let invalid = |reason: &str| SignatureError::InvalidSignature(format!("{} in {}", reason, text));

        let inner = text
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or_else(|| invalid("missing angle brackets"))?;

        let chars: Vec<char> = inner.chars().collect();
        let mut params: Vec<Parameter> = Vec::new();
        let mut return_type = None;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            match ch {
                ':' => {
                    let rest: String = chars[i + 1..].iter().collect();
                    return_type = Some(parse_single_type(&rest).ok_or_else(|| invalid("bad return type"))?);
                    break;
                }
                '?' | '+' | '-' => {
                    let last = params.last_mut().ok_or_else(|| invalid("modifier without a type"))?;
                    match ch {
                        '?' => last.optional = true,
                        '+' => last.variadic = true,
                        _ => last.context = true,
                    }
                    i += 1;
                }
                '(' => {
                    let close = chars[i..]
                        .iter()
                        .position(|&c| c == ')')
                        .map(|offset| i + offset)
                        .ok_or_else(|| invalid("unclosed choice group"))?;
                    let options = chars[i + 1..close]
                        .iter()
                        .map(|&c| ParamType::from_symbol(c))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| invalid("unknown type in choice group"))?;
                    params.push(required(ParamType::Choice(options)));
                    i = close + 1;
                }
                '<' => {
                    // subtype of the preceding `a` or `f`; element types are not checked
                    i = skip_subtype(&chars, i).ok_or_else(|| invalid("unclosed subtype"))?;
                }
                symbol => {
                    let param_type = ParamType::from_symbol(symbol)
                        .ok_or_else(|| invalid(&format!("unknown type '{}'", symbol)))?;
                    params.push(required(param_type));
                    i += 1;
                }
            }
        }

        Ok(Signature {
            params,
            return_type: return_type.unwrap_or(ParamType::Any),
        })
    }

    /// Number of declared parameters, optional ones included.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Validate argument count
    pub fn validate_arg_count(&self, actual: usize) -> Result<(), SignatureError> {
        let required = self.params.iter().filter(|p| !p.optional).count();
        let max = if self.params.iter().any(|p| p.variadic) {
            usize::MAX
        } else {
            self.params.len()
        };

        if actual < required || actual > max {
            let expected = if max == usize::MAX {
                format!("at least {}", required)
            } else if required == max {
                required.to_string()
            } else {
                format!("{} to {}", required, max)
            };
            return Err(SignatureError::ArgumentCountMismatch { expected, actual });
        }

        Ok(())
    }

    /// Validate argument count and each argument's type.
    pub fn validate_args(&self, args: &[JValue]) -> Result<(), SignatureError> {
        self.validate_arg_count(args.len())?;

        for (index, arg) in args.iter().enumerate() {
            // trailing arguments of a variadic parameter share its type
            let param = match self.params.get(index).or_else(|| self.params.last()) {
                Some(param) => param,
                None => break,
            };
            if !param.param_type.accepts(arg) {
                return Err(SignatureError::ArgumentTypeMismatch {
                    index: index + 1,
                    expected: param.param_type.describe(),
                });
            }
        }
        Ok(())
    }
}

fn required(param_type: ParamType) -> Parameter {
    Parameter {
        param_type,
        optional: false,
        variadic: false,
        context: false,
    }
}

/// Returns the index just past the `>` matching the `<` at `start`.
fn skip_subtype(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0;
    for (offset, &c) in chars[start..].iter().enumerate() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_single_type(text: &str) -> Option<ParamType> {
    let mut chars = text.chars();
    let first = chars.next()?;
    if first == '(' {
        let options: Option<Vec<_>> = chars.take_while(|&c| c != ')').map(ParamType::from_symbol).collect();
        return options.map(ParamType::Choice);
    }
    ParamType::from_symbol(first)
}
