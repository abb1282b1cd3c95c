// Utility functions shared by the builtins and the evaluator

use crate::value::JValue;

/// View a value as a sequence: arrays as their members, undefined as nothing,
/// anything else as a one-element sequence.
pub fn to_array(value: &JValue) -> Vec<JValue> {
    match value {
        JValue::Array(arr) => arr.as_ref().clone(),
        JValue::Undefined => Vec::new(),
        _ => vec![value.clone()],
    }
}

/// Flatten nested arrays
pub fn flatten(arr: &[JValue]) -> Vec<JValue> {
    let mut result = Vec::with_capacity(arr.len());
    for item in arr {
        if let JValue::Array(inner) = item {
            result.extend(flatten(inner));
        } else {
            result.push(item.clone());
        }
    }
    result
}

/// Whole numbers print without a fractional part, like JSON.stringify.
pub fn number_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        // 15 significant digits, trailing zeros trimmed
        let text = format!("{:.15}", n);
        let parsed: f64 = text.parse().unwrap_or(n);
        format!("{}", parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_array() {
        let value = JValue::from(42i64);
        let arr = to_array(&value);
        assert_eq!(arr, vec![value]);

        let arr_value = JValue::array(vec![JValue::from(1i64), JValue::from(2i64)]);
        assert_eq!(to_array(&arr_value).len(), 2);
        assert!(to_array(&JValue::Undefined).is_empty());
    }

    #[test]
    fn test_flatten() {
        let nested = vec![
            JValue::from(1i64),
            JValue::array(vec![JValue::from(2i64), JValue::array(vec![JValue::from(3i64)])]),
            JValue::from(4i64),
        ];
        assert_eq!(flatten(&nested).len(), 4);
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(120.0), "120");
        assert_eq!(number_to_string(-3.0), "-3");
        assert_eq!(number_to_string(2.5), "2.5");
        assert_eq!(number_to_string(0.1 + 0.2), "0.3");
    }
}
