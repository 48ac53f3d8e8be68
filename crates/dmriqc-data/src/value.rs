use serde_json::Value;

/// One field from a subject QC file.
///
/// QC metrics are scalars or 1-D vectors; `Matrix` carries 2-D data such as
/// slice-by-volume outlier maps, which plot per subject but never aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
    Text(String),
    Flag(bool),
}

impl FieldValue {
    /// Converts a JSON value to a field. Booleans are checked before
    /// numbers so `qc_*_flag` fields never enter the numeric namespace.
    /// Returns `None` for shapes the QC format does not allow (objects,
    /// nulls, mixed arrays).
    pub fn from_json(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Bool(b) => Some(FieldValue::Flag(*b)),
            Value::Number(n) => n.as_f64().map(FieldValue::Scalar),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Array(items) => array_field(items),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Scalar(x) => json_number(*x),
            FieldValue::Vector(xs) => Value::Array(xs.iter().map(|x| json_number(*x)).collect()),
            FieldValue::Matrix(rows) => Value::Array(
                rows.iter()
                    .map(|row| Value::Array(row.iter().map(|x| json_number(*x)).collect()))
                    .collect(),
            ),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Flag(b) => Value::Bool(*b),
        }
    }

    /// Whether this field participates in group aggregation and outlier
    /// classification. Flags, text and 2-D matrices do not.
    pub fn is_qc_numeric(&self) -> bool {
        matches!(self, FieldValue::Scalar(_) | FieldValue::Vector(_))
    }

    /// Flattens a numeric field to a value vector, scalars becoming a
    /// single element. `None` for non-numeric fields.
    pub fn as_numeric_vec(&self) -> Option<Vec<f64>> {
        match self {
            FieldValue::Scalar(x) => Some(vec![*x]),
            FieldValue::Vector(xs) => Some(xs.clone()),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&[Vec<f64>]> {
        match self {
            FieldValue::Matrix(rows) => Some(rows),
            _ => None,
        }
    }
}

/// JSON has no NaN literal; non-finite values are written as `null` and
/// read back as NaN.
pub(crate) fn json_number(x: f64) -> Value {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 9e15 {
        return Value::Number((x as i64).into());
    }
    serde_json::Number::from_f64(x).map_or(Value::Null, Value::Number)
}

pub(crate) fn number_or_nan(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(f64::NAN),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn numeric_row(items: &[Value]) -> Option<Vec<f64>> {
    items.iter().map(number_or_nan).collect()
}

fn array_field(items: &[Value]) -> Option<FieldValue> {
    if let Some(xs) = numeric_row(items) {
        return Some(FieldValue::Vector(xs));
    }
    let rows: Option<Vec<Vec<f64>>> = items
        .iter()
        .map(|item| item.as_array().and_then(|row| numeric_row(row)))
        .collect();
    rows.map(FieldValue::Matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booleans_stay_flags() {
        let field = FieldValue::from_json(&json!(true)).expect("flag");
        assert_eq!(field, FieldValue::Flag(true));
        assert!(!field.is_qc_numeric());
    }

    #[test]
    fn numbers_and_vectors_are_qc_numeric() {
        let scalar = FieldValue::from_json(&json!(0.25)).expect("scalar");
        assert_eq!(scalar.as_numeric_vec(), Some(vec![0.25]));

        let vector = FieldValue::from_json(&json!([1, 2.5, 3])).expect("vector");
        assert_eq!(vector.as_numeric_vec(), Some(vec![1.0, 2.5, 3.0]));
        assert!(vector.is_qc_numeric());
    }

    #[test]
    fn nested_numeric_arrays_become_matrices() {
        let field = FieldValue::from_json(&json!([[1, 2], [3, 4]])).expect("matrix");
        assert_eq!(
            field.as_matrix(),
            Some(&[vec![1.0, 2.0], vec![3.0, 4.0]][..])
        );
        assert!(!field.is_qc_numeric());
    }

    #[test]
    fn mixed_arrays_and_objects_are_rejected() {
        assert!(FieldValue::from_json(&json!([1, "two"])).is_none());
        assert!(FieldValue::from_json(&json!({"nested": 1})).is_none());
        assert!(FieldValue::from_json(&json!(null)).is_none());
    }

    #[test]
    fn null_inside_numeric_arrays_reads_as_nan() {
        let field = FieldValue::from_json(&json!([1.0, null, 3.0])).expect("vector");
        let values = field.as_numeric_vec().expect("numeric");
        assert_eq!(values.len(), 3);
        assert!(values[1].is_nan());
    }

    #[test]
    fn nan_serializes_as_null() {
        let field = FieldValue::Vector(vec![1.0, f64::NAN]);
        assert_eq!(field.to_json(), json!([1, null]));
    }

    #[test]
    fn integral_scalars_serialize_as_integers() {
        assert_eq!(FieldValue::Scalar(2.0).to_json(), json!(2));
        assert_eq!(FieldValue::Scalar(0.2).to_json(), json!(0.2));
    }
}
