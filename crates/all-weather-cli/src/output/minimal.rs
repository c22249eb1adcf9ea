use serde_json::Value;

use super::{result_of, PRIMARY_TABLES};

/// Print just the key answer from the output.
///
/// Weight tables print one `name weight` line per row; otherwise the first
/// well-known scalar, then the first field of the result object.
pub fn print_minimal(value: &Value) {
    let result_obj = result_of(value);

    if let Value::Object(map) = result_obj {
        for key in PRIMARY_TABLES {
            if let Some(Value::Array(rows)) = map.get(key) {
                if print_weight_lines(rows) {
                    return;
                }
            }
        }

        let priority_keys = ["portfolio", "annual_return", "portfolio_volatility", "observations"];
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", format_minimal(val));
                    return;
                }
            }
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

/// `ticker weight` (or `name weight`, `environment weight`) per row.
fn print_weight_lines(rows: &[Value]) -> bool {
    let lines: Vec<String> = rows
        .iter()
        .filter_map(|row| {
            let label = ["ticker", "name", "environment"]
                .iter()
                .find_map(|k| row.get(*k))?;
            let weight = row.get("weight")?;
            Some(format!("{} {}", format_minimal(label), format_minimal(weight)))
        })
        .collect();
    if lines.is_empty() {
        return false;
    }
    for line in lines {
        println!("{}", line);
    }
    true
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
