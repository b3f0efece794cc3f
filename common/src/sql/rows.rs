use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// rows returned by a query, cells kept as json values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// set when the backend stopped reading before the last row
    #[serde(default)]
    pub truncated: bool,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

fn write_cell(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => write!(f, "None"),
        Value::Bool(true) => write!(f, "True"),
        Value::Bool(false) => write!(f, "False"),
        Value::Number(n) => write!(f, "{}", n),
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
        other => write!(f, "'{}'", other),
    }
}

/// tuple-list rendering, e.g. `[(1, 'a'), (2, 'b')]`; compact enough for prompts
impl fmt::Display for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "(")?;
            for (j, cell) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write_cell(f, cell)?;
            }
            if row.len() == 1 {
                write!(f, ",")?;
            }
            write!(f, ")")?;
        }
        write!(f, "]")?;
        if self.truncated {
            write!(f, " (truncated)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_single_column() {
        let rows = RowSet::new(vec!["count".to_string()], vec![vec![json!(847)]]);
        assert_eq!(rows.to_string(), "[(847,)]");
    }

    #[test]
    fn test_display_mixed_cells() {
        let rows = RowSet::new(
            vec!["id".to_string(), "name".to_string(), "active".to_string()],
            vec![
                vec![json!(1), json!("alice"), json!(true)],
                vec![json!(2), Value::Null, json!(false)],
            ],
        );
        assert_eq!(
            rows.to_string(),
            "[(1, 'alice', True), (2, None, False)]"
        );
    }

    #[test]
    fn test_display_empty() {
        let rows = RowSet::new(vec!["id".to_string()], vec![]);
        assert!(rows.is_empty());
        assert_eq!(rows.to_string(), "[]");
    }
}
