//! SQL text paired with its positional variables.
//!
//! Every query handed to the SQL adapter is a [`BoundQuery`]: text that
//! refers to variables with the caller-facing `$1..$n` markers, plus the
//! variables themselves in marker order. The adapter translates markers to
//! each backend's own placeholder syntax.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundQuery {
    pub sql: String,
    pub variables: Vec<Value>,
}

impl BoundQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            variables: Vec::new(),
        }
    }

    /// Register a variable and return the marker that refers to it.
    pub fn bind(&mut self, value: Value) -> String {
        self.variables.push(value);
        format!("${}", self.variables.len())
    }

    /// Register several variables and return their markers joined with
    /// `", "`. An empty list renders as `NULL`.
    pub fn bind_list(&mut self, values: impl IntoIterator<Item = Value>) -> String {
        let markers: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
        if markers.is_empty() {
            "NULL".to_string()
        } else {
            markers.join(", ")
        }
    }

    pub fn push_str(&mut self, text: &str) {
        self.sql.push_str(text);
    }
}
