//! Environment model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named set of variables scoped to one project; (project_id, name) is unique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: u64,
    pub project_id: u64,
    pub name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Environment {
    /// Render the variables as a dotenv file, `None` when there are none
    pub fn to_dotenv(&self) -> Option<String> {
        if self.variables.is_empty() {
            return None;
        }

        let mut out = String::new();
        for (key, value) in &self.variables {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_dotenv_value(value));
            out.push('\n');
        }
        Some(out)
    }
}

fn quote_dotenv_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
