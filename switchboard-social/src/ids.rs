use serde::Deserialize;
use std::fmt;

/// Upstream identifier that may arrive as a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Int(n) => write!(f, "{n}"),
            IdValue::Str(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_and_strings_render_the_same() {
        let n: IdValue = serde_json::from_str("-100123").unwrap();
        let s: IdValue = serde_json::from_str("\"-100123\"").unwrap();
        assert_eq!(n.to_string(), s.to_string());
    }
}
