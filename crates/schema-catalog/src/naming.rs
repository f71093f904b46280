//! Table-identifier canonicalization.
//!
//! Extracted files are named from whatever the extractor called a table at
//! the time; by the time normalization runs, the schema's naming convention
//! may have changed (e.g. a length limit, a reserved-word suffix). Workers
//! re-canonicalize on every run rather than trusting the filename's casing.

/// Deterministic, idempotent canonicalization of a raw table identifier.
pub trait NamingConvention: Send + Sync {
    fn normalize_table_identifier(&self, raw: &str) -> String;
}

/// The convention used when a schema doesn't specify one of its own:
/// lowercase, non-alphanumeric runs collapsed to a single underscore,
/// leading digits prefixed with `_` (most loaders reject identifiers that
/// start with a digit).
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultNaming;

impl NamingConvention for DefaultNaming {
    fn normalize_table_identifier(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + 1);
        let mut last_was_sep = false;
        for c in raw.chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_lowercase());
                last_was_sep = false;
            } else if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        }
        let trimmed = out.trim_matches('_');
        let mut result = if trimmed.is_empty() {
            "_".to_string()
        } else {
            trimmed.to_string()
        };
        if result.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            result.insert(0, '_');
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        let n = DefaultNaming;
        let once = n.normalize_table_identifier("My Table-Name!!2");
        let twice = n.normalize_table_identifier(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "my_table_name_2");
    }

    #[test]
    fn leading_digit_is_prefixed() {
        let n = DefaultNaming;
        assert_eq!(n.normalize_table_identifier("123abc"), "_123abc");
    }
}
