// src/storage/validation_mod.rs
// Identifier validation for names interpolated into SQL text.

use std::sync::OnceLock;

use regex::Regex;

use super::StorageError;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("static identifier pattern"))
}

/// Table, column and field names must be plain identifiers. Values always
/// travel as bound parameters; names cannot, so they are checked here.
pub fn validate_identifier(name: &str) -> Result<(), StorageError> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(StorageError::InvalidQuery {
            reason: format!("invalid identifier: {:?}", name),
        })
    }
}

pub fn validate_identifiers<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), StorageError> {
    names.into_iter().try_for_each(validate_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_identifier("journal_entries").is_ok());
        assert!(validate_identifier("_migrations").is_ok());
        assert!(validate_identifier("entry_number2").is_ok());
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(validate_identifier("customers; DROP TABLE accounts").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("name\"").is_err());
        assert!(validate_identifier("").is_err());
    }
}
