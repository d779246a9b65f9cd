use super::field;
use super::types::Projection;

/// Parses the comma-separated `projection` form field
pub struct ProjectionBuilder;

impl ProjectionBuilder {
    /// Invalid tokens are dropped rather than failing the whole projection;
    /// `None` means "return all fields".
    pub fn build(raw: &str) -> Option<Projection> {
        let mut fields: Vec<String> = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !field::is_valid(token) {
                tracing::debug!(token, "dropping invalid projection field");
                continue;
            }
            if !fields.iter().any(|f| f == token) {
                fields.push(token.to_string());
            }
        }

        if fields.is_empty() {
            None
        } else {
            Some(Projection::new(fields))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_empty_and_invalid_tokens() {
        let projection = ProjectionBuilder::build("email, status ,, bad-name!").unwrap();
        assert_eq!(projection.fields(), ["email".to_string(), "status".to_string()]);
    }

    #[test]
    fn duplicates_collapse() {
        let projection = ProjectionBuilder::build("a,b,a, b").unwrap();
        assert_eq!(projection.fields().len(), 2);
    }

    #[test]
    fn nothing_valid_means_all_fields() {
        assert!(ProjectionBuilder::build("").is_none());
        assert!(ProjectionBuilder::build(" , ,").is_none());
        assert!(ProjectionBuilder::build("$where, a-b").is_none());
    }
}
