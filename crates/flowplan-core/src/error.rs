use thiserror::Error;

use crate::id::NodeId;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Duplicate schema alias '{alias}' in output of {operator}")]
    DuplicateSchemaAlias { alias: String, operator: String },

    #[error("Unknown alias '{alias}' referenced by {operator}")]
    UnknownAlias { alias: String, operator: String },

    #[error("{operator} requires input #{position} but it is not connected")]
    MissingInput { operator: String, position: usize },

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Invalid graph state: {0}")]
    InvalidState(String),

    #[error("{from} is not connected to {to}")]
    NotConnected { from: NodeId, to: NodeId },

    #[error("{0} is not a member of this graph")]
    UnknownNode(NodeId),

    #[error("{0} is already a member of this graph")]
    DuplicateNode(NodeId),

    #[error("Malformed pattern: {0}")]
    Pattern(String),

    #[error("Rule '{rule}' failed: {source}")]
    Rule {
        rule: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Rule '{rule}' left the plan in an invalid state: {detail}")]
    RuleInvariant { rule: String, detail: String },

    // The core crate does not do I/O, but higher layers may map their I/O
    // errors into this variant for convenience.
    #[error("I/O-like error (mapped into core): {0}")]
    IoLike(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),

    /// Error with context chain for better debugging
    #[error("Error in {context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Add context to an error, creating an error chain.
    ///
    /// # Example
    /// ```rust,no_run
    /// use flowplan_core::error::Error;
    /// let err = Error::Schema("incompatible union inputs".into());
    /// let err = err.with_context("while computing schema of U");
    /// ```
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self) as Box<dyn std::error::Error + Send + Sync>,
        }
    }

    /// Wrap an error raised while a rule was checking or transforming.
    pub fn in_rule(self, rule: impl Into<String>) -> Self {
        Error::Rule {
            rule: rule.into(),
            source: Box::new(self),
        }
    }

    /// True for errors the front end reports back to the script author.
    pub fn is_frontend(&self) -> bool {
        match self {
            Error::Context { source, .. } => source
                .downcast_ref::<Error>()
                .is_some_and(Error::is_frontend),
            other => matches!(
                other,
                Error::Schema(_)
                    | Error::DuplicateSchemaAlias { .. }
                    | Error::UnknownAlias { .. }
                    | Error::MissingInput { .. }
                    | Error::Pattern(_)
                    | Error::Plan(_)
            ),
        }
    }

    /// Get suggestions for common errors.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Error::UnknownAlias { .. } => vec![
                "Check that the alias is spelled correctly".into(),
                "Verify the field exists in the input schema".into(),
            ],
            Error::DuplicateSchemaAlias { .. } => vec![
                "Rename one of the fields with an explicit alias".into(),
                "Alias the inputs so fields are disambiguated as input::field".into(),
            ],
            Error::Config(msg) => {
                if msg.contains("iteration") {
                    vec!["Raise max_iterations or disable the looping rule".into()]
                } else {
                    vec![]
                }
            }
            Error::Context { source, .. } => source
                .downcast_ref::<Error>()
                .map(Error::suggestions)
                .unwrap_or_default(),
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_hints_and_classification() {
        let err = Error::UnknownAlias {
            alias: "b".into(),
            operator: "Filter 'f'".into(),
        }
        .with_context("script.yaml");
        assert!(err.to_string().starts_with("Error in script.yaml:"));
        assert!(err.is_frontend());
        assert_eq!(err.suggestions().len(), 2);

        let err = Error::Invariant("dangling edge".into()).with_context("optimize");
        assert!(!err.is_frontend());
        assert!(err.suggestions().is_empty());
    }
}
