//! Processor failures: a catalog key with HTTP status, positional message parameters
//! and an optional source chain.

use http::StatusCode;
use odata_errors::{ErrDef, Problem};
use std::error::Error as StdError;
use std::fmt;

macro_rules! catalog {
    ($($key:ident => ($status:literal, $title:literal, $code:literal, $template:literal)),+ $(,)?) => {
        /// Machine-readable message keys of the processor error catalog.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageKey {
            $($key),+
        }

        impl MessageKey {
            pub const fn def(self) -> ErrDef {
                match self {
                    $(MessageKey::$key => ErrDef {
                        status: $status,
                        title: $title,
                        code: $code,
                        type_url: concat!("https://errors.odata-bridge.dev/", $code),
                    }),+
                }
            }

            /// Message template; `{0}`, `{1}`, ... are replaced by the parameters.
            pub const fn template(self) -> &'static str {
                match self {
                    $(MessageKey::$key => $template),+
                }
            }
        }
    };
}

catalog! {
    QueryPreparationError => (500, "Internal Server Error", "QUERY_PREPARATION_ERROR",
        "query could not be prepared: {0}"),
    QueryPreparationInvalidValue => (400, "Bad Request", "QUERY_PREPARATION_INVALID_VALUE",
        "invalid value '{1}' for {0}"),
    QueryPreparationFilterError => (400, "Bad Request", "QUERY_PREPARATION_FILTER_ERROR",
        "invalid $filter: {0}"),
    QueryPreparationSyntaxError => (400, "Bad Request", "QUERY_PREPARATION_SYNTAX_ERROR",
        "{0}"),
    QueryPreparationInvalidSelect => (400, "Bad Request", "QUERY_PREPARATION_INVALID_SELECTION",
        "unknown property '{0}' in $select of {1}"),
    QueryPreparationUnknownProperty => (400, "Bad Request", "QUERY_PREPARATION_UNKNOWN_PROPERTY",
        "unknown property '{0}' of {1}"),
    QueryPreparationEntitySetUnknown => (404, "Not Found", "QUERY_PREPARATION_ENTITY_SET_UNKNOWN",
        "unknown entity set '{0}'"),
    QueryResultConvError => (500, "Internal Server Error", "QUERY_RESULT_CONV_ERROR",
        "result conversion failed: {0}"),
    QueryResultExpandError => (500, "Internal Server Error", "QUERY_RESULT_EXPAND_ERROR",
        "navigation '{0}' of entity '{1}' differs between merged rows"),
    QueryResultNavigationTargetUnknown => (500, "Internal Server Error", "QUERY_RESULT_NAVI_PROPERTY_UNKNOWN",
        "target type '{1}' of navigation '{0}' is unknown"),
    QueryResultKeyPropertyError => (400, "Bad Request", "QUERY_RESULT_KEY_PROPERTY_ERROR",
        "key property '{0}' of {1} has no value"),
    QueryResultEntitySetError => (500, "Internal Server Error", "QUERY_RESULT_ENTITY_SET_ERROR",
        "no entity set for entity type '{0}'"),
    EntityNotFound => (404, "Not Found", "ENTITY_NOT_FOUND",
        "no entity found for '{0}'"),
    NotSupportedResourceType => (501, "Not Implemented", "NOT_SUPPORTED_RESOURCE_TYPE",
        "resource type '{0}' is not supported"),
    NotSupportedFilter => (501, "Not Implemented", "NOT_SUPPORTED_FILTER",
        "filter expression is not supported: {0}"),
    NotSupportedAttributeType => (500, "Internal Server Error", "NOT_SUPPORTED_ATTRIBUTE_TYPE",
        "attribute '{0}' of {1}: not supported attribute type"),
    NotImplemented => (501, "Not Implemented", "NOT_IMPLEMENTED",
        "{0} is not implemented"),
    AttributeMustNotBeNull => (400, "Bad Request", "ATTRIBUTE_MUST_NOT_BE_NULL",
        "attribute '{0}' must not be null"),
    GeneratedKeyAttributeIsNotSupported => (412, "Precondition Failed", "GENERATED_KEY_ATTRIBUTE_IS_NOT_SUPPORTED",
        "key attribute '{0}' is generated by the database and must not be set"),
    InvalidComplexType => (400, "Bad Request", "INVALID_COMPLEX_TYPE",
        "invalid value for complex attribute '{0}': {1}"),
    InvalidEnumValue => (400, "Bad Request", "INVALID_ENUM_VALUE",
        "value '{1}' is not a member of enum '{0}'"),
    TypeMismatch => (400, "Bad Request", "TYPE_MISMATCH",
        "value of kind {1} cannot be stored as {0}"),
    IllegalState => (500, "Internal Server Error", "ILLEGAL_STATE",
        "illegal state: {0}"),
    DatabaseError => (500, "Internal Server Error", "DATABASE_ERROR",
        "database access failed: {0}"),
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ProcessorError {
    key: MessageKey,
    params: Vec<String>,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

impl ProcessorError {
    pub fn new<I, S>(key: MessageKey, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params: Vec<String> = params.into_iter().map(Into::into).collect();
        let message = render(key.template(), &params);
        Self {
            key,
            params,
            message,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn illegal_state(detail: impl Into<String>) -> Self {
        Self::new(MessageKey::IllegalState, [detail.into()])
    }

    pub fn invalid_value(option: &str, value: impl fmt::Display) -> Self {
        Self::new(
            MessageKey::QueryPreparationInvalidValue,
            [option.to_string(), value.to_string()],
        )
    }

    pub fn conversion(detail: impl Into<String>) -> Self {
        Self::new(MessageKey::QueryResultConvError, [detail.into()])
    }

    pub fn key(&self) -> MessageKey {
        self.key
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.key.def().status_code()
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Render as an RFC 9457 body, including the messages of all causes.
    pub fn to_problem(&self) -> Problem {
        let mut causes = Vec::new();
        let mut next = StdError::source(self);
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        self.key
            .def()
            .to_problem(self.message.clone())
            .with_params(self.params.clone())
            .with_causes(causes)
    }
}

impl From<sea_orm::DbErr> for ProcessorError {
    fn from(e: sea_orm::DbErr) -> Self {
        let detail = e.to_string();
        Self::new(MessageKey::DatabaseError, [detail]).with_source(e)
    }
}

impl From<odata_core::Error> for ProcessorError {
    fn from(e: odata_core::Error) -> Self {
        let err = match &e {
            odata_core::Error::InvalidFilter(detail) => {
                Self::new(MessageKey::QueryPreparationFilterError, [detail.clone()])
            }
            odata_core::Error::InvalidOptionValue { option, value } => {
                Self::invalid_value(option, value)
            }
            other => Self::new(MessageKey::QueryPreparationSyntaxError, [other.to_string()]),
        };
        err.with_source(e)
    }
}

fn render(template: &str, params: &[String]) -> String {
    let mut out = template.to_string();
    for (i, p) in params.iter().enumerate() {
        out = out.replace(&format!("{{{i}}}"), p);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_names_option_and_value() {
        let err = ProcessorError::invalid_value("$top", -1);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "invalid value '-1' for $top");
        assert_eq!(err.params(), ["$top".to_string(), "-1".to_string()]);
    }

    #[test]
    fn problem_carries_code_and_cause_chain() {
        let inner = ProcessorError::new(MessageKey::TypeMismatch, ["Int", "string"]);
        let outer = ProcessorError::new(MessageKey::QueryPreparationFilterError, ["Age eq 'x'"])
            .with_source(inner);
        let problem = outer.to_problem();
        assert_eq!(problem.status, 400);
        assert_eq!(problem.code, "QUERY_PREPARATION_FILTER_ERROR");
        assert_eq!(problem.causes, vec!["value of kind string cannot be stored as Int"]);
    }

    #[test]
    fn display_and_source_follow_the_chain() {
        let err = ProcessorError::new(MessageKey::DatabaseError, ["connection refused"])
            .with_source(ProcessorError::illegal_state("pool closed"));
        assert_eq!(err.to_string(), "database access failed: connection refused");
        let source = StdError::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("illegal state: pool closed"));
        assert!(StdError::source(&ProcessorError::illegal_state("x")).is_none());
    }

    #[test]
    fn generated_key_maps_to_precondition_failed() {
        let err = ProcessorError::new(MessageKey::GeneratedKeyAttributeIsNotSupported, ["ID"]);
        assert_eq!(err.status(), StatusCode::PRECONDITION_FAILED);
    }
}
