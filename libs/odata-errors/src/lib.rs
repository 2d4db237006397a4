//! Catalog-driven RFC 9457 problem bodies for processor failures.
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Content type for Problem Details as per RFC 9457.
pub const APPLICATION_PROBLEM_JSON: &str = "application/problem+json";

/// Static error definition from catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrDef {
    pub status: u16,
    pub title: &'static str,
    pub code: &'static str,
    pub type_url: &'static str,
}

impl ErrDef {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Convert this error definition into a Problem with the given detail
    #[inline]
    pub fn to_problem(&self, detail: impl Into<String>) -> Problem {
        Problem::new(self.status_code(), self.title, detail.into())
            .with_code(self.code)
            .with_type(self.type_url)
    }
}

/// RFC 9457 Problem Details for HTTP APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// The HTTP status code for this occurrence of the problem.
    pub status: u16,
    /// A human-readable explanation specific to this occurrence of the problem.
    pub detail: String,
    /// A URI reference that identifies the specific occurrence of the problem.
    pub instance: String,
    /// Machine-readable error code from the catalog.
    pub code: String,
    /// Positional parameters of the catalog message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    /// Messages of the underlying causes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl Problem {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            type_url: "about:blank".to_string(),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: String::new(),
            code: String::new(),
            params: Vec::new(),
            causes: Vec::new(),
        }
    }

    pub fn with_type(mut self, type_url: impl Into<String>) -> Self {
        self.type_url = type_url.into();
        self
    }

    pub fn with_instance(mut self, uri: impl Into<String>) -> Self {
        self.instance = uri.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_causes(mut self, causes: Vec<String>) -> Self {
        self.causes = causes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_def_to_problem_works() {
        let def = ErrDef {
            status: 400,
            title: "Bad Request",
            code: "QUERY_PREPARATION_INVALID_VALUE",
            type_url: "https://errors.example.com/QUERY_PREPARATION_INVALID_VALUE",
        };

        let problem = def.to_problem("invalid value '-1' for $top");
        assert_eq!(problem.status, 400);
        assert_eq!(problem.title, "Bad Request");
        assert_eq!(problem.detail, "invalid value '-1' for $top");
        assert_eq!(problem.code, "QUERY_PREPARATION_INVALID_VALUE");
        assert_eq!(def.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn problem_serializes_type_field_and_skips_empty_lists() {
        let p = Problem::new(StatusCode::NOT_FOUND, "Not Found", "no entity")
            .with_type("https://errors.example.com/ENTITY_NOT_FOUND");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "https://errors.example.com/ENTITY_NOT_FOUND");
        assert_eq!(json["status"], 404);
        assert!(json.get("params").is_none());
        assert!(json.get("causes").is_none());
    }
}
