//! The error taxonomy (§7) and the `errorformat`-aware envelope rendering
//! used at the HTTP boundary (§6).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controls the shape of the JSON error body; mirrors the `errorformat`
/// query parameter MediaWiki's own action API uses for error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFormat {
    #[default]
    Text,
    Wikitext,
    Plaintext,
    Raw,
    Bc,
}

impl std::str::FromStr for ErrorFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "wikitext" => Ok(Self::Wikitext),
            "plaintext" => Ok(Self::Plaintext),
            "raw" => Ok(Self::Raw),
            "bc" => Ok(Self::Bc),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    #[error("`{0}` is not a known, global wiki")]
    UnsupportedWiki(String),
    #[error("the `revisions` parameter is missing or empty")]
    RevisionsMissing,
    #[error("`{0}` is not a valid revision id")]
    BadInteger(String),
    #[error("at most {limit} revisions may be requested via GET; got {got}")]
    MethodLimited { limit: usize, got: usize },
    #[error("filter is empty or its regular expression failed to compile: {0}")]
    InvalidFilter(String),
    #[error("task `{0}` is unknown or has been swept")]
    TaskMissing(String),
    #[error("task `{0}` has not finished yet")]
    TaskUnfinished(String),
    #[error("task worker raised an uncaught error: {0}")]
    TaskUncaughtGeneric(String),
    #[error("revision batch did not resolve within the time budget; still pending: {pending:?}")]
    ExpanderTimeout { pending: Vec<u64> },
    #[error("{0}")]
    Generic(String),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedWiki(_) => "unsupportedwiki",
            Self::RevisionsMissing => "revisions-missing",
            Self::BadInteger(_) => "badinteger",
            Self::MethodLimited { .. } => "method-limited",
            Self::InvalidFilter(_) => "invalidfilter",
            Self::TaskMissing(_) => "task-missing",
            Self::TaskUnfinished(_) => "task-unfinished",
            Self::TaskUncaughtGeneric(_) => "task-uncaught-generic",
            Self::ExpanderTimeout { .. } => "expander-timeout",
            Self::Generic(_) => "generic-error",
        }
    }

    pub fn module(&self) -> &'static str {
        match self {
            Self::UnsupportedWiki(_) => "registry",
            Self::RevisionsMissing | Self::BadInteger(_) | Self::MethodLimited { .. } => {
                "revisions"
            }
            Self::InvalidFilter(_) => "search-talk",
            Self::TaskMissing(_) | Self::TaskUnfinished(_) | Self::TaskUncaughtGeneric(_) => {
                "tasks"
            }
            Self::ExpanderTimeout { .. } => "expander",
            Self::Generic(_) => "main",
        }
    }

    /// HTTP status this error maps to, per §6/§7.
    pub fn status(&self) -> u16 {
        match self {
            Self::UnsupportedWiki(_) => 422,
            Self::RevisionsMissing | Self::BadInteger(_) => 422,
            Self::MethodLimited { .. } => 403,
            Self::InvalidFilter(_) => 400,
            Self::TaskMissing(_) => 404,
            Self::TaskUnfinished(_) => 409,
            Self::TaskUncaughtGeneric(_) => 500,
            Self::ExpanderTimeout { .. } => 500,
            Self::Generic(_) => 500,
        }
    }

    /// Render the `{errors: [...], docref}` envelope, or the flattened `bc`
    /// shape, according to `format`.
    pub fn to_envelope(&self, format: ErrorFormat) -> serde_json::Value {
        let text = self.to_string();
        let code = self.code();
        let module = self.module();
        match format {
            ErrorFormat::Bc => serde_json::json!({
                "code": code,
                "info": text,
                "module": module,
            }),
            _ => serde_json::json!({
                "errors": [{
                    "code": code,
                    "text": text,
                    "module": module,
                }],
                "docref": "See https://www.mediawiki.org/wiki/API:Errors_and_warnings for error conventions.",
            }),
        }
    }
}
