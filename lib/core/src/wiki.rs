//! Wiki and namespace descriptors (§3, §4.1, §4.2).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A key a caller may look a wiki up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WikiKey {
    DbName(String),
    Hostname(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WikiFlags {
    pub private: bool,
    pub closed: bool,
    pub fishbowl: bool,
    pub nonglobal: bool,
}

/// Immutable after fetch; a registry refresh replaces the whole snapshot
/// atomically rather than mutating individual descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiDescriptor {
    pub dbname: String,
    pub base_url: String,
    pub language_code: String,
    pub flags: WikiFlags,
}

impl WikiDescriptor {
    pub fn hostname(&self) -> Option<&str> {
        self.base_url
            .split("://")
            .nth(1)
            .map(|rest| rest.split('/').next().unwrap_or(rest))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseSensitivity {
    CaseSensitive,
    FirstLetter,
}

/// Fetched together with the legal-title-character set; cached indefinitely
/// with explicit flush (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDescriptor {
    pub id: i32,
    pub canonical_name: String,
    pub localized_name: String,
    pub case_sensitivity: CaseSensitivity,
    pub content: bool,
    pub allows_subpages: bool,
    pub namespace_right: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceCatalogue {
    pub namespaces: HashMap<i32, NamespaceDescriptor>,
    pub legal_title_chars: String,
}
