//! Core domain model for the federal BD portal.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;

pub use config::{ConfigError, PortalConfig};

pub const CRATE_NAME: &str = "fedbd-core";

/// Contract vehicles the portal carries content for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramCode {
    Tls,
    OasisPlus,
    Sewp,
}

impl ProgramCode {
    pub const ALL: [ProgramCode; 3] = [ProgramCode::Tls, ProgramCode::OasisPlus, ProgramCode::Sewp];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgramCode::Tls => "tls",
            ProgramCode::OasisPlus => "oasis_plus",
            ProgramCode::Sewp => "sewp",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProgramCode::Tls => "TLS",
            ProgramCode::OasisPlus => "OASIS+",
            ProgramCode::Sewp => "SEWP V",
        }
    }

    /// Case-insensitive lookup accepting the spellings users type into CSVs and query strings.
    pub fn parse_loose(input: &str) -> Option<Self> {
        let key = input
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| matches!(c, '-' | ' ' | '_'), "");
        match key.as_str() {
            "tls" => Some(ProgramCode::Tls),
            "oasisplus" | "oasis+" | "oasis" => Some(ProgramCode::OasisPlus),
            "sewp" | "sewpv" | "sewp5" => Some(ProgramCode::Sewp),
            _ => None,
        }
    }
}

impl fmt::Display for ProgramCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown program code: {0}")]
pub struct UnknownProgram(pub String);

impl FromStr for ProgramCode {
    type Err = UnknownProgram;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_loose(s).ok_or_else(|| UnknownProgram(s.trim().to_string()))
    }
}

/// A contract vehicle as shown on the settings page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub code: ProgramCode,
    pub display_name: String,
    pub enabled: bool,
    pub keywords: Vec<String>,
}

/// Program-specific holder attributes. Which of these a holder carries depends on its vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HolderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub naics_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub psc_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oem_authorizations: Vec<String>,
}

/// Contract-vehicle-qualified vendor (prime or holder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub program_code: ProgramCode,
    pub capabilities: Vec<String>,
    pub metadata: HolderMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: i64,
    pub opp_no: String,
    pub title: String,
    pub agency: String,
    pub status: String,
    pub close_date: Option<NaiveDate>,
    pub url: Option<String>,
    pub program_code: Option<ProgramCode>,
    /// Program-specific extras kept from the raw solicitation payload.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

/// Shared shape every adapter maps raw solicitation payloads into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOpportunity {
    pub opp_no: String,
    pub title: String,
    pub agency: String,
    pub status: String,
    pub close_date: Option<NaiveDate>,
    pub url: Option<String>,
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchDoc {
    pub id: i64,
    pub title: String,
    pub source_url: String,
    pub doc_type: String,
    pub tags: Vec<String>,
    pub drive_file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub active: bool,
    pub verified: bool,
    pub subscribed_programs: Vec<ProgramCode>,
}

/// Flat role hierarchy: admin > ops > viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Ops,
    Admin,
}

impl Role {
    pub fn level(self) -> u8 {
        match self {
            Role::Viewer => 1,
            Role::Ops => 2,
            Role::Admin => 3,
        }
    }

    pub fn allows(self, required: Role) -> bool {
        self.level() >= required.level()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Ops => "ops",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "ops" => Ok(Role::Ops),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The four bulk-import shapes accepted by the CSV importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportType {
    Holders,
    Opportunities,
    ResearchDocs,
    Subscribers,
}

impl ImportType {
    pub const ALL: [ImportType; 4] = [
        ImportType::Holders,
        ImportType::Opportunities,
        ImportType::ResearchDocs,
        ImportType::Subscribers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImportType::Holders => "holders",
            ImportType::Opportunities => "opportunities",
            ImportType::ResearchDocs => "research_docs",
            ImportType::Subscribers => "subscribers",
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "holders" | "primes" => Ok(ImportType::Holders),
            "opportunities" => Ok(ImportType::Opportunities),
            "research_docs" | "research" => Ok(ImportType::ResearchDocs),
            "subscribers" => Ok(ImportType::Subscribers),
            other => Err(format!("unknown import type: {other}")),
        }
    }
}

/// Split a list-valued cell (`a; b | c`) into trimmed, non-empty items.
pub fn split_list(cell: &str) -> Vec<String> {
    cell.split(|c: char| c == ';' || c == '|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_codes_accept_common_spellings() {
        assert_eq!(ProgramCode::parse_loose("OASIS+"), Some(ProgramCode::OasisPlus));
        assert_eq!(ProgramCode::parse_loose("oasis-plus"), Some(ProgramCode::OasisPlus));
        assert_eq!(ProgramCode::parse_loose(" SEWP V "), Some(ProgramCode::Sewp));
        assert_eq!(ProgramCode::parse_loose("Tls"), Some(ProgramCode::Tls));
        assert_eq!(ProgramCode::parse_loose("gsa"), None);
        assert!("".parse::<ProgramCode>().is_err());
    }

    #[test]
    fn role_hierarchy_is_ordered() {
        assert!(Role::Admin.allows(Role::Ops));
        assert!(Role::Ops.allows(Role::Viewer));
        assert!(!Role::Viewer.allows(Role::Ops));
        assert!(!Role::Ops.allows(Role::Admin));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
    }

    #[test]
    fn list_cells_split_on_semicolon_and_pipe() {
        assert_eq!(
            split_list(" cloud; cyber |  | logistics "),
            vec!["cloud".to_string(), "cyber".to_string(), "logistics".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
