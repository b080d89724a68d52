//! Program adapter contract and the TLS / OASIS+ / SEWP implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use fedbd_core::{split_list, Holder, HolderMetadata, NormalizedOpportunity, Opportunity, ProgramCode};
use fedbd_storage::{PortalStore, StoreError};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod registry;

pub use registry::{ProgramCatalogFile, ProgramEntry, ProgramRegistry};

pub const CRATE_NAME: &str = "fedbd-adapters";

/// Upper bound on solicitations an adapter hands back to a page.
pub const SOLICITATION_LIMIT: i64 = 200;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("missing required field `{0}` in raw solicitation")]
    MissingField(&'static str),
    #[error("unparseable date `{value}` in field `{field}`")]
    InvalidDate { field: &'static str, value: String },
    #[error("unknown program code `{input}`{}", suggestion_suffix(.suggestion))]
    UnknownProgram {
        input: String,
        suggestion: Option<ProgramCode>,
    },
    #[error("program `{0}` is disabled")]
    Disabled(ProgramCode),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn suggestion_suffix(suggestion: &Option<ProgramCode>) -> String {
    match suggestion {
        Some(code) => format!(" (did you mean `{code}`?)"),
        None => String::new(),
    }
}

/// Program-specific holder columns. Which ones apply is decided by the holder's adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraField {
    ContractNumber,
    Pool,
    Domains,
    NaicsCodes,
    PscCodes,
    OemAuthorizations,
}

impl ExtraField {
    pub const ALL: [ExtraField; 6] = [
        ExtraField::ContractNumber,
        ExtraField::Pool,
        ExtraField::Domains,
        ExtraField::NaicsCodes,
        ExtraField::PscCodes,
        ExtraField::OemAuthorizations,
    ];

    /// CSV column carrying this field.
    pub fn column(self) -> &'static str {
        match self {
            ExtraField::ContractNumber => "contract_number",
            ExtraField::Pool => "pool",
            ExtraField::Domains => "domains",
            ExtraField::NaicsCodes => "naics_codes",
            ExtraField::PscCodes => "psc_codes",
            ExtraField::OemAuthorizations => "oem_authorizations",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExtraField::ContractNumber => "Contract number",
            ExtraField::Pool => "Pool",
            ExtraField::Domains => "Domains",
            ExtraField::NaicsCodes => "NAICS codes",
            ExtraField::PscCodes => "PSC codes",
            ExtraField::OemAuthorizations => "OEM authorizations",
        }
    }

    /// Write a raw cell into the metadata; list fields go through `split_list`.
    pub fn apply(self, metadata: &mut HolderMetadata, cell: &str) {
        let cell = cell.trim();
        if cell.is_empty() {
            return;
        }
        match self {
            ExtraField::ContractNumber => metadata.contract_number = Some(cell.to_string()),
            ExtraField::Pool => metadata.pool = Some(cell.to_string()),
            ExtraField::Domains => metadata.domains = split_list(cell),
            ExtraField::NaicsCodes => metadata.naics_codes = split_list(cell),
            ExtraField::PscCodes => metadata.psc_codes = split_list(cell),
            ExtraField::OemAuthorizations => metadata.oem_authorizations = split_list(cell),
        }
    }

    /// Display value for a holder, `None` when unset.
    pub fn read(self, metadata: &HolderMetadata) -> Option<String> {
        let joined = |items: &[String]| (!items.is_empty()).then(|| items.join(", "));
        match self {
            ExtraField::ContractNumber => metadata.contract_number.clone(),
            ExtraField::Pool => metadata.pool.clone(),
            ExtraField::Domains => joined(&metadata.domains),
            ExtraField::NaicsCodes => joined(&metadata.naics_codes),
            ExtraField::PscCodes => joined(&metadata.psc_codes),
            ExtraField::OemAuthorizations => joined(&metadata.oem_authorizations),
        }
    }
}

#[async_trait]
pub trait ProgramAdapter: Send + Sync {
    fn code(&self) -> ProgramCode;

    fn name(&self) -> &'static str {
        self.code().display_name()
    }

    fn keywords(&self) -> &'static [&'static str];

    async fn list_primes_or_holders(&self, store: &PortalStore) -> Result<Vec<Holder>, AdapterError>;

    /// Whether `name` is already one of the adapter's built-in holders.
    fn is_builtin_holder(&self, _name: &str) -> bool {
        false
    }

    async fn fetch_solicitations(&self, store: &PortalStore) -> Result<Vec<Opportunity>, AdapterError> {
        Ok(store.opportunities(Some(self.code()), SOLICITATION_LIMIT).await?)
    }

    fn normalize(&self, raw: &JsonValue) -> Result<NormalizedOpportunity, AdapterError>;

    fn extra_fields(&self) -> &'static [ExtraField];
}

/// Raw payload key spellings for one program. The first present alias wins.
struct FieldAliases {
    opp_no: &'static [&'static str],
    title: &'static [&'static str],
    agency: &'static [&'static str],
    status: &'static [&'static str],
    close_date: &'static [&'static str],
    url: &'static [&'static str],
    default_agency: &'static str,
    meta: &'static [&'static str],
}

fn json_text(raw: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let value = raw.get(*key)?;
        let text = match value {
            JsonValue::String(s) => s.trim().to_string(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::trim))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

/// Accepts `YYYY-MM-DD`, `MM/DD/YYYY` and RFC 3339 timestamps.
pub fn parse_close_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(input, "%m/%d/%Y"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(input).ok().map(|ts| ts.date_naive()))
}

fn normalize_with(aliases: &FieldAliases, raw: &JsonValue) -> Result<NormalizedOpportunity, AdapterError> {
    let opp_no = json_text(raw, aliases.opp_no).ok_or(AdapterError::MissingField("opp_no"))?;
    let title = json_text(raw, aliases.title).ok_or(AdapterError::MissingField("title"))?;
    let close_date = match json_text(raw, aliases.close_date) {
        Some(value) => Some(parse_close_date(&value).ok_or(AdapterError::InvalidDate {
            field: "close_date",
            value,
        })?),
        None => None,
    };

    let meta = aliases
        .meta
        .iter()
        .filter_map(|key| json_text(raw, &[*key]).map(|v| ((*key).to_string(), v)))
        .collect::<BTreeMap<_, _>>();

    Ok(NormalizedOpportunity {
        opp_no,
        title,
        agency: json_text(raw, aliases.agency).unwrap_or_else(|| aliases.default_agency.to_string()),
        status: json_text(raw, aliases.status)
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| "open".to_string()),
        close_date,
        url: json_text(raw, aliases.url),
        meta,
    })
}

async fn db_holders(store: &PortalStore, code: ProgramCode) -> Result<Vec<Holder>, AdapterError> {
    Ok(store.holders_for_program(code).await?)
}

const TLS_ALIASES: FieldAliases = FieldAliases {
    opp_no: &["solicitation_number", "opp_no"],
    title: &["title", "item_description"],
    agency: &["buying_office", "agency"],
    status: &["status"],
    close_date: &["response_date", "close_date"],
    url: &["url", "link"],
    default_agency: "DLA Troop Support",
    meta: &["region", "category", "set_aside"],
};

const OASIS_PLUS_ALIASES: FieldAliases = FieldAliases {
    opp_no: &["notice_id", "opp_no"],
    title: &["title"],
    agency: &["contracting_office", "agency"],
    status: &["status"],
    close_date: &["response_deadline", "close_date"],
    url: &["link", "url"],
    default_agency: "GSA",
    meta: &["pool", "domain", "set_aside"],
};

const SEWP_ALIASES: FieldAliases = FieldAliases {
    opp_no: &["rfq_id", "opp_no"],
    title: &["title", "description"],
    agency: &["customer_agency", "agency"],
    status: &["status"],
    close_date: &["due_date", "close_date"],
    url: &["url"],
    default_agency: "NASA SEWP",
    meta: &["oem", "contract_group"],
};

/// TLS special-operations primes. Static; ids are negative so they never collide with rows.
const TLS_PRIMES: [(&str, &str, &str, &[&str]); 4] = [
    (
        "ADS",
        "Atlantic Diving Supply, Inc.",
        "SPE8EJ-17-D-0001",
        &["Tactical equipment", "Special operations kits", "Logistics support"],
    ),
    (
        "Federal Resources",
        "Federal Resources Supply Company",
        "SPE8EJ-17-D-0002",
        &["CBRN detection", "Training", "Equipment sustainment"],
    ),
    (
        "Noble",
        "Noble Supply & Logistics",
        "SPE8EJ-17-D-0003",
        &["MRO supply", "Kitting", "Global distribution"],
    ),
    (
        "SupplyCore",
        "SupplyCore Inc.",
        "SPE8EJ-17-D-0004",
        &["Facilities maintenance", "Supply chain management"],
    ),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TlsAdapter;

impl TlsAdapter {
    pub fn static_primes() -> Vec<Holder> {
        TLS_PRIMES
            .iter()
            .enumerate()
            .map(|(idx, (name, full_name, contract_number, capabilities))| Holder {
                id: -(idx as i64 + 1),
                name: (*name).to_string(),
                full_name: (*full_name).to_string(),
                program_code: ProgramCode::Tls,
                capabilities: capabilities.iter().map(ToString::to_string).collect(),
                metadata: HolderMetadata {
                    contract_number: Some((*contract_number).to_string()),
                    naics_codes: vec!["423990".to_string()],
                    ..HolderMetadata::default()
                },
            })
            .collect()
    }
}

#[async_trait]
impl ProgramAdapter for TlsAdapter {
    fn code(&self) -> ProgramCode {
        ProgramCode::Tls
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["tactical", "special operations", "dla", "equipment", "logistics"]
    }

    async fn list_primes_or_holders(&self, store: &PortalStore) -> Result<Vec<Holder>, AdapterError> {
        let mut primes = Self::static_primes();
        for holder in db_holders(store, ProgramCode::Tls).await? {
            if !self.is_builtin_holder(&holder.name) {
                primes.push(holder);
            }
        }
        Ok(primes)
    }

    fn is_builtin_holder(&self, name: &str) -> bool {
        let name = name.trim();
        TLS_PRIMES
            .iter()
            .any(|(short, full, _, _)| short.eq_ignore_ascii_case(name) || full.eq_ignore_ascii_case(name))
    }

    fn normalize(&self, raw: &JsonValue) -> Result<NormalizedOpportunity, AdapterError> {
        normalize_with(&TLS_ALIASES, raw)
    }

    fn extra_fields(&self) -> &'static [ExtraField] {
        &[ExtraField::ContractNumber, ExtraField::NaicsCodes, ExtraField::PscCodes]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OasisPlusAdapter;

#[async_trait]
impl ProgramAdapter for OasisPlusAdapter {
    fn code(&self) -> ProgramCode {
        ProgramCode::OasisPlus
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["professional services", "management consulting", "engineering", "gsa"]
    }

    async fn list_primes_or_holders(&self, store: &PortalStore) -> Result<Vec<Holder>, AdapterError> {
        db_holders(store, ProgramCode::OasisPlus).await
    }

    fn normalize(&self, raw: &JsonValue) -> Result<NormalizedOpportunity, AdapterError> {
        normalize_with(&OASIS_PLUS_ALIASES, raw)
    }

    fn extra_fields(&self) -> &'static [ExtraField] {
        &[
            ExtraField::ContractNumber,
            ExtraField::Pool,
            ExtraField::Domains,
            ExtraField::NaicsCodes,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SewpAdapter;

#[async_trait]
impl ProgramAdapter for SewpAdapter {
    fn code(&self) -> ProgramCode {
        ProgramCode::Sewp
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["it products", "hardware", "software", "nasa", "oem"]
    }

    async fn list_primes_or_holders(&self, store: &PortalStore) -> Result<Vec<Holder>, AdapterError> {
        db_holders(store, ProgramCode::Sewp).await
    }

    fn normalize(&self, raw: &JsonValue) -> Result<NormalizedOpportunity, AdapterError> {
        normalize_with(&SEWP_ALIASES, raw)
    }

    fn extra_fields(&self) -> &'static [ExtraField] {
        &[
            ExtraField::ContractNumber,
            ExtraField::OemAuthorizations,
            ExtraField::NaicsCodes,
            ExtraField::PscCodes,
        ]
    }
}

pub fn adapter_for_program(code: ProgramCode) -> Box<dyn ProgramAdapter> {
    match code {
        ProgramCode::Tls => Box::new(TlsAdapter),
        ProgramCode::OasisPlus => Box::new(OasisPlusAdapter),
        ProgramCode::Sewp => Box::new(SewpAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedbd_storage::NewHolder;
    use serde_json::json;

    #[test]
    fn tls_payload_maps_to_shared_shape() {
        let raw = json!({
            "solicitation_number": "SPE8EJ-26-R-0042",
            "title": "Night vision sustainment",
            "response_date": "03/15/2026",
            "region": "CONUS",
            "ignored": "x"
        });
        let opp = TlsAdapter.normalize(&raw).unwrap();
        assert_eq!(opp.opp_no, "SPE8EJ-26-R-0042");
        assert_eq!(opp.agency, "DLA Troop Support");
        assert_eq!(opp.status, "open");
        assert_eq!(opp.close_date, NaiveDate::from_ymd_opt(2026, 3, 15));
        assert_eq!(opp.meta.get("region").map(String::as_str), Some("CONUS"));
        assert!(!opp.meta.contains_key("ignored"));
    }

    #[test]
    fn oasis_and_sewp_use_their_own_key_spellings() {
        let oasis = OasisPlusAdapter
            .normalize(&json!({
                "notice_id": "47QRCA-26-Q-0007",
                "title": "Enterprise PMO support",
                "response_deadline": "2026-05-01T17:00:00-04:00",
                "pool": "Unrestricted",
                "status": "OPEN"
            }))
            .unwrap();
        assert_eq!(oasis.agency, "GSA");
        assert_eq!(oasis.status, "open");
        assert_eq!(oasis.close_date, NaiveDate::from_ymd_opt(2026, 5, 1));
        assert_eq!(oasis.meta.get("pool").map(String::as_str), Some("Unrestricted"));

        let sewp = SewpAdapter
            .normalize(&json!({
                "rfq_id": 98123,
                "description": "Rugged laptops",
                "customer_agency": "USACE",
                "oem": ["Dell", "Panasonic"]
            }))
            .unwrap();
        assert_eq!(sewp.opp_no, "98123");
        assert_eq!(sewp.title, "Rugged laptops");
        assert_eq!(sewp.close_date, None);
        assert_eq!(sewp.meta.get("oem").map(String::as_str), Some("Dell; Panasonic"));
    }

    #[test]
    fn normalize_rejects_missing_title_and_bad_dates() {
        let err = SewpAdapter.normalize(&json!({ "rfq_id": "R-1" })).unwrap_err();
        assert!(matches!(err, AdapterError::MissingField("title")));

        let err = TlsAdapter
            .normalize(&json!({ "opp_no": "A", "title": "B", "close_date": "soon" }))
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidDate { .. }));
    }

    #[test]
    fn extra_fields_differ_per_program() {
        let tls = adapter_for_program(ProgramCode::Tls);
        let sewp = adapter_for_program(ProgramCode::Sewp);
        assert!(!tls.extra_fields().contains(&ExtraField::Pool));
        assert!(sewp.extra_fields().contains(&ExtraField::OemAuthorizations));
        assert_eq!(sewp.name(), "SEWP V");

        let mut meta = HolderMetadata::default();
        ExtraField::Domains.apply(&mut meta, "Technical; Management | Logistics");
        assert_eq!(meta.domains.len(), 3);
        assert_eq!(ExtraField::Domains.read(&meta).as_deref(), Some("Technical, Management, Logistics"));
    }

    #[tokio::test]
    async fn tls_primes_merge_static_list_with_imported_holders() {
        let store = PortalStore::in_memory().await.unwrap();
        for name in ["ADS", "Trident Supply"] {
            store
                .insert_holder(&NewHolder {
                    name: name.to_string(),
                    full_name: format!("{name} LLC"),
                    program_code: ProgramCode::Tls,
                    capabilities: vec![],
                    metadata: HolderMetadata::default(),
                })
                .await
                .unwrap();
        }

        let primes = TlsAdapter.list_primes_or_holders(&store).await.unwrap();
        assert_eq!(primes.len(), TLS_PRIMES.len() + 1);
        assert!(primes.iter().any(|p| p.name == "Trident Supply" && p.id > 0));
        assert!(primes.iter().filter(|p| p.name == "ADS").all(|p| p.id < 0));

        assert!(OasisPlusAdapter.list_primes_or_holders(&store).await.unwrap().is_empty());
        assert!(TlsAdapter.fetch_solicitations(&store).await.unwrap().is_empty());
    }
}
