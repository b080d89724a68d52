//! Program registry: one adapter per vehicle plus the admin-controlled enable flags.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use fedbd_core::{Program, ProgramCode};
use fedbd_storage::PortalStore;
use serde::Deserialize;
use strsim::jaro_winkler;
use tokio::fs;
use tracing::info;

use crate::{adapter_for_program, AdapterError, ProgramAdapter};

const SUGGESTION_THRESHOLD: f64 = 0.75;

/// Shape of `programs.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramCatalogFile {
    pub programs: Vec<ProgramEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramEntry {
    pub code: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

pub struct ProgramRegistry {
    adapters: BTreeMap<ProgramCode, Arc<dyn ProgramAdapter>>,
    programs: RwLock<BTreeMap<ProgramCode, Program>>,
}

impl std::fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramRegistry")
            .field("programs", &self.programs())
            .finish()
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProgramRegistry {
    /// Every program enabled, names and keywords from the adapters.
    pub fn with_defaults() -> Self {
        let mut adapters = BTreeMap::new();
        let mut programs = BTreeMap::new();
        for code in ProgramCode::ALL {
            let adapter: Arc<dyn ProgramAdapter> = Arc::from(adapter_for_program(code));
            programs.insert(
                code,
                Program {
                    code,
                    display_name: adapter.name().to_string(),
                    enabled: true,
                    keywords: adapter.keywords().iter().map(ToString::to_string).collect(),
                },
            );
            adapters.insert(code, adapter);
        }
        Self {
            adapters,
            programs: RwLock::new(programs),
        }
    }

    pub fn from_catalog(catalog: &ProgramCatalogFile) -> Result<Self, AdapterError> {
        let registry = Self::with_defaults();
        let entries = catalog
            .programs
            .iter()
            .map(|entry| Ok((registry.resolve(&entry.code)?, entry)))
            .collect::<Result<Vec<_>, AdapterError>>()?;
        {
            let mut programs = registry.programs.write().unwrap_or_else(PoisonError::into_inner);
            for (code, entry) in entries {
                if let Some(program) = programs.get_mut(&code) {
                    if let Some(name) = entry.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
                        program.display_name = name.trim().to_string();
                    }
                    if !entry.keywords.is_empty() {
                        program.keywords = entry.keywords.clone();
                    }
                    program.enabled = entry.enabled;
                }
            }
        }
        Ok(registry)
    }

    /// Seed from `<workspace_root>/programs.yaml`, falling back to the built-in defaults.
    pub async fn load(workspace_root: &Path) -> anyhow::Result<Self> {
        let path = workspace_root.join("programs.yaml");
        if !fs::try_exists(&path).await.unwrap_or(false) {
            info!(path = %path.display(), "programs.yaml not found; using built-in program defaults");
            return Ok(Self::with_defaults());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let catalog: ProgramCatalogFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Self::from_catalog(&catalog).with_context(|| format!("validating {}", path.display()))
    }

    /// Overlay toggles saved from the settings page and push names/keywords to the store.
    pub async fn sync_with_store(&self, store: &PortalStore) -> Result<(), AdapterError> {
        let toggles = store.program_toggles().await?;
        let snapshot = {
            let mut programs = self.programs.write().unwrap_or_else(PoisonError::into_inner);
            for (code, enabled) in toggles {
                if let Some(program) = programs.get_mut(&code) {
                    program.enabled = enabled;
                }
            }
            programs.values().cloned().collect::<Vec<_>>()
        };
        for program in snapshot {
            store
                .update_program_catalog(program.code, &program.display_name, &program.keywords)
                .await?;
        }
        Ok(())
    }

    /// Empty input means "no program filter"; unknown input is an error with a suggestion.
    pub fn normalize_code(&self, input: &str) -> Result<Option<ProgramCode>, AdapterError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if let Some(code) = ProgramCode::parse_loose(trimmed) {
            return Ok(Some(code));
        }
        Err(AdapterError::UnknownProgram {
            input: trimmed.to_string(),
            suggestion: self.closest_code(trimmed),
        })
    }

    pub fn resolve(&self, input: &str) -> Result<ProgramCode, AdapterError> {
        self.normalize_code(input)?.ok_or_else(|| AdapterError::UnknownProgram {
            input: input.to_string(),
            suggestion: None,
        })
    }

    fn closest_code(&self, input: &str) -> Option<ProgramCode> {
        let needle = input.to_ascii_lowercase();
        let programs = self.programs.read().unwrap_or_else(PoisonError::into_inner);
        programs
            .values()
            .map(|program| {
                let by_code = jaro_winkler(&needle, program.code.as_str());
                let by_name = jaro_winkler(&needle, &program.display_name.to_ascii_lowercase());
                (program.code, by_code.max(by_name))
            })
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(code, _)| code)
    }

    pub fn adapter(&self, code: ProgramCode) -> Arc<dyn ProgramAdapter> {
        match self.adapters.get(&code) {
            Some(adapter) => Arc::clone(adapter),
            None => Arc::from(adapter_for_program(code)),
        }
    }

    /// Adapter for an enabled program; disabled programs are reported as such.
    pub fn enabled_adapter(&self, code: ProgramCode) -> Result<Arc<dyn ProgramAdapter>, AdapterError> {
        if !self.is_enabled(code) {
            return Err(AdapterError::Disabled(code));
        }
        Ok(self.adapter(code))
    }

    pub fn is_enabled(&self, code: ProgramCode) -> bool {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&code)
            .map(|p| p.enabled)
            .unwrap_or(false)
    }

    /// In-memory flip; callers persist through `PortalStore::set_program_enabled`.
    pub fn set_enabled(&self, code: ProgramCode, enabled: bool) {
        let mut programs = self.programs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(program) = programs.get_mut(&code) {
            if program.enabled != enabled {
                info!(program = %code, enabled, "program toggle changed");
            }
            program.enabled = enabled;
        }
    }

    pub fn programs(&self) -> Vec<Program> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn program(&self, code: ProgramCode) -> Option<Program> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&code)
            .cloned()
    }

    pub fn enabled_codes(&self) -> Vec<ProgramCode> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.enabled)
            .map(|p| p.code)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_program_code_means_no_filter() {
        let registry = ProgramRegistry::with_defaults();
        assert_eq!(registry.normalize_code("").unwrap(), None);
        assert_eq!(registry.normalize_code("   ").unwrap(), None);
        assert_eq!(registry.normalize_code("OASIS+").unwrap(), Some(ProgramCode::OasisPlus));
        assert!(registry.resolve("").is_err());
    }

    #[test]
    fn unknown_program_code_suggests_closest_match() {
        let registry = ProgramRegistry::with_defaults();
        let err = registry.normalize_code("sewq").unwrap_err();
        match &err {
            AdapterError::UnknownProgram { suggestion, .. } => {
                assert_eq!(*suggestion, Some(ProgramCode::Sewp));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("did you mean `sewp`"));

        let err = registry.normalize_code("zzzzzz").unwrap_err();
        assert!(matches!(err, AdapterError::UnknownProgram { suggestion: None, .. }));
    }

    #[test]
    fn catalog_file_overrides_names_keywords_and_flags() {
        let catalog: ProgramCatalogFile = serde_yaml::from_str(
            r#"
programs:
  - code: tls
    display_name: "Tailored Logistics Support"
    keywords: [tactical, sof]
  - code: sewp
    enabled: false
"#,
        )
        .unwrap();
        let registry = ProgramRegistry::from_catalog(&catalog).unwrap();
        let tls = registry.program(ProgramCode::Tls).unwrap();
        assert_eq!(tls.display_name, "Tailored Logistics Support");
        assert_eq!(tls.keywords, vec!["tactical".to_string(), "sof".to_string()]);
        assert!(!registry.is_enabled(ProgramCode::Sewp));
        assert_eq!(registry.enabled_codes(), vec![ProgramCode::Tls, ProgramCode::OasisPlus]);
        assert!(matches!(
            registry.enabled_adapter(ProgramCode::Sewp),
            Err(AdapterError::Disabled(ProgramCode::Sewp))
        ));
    }

    #[test]
    fn catalog_with_unknown_code_is_rejected() {
        let catalog = ProgramCatalogFile {
            programs: vec![ProgramEntry {
                code: "gwac".to_string(),
                display_name: None,
                enabled: true,
                keywords: vec![],
            }],
        };
        assert!(ProgramRegistry::from_catalog(&catalog).is_err());
    }

    #[tokio::test]
    async fn missing_catalog_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let registry = ProgramRegistry::load(dir.path()).await.unwrap();
        assert_eq!(registry.enabled_codes().len(), ProgramCode::ALL.len());
    }

    #[tokio::test]
    async fn persisted_toggles_win_over_catalog_defaults() {
        let store = PortalStore::in_memory().await.unwrap();
        store.set_program_enabled(ProgramCode::OasisPlus, false).await.unwrap();

        let registry = ProgramRegistry::with_defaults();
        registry.sync_with_store(&store).await.unwrap();
        assert!(!registry.is_enabled(ProgramCode::OasisPlus));
        assert!(registry.is_enabled(ProgramCode::Tls));

        registry.set_enabled(ProgramCode::OasisPlus, true);
        assert!(registry.is_enabled(ProgramCode::OasisPlus));
    }
}
