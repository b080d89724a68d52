//! Markdown micro-catalogs: one-page capability summaries per prime.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fedbd_adapters::ProgramAdapter;
use fedbd_core::{Holder, Program};
use tokio::fs;

pub fn render_micro_catalog(program: &Program, adapter: &dyn ProgramAdapter, holder: &Holder) -> String {
    let mut lines = vec![
        format!("# {}", holder.full_name),
        String::new(),
        format!("- Program: {}", program.display_name),
        format!("- Short name: {}", holder.name),
    ];
    for field in adapter.extra_fields() {
        if let Some(value) = field.read(&holder.metadata) {
            lines.push(format!("- {}: {value}", field.label()));
        }
    }

    lines.push(String::new());
    lines.push("## Capabilities".to_string());
    if holder.capabilities.is_empty() {
        lines.push("- None listed".to_string());
    } else {
        lines.extend(holder.capabilities.iter().map(|c| format!("- {c}")));
    }

    if !program.keywords.is_empty() {
        lines.push(String::new());
        lines.push(format!("_Vehicle focus: {}_", program.keywords.join(", ")));
    }
    lines.push(String::new());
    lines.join("\n")
}

pub fn catalog_slug(holder: &Holder) -> String {
    let slug = holder
        .name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        format!("holder-{}", holder.id.unsigned_abs())
    } else {
        slug
    }
}

/// Write one file per holder under `<root>/reports/catalogs/<program>/`. Holders whose names
/// slug alike get their id appended so no file is overwritten.
pub async fn write_micro_catalogs(
    workspace_root: &Path,
    program: &Program,
    adapter: &dyn ProgramAdapter,
    holders: &[Holder],
) -> Result<Vec<PathBuf>> {
    let dir = workspace_root
        .join("reports")
        .join("catalogs")
        .join(program.code.as_str());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let mut written = Vec::with_capacity(holders.len());
    let mut taken = BTreeSet::new();
    for holder in holders {
        let mut slug = catalog_slug(holder);
        if !taken.insert(slug.clone()) {
            slug = format!("{slug}-{}", holder.id.unsigned_abs());
            taken.insert(slug.clone());
        }
        let path = dir.join(format!("{slug}.md"));
        fs::write(&path, render_micro_catalog(program, adapter, holder))
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedbd_adapters::{OasisPlusAdapter, ProgramRegistry, TlsAdapter};
    use fedbd_core::ProgramCode;
    use tempfile::tempdir;

    #[test]
    fn catalog_lists_program_specific_fields() {
        let registry = ProgramRegistry::with_defaults();
        let program = registry.program(ProgramCode::Tls).unwrap();
        let holder = TlsAdapter::static_primes().remove(0);

        let md = render_micro_catalog(&program, &TlsAdapter, &holder);
        assert!(md.starts_with("# Atlantic Diving Supply, Inc.\n"));
        assert!(md.contains("- Program: TLS"));
        assert!(md.contains("- Contract number: SPE8EJ-17-D-0001"));
        assert!(md.contains("## Capabilities\n- Tactical equipment"));
        assert!(!md.contains("Pool"));
    }

    #[tokio::test]
    async fn catalogs_are_written_per_holder() {
        let dir = tempdir().unwrap();
        let registry = ProgramRegistry::with_defaults();
        let program = registry.program(ProgramCode::Tls).unwrap();
        let holders = TlsAdapter::static_primes();

        let paths = write_micro_catalogs(dir.path(), &program, &TlsAdapter, &holders)
            .await
            .unwrap();
        assert_eq!(paths.len(), holders.len());
        assert!(dir.path().join("reports/catalogs/tls/federal-resources.md").exists());
    }

    #[tokio::test]
    async fn holders_with_colliding_slugs_get_separate_files() {
        let dir = tempdir().unwrap();
        let registry = ProgramRegistry::with_defaults();
        let program = registry.program(ProgramCode::OasisPlus).unwrap();
        let holder = |id: i64, name: &str| Holder {
            id,
            name: name.to_string(),
            full_name: format!("{name} Federal"),
            program_code: ProgramCode::OasisPlus,
            capabilities: vec![],
            metadata: Default::default(),
        };
        let holders = [holder(7, "ACME, Inc."), holder(9, "Acme Inc")];

        let paths = write_micro_catalogs(dir.path(), &program, &OasisPlusAdapter, &holders)
            .await
            .unwrap();
        let base = dir.path().join("reports/catalogs/oasis_plus");
        assert_eq!(paths, vec![base.join("acme-inc.md"), base.join("acme-inc-9.md")]);
        let second = std::fs::read_to_string(&paths[1]).unwrap();
        assert!(second.starts_with("# Acme Inc Federal\n"));
        let first = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(first.starts_with("# ACME, Inc. Federal\n"));
    }
}
