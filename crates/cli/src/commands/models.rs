//! Registry inspection commands

use anyhow::{Context, Result};
use mlops_lib::models::Alias;
use mlops_lib::registry::{FileRegistry, ModelRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{format_accuracy, print_table, OutputFormat};

/// Row for the versions table
#[derive(Tabled, Serialize)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Run ID")]
    run_id: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Aliases")]
    aliases: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

/// List registered versions with their alias bindings
pub async fn list_models(model_name: &str, registry_root: PathBuf, format: OutputFormat) -> Result<()> {
    let registry = FileRegistry::new(&registry_root);
    let versions = registry
        .list_versions(model_name)
        .await
        .with_context(|| format!("Failed to read registry at {}", registry_root.display()))?;
    let bindings = registry.aliases(model_name).await?;

    let rows: Vec<VersionRow> = versions
        .iter()
        .map(|v| VersionRow {
            version: v.version,
            run_id: v.run_id.clone(),
            accuracy: format_accuracy(v.accuracy()),
            aliases: aliases_for(&bindings, v.version),
            created_at: chrono::DateTime::from_timestamp(v.created_at, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| v.created_at.to_string()),
        })
        .collect();

    print_table(&rows, format);
    Ok(())
}

fn aliases_for(bindings: &BTreeMap<Alias, u64>, version: u64) -> String {
    bindings
        .iter()
        .filter(|(_, &v)| v == version)
        .map(|(alias, _)| alias.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
