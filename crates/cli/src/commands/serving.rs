//! Commands that talk to a running inference service

use anyhow::{bail, Result};
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use tabled::Tabled;

use crate::client::{ApiClient, ModelInfo, Prediction, RetrainAck};
use crate::output::{
    color_status, format_accuracy, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Parse `name=value` into a feature pair
pub fn parse_feature(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing feature name in '{}'", raw));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    Ok((name.to_string(), value))
}

pub async fn predict(client: &ApiClient, features: Vec<(String, f64)>, format: OutputFormat) -> Result<()> {
    if features.is_empty() {
        bail!("at least one --feature name=value is required");
    }
    let body: HashMap<String, f64> = features.into_iter().collect();
    let prediction: Prediction = client.post("predict", &body).await?;

    match format {
        OutputFormat::Json => print_json(&prediction),
        OutputFormat::Table => {
            println!("Prediction:     {}", prediction.prediction.to_string().bold());
            println!("Model version:  {}", prediction.model_version);
        }
    }
    Ok(())
}

pub async fn retrain(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let ack: RetrainAck = client.post("retrain", &serde_json::json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&ack),
        OutputFormat::Table => {
            if ack.coalesced {
                print_info(&ack.message);
            } else {
                print_success(&ack.message);
            }
            println!("Trigger ID: {}", ack.trigger_id);
        }
    }
    Ok(())
}

/// Row for the alias table
#[derive(Tabled, Serialize)]
struct AliasRow {
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "Version")]
    version: u64,
}

pub async fn info(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let info: ModelInfo = client.get("model/info").await?;

    if let OutputFormat::Json = format {
        print_json(&info);
        return Ok(());
    }

    println!("{}", "Model Information".bold());
    println!("{}", "=".repeat(50));
    println!("Model:           {}", info.model_name.cyan());
    println!("Total versions:  {}", info.total_versions);
    match info.loaded_version {
        Some(v) => println!("Loaded version:  {}", v),
        None => println!("Loaded version:  {}", "none".yellow()),
    }
    println!();

    match &info.production {
        Some(production) => {
            println!("{}", "Production".bold());
            println!("  Version:   {}", production.version);
            println!("  Run ID:    {}", production.run_id);
            println!("  Accuracy:  {}", format_accuracy(production.accuracy()));
            for (name, value) in &production.parameters {
                println!("  {:<14} {}", format!("{}:", name), value);
            }
        }
        None => print_warning("No production model registered yet"),
    }
    println!();

    let rows: Vec<AliasRow> = info
        .aliases
        .iter()
        .map(|(alias, version)| AliasRow {
            alias: color_status(alias.as_str()),
            version: *version,
        })
        .collect();
    print_table(&rows, format);
    Ok(())
}

/// Row for the components table
#[derive(Tabled, Serialize)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

pub async fn health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    if let OutputFormat::Json = format {
        print_json(&health);
        return Ok(());
    }

    println!("Status:          {}", color_status(health.status.as_str()));
    match &health.model {
        Some(model) => println!(
            "Model:           version {} ({})",
            model.version,
            format_accuracy(model.accuracy)
        ),
        None => println!("Model:           {}", "not loaded".yellow()),
    }
    println!("Retraining:      {}", if health.retrain_in_flight { "in progress" } else { "idle" });
    println!();

    let mut rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(component.status.as_str()),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    print_table(&rows, format);
    Ok(())
}
