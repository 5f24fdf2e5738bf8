//! CLI subcommand handlers

use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use services::{
    models::product::Product,
    services::{
        affiliate,
        config::{ConfigError, PipelineConfig},
        pipeline::{Pipeline, RunOutcome},
        record_source::{AirtableRecordStore, RecordStore},
    },
};

use crate::output::OutputHandler;

/// Load and validate the config, building the pipeline from it.
fn pipeline(config_path: &Path) -> Result<Pipeline> {
    let config = PipelineConfig::load(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    Pipeline::from_config(&config).context("building pipeline")
}

/// Process the next pending record, a given record, or every pending record
/// in turn.
pub async fn run(
    config_path: &Path,
    record: Option<&str>,
    repeat: bool,
    interval: Duration,
) -> Result<()> {
    let output = OutputHandler::new();
    let pipeline = pipeline(config_path)?;

    if let Some(id) = record {
        let report = pipeline
            .run_record(id)
            .await
            .with_context(|| format!("processing record {id}"))?;
        output.print_report(&report);
        return Ok(());
    }

    let mut processed = 0usize;
    loop {
        match pipeline.run_once().await.context("pipeline pass failed")? {
            RunOutcome::Idle => {
                if processed == 0 {
                    output.print_info("No pending records.");
                } else {
                    output.print_success(&format!("Processed {processed} record(s)."));
                }
                return Ok(());
            }
            RunOutcome::Processed(report) => {
                processed += 1;
                output.print_report(&report);
            }
        }

        if !repeat {
            return Ok(());
        }

        tracing::debug!("Sleeping {:?} before the next pass", interval);
        tokio::time::sleep(interval).await;
    }
}

/// Record store from the airtable section alone.
fn record_store(config_path: &Path) -> Result<AirtableRecordStore> {
    let config = PipelineConfig::read(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    config.airtable.validate()?;
    AirtableRecordStore::from_config(&config.airtable, config.http_timeout_secs, &config.retry)
        .context("building record store")
}

/// Show one record as the pipeline sees it.
pub async fn status(config_path: &Path, id: &str) -> Result<()> {
    let store = record_store(config_path)?;
    let record = store
        .get_record(id)
        .await
        .with_context(|| format!("fetching record {id}"))?;
    OutputHandler::new().print_record(&record);
    Ok(())
}

/// Print the effective configuration with secrets masked. Missing keys are
/// reported but do not stop the dump.
pub fn show_config(config_path: &Path) -> Result<()> {
    let output = OutputHandler::new();
    let config = PipelineConfig::read(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    output.print_header(&format!("Config ({})", config_path.display()));
    println!("{}", serde_json::to_string_pretty(&config.masked())?);

    match config.validate() {
        Ok(()) => output.print_success("All required keys present"),
        Err(ConfigError::Missing(keys)) => {
            output.print_warning(&format!("Missing required keys: {}", keys.join(", ")))
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Print an affiliate link for an ASIN or product URL. Without `--tag` the
/// configured tag is used.
pub fn link(
    config_path: &Path,
    asin: Option<&str>,
    url: Option<&str>,
    tag: Option<&str>,
) -> Result<()> {
    let tag = match tag {
        Some(tag) => tag.to_string(),
        None => configured_tag(config_path)?,
    };

    println!("{}", affiliate_link(asin, url, &tag)?);
    Ok(())
}

fn configured_tag(config_path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(config_path).with_context(|| {
        format!("no --tag given and config {} is unreadable", config_path.display())
    })?;
    let config = PipelineConfig::from_json(&content)?;
    let tag = config.affiliate.tag.trim();
    if tag.is_empty() {
        bail!("no --tag given and affiliate.tag is not configured");
    }
    Ok(tag.to_string())
}

fn affiliate_link(asin: Option<&str>, url: Option<&str>, tag: &str) -> Result<String> {
    let product = match (asin, url) {
        (Some(asin), _) => {
            let asin = asin.trim();
            if !affiliate::is_valid_asin(asin) {
                bail!("'{asin}' is not a valid ASIN");
            }
            Product::new(asin).with_asin(asin)
        }
        (None, Some(url)) => {
            let mut product = Product::new(url);
            product.asin = affiliate::extract_asin(url);
            product.url = Some(url.to_string());
            product
        }
        (None, None) => bail!("pass --asin or --url"),
    };
    Ok(affiliate::build_link(&product, tag))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_link_from_asin() {
        let link = affiliate_link(Some("b07gbz4q68"), None, "mytag-20").unwrap();
        assert_eq!(link, "https://www.amazon.com/dp/B07GBZ4Q68?tag=mytag-20");
    }

    #[test]
    fn test_link_from_product_url() {
        let link = affiliate_link(
            None,
            Some("https://www.amazon.com/Logitech-G502/dp/B07GBZ4Q68/ref=sr_1_1"),
            "mytag-20",
        )
        .unwrap();
        assert_eq!(link, "https://www.amazon.com/dp/B07GBZ4Q68?tag=mytag-20");
    }

    #[test]
    fn test_link_requires_input() {
        assert!(affiliate_link(None, None, "mytag-20").is_err());
        assert!(affiliate_link(Some("short"), None, "mytag-20").is_err());
    }

    #[test]
    fn test_configured_tag() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"affiliate": {{"tag": " from-config-20 "}}}}"#).unwrap();
        assert_eq!(configured_tag(file.path()).unwrap(), "from-config-20");

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        write!(empty, "{{}}").unwrap();
        assert!(configured_tag(empty.path()).is_err());
    }

    #[test]
    fn test_show_config_tolerates_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"airtable": {{"api_key": "keyABCDEFGH1234"}}}}"#).unwrap();
        show_config(file.path()).unwrap();
    }

    #[test]
    fn test_record_store_needs_only_airtable_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"airtable": {{"api_key": "patXXXX", "base_id": "appYYY"}}, "http_timeout_secs": 5}}"#
        )
        .unwrap();
        assert!(record_store(file.path()).is_ok());

        let mut partial = tempfile::NamedTempFile::new().unwrap();
        write!(partial, r#"{{"airtable": {{"api_key": "patXXXX"}}, "llm": {{"api_key": "sk"}}}}"#)
            .unwrap();
        let err = record_store(partial.path()).err().unwrap();
        assert!(format!("{err:#}").contains("airtable.base_id"), "{err:#}");
    }
}
