//! Build summaries: which refs were built, at which digest.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::config::API_VERSION;

pub const BUILD_SUMMARY_KIND: &str = "ImagineBuildSummary";

/// Variant name reported for the index target.
pub const INDEX_SUMMARY_NAME: &str = "$index";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(rename = "images")]
    pub variants: Vec<VariantSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    /// `None` for the unnamed variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub digest: String,
    #[serde(default)]
    pub registry_refs: Vec<String>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormat {
    /// Pick from the output file extension
    #[default]
    Auto,
    Text,
    Lines,
    Json,
    Yaml,
}

impl SummaryFormat {
    /// Resolves `Auto` against `path`; text when there is no path or the
    /// extension is unknown.
    pub fn resolve(self, path: Option<&Path>) -> SummaryFormat {
        if self != SummaryFormat::Auto {
            return self;
        }
        match path
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str())
        {
            Some("json") => SummaryFormat::Json,
            Some("yaml") | Some("yml") => SummaryFormat::Yaml,
            _ => SummaryFormat::Text,
        }
    }
}

impl BuildSummary {
    pub fn new(name: &str) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: BUILD_SUMMARY_KIND.to_string(),
            name: name.to_string(),
            variants: Vec::new(),
        }
    }

    pub fn write<W: Write>(&self, format: SummaryFormat, w: &mut W) -> Result<()> {
        match format {
            SummaryFormat::Auto | SummaryFormat::Text => self.write_text(w),
            SummaryFormat::Lines => self.write_lines(w),
            SummaryFormat::Json => self.write_json(w),
            SummaryFormat::Yaml => self.write_yaml(w),
        }
    }

    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "built refs:")?;
        for variant in &self.variants {
            match &variant.name {
                Some(name) => writeln!(w, "{} ({}):", self.name, name)?,
                None => writeln!(w, "{}:", self.name)?,
            }
            if variant.registry_refs.is_empty() {
                writeln!(w, "- {}", variant.digest)?;
            }
            for reference in &variant.registry_refs {
                writeln!(w, "- {}@{}", reference, variant.digest)?;
            }
        }
        Ok(())
    }

    /// One `name,variant,ref@digest` line per ref.
    pub fn write_lines<W: Write>(&self, w: &mut W) -> Result<()> {
        for variant in &self.variants {
            let name = variant.name.as_deref().unwrap_or_default();
            for reference in &variant.registry_refs {
                writeln!(w, "{},{},{}@{}", self.name, name, reference, variant.digest)?;
            }
        }
        Ok(())
    }

    pub fn write_json<W: Write>(&self, w: &mut W) -> Result<()> {
        serde_json::to_writer_pretty(&mut *w, self).context("Failed to write JSON summary")?;
        writeln!(w)?;
        Ok(())
    }

    pub fn write_yaml<W: Write>(&self, w: &mut W) -> Result<()> {
        serde_yaml::to_writer(w, self).context("Failed to write YAML summary")
    }
}
