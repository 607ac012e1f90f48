use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use webassess_core::UrlReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Report wrapped in an envelope with timestamps, status and error message
    #[default]
    Signal,
    /// Report as JSON
    Json,
    /// Report as YAML
    Yaml,
    /// Synthesized analysis only, or the errors
    Text,
}

/// Envelope written for `OutputFormat::Signal`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal<'a> {
    pub content: &'a UrlReport,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: i32,
    pub error_message: Option<&'a str>,
}

impl<'a> Signal<'a> {
    pub fn new(report: &'a UrlReport) -> Self {
        Self {
            content: report,
            started_at: report.started_at,
            completed_at: report.completed_at,
            status: report.status,
            error_message: report.errors.first().map(String::as_str),
        }
    }
}

pub fn render_report(report: &UrlReport, format: OutputFormat) -> Result<String> {
    let rendered = match format {
        OutputFormat::Signal => serde_json::to_string_pretty(&Signal::new(report))?,
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Yaml => serde_yaml::to_string(report)?,
        OutputFormat::Text => match &report.output {
            Some(output) if report.is_success() => output.clone(),
            _ => report
                .errors
                .iter()
                .map(|e| format!("error: {}", e))
                .collect::<Vec<_>>()
                .join("\n"),
        },
    };
    Ok(rendered)
}

/// Write the rendered report to `path`, or to stdout when no path is given.
pub fn write_report(report: &UrlReport, format: OutputFormat, path: Option<&Path>) -> Result<()> {
    let mut rendered = render_report(report, format)?;
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }

    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .context("Failed to write report to stdout")?;
            stdout.flush().context("Failed to flush stdout")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success() -> UrlReport {
        let mut report = UrlReport::new("https://example.com");
        report.output = Some("{\"codeSummary\":\"login page\"}".into());
        report.complete();
        report
    }

    fn failure() -> UrlReport {
        let mut report = UrlReport::new("https://example.com");
        report.output = Some("partial".into());
        report.fail("model 'x' is not available and allow-download is not set");
        report.complete();
        report
    }

    #[test]
    fn signal_wraps_report() {
        let value: serde_json::Value =
            serde_json::from_str(&render_report(&failure(), OutputFormat::Signal).unwrap())
                .unwrap();
        assert_eq!(value["status"], 1);
        assert_eq!(value["content"]["target"], "https://example.com");
        assert!(value["content"].get("output").is_none());
        assert_eq!(
            value["errorMessage"],
            "model 'x' is not available and allow-download is not set"
        );
        assert!(value["startedAt"].is_string());
        assert!(value["completedAt"].is_string());
    }

    #[test]
    fn signal_of_success_has_no_error_message() {
        let value: serde_json::Value =
            serde_json::from_str(&render_report(&success(), OutputFormat::Signal).unwrap())
                .unwrap();
        assert_eq!(value["status"], 0);
        assert!(value["errorMessage"].is_null());
        assert_eq!(value["content"]["output"], "{\"codeSummary\":\"login page\"}");
    }

    #[test]
    fn json_and_yaml_carry_the_report() {
        let report = success();
        let json = render_report(&report, OutputFormat::Json).unwrap();
        let parsed: UrlReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);

        let yaml = render_report(&report, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("target: https://example.com"));
        assert!(yaml.contains("status: 0"));
    }

    #[test]
    fn text_shows_output_or_errors() {
        assert_eq!(
            render_report(&success(), OutputFormat::Text).unwrap(),
            "{\"codeSummary\":\"login page\"}"
        );
        assert_eq!(
            render_report(&failure(), OutputFormat::Text).unwrap(),
            "error: model 'x' is not available and allow-download is not set"
        );
    }

    #[test]
    fn report_is_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("out.json");

        write_report(&success(), OutputFormat::Json, Some(&path)).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.ends_with('\n'));
        let parsed: UrlReport = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.target, "https://example.com");
    }
}
