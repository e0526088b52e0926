use anyhow::{Context, Result};
use clap::Parser;
use mutability_scan::cli::{Cli, Commands, OutputFormat};
use mutability_scan::config::Configuration;
use mutability_scan::loader::{DecodingProvider, SearchPath, scan_classpath};
use mutability_scan::model::{AnalysisError, AnalysisResult, ClassName};
use mutability_scan::session::AnalysisSession;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => Configuration::from_json_file(path)?,
        None => Configuration::default(),
    };

    match cli.command {
        Commands::Analyze {
            classpath,
            classes,
            format,
            output,
        } => {
            let report = analyze(config, &classpath, &classes)?;
            write_report(&report, format, output.as_deref())?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct Report {
    scanned_roots: Vec<String>,
    analyzed: usize,
    duration_ms: u64,
    results: Vec<AnalysisResult>,
    errors: Vec<AnalysisError>,
}

fn analyze(config: Configuration, classpath: &[PathBuf], classes: &[String]) -> Result<Report> {
    let start = Instant::now();

    let targets: Vec<ClassName> = if classes.is_empty() {
        scan_classpath(classpath).context("failed to scan classpath")?
    } else {
        classes.iter().map(|c| ClassName::new(c)).collect()
    };

    let provider = DecodingProvider::new(SearchPath::from_roots(classpath));
    let session = AnalysisSession::new(Box::new(provider), config);
    session.run_analysis(&targets);

    Ok(Report {
        scanned_roots: classpath
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
        analyzed: targets.len(),
        duration_ms: start.elapsed().as_millis() as u64,
        results: session.results(),
        errors: session.errors(),
    })
}

fn write_report(report: &Report, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Text => render_text(report),
    };

    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}

fn render_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("analyzed: {}\n", report.analyzed));
    out.push_str(&format!("duration_ms: {}\n", report.duration_ms));
    for result in &report.results {
        out.push_str(&format!("{}: {}\n", result.class, result.verdict));
        for reason in &result.reasons {
            out.push_str(&format!("  - {} ({})\n", reason.message, reason.location));
        }
    }
    for error in &report.errors {
        out.push_str(&format!(
            "error: {} [{}]: {}\n",
            error.class, error.checker, error.description
        ));
    }
    out
}
