//! Inspect command implementation.

use pagedb_core::{DataSource, Engine, EngineSettings, EngineStats, HeaderPage};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Data file inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data file path.
    pub path: String,
    /// Log file path.
    pub log_path: String,
    /// Data file format version.
    pub file_version: u16,
    /// Page count recorded in the header.
    pub page_count: u32,
    /// Head of the empty-page free list, if any.
    pub free_empty_page: Option<u32>,
    /// Engine gauges after restoring the log.
    pub stats: EngineStats,
    /// Pages whose latest image is in the log (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_pages: Option<Vec<u32>>,
}

/// Runs the inspect command.
///
/// The engine is opened read-only, so inspecting never changes the files.
pub fn run(
    path: &Path,
    timeout: Duration,
    show_logged_pages: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, timeout, show_logged_pages)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Opens the data file read-only and collects the inspection result.
pub fn inspect(
    path: &Path,
    timeout: Duration,
    show_logged_pages: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data file found at {}", path.display()).into());
    }

    let source = DataSource::File(path.to_path_buf());
    let log_path = source
        .log_path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let settings = EngineSettings::new(source).timeout(timeout).read_only(true);

    let result = Engine::scoped(settings, |engine| {
        let header: HeaderPage = engine.header()?;
        let logged_pages = if show_logged_pages {
            Some(engine.logged_pages()?.iter().map(|p| p.as_u32()).collect())
        } else {
            None
        };
        Ok(InspectResult {
            path: path.display().to_string(),
            log_path,
            file_version: header.file_version,
            page_count: header.page_count,
            free_empty_page: (!header.free_empty_page.is_none())
                .then(|| header.free_empty_page.as_u32()),
            stats: engine.stats()?,
            logged_pages,
        })
    })?;
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("PageDB Data File");
    println!("================");
    println!();
    println!("Path:           {}", result.path);
    println!("Log:            {}", result.log_path);
    println!("File version:   {}", result.file_version);
    println!("Page count:     {}", result.page_count);
    match result.free_empty_page {
        Some(page) => println!("Free page head: {page}"),
        None => println!("Free page head: none"),
    }
    println!();
    println!("Data size:      {}", format_bytes(result.stats.data_length));
    println!("Log size:       {}", format_bytes(result.stats.log_length));
    println!("Logged pages:   {}", result.stats.logged_pages);
    println!("Version:        {}", result.stats.version);

    if let Some(pages) = &result.logged_pages {
        println!();
        println!("Pages in log:");
        for page in pages {
            println!("  page:{page}");
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}
