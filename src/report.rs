//! Human- and machine-facing files written next to the replicated page.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use url::Url;

use crate::error::Result;
use crate::extractor::ResourceSet;
use crate::file_manager::FileManager;

pub const INDEX_FILE: &str = "index.html";
pub const MANIFEST_FILE: &str = "resources.json";
pub const FAILURES_FILE: &str = "failed_downloads.txt";
pub const README_FILE: &str = "README.md";
pub const SERVER_SCRIPT: &str = "start_server.py";

/// Files the run writes at the output root; downloads never take these paths.
pub const GENERATED_FILES: [&str; 5] = [
    INDEX_FILE,
    MANIFEST_FILE,
    FAILURES_FILE,
    README_FILE,
    SERVER_SCRIPT,
];

pub const SERVER_PORT: u16 = 8000;

const START_SERVER_TEMPLATE: &str = r#"#!/usr/bin/env python3
import http.server
import socketserver
import os

PORT = {port}

os.chdir(os.path.dirname(os.path.abspath(__file__)))

Handler = http.server.SimpleHTTPRequestHandler

with socketserver.TCPServer(("", PORT), Handler) as httpd:
    print(f"Server running at http://localhost:{PORT}")
    print("Press Ctrl+C to stop")
    httpd.serve_forever()
"#;

/// Writes `resources.json`: category -> absolute URLs, pretty-printed.
pub fn write_manifest(file_manager: &FileManager, resources: &ResourceSet) -> Result<PathBuf> {
    let mut json = serde_json::to_string_pretty(resources)?;
    json.push('\n');
    file_manager.save_root_file(MANIFEST_FILE, json.as_bytes())
}

/// One `<url> - <reason>` line per failure.
pub fn failure_report(failures: &[(Url, String)]) -> String {
    failures
        .iter()
        .map(|(url, reason)| format!("{url} - {reason}\n"))
        .collect()
}

/// Writes `failed_downloads.txt` when there is anything to report.
pub fn write_failure_report(
    file_manager: &FileManager,
    failures: &[(Url, String)],
) -> Result<Option<PathBuf>> {
    if failures.is_empty() {
        return Ok(None);
    }
    file_manager
        .save_root_file(FAILURES_FILE, failure_report(failures).as_bytes())
        .map(Some)
}

/// What the README summarizes about a run.
#[derive(Debug, Clone)]
pub struct ReadmeContext<'a> {
    pub site: &'a str,
    pub page_url: &'a Url,
    pub generated_at: DateTime<Local>,
    pub files: usize,
    pub total_mb: f64,
    pub failures: usize,
}

pub fn readme(ctx: &ReadmeContext<'_>) -> String {
    format!(
        r#"# Website Replica - {site}

Generated on: {generated_at}
Original URL: {url}

## 📁 Contents

- `{INDEX_FILE}` - Main entry point
- `{MANIFEST_FILE}` - List of all resources
- `{FAILURES_FILE}` - Failed downloads (if any)
- `{SERVER_SCRIPT}` - Serves this directory on http://localhost:{SERVER_PORT}

## 🚀 Usage

1. **Direct Access**: Open `{INDEX_FILE}` in your browser
2. **Local Server** (recommended):
   ```bash
   ./{SERVER_SCRIPT}
   # Open http://localhost:{SERVER_PORT} in your browser
   ```

## 📊 Statistics

- Total files: {files}
- Total size: {total_mb:.2} MB
- Failed downloads: {failures}

## ⚠️ Notes

- Some dynamic features may not work offline
- External resources (CDN) require internet connection
- JavaScript functionality may be limited when opened directly
"#,
        site = ctx.site,
        generated_at = ctx.generated_at.format("%Y-%m-%d %H:%M:%S"),
        url = ctx.page_url,
        files = ctx.files,
        total_mb = ctx.total_mb,
        failures = ctx.failures,
    )
}

pub fn start_server_script() -> String {
    START_SERVER_TEMPLATE.replace("{port}", &SERVER_PORT.to_string())
}

/// Writes `README.md` and the executable `start_server.py`.
pub fn write_helper_files(file_manager: &FileManager, ctx: &ReadmeContext<'_>) -> Result<()> {
    file_manager.save_root_file(README_FILE, readme(ctx).as_bytes())?;
    file_manager.save_root_file(SERVER_SCRIPT, start_server_script().as_bytes())?;
    file_manager.make_executable(SERVER_SCRIPT)?;
    Ok(())
}
