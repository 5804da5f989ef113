//! Deterministic mapping from absolute resource URLs to paths inside the
//! output directory.

use std::fmt;
use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::resolver::authority;

/// Subtree holding resources that live on other hosts than the page.
pub const EXTERNAL_DIR: &str = "external";

// Characters that must be escaped when a local file name is written back into
// markup or CSS as a relative reference.
const REFERENCE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'%')
    .add(b'&')
    .add(b'?')
    .add(b'#');

/// A `/`-separated path relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalPath(String);

impl LocalPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem location of this path under `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.0.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    /// Directory part of the path (empty for files at the output root).
    pub fn parent(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PathMapper {
    site: String,
}

impl PathMapper {
    /// Creates a mapper for the site that `page_url` belongs to.
    pub fn new(page_url: &Url) -> Self {
        Self {
            site: authority(page_url),
        }
    }

    /// Host (plus explicit port) treated as same-origin.
    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        authority(url) == self.site
    }

    /// Maps `url` to its location under the output root.
    ///
    /// Same-origin URLs keep their path; everything else goes under
    /// `external/<host>/`. A query string is folded into the file name so that
    /// URLs differing only by query get different files.
    pub fn local_path(&self, url: &Url) -> LocalPath {
        let mut segments: Vec<String> = url
            .path()
            .split('/')
            .map(|segment| sanitize(&percent_decode_str(segment).decode_utf8_lossy()))
            .filter(|segment| !segment.is_empty() && segment != "." && segment != "..")
            .collect();

        if segments.is_empty() || url.path().ends_with('/') {
            segments.push("index".to_string());
        }

        if let Some(query) = url.query().filter(|q| !q.is_empty()) {
            if let Some(last) = segments.last_mut() {
                *last = fold_query(last, query);
            }
        }

        let path = segments.join("/");
        if self.is_same_origin(url) {
            LocalPath(path)
        } else {
            let host_dir = authority(url).replace(':', "_");
            LocalPath(format!("{EXTERNAL_DIR}/{host_dir}/{path}"))
        }
    }
}

/// Inserts `_<query>` into the last segment of `path`, ahead of its extension.
///
/// `style.css` + `v=2` becomes `style_v=2.css`. The query is percent-decoded and
/// characters that would change the meaning of a path are replaced with `_`.
pub fn fold_query(path: &str, query: &str) -> String {
    insert_before_extension(path, &decoded_query(query))
}

/// Percent-escapes a `/`-separated local path for use as a relative reference.
pub fn encode_reference(path: &str) -> String {
    utf8_percent_encode(path, REFERENCE).to_string()
}

fn decoded_query(query: &str) -> String {
    sanitize(&percent_decode_str(query).decode_utf8_lossy())
}

fn insert_before_extension(path: &str, suffix: &str) -> String {
    let name_start = path.rfind('/').map_or(0, |idx| idx + 1);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = name_start + dot;
            format!("{}_{}{}", &path[..dot], suffix, &path[dot..])
        }
        _ => format!("{path}_{suffix}"),
    }
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '#' => '_',
            c => c,
        })
        .collect()
}
