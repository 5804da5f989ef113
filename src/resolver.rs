//! Turns raw references found in markup into absolute URLs and sorts them into
//! resource categories by file extension.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Category {
    #[serde(rename = "css")]
    Css,
    #[serde(rename = "js")]
    Script,
    #[serde(rename = "images")]
    Image,
    #[serde(rename = "fonts")]
    Font,
    #[serde(rename = "other")]
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Css,
        Category::Script,
        Category::Image,
        Category::Font,
        Category::Other,
    ];

    /// Key used for this category in `resources.json` and in the summary.
    pub fn manifest_key(self) -> &'static str {
        match self {
            Category::Css => "css",
            Category::Script => "js",
            Category::Image => "images",
            Category::Font => "fonts",
            Category::Other => "other",
        }
    }

    /// Maps a file extension (without the dot, any case) to a category.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css" => Category::Css,
            "js" | "mjs" => Category::Script,
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "ico" | "avif" | "bmp" => {
                Category::Image
            }
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Category::Font,
            _ => Category::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_key())
    }
}

/// An absolute resource URL together with the category it was filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceUrl {
    pub url: Url,
    pub category: Category,
}

impl ResourceUrl {
    pub fn new(url: Url, category: Category) -> Self {
        Self { url, category }
    }

    /// Builds a resource whose category comes from the URL's extension.
    pub fn classified(url: Url) -> Self {
        let category = classify(&url);
        Self { url, category }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Resolves `reference` against `base` using standard relative-URL rules.
///
/// Returns `None` for references that never need a fetch: empty values,
/// fragment-only links, `data:` URIs, and anything that does not end up as an
/// http(s) URL (`javascript:`, `mailto:`, ...). Fragments are dropped and an
/// empty query is treated as no query.
pub fn resolve(reference: &str, base: &Url) -> Option<Url> {
    let reference = decode_amp(reference.trim());
    if reference.is_empty() || reference.starts_with('#') || is_data_uri(&reference) {
        return None;
    }

    let mut url = base.join(&reference).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    if url.query() == Some("") {
        url.set_query(None);
    }
    Some(url)
}

/// Category of `url`, from the lowercase extension of its path.
pub fn classify(url: &Url) -> Category {
    extension(url.path())
        .map(Category::from_extension)
        .unwrap_or(Category::Other)
}

pub fn is_data_uri(reference: &str) -> bool {
    reference
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

/// Extension of the last segment of `path`, without the dot.
///
/// A leading dot (`.htaccess`) is part of the name, not an extension.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => Some(&name[idx + 1..]),
        _ => None,
    }
}

/// Host plus explicit port, i.e. what identifies a site for same-origin checks.
pub fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

// Attribute values are raw markup, where `&` inside a URL is usually escaped.
fn decode_amp(reference: &str) -> Cow<'_, str> {
    if reference.contains("&amp;") {
        Cow::Owned(reference.replace("&amp;", "&"))
    } else {
        Cow::Borrowed(reference)
    }
}
