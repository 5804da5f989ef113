//! Pattern-based discovery of resource references in HTML and CSS text.
//!
//! Matching runs over raw text rather than a parsed document. Known blind spots:
//! URLs built at runtime by scripts are never seen, references inside HTML or
//! CSS comments and inline scripts are picked up as if they were live, and
//! `srcset` / `<base href>` are not interpreted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use url::Url;

use crate::resolver::{resolve, Category, ResourceUrl};

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("hardcoded regex pattern is valid"));
    };
}

pattern!(
    STYLESHEET_LINK,
    r#"(?i)<link\b[^>]*?\shref\s*=\s*["']([^"']+?\.css(?:[?#][^"']*)?)["']"#
);
pattern!(SCRIPT_SRC, r#"(?i)<script\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#);
pattern!(IMG_SRC, r#"(?i)<img\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#);
pattern!(DATA_SRC, r#"(?i)\bdata-src\s*=\s*["']([^"']+)["']"#);
pattern!(
    BACKGROUND_IMAGE,
    r#"(?i)background-image\s*:\s*url\(\s*["']?([^"')\s]+)["']?\s*\)"#
);
pattern!(FONT_FILE, r#"(?i)["']([^"']+\.(?:woff2?|ttf|otf|eot))["']"#);
pattern!(CSS_IMPORT, r#"(?i)@import\s+["']([^"']+)["']"#);
pattern!(CSS_URL, r#"(?i)url\(\s*["']?([^"')\s]+)["']?\s*\)"#);

/// Resource URLs discovered for one page, grouped by category.
///
/// URLs are unique within a category and kept in order, so the manifest and
/// the fetch order are stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    entries: BTreeMap<Category, BTreeSet<Url>>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource; returns `false` when it was already in its category.
    pub fn insert(&mut self, resource: ResourceUrl) -> bool {
        self.entries
            .entry(resource.category)
            .or_default()
            .insert(resource.url)
    }

    pub fn contains(&self, resource: &ResourceUrl) -> bool {
        self.entries
            .get(&resource.category)
            .is_some_and(|urls| urls.contains(&resource.url))
    }

    pub fn urls(&self, category: Category) -> impl Iterator<Item = &Url> {
        self.entries.get(&category).into_iter().flatten()
    }

    pub fn count(&self, category: Category) -> usize {
        self.entries.get(&category).map_or(0, BTreeSet::len)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All resources, category by category.
    pub fn iter(&self) -> impl Iterator<Item = ResourceUrl> + '_ {
        self.entries.iter().flat_map(|(category, urls)| {
            urls.iter()
                .map(move |url| ResourceUrl::new(url.clone(), *category))
        })
    }
}

impl Extend<ResourceUrl> for ResourceSet {
    fn extend<I: IntoIterator<Item = ResourceUrl>>(&mut self, iter: I) {
        for resource in iter {
            self.insert(resource);
        }
    }
}

// Serialized as the `resources.json` manifest: every category key is present.
impl Serialize for ResourceSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Category::ALL.len()))?;
        for category in Category::ALL {
            let urls: Vec<&str> = self.urls(category).map(Url::as_str).collect();
            map.serialize_entry(category.manifest_key(), &urls)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    base_url: Url,
}

impl Extractor {
    /// `base_url` is the document the text came from; references resolve
    /// against it.
    pub fn new(base_url: &Url) -> Self {
        Self {
            base_url: base_url.clone(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Collects the stylesheets, scripts, images and fonts a page references.
    pub fn extract_resources(&self, html: &str) -> ResourceSet {
        let mut resources = ResourceSet::new();

        self.collect(&STYLESHEET_LINK, html, Category::Css, &mut resources);
        self.collect(&SCRIPT_SRC, html, Category::Script, &mut resources);
        for pattern in [&IMG_SRC, &DATA_SRC, &BACKGROUND_IMAGE] {
            self.collect(pattern, html, Category::Image, &mut resources);
        }
        // Deliberately unscoped: any quoted font file name anywhere counts.
        self.collect(&FONT_FILE, html, Category::Font, &mut resources);

        tracing::debug!(
            base = %self.base_url,
            total = resources.len(),
            "extracted page resources"
        );
        resources
    }

    /// Dependencies of a stylesheet: `@import` targets are stylesheets, `url()`
    /// targets are classified by extension. `self` must be built on the
    /// stylesheet's own URL.
    pub fn extract_stylesheet_dependencies(&self, css: &str) -> Vec<ResourceUrl> {
        let mut dependencies = BTreeSet::new();

        for reference in captures(&CSS_IMPORT, css) {
            if let Some(url) = resolve(reference, &self.base_url) {
                dependencies.insert(ResourceUrl::new(url, Category::Css));
            }
        }
        for reference in captures(&CSS_URL, css) {
            if let Some(url) = resolve(reference, &self.base_url) {
                dependencies.insert(ResourceUrl::classified(url));
            }
        }

        dependencies.into_iter().collect()
    }

    fn collect(&self, pattern: &Regex, text: &str, category: Category, into: &mut ResourceSet) {
        for reference in captures(pattern, text) {
            if let Some(url) = resolve(reference, &self.base_url) {
                into.insert(ResourceUrl::new(url, category));
            }
        }
    }
}

fn captures<'t>(pattern: &'t Regex, text: &'t str) -> impl Iterator<Item = &'t str> + 't {
    pattern
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str())
}
