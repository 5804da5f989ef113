//! Rewrites saved markup so resource references point at the local copies, and
//! neutralizes known third-party injection snippets.
//!
//! Every reference emitted here resolves, relative to the output root, to the
//! path the downloader used for it. Cross-origin references are left absolute
//! and keep loading from the network when that is available.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use crate::local_path::{encode_reference, PathMapper};
use crate::resolver::{authority, classify, resolve, Category};

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("hardcoded regex pattern is valid"));
    };
}

pattern!(ATTR_DOUBLE, r#"(?i)\b(href|src|data-src)(\s*=\s*")([^"]*)""#);
pattern!(ATTR_SINGLE, r#"(?i)\b(href|src|data-src)(\s*=\s*')([^']*)'"#);
pattern!(SITE_PREFIX, r#"(?i)(?:https?:)?//([^/\s"'<>()]+)/"#);
pattern!(CSS_URL_REF, r#"(?i)(url\(\s*["']?)([^"')\s]+)(["']?\s*\))"#);
pattern!(CSS_IMPORT_REF, r#"(?i)(@import\s+["'])([^"']+)(["'])"#);
pattern!(
    META_CHARSET,
    r#"(?i)(<meta\b[^>]*?\bcharset\s*=\s*["']?)([-\w:.]+)"#
);
pattern!(
    TAG_MANAGER_BLOCK,
    r#"(?s)<!-- Google Tag Manager -->.*?<!-- End Google Tag Manager -->"#
);
pattern!(
    FONT_AWESOME_KIT,
    r#"<script src="https://kit\.fontawesome\.com/[^"]+"></script>"#
);

pub const ANALYTICS_DISABLED: &str = "<!-- Analytics disabled for offline use -->";
pub const FONT_AWESOME_DISABLED: &str = "<!-- Font Awesome Kit disabled for offline use -->";

#[derive(Debug, Clone)]
pub struct Rewriter {
    page_url: Url,
    mapper: PathMapper,
}

impl Rewriter {
    /// `page_url` is the URL the page was finally served from.
    pub fn new(page_url: &Url) -> Self {
        Self {
            page_url: page_url.clone(),
            mapper: PathMapper::new(page_url),
        }
    }

    /// Points same-site references in `html` at the local copies.
    ///
    /// Every `href`, `src` and `data-src` value and every inline `url()` is
    /// resolved against the page, whatever form it was written in. Resources
    /// become `./<local path>`, built by the same mapper the downloader saves
    /// with. Other same-site links become `./<path>` from the output root.
    /// Same-site URL prefixes left anywhere else in the text, inline scripts
    /// included, are turned into `./` last.
    pub fn convert_paths(&self, html: &str) -> String {
        let html = ATTR_DOUBLE.replace_all(html, |caps: &Captures| self.rewrite_attr(caps, '"'));
        let html = ATTR_SINGLE.replace_all(&html, |caps: &Captures| self.rewrite_attr(caps, '\''));
        let html = CSS_URL_REF.replace_all(&html, |caps: &Captures| {
            match self.local_reference(&caps[2], true) {
                Some(reference) => format!("{}{reference}{}", &caps[1], &caps[3]),
                None => caps[0].to_string(),
            }
        });
        let html = SITE_PREFIX.replace_all(&html, |caps: &Captures| {
            if caps[1].eq_ignore_ascii_case(self.mapper.site()) {
                "./".to_string()
            } else {
                caps[0].to_string()
            }
        });
        html.into_owned()
    }

    /// Points the references inside a downloaded stylesheet at the local copies.
    ///
    /// References that resolve to the page's site, or to the stylesheet's own
    /// host, become paths relative to the stylesheet's saved location. `data:`
    /// URIs and references to third hosts are left as they are.
    pub fn rewrite_stylesheet(&self, css: &str, stylesheet_url: &Url) -> String {
        let css = CSS_URL_REF.replace_all(css, |caps: &Captures| {
            self.rewrite_css_reference(caps, stylesheet_url)
        });
        let css = CSS_IMPORT_REF.replace_all(&css, |caps: &Captures| {
            self.rewrite_css_reference(caps, stylesheet_url)
        });
        css.into_owned()
    }

    fn rewrite_attr(&self, caps: &Captures, quote: char) -> String {
        let (attr, assign, value) = (&caps[1], &caps[2], &caps[3]);
        // `src`/`data-src` always load a resource; `href` only does for known file types.
        let is_resource = !attr.eq_ignore_ascii_case("href");
        match self.local_reference(value, is_resource) {
            Some(reference) => format!("{attr}{assign}{reference}{quote}"),
            None => caps[0].to_string(),
        }
    }

    /// `./`-relative replacement for a same-site reference, or `None` when the
    /// reference stays as written (cross-origin, `data:`, fragment-only, ...).
    fn local_reference(&self, value: &str, is_resource: bool) -> Option<String> {
        let url = resolve(value, &self.page_url)?;
        if !self.mapper.is_same_origin(&url) {
            return None;
        }
        let fragment = value.find('#').map_or("", |idx| &value[idx..]);

        if is_resource || classify(&url) != Category::Other {
            let local_path = self.mapper.local_path(&url);
            return Some(format!("./{}{fragment}", encode_reference(local_path.as_str())));
        }

        let mut link = format!("./{}", url.path().trim_start_matches('/'));
        if let Some(query) = url.query() {
            link.push('?');
            link.push_str(&query.replace('&', "&amp;"));
        }
        link.push_str(fragment);
        Some(link)
    }

    fn rewrite_css_reference(&self, caps: &Captures, stylesheet_url: &Url) -> String {
        let original = &caps[0];
        let Some(target) = resolve(&caps[2], stylesheet_url) else {
            return original.to_string();
        };
        if !self.mapper.is_same_origin(&target) && authority(&target) != authority(stylesheet_url)
        {
            return original.to_string();
        }

        let target_path = self.mapper.local_path(&target);
        let stylesheet_path = self.mapper.local_path(stylesheet_url);
        match pathdiff::diff_paths(target_path.as_str(), stylesheet_path.parent()) {
            Some(relative) => format!("{}{}{}", &caps[1], to_reference(&relative), &caps[3]),
            None => original.to_string(),
        }
    }
}

/// Replaces the analytics tag-manager block and the Font Awesome kit loader
/// with inert comments. Only these exact textual shapes are recognized.
pub fn staticize(html: &str) -> String {
    let html = TAG_MANAGER_BLOCK.replace_all(html, ANALYTICS_DISABLED);
    let html = FONT_AWESOME_KIT.replace_all(&html, FONT_AWESOME_DISABLED);
    html.into_owned()
}

/// Charset named by the first `<meta charset>` or `<meta http-equiv>` declaration.
pub fn declared_charset(html: &str) -> Option<&str> {
    META_CHARSET
        .captures(html)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

/// Rewrites `<meta>` charset declarations to `utf-8`, for markup that was
/// decoded from another encoding and is saved as UTF-8.
pub fn declare_utf8(html: &str) -> String {
    META_CHARSET.replace_all(html, "${1}utf-8").into_owned()
}

fn to_reference(path: &Path) -> String {
    let joined = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    encode_reference(&joined)
}
