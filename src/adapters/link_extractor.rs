//! HTML and CSS link extraction with `scraper`
//!
//! Pages yield anchors, frames, images, scripts, applets and stylesheets.
//! Stylesheets (and inline `<style>` blocks) yield `url(...)` references and
//! `@import` targets. Links are returned raw; resolution is the rules
//! checker's job.

use anyhow::Result;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

use crate::crawl_engine::collaborators::{ExtractedLinks, LinkExtractor};
use crate::crawl_engine::url_store::{ResourceKind, UrlRecord};

// Hardcoded selectors should never fail to parse
static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href], area[href]")
        .expect("BUG: hardcoded CSS selector 'a[href], area[href]' is invalid")
});

static FRAME_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("frame[src], iframe[src]")
        .expect("BUG: hardcoded CSS selector 'frame[src], iframe[src]' is invalid")
});

static IMAGE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("img[src], input[type='image'][src], link[rel~='icon'][href]")
        .expect("BUG: hardcoded image selector is invalid")
});

static SCRIPT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script[src]").expect("BUG: hardcoded CSS selector 'script[src]' is invalid")
});

static APPLET_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("applet[code], applet[archive], object[data], embed[src]")
        .expect("BUG: hardcoded applet selector is invalid")
});

static STYLESHEET_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("link[rel~='stylesheet'][href]")
        .expect("BUG: hardcoded stylesheet selector is invalid")
});

static STYLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("style").expect("BUG: hardcoded CSS selector 'style' is invalid")
});

static BASE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("base[href]").expect("BUG: hardcoded CSS selector 'base[href]' is invalid")
});

static ROBOTS_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("meta[name][content]")
        .expect("BUG: hardcoded CSS selector 'meta[name][content]' is invalid")
});

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("BUG: hardcoded url() regex is invalid")
});

static CSS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+['"]([^'"]+)['"]"#).expect("BUG: hardcoded @import regex is invalid")
});

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp", "avif", "tif", "tiff",
];
const PAGE_EXTENSIONS: &[&str] = &[
    "html", "htm", "xhtml", "shtml", "php", "asp", "aspx", "jsp", "cgi", "pl",
];

/// Lowercase extension of the last path segment of a raw, possibly relative
/// link
fn raw_extension(raw: &str) -> String {
    let path = raw.split(['?', '#']).next().unwrap_or(raw);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Kind of an anchor target, judged by its extension
fn anchor_kind(raw: &str) -> ResourceKind {
    match raw_extension(raw).as_str() {
        "" => ResourceKind::Page,
        "css" => ResourceKind::Stylesheet,
        "js" | "mjs" => ResourceKind::Script,
        "class" | "jar" | "swf" => ResourceKind::Applet,
        e if PAGE_EXTENSIONS.contains(&e) => ResourceKind::Page,
        e if IMAGE_EXTENSIONS.contains(&e) => ResourceKind::Image,
        _ => ResourceKind::Other,
    }
}

/// Kind of a `url(...)` target inside CSS
fn css_reference_kind(raw: &str) -> ResourceKind {
    match raw_extension(raw).as_str() {
        "css" => ResourceKind::Stylesheet,
        e if IMAGE_EXTENSIONS.contains(&e) => ResourceKind::Image,
        _ => ResourceKind::Other,
    }
}

fn usable(raw: &str) -> bool {
    let raw = raw.trim();
    !raw.is_empty()
        && !raw.starts_with('#')
        && !raw.starts_with("data:")
        && !raw.starts_with("javascript:")
        && !raw.starts_with("mailto:")
}

fn css_links(css: &str, out: &mut Vec<(ResourceKind, String)>) {
    for cap in CSS_IMPORT_RE.captures_iter(css) {
        if let Some(m) = cap.get(1).filter(|m| usable(m.as_str())) {
            out.push((ResourceKind::Stylesheet, m.as_str().to_string()));
        }
    }
    for cap in CSS_URL_RE.captures_iter(css) {
        if let Some(m) = cap.get(1).filter(|m| usable(m.as_str())) {
            out.push((css_reference_kind(m.as_str()), m.as_str().to_string()));
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlLinkExtractor;

impl HtmlLinkExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn extract_html(html: &str) -> ExtractedLinks {
        let document = Html::parse_document(html);
        let mut links = Vec::new();

        let mut collect = |selector: &Selector, attrs: &[&str], kind: Option<ResourceKind>| {
            for element in document.select(selector) {
                for attr in attrs {
                    if let Some(value) = element.value().attr(attr).filter(|v| usable(v)) {
                        let kind = kind.unwrap_or_else(|| anchor_kind(value));
                        links.push((kind, value.trim().to_string()));
                    }
                }
            }
        };

        collect(&ANCHOR_SELECTOR, &["href"], None);
        collect(&FRAME_SELECTOR, &["src"], Some(ResourceKind::Page));
        collect(&STYLESHEET_SELECTOR, &["href"], Some(ResourceKind::Stylesheet));
        collect(&IMAGE_SELECTOR, &["src", "href"], Some(ResourceKind::Image));
        collect(&SCRIPT_SELECTOR, &["src"], Some(ResourceKind::Script));
        collect(&APPLET_SELECTOR, &["code", "archive", "data", "src"], Some(ResourceKind::Applet));

        for style in document.select(&STYLE_SELECTOR) {
            css_links(&style.text().collect::<String>(), &mut links);
        }

        let base = document
            .select(&BASE_SELECTOR)
            .next()
            .and_then(|e| e.value().attr("href"))
            .map(|href| href.trim().to_string())
            .filter(|href| !href.is_empty());

        let nofollow = document.select(&ROBOTS_SELECTOR).any(|meta| {
            let el = meta.value();
            el.attr("name").is_some_and(|n| n.eq_ignore_ascii_case("robots"))
                && el
                    .attr("content")
                    .is_some_and(|c| c.to_ascii_lowercase().contains("nofollow"))
        });

        ExtractedLinks {
            base,
            links,
            nofollow,
        }
    }
}

impl LinkExtractor for HtmlLinkExtractor {
    fn extract(&self, record: &UrlRecord, body: &[u8]) -> Result<ExtractedLinks> {
        let text = String::from_utf8_lossy(body);
        if record.kind == ResourceKind::Stylesheet {
            let mut links = Vec::new();
            css_links(&text, &mut links);
            return Ok(ExtractedLinks {
                links,
                ..ExtractedLinks::default()
            });
        }
        Ok(Self::extract_html(&text))
    }
}
