//! URL and path manipulation utilities.
//!
//! Host and extension extraction feed the connection throttle and the priority
//! table; the mirror path helpers are used by `MirrorStore`.

use anyhow::Result;
use std::path::{Path, PathBuf};
use url::Url;

/// Host of a URL, lowercased. Unparseable URLs map to an empty host so they
/// still share a throttle bucket instead of failing the caller.
#[must_use]
pub fn extract_host(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}

/// Lowercased extension of the last path segment, without the dot
#[must_use]
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Strip the fragment so `page#a` and `page#b` compare equal
#[must_use]
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split('#').next().unwrap_or(url).to_string(),
    }
}

/// Check if a URL is valid
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    // Skip data URLs, javascript URLs, and other non-http schemes
    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Get the mirror path for a URL, preserving the domain and path structure
///
/// Directory-like paths (empty or ending in `/`) get `index.html`. Every path
/// component is passed through `sanitize_filename`, and a query string is
/// folded into the file name so `a?x=1` and `a?x=2` land in different files.
pub fn get_mirror_path(url: &str, output_dir: &Path) -> Result<PathBuf> {
    let url = Url::parse(url).map_err(|e| anyhow::anyhow!("Failed to parse URL: {e}"))?;
    let domain = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid URL: no host"))?;

    let mut path = output_dir.join(sanitize_filename::sanitize(domain));
    let raw_path = url.path().trim_start_matches('/');
    let mut segments: Vec<&str> = raw_path.split('/').filter(|s| !s.is_empty()).collect();

    let file_name = if raw_path.is_empty() || raw_path.ends_with('/') {
        "index.html".to_string()
    } else {
        segments.pop().unwrap_or("index.html").to_string()
    };

    for segment in segments {
        if segment == ".." || segment == "." {
            continue;
        }
        path.push(sanitize_filename::sanitize(segment));
    }

    let file_name = match url.query() {
        Some(query) => format!("{file_name}_{query}"),
        None => file_name,
    };
    path.push(sanitize_filename::sanitize(file_name));

    Ok(path)
}

/// Ensure a .gitignore file exists in the domain directory
///
/// Creates a .gitignore file with `*` and `!.gitignore` patterns to exclude
/// all crawled content from version control while keeping the directory structure visible.
pub fn ensure_domain_gitignore(mirror_path: &Path, output_dir: &Path) -> Result<()> {
    let relative_path = mirror_path
        .strip_prefix(output_dir)
        .map_err(|e| anyhow::anyhow!("Failed to strip output_dir prefix: {e}"))?;

    let domain = relative_path
        .components()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Path has no domain component"))?;

    let domain_dir = output_dir.join(domain);
    let gitignore_path = domain_dir.join(".gitignore");

    std::fs::create_dir_all(&domain_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create domain directory: {e}"))?;

    if gitignore_path.exists() {
        return Ok(());
    }

    std::fs::write(&gitignore_path, "*\n!.gitignore\n")
        .map_err(|e| anyhow::anyhow!("Failed to write .gitignore: {e}"))?;

    log::debug!("Created .gitignore in {}", domain_dir.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://Example.COM:8080/a"), "example.com");
        assert_eq!(extract_host("not a url"), "");
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://a.com/img/logo.PNG"), Some("png".into()));
        assert_eq!(url_extension("https://a.com/archive.tar.gz?x=1"), Some("gz".into()));
        assert_eq!(url_extension("https://a.com/docs/"), None);
        assert_eq!(url_extension("https://a.com/.hidden"), None);
    }

    #[test]
    fn test_normalize_url_strips_fragment() {
        assert_eq!(normalize_url("https://a.com/p#top"), "https://a.com/p");
    }

    #[test]
    fn test_mirror_path() {
        let out = Path::new("/tmp/out");
        let root = get_mirror_path("https://a.com/", out).expect("root URL maps to a path");
        assert_eq!(root, out.join("a.com").join("index.html"));

        let dir = get_mirror_path("https://a.com/docs/", out).expect("dir URL maps to a path");
        assert_eq!(dir, out.join("a.com").join("docs").join("index.html"));

        let file = get_mirror_path("https://a.com/img/x.png", out).expect("file URL maps to a path");
        assert_eq!(file, out.join("a.com").join("img").join("x.png"));
    }
}
