pub mod constants;
pub mod url_utils;

pub use constants::*;
pub use url_utils::{
    ensure_domain_gitignore, extract_host, get_mirror_path, is_valid_url, normalize_url,
    url_extension,
};
