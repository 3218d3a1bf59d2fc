//! Human-traceable, collision-resistant blob names.
//!
//! `<slug>-<YYYY-MM-DDTHH-MM-SS-mmmZ>-<rand6>.<ext>`

use chrono::{DateTime, Utc};
use rand::Rng;
use relay_models::AssetMetadata;
use url::Url;

const SLUG_MAX_LEN: usize = 30;
const SUFFIX_LEN: usize = 6;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const DEFAULT_EXTENSION: &str = "jpg";
const FALLBACK_SLUG: &str = "asset";

/// Lowercase, keep `[a-z0-9 -]`, collapse whitespace runs into `-`, cap at 30 chars.
pub fn slugify(text: &str) -> String {
    let kept: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .collect();

    let joined = kept.split_whitespace().collect::<Vec<_>>().join("-");
    let truncated: String = joined.chars().take(SLUG_MAX_LEN).collect();
    truncated.trim_matches('-').to_string()
}

/// Slug from the prompt, then the model name, then a constant.
fn slug_for(metadata: &AssetMetadata) -> String {
    let from_prompt = slugify(&metadata.prompt);
    if !from_prompt.is_empty() {
        return from_prompt;
    }
    metadata
        .model
        .as_deref()
        .map(slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_SLUG.to_string())
}

/// `2024-05-01T10-00-00-123Z`
pub fn timestamp_component(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

fn clean_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().to_ascii_lowercase();
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

fn extension_of_path(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    clean_extension(ext)
}

/// File extension for a MIME type.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/avif" => Some("avif"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "video/quicktime" => Some("mov"),
        _ => None,
    }
}

/// MIME type for a file extension.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "image/jpeg",
    }
}

/// Extension from the original filename, the content type, the URL path, else `jpg`.
pub fn extension_for(metadata: &AssetMetadata, content_type: Option<&str>, source_url: &str) -> String {
    metadata
        .filename
        .as_deref()
        .and_then(extension_of_path)
        .or_else(|| content_type.and_then(extension_for_content_type).map(str::to_string))
        .or_else(|| {
            Url::parse(source_url)
                .ok()
                .and_then(|url| extension_of_path(url.path()))
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Build a blob name for an asset migrated at `at`.
pub fn blob_name(metadata: &AssetMetadata, content_type: Option<&str>, source_url: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}.{}",
        slug_for(metadata),
        timestamp_component(at),
        random_suffix(),
        extension_for(metadata, content_type, source_url)
    )
}
