use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Extensions accepted for upload.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Archive metadata folders that never contain real images.
const IGNORED_DIRS: &[&str] = &["__MACOSX"];

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// MIME type from a file name's extension.
pub fn mime_for(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

pub fn is_supported_image(name: &str) -> bool {
    extension(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Recursively collect uploadable images under `root`, sorted by path.
pub fn discover_images(root: &Path) -> io::Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && IGNORED_DIRS.iter().any(|ignored| entry.file_name() == *ignored))
    });

    let mut found = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.file_name().to_str().is_some_and(is_supported_image)
        {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Rendition name for a stored source path: the extension and the leading
/// prefix segment are dropped, so `original/02/00/abc.png` becomes `02/00/abc`.
pub fn rendition_name(source_path: &str) -> String {
    let stem = source_path.split('.').next().unwrap_or(source_path);
    let stem = if stem.is_empty() { source_path } else { stem };
    stem.split('/').skip(1).collect::<Vec<_>>().join("/")
}

/// Object key of one rendition, e.g. `256x/02/00/abc.webp`.
pub fn rendition_key(short_size: u32, name: &str) -> String {
    format!("{short_size}x/{name}.webp")
}
