//! Storage namespaces
//!
//! Files are grouped under a prefix chosen by extension.

use std::path::Path;

/// Top-level storage prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Documents,
    Images,
    Media,
    Others,
}

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "md", "xls", "xlsx", "ppt", "pptx", "csv", "rtf", "odt", "ods",
    "odp",
];

pub(crate) const IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "ico"];

const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v", "mp3", "wav", "flac", "aac", "ogg",
    "m4a", "wma",
];

const ALL: [Namespace; 4] = [
    Namespace::Documents,
    Namespace::Images,
    Namespace::Media,
    Namespace::Others,
];

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Images => "images",
            Self::Media => "media",
            Self::Others => "others",
        }
    }

    pub fn prefix(&self) -> String {
        format!("{}/", self.as_str())
    }
}

/// Lowercased extension without the dot
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

pub fn namespace_for(filename: &str) -> Namespace {
    let Some(ext) = file_extension(filename) else {
        return Namespace::Others;
    };

    if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        Namespace::Documents
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Namespace::Images
    } else if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
        Namespace::Media
    } else {
        Namespace::Others
    }
}

/// Strip a leading namespace prefix, if any
pub fn strip_namespace(path: &str) -> &str {
    for namespace in ALL {
        if let Some(rest) = path.strip_prefix(&namespace.prefix()) {
            return rest;
        }
    }
    path
}

/// Namespaced storage path for a filename
pub fn build_storage_path(filename: &str) -> String {
    let bare = strip_namespace(filename);
    format!("{}{}", namespace_for(bare).prefix(), bare)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_by_extension() {
        assert_eq!(namespace_for("report.PDF"), Namespace::Documents);
        assert_eq!(namespace_for("photo.jpeg"), Namespace::Images);
        assert_eq!(namespace_for("clip.mkv"), Namespace::Media);
        assert_eq!(namespace_for("archive.zip"), Namespace::Others);
        assert_eq!(namespace_for("README"), Namespace::Others);
    }

    #[test]
    fn test_build_storage_path() {
        assert_eq!(build_storage_path("scan.pdf"), "documents/scan.pdf");
        assert_eq!(build_storage_path("images/photo.png"), "images/photo.png");
        // A wrong prefix is replaced
        assert_eq!(build_storage_path("others/photo.png"), "images/photo.png");
    }
}
