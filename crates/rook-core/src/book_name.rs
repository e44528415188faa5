//! Mapping between logical book names and physical file names.

use std::fmt;

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookFormat {
    Org,
}

impl BookFormat {
    pub fn extension(self) -> &'static str {
        match self {
            BookFormat::Org => "org",
        }
    }
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A physical file name split into the book's logical name and its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookName {
    file_name: String,
    name: String,
    format: BookFormat,
}

/// Suffixes recognized as org files, longest first.
const ORG_SUFFIXES: &[&str] = &[".org.txt", ".org"];

/// Emacs lock files look like books but must never be synced.
const LOCK_FILE_PREFIX: &str = ".#";

impl BookName {
    /// Whether `file_name` denotes a supported book format.
    pub fn is_supported_format_file_name(file_name: &str) -> bool {
        Self::from_file_name(file_name).is_some()
    }

    /// Split a physical file name. `None` if the name is not a supported book.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        if file_name.starts_with(LOCK_FILE_PREFIX) {
            return None;
        }

        ORG_SUFFIXES.iter().find_map(|suffix| {
            let name = file_name.strip_suffix(suffix)?;
            if name.is_empty() {
                return None;
            }
            Some(Self {
                file_name: file_name.to_string(),
                name: name.to_string(),
                format: BookFormat::Org,
            })
        })
    }

    /// Compose the physical file name for a logical name in a given format.
    pub fn file_name(name: &str, format: BookFormat) -> String {
        format!("{}.{}", name, format.extension())
    }

    pub fn file_name_str(&self) -> &str {
        &self.file_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> BookFormat {
        self.format
    }
}
