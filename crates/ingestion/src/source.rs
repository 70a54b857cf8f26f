use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The wire format of a raw dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// Guesses the format from a path or URL suffix; anything not `.json` is read as CSV.
    pub fn from_location(location: &str) -> Self {
        let trimmed = location.split(['?', '#']).next().unwrap_or(location);
        if trimmed.to_ascii_lowercase().ends_with(".json") {
            SourceFormat::Json
        } else {
            SourceFormat::Csv
        }
    }
}

/// Where a raw dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceDescriptor {
    File {
        path: PathBuf,
        format: SourceFormat,
    },
    Http {
        url: String,
        format: SourceFormat,
        #[serde(skip_serializing)]
        auth_token: Option<String>,
    },
}

impl SourceDescriptor {
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = SourceFormat::from_location(&path.to_string_lossy());
        SourceDescriptor::File { path, format }
    }

    pub fn http(url: &str, auth_token: Option<String>) -> Self {
        SourceDescriptor::Http {
            url: url.to_string(),
            format: SourceFormat::from_location(url),
            auth_token,
        }
    }

    /// Interprets a CLI argument: `http(s)://` locations are remote, everything else is a path.
    pub fn parse(location: &str, auth_token: Option<String>) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::http(location, auth_token)
        } else {
            Self::file(location)
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            SourceDescriptor::File { format, .. } | SourceDescriptor::Http { format, .. } => *format,
        }
    }

    /// Stable identity of the source; keys the circuit breaker and the artifact id.
    pub fn name(&self) -> String {
        match self {
            SourceDescriptor::File { path, .. } => path.display().to_string(),
            SourceDescriptor::Http { url, .. } => url.clone(),
        }
    }

    /// The URI recorded on the raw artifact.
    pub fn storage_uri(&self) -> String {
        match self {
            SourceDescriptor::File { path, .. } => {
                let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                format!("file://{}", absolute.display())
            }
            SourceDescriptor::Http { url, .. } => url.clone(),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
