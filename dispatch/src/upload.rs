//! Upload validation
//!
//! Every rule is exposed on its own so the multipart reader in [`crate::api`]
//! can apply them while the body is still streaming in. [`UploadValidator::validate`]
//! applies the same rules, in the same order, to files that are already in memory.
//!
//! Rules, per file, first violation wins:
//! 1. the declared name is not empty
//! 2. the file fits the per-file limit, and all files so far fit the per-request limit
//! 3. the name has no path components and no executable-style extension
//! 4. the first KiB of content carries no script/markup injection marker
//!
//! Metadata is checked last: when it looks like a JSON object it must parse.

use crate::config::UploadLimits;
use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

/// How much of each file is inspected for injection markers
pub const SNIFF_BYTES: usize = 1024;

const DENYLISTED_EXTENSIONS: &[&str] = &[
    ".exe", ".bat", ".cmd", ".sh", ".php", ".jsp", ".js", ".jar", ".vbs", ".ps1", ".scr", ".pif",
    ".com",
];

const INJECTION_MARKERS: &[&str] = &["<script", "javascript:", "data:text/html", "vbscript:"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("file name must not be empty")]
    EmptyName,

    #[error("file {name} exceeds the maximum size of {limit} bytes")]
    FileTooLarge { name: String, limit: u64 },

    #[error("upload exceeds the maximum total size of {limit} bytes")]
    RequestTooLarge { limit: u64 },

    #[error("file name not allowed: {0}")]
    UnsafeName(String),

    #[error("file {0} contains disallowed content")]
    UnsafeContent(String),

    #[error("metadata is not valid JSON: {0}")]
    MalformedMetadata(String),

    #[error("malformed upload: {message}")]
    MalformedBody { status: StatusCode, message: String },
}

impl ValidationError {
    /// Stable, machine-readable rejection reason
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyName => "empty_name",
            ValidationError::FileTooLarge { .. } | ValidationError::RequestTooLarge { .. } => {
                "size_exceeded"
            }
            ValidationError::UnsafeName(_) => "unsafe_name",
            ValidationError::UnsafeContent(_) => "unsafe_content",
            ValidationError::MalformedMetadata(_) => "malformed_metadata",
            ValidationError::MalformedBody { .. } => "malformed_body",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ValidationError::FileTooLarge { .. } | ValidationError::RequestTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ValidationError::MalformedBody { status, .. } => *status,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// A file received from the client, held only for the duration of the request
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Files and metadata that passed every validation rule
#[derive(Clone, Debug, Default)]
pub struct ValidatedUpload {
    files: Vec<UploadedFile>,
    metadata: Option<String>,
}

impl ValidatedUpload {
    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    /// Metadata text, `None` when absent or empty
    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }
}

/// Tracks bytes read so far for the current file and for the whole request
#[derive(Debug)]
pub struct SizeBudget {
    limits: UploadLimits,
    file_bytes: u64,
    request_bytes: u64,
}

impl SizeBudget {
    /// Resets the per-file counter; the per-request counter keeps running.
    pub fn start_file(&mut self) {
        self.file_bytes = 0;
    }

    /// Accounts for `len` more bytes of the file `name`.
    pub fn charge(&mut self, name: &str, len: u64) -> Result<(), ValidationError> {
        self.file_bytes = self.file_bytes.saturating_add(len);
        self.request_bytes = self.request_bytes.saturating_add(len);

        if self.file_bytes > self.limits.max_file_bytes {
            return Err(ValidationError::FileTooLarge {
                name: name.to_string(),
                limit: self.limits.max_file_bytes,
            });
        }
        if self.request_bytes > self.limits.max_request_bytes {
            return Err(ValidationError::RequestTooLarge {
                limit: self.limits.max_request_bytes,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct UploadValidator {
    limits: UploadLimits,
}

impl UploadValidator {
    pub fn new(limits: UploadLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    pub fn budget(&self) -> SizeBudget {
        SizeBudget {
            limits: self.limits.clone(),
            file_bytes: 0,
            request_bytes: 0,
        }
    }

    /// Validates files already held in memory.
    pub fn validate(
        &self,
        files: Vec<UploadedFile>,
        metadata: Option<String>,
    ) -> Result<ValidatedUpload, ValidationError> {
        let mut budget = self.budget();
        for file in &files {
            check_name_present(&file.name)?;
            budget.start_file();
            budget.charge(&file.name, file.size())?;
            check_received_file(file)?;
        }
        self.accept(files, metadata)
    }

    /// Final step once every file has been checked: validates the metadata and
    /// seals the upload.
    pub fn accept(
        &self,
        files: Vec<UploadedFile>,
        metadata: Option<String>,
    ) -> Result<ValidatedUpload, ValidationError> {
        let metadata = metadata.filter(|m| !m.is_empty());
        if let Some(text) = &metadata {
            check_metadata(text)?;
        }
        Ok(ValidatedUpload { files, metadata })
    }
}

/// Rule 1
pub fn check_name_present(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

/// Rules 3 and 4, applied once the whole file has been received.
pub fn check_received_file(file: &UploadedFile) -> Result<(), ValidationError> {
    check_name_safe(&file.name)?;
    check_content_safe(&file.name, &file.data)
}

/// Rule 3
pub fn check_name_safe(name: &str) -> Result<(), ValidationError> {
    let lower = name.to_ascii_lowercase();
    let traversal = name.contains("..") || name.contains('/') || name.contains('\\');
    let executable = DENYLISTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));

    if traversal || executable {
        return Err(ValidationError::UnsafeName(name.to_string()));
    }
    Ok(())
}

/// Rule 4
pub fn check_content_safe(name: &str, data: &[u8]) -> Result<(), ValidationError> {
    let head = &data[..data.len().min(SNIFF_BYTES)];
    let text = String::from_utf8_lossy(head).to_lowercase();

    if INJECTION_MARKERS.iter().any(|marker| text.contains(marker)) {
        return Err(ValidationError::UnsafeContent(name.to_string()));
    }
    Ok(())
}

/// Metadata shaped like a JSON object must be valid JSON. Anything else is an
/// opaque string and always accepted.
pub fn check_metadata(text: &str) -> Result<(), ValidationError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        serde_json::from_str::<serde_json::Value>(trimmed)
            .map_err(|e| ValidationError::MalformedMetadata(e.to_string()))?;
    }
    Ok(())
}
