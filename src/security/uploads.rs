//! Upload policy: which files may be attached and how big they may be.

use crate::config::UploadsConfig;
use crate::error::{ChatError, ChatResult};
use huddle_proto::MessageType;
use regex::Regex;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    extensions: Regex,
    max_bytes: u64,
}

impl UploadPolicy {
    pub fn from_config(config: &UploadsConfig) -> Result<Self, regex::Error> {
        let extensions = Regex::new(&format!("(?i)^(?:{})$", config.allowed_extensions))?;
        Ok(Self {
            extensions,
            max_bytes: config.max_bytes,
        })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Lower-cased extension of an accepted file name.
    pub fn accepted_extension(&self, file_name: &str) -> ChatResult<String> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if ext.is_empty() || !self.extensions.is_match(&ext) {
            return Err(ChatError::Validation(format!(
                "File type not allowed: {file_name}"
            )));
        }
        Ok(ext)
    }

    /// Validate an upload and classify it.
    pub fn check(&self, file_name: &str, mime: &str, size: u64) -> ChatResult<MessageType> {
        if size == 0 {
            return Err(ChatError::Validation("No file uploaded".to_string()));
        }
        if size > self.max_bytes {
            return Err(ChatError::Validation(format!(
                "File too large (max {} bytes)",
                self.max_bytes
            )));
        }
        self.accepted_extension(file_name)?;
        Ok(MessageType::from_mime(mime))
    }
}
