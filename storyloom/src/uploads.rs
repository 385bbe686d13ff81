//! Per-request upload storage.
//!
//! Every upload is streamed into its own uniquely named temporary file inside `uploads.dir`. The
//! file lives exactly as long as its [`StoredUpload`]; dropping the handle (stage finished, failed,
//! or the interaction was cancelled) removes it from disk.

use axum::{
    extract::{Multipart, multipart::MultipartError},
    http::StatusCode,
};
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::{
    config::UploadsConfig,
    errors::{Error, Result},
};

/// Multipart field that carries the image
pub const FILE_FIELD: &str = "file";

/// An uploaded image on disk. The file is deleted on drop.
#[derive(Debug)]
pub struct StoredUpload {
    path: TempPath,
    file_name: String,
    size: u64,
}

impl StoredUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name the client gave the file
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Check `file_name` against the allowed extensions, case-insensitively. Returns the lowercased
/// extension. Content is never sniffed.
pub fn accepted_extension(file_name: &str, allowed: &[String]) -> Result<String> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if !extension.is_empty() && allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(&extension)) {
        Ok(extension)
    } else {
        Err(Error::UnsupportedMediaType {
            message: format!("{file_name} (accepted: {})", allowed.join(", ")),
        })
    }
}

/// Size-checked writer for one upload.
pub struct UploadSink {
    file: tokio::fs::File,
    path: TempPath,
    file_name: String,
    size: u64,
    max_size: u64,
}

impl UploadSink {
    /// Validate the name and create the backing temporary file.
    pub fn create(file_name: &str, config: &UploadsConfig) -> Result<Self> {
        let extension = accepted_extension(file_name, &config.allowed_extensions)?;
        let dir = config.dir.clone().unwrap_or_else(std::env::temp_dir);

        let suffix = format!(".{extension}");
        let temp = tempfile::Builder::new()
            .prefix("storyloom-")
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| Error::Other(anyhow::Error::new(e).context(format!("create upload file in {}", dir.display()))))?;
        let (file, path) = temp.into_parts();

        debug!(path = %path.display(), "Created upload file");

        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
            file_name: file_name.to_string(),
            size: 0,
            max_size: config.max_file_size,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.size += chunk.len() as u64;

        if self.size > self.max_size {
            warn!(
                file_name = %self.file_name,
                total_size = self.size,
                max_file_size = self.max_size,
                "File size limit exceeded, aborting upload"
            );
            return Err(too_large(self.max_size));
        }

        self.file
            .write_all(chunk)
            .await
            .map_err(|e| Error::Other(anyhow::Error::new(e).context("write upload chunk")))
    }

    pub async fn finish(mut self) -> Result<StoredUpload> {
        if self.size == 0 {
            return Err(Error::BadRequest {
                message: "Uploaded file is empty".to_string(),
            });
        }

        self.file
            .flush()
            .await
            .map_err(|e| Error::Other(anyhow::Error::new(e).context("flush upload file")))?;

        Ok(StoredUpload {
            path: self.path,
            file_name: self.file_name,
            size: self.size,
        })
    }

    #[cfg(test)]
    fn path(&self) -> std::path::PathBuf {
        self.path.to_path_buf()
    }
}

fn too_large(max_file_size: u64) -> Error {
    Error::PayloadTooLarge {
        message: format!(
            "File size exceeds maximum allowed size of {} bytes ({} MB)",
            max_file_size,
            max_file_size / (1024 * 1024)
        ),
    }
}

fn multipart_error(e: MultipartError, max_file_size: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(max_file_size)
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

/// Stream the `file` field of a multipart body to disk. Other fields are ignored.
pub async fn receive_image(multipart: &mut Multipart, config: &UploadsConfig) -> Result<StoredUpload> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, config.max_file_size))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let mut sink = UploadSink::create(&file_name, config)?;

        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, config.max_file_size))? {
            sink.write(&chunk).await?;
        }

        let upload = sink.finish().await?;
        info!(file_name = %upload.file_name(), size = upload.size(), "Received image");
        return Ok(upload);
    }

    Err(Error::BadRequest {
        message: format!("No file uploaded: expected a multipart field named '{FILE_FIELD}'"),
    })
}
