use rocket::serde::json::Json;
use rocket::fs::TempFile;
use rocket_okapi::openapi;
use std::path::Path;
use tokio::fs;
use uuid::Uuid;
use log::{error, info};
use crate::guards::AuthGuard;
use crate::utils::{ApiResponse, ApiError};

const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
enum UploadKind {
    Image,
    Document,
}

impl UploadKind {
    fn dir(&self) -> &'static str {
        match self {
            UploadKind::Image => "uploads/images",
            UploadKind::Document => "uploads/documents",
        }
    }

    fn allows(&self, ext: &str) -> bool {
        match self {
            UploadKind::Image => matches!(ext, "jpg" | "jpeg" | "png" | "webp"),
            UploadKind::Document => matches!(ext, "jpg" | "jpeg" | "png" | "webp" | "pdf"),
        }
    }

    fn allowed_label(&self) -> &'static str {
        match self {
            UploadKind::Image => "JPEG, PNG and WebP",
            UploadKind::Document => "PDF, JPEG, PNG and WebP",
        }
    }
}

fn extension_from_filename(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn extension_from_content_type(content_type: &str) -> Option<String> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg".to_string()),
        "image/png" => Some("png".to_string()),
        "image/webp" => Some("webp".to_string()),
        "application/pdf" => Some("pdf".to_string()),
        _ => None,
    }
}

/// Rocket strips the extension from `TempFile::name`, so the content type is
/// the usual source; the raw filename is a fallback.
fn detect_extension(file: &TempFile<'_>) -> Option<String> {
    file.content_type()
        .and_then(|ct| extension_from_content_type(&format!("{}/{}", ct.top(), ct.sub()).to_lowercase()))
        .or_else(|| {
            file.raw_name()
                .map(|raw| raw.dangerous_unsafe_unsanitized_raw().as_str().to_string())
                .and_then(|raw| extension_from_filename(&raw))
        })
}

async fn store(mut file: TempFile<'_>, kind: UploadKind) -> Result<serde_json::Value, ApiError> {
    let size = file.len();
    if size == 0 {
        return Err(ApiError::bad_request("Empty file"));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ApiError::bad_request("File size exceeds 5MB limit"));
    }

    let extension = detect_extension(&file)
        .ok_or_else(|| ApiError::bad_request("Cannot determine file type"))?;
    if !kind.allows(&extension) {
        return Err(ApiError::bad_request(format!(
            "Only {} files are allowed. Received: '{}'",
            kind.allowed_label(),
            extension
        )));
    }

    fs::create_dir_all(kind.dir()).await.map_err(|e| {
        error!("Failed to create {}: {}", kind.dir(), e);
        ApiError::internal_error("Failed to store file")
    })?;

    let filename = format!("{}.{}", Uuid::new_v4(), extension);
    let filepath = format!("{}/{}", kind.dir(), filename);

    // The temp dir may sit on another device.
    file.move_copy_to(&filepath).await.map_err(|e| {
        error!("Failed to save upload to {}: {}", filepath, e);
        ApiError::internal_error("Failed to store file")
    })?;

    info!("Stored {:?} upload {} ({} bytes)", kind, filepath, size);

    Ok(serde_json::json!({
        "url": format!("/{}", filepath),
        "filename": filename,
        "size": size,
    }))
}

#[openapi(tag = "File Upload")]
#[post("/upload/image", data = "<file>")]
pub async fn upload_image(
    file: TempFile<'_>,
    _auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let stored = store(file, UploadKind::Image).await?;
    Ok(Json(ApiResponse::success_with_message("Image uploaded successfully", stored)))
}

#[openapi(tag = "File Upload")]
#[post("/upload/document", data = "<file>")]
pub async fn upload_document(
    file: TempFile<'_>,
    _auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let stored = store(file, UploadKind::Document).await?;
    Ok(Json(ApiResponse::success_with_message("Document uploaded successfully", stored)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_uploads_reject_pdf() {
        assert!(UploadKind::Image.allows("webp"));
        assert!(!UploadKind::Image.allows("pdf"));
        assert!(UploadKind::Document.allows("pdf"));
        assert!(!UploadKind::Document.allows("exe"));
    }

    #[test]
    fn extensions() {
        assert_eq!(extension_from_filename("Front.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_from_filename("noext"), None);
        assert_eq!(extension_from_content_type("application/pdf").as_deref(), Some("pdf"));
        assert_eq!(extension_from_content_type("text/plain"), None);
    }
}
