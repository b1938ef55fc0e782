//! Headshot photo commands.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result};
use photo_storage::PhotoUpload;
use std::path::Path;

/// MIME type for common image extensions.
fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "avif" => "image/avif",
        _ => return None,
    };
    Some(mime)
}

/// List photos for a member, the signed-in one by default.
pub async fn photos_list(ctx: &Context, member: Option<&str>, format: &OutputFormat) -> Result<()> {
    let member_id = match member {
        Some(id) => id.to_string(),
        None => ctx.require_member().await?.id,
    };

    let photos = ctx.photo_service().list_for_owner(&member_id).await?;

    match format {
        OutputFormat::Text => {
            if photos.is_empty() {
                println!("No photos");
                return Ok(());
            }
            output::print_heading(&format!("Photos ({})", photos.len()));
            for photo in &photos {
                println!(
                    "  {}  {}  {}",
                    photo.id,
                    photo.created_at.format("%Y-%m-%d %H:%M"),
                    photo.image_url
                );
            }
        }
        OutputFormat::Json => output::print_json(&serde_json::json!({ "photos": photos })),
    }
    Ok(())
}

/// Upload a photo for the signed-in member.
pub async fn photos_upload(
    ctx: &Context,
    file: &Path,
    mime: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let profile = ctx.require_member().await?;

    let mime_type = match mime.or_else(|| guess_mime(file)) {
        Some(mime) => mime.to_string(),
        None => anyhow::bail!(
            "Cannot tell the image type of {}; pass --mime",
            file.display()
        ),
    };
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());

    let upload = PhotoUpload {
        size_bytes: bytes.len(),
        bytes,
        mime_type,
        file_name,
        owner_member_id: profile.id,
        organization_id: profile.organization_id,
    };

    match ctx.photo_service().upload(upload).await {
        Ok(photo) => match format {
            OutputFormat::Text => {
                println!("Photo uploaded");
                output::print_row("ID", &photo.id);
                output::print_row("URL", &photo.image_url);
            }
            OutputFormat::Json => output::print_json(&serde_json::json!({
                "id": photo.id,
                "image_url": photo.image_url,
            })),
        },
        Err(e) => output::print_error(&format!("Upload failed: {}", e), format),
    }
    Ok(())
}

/// Delete a photo by id.
pub async fn photos_delete(ctx: &Context, id: &str, format: &OutputFormat) -> Result<()> {
    match ctx.photo_service().delete(id).await {
        Ok(()) => output::print_success("Photo deleted", format),
        Err(e) => output::print_error(&format!("Delete failed: {}", e), format),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime_from_extension() {
        assert_eq!(guess_mime(Path::new("me.JPG")), Some("image/jpeg"));
        assert_eq!(guess_mime(Path::new("dir/me.webp")), Some("image/webp"));
        assert_eq!(guess_mime(Path::new("notes.txt")), None);
        assert_eq!(guess_mime(Path::new("noext")), None);
    }
}
