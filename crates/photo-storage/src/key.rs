//! Storage keys.
//!
//! A key is `{organization_id}/{owner_member_id}/{unix_millis}_{file_name}`.
//! Public URLs end with the key, so the key of a stored photo can be
//! recovered from its `image_url`.

use chrono::{DateTime, Utc};
use url::Url;

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the object key for an upload made at `now`.
pub fn storage_key(
    organization_id: &str,
    owner_member_id: &str,
    file_name: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}/{}_{}",
        organization_id,
        owner_member_id,
        now.timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

/// Recover the object key from a public URL: its last three path segments,
/// percent-decoded.
///
/// Returns `None` if the URL does not parse or has fewer than three segments.
pub fn key_from_url(image_url: &str) -> Option<String> {
    let url = Url::parse(image_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    if segments.len() < 3 {
        return None;
    }

    let decoded = segments[segments.len() - 3..]
        .iter()
        .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    Some(decoded.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("head shot (1).JPG"), "head_shot__1_.JPG");
        assert_eq!(sanitize_file_name("ok-name.v2.png"), "ok-name.v2.png");
        assert_eq!(sanitize_file_name("ünï/cødé.jpg"), "_n__c_d_.jpg");
    }

    #[test]
    fn test_storage_key_layout() {
        let now = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(
            storage_key("org1", "u1", "me at work.jpg", now),
            "org1/u1/1700000000123_me_at_work.jpg"
        );
    }

    #[test]
    fn test_key_from_public_url() {
        assert_eq!(
            key_from_url(
                "https://x.supabase.co/storage/v1/object/public/photos/org1/u1/1700000000123_me.jpg"
            ),
            Some("org1/u1/1700000000123_me.jpg".to_string())
        );
    }

    #[test]
    fn test_key_from_url_decodes_segments() {
        assert_eq!(
            key_from_url("https://cdn.test/b/org%201/u1/a%2Bb.jpg"),
            Some("org 1/u1/a+b.jpg".to_string())
        );
    }

    #[test]
    fn test_key_from_url_needs_three_segments() {
        assert_eq!(key_from_url("https://cdn.test/u1/a.jpg"), None);
        assert_eq!(key_from_url("not a url"), None);
    }
}
