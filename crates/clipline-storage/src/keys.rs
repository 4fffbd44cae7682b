//! Deterministic object keys and locators.

use clipline_models::{ClipId, FileCategory, ProjectId, SessionId, SourceLocator};

use crate::error::{StorageError, StorageResult};

/// Prefix under which all client uploads live.
pub const UPLOADS_PREFIX: &str = "uploads/";

/// Prefix under which rendered clips live.
pub const CLIPS_PREFIX: &str = "clips/";

/// Reject path segments that could escape their prefix.
fn check_segment(name: &str, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::invalid_key(format!("{} is empty", name)));
    }
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(StorageError::invalid_key(format!(
            "{} contains a path separator: {}",
            name, value
        )));
    }
    Ok(())
}

/// `uploads/{owner}/{category}s/{id}{ext}` for single-shot uploads.
pub fn upload_key(owner_id: &str, category: FileCategory, id: &str, ext: &str) -> StorageResult<String> {
    check_segment("owner_id", owner_id)?;
    check_segment("id", id)?;
    Ok(format!(
        "{}{}/{}s/{}{}",
        UPLOADS_PREFIX,
        owner_id,
        category.as_str(),
        id,
        ext
    ))
}

/// `uploads/{owner}/{category}s/multipart/{session_id}{ext}` for chunked uploads.
pub fn multipart_key(
    owner_id: &str,
    category: FileCategory,
    session_id: &SessionId,
    ext: &str,
) -> StorageResult<String> {
    check_segment("owner_id", owner_id)?;
    check_segment("session_id", session_id.as_str())?;
    Ok(format!(
        "{}{}/{}s/multipart/{}{}",
        UPLOADS_PREFIX,
        owner_id,
        category.as_str(),
        session_id,
        ext
    ))
}

/// `clips/{project_id}/{clip_id}.{ext}` for rendered clips.
pub fn clip_key(project_id: &ProjectId, clip_id: &ClipId, ext: &str) -> StorageResult<String> {
    check_segment("project_id", project_id.as_str())?;
    check_segment("clip_id", clip_id.as_str())?;
    Ok(format!("{}{}/{}.{}", CLIPS_PREFIX, project_id, clip_id, ext))
}

/// Session id embedded in a multipart key, if the key has that shape.
pub fn session_id_from_multipart_key(key: &str) -> Option<SessionId> {
    let rest = key.strip_prefix(UPLOADS_PREFIX)?;
    let (dir, file) = rest.rsplit_once('/')?;
    if !dir.ends_with("/multipart") {
        return None;
    }
    let id = file.split_once('.').map(|(id, _)| id).unwrap_or(file);
    (!id.is_empty()).then(|| SessionId::from_string(id))
}

/// Stable locator string for an object.
pub fn locator_for(bucket: &str, key: &str) -> String {
    SourceLocator::stored(bucket, key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_keys() {
        assert_eq!(
            upload_key("user-1", FileCategory::Video, "abc", ".mp4").unwrap(),
            "uploads/user-1/videos/abc.mp4"
        );
        let session = SessionId::from_string("s-1");
        assert_eq!(
            multipart_key("user-1", FileCategory::Audio, &session, "").unwrap(),
            "uploads/user-1/audios/multipart/s-1"
        );
        assert!(upload_key("../etc", FileCategory::Video, "abc", ".mp4").is_err());
        assert!(upload_key("", FileCategory::Video, "abc", ".mp4").is_err());
    }

    #[test]
    fn test_clip_key_and_locator() {
        let key = clip_key(&ProjectId::from("p1"), &ClipId::from("c1"), "webm").unwrap();
        assert_eq!(key, "clips/p1/c1.webm");
        assert_eq!(locator_for("media", &key), "s3://media/clips/p1/c1.webm");
    }

    #[test]
    fn test_upload_locator_resolves_to_same_key() {
        for owner in ["John Doe", "a?b", "x#y", "zoë"] {
            let key = upload_key(owner, FileCategory::Video, "id1", ".mp4").unwrap();
            let parsed = SourceLocator::parse(&locator_for("media", &key)).unwrap();
            assert_eq!(parsed, SourceLocator::stored("media", key));
        }
    }

    #[test]
    fn test_session_id_from_multipart_key() {
        let session = SessionId::from_string("7d1c0f4e-1111-2222-3333-444455556666");
        let key = multipart_key("u", FileCategory::Video, &session, ".mov").unwrap();
        assert_eq!(session_id_from_multipart_key(&key), Some(session));
        assert_eq!(session_id_from_multipart_key("uploads/u/videos/abc.mp4"), None);
        assert_eq!(session_id_from_multipart_key("clips/p/c.mp4"), None);
    }
}
