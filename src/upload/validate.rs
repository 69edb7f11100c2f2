//! Pre-upload file validation.
//!
//! Classification is pure and runs on declared metadata only: the media
//! type comes from the filename, not the bytes. That is a deliberate
//! trust boundary; the server re-validates content on its side.

use std::fmt;

/// Raster image formats the backend accepts.
pub const ALLOWED_MEDIA_TYPES: &[&str] =
    &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Maximum accepted file size: 10 MiB.
pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Why a candidate file was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnsupportedType,
    TooLarge,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::UnsupportedType => {
                write!(f, "Please select valid image files (JPEG, PNG, or WebP)")
            }
            RejectReason::TooLarge => write!(f, "File size must be less than 10MB"),
        }
    }
}

/// Classify a candidate by declared media type and byte size.
pub fn validate(media_type: &str, size: u64) -> Result<(), RejectReason> {
    if !ALLOWED_MEDIA_TYPES.contains(&media_type) {
        return Err(RejectReason::UnsupportedType);
    }
    if size > MAX_FILE_BYTES {
        return Err(RejectReason::TooLarge);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_allowed_types() {
        for media_type in ALLOWED_MEDIA_TYPES {
            assert!(validate(media_type, 1024).is_ok(), "{media_type}");
        }
    }

    #[test]
    fn test_rejects_disallowed_types() {
        assert_eq!(
            validate("image/gif", 1024),
            Err(RejectReason::UnsupportedType)
        );
        assert_eq!(
            validate("application/pdf", 1024),
            Err(RejectReason::UnsupportedType)
        );
        assert_eq!(validate("", 1024), Err(RejectReason::UnsupportedType));
    }

    #[test]
    fn test_size_boundary() {
        // Exactly the limit is accepted; one byte over is not.
        assert!(validate("image/png", MAX_FILE_BYTES).is_ok());
        assert_eq!(
            validate("image/png", MAX_FILE_BYTES + 1),
            Err(RejectReason::TooLarge)
        );
    }

    #[test]
    fn test_type_checked_before_size() {
        // An oversized file of a disallowed type reports the type.
        assert_eq!(
            validate("image/gif", MAX_FILE_BYTES + 1),
            Err(RejectReason::UnsupportedType)
        );
    }
}
