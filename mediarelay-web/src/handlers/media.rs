//! Content-Type and download name for served files

use mediarelay_core::FileDescriptor;

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Presentation headers derived from a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHeaders {
    pub mime_type: String,
    pub file_name: String,
}

impl MediaHeaders {
    /// Picks the MIME type and file name to advertise.
    ///
    /// The MIME type comes from the descriptor, else is guessed from the file
    /// name. Unnamed files get a random four-hex-digit name with the MIME
    /// subtype as extension.
    pub fn for_descriptor(descriptor: &FileDescriptor) -> Self {
        let named = descriptor.file_name.as_deref().filter(|name| !name.is_empty());
        let provisional = match named {
            Some(name) => name.to_string(),
            None => format!("{}.unknown", random_stem()),
        };

        let mime_type = descriptor
            .mime_type
            .clone()
            .filter(|mime| !mime.is_empty())
            .or_else(|| {
                mime_guess::from_path(&provisional)
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            })
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());

        let file_name = match (named, mime_type.split_once('/')) {
            (None, Some((_, subtype))) => format!("{}.{}", random_stem(), subtype),
            _ => provisional,
        };

        Self {
            mime_type,
            file_name: file_name.replace('"', "'"),
        }
    }

    pub fn content_disposition(&self) -> String {
        format!("inline; filename=\"{}\"", self.file_name)
    }
}

fn random_stem() -> String {
    hex::encode(rand::random::<[u8; 2]>())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mediarelay_core::{DataCenterId, FileKind};

    use super::*;

    fn descriptor(file_name: Option<&str>, mime_type: Option<&str>) -> FileDescriptor {
        FileDescriptor {
            dc_id: DataCenterId(1),
            media_id: 1,
            access_hash: 2,
            file_reference: Bytes::new(),
            kind: FileKind::Document,
            thumbnail_size: None,
            file_size: 10,
            unique_id: "AgAD1".to_string(),
            file_name: file_name.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
        }
    }

    #[test]
    fn test_descriptor_mime_type_wins() {
        let headers = MediaHeaders::for_descriptor(&descriptor(Some("a.mkv"), Some("video/mp4")));
        assert_eq!(headers.mime_type, "video/mp4");
        assert_eq!(headers.file_name, "a.mkv");
        assert_eq!(headers.content_disposition(), "inline; filename=\"a.mkv\"");
    }

    #[test]
    fn test_mime_type_guessed_from_name() {
        let headers = MediaHeaders::for_descriptor(&descriptor(Some("clip.webm"), None));
        assert_eq!(headers.mime_type, "video/webm");
    }

    #[test]
    fn test_unnamed_file_gets_random_name_with_subtype() {
        let headers = MediaHeaders::for_descriptor(&descriptor(None, Some("video/x-matroska")));
        let (stem, extension) = headers.file_name.split_once('.').unwrap();
        assert_eq!(stem.len(), 4);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(extension, "x-matroska");
    }

    #[test]
    fn test_unknown_type_falls_back_to_octet_stream() {
        let headers = MediaHeaders::for_descriptor(&descriptor(None, None));
        assert_eq!(headers.mime_type, "application/octet-stream");
        assert!(headers.file_name.ends_with(".octet-stream"));
    }
}
