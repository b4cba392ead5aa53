//! Remote file descriptors and their backend locations.

pub mod cache;

use bytes::Bytes;

pub use cache::{CacheStatistics, FileDescriptorCache};

use crate::transport::DataCenterId;

/// Offset between bot-API channel ids (`-100…`) and raw channel ids.
const CHANNEL_ID_BASE: i64 = -1_000_000_000_000;

/// What kind of media object a descriptor points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    Document,
    ChatPhoto(ChatPhotoSource),
}

/// Identifies a chat's profile photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPhotoSource {
    /// Bot-API style chat id: positive for users, negative for groups and channels.
    pub chat_id: i64,
    /// Zero for basic groups.
    pub chat_access_hash: i64,
    pub volume_id: i64,
    pub local_id: i32,
    /// Selects the large photo variant.
    pub big: bool,
}

/// Immutable identifier of a remote file, resolved once from message metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub dc_id: DataCenterId,
    pub media_id: i64,
    pub access_hash: i64,
    pub file_reference: Bytes,
    pub kind: FileKind,
    pub thumbnail_size: Option<String>,
    pub file_size: u64,
    pub unique_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Peer addressed by a chat-photo location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPeer {
    User { user_id: i64, access_hash: i64 },
    Chat { chat_id: i64 },
    Channel { channel_id: i64, access_hash: i64 },
}

/// Backend location used as the target of fetch calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    Photo {
        id: i64,
        access_hash: i64,
        file_reference: Bytes,
        thumb_size: String,
    },
    Document {
        id: i64,
        access_hash: i64,
        file_reference: Bytes,
        thumb_size: String,
    },
    PeerPhoto {
        peer: InputPeer,
        volume_id: i64,
        local_id: i32,
        big: bool,
    },
}

impl FileDescriptor {
    /// Builds the backend location for this file.
    pub fn location(&self) -> FileLocation {
        let thumb_size = self.thumbnail_size.clone().unwrap_or_default();

        match &self.kind {
            FileKind::ChatPhoto(source) => FileLocation::PeerPhoto {
                peer: source.peer(),
                volume_id: source.volume_id,
                local_id: source.local_id,
                big: source.big,
            },
            FileKind::Photo => FileLocation::Photo {
                id: self.media_id,
                access_hash: self.access_hash,
                file_reference: self.file_reference.clone(),
                thumb_size,
            },
            FileKind::Document => FileLocation::Document {
                id: self.media_id,
                access_hash: self.access_hash,
                file_reference: self.file_reference.clone(),
                thumb_size,
            },
        }
    }
}

impl ChatPhotoSource {
    fn peer(&self) -> InputPeer {
        if self.chat_id > 0 {
            InputPeer::User {
                user_id: self.chat_id,
                access_hash: self.chat_access_hash,
            }
        } else if self.chat_access_hash == 0 {
            InputPeer::Chat {
                chat_id: -self.chat_id,
            }
        } else {
            InputPeer::Channel {
                channel_id: CHANNEL_ID_BASE - self.chat_id,
                access_hash: self.chat_access_hash,
            }
        }
    }
}
