//! Deterministic in-memory media library

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::SimulationConfig;
use crate::descriptor::{FileDescriptor, FileKind, FileLocation};
use crate::transport::DataCenterId;

/// Chat that generated libraries publish their files in.
pub const SIMULATED_CHAT_ID: i64 = -1_001_234_567_890;

/// Number of data centers generated files are spread over.
const SIMULATED_DATA_CENTERS: i32 = 5;

/// Generates `len` pseudo-random bytes that depend only on `seed`.
pub fn deterministic_content(seed: u64, len: usize) -> Bytes {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut content = vec![0u8; len];
    rng.fill_bytes(&mut content);
    Bytes::from(content)
}

/// A file stored in the library together with its descriptor.
#[derive(Debug, Clone)]
pub struct SimulatedFile {
    pub chat_id: i64,
    pub message_id: i32,
    pub descriptor: FileDescriptor,
    pub content: Bytes,
}

/// Messages with attached files, addressable both by message and by location.
pub struct MediaLibrary {
    by_message: RwLock<HashMap<(i64, i32), SimulatedFile>>,
    next_media_id: AtomicI64,
}

impl Default for MediaLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self {
            by_message: RwLock::new(HashMap::new()),
            next_media_id: AtomicI64::new(5_000_000_000),
        }
    }

    /// Builds a library of `file_count` generated documents in
    /// [`SIMULATED_CHAT_ID`], message ids starting at 1.
    ///
    /// Files are spread round-robin over several data centers so that both
    /// home and foreign sessions get exercised.
    pub fn generate(config: &SimulationConfig) -> Self {
        let library = Self::new();
        let seed = config.deterministic_seed.unwrap_or_else(rand::random);

        for index in 0..config.file_count {
            let message_id = i32::try_from(index + 1).unwrap_or(i32::MAX);
            let dc = DataCenterId(1 + (message_id - 1) % SIMULATED_DATA_CENTERS);
            let content = deterministic_content(seed.wrapping_add(index as u64), config.file_size);
            library.add_document(
                SIMULATED_CHAT_ID,
                message_id,
                dc,
                content,
                Some(format!("sample-{message_id}.mp4")),
                Some("video/mp4".to_string()),
            );
        }

        tracing::info!(
            "Generated simulated library: {} files of {} bytes (seed {})",
            config.file_count,
            config.file_size,
            seed
        );
        library
    }

    /// Stores `content` as a document attached to a message and returns its descriptor.
    pub fn add_document(
        &self,
        chat_id: i64,
        message_id: i32,
        dc: DataCenterId,
        content: Bytes,
        file_name: Option<String>,
        mime_type: Option<String>,
    ) -> FileDescriptor {
        let media_id = self.next_media_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = FileDescriptor {
            dc_id: dc,
            media_id,
            access_hash: media_id ^ 0x5bd1_e995,
            file_reference: Bytes::copy_from_slice(&media_id.to_be_bytes()[4..]),
            kind: FileKind::Document,
            thumbnail_size: None,
            file_size: content.len() as u64,
            unique_id: format!("AgAD{media_id:x}"),
            file_name,
            mime_type,
        };
        self.insert(chat_id, message_id, descriptor.clone(), content);
        descriptor
    }

    /// Stores a file under an explicit descriptor.
    pub fn insert(&self, chat_id: i64, message_id: i32, descriptor: FileDescriptor, content: Bytes) {
        self.by_message.write().insert(
            (chat_id, message_id),
            SimulatedFile {
                chat_id,
                message_id,
                descriptor,
                content,
            },
        );
    }

    /// Descriptor of the file attached to a message, if any.
    pub fn descriptor(&self, chat_id: i64, message_id: i32) -> Option<FileDescriptor> {
        self.by_message
            .read()
            .get(&(chat_id, message_id))
            .map(|file| file.descriptor.clone())
    }

    /// Content addressed by a fetch location.
    pub fn content_at(&self, location: &FileLocation) -> Option<Bytes> {
        let files = self.by_message.read();
        files
            .values()
            .find(|file| file.descriptor.location() == *location)
            .map(|file| file.content.clone())
    }

    /// All stored files ordered by chat and message id.
    pub fn files(&self) -> Vec<SimulatedFile> {
        let mut files: Vec<_> = self.by_message.read().values().cloned().collect();
        files.sort_by_key(|file| (file.chat_id, file.message_id));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_content_depends_on_seed_only() {
        assert_eq!(deterministic_content(7, 64), deterministic_content(7, 64));
        assert_ne!(deterministic_content(7, 64), deterministic_content(8, 64));
        assert_eq!(deterministic_content(7, 10), deterministic_content(7, 64).slice(..10));
    }

    #[test]
    fn test_generate_spreads_files_over_data_centers() {
        let config = SimulationConfig {
            deterministic_seed: Some(1),
            file_count: 6,
            file_size: 100,
            ..Default::default()
        };
        let library = MediaLibrary::generate(&config);
        let files = library.files();

        assert_eq!(files.len(), 6);
        let dcs: Vec<i32> = files.iter().map(|f| f.descriptor.dc_id.0).collect();
        assert_eq!(dcs, vec![1, 2, 3, 4, 5, 1]);
        assert!(files.iter().all(|f| f.content.len() == 100));
        assert_eq!(files[0].descriptor.file_name.as_deref(), Some("sample-1.mp4"));
    }

    #[test]
    fn test_content_is_addressable_by_location() {
        let library = MediaLibrary::new();
        let descriptor = library.add_document(
            -5,
            3,
            DataCenterId(1),
            Bytes::from_static(b"payload"),
            None,
            None,
        );

        assert_eq!(library.descriptor(-5, 3), Some(descriptor.clone()));
        assert_eq!(
            library.content_at(&descriptor.location()),
            Some(Bytes::from_static(b"payload"))
        );
        assert_eq!(library.descriptor(-5, 4), None);
    }
}
