//! SOAP-with-Attachments payload parts
//!
//! Attachment content sits behind a read cursor so that steps can stream it;
//! anything that consumes the stream on behalf of a later step (signature
//! verification in particular) must rewind it afterwards.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// A MIME part bound to the SOAP envelope through its content identifier
#[derive(Debug, Clone)]
pub struct Attachment {
    content_id: String,
    pub content_type: String,
    pub properties: BTreeMap<String, String>,
    content: Cursor<Bytes>,
}

impl Attachment {
    /// Create an attachment; a `cid:` prefix or angle brackets on the id are stripped
    pub fn new(
        content_id: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            content_id: normalize_content_id(&content_id.into()),
            content_type: content_type.into(),
            properties: BTreeMap::new(),
            content: Cursor::new(content.into()),
        }
    }

    /// Bare content identifier (no `cid:` prefix)
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// `cid:` URI used by signature and encryption references
    pub fn cid_uri(&self) -> String {
        format!("cid:{}", self.content_id)
    }

    /// Whether `uri` designates this attachment
    pub fn matches_uri(&self, uri: &str) -> bool {
        uri.strip_prefix("cid:")
            .map(|id| normalize_content_id(id) == self.content_id)
            .unwrap_or(false)
    }

    /// Current read position of the content stream
    pub fn position(&self) -> u64 {
        self.content.position()
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.content.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read everything from the start of the stream, leaving the cursor at the end
    pub fn read_from_start(&mut self) -> io::Result<Vec<u8>> {
        self.content.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(self.len());
        self.content.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Reset the read cursor to offset 0
    pub fn rewind(&mut self) {
        self.content.set_position(0);
    }

    /// Replace the content, resetting the cursor
    pub fn replace_content(&mut self, content: impl Into<Bytes>) {
        self.content = Cursor::new(content.into());
    }

    /// Mutable access to the raw stream
    pub fn stream(&mut self) -> &mut Cursor<Bytes> {
        &mut self.content
    }
}

fn normalize_content_id(id: &str) -> String {
    let id = id.trim();
    let id = id.strip_prefix("cid:").unwrap_or(id);
    id.trim_start_matches('<').trim_end_matches('>').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_normalisation() {
        let attachment = Attachment::new("<payload-1@sender>", "application/xml", "x");
        assert_eq!(attachment.content_id(), "payload-1@sender");
        assert_eq!(attachment.cid_uri(), "cid:payload-1@sender");
        assert!(attachment.matches_uri("cid:payload-1@sender"));
        assert!(attachment.matches_uri("cid:<payload-1@sender>"));
        assert!(!attachment.matches_uri("#payload-1@sender"));
    }

    #[test]
    fn test_read_from_start_ignores_current_position() {
        let mut attachment = Attachment::new("a", "text/plain", "hello");
        let mut head = [0u8; 2];
        attachment.stream().read_exact(&mut head).unwrap();
        assert_eq!(attachment.position(), 2);

        let content = attachment.read_from_start().unwrap();
        assert_eq!(content, b"hello");
        assert_eq!(attachment.position(), 5);

        attachment.rewind();
        assert_eq!(attachment.position(), 0);
    }

    #[test]
    fn test_replace_content_resets_cursor() {
        let mut attachment = Attachment::new("a", "text/plain", "hello");
        attachment.read_from_start().unwrap();
        attachment.replace_content(vec![1u8, 2, 3]);
        assert_eq!(attachment.position(), 0);
        assert_eq!(attachment.len(), 3);
    }
}
