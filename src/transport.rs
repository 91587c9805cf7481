//! Transport adapter helpers.
//!
//! Several logical pipelines may share one physical channel. Messages carry an
//! opaque topic label; a [`TopicFilter`] keeps only the topics a pipeline
//! subscribed to. Payloads are JSON `[name, fields]` pairs.

use crate::config::TransportConfig;
use crate::document::Document;
use crate::error::RouterResult;
use serde_json::Value;

/// Accepts messages whose topic starts with one of the configured prefixes.
///
/// An empty filter accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter {
    prefixes: Vec<Vec<u8>>,
}

impl TopicFilter {
    /// Accept topics starting with any of `prefixes`; none means accept all.
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        Self {
            prefixes: prefixes.into_iter().map(|p| p.as_ref().to_vec()).collect(),
        }
    }

    /// Accept every topic.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Filter from `[transport] topic_prefixes`.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(&config.topic_prefixes)
    }

    /// Whether `topic` passes the filter.
    pub fn accepts(&self, topic: &[u8]) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| topic.starts_with(p))
    }
}

/// Encoding of a document on the wire.
pub struct Envelope;

impl Envelope {
    /// Parse a JSON `[name, fields]` payload into a document.
    pub fn decode(payload: &[u8]) -> RouterResult<Document> {
        let (name, fields): (String, Value) = serde_json::from_slice(payload)?;
        Document::from_wire(&name, fields)
    }

    /// Serialise a document as a JSON `[name, fields]` payload.
    pub fn encode(doc: &Document) -> RouterResult<Vec<u8>> {
        let (name, fields) = doc.to_wire()?;
        Ok(serde_json::to_vec(&(name, fields))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::StartDoc;
    use crate::error::RouterError;

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = TopicFilter::accept_all();
        assert!(filter.accepts(b"raw"));
        assert!(filter.accepts(b""));
    }

    #[test]
    fn test_prefix_filter() {
        let filter = TopicFilter::new(["raw", "an"]);
        assert!(filter.accepts(b"raw"));
        assert!(filter.accepts(b"analysis"));
        assert!(!filter.accepts(b"qoi"));
        assert!(!filter.accepts(b"ra"));
    }

    #[test]
    fn test_envelope_round_trip() {
        let doc = Document::Start(StartDoc::new().with_time(1_700_000_000.25).with_metadata("sample_name", "Ni"));
        let bytes = Envelope::encode(&doc).unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Envelope::decode(b"not json").unwrap_err();
        assert!(matches!(err, RouterError::Decode(_)));
    }
}
