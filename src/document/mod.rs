//! Document Model for experiment data streams
//!
//! Bluesky-style documents arrive one at a time from an upstream transport.
//! Every document belongs to exactly one run, established transitively
//! through UID links:
//!
//! ```text
//! StartDoc (uid = run uid)
//!    │
//!    ├── DescriptorDoc (run_start)
//!    │       │
//!    │       └── EventDoc / EventPage (descriptor)
//!    │
//!    ├── ResourceDoc (run_start)
//!    │       │
//!    │       └── DatumDoc (resource)
//!    │
//! StopDoc (run_start)
//! ```
//!
//! On the wire a document is a `(name, fields)` pair; [`Document::from_wire`]
//! and [`Document::to_wire`] convert between that shape and the typed model.
//! Fields not modelled explicitly are preserved in flattened maps so that
//! arbitrary run metadata survives a round trip.

mod page;

pub use page::EventPage;

use crate::error::{RouterError, RouterResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current time in seconds since the Unix epoch, the unit used by document `time` fields.
pub fn now_s() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Document kinds, named as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// `start`
    Start,
    /// `descriptor`
    Descriptor,
    /// `event`
    Event,
    /// `event_page`
    EventPage,
    /// `resource`
    Resource,
    /// `datum`
    Datum,
    /// `stop`
    Stop,
}

impl DocumentKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Start => "start",
            DocumentKind::Descriptor => "descriptor",
            DocumentKind::Event => "event",
            DocumentKind::EventPage => "event_page",
            DocumentKind::Resource => "resource",
            DocumentKind::Datum => "datum",
            DocumentKind::Stop => "stop",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(DocumentKind::Start),
            "descriptor" => Ok(DocumentKind::Descriptor),
            "event" => Ok(DocumentKind::Event),
            "event_page" => Ok(DocumentKind::EventPage),
            "resource" => Ok(DocumentKind::Resource),
            "datum" => Ok(DocumentKind::Datum),
            "stop" => Ok(DocumentKind::Stop),
            other => Err(RouterError::UnknownDocumentType(other.to_string())),
        }
    }
}

/// The parent a document is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent<'a> {
    /// Directly owned by a run (`start`, `descriptor`, `resource`, `stop`).
    Run(&'a str),
    /// Owned by a descriptor (`event`, `event_page`).
    Descriptor(&'a str),
    /// Owned by a resource (`datum`).
    Resource(&'a str),
}

/// Document types for experiment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "doc", rename_all = "snake_case")]
pub enum Document {
    /// Opens a run
    Start(StartDoc),
    /// Declares an event stream of a run
    Descriptor(DescriptorDoc),
    /// One row of a stream
    Event(EventDoc),
    /// Several rows of a stream, column-wise
    EventPage(EventPage),
    /// External storage of a run
    Resource(ResourceDoc),
    /// One slice of a resource
    Datum(DatumDoc),
    /// Closes a run
    Stop(StopDoc),
}

impl Document {
    /// Build a typed document from its wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownDocumentType`] for an unrecognised name and
    /// [`RouterError::MalformedDocument`] when required fields are missing or empty.
    pub fn from_wire(name: &str, fields: Value) -> RouterResult<Self> {
        let kind: DocumentKind = name.parse()?;
        let malformed = |e: serde_json::Error| RouterError::MalformedDocument {
            doc_type: kind.to_string(),
            reason: e.to_string(),
        };
        let doc = match kind {
            DocumentKind::Start => Document::Start(serde_json::from_value(fields).map_err(malformed)?),
            DocumentKind::Descriptor => {
                Document::Descriptor(serde_json::from_value(fields).map_err(malformed)?)
            }
            DocumentKind::Event => Document::Event(serde_json::from_value(fields).map_err(malformed)?),
            DocumentKind::EventPage => {
                Document::EventPage(serde_json::from_value(fields).map_err(malformed)?)
            }
            DocumentKind::Resource => {
                Document::Resource(serde_json::from_value(fields).map_err(malformed)?)
            }
            DocumentKind::Datum => Document::Datum(serde_json::from_value(fields).map_err(malformed)?),
            DocumentKind::Stop => Document::Stop(serde_json::from_value(fields).map_err(malformed)?),
        };
        doc.validate()?;
        Ok(doc)
    }

    /// Convert back into the `(name, fields)` wire shape.
    pub fn to_wire(&self) -> RouterResult<(&'static str, Value)> {
        let fields = match self {
            Document::Start(d) => serde_json::to_value(d)?,
            Document::Descriptor(d) => serde_json::to_value(d)?,
            Document::Event(d) => serde_json::to_value(d)?,
            Document::EventPage(d) => serde_json::to_value(d)?,
            Document::Resource(d) => serde_json::to_value(d)?,
            Document::Datum(d) => serde_json::to_value(d)?,
            Document::Stop(d) => serde_json::to_value(d)?,
        };
        Ok((self.kind().as_str(), fields))
    }

    /// The kind of this document.
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Start(_) => DocumentKind::Start,
            Document::Descriptor(_) => DocumentKind::Descriptor,
            Document::Event(_) => DocumentKind::Event,
            Document::EventPage(_) => DocumentKind::EventPage,
            Document::Resource(_) => DocumentKind::Resource,
            Document::Datum(_) => DocumentKind::Datum,
            Document::Stop(_) => DocumentKind::Stop,
        }
    }

    /// The UID link that ties this document to its run.
    pub fn parent(&self) -> Parent<'_> {
        match self {
            Document::Start(d) => Parent::Run(&d.uid),
            Document::Descriptor(d) => Parent::Run(&d.run_start),
            Document::Event(d) => Parent::Descriptor(&d.descriptor),
            Document::EventPage(d) => Parent::Descriptor(&d.descriptor),
            Document::Resource(d) => Parent::Run(&d.run_start),
            Document::Datum(d) => Parent::Resource(&d.resource),
            Document::Stop(d) => Parent::Run(&d.run_start),
        }
    }

    /// Check the identity fields the router relies on.
    ///
    /// Deserialisation already guarantees presence; this rejects empty
    /// identifiers and event pages whose columns disagree in length.
    pub fn validate(&self) -> RouterResult<()> {
        let missing = |field: &str| RouterError::MalformedDocument {
            doc_type: self.kind().to_string(),
            reason: format!("empty '{}'", field),
        };
        match self {
            Document::Start(d) if d.uid.is_empty() => Err(missing("uid")),
            Document::Descriptor(d) if d.uid.is_empty() => Err(missing("uid")),
            Document::Descriptor(d) if d.run_start.is_empty() => Err(missing("run_start")),
            Document::Event(d) if d.descriptor.is_empty() => Err(missing("descriptor")),
            Document::EventPage(d) if d.descriptor.is_empty() => Err(missing("descriptor")),
            Document::EventPage(d) => d.check_columns(),
            Document::Resource(d) if d.uid.is_empty() => Err(missing("uid")),
            Document::Resource(d) if d.run_start.is_empty() => Err(missing("run_start")),
            Document::Datum(d) if d.datum_id.is_empty() => Err(missing("datum_id")),
            Document::Datum(d) if d.resource.is_empty() => Err(missing("resource")),
            Document::Stop(d) if d.run_start.is_empty() => Err(missing("run_start")),
            _ => Ok(()),
        }
    }
}

/// Start document - emitted at the beginning of a run
///
/// `uid` is the run UID. Everything else the experiment records about the run
/// (sample name, detectors, dark/background flags, calibration references)
/// lives in the flattened `metadata` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDoc {
    /// Unique run identifier (this IS the run uid)
    pub uid: String,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub time: f64,
    /// Arbitrary run metadata
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl StartDoc {
    /// Fresh run with a generated uid, stamped now.
    pub fn new() -> Self {
        Self {
            uid: new_uid(),
            time: now_s(),
            metadata: Map::new(),
        }
    }

    /// Use a known run uid.
    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = uid.to_string();
        self
    }

    /// Override the start time (seconds since the epoch).
    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Set one metadata field.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Look up a metadata field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// True when `key` is present and set to JSON `true`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.metadata.get(key), Some(Value::Bool(true)))
    }

    /// Start time as a UTC timestamp, if representable.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        if !self.time.is_finite() {
            return None;
        }
        let micros = (self.time * 1e6).round() as i64;
        DateTime::<Utc>::from_timestamp_micros(micros)
    }
}

impl Default for StartDoc {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor document - defines schema for event data
///
/// Each descriptor defines a "data stream" with named fields. A run can have
/// multiple descriptors (e.g., "primary" for main data, "baseline" for
/// background readings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorDoc {
    /// Unique descriptor ID
    pub uid: String,
    /// Links to StartDoc
    pub run_start: String,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub time: f64,
    /// Stream name (e.g., "primary", "dark")
    #[serde(default)]
    pub name: String,
    /// Schema for data fields
    #[serde(default)]
    pub data_keys: HashMap<String, DataKey>,
    /// Fields not modelled above (object_keys, configuration, hints)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DescriptorDoc {
    /// New stream `name` for run `run_start`.
    pub fn new(run_start: &str, name: &str) -> Self {
        Self {
            uid: new_uid(),
            run_start: run_start.to_string(),
            time: now_s(),
            name: name.to_string(),
            data_keys: HashMap::new(),
            extra: Map::new(),
        }
    }

    /// Replace the generated uid.
    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = uid.to_string();
        self
    }

    /// Declare a data field.
    pub fn with_data_key(mut self, name: &str, key: DataKey) -> Self {
        self.data_keys.insert(name.to_string(), key);
        self
    }
}

/// Schema for a data field within events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Data type: "number", "integer", "string", "array"
    pub dtype: String,
    /// Shape for arrays (empty for scalars)
    #[serde(default)]
    pub shape: Vec<usize>,
    /// Source device ID
    #[serde(default)]
    pub source: String,
    /// Physical units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Set when the data is stored externally and referenced through datum ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

impl DataKey {
    /// Create a scalar number data key
    pub fn scalar(source: &str, units: &str) -> Self {
        Self {
            dtype: "number".to_string(),
            shape: vec![],
            source: source.to_string(),
            units: Some(units.to_string()),
            external: None,
        }
    }

    /// Create an array data key
    pub fn array(source: &str, shape: Vec<usize>) -> Self {
        Self {
            dtype: "array".to_string(),
            shape,
            source: source.to_string(),
            units: None,
            external: None,
        }
    }

    /// Mark the field as stored outside the event (e.g. "FILESTORE:").
    pub fn with_external(mut self, external: &str) -> Self {
        self.external = Some(external.to_string());
        self
    }
}

/// Event document - one row of measurement data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDoc {
    /// Unique event ID
    #[serde(default)]
    pub uid: String,
    /// Links to DescriptorDoc that defines schema
    pub descriptor: String,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub time: f64,
    /// Sequence number within this descriptor stream
    #[serde(default)]
    pub seq_num: u64,
    /// Data values (field name -> value)
    #[serde(default)]
    pub data: HashMap<String, Value>,
    /// Per-field timestamps
    #[serde(default)]
    pub timestamps: HashMap<String, f64>,
    /// Whether externally stored fields have been loaded
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub filled: HashMap<String, bool>,
}

impl EventDoc {
    /// Empty event for `descriptor`.
    pub fn new(descriptor: &str, seq_num: u64) -> Self {
        Self {
            uid: new_uid(),
            descriptor: descriptor.to_string(),
            time: now_s(),
            seq_num,
            data: HashMap::new(),
            timestamps: HashMap::new(),
            filled: HashMap::new(),
        }
    }

    /// Set a data field, timestamped with the event time.
    pub fn with_datum(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.data.insert(field.to_string(), value.into());
        self.timestamps.insert(field.to_string(), self.time);
        self
    }
}

/// Resource document - points at externally stored data for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDoc {
    /// Unique resource ID
    pub uid: String,
    /// Links to StartDoc
    pub run_start: String,
    /// Storage format identifier (e.g. "AD_TIFF")
    #[serde(default)]
    pub spec: String,
    /// Storage root that `resource_path` is relative to
    #[serde(default)]
    pub root: String,
    /// File path below `root`
    #[serde(default)]
    pub resource_path: String,
    /// Handler arguments for opening the resource
    #[serde(default)]
    pub resource_kwargs: Map<String, Value>,
    /// "posix" or "windows"
    #[serde(default = "default_path_semantics")]
    pub path_semantics: String,
}

fn default_path_semantics() -> String {
    "posix".to_string()
}

impl ResourceDoc {
    /// Resource with a generated uid and posix path semantics.
    pub fn new(run_start: &str, spec: &str, resource_path: &str) -> Self {
        Self {
            uid: new_uid(),
            run_start: run_start.to_string(),
            spec: spec.to_string(),
            root: String::new(),
            resource_path: resource_path.to_string(),
            resource_kwargs: Map::new(),
            path_semantics: default_path_semantics(),
        }
    }
}

/// Datum document - addresses one slice of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatumDoc {
    /// Unique datum ID, referenced from event data
    pub datum_id: String,
    /// Links to ResourceDoc
    pub resource: String,
    /// Slice selection within the resource
    #[serde(default)]
    pub datum_kwargs: Map<String, Value>,
}

impl DatumDoc {
    /// Datum `index` of `resource`, with id `<resource>/<index>`.
    pub fn new(resource: &str, index: u64) -> Self {
        let mut datum_kwargs = Map::new();
        datum_kwargs.insert("point_number".to_string(), Value::from(index));
        Self {
            datum_id: format!("{}/{}", resource, index),
            resource: resource.to_string(),
            datum_kwargs,
        }
    }
}

/// How a run terminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Completed normally (assumed when a stop omits it)
    #[default]
    Success,
    /// Stopped early on request
    Abort,
    /// Stopped by an error
    Fail,
}

/// Stop document - emitted at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDoc {
    /// Unique stop doc ID
    #[serde(default)]
    pub uid: String,
    /// Links to StartDoc
    pub run_start: String,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub time: f64,
    /// How the run ended
    #[serde(default)]
    pub exit_status: ExitStatus,
    /// Reason for abort/failure
    #[serde(default)]
    pub reason: String,
    /// Events emitted per stream name
    #[serde(default)]
    pub num_events: HashMap<String, u64>,
}

impl StopDoc {
    /// Normal end of `run_start`.
    pub fn success(run_start: &str) -> Self {
        Self::with_status(run_start, ExitStatus::Success, "")
    }

    /// Run ended early on request.
    pub fn abort(run_start: &str, reason: &str) -> Self {
        Self::with_status(run_start, ExitStatus::Abort, reason)
    }

    /// Run ended by an error.
    pub fn fail(run_start: &str, reason: &str) -> Self {
        Self::with_status(run_start, ExitStatus::Fail, reason)
    }

    fn with_status(run_start: &str, exit_status: ExitStatus, reason: &str) -> Self {
        Self {
            uid: new_uid(),
            run_start: run_start.to_string(),
            time: now_s(),
            exit_status,
            reason: reason.to_string(),
            num_events: HashMap::new(),
        }
    }
}
