//! Columnar event pages.

use super::EventDoc;
use crate::error::{RouterError, RouterResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A batch of events from one descriptor, stored column-wise.
///
/// Row `i` of every column belongs to the same event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    /// Links to DescriptorDoc shared by every row
    pub descriptor: String,
    /// Event uids, one per row
    #[serde(default)]
    pub uid: Vec<String>,
    /// Event times
    #[serde(default)]
    pub time: Vec<f64>,
    /// Sequence numbers
    #[serde(default)]
    pub seq_num: Vec<u64>,
    /// One column of values per data key
    #[serde(default)]
    pub data: HashMap<String, Vec<Value>>,
    /// One column of timestamps per data key
    #[serde(default)]
    pub timestamps: HashMap<String, Vec<f64>>,
    /// One column of fill flags per externally stored key
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub filled: HashMap<String, Vec<bool>>,
}

impl EventPage {
    /// Number of events in the page.
    pub fn len(&self) -> usize {
        self.uid.len()
    }

    /// True for a page with no rows.
    pub fn is_empty(&self) -> bool {
        self.uid.is_empty()
    }

    /// Pack events into a page.
    ///
    /// # Errors
    ///
    /// Fails if `events` is empty, mixes descriptors, or the rows do not share
    /// the same set of data keys.
    pub fn from_events(events: &[EventDoc]) -> RouterResult<Self> {
        let first = events.first().ok_or_else(|| malformed("cannot pack zero events"))?;
        let mut page = EventPage {
            descriptor: first.descriptor.clone(),
            uid: Vec::with_capacity(events.len()),
            time: Vec::with_capacity(events.len()),
            seq_num: Vec::with_capacity(events.len()),
            data: first.data.keys().map(|k| (k.clone(), Vec::new())).collect(),
            timestamps: first.timestamps.keys().map(|k| (k.clone(), Vec::new())).collect(),
            filled: first.filled.keys().map(|k| (k.clone(), Vec::new())).collect(),
        };

        for event in events {
            if event.descriptor != page.descriptor {
                return Err(malformed(&format!(
                    "event {} belongs to descriptor {}, page is for {}",
                    event.uid, event.descriptor, page.descriptor
                )));
            }
            if event.data.len() != page.data.len() {
                return Err(malformed(&format!("event {} has a different set of data keys", event.uid)));
            }
            page.uid.push(event.uid.clone());
            page.time.push(event.time);
            page.seq_num.push(event.seq_num);
            for (key, column) in page.data.iter_mut() {
                let value = event
                    .data
                    .get(key)
                    .ok_or_else(|| malformed(&format!("event {} is missing data key '{}'", event.uid, key)))?;
                column.push(value.clone());
            }
            for (key, column) in page.timestamps.iter_mut() {
                column.push(event.timestamps.get(key).copied().unwrap_or(event.time));
            }
            for (key, column) in page.filled.iter_mut() {
                column.push(event.filled.get(key).copied().unwrap_or(false));
            }
        }
        Ok(page)
    }

    /// Unpack the page into one event per row.
    pub fn events(&self) -> Vec<EventDoc> {
        (0..self.len())
            .map(|i| EventDoc {
                uid: self.uid[i].clone(),
                descriptor: self.descriptor.clone(),
                time: self.time[i],
                seq_num: self.seq_num[i],
                data: column_row(&self.data, i),
                timestamps: column_row(&self.timestamps, i),
                filled: column_row(&self.filled, i),
            })
            .collect()
    }

    /// Reject pages whose columns have inconsistent lengths.
    pub(crate) fn check_columns(&self) -> RouterResult<()> {
        let n = self.uid.len();
        let aligned = self.time.len() == n
            && self.seq_num.len() == n
            && self.data.values().all(|c| c.len() == n)
            && self.timestamps.values().all(|c| c.len() == n)
            && self.filled.values().all(|c| c.len() == n);
        if aligned {
            Ok(())
        } else {
            Err(malformed("columns differ in length"))
        }
    }
}

fn column_row<T: Clone>(columns: &HashMap<String, Vec<T>>, row: usize) -> HashMap<String, T> {
    columns
        .iter()
        .filter_map(|(k, col)| col.get(row).map(|v| (k.clone(), v.clone())))
        .collect()
}

fn malformed(reason: &str) -> RouterError {
    RouterError::MalformedDocument {
        doc_type: "event_page".to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use serde_json::json;

    fn events(descriptor: &str, n: u64) -> Vec<EventDoc> {
        (1..=n)
            .map(|i| EventDoc::new(descriptor, i).with_datum("intensity", i as f64 * 1.5))
            .collect()
    }

    #[test]
    fn test_pack_and_unpack_preserve_rows() {
        let original = events("d1", 3);
        let page = EventPage::from_events(&original).unwrap();

        assert_eq!(page.len(), 3);
        assert_eq!(page.data["intensity"], vec![json!(1.5), json!(3.0), json!(4.5)]);
        assert_eq!(page.events(), original);
    }

    #[test]
    fn test_pack_rejects_mixed_descriptors() {
        let mut mixed = events("d1", 2);
        mixed.extend(events("d2", 1));
        let err = EventPage::from_events(&mixed).unwrap_err();
        assert!(err.to_string().contains("page is for d1"));
    }

    #[test]
    fn test_pack_rejects_empty_input() {
        assert!(EventPage::from_events(&[]).is_err());
    }

    #[test]
    fn test_misaligned_page_is_malformed() {
        let fields = json!({
            "descriptor": "d1",
            "uid": ["a", "b"],
            "time": [1.0],
            "seq_num": [1, 2],
            "data": {"x": [1, 2]},
            "timestamps": {"x": [1.0, 2.0]}
        });
        let err = Document::from_wire("event_page", fields).unwrap_err();
        assert!(err.to_string().contains("columns differ in length"));
    }
}
