use crate::entity::{EntityDescriptor, SensorKind};
use crate::error::{AppError, Result};
use crate::snapshot::Snapshot;
use crate::xml;
use serde::Serialize;
use tracing::warn;
use xmltree::Element;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Text(String),
    Seconds(u64),
}

impl std::fmt::Display for SensorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorValue::Text(s) => f.write_str(s),
            SensorValue::Seconds(n) => write!(f, "{n}"),
        }
    }
}

/// One entity's state for one cycle. `None` when the value could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub unique_id: String,
    pub kind: SensorKind,
    pub value: Option<SensorValue>,
}

/// Drop `count` trailing characters. Counts chars, not bytes.
pub fn strip_suffix(raw: &str, count: usize) -> &str {
    let keep = raw.chars().count().saturating_sub(count);
    match raw.char_indices().nth(keep) {
        Some((byte, _)) => &raw[..byte],
        None => raw,
    }
}

/// Rewrite both '.' and ',' to `separator`. Without a separator the text is
/// returned unchanged.
pub fn normalize_decimal(value: &str, separator: Option<char>) -> String {
    match separator {
        Some(sep) => value
            .chars()
            .map(|c| if c == '.' || c == ',' { sep } else { c })
            .collect(),
        None => value.to_string(),
    }
}

/// "H:M" or "H:M:S" to total seconds.
pub fn parse_duration_secs(text: &str) -> Result<u64> {
    let parts = text
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<u64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AppError::Value(format!("bad time {text:?}: {e}")))?;

    let (h, m, s) = match parts.as_slice() {
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(AppError::Value(format!("bad time {text:?}: expected H:M[:S]"))),
    };
    h.checked_mul(3600)
        .and_then(|secs| m.checked_mul(60).and_then(|m| secs.checked_add(m)))
        .and_then(|secs| secs.checked_add(s))
        .ok_or_else(|| AppError::Value(format!("time {text:?} is out of range")))
}

/// Find the descriptor's item, checking the stored position still holds the
/// same name and searching by name otherwise.
pub fn locate<'a>(descriptor: &EntityDescriptor, snapshot: &'a Snapshot) -> Option<&'a Element> {
    let root = snapshot.category(&descriptor.category)?;
    let at_index = xml::element_at(root, descriptor.index)
        .filter(|item| xml::item_name(item).as_deref() == Some(descriptor.item_name.as_str()));
    at_index.or_else(|| {
        xml::elements(root).find(|item| {
            xml::is_leaf_item(item)
                && xml::item_name(item).as_deref() == Some(descriptor.item_name.as_str())
        })
    })
}

pub fn extract(
    descriptor: &EntityDescriptor,
    snapshot: &Snapshot,
    decimal_separator: Option<char>,
) -> Result<Option<SensorValue>> {
    let Some(raw) = locate(descriptor, snapshot).and_then(xml::item_value) else {
        return Ok(None);
    };

    let value = match descriptor.kind {
        SensorKind::Time => SensorValue::Seconds(parse_duration_secs(&raw)?),
        kind => {
            let bare = strip_suffix(&raw, kind.suffix_len());
            SensorValue::Text(normalize_decimal(bare, decimal_separator))
        }
    };
    Ok(Some(value))
}

/// Readings for every descriptor. A value that fails to parse only blanks
/// its own entity.
pub fn extract_all(
    descriptors: &[EntityDescriptor],
    snapshot: &Snapshot,
    decimal_separator: Option<char>,
) -> Vec<Reading> {
    descriptors
        .iter()
        .map(|d| {
            let value = match extract(d, snapshot, decimal_separator) {
                Ok(Some(v)) => Some(v),
                Ok(None) => {
                    warn!(entity = %d.unique_id(), category = %d.category, "value not found in snapshot");
                    None
                }
                Err(e) => {
                    warn!(entity = %d.unique_id(), error = %e, "failed to read value");
                    None
                }
            };
            Reading {
                unique_id: d.unique_id(),
                kind: d.kind,
                value,
            }
        })
        .collect()
}
