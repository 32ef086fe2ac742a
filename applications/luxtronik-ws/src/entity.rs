use crate::error::{AppError, Result};
use crate::layout::{FirmwareLayout, GroupRule, Selector};
use crate::snapshot::Snapshot;
use crate::xml;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Pressure,
    Frequency,
    Percentage,
    Power,
    Energy,
    /// Elapsed time shown as H:M[:S]
    Time,
    Counter,
    /// Free text, e.g. the operating state
    Text,
    /// Accumulated operating hours
    Hours,
}

impl SensorKind {
    /// Trailing characters of the raw value that hold the unit, e.g. "°C".
    pub fn suffix_len(&self) -> usize {
        match self {
            SensorKind::Temperature | SensorKind::Percentage => 2,
            SensorKind::Frequency | SensorKind::Power => 3,
            SensorKind::Pressure | SensorKind::Energy => 4,
            SensorKind::Hours => 1,
            SensorKind::Time | SensorKind::Counter | SensorKind::Text => 0,
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("°C"),
            SensorKind::Pressure => Some("bar"),
            SensorKind::Frequency => Some("Hz"),
            SensorKind::Percentage => Some("%"),
            SensorKind::Power => Some("kW"),
            SensorKind::Energy => Some("kWh"),
            SensorKind::Time => Some("s"),
            SensorKind::Hours => Some("h"),
            SensorKind::Counter | SensorKind::Text => None,
        }
    }

    pub fn device_class(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("temperature"),
            SensorKind::Pressure => Some("pressure"),
            SensorKind::Frequency => Some("frequency"),
            SensorKind::Power => Some("power"),
            SensorKind::Energy => Some("energy"),
            SensorKind::Time => Some("duration"),
            _ => None,
        }
    }

    pub fn state_class(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature
            | SensorKind::Pressure
            | SensorKind::Frequency
            | SensorKind::Percentage
            | SensorKind::Power => Some("measurement"),
            SensorKind::Energy | SensorKind::Time | SensorKind::Hours | SensorKind::Counter => {
                Some("total_increasing")
            }
            SensorKind::Text => None,
        }
    }

    /// Decimal places the host should display.
    pub fn suggested_display_precision(&self) -> Option<u8> {
        match self {
            SensorKind::Hours => Some(0),
            _ => None,
        }
    }

    pub fn icon(&self) -> Option<&'static str> {
        match self {
            // Only pumps report percentages
            SensorKind::Percentage => Some("mdi:pump"),
            SensorKind::Time => Some("mdi:clock-digital"),
            SensorKind::Hours | SensorKind::Counter => Some("mdi:counter"),
            _ => None,
        }
    }
}

/// Where one value lives inside a snapshot, fixed at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub device_type: String,
    pub firmware_version: String,
    /// Display name, including any group suffix
    pub name: String,
    /// Name of the item as the controller reports it
    pub item_name: String,
    pub index: usize,
    pub category: String,
    pub kind: SensorKind,
}

impl EntityDescriptor {
    pub fn unique_id(&self) -> String {
        format!("{}{}", self.name, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
}

impl DeviceInfo {
    pub fn new(model: &str, sw_version: &str) -> Self {
        let manufacturer = if model.starts_with("MSW") {
            "Alpha Innotec"
        } else {
            "ACME"
        };
        Self {
            identifier: model.to_string(),
            name: model.to_string(),
            model: model.to_string(),
            manufacturer: manufacturer.to_string(),
            sw_version: sw_version.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySet {
    pub device: DeviceInfo,
    pub descriptors: Vec<EntityDescriptor>,
}

impl EntitySet {
    pub fn of_kind(&self, kind: SensorKind) -> impl Iterator<Item = &EntityDescriptor> {
        self.descriptors.iter().filter(move |d| d.kind == kind)
    }
}

/// Build every descriptor the layout asks for from a reference snapshot.
pub fn build_entities(layout: &FirmwareLayout, snapshot: &Snapshot) -> Result<EntitySet> {
    let device_root = category(snapshot, &layout.device_category)?;
    let device_type = device_field(device_root, 0, "device type")?;
    let firmware_version = device_field(device_root, 1, "firmware version")?;
    let device = DeviceInfo::new(&device_type, &firmware_version);

    let mut descriptors = Vec::new();
    for rule in &layout.groups {
        let items = category(snapshot, &rule.category)?;
        for (index, item_name) in select(rule, items)? {
            let name = match &rule.name_suffix {
                Some(suffix) => format!("{item_name}{suffix}"),
                None => item_name.clone(),
            };
            descriptors.push(EntityDescriptor {
                device_type: device_type.clone(),
                firmware_version: firmware_version.clone(),
                name,
                item_name,
                index,
                category: rule.category.clone(),
                kind: rule.kind,
            });
        }
    }

    info!(
        model = %device.model,
        sw_version = %device.sw_version,
        entities = descriptors.len(),
        "built entity descriptors"
    );
    Ok(EntitySet {
        device,
        descriptors,
    })
}

fn category<'a>(snapshot: &'a Snapshot, key: &str) -> Result<&'a xmltree::Element> {
    snapshot
        .category(key)
        .ok_or_else(|| AppError::Layout(format!("snapshot has no category {key}")))
}

fn device_field(root: &xmltree::Element, index: usize, what: &str) -> Result<String> {
    xml::element_at(root, index)
        .and_then(xml::item_value)
        .ok_or_else(|| AppError::Layout(format!("{what} missing at device item {index}")))
}

/// (index, item name) pairs a rule picks out of one category.
fn select(rule: &GroupRule, items: &xmltree::Element) -> Result<Vec<(usize, String)>> {
    match &rule.selector {
        Selector::Scan {
            value_suffix,
            numeric_only,
        } => Ok(xml::elements(items)
            .enumerate()
            .filter(|(_, item)| xml::is_leaf_item(item))
            .filter_map(|(index, item)| {
                let name = xml::item_name(item)?;
                let value = xml::item_value(item).unwrap_or_default();
                if let Some(suffix) = value_suffix {
                    if !value.ends_with(suffix.as_str()) {
                        return None;
                    }
                }
                if *numeric_only && !is_numeric(&value) {
                    return None;
                }
                debug!(category = %rule.category, index, name = %name, "selected item");
                Some((index, name))
            })
            .collect()),
        Selector::Indices { indices } => indices
            .iter()
            .map(|&index| {
                xml::element_at(items, index)
                    .and_then(xml::item_name)
                    .map(|name| (index, name))
                    .ok_or_else(|| {
                        AppError::Layout(format!(
                            "no named item at index {index} in category {}",
                            rule.category
                        ))
                    })
            })
            .collect(),
    }
}

fn is_numeric(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v.chars().all(|c| c.is_ascii_digit())
}
