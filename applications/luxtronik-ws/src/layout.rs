//! Firmware variant → category layout.
//!
//! A layout says where each category lives in the navigation tree and which
//! items of each category become entities. Categories are matched by name
//! first and by position second; either way the node must carry an `id`.

use crate::entity::SensorKind;
use crate::error::{AppError, Result};
use crate::xml;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use xmltree::Element;

pub const DEFAULT_VARIANT: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySource {
    /// Key used in snapshots and descriptors, e.g. "temperatures"
    pub key: String,
    /// Position under the navigation menu node
    pub index: usize,
    /// Menu label; preferred over `index` when present in the tree
    #[serde(default)]
    pub name: Option<String>,
    /// Child of the fetched document to use instead of its root
    #[serde(default)]
    pub section: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "select", rename_all = "snake_case")]
pub enum Selector {
    /// Every leaf item, optionally filtered by its value text
    Scan {
        #[serde(default)]
        value_suffix: Option<String>,
        #[serde(default)]
        numeric_only: bool,
    },
    /// Literal positions inside the category
    Indices { indices: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRule {
    pub kind: SensorKind,
    pub category: String,
    #[serde(flatten)]
    pub selector: Selector,
    /// Appended to every display name in this group, e.g. " (output)"
    #[serde(default)]
    pub name_suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareLayout {
    pub categories: Vec<CategorySource>,
    pub groups: Vec<GroupRule>,
    /// Category holding device type (item 0) and firmware version (item 1)
    #[serde(default = "default_device_category")]
    pub device_category: String,
}

fn default_device_category() -> String {
    "deviceinfo".into()
}

/// A category whose navigation id has been located.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCategory {
    pub source: CategorySource,
    pub id: String,
}

impl FirmwareLayout {
    /// Layout of the Luxtronik 2.x web interface as shipped, with the menu
    /// labels of a German-language controller.
    pub fn luxtronik2() -> Self {
        let cat = |key: &str, index: usize, name: Option<&str>, section: Option<usize>| {
            CategorySource {
                key: key.into(),
                index,
                name: name.map(Into::into),
                section,
            }
        };
        let scan = |kind, category: &str| GroupRule {
            kind,
            category: category.into(),
            selector: Selector::Scan {
                value_suffix: None,
                numeric_only: false,
            },
            name_suffix: None,
        };
        let pick = |kind, category: &str, indices: &[usize], suffix: Option<&str>| GroupRule {
            kind,
            category: category.into(),
            selector: Selector::Indices {
                indices: indices.to_vec(),
            },
            name_suffix: suffix.map(Into::into),
        };

        Self {
            categories: vec![
                cat("temperatures", 1, Some("Temperaturen"), None),
                cat("inputs", 2, Some("Eingänge"), None),
                cat("outputs", 3, Some("Ausgänge"), None),
                cat("times", 4, Some("Ablaufzeiten"), None),
                cat("hours", 5, Some("Betriebsstunden"), None),
                cat("deviceinfo", 8, Some("Anlagenstatus"), None),
                cat("energy_outputs", 9, Some("Energie"), Some(0)),
                cat("energy_inputs", 9, Some("Energie"), Some(1)),
            ],
            groups: vec![
                scan(SensorKind::Temperature, "temperatures"),
                pick(SensorKind::Pressure, "inputs", &[4, 5], None),
                pick(SensorKind::Frequency, "outputs", &[10], None),
                pick(SensorKind::Percentage, "outputs", &[12, 13], None),
                pick(SensorKind::Power, "deviceinfo", &[8], None),
                pick(SensorKind::Energy, "energy_outputs", &[1, 2, 3], Some(" (output)")),
                pick(SensorKind::Energy, "energy_inputs", &[1, 2, 3], Some(" (input)")),
                scan(SensorKind::Time, "times"),
                GroupRule {
                    kind: SensorKind::Hours,
                    category: "hours".into(),
                    selector: Selector::Scan {
                        value_suffix: Some("h".into()),
                        numeric_only: false,
                    },
                    name_suffix: None,
                },
                GroupRule {
                    kind: SensorKind::Counter,
                    category: "hours".into(),
                    selector: Selector::Scan {
                        value_suffix: None,
                        numeric_only: true,
                    },
                    name_suffix: None,
                },
                pick(SensorKind::Text, "deviceinfo", &[7], None),
            ],
            device_category: default_device_category(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut keys = BTreeSet::new();
        for c in &self.categories {
            if !keys.insert(c.key.as_str()) {
                return Err(AppError::Layout(format!("duplicate category key: {}", c.key)));
            }
        }
        if !keys.contains(self.device_category.as_str()) {
            return Err(AppError::Layout(format!(
                "device category {} is not defined",
                self.device_category
            )));
        }
        for g in &self.groups {
            if !keys.contains(g.category.as_str()) {
                return Err(AppError::Layout(format!(
                    "group {:?} refers to unknown category {}",
                    g.kind, g.category
                )));
            }
        }
        Ok(())
    }

    /// Locate every category's id in a navigation tree.
    pub fn resolve(&self, navigation: &Element) -> Result<Vec<ResolvedCategory>> {
        let menu = xml::element_at(navigation, 0)
            .ok_or_else(|| AppError::Layout("navigation tree has no menu node".into()))?;

        self.categories
            .iter()
            .map(|source| {
                let node = find_by_name(menu, source.name.as_deref())
                    .or_else(|| xml::element_at(menu, source.index))
                    .ok_or_else(|| {
                        AppError::Layout(format!(
                            "category {} not found at index {}",
                            source.key, source.index
                        ))
                    })?;
                let id = xml::id_of(node).ok_or_else(|| {
                    AppError::Layout(format!("category {} has no id attribute", source.key))
                })?;
                Ok(ResolvedCategory {
                    source: source.clone(),
                    id: id.to_string(),
                })
            })
            .collect()
    }
}

fn find_by_name<'a>(menu: &'a Element, name: Option<&str>) -> Option<&'a Element> {
    let wanted = name?.trim();
    xml::elements(menu).find(|node| {
        node.get_child("name")
            .and_then(xml::text_of)
            .map(|n| n.trim().eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
    })
}

/// Named firmware layouts; `default` is always present.
#[derive(Debug, Clone)]
pub struct LayoutTable {
    variants: BTreeMap<String, FirmwareLayout>,
}

impl Default for LayoutTable {
    fn default() -> Self {
        let mut variants = BTreeMap::new();
        variants.insert(DEFAULT_VARIANT.to_string(), FirmwareLayout::luxtronik2());
        Self { variants }
    }
}

impl LayoutTable {
    /// Built-in variants overlaid with configured ones; same name replaces.
    pub fn with_overrides(extra: &BTreeMap<String, FirmwareLayout>) -> Result<Self> {
        let mut table = Self::default();
        for (name, layout) in extra {
            layout.validate()?;
            table.variants.insert(name.clone(), layout.clone());
        }
        Ok(table)
    }

    pub fn get(&self, variant: &str) -> Result<&FirmwareLayout> {
        self.variants.get(variant).ok_or_else(|| {
            AppError::Config(format!(
                "unknown firmware variant {}; known: {}",
                variant,
                self.variants.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn variants(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MENU: &[(&str, &str)] = &[
        ("0xa1", "Temperaturen"),
        ("0xa2", "Eingänge"),
        ("0xa3", "Ausgänge"),
        ("0xa4", "Ablaufzeiten"),
        ("0xa5", "Betriebsstunden"),
        ("0xa6", "Fehlerspeicher"),
        ("0xa7", "Abschaltungen"),
        ("0xa8", "Anlagenstatus"),
        ("0xa9", "Energie"),
    ];

    fn navigation(entries: &[(&str, &str)]) -> Element {
        let items: String = entries
            .iter()
            .map(|(id, name)| format!(r#"<item id="{id}"><name>{name}</name></item>"#))
            .collect();
        xml::parse(&format!(
            r#"<Navigation id="0x100"><item id="0x200"><name>Informationen</name>{items}</item><item id="0x300"><name>Einstellungen</name></item></Navigation>"#
        ))
        .unwrap()
    }

    fn resolved_ids(layout: &FirmwareLayout, nav: &Element) -> BTreeMap<String, String> {
        layout
            .resolve(nav)
            .unwrap()
            .into_iter()
            .map(|r| (r.source.key, r.id))
            .collect()
    }

    #[test]
    fn test_default_layout_is_valid() {
        FirmwareLayout::luxtronik2().validate().unwrap();
    }

    #[test]
    fn test_default_indices_locate_expected_ids() {
        // The menu node's own <name> is element 0; categories start at 1.
        let nav = navigation(MENU);
        let mut layout = FirmwareLayout::luxtronik2();
        for c in &mut layout.categories {
            c.name = None;
        }
        let ids = resolved_ids(&layout, &nav);

        assert_eq!(ids["temperatures"], "0xa1");
        assert_eq!(ids["inputs"], "0xa2");
        assert_eq!(ids["outputs"], "0xa3");
        assert_eq!(ids["times"], "0xa4");
        assert_eq!(ids["hours"], "0xa5");
        assert_eq!(ids["deviceinfo"], "0xa8");
        assert_eq!(ids["energy_outputs"], "0xa9");
        assert_eq!(ids["energy_inputs"], "0xa9");
    }

    #[test]
    fn test_name_lookup_survives_shifted_menu() {
        let mut shifted = vec![("0xa0", "Favoriten")];
        shifted.extend_from_slice(MENU);
        let nav = navigation(&shifted);
        let ids = resolved_ids(&FirmwareLayout::luxtronik2(), &nav);

        assert_eq!(ids["temperatures"], "0xa1");
        assert_eq!(ids["inputs"], "0xa2");
        assert_eq!(ids["outputs"], "0xa3");
        assert_eq!(ids["times"], "0xa4");
        assert_eq!(ids["hours"], "0xa5");
        assert_eq!(ids["deviceinfo"], "0xa8");
        assert_eq!(ids["energy_outputs"], "0xa9");
        assert_eq!(ids["energy_inputs"], "0xa9");
    }

    #[test]
    fn test_unknown_name_falls_back_to_index() {
        let nav = navigation(MENU);
        let layout = FirmwareLayout {
            categories: vec![CategorySource {
                key: "temperatures".into(),
                index: 1,
                name: Some("Temperatures".into()),
                section: None,
            }],
            groups: vec![],
            device_category: "temperatures".into(),
        };
        assert_eq!(resolved_ids(&layout, &nav)["temperatures"], "0xa1");
    }

    #[test]
    fn test_missing_id_is_layout_error() {
        let nav = xml::parse(
            r#"<Navigation id="1"><item id="2"><name>x</name><item><name>Temperaturen</name></item></item></Navigation>"#,
        )
        .unwrap();
        let err = FirmwareLayout::luxtronik2().resolve(&nav).unwrap_err();
        assert!(matches!(err, AppError::Layout(_)));
    }

    #[test]
    fn test_out_of_range_index_is_layout_error() {
        let nav = xml::parse(r#"<Navigation id="1"><item id="2"><name>x</name></item></Navigation>"#)
            .unwrap();
        let mut layout = FirmwareLayout::luxtronik2();
        for c in &mut layout.categories {
            c.name = None;
        }
        assert!(matches!(layout.resolve(&nav), Err(AppError::Layout(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_group_category() {
        let mut layout = FirmwareLayout::luxtronik2();
        layout.groups.push(GroupRule {
            kind: SensorKind::Temperature,
            category: "nope".into(),
            selector: Selector::Indices { indices: vec![0] },
            name_suffix: None,
        });
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_layout_from_yaml() {
        let yaml = r#"
categories:
  - key: deviceinfo
    index: 7
  - key: temperatures
    index: 0
    name: Temperatures
groups:
  - kind: temperature
    category: temperatures
    select: scan
  - kind: hours
    category: deviceinfo
    select: scan
    value_suffix: h
  - kind: power
    category: deviceinfo
    select: indices
    indices: [8]
"#;
        let layout: FirmwareLayout = serde_yaml::from_str(yaml).unwrap();
        layout.validate().unwrap();
        assert_eq!(layout.device_category, "deviceinfo");
        assert_eq!(
            layout.groups[1].selector,
            Selector::Scan {
                value_suffix: Some("h".into()),
                numeric_only: false
            }
        );
        assert_eq!(
            layout.groups[2].selector,
            Selector::Indices { indices: vec![8] }
        );
    }

    #[test]
    fn test_table_overrides_and_unknown_variant() {
        let mut extra = BTreeMap::new();
        let mut custom = FirmwareLayout::luxtronik2();
        custom.categories[0].index = 0;
        extra.insert("v3".to_string(), custom.clone());

        let table = LayoutTable::with_overrides(&extra).unwrap();
        assert_eq!(table.get("v3").unwrap(), &custom);
        assert!(table.get(DEFAULT_VARIANT).is_ok());
        assert!(matches!(table.get("v9"), Err(AppError::Config(_))));
        assert_eq!(table.variants().collect::<Vec<_>>(), vec!["default", "v3"]);
    }
}
