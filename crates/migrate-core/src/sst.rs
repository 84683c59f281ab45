//! Runtime shared string table.
//!
//! Bridges the XML-level [`migrate_xml::shared_strings::Sst`] (an indexed
//! list, parsed once per sheet) and the streaming reader, which needs O(1)
//! lookup by index while resolving `t="s"` cells.

use migrate_xml::shared_strings::Si;
use migrate_xml::Sst;

/// Runtime shared string table for efficient string lookup.
pub struct SharedStringTable {
    strings: Vec<String>,
}

impl SharedStringTable {
    /// Create a new, empty shared string table.
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
        }
    }

    /// Build from an XML [`Sst`] struct.
    ///
    /// Plain-text items use the `t` field directly. Rich-text items
    /// concatenate all run texts.
    pub fn from_sst(sst: &Sst) -> Self {
        let strings = sst.items.iter().map(si_to_string).collect();
        Self { strings }
    }

    /// Get a string by its index.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(|s| s.as_str())
    }

    /// Number of strings in the table.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns `true` if the table contains no strings.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for SharedStringTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the plain-text content of a shared string item.
fn si_to_string(si: &Si) -> String {
    if let Some(ref t) = si.t {
        t.value.clone()
    } else {
        si.r.iter().map(|r| r.t.value.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate_xml::shared_strings::{R, T};

    #[test]
    fn test_sst_new_is_empty() {
        let table = SharedStringTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_sst_get_out_of_bounds() {
        let table = SharedStringTable::new();
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn test_sst_from_xml_plain_text() {
        let xml_sst = Sst {
            xmlns: migrate_xml::namespaces::SPREADSHEET_ML.to_string(),
            count: Some(3),
            unique_count: Some(3),
            items: vec![
                Si {
                    t: Some(T {
                        xml_space: None,
                        value: "Name".to_string(),
                    }),
                    r: vec![],
                },
                Si {
                    t: Some(T {
                        xml_space: None,
                        value: "Age".to_string(),
                    }),
                    r: vec![],
                },
                Si {
                    t: Some(T {
                        xml_space: None,
                        value: "City".to_string(),
                    }),
                    r: vec![],
                },
            ],
        };

        let table = SharedStringTable::from_sst(&xml_sst);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("Name"));
        assert_eq!(table.get(1), Some("Age"));
        assert_eq!(table.get(2), Some("City"));
    }

    #[test]
    fn test_sst_from_xml_rich_text_concatenates_runs() {
        let xml_sst = Sst {
            xmlns: migrate_xml::namespaces::SPREADSHEET_ML.to_string(),
            count: Some(1),
            unique_count: Some(1),
            items: vec![Si {
                t: None,
                r: vec![
                    R {
                        r_pr: None,
                        t: T {
                            xml_space: None,
                            value: "Bold".to_string(),
                        },
                    },
                    R {
                        r_pr: None,
                        t: T {
                            xml_space: None,
                            value: " Normal".to_string(),
                        },
                    },
                ],
            }],
        };

        let table = SharedStringTable::from_sst(&xml_sst);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0), Some("Bold Normal"));
    }

    #[test]
    fn test_sst_default() {
        let table = SharedStringTable::default();
        assert!(table.is_empty());
    }
}
