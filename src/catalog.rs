use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use crate::error::Result;

/// Source metadata for one sheet (or a group of sheets printed together).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the image inside the source archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Whether calibration files exist locally for every member sheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_exists: Option<bool>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SheetRecord {
    /// The record as a flat JSON object, used as feature properties.
    pub fn properties(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Map from canonical sheet id to its source record, kept sorted so the
/// written JSON diffs cleanly between runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    pub sheets: BTreeMap<String, SheetRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let sheets = serde_json::from_str(text)?;
        Ok(Self { sheets })
    }

    /// Serializes with sorted keys at every nesting level.
    pub fn to_json(&self) -> Result<String> {
        // going through `Value` sorts the record fields as well
        let value = serde_json::to_value(&self.sheets)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn insert(&mut self, id: String, record: SheetRecord) {
        self.sheets.insert(id, record);
    }

    pub fn get(&self, id: &str) -> Option<&SheetRecord> {
        self.sheets.get(id)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// All single-sheet ids, with multi-sheet keys (`A_B`) split apart.
    pub fn member_ids(&self) -> BTreeSet<String> {
        self.owners().into_keys().collect()
    }

    /// Maps every single-sheet id to the catalog key that contains it.
    pub fn owners(&self) -> BTreeMap<String, String> {
        let mut owners = BTreeMap::new();
        for key in self.sheets.keys() {
            for member in key.split('_') {
                owners.insert(member.to_owned(), key.clone());
            }
        }
        owners
    }
}

/// A sheet present in one catalog but absent from another.
#[derive(Clone, Debug, PartialEq)]
pub struct MissingSheet {
    pub member: String,
    pub owner: String,
    pub map_exists: Option<bool>,
}

/// Sheets of `a` (split into members) that no key of `b` covers.
pub fn missing_sheets(a: &Catalog, b: &Catalog) -> Vec<MissingSheet> {
    let owners = a.owners();
    let present = b.member_ids();

    owners
        .into_iter()
        .filter(|(member, _)| !present.contains(member))
        .map(|(member, owner)| {
            let map_exists = a.get(&owner).and_then(|r| r.map_exists);
            MissingSheet {
                member,
                owner,
                map_exists,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(map_exists: bool) -> SheetRecord {
        SheetRecord {
            url: Some("https://example.org/x.jpg".into()),
            map_exists: Some(map_exists),
            ..Default::default()
        }
    }

    fn catalog(keys: &[&str]) -> Catalog {
        let mut c = Catalog::new();
        for k in keys {
            c.insert((*k).to_owned(), record(true));
        }
        c
    }

    #[test]
    fn identical_catalogs_have_no_gaps() {
        let a = catalog(&["M37-001", "Q39-013_Q39-014"]);
        let b = a.clone();
        assert!(missing_sheets(&a, &b).is_empty());
    }

    #[test]
    fn missing_members_are_reported_with_owner() {
        let a = catalog(&["M37-001", "Q39-013_Q39-014"]);
        let b = catalog(&["M37-001", "Q39-013"]);
        let missing = missing_sheets(&a, &b);
        assert_eq!(
            missing,
            vec![MissingSheet {
                member: "Q39-014".into(),
                owner: "Q39-013_Q39-014".into(),
                map_exists: Some(true),
            }]
        );
    }

    #[test]
    fn json_keys_are_sorted() {
        let mut c = Catalog::new();
        c.insert("B".into(), record(false));
        c.insert("A".into(), record(true));
        let json = c.to_json().unwrap();
        assert!(json.find("\"A\"").unwrap() < json.find("\"B\"").unwrap());
        assert!(json.find("\"map_exists\"").unwrap() < json.find("\"url\"").unwrap());
        assert_eq!(Catalog::from_json(&json).unwrap(), c);
    }

    #[test]
    fn unknown_fields_survive() {
        let c = Catalog::from_json(r#"{"X": {"url": "u", "scale": 100000}}"#).unwrap();
        let rec = c.get("X").unwrap();
        assert_eq!(rec.extra["scale"], serde_json::json!(100000));
        assert_eq!(rec.properties()["url"], serde_json::json!("u"));
    }
}
