use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NORMALIZED_HEAD: Regex = Regex::new(r"^[A-Z]\d+$").unwrap();
    static ref NORMALIZED_MEMBER: Regex = Regex::new(r"^[A-Z]\d+(-|$)").unwrap();
    static ref K50_RAW_ID: Regex =
        Regex::new(r"^[a-zA-Z]-\d{2}-\d{3}-\d(_\d+)*$").unwrap();
    static ref K100_RAW_ID: Regex =
        Regex::new(r"^[a-zA-Z]-\d{2}-\d{3}(_\d+)*$").unwrap();
    static ref ARCHIVE_ID_PART: Regex = Regex::new(r"^([a-zA-Z]\d{2}-)([\d_]+)$").unwrap();
    static ref YEAR_IN_PARENS: Regex = Regex::new(r"\((\d{4}(?:-\d{4})?)\)").unwrap();
    static ref YEAR_IN_UNDERSCORES: Regex = Regex::new(r"_(\d{4}(?:-\d{4})?)_").unwrap();
}

/// Map series whose raw listing identifiers we know how to recognize.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Series {
    /// 1:50k, e.g. `m-37-001-1` or `q-39-013-1_2`
    K50,
    /// 1:100k, e.g. `m-37-001` or `q-39-013_014`
    K100,
}

impl Series {
    /// Whether `raw` is a listing identifier of this series.
    pub fn matches(&self, raw: &str) -> bool {
        match self {
            Series::K50 => K50_RAW_ID.is_match(raw),
            Series::K100 => K100_RAW_ID.is_match(raw),
        }
    }
}

impl std::str::FromStr for Series {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "50k" | "k50" => Ok(Series::K50),
            "100k" | "k100" => Ok(Series::K100),
            _ => Err("unrecognized series"),
        }
    }
}

fn normalize_single(sid: &str) -> String {
    let sid = sid.to_uppercase();
    let parts: Vec<&str> = sid.split('-').collect();

    // already merged heads (`M37`) stay as they are
    if parts.len() < 2 || NORMALIZED_HEAD.is_match(parts[0]) {
        return sid;
    }

    let head = format!("{}{}", parts[0], parts[1]);
    if parts.len() > 2 {
        format!("{}-{}", head, parts[2..].join("-"))
    } else {
        head
    }
}

/// Normalizes a raw catalog sheet identifier.
///
/// The series letter and zone digits are merged into one token and
/// underscore-joined sub-sheet lists are expanded into full identifiers
/// that share the prefix of the first one. Members that already start
/// with a merged head (`Q39-014`) are kept, so normalized ids map to
/// themselves.
///
/// # Example
/// ```rust
/// # use topo_sheets::sheet_id::normalize;
/// assert_eq!(normalize("m-37-001-1"), "M37-001-1");
/// assert_eq!(normalize("q-39-013_014"), "Q39-013_Q39-014");
/// assert_eq!(normalize("Q39-013_Q39-014"), "Q39-013_Q39-014");
/// ```
pub fn normalize(raw: &str) -> String {
    if !raw.contains('_') {
        return normalize_single(raw);
    }

    let mut parts = raw.split('_');
    let base = parts.next().unwrap_or_default();
    let prefix = base.rsplit_once('-').map(|(p, _)| p).unwrap_or(base);

    let mut normalized = vec![normalize_single(base)];
    for part in parts {
        if NORMALIZED_MEMBER.is_match(part) {
            normalized.push(normalize_single(part));
        } else {
            normalized.push(normalize_single(&format!("{}-{}", prefix, part)));
        }
    }

    normalized.join("_")
}

/// Expands a raw underscore-joined identifier into its member identifiers,
/// still in raw form (`q-39-013_014` → `q-39-013`, `q-39-014`).
pub fn raw_members(raw: &str) -> Vec<String> {
    let mut parts = raw.split('_');
    let base = parts.next().unwrap_or_default();
    let prefix = base.rsplit_once('-').map(|(p, _)| p).unwrap_or(base);

    std::iter::once(base.to_owned())
        .chain(parts.map(|p| format!("{}-{}", prefix, p)))
        .collect()
}

/// Extracts sheet identifiers from one `--` separated part of an archive
/// member or archive name (`l37-129` → `L37-129`, `p35-143_144` →
/// `P35-143`, `P35-144`). Parts that are not entirely an identifier yield
/// nothing.
pub fn ids_from_archive_part(part: &str) -> Vec<String> {
    let caps = match ARCHIVE_ID_PART.captures(part) {
        Some(caps) => caps,
        None => return Vec::new(),
    };

    let prefix = caps[1].to_uppercase();
    caps[2]
        .split('_')
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .map(|n| format!("{}{}", prefix, n))
        .collect()
}

/// Extracts a year or a year range like `(1980)`, `(1980-1985)`, `_1980_`.
pub fn extract_year(text: &str) -> Option<String> {
    YEAR_IN_PARENS
        .captures(text)
        .or_else(|| YEAR_IN_UNDERSCORES.captures(text))
        .map(|caps| caps[1].to_owned())
}

/// Collapses `1980-1980` to `1980`; other values are returned unchanged.
pub fn collapse_year_range(year: &str) -> String {
    match year.split_once('-') {
        Some((from, to)) if from == to => from.to_owned(),
        _ => year.to_owned(),
    }
}

/// The first year of a year or year range, used to compare editions.
pub fn first_year(year: &str) -> Option<u32> {
    year.split('-').next().and_then(|y| y.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_single_ids() {
        assert_eq!(normalize("m-37-001-1"), "M37-001-1");
        assert_eq!(normalize("k-37-144"), "K37-144");
        assert_eq!(normalize("n-37"), "N37");
        assert_eq!(normalize("N37"), "N37");
    }

    #[test]
    fn expands_sub_sheet_lists() {
        assert_eq!(normalize("q-39-013_014"), "Q39-013_Q39-014");
        assert_eq!(
            normalize("r-45-097-3_4"),
            "R45-097-3_R45-097-4"
        );
        assert_eq!(
            normalize("r-45-097-1_2_3"),
            "R45-097-1_R45-097-2_R45-097-3"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in &[
            "m-37-001-1",
            "q-39-013_014",
            "r-45-097-1_2_3",
            "k-37-144",
            "N37",
            "u-4-1",
            "m_1",
            "q-39-013-1_014-2",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {}", raw);
        }
    }

    #[test]
    fn recognizes_series_grammar() {
        assert!(Series::K50.matches("m-37-001-1"));
        assert!(Series::K50.matches("q-39-013-1_2"));
        assert!(!Series::K50.matches("m-37-001"));
        assert!(Series::K100.matches("q-39-013_014"));
        assert!(!Series::K100.matches("about"));
    }

    #[test]
    fn raw_members_reapply_prefix() {
        assert_eq!(raw_members("q-39-013_014"), vec!["q-39-013", "q-39-014"]);
        assert_eq!(raw_members("m-48-033"), vec!["m-48-033"]);
    }

    #[test]
    fn archive_parts() {
        assert_eq!(ids_from_archive_part("l37-129"), vec!["L37-129"]);
        assert_eq!(
            ids_from_archive_part("p35-143_144"),
            vec!["P35-143", "P35-144"]
        );
        assert!(ids_from_archive_part("l37-129-extra").is_empty());
        assert!(ids_from_archive_part("(1980)").is_empty());
    }

    #[test]
    fn years() {
        assert_eq!(extract_year("sheet (1980)").as_deref(), Some("1980"));
        assert_eq!(extract_year("x_1975-1981_y").as_deref(), Some("1975-1981"));
        assert_eq!(extract_year("no year"), None);
        assert_eq!(collapse_year_range("1980-1980"), "1980");
        assert_eq!(collapse_year_range("1980-1985"), "1980-1985");
        assert_eq!(first_year("1980-1985"), Some(1980));
    }
}
