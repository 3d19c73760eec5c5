use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::affine::MIN_GCPS;
use crate::error::{Error, Result};
use crate::gk::PULKOVO_1942_DATUM;
use crate::ozi::{self, Calibration, PointRef};

/// A ground control point: a `(col, row)` pixel and its `(lon, lat)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gcp {
    pub pixel: (f64, f64),
    pub geo: (f64, f64),
}

/// A manually measured control point from a special-cases file.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverrideGcp {
    pub x: f64,
    pub y: f64,
    pub lon: f64,
    pub lat: f64,
}

impl From<&OverrideGcp> for Gcp {
    fn from(g: &OverrideGcp) -> Self {
        Gcp {
            pixel: (g.x, g.y),
            geo: (g.lon, g.lat),
        }
    }
}

/// Hand-made corrections for one image, keyed by file name in the
/// special-cases file. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner_gcps: Option<Vec<OverrideGcp>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_gcps: Option<Vec<OverrideGcp>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutline_override: Option<Vec<(f64, f64)>>,

    /// Splits the image into independently processed sheets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<SheetOverride>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jpeg_export_quality: Option<u8>,
}

pub type SpecialCases = HashMap<String, SheetOverride>;

/// Reads a special-cases file; a missing file means no special cases.
pub fn load_special_cases(path: &Path) -> Result<SpecialCases> {
    if !path.exists() {
        return Ok(SpecialCases::new());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Expands an image into `(sheet id, override)` units of work, one per
/// part when the override splits the image.
pub fn expand_parts(id: &str, over: &SheetOverride) -> Vec<(String, SheetOverride)> {
    match &over.parts {
        None => vec![(id.to_owned(), over.clone())],
        Some(parts) => parts
            .iter()
            .enumerate()
            .map(|(i, part)| (format!("{}-part{}", id, i), part.clone()))
            .collect(),
    }
}

/// Everything the warp pipeline needs to know about one sheet's geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetGeometry {
    pub gcps: Vec<Gcp>,
    /// Closed boundary ring in Pulkovo 1942 longitude/latitude.
    pub cutline: Vec<(f64, f64)>,
    /// Calibration title, when the calibration file was read.
    pub title: Option<String>,
}

/// Path of the calibration sidecar of an image.
pub fn calibration_path(image: &Path) -> PathBuf {
    image.with_extension("map")
}

fn closed(mut ring: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
    ring
}

/// Checks the datum and turns calibration points into GCPs.
pub fn calibration_gcps(cal: &Calibration) -> Result<Vec<Gcp>> {
    if cal.datum != PULKOVO_1942_DATUM {
        return Err(Error::UnsupportedDatum(cal.datum.clone()));
    }
    if cal.points.is_empty() {
        return Err(Error::MissingGcps);
    }

    cal.points
        .iter()
        .map(|p| match p.reference {
            PointRef::LatLon { lon, lat } => Ok(Gcp {
                pixel: p.pixel,
                geo: (lon, lat),
            }),
            other => Err(Error::UnsupportedGcpType(other.kind().to_owned())),
        })
        .collect()
}

impl SheetGeometry {
    /// Derives GCPs and cutline for an image.
    ///
    /// Override data wins over the calibration file, which is only read
    /// when no corner GCPs are given.
    pub fn resolve(image: &Path, over: &SheetOverride) -> Result<Self> {
        if let Some(corners) = &over.corner_gcps {
            let gcps: Vec<Gcp> = corners
                .iter()
                .chain(over.other_gcps.iter().flatten())
                .map(Gcp::from)
                .collect();

            let cutline = match &over.cutline_override {
                Some(c) => c.clone(),
                None => corners.iter().map(|g| (g.lon, g.lat)).collect(),
            };

            return Self::checked(gcps, cutline, None);
        }

        let cal = ozi::read(&calibration_path(image))?;
        Self::from_calibration(&cal, over)
    }

    pub fn from_calibration(cal: &Calibration, over: &SheetOverride) -> Result<Self> {
        let gcps = calibration_gcps(cal)?;

        let cutline = match &over.cutline_override {
            Some(c) => c.clone(),
            None => cal.cutline.clone(),
        };
        Self::checked(gcps, cutline, Some(cal.title.clone()))
    }

    /// Rejects geometries the warp cannot use, before any tool runs.
    fn checked(gcps: Vec<Gcp>, cutline: Vec<(f64, f64)>, title: Option<String>) -> Result<Self> {
        if gcps.len() < MIN_GCPS {
            return Err(Error::TooFewGcps {
                needed: MIN_GCPS,
                got: gcps.len(),
            });
        }

        let cutline = closed(cutline);
        // a closed triangle has four points
        if cutline.len() < 4 {
            return Err(Error::MalformedCalibration(
                "boundary has fewer than three points".to_owned(),
            ));
        }

        Ok(SheetGeometry {
            gcps,
            cutline,
            title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ozi::tests::SAMPLE;

    #[test]
    fn calibration_geometry() {
        let cal = ozi::parse(SAMPLE).unwrap();
        let geom = SheetGeometry::from_calibration(&cal, &SheetOverride::default()).unwrap();
        assert_eq!(geom.gcps.len(), 4);
        assert_eq!(geom.cutline.len(), 5);
        assert_eq!(geom.cutline.first(), geom.cutline.last());
        assert_eq!(geom.title.as_deref(), Some("Лист N-37-001"));
    }

    #[test]
    fn other_datums_are_rejected() {
        let mut cal = ozi::parse(SAMPLE).unwrap();
        cal.datum = "WGS 84".to_owned();
        match SheetGeometry::from_calibration(&cal, &SheetOverride::default()) {
            Err(Error::UnsupportedDatum(d)) => assert_eq!(d, "WGS 84"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn grid_points_are_rejected() {
        let mut cal = ozi::parse(SAMPLE).unwrap();
        cal.points[0].reference = PointRef::Grid {
            easting: 1.0,
            northing: 2.0,
        };
        assert!(matches!(
            calibration_gcps(&cal),
            Err(Error::UnsupportedGcpType(_))
        ));
    }

    #[test]
    fn corner_gcps_take_precedence() {
        let over: SheetOverride = serde_json::from_str(
            r#"{
                "corner_gcps": [
                    {"x": 0, "y": 0, "lon": 10.0, "lat": 50.0},
                    {"x": 100, "y": 0, "lon": 10.5, "lat": 50.0},
                    {"x": 100, "y": 80, "lon": 10.5, "lat": 49.8},
                    {"x": 0, "y": 80, "lon": 10.0, "lat": 49.8}
                ],
                "other_gcps": [{"x": 50, "y": 40, "lon": 10.25, "lat": 49.9}]
            }"#,
        )
        .unwrap();

        // no calibration file exists at this path
        let geom = SheetGeometry::resolve(Path::new("/nonexistent/x.gif"), &over).unwrap();
        assert_eq!(geom.gcps.len(), 5);
        assert_eq!(geom.cutline.len(), 5);
        assert_eq!(geom.cutline[0], (10.0, 50.0));
        assert_eq!(geom.title, None);
    }

    #[test]
    fn two_corner_gcps_are_too_few() {
        let over: SheetOverride = serde_json::from_str(
            r#"{
                "corner_gcps": [
                    {"x": 0, "y": 0, "lon": 10.0, "lat": 50.0},
                    {"x": 100, "y": 80, "lon": 10.5, "lat": 49.8}
                ]
            }"#,
        )
        .unwrap();

        assert!(matches!(
            SheetGeometry::resolve(Path::new("/nonexistent/x.gif"), &over),
            Err(Error::TooFewGcps { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn short_cutline_override_is_rejected() {
        let cal = ozi::parse(SAMPLE).unwrap();
        let over = SheetOverride {
            cutline_override: Some(vec![(36.0, 56.0), (36.2, 56.0)]),
            ..Default::default()
        };
        assert!(matches!(
            SheetGeometry::from_calibration(&cal, &over),
            Err(Error::MalformedCalibration(_))
        ));
    }

    #[test]
    fn cutline_override_wins() {
        let cal = ozi::parse(SAMPLE).unwrap();
        let over = SheetOverride {
            cutline_override: Some(vec![(36.0, 56.0), (36.2, 56.0), (36.2, 55.8), (36.0, 56.0)]),
            ..Default::default()
        };
        let geom = SheetGeometry::from_calibration(&cal, &over).unwrap();
        assert_eq!(geom.cutline.len(), 4);
        assert_eq!(geom.cutline[1], (36.2, 56.0));
    }

    #[test]
    fn parts_expand_to_numbered_sheets() {
        let over = SheetOverride {
            parts: Some(vec![SheetOverride::default(), SheetOverride::default()]),
            ..Default::default()
        };
        let ids: Vec<String> = expand_parts("Q01-001", &over)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["Q01-001-part0", "Q01-001-part1"]);
        assert_eq!(expand_parts("Q01-001", &SheetOverride::default()).len(), 1);
    }
}
