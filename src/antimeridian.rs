//! Splitting of sheet boundaries that straddle the 180° meridian.

use geo::{
    coord,
    line_intersection::{line_intersection, LineIntersection},
    orient::{Direction, Orient},
    BooleanOps, Line, LineString, Polygon, Rect,
};
use log::warn;
use std::{collections::BTreeMap, path::Path};

use crate::error::{Error, Result};
use crate::gk::{RingTransform, PULKOVO_1942_CRS, WGS84_CRS};
use crate::ozi;
use crate::sheet::{calibration_path, SheetOverride};

type Ring = Vec<(f64, f64)>;

fn open_ring(ring: &[(f64, f64)]) -> &[(f64, f64)] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Whether a ring has no self-intersections. Adjacent edges may only share
/// their common vertex; repeated consecutive vertices are ignored.
pub fn is_simple(ring: &[(f64, f64)]) -> bool {
    let mut points = open_ring(ring).to_vec();
    points.dedup();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    let n = points.len();
    if n < 3 {
        return false;
    }

    let edges: Vec<Line<f64>> = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            Line::new(coord! { x: a.0, y: a.1 }, coord! { x: b.0, y: b.1 })
        })
        .collect();

    for i in 0..n {
        for j in i + 1..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => return false,
            }
        }
    }
    true
}

/// Rotates a closed ring to start at its northernmost vertex, the western
/// one on ties, and closes it again.
pub fn start_at_top_left(ring: &[(f64, f64)]) -> Ring {
    let points = open_ring(ring);
    let start = points
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, (f64, f64))>, (i, &p)| match best {
            Some((_, b)) if p.1 < b.1 || (p.1 == b.1 && p.0 >= b.0) => best,
            _ => Some((i, p)),
        })
        .map_or(0, |(i, _)| i);

    let mut rotated: Ring = points[start..].iter().chain(&points[..start]).copied().collect();
    if let Some(&first) = rotated.first() {
        rotated.push(first);
    }
    rotated
}

fn shift_east(lon: f64) -> f64 {
    if lon < 0.0 {
        lon + 360.0
    } else {
        lon
    }
}

fn shift_back(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

fn half_plane(west: f64, east: f64) -> Polygon<f64> {
    Rect::new(coord! { x: west, y: -90.0 }, coord! { x: east, y: 90.0 }).to_polygon()
}

/// Splits a WGS 84 ring at the antimeridian.
///
/// Longitudes are moved into `[0, 360)` first. A ring that does not cross
/// 180° comes back as its only part; otherwise each side becomes a
/// counter-clockwise part. Parts are moved back to `[-180, 180]` and start
/// at their top-left vertex. Rings that self-intersect after the shift are
/// rejected with [`Error::InvalidPolygon`].
pub fn split_at_antimeridian(ring: &[(f64, f64)]) -> Result<Vec<Ring>> {
    let shifted: Ring = ring.iter().map(|&(lon, lat)| (shift_east(lon), lat)).collect();
    if !is_simple(&shifted) {
        return Err(Error::InvalidPolygon);
    }

    let crosses = shifted.iter().any(|p| p.0 < 180.0) && shifted.iter().any(|p| p.0 > 180.0);
    let pieces: Vec<Ring> = if crosses {
        let mut exterior = shifted;
        exterior.dedup();
        let polygon = Polygon::new(LineString::from(exterior), vec![]);
        [half_plane(0.0, 180.0), half_plane(180.0, 360.0)]
            .iter()
            .flat_map(|half| polygon.intersection(half).0)
            .map(|part| {
                part.orient(Direction::Default)
                    .exterior()
                    .points()
                    .map(|p| p.x_y())
                    .collect()
            })
            .collect()
    } else {
        vec![shifted]
    };

    Ok(pieces
        .iter()
        .map(|piece| {
            let back: Ring = piece.iter().map(|&(lon, lat)| (shift_back(lon), lat)).collect();
            start_at_top_left(&back)
        })
        .filter(|part| part.len() > 1)
        .collect())
}

/// Builds split overrides for the calibration cutlines of `names`.
///
/// `to_wgs84` and `from_wgs84` move rings between the calibration datum
/// and WGS 84. Sheets without a readable calibration file or with an
/// invalid boundary are skipped with a warning.
pub fn split_overrides<F, G>(
    names: &[String],
    raw_dir: &Path,
    to_wgs84: F,
    from_wgs84: G,
) -> Result<BTreeMap<String, SheetOverride>>
where
    F: Fn(&[(f64, f64)]) -> Result<Ring>,
    G: Fn(&[(f64, f64)]) -> Result<Ring>,
{
    let mut overrides = BTreeMap::new();

    for name in names {
        let image = raw_dir.join(name);
        let map_path = calibration_path(&image);
        if !map_path.exists() {
            warn!("Map file not found for {}", name);
            continue;
        }

        let cutline = match ozi::read(&map_path) {
            Ok(cal) if !cal.cutline.is_empty() => cal.cutline,
            Ok(_) => continue,
            Err(e) => {
                warn!("Error reading map file {}: {}", map_path.display(), e);
                continue;
            }
        };

        let parts = match split_at_antimeridian(&to_wgs84(&cutline)?) {
            Ok(parts) => parts,
            Err(Error::InvalidPolygon) => {
                warn!(
                    "Invalid polygon for {} after longitude normalization, skipping split",
                    name
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        let parts = parts
            .iter()
            .map(|part| {
                Ok(SheetOverride {
                    cutline_override: Some(from_wgs84(part)?),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>>>()?;

        overrides.insert(
            name.clone(),
            SheetOverride {
                parts: Some(parts),
                ..Default::default()
            },
        );
    }

    Ok(overrides)
}

/// [`split_overrides`] with PROJ transforms between Pulkovo 1942 and WGS 84.
pub fn antimeridian_overrides(
    names: &[String],
    raw_dir: &Path,
) -> Result<BTreeMap<String, SheetOverride>> {
    let to_wgs84 = RingTransform::new(PULKOVO_1942_CRS, WGS84_CRS)?;
    let from_wgs84 = RingTransform::new(WGS84_CRS, PULKOVO_1942_CRS)?;
    split_overrides(
        names,
        raw_dir,
        |r| to_wgs84.convert(r),
        |r| from_wgs84.convert(r),
    )
}
