//! Gauss-Krüger 6° zoning on the Krassovsky ellipsoid, as used by the
//! Soviet military mapping agency.

use proj::Proj;

use crate::error::{projection_error, Result};

/// The only datum accepted in calibration files.
pub const PULKOVO_1942_DATUM: &str = "Pulkovo 1942 (1)";

/// Geographic CRS of the calibration coordinates and cutlines.
pub const PULKOVO_1942_CRS: &str = "EPSG:4284";

/// CRS of the final, tile-ready rasters.
pub const DISPLAY_CRS: &str = "EPSG:3857";

pub const WGS84_CRS: &str = "EPSG:4326";

const TOWGS84: &str = "28,-130,-95,0,0,0,0";

/// Zone number for a longitude in degrees.
///
/// Non-negative longitudes use `floor(lon / 6) + 1`. Negative longitudes
/// are first shifted by 180°.
pub fn zone_for_longitude(lon: f64) -> u32 {
    let zone = if lon < 0.0 {
        ((lon + 180.0) / 6.0).floor() + 1.0
    } else {
        (lon / 6.0).floor() + 1.0
    };
    zone as u32
}

/// Midpoint of the longitude extent of a ring.
pub fn mid_longitude(ring: &[(f64, f64)]) -> f64 {
    let (min, max) = ring
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &(lon, _)| {
            (min.min(lon), max.max(lon))
        });
    (min + max) / 2.0
}

/// A 6° Gauss-Krüger zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GkZone(pub u32);

impl GkZone {
    pub fn for_longitude(lon: f64) -> Self {
        GkZone(zone_for_longitude(lon))
    }

    /// Picks the zone from the middle of a sheet boundary.
    pub fn for_ring(ring: &[(f64, f64)]) -> Self {
        Self::for_longitude(mid_longitude(ring))
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    pub fn central_meridian(&self) -> i64 {
        let cm = (self.0 as i64 - 1) * 6 + 3;
        if cm > 180 {
            cm - 360
        } else {
            cm
        }
    }

    pub fn false_easting(&self) -> i64 {
        self.0 as i64 * 1_000_000 + 500_000
    }

    /// PROJ definition of the zone's transverse Mercator CRS.
    pub fn definition(&self) -> String {
        format!(
            "+proj=tmerc +lat_0=0 +lon_0={} +k=1 +x_0={} +y_0=0 +ellps=krass +towgs84={} +units=m +no_defs +type=crs",
            self.central_meridian(),
            self.false_easting(),
            TOWGS84
        )
    }

    /// PROJ definition of the geographic CRS underlying the zone.
    pub fn geodetic_definition(&self) -> String {
        format!(
            "+proj=longlat +ellps=krass +towgs84={} +no_defs +type=crs",
            TOWGS84
        )
    }
}

/// A map from geographic coordinates into a projected working CRS.
pub trait Projection {
    /// CRS definition handed to external tools.
    fn definition(&self) -> String;

    /// Projects a longitude/latitude pair in degrees.
    fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64)>;
}

/// PROJ-backed projection into one Gauss-Krüger zone.
pub struct ZoneProjection {
    zone: GkZone,
    proj: Proj,
}

impl ZoneProjection {
    pub fn new(zone: GkZone) -> Result<Self> {
        let proj = Proj::new_known_crs(&zone.geodetic_definition(), &zone.definition(), None)
            .map_err(projection_error)?;
        Ok(Self { zone, proj })
    }

    pub fn zone(&self) -> GkZone {
        self.zone
    }
}

impl Projection for ZoneProjection {
    fn definition(&self) -> String {
        self.zone.definition()
    }

    fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        self.proj.convert((lon, lat)).map_err(projection_error)
    }
}

/// Converts coordinate rings between two known CRSs.
pub struct RingTransform {
    proj: Proj,
}

impl RingTransform {
    pub fn new(from: &str, to: &str) -> Result<Self> {
        let proj = Proj::new_known_crs(from, to, None).map_err(projection_error)?;
        Ok(Self { proj })
    }

    pub fn convert(&self, ring: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
        ring.iter()
            .map(|&p| self.proj.convert(p).map_err(projection_error))
            .collect()
    }
}
