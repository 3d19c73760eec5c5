//! Reader for OziExplorer `.map` calibration files.
//!
//! Only the parts needed for georeferencing are read: title, image name,
//! datum, calibration points, the moving-map boundary in pixel and
//! geographic space, and the image size.

use encoding_rs::WINDOWS_1251;
use std::{fs, path::Path};

use crate::error::{Error, Result};

const HEADER: &str = "OziExplorer Map Data File";

/// The kind of reference coordinate a calibration point carries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointRef {
    /// Geographic longitude/latitude in degrees.
    LatLon { lon: f64, lat: f64 },
    /// Projected grid easting/northing.
    Grid { easting: f64, northing: f64 },
}

impl PointRef {
    pub fn kind(&self) -> &'static str {
        match self {
            PointRef::LatLon { .. } => "latlon",
            PointRef::Grid { .. } => "grid",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationPoint {
    pub pixel: (f64, f64),
    pub reference: PointRef,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Calibration {
    pub title: String,
    pub image_file: String,
    pub datum: String,
    pub points: Vec<CalibrationPoint>,
    /// Boundary in image pixels (`MMPXY`).
    pub cutline_pixels: Vec<(f64, f64)>,
    /// Boundary as longitude/latitude (`MMPLL`).
    pub cutline: Vec<(f64, f64)>,
    pub image_size: Option<(u32, u32)>,
}

/// Decodes a cp1251 calibration file from disk.
pub fn read(path: &Path) -> Result<Calibration> {
    let bytes = fs::read(path)?;
    let (text, _, _) = WINDOWS_1251.decode(&bytes);
    parse(&text)
}

fn field<'a>(fields: &[&'a str], idx: usize) -> &'a str {
    fields.get(idx).map(|f| f.trim()).unwrap_or("")
}

fn number(s: &str) -> Option<f64> {
    if s.is_empty() {
        None
    } else {
        s.parse().ok()
    }
}

fn malformed(line: &str) -> Error {
    Error::MalformedCalibration(format!("cannot parse line {:?}", line))
}

fn degrees(deg: &str, min: &str, hemisphere: &str, negative: &str) -> Option<f64> {
    let value = number(deg)? + number(min).unwrap_or(0.0) / 60.0;
    if hemisphere.eq_ignore_ascii_case(negative) {
        Some(-value)
    } else {
        Some(value)
    }
}

fn parse_point(fields: &[&str]) -> Option<CalibrationPoint> {
    let x = number(field(fields, 2))?;
    let y = number(field(fields, 3))?;

    let lat = degrees(field(fields, 6), field(fields, 7), field(fields, 8), "S");
    let lon = degrees(field(fields, 9), field(fields, 10), field(fields, 11), "W");

    let reference = match (lon, lat) {
        (Some(lon), Some(lat)) => PointRef::LatLon { lon, lat },
        _ => {
            let easting = number(field(fields, 14))?;
            let northing = number(field(fields, 15))?;
            PointRef::Grid { easting, northing }
        }
    };

    Some(CalibrationPoint {
        pixel: (x, y),
        reference,
    })
}

/// Parses the decoded contents of a calibration file.
pub fn parse(text: &str) -> Result<Calibration> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();

    match lines.first() {
        Some(first) if first.starts_with(HEADER) => {}
        _ => {
            return Err(Error::MalformedCalibration(
                "missing OziExplorer header".to_owned(),
            ))
        }
    }
    if lines.len() < 5 {
        return Err(Error::MalformedCalibration("file is truncated".to_owned()));
    }

    let mut cal = Calibration {
        title: lines[1].trim().to_owned(),
        image_file: lines[2].trim().to_owned(),
        datum: field(&lines[4].split(',').collect::<Vec<_>>(), 0).to_owned(),
        ..Default::default()
    };

    for line in &lines[5..] {
        let fields: Vec<&str> = line.split(',').collect();
        let key = field(&fields, 0);

        if key.starts_with("Point") {
            // unused point slots have empty pixel fields
            if let Some(point) = parse_point(&fields) {
                cal.points.push(point);
            }
        } else if key == "MMPXY" {
            let x = number(field(&fields, 2)).ok_or_else(|| malformed(line))?;
            let y = number(field(&fields, 3)).ok_or_else(|| malformed(line))?;
            cal.cutline_pixels.push((x, y));
        } else if key == "MMPLL" {
            let lon = number(field(&fields, 2)).ok_or_else(|| malformed(line))?;
            let lat = number(field(&fields, 3)).ok_or_else(|| malformed(line))?;
            cal.cutline.push((lon, lat));
        } else if key == "IWH" {
            let w = field(&fields, 2).parse().map_err(|_| malformed(line))?;
            let h = field(&fields, 3).parse().map_err(|_| malformed(line))?;
            cal.image_size = Some((w, h));
        }
    }

    Ok(cal)
}

/// Replaces the image file reference inside a cp1251 calibration file.
pub fn rename_image_reference(content: &[u8], from: &str, to: &str) -> Vec<u8> {
    let (text, _, _) = WINDOWS_1251.decode(content);
    let replaced = text.replace(from, to);
    let (bytes, _, _) = WINDOWS_1251.encode(&replaced);
    bytes.into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = "OziExplorer Map Data File Version 2.2\r
Лист N-37-001\r
N-37-001.gif\r
1 ,Map Code,\r
Pulkovo 1942 (1),WGS 84,   0.0000,   0.0000,WGS 84\r
Reserved 1\r
Reserved 2\r
Magnetic Variation,,,E\r
Map Projection,Transverse Mercator,PolyCal,No,AutoCalOnly,No,BSBUseWPX,No\r
Point01,xy,  100,  200,in, deg,  56, 0.0000,N,  36, 0.0000,E, grid,   ,           ,           ,N\r
Point02,xy, 4100,  200,in, deg,  56, 0.0000,N,  36, 30.0000,E, grid,   ,           ,           ,N\r
Point03,xy, 4100, 3200,in, deg,  55, 40.0000,N,  36, 30.0000,E, grid,   ,           ,           ,N\r
Point04,xy,  100, 3200,in, deg,  55, 40.0000,N,  36, 0.0000,E, grid,   ,           ,           ,N\r
Point05,xy,     ,     ,in, deg,    ,        ,N,    ,        ,E, grid,   ,           ,           ,N\r
Projection Setup,,,,,,,,,,\r
MM0,Yes\r
MMPNUM,4\r
MMPXY,1,100,200\r
MMPXY,2,4100,200\r
MMPXY,3,4100,3200\r
MMPXY,4,100,3200\r
MMPLL,1,  36.000000,  56.000000\r
MMPLL,2,  36.500000,  56.000000\r
MMPLL,3,  36.500000,  55.666667\r
MMPLL,4,  36.000000,  55.666667\r
MM1B,10.000000\r
MOP,Map Open Position,0,0\r
IWH,Map Image Width/Height,4200,3400\r
";

    #[test]
    fn parses_sample() {
        let cal = parse(SAMPLE).unwrap();
        assert_eq!(cal.title, "Лист N-37-001");
        assert_eq!(cal.image_file, "N-37-001.gif");
        assert_eq!(cal.datum, "Pulkovo 1942 (1)");
        assert_eq!(cal.points.len(), 4);
        assert_eq!(cal.points[1].pixel, (4100.0, 200.0));
        assert_eq!(
            cal.points[1].reference,
            PointRef::LatLon { lon: 36.5, lat: 56.0 }
        );
        assert_eq!(cal.cutline.len(), 4);
        assert_eq!(cal.cutline_pixels[2], (4100.0, 3200.0));
        assert_eq!(cal.image_size, Some((4200, 3400)));
    }

    #[test]
    fn southern_and_western_hemispheres_are_negative() {
        let fields: Vec<&str> =
            "Point01,xy, 1, 2,in, deg, 10, 30.0,S, 170, 15.0,W, grid, , , ,N"
                .split(',')
                .collect();
        let p = parse_point(&fields).unwrap();
        assert_eq!(
            p.reference,
            PointRef::LatLon {
                lon: -170.25,
                lat: -10.5
            }
        );
    }

    #[test]
    fn grid_points_are_recognized() {
        let fields: Vec<&str> =
            "Point01,xy, 1, 2,in, deg, , ,N, , ,E, grid, 37, 7500000, 6200000,N"
                .split(',')
                .collect();
        let p = parse_point(&fields).unwrap();
        assert_eq!(p.reference.kind(), "grid");
    }

    #[test]
    fn rejects_other_files() {
        assert!(parse("hello\nworld").is_err());
    }

    #[test]
    fn renames_image_reference_in_cp1251() {
        let (encoded, _, _) = WINDOWS_1251.encode(SAMPLE);
        let renamed = rename_image_reference(&encoded, "N-37-001.gif", "N37-001.gif");
        let (text, _, _) = WINDOWS_1251.decode(&renamed);
        assert!(text.contains("\nN37-001.gif\r"));
        assert!(text.contains("Лист N-37-001"));
    }
}
