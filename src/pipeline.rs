//! The per-sheet warp pipeline.
//!
//! A sheet moves through a fixed list of [`Stage`]s. Every stage leaves an
//! artifact in the sheet's working directory, and a rerun continues after
//! the last stage whose artifact is present.

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use image::{codecs::jpeg::JpegEncoder, DynamicImage};
use log::{debug, info};
use serde_json::Map;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::affine::{estimate_resolution, GeoTransform};
use crate::error::Result;
use crate::gk::Projection;
use crate::sheet::SheetGeometry;
use crate::tools::{GdalOptions, ToolRunner};

/// The first warp samples at this fraction of the estimated resolution.
pub const RESOLUTION_FACTOR: f64 = 0.5;

const EXPORT_QUALITY: u8 = 100;

pub const DEFAULT_JPEG_QUALITY: u8 = 50;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Stage {
    /// Decode the scan and store it as an RGB JPEG.
    Export,
    /// Attach projected GCPs.
    Georeference,
    /// Thin-plate-spline warp into the zone CRS.
    FirstWarp,
    /// Reprojection to the display CRS, cropped to the cutline.
    FinalWarp,
    /// Sheet boundary for the index.
    Bounds,
    /// Compressed GeoTIFF for tiling.
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Export,
        Stage::Georeference,
        Stage::FirstWarp,
        Stage::FinalWarp,
        Stage::Bounds,
        Stage::Publish,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Export => "export",
            Stage::Georeference => "georeference",
            Stage::FirstWarp => "first warp",
            Stage::FinalWarp => "final warp",
            Stage::Bounds => "bounds",
            Stage::Publish => "publish",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Root directories of the pipeline outputs.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputLayout {
    pub work_dir: PathBuf,
    pub bounds_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            work_dir: "work".into(),
            bounds_dir: "bounds".into(),
            export_dir: "export/gtiffs".into(),
        }
    }
}

impl OutputLayout {
    pub fn sheet(&self, id: &str) -> SheetPaths {
        let work_dir = self.work_dir.join(id);
        SheetPaths {
            full_image: work_dir.join("full.jpg"),
            georef: work_dir.join("georef.tif"),
            warped: work_dir.join("warped.tif"),
            cutline: work_dir.join("cutline.geojson"),
            final_image: work_dir.join("final.tif"),
            bounds: self.bounds_dir.join(format!("{}.geojsonl", id)),
            export: self.export_dir.join(format!("{}.tif", id)),
            work_dir,
        }
    }
}

/// Every file the pipeline writes for one sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetPaths {
    pub work_dir: PathBuf,
    pub full_image: PathBuf,
    pub georef: PathBuf,
    pub warped: PathBuf,
    pub cutline: PathBuf,
    pub final_image: PathBuf,
    pub bounds: PathBuf,
    pub export: PathBuf,
}

impl SheetPaths {
    /// The file whose existence marks `stage` as done.
    pub fn artifact(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Export => &self.full_image,
            Stage::Georeference => &self.georef,
            Stage::FirstWarp => &self.warped,
            Stage::FinalWarp => &self.final_image,
            Stage::Bounds => &self.bounds,
            Stage::Publish => &self.export,
        }
    }
}

/// How far a sheet has progressed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct JobState {
    pub completed: Option<Stage>,
}

impl JobState {
    /// Reads the state off the filesystem: the last stage with an artifact.
    pub fn inspect(paths: &SheetPaths) -> Self {
        let completed = Stage::ALL
            .iter()
            .rev()
            .find(|s| paths.artifact(**s).exists())
            .copied();
        Self { completed }
    }

    /// Stages still to run, in order.
    pub fn pending(&self) -> Vec<Stage> {
        let first = self.completed.map_or(0, |s| s.index() + 1);
        Stage::ALL[first..].to_vec()
    }

    pub fn advance(&mut self, stage: Stage) {
        self.completed = Some(stage);
    }

    pub fn is_done(&self) -> bool {
        self.completed == Some(Stage::Publish)
    }
}

/// One sheet to process.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetJob {
    pub id: String,
    pub image: PathBuf,
    pub geometry: SheetGeometry,
    /// Properties of the cutline feature.
    pub properties: Map<String, serde_json::Value>,
    pub jpeg_quality: u8,
}

/// Runs the stages of sheet jobs against one projection and tool runner.
pub struct SheetPipeline<'a, P, R> {
    pub gdal: &'a GdalOptions,
    pub projection: &'a P,
    pub runner: &'a R,
}

impl<'a, P: Projection, R: ToolRunner> SheetPipeline<'a, P, R> {
    pub fn new(gdal: &'a GdalOptions, projection: &'a P, runner: &'a R) -> Self {
        Self {
            gdal,
            projection,
            runner,
        }
    }

    /// Runs every stage after the last completed one.
    pub fn run(&self, job: &SheetJob, paths: &SheetPaths) -> Result<JobState> {
        fs::create_dir_all(&paths.work_dir)?;

        let mut state = JobState::inspect(paths);
        if let Some(done) = state.completed {
            debug!("{}: resuming after {}", job.id, done.name());
        }

        for stage in state.pending() {
            info!("{}: {}", job.id, stage.name());
            self.run_stage(stage, job, paths)?;
            state.advance(stage);
        }

        Ok(state)
    }

    fn run_stage(&self, stage: Stage, job: &SheetJob, paths: &SheetPaths) -> Result<()> {
        match stage {
            Stage::Export => export_full_image(&job.image, &paths.full_image),
            Stage::Georeference => {
                let cmd = self.gdal.georeference(
                    &paths.full_image,
                    &paths.georef,
                    &self.projected_gcps(&job.geometry)?,
                    &self.projection.definition(),
                );
                self.runner.run(&cmd)
            }
            Stage::FirstWarp => {
                let res = self.warp_resolution(&job.geometry, &paths.full_image)?;
                debug!("{}: warp resolution {:?}", job.id, res);

                let cmd = self.gdal.first_warp(
                    &paths.georef,
                    &paths.warped,
                    &self.projection.definition(),
                    res,
                );
                self.runner.run(&cmd)
            }
            Stage::FinalWarp => {
                write_cutline(&paths.cutline, &job.geometry.cutline, &job.properties)?;

                let cmd = self.gdal.final_warp(
                    &paths.warped,
                    &paths.final_image,
                    &self.projection.definition(),
                    &paths.cutline,
                );
                self.runner.run(&cmd)
            }
            Stage::Bounds => {
                if !paths.cutline.exists() {
                    write_cutline(&paths.cutline, &job.geometry.cutline, &job.properties)?;
                }
                create_parent(&paths.bounds)?;
                self.runner
                    .run(&self.gdal.bounds(&paths.cutline, &paths.bounds))
            }
            Stage::Publish => {
                create_parent(&paths.export)?;
                self.runner.run(&self.gdal.publish(
                    &paths.final_image,
                    &paths.export,
                    job.jpeg_quality,
                ))
            }
        }
    }

    /// GCPs as `(pixel, projected)` pairs in the working CRS.
    fn projected_gcps(&self, geometry: &SheetGeometry) -> Result<Vec<((f64, f64), (f64, f64))>> {
        geometry
            .gcps
            .iter()
            .map(|g| Ok((g.pixel, self.projection.project(g.geo.0, g.geo.1)?)))
            .collect()
    }

    fn warp_resolution(&self, geometry: &SheetGeometry, full_image: &Path) -> Result<(f64, f64)> {
        let (width, height) = image::image_dimensions(full_image)?;
        let transform = GeoTransform::from_gcps(&self.projected_gcps(geometry)?)?;
        let (x, y) = estimate_resolution(&transform, width, height)?;
        Ok((x * RESOLUTION_FACTOR, y * RESOLUTION_FACTOR))
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Re-encodes a scan as a full quality RGB JPEG.
pub fn export_full_image(src: &Path, dst: &Path) -> Result<()> {
    let rgb = DynamicImage::ImageRgb8(image::open(src)?.into_rgb8());
    let mut out = BufWriter::new(File::create(dst)?);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, EXPORT_QUALITY))?;
    out.flush()?;
    Ok(())
}

/// The cutline as a single-feature GeoJSON collection.
pub fn cutline_geojson(ring: &[(f64, f64)], properties: &Map<String, serde_json::Value>) -> GeoJson {
    let polygon = Value::Polygon(vec![ring.iter().map(|&(x, y)| vec![x, y]).collect()]);

    let feature = Feature {
        bbox: None,
        geometry: Some(Geometry::new(polygon)),
        id: None,
        properties: Some(properties.clone()),
        foreign_members: None,
    };

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features: vec![feature],
        foreign_members: None,
    })
}

fn write_cutline(
    path: &Path,
    ring: &[(f64, f64)],
    properties: &Map<String, serde_json::Value>,
) -> Result<()> {
    fs::write(path, cutline_geojson(ring, properties).to_string())?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ozi::{self, tests::SAMPLE};
    use crate::sheet::SheetOverride;
    use crate::tools::tests::RecordingRunner;
    use image::RgbImage;

    /// Equirectangular stand-in for a zone projection.
    pub(crate) struct LinearProjection;

    impl Projection for LinearProjection {
        fn definition(&self) -> String {
            "+proj=linear".to_owned()
        }

        fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
            Ok((7_500_000.0 + (lon - 39.0) * 62_000.0, lat * 111_000.0))
        }
    }

    fn job(dir: &Path) -> SheetJob {
        let image = dir.join("N37-001.jpg");
        RgbImage::new(42, 34).save(&image).unwrap();

        let cal = ozi::parse(SAMPLE).unwrap();
        let geometry = SheetGeometry::from_calibration(&cal, &SheetOverride::default()).unwrap();

        let mut properties = Map::new();
        properties.insert("maptitle".into(), cal.title.into());

        SheetJob {
            id: "N37-001".into(),
            image,
            geometry,
            properties,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    fn layout(dir: &Path) -> OutputLayout {
        OutputLayout {
            work_dir: dir.join("work"),
            bounds_dir: dir.join("bounds"),
            export_dir: dir.join("export/gtiffs"),
        }
    }

    #[test]
    fn pending_stages_follow_completed() {
        let mut state = JobState::default();
        assert_eq!(state.pending(), Stage::ALL.to_vec());

        state.advance(Stage::FirstWarp);
        assert_eq!(
            state.pending(),
            vec![Stage::FinalWarp, Stage::Bounds, Stage::Publish]
        );

        state.advance(Stage::Publish);
        assert!(state.pending().is_empty());
        assert!(state.is_done());
    }

    #[test]
    fn sheet_paths() {
        let paths = OutputLayout::default().sheet("N37-001");
        assert_eq!(paths.artifact(Stage::Export), Path::new("work/N37-001/full.jpg"));
        assert_eq!(paths.artifact(Stage::FinalWarp), Path::new("work/N37-001/final.tif"));
        assert_eq!(paths.bounds, Path::new("bounds/N37-001.geojsonl"));
        assert_eq!(paths.export, Path::new("export/gtiffs/N37-001.tif"));
    }

    #[test]
    fn runs_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());
        let paths = layout(dir.path()).sheet(&job.id);
        let runner = RecordingRunner::default();
        let gdal = GdalOptions::default();

        let state = SheetPipeline::new(&gdal, &LinearProjection, &runner)
            .run(&job, &paths)
            .unwrap();

        assert!(state.is_done());
        assert_eq!(
            runner.programs(),
            vec!["gdal_translate", "gdalwarp", "gdalwarp", "ogr2ogr", "gdal_translate"]
        );
        for stage in Stage::ALL.iter() {
            assert!(paths.artifact(*stage).exists(), "{}", stage.name());
        }
        assert_eq!(image::image_dimensions(&paths.full_image).unwrap(), (42, 34));

        let commands = runner.commands.borrow();
        assert_eq!(commands[0].args.iter().filter(|a| *a == "-gcp").count(), 4);
        assert!(commands[0].to_string().contains("-a_srs +proj=linear"));
        assert!(commands[4].to_string().contains("JPEG_QUALITY=50"));

        let cutline = fs::read_to_string(&paths.cutline).unwrap();
        let parsed: GeoJson = cutline.parse().unwrap();
        match parsed {
            GeoJson::FeatureCollection(fc) => {
                let props = fc.features[0].properties.as_ref().unwrap();
                assert_eq!(props["maptitle"], "Лист N-37-001");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn resumes_after_last_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());
        let paths = layout(dir.path()).sheet(&job.id);
        fs::create_dir_all(&paths.work_dir).unwrap();
        fs::write(&paths.final_image, b"").unwrap();

        let runner = RecordingRunner::default();
        let gdal = GdalOptions::default();
        SheetPipeline::new(&gdal, &LinearProjection, &runner)
            .run(&job, &paths)
            .unwrap();

        assert_eq!(runner.programs(), vec!["ogr2ogr", "gdal_translate"]);
        assert!(paths.cutline.exists());
        assert!(!paths.full_image.exists());
    }

    #[test]
    fn failed_stage_is_retried_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());
        let paths = layout(dir.path()).sheet(&job.id);
        let gdal = GdalOptions::default();

        let failing = RecordingRunner {
            fail_on: Some("gdalwarp"),
            ..Default::default()
        };
        let err = SheetPipeline::new(&gdal, &LinearProjection, &failing)
            .run(&job, &paths)
            .unwrap_err();
        assert!(matches!(err, Error::ToolFailed { .. }));
        assert_eq!(
            JobState::inspect(&paths).completed,
            Some(Stage::Georeference)
        );

        let runner = RecordingRunner::default();
        SheetPipeline::new(&gdal, &LinearProjection, &runner)
            .run(&job, &paths)
            .unwrap();
        assert_eq!(runner.programs()[0], "gdalwarp");
    }
}
