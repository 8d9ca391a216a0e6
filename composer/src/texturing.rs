use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbImage;
use log::info;
use serde::Serialize;
use structopt::StructOpt;

use crate::import_obj::read_obj_mesh_from_file;
use crate::texture::*;
use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use base::tr;
use base::util::fs;

#[derive(StructOpt)]
#[structopt(about = "Select a view for every face of the mesh")]
pub struct SelectViewsParams {
    #[structopt(help = "Input .obj mesh file")]
    mesh_path: PathBuf,
    #[structopt(help = "Input data costs .tr file")]
    data_costs_path: PathBuf,
    #[structopt(help = "Output labeling .tr file", long, short = "o")]
    out_path: PathBuf,
    #[structopt(flatten)]
    texturing_params: TexturingParams,
    #[structopt(flatten)]
    tr_write_params: tr::WriterParams,
}

pub fn select_views_with_params(params: &SelectViewsParams) -> Result<()> {
    info!("Reading mesh...");
    let mesh = read_obj_mesh_from_file(&params.mesh_path)?;
    info!("Reading data costs...");
    let costs = DataCostTable::load_from_file(&params.data_costs_path)?;

    info!("Selecting views...");
    let texturing = &params.texturing_params;
    texturing.validate()?;
    let topo = MeshTopology::new(&mesh);
    let mut graph = Graph::build(
        &mesh,
        &topo,
        costs.num_views(),
        texturing.edge_weighting,
    );
    let report = select_views(
        &costs,
        &mut graph,
        texturing.smoothness,
        texturing.max_selection_passes,
    )?;
    info!(
        "  energy {} -> {} in {} passes",
        report.initial_energy,
        report.final_energy(),
        report.passes
    );

    info!("Writing labeling...");
    save_labeling_to_file(
        graph.labels(),
        &params.out_path,
        &params.tr_write_params,
    )
}

#[derive(Debug, StructOpt)]
#[structopt(about = "Texture the mesh with the scene views")]
pub struct TextureParams {
    #[structopt(help = "Input .obj mesh file")]
    mesh_path: PathBuf,
    #[structopt(help = "Input scene .json file")]
    scene_path: PathBuf,
    #[structopt(help = "Prefix of output files")]
    out_prefix: String,
    #[structopt(
        name = "data-costs",
        help = "Input data costs .tr file",
        long,
        required_unless = "labeling",
        conflicts_with = "labeling"
    )]
    data_costs_path: Option<PathBuf>,
    #[structopt(name = "labeling", help = "Input labeling .tr file", long)]
    labeling_path: Option<PathBuf>,
    #[structopt(help = "Also write the labeling and the data costs", long)]
    write_intermediate_results: bool,
    #[structopt(help = "Write stage timings as CSV", long)]
    write_timings: bool,
    #[structopt(flatten)]
    texturing_params: TexturingParams,
    #[structopt(flatten)]
    tr_write_params: tr::WriterParams,
}

// Wall-clock duration of every finished stage.
struct StageTimer {
    start: Instant,
    last: Instant,
    stages: Vec<(&'static str, f64)>,
}

impl StageTimer {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            stages: Vec::new(),
        }
    }

    fn measure(&mut self, stage: &'static str) {
        let now = Instant::now();
        let secs = (now - self.last).as_secs_f64();
        self.stages.push((stage, secs));
        self.last = now;
    }

    fn to_csv(&self) -> String {
        let mut csv = String::from("stage,seconds\n");
        for (stage, secs) in &self.stages {
            csv += &format!("{},{:.6}\n", stage, secs);
        }
        let total = (self.last - self.start).as_secs_f64();
        csv += &format!("total,{:.6}\n", total);
        csv
    }
}

// Fails unless the directory the output files go to already exists.
fn check_out_prefix(prefix: &str) -> Result<()> {
    let dir = match Path::new(prefix).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(Error::new(
            IoError,
            format!("output directory '{}' does not exist", dir.display()),
        ));
    }
    Ok(())
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::create_file(path)?
        .write_all(text.as_bytes())
        .res(|| format!("failed to write '{}'", path.display()))
}

pub fn texture_with_params(params: &TextureParams) -> Result<()> {
    check_out_prefix(&params.out_prefix)?;
    let mut timer = StageTimer::new();
    write_text(
        &PathBuf::from(format!("{}.conf", params.out_prefix)),
        &format!("{:#?}\n", params),
    )?;

    info!("Reading mesh...");
    let mesh = read_obj_mesh_from_file(&params.mesh_path)?;
    info!("Reading scene...");
    let views = load_scene(&params.scene_path)?;

    let costs = match &params.data_costs_path {
        Some(path) => Some(DataCostTable::load_from_file(path)?),
        None => None,
    };
    let labeling = match &params.labeling_path {
        Some(path) => Some(load_labeling_from_file(path)?),
        None => None,
    };
    let source = match (&costs, &labeling) {
        (Some(costs), _) => LabelingSource::DataCosts(costs),
        (None, Some(labeling)) => LabelingSource::Labeling(labeling),
        (None, None) => {
            return Err(Error::new(
                ValidationError,
                "either data costs or labeling must be given".to_string(),
            ));
        }
    };

    timer.measure("loading");

    info!("Texturing mesh...");
    let result =
        texture_mesh(&mesh, &views, source, &params.texturing_params)?;
    timer.measure("texturing");
    info!(
        "  {} of {} faces textured in {} patches",
        result.num_textured_faces(),
        mesh.num_faces(),
        result.patches.len()
    );

    let out = |suffix: &str| {
        PathBuf::from(format!("{}_{}", params.out_prefix, suffix))
    };

    if params.write_intermediate_results {
        info!("Writing intermediate results...");
        save_labeling_to_file(
            &result.labeling,
            out("labeling.tr"),
            &params.tr_write_params,
        )?;
        if let Some(costs) = &costs {
            costs.save_to_file(out("data_costs.tr"), &params.tr_write_params)?;
        }
    }

    info!("Writing texture patches...");
    for (i, patch) in result.patches.iter().enumerate() {
        save_patch_image(patch, &out(&format!("patch_{}.png", i)))?;
    }
    write_patch_descriptions(&result.patches, &out("patches.json"))?;
    timer.measure("saving");

    if params.write_timings {
        write_text(&out("timings.csv"), &timer.to_csv())?;
    }
    Ok(())
}

#[derive(Serialize)]
struct PatchDescription {
    label: Label,
    faces: Vec<usize>,
    texcoords: Vec<[[f64; 2]; 3]>,
    width: u32,
    height: u32,
}

impl PatchDescription {
    fn new(patch: &TexturePatch) -> Self {
        Self {
            label: patch.label,
            faces: patch.faces.clone(),
            texcoords: patch
                .texcoords
                .iter()
                .map(|tc| tc.map(|p| [p[0], p[1]]))
                .collect(),
            width: patch.width(),
            height: patch.height(),
        }
    }
}

fn write_patch_descriptions(
    patches: &[TexturePatch],
    path: &Path,
) -> Result<()> {
    let descs: Vec<PatchDescription> =
        patches.iter().map(PatchDescription::new).collect();
    let data = serde_json::to_string_pretty(&descs).map_err(|e| {
        Error::with_source(
            InconsistentState,
            "failed to serialize patch descriptions".to_string(),
            e,
        )
    })?;
    write_text(path, &data)
}

pub fn patch_image_to_rgb8(image: &PatchImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        image::Rgb(
            image
                .get_pixel(x, y)
                .0
                .map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8),
        )
    })
}

fn save_patch_image(patch: &TexturePatch, path: &Path) -> Result<()> {
    patch_image_to_rgb8(&patch.image).save(path).map_err(|e| {
        Error::with_source(
            ImageError,
            format!("failed to save image '{}'", path.display()),
            e,
        )
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_patch_image_to_rgb8() {
        let mut image = PatchImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgb([0.2, 1.5, -0.1]));
        image.put_pixel(1, 0, image::Rgb([1.0, 0.0, 0.5]));
        let rgb = patch_image_to_rgb8(&image);
        assert_eq!(rgb.get_pixel(0, 0).0, [51, 255, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 0, 128]);
    }

    #[test]
    fn test_patch_description() {
        let patch = TexturePatch {
            label: 2,
            faces: vec![7],
            texcoords: vec![[
                Vector2::new(1.0, 1.0),
                Vector2::new(3.0, 1.0),
                Vector2::new(1.0, 2.5),
            ]],
            image: PatchImage::new(5, 4),
            validity_mask: ImageMask::from_element(0, 0, false),
            border: 1,
        };
        let json =
            serde_json::to_value(PatchDescription::new(&patch)).unwrap();
        assert_eq!(json["label"], 2);
        assert_eq!(json["faces"][0], 7);
        assert_eq!(json["texcoords"][0][2][1], 2.5);
        assert_eq!(json["width"], 5);
        assert_eq!(json["height"], 4);
    }

    #[test]
    fn test_check_out_prefix() {
        let dir = std::env::temp_dir().join("texrecon_test_out_prefix");
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("model");
        assert!(check_out_prefix(&prefix.to_string_lossy()).is_ok());
        assert!(check_out_prefix("model").is_ok());

        let prefix = dir.join("absent").join("model");
        let err = check_out_prefix(&prefix.to_string_lossy()).unwrap_err();
        assert_eq!(err.kind, IoError);
        assert_eq!(
            err.description,
            format!(
                "output directory '{}' does not exist",
                dir.join("absent").display()
            )
        );
    }

    #[test]
    fn test_missing_out_dir_fails_before_reading() {
        let params = TextureParams::from_iter(&[
            "texture",
            "absent_mesh.obj",
            "absent_scene.json",
            "absent_texrecon_dir/model",
            "--labeling",
            "absent_labeling.tr",
        ]);
        let err = texture_with_params(&params).unwrap_err();
        assert_eq!(
            &err.description,
            "output directory 'absent_texrecon_dir' does not exist"
        );
    }

    #[test]
    fn test_stage_timer_csv() {
        let mut timer = StageTimer::new();
        timer.measure("loading");
        timer.measure("saving");
        let csv = timer.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "stage,seconds");
        assert!(lines[1].starts_with("loading,"));
        assert!(lines[2].starts_with("saving,"));
        assert!(lines[3].starts_with("total,"));
    }
}
