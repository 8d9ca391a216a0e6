use std::path::Path;

use image::RgbImage;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

// A calibrated photograph. The projection maps homogeneous world points to
// homogeneous pixel positions, with pixel (x, y) covering [x, x + 1) x
// [y, y + 1).
#[derive(Clone, Debug)]
pub struct TextureView {
    pub image: RgbImage,
    pub projection: Matrix3x4,
}

impl TextureView {
    // None for points on or behind the camera plane.
    pub fn project(&self, point: &Point3) -> Option<Vector2> {
        let h = self.projection * point.to_homogeneous();
        if h[2] <= f64::EPSILON {
            return None;
        }
        Some(Vector2::new(h[0] / h[2], h[1] / h[2]))
    }

    pub fn validate(&self, view_idx: usize) -> Result<()> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(Error::new(
                MalformedData,
                format!("image of view {} is empty", view_idx),
            ));
        }
        if self.projection.iter().any(|x| !x.is_finite()) {
            return Err(Error::new(
                MalformedData,
                format!("projection of view {} is not finite", view_idx),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct ViewDescription {
    image: String,
    projection: [[f64; 4]; 3],
}

#[derive(Debug, Deserialize, Serialize)]
struct SceneDescription {
    views: Vec<ViewDescription>,
}

fn projection_from_rows(rows: &[[f64; 4]; 3]) -> Matrix3x4 {
    Matrix3x4::from_fn(|i, j| rows[i][j])
}

// Image paths of the scene are relative to the scene file.
pub fn load_scene<P: AsRef<Path>>(path: P) -> Result<Vec<TextureView>> {
    let path = path.as_ref();
    let data = fs::read_file(path)?;
    let scene: SceneDescription =
        serde_json::from_slice(&data).map_err(|e| {
            Error::with_source(
                MalformedData,
                format!("failed to parse scene '{}'", path.display()),
                e,
            )
        })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut views = Vec::with_capacity(scene.views.len());
    for (view_idx, desc) in scene.views.iter().enumerate() {
        let image_path = base_dir.join(&desc.image);
        let image = image::open(&image_path)
            .map_err(|e| {
                Error::with_source(
                    ImageError,
                    format!(
                        "failed to load image '{}' of view {}",
                        image_path.display(),
                        view_idx
                    ),
                    e,
                )
            })?
            .to_rgb8();
        let view = TextureView {
            image,
            projection: projection_from_rows(&desc.projection),
        };
        view.validate(view_idx)?;
        debug!(
            "  view {}: {}x{} image '{}'",
            view_idx,
            view.image.width(),
            view.image.height(),
            desc.image
        );
        views.push(view);
    }
    Ok(views)
}
