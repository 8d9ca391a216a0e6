mod adjacency;
mod color_correction;
mod data_costs;
mod input_patching;
mod input_selection;
mod input_views;
mod max_flow;
mod pipeline;
mod seam_blending;
mod settings;

use std::cmp::Ordering;
use std::ops::Sub;

use image::{ImageBuffer, Rgb};
use nalgebra::DMatrix;

pub use crate::mesh::{Mesh, MeshTopology, Point3, Vector3};
pub use crate::texture::{
    adjacency::*, color_correction::*, data_costs::*, input_patching::*,
    input_selection::*, input_views::*, max_flow::*, pipeline::*,
    seam_blending::*, settings::*,
};

pub type Vector2 = nalgebra::Vector2<f64>;
pub type Matrix2 = nalgebra::Matrix2<f64>;
pub type Matrix3x4 = nalgebra::Matrix3x4<f64>;

// Zero means "no view"; any other label `l` refers to view `l - 1`.
pub type Label = usize;
pub const NO_LABEL: Label = 0;

pub fn label_to_view(label: Label) -> Option<usize> {
    label.checked_sub(1)
}

pub fn view_to_label(view: usize) -> Label {
    view + 1
}

pub type PatchImage = ImageBuffer<Rgb<f32>, Vec<f32>>;

// Indexed as (row, column), that is (y, x).
pub type ImageMask = DMatrix<bool>;

pub fn get_pixel_as_vector3(x: u32, y: u32, image: &PatchImage) -> Vector3 {
    let p = image.get_pixel(x, y);
    Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64)
}

pub fn set_pixel_from_vector3(
    x: u32,
    y: u32,
    color: Vector3,
    image: &mut PatchImage,
) {
    let rgb = Rgb([color[0] as f32, color[1] as f32, color[2] as f32]);
    image.put_pixel(x, y, rgb);
}

// Pixels and weights blended by `sample_bilinear` at `pos`. Pixel (x, y)
// covers [x, x + 1) x [y, y + 1), so its center lies at (x + 0.5, y + 0.5).
// Positions outside the image are clamped.
pub fn bilinear_footprint(
    pos: Vector2,
    width: u32,
    height: u32,
) -> [(u32, u32, f64); 4] {
    let fx = (pos[0] - 0.5).clamp(0.0, (width - 1) as f64);
    let fy = (pos[1] - 0.5).clamp(0.0, (height - 1) as f64);
    let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
    let (dx, dy) = (fx - x0 as f64, fy - y0 as f64);
    [
        (x0, y0, (1.0 - dx) * (1.0 - dy)),
        (x1, y0, dx * (1.0 - dy)),
        (x0, y1, (1.0 - dx) * dy),
        (x1, y1, dx * dy),
    ]
}

pub fn sample_bilinear(pos: Vector2, image: &PatchImage) -> Vector3 {
    let (w, h) = image.dimensions();
    bilinear_footprint(pos, w, h)
        .iter()
        .map(|&(x, y, weight)| weight * get_pixel_as_vector3(x, y, image))
        .sum()
}

pub struct BarycentricCoordinateSystem {
    vs: [Vector2; 3],
    n22: nalgebra::QR<f64, nalgebra::U2, nalgebra::U2>,
}

impl BarycentricCoordinateSystem {
    pub fn new(vs: [Vector2; 3]) -> Option<Self> {
        let m22 = Matrix2::from_columns(&[vs[1] - vs[0], vs[2] - vs[0]]);
        let n22 = m22.qr();
        if n22.is_invertible() {
            Some(Self { vs, n22 })
        } else {
            None // The triangle is degenerate.
        }
    }

    pub fn infer(&self, v: Vector2) -> Vector3 {
        let l = self
            .n22
            .solve(&(v - self.vs[0]))
            .unwrap_or_else(Vector2::zeros);
        Vector3::new(1.0 - l[0] - l[1], l[0], l[1])
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Rectangle<T> {
    pub pos: [T; 2],
    pub size: [T; 2],
}

type Comparator<T> = fn(&T, &T) -> Ordering;

fn extremum<T: Copy + PartialOrd, I: Iterator<Item = T>>(
    it: I,
    f: fn(I, Comparator<T>) -> Option<T>,
) -> Option<T> {
    f(it, |p, q| p.partial_cmp(q).unwrap_or(Ordering::Equal))
}

impl<T> Rectangle<T> {
    // Returns None for an empty point set.
    pub fn bounding(ps: &[[T; 2]]) -> Option<Rectangle<T>>
    where
        T: Copy + PartialOrd + Sub<Output = T>,
    {
        let coord = |k: usize| ps.iter().map(move |p| p[k]);

        let xmin = extremum(coord(0), Iterator::min_by)?;
        let xmax = extremum(coord(0), Iterator::max_by)?;
        let ymin = extremum(coord(1), Iterator::min_by)?;
        let ymax = extremum(coord(1), Iterator::max_by)?;

        Some(Rectangle {
            pos: [xmin, ymin],
            size: [xmax - xmin, ymax - ymin],
        })
    }
}

pub fn dilate(mask: &ImageMask, radius: f64) -> ImageMask {
    let mut output = mask.clone();
    let r = radius.ceil() as isize;

    for i in 0..mask.nrows() as isize {
        for j in 0..mask.ncols() as isize {
            if mask[(i as usize, j as usize)] {
                continue;
            }
            'check: for di in -r..=r {
                for dj in -r..=r {
                    let i1 = i + di;
                    let j1 = j + dj;
                    if Vector2::new(di as f64, dj as f64).norm() <= radius
                        && 0 <= i1
                        && (i1 as usize) < mask.nrows()
                        && 0 <= j1
                        && (j1 as usize) < mask.ncols()
                        && mask[(i1 as usize, j1 as usize)]
                    {
                        output[(i as usize, j as usize)] = true;
                        break 'check;
                    }
                }
            }
        }
    }

    output
}
