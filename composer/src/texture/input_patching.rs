use image::{Rgb, RgbImage};
use indexmap::IndexMap;
use log::{debug, warn};
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;

use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};

// Barycentric slack under which a pixel center still counts as inside.
const INSIDE_TOLERANCE: f64 = 1e-9;

const MAX_PIN_SWEEPS: usize = 50;
const PIN_TOLERANCE: f64 = 1e-6;

// A connected group of faces textured from one view. Texture coordinates
// are pixel positions in the patch image.
#[derive(Clone, Debug)]
pub struct TexturePatch {
    pub label: Label,
    pub faces: Vec<usize>,
    pub texcoords: Vec<[Vector2; 3]>,
    pub image: PatchImage,
    // Pixels covered by the faces, grown by the patch border. Empty until
    // the colors are adjusted for the first time.
    pub validity_mask: ImageMask,
    pub border: u32,
}

// Where a mesh vertex shows up in one patch.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexProjectionInfo {
    pub patch_idx: usize,
    pub projection: Vector2,
    // Local indices of the patch faces around the vertex.
    pub faces: Vec<usize>,
}

#[derive(Clone, Copy, Debug)]
struct PixelOwner {
    face: usize,
    score: f64,
    bary: Vector3,
}

fn view_pixel(image: &RgbImage, x: i64, y: i64) -> Rgb<f32> {
    let (w, h) = image.dimensions();
    let x = x.clamp(0, w as i64 - 1) as u32;
    let y = y.clamp(0, h as i64 - 1) as u32;
    let p = image.get_pixel(x, y);
    Rgb([
        p[0] as f32 / 255.0,
        p[1] as f32 / 255.0,
        p[2] as f32 / 255.0,
    ])
}

impl TexturePatch {
    // Cuts the patch out of the view image. Each face comes with the
    // projections of its corners in view pixels.
    pub fn build(
        label: Label,
        faces: Vec<usize>,
        projections: &[[Vector2; 3]],
        view: &TextureView,
        border: u32,
    ) -> Result<TexturePatch> {
        let points: Vec<[f64; 2]> = projections
            .iter()
            .flatten()
            .map(|p| [p[0], p[1]])
            .collect();
        let rect = Rectangle::bounding(&points).ok_or_else(|| {
            Error::new(
                InconsistentState,
                format!("patch of label {} has no faces", label),
            )
        })?;

        let (w, h) = view.image.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::new(
                MalformedData,
                format!("view image of label {} is empty", label),
            ));
        }
        let b = border as f64;
        let x0 = (rect.pos[0].floor() - b).max(-b);
        let y0 = (rect.pos[1].floor() - b).max(-b);
        let x1 = ((rect.pos[0] + rect.size[0]).ceil() + b).min(w as f64 + b);
        let y1 = ((rect.pos[1] + rect.size[1]).ceil() + b).min(h as f64 + b);
        let width = (x1 - x0).max(1.0) as u32;
        let height = (y1 - y0).max(1.0) as u32;
        let (ox, oy) = (x0 as i64, y0 as i64);

        let mut image = PatchImage::new(width, height);
        for (x, y, p) in image.enumerate_pixels_mut() {
            *p = view_pixel(&view.image, ox + x as i64, oy + y as i64);
        }

        let origin = Vector2::new(x0, y0);
        let texcoords = projections
            .iter()
            .map(|ps| [ps[0] - origin, ps[1] - origin, ps[2] - origin])
            .collect();

        Ok(TexturePatch {
            label,
            faces,
            texcoords,
            image,
            validity_mask: ImageMask::from_element(0, 0, false),
            border,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn view(&self) -> Option<usize> {
        label_to_view(self.label)
    }

    pub fn sample(&self, pos: Vector2) -> Vector3 {
        sample_bilinear(pos, &self.image)
    }

    pub fn is_valid(&self, x: u32, y: u32) -> bool {
        self.validity_mask.nrows() > y as usize
            && self.validity_mask.ncols() > x as usize
            && self.validity_mask[(y as usize, x as usize)]
    }

    // For every pixel, the face whose barycentric coordinates at the pixel
    // center are the least negative, searched within the border.
    fn pixel_owners(&self) -> Vec<Option<PixelOwner>> {
        let (w, h) = self.image.dimensions();
        let mut owners: Vec<Option<PixelOwner>> =
            vec![None; (w * h) as usize];
        let reach = self.border as f64 + 1.0;

        for (face, tc) in self.texcoords.iter().enumerate() {
            let bcs = match BarycentricCoordinateSystem::new(*tc) {
                Some(bcs) => bcs,
                None => continue,
            };
            let points = [
                [tc[0][0], tc[0][1]],
                [tc[1][0], tc[1][1]],
                [tc[2][0], tc[2][1]],
            ];
            let rect = match Rectangle::bounding(&points) {
                Some(rect) => rect,
                None => continue,
            };
            let xa = (rect.pos[0] - reach).floor().max(0.0) as u32;
            let ya = (rect.pos[1] - reach).floor().max(0.0) as u32;
            let xb = ((rect.pos[0] + rect.size[0] + reach).ceil() as i64)
                .clamp(0, w as i64) as u32;
            let yb = ((rect.pos[1] + rect.size[1] + reach).ceil() as i64)
                .clamp(0, h as i64) as u32;

            for y in ya..yb {
                for x in xa..xb {
                    let center = Vector2::new(x as f64 + 0.5, y as f64 + 0.5);
                    let bary = bcs.infer(center);
                    let score = bary.min();
                    let owner = &mut owners[(y * w + x) as usize];
                    if owner.map_or(true, |o| score > o.score) {
                        *owner = Some(PixelOwner { face, score, bary });
                    }
                }
            }
        }
        owners
    }

    // Adds the offsets, given per face corner, to the patch pixels with
    // barycentric interpolation, and recomputes the validity mask. Pixels
    // outside of the mask are left alone.
    pub fn adjust_colors(
        &mut self,
        corner_offsets: &[[Vector3; 3]],
        clamp: ColorClamp,
    ) -> Result<()> {
        if corner_offsets.len() != self.faces.len() {
            return Err(Error::new(
                InconsistentState,
                format!(
                    "{} color offsets given for patch with {} faces",
                    corner_offsets.len(),
                    self.faces.len()
                ),
            ));
        }

        let (w, h) = self.image.dimensions();
        let owners = self.pixel_owners();
        let mut inside =
            ImageMask::from_element(h as usize, w as usize, false);
        for y in 0..h {
            for x in 0..w {
                if let Some(o) = owners[(y * w + x) as usize] {
                    inside[(y as usize, x as usize)] =
                        o.score >= -INSIDE_TOLERANCE;
                }
            }
        }
        self.validity_mask = dilate(&inside, self.border as f64);

        for y in 0..h {
            for x in 0..w {
                if !self.validity_mask[(y as usize, x as usize)] {
                    continue;
                }
                let o = match owners[(y * w + x) as usize] {
                    Some(o) => o,
                    None => continue,
                };
                let bary = o.bary.map(|c| c.max(0.0));
                let bary = bary / bary.sum().max(f64::EPSILON);
                let off = &corner_offsets[o.face];
                let offset =
                    bary[0] * off[0] + bary[1] * off[1] + bary[2] * off[2];
                let color = get_pixel_as_vector3(x, y, &self.image) + offset;
                let color = color.map(|c| clamp.apply(c as f32) as f64);
                set_pixel_from_vector3(x, y, color, &mut self.image);
            }
        }
        Ok(())
    }

    // Nudges the valid pixels blended at each position until the bilinear
    // samples there reach their targets. Channels listed in `fixed` are
    // left alone. Returns the largest difference seen in the last sweep.
    pub fn pin_samples(
        &mut self,
        pins: &[(Vector2, Vector3)],
        fixed: &[usize],
        clamp: ColorClamp,
    ) -> f64 {
        let (w, h) = self.image.dimensions();
        let footprints: Vec<Vec<(u32, u32, f64)>> = pins
            .iter()
            .map(|&(pos, _)| {
                let mut merged: Vec<(u32, u32, f64)> = Vec::with_capacity(4);
                for (x, y, weight) in bilinear_footprint(pos, w, h) {
                    match merged.iter_mut().find(|p| (p.0, p.1) == (x, y)) {
                        Some(p) => p.2 += weight,
                        None => merged.push((x, y, weight)),
                    }
                }
                merged.retain(|&(x, y, weight)| {
                    weight > 0.0 && self.is_valid(x, y)
                });
                merged
            })
            .collect();

        let mut residual = 0.0;
        for _ in 0..MAX_PIN_SWEEPS {
            residual = 0.0;
            for (&(pos, target), footprint) in pins.iter().zip(&footprints) {
                let norm2: f64 = footprint.iter().map(|p| p.2 * p.2).sum();
                if norm2 <= 0.0 {
                    continue;
                }
                let mut diff = target - self.sample(pos);
                for &c in fixed {
                    diff[c] = 0.0;
                }
                residual = f64::max(residual, diff.amax());
                for &(x, y, weight) in footprint {
                    let color = get_pixel_as_vector3(x, y, &self.image)
                        + diff * (weight / norm2);
                    let color = color.map(|c| clamp.apply(c as f32) as f64);
                    set_pixel_from_vector3(x, y, color, &mut self.image);
                }
            }
            if residual <= PIN_TOLERANCE {
                break;
            }
        }
        residual
    }
}

#[derive(Debug)]
pub struct PatchCollection {
    pub patches: Vec<TexturePatch>,
    // Indexed by mesh vertex, ordered by patch.
    pub vertex_infos: Vec<Vec<VertexProjectionInfo>>,
    // Faces with a label whose corners could not be projected into the view.
    pub unprojected_faces: Vec<usize>,
}

// Maximal connected groups of faces sharing the same non-zero label. Groups
// are ordered by their smallest face, faces within a group ascend.
pub fn connected_components(graph: &Graph) -> Vec<(Label, Vec<usize>)> {
    let mut partition = UnionFind::new(graph.num_nodes());
    for face_idx in 0..graph.num_nodes() {
        let label = graph.get_label(face_idx);
        if label == NO_LABEL {
            continue;
        }
        for other in graph.neighbors(face_idx) {
            if other > face_idx && graph.get_label(other) == label {
                partition.union(face_idx, other);
            }
        }
    }

    let mut components = IndexMap::<usize, Vec<usize>>::new();
    for face_idx in 0..graph.num_nodes() {
        if graph.get_label(face_idx) != NO_LABEL {
            components
                .entry(partition.find(face_idx))
                .or_insert_with(Vec::new)
                .push(face_idx);
        }
    }

    components
        .into_iter()
        .map(|(_, faces)| (graph.get_label(faces[0]), faces))
        .collect()
}

fn project_face(
    face_idx: usize,
    mesh: &Mesh,
    view: &TextureView,
) -> Option<[Vector2; 3]> {
    let [v0, v1, v2] = mesh.faces[face_idx];
    let p = |v: usize| view.project(&mesh.vertices[v]);
    Some([p(v0)?, p(v1)?, p(v2)?])
}

fn build_component(
    label: Label,
    faces: &[usize],
    mesh: &Mesh,
    views: &[TextureView],
    border: u32,
) -> Result<(Option<TexturePatch>, Vec<usize>)> {
    let view = &views[label - 1];
    let mut kept = Vec::with_capacity(faces.len());
    let mut projections = Vec::with_capacity(faces.len());
    let mut dropped = Vec::new();
    for &face_idx in faces {
        match project_face(face_idx, mesh, view) {
            Some(ps) => {
                kept.push(face_idx);
                projections.push(ps);
            }
            None => dropped.push(face_idx),
        }
    }
    if kept.is_empty() {
        return Ok((None, dropped));
    }
    let patch = TexturePatch::build(label, kept, &projections, view, border)?;
    Ok((Some(patch), dropped))
}

pub fn collect_vertex_infos(
    patches: &[TexturePatch],
    mesh: &Mesh,
) -> Vec<Vec<VertexProjectionInfo>> {
    let mut infos: Vec<Vec<VertexProjectionInfo>> =
        vec![Vec::new(); mesh.vertices.len()];
    for (patch_idx, patch) in patches.iter().enumerate() {
        for (local_idx, &face_idx) in patch.faces.iter().enumerate() {
            for (corner, &v) in mesh.faces[face_idx].iter().enumerate() {
                match infos[v].last_mut() {
                    Some(info) if info.patch_idx == patch_idx => {
                        info.faces.push(local_idx)
                    }
                    _ => infos[v].push(VertexProjectionInfo {
                        patch_idx,
                        projection: patch.texcoords[local_idx][corner],
                        faces: vec![local_idx],
                    }),
                }
            }
        }
    }
    infos
}

pub fn generate_texture_patches(
    graph: &Graph,
    mesh: &Mesh,
    views: &[TextureView],
    border: u32,
) -> Result<PatchCollection> {
    if graph.num_views() != views.len() || graph.num_nodes() != mesh.num_faces()
    {
        return Err(Error::new(
            ValidationError,
            format!(
                "graph of {} faces and {} views does not match mesh of {} \
                 faces and {} views",
                graph.num_nodes(),
                graph.num_views(),
                mesh.num_faces(),
                views.len()
            ),
        ));
    }

    let components = connected_components(graph);
    debug!("  {} connected components", components.len());

    let built: Vec<Result<(Option<TexturePatch>, Vec<usize>)>> = components
        .par_iter()
        .map(|(label, faces)| {
            build_component(*label, faces, mesh, views, border)
        })
        .collect();

    let mut patches = Vec::with_capacity(built.len());
    let mut unprojected_faces = Vec::new();
    for res in built {
        let (patch, dropped) = res?;
        patches.extend(patch);
        unprojected_faces.extend(dropped);
    }
    unprojected_faces.sort_unstable();
    if !unprojected_faces.is_empty() {
        warn!(
            "  {} faces lie behind their chosen view, e.g. face {}",
            unprojected_faces.len(),
            unprojected_faces[0]
        );
    }

    let vertex_infos = collect_vertex_infos(&patches, mesh);
    Ok(PatchCollection {
        patches,
        vertex_infos,
        unprojected_faces,
    })
}
