use log::debug;
use rayon::prelude::*;

use crate::texture::*;
use base::defs::Result;

// A seam edge as seen from one patch, with the color offsets which pull
// evenly spaced points along it to the mean of both sides.
#[derive(Clone, Debug)]
struct SeamSegment {
    from: Vector2,
    to: Vector2,
    offsets: Vec<Vector3>,
}

impl SeamSegment {
    // Parameter of the closest point and the distance to it.
    fn closest(&self, p: Vector2) -> (f64, f64) {
        let d = self.to - self.from;
        let len2 = d.norm_squared();
        let t = if len2 > 0.0 {
            ((p - self.from).dot(&d) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (t, (p - (self.from + t * d)).norm())
    }

    fn offset_at(&self, t: f64) -> Vector3 {
        let s = t * (self.offsets.len() - 1) as f64;
        let i = (s.floor() as usize).min(self.offsets.len() - 1);
        let j = (i + 1).min(self.offsets.len() - 1);
        let f = s - i as f64;
        (1.0 - f) * self.offsets[i] + f * self.offsets[j]
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalLevelingReport {
    pub num_seam_edges: usize,
    pub num_adjusted_pixels: usize,
}

fn shared_vertices(f0: [usize; 3], f1: [usize; 3]) -> Option<[usize; 2]> {
    let mut common = f0.iter().filter(|v| f1.contains(*v));
    Some([*common.next()?, *common.next()?])
}

fn corner_of(face: [usize; 3], v: usize) -> usize {
    face.iter().position(|&u| u == v).unwrap_or(0)
}

// Both sides of one seam edge, as (patch, segment).
fn seam_segments(
    owners: [(usize, usize); 2],
    faces: [usize; 2],
    patches: &[TexturePatch],
    mesh: &Mesh,
) -> Option<[(usize, SeamSegment); 2]> {
    let [a, b] = shared_vertices(mesh.faces[faces[0]], mesh.faces[faces[1]])?;
    let ends = |side: usize| {
        let (patch_idx, local_idx) = owners[side];
        let face = mesh.faces[faces[side]];
        let tc = &patches[patch_idx].texcoords[local_idx];
        (tc[corner_of(face, a)], tc[corner_of(face, b)])
    };
    let (p0, p1) = ends(0);
    let (q0, q1) = ends(1);

    let length = f64::max((p1 - p0).norm(), (q1 - q0).norm());
    let n = (length.ceil() as usize).max(1) + 1;
    let mut offsets = [Vec::with_capacity(n), Vec::with_capacity(n)];
    for k in 0..n {
        let t = k as f64 / (n - 1) as f64;
        let cp = patches[owners[0].0].sample(p0 + t * (p1 - p0));
        let cq = patches[owners[1].0].sample(q0 + t * (q1 - q0));
        let target = (cp + cq) / 2.0;
        offsets[0].push(target - cp);
        offsets[1].push(target - cq);
    }
    let [op, oq] = offsets;
    Some([
        (
            owners[0].0,
            SeamSegment {
                from: p0,
                to: p1,
                offsets: op,
            },
        ),
        (
            owners[1].0,
            SeamSegment {
                from: q0,
                to: q1,
                offsets: oq,
            },
        ),
    ])
}

// Moves the valid pixels near the segments toward them, with a weight
// falling linearly from 1 on a segment to 0 at `radius`. Each pixel
// follows its nearest segment. Returns the number of changed pixels.
fn blend_patch(
    patch: &mut TexturePatch,
    segments: &[SeamSegment],
    radius: f64,
    clamp: ColorClamp,
) -> usize {
    let (w, h) = patch.image.dimensions();
    let mut nearest: Vec<Option<(f64, Vector3)>> =
        vec![None; (w * h) as usize];

    for seg in segments {
        let xa = (seg.from[0].min(seg.to[0]) - radius).floor().max(0.0) as u32;
        let ya = (seg.from[1].min(seg.to[1]) - radius).floor().max(0.0) as u32;
        let xb = ((seg.from[0].max(seg.to[0]) + radius).ceil() as i64)
            .clamp(0, w as i64) as u32;
        let yb = ((seg.from[1].max(seg.to[1]) + radius).ceil() as i64)
            .clamp(0, h as i64) as u32;
        for y in ya..yb {
            for x in xa..xb {
                if !patch.is_valid(x, y) {
                    continue;
                }
                let center = Vector2::new(x as f64 + 0.5, y as f64 + 0.5);
                let (t, dist) = seg.closest(center);
                if dist >= radius {
                    continue;
                }
                let slot = &mut nearest[(y * w + x) as usize];
                if slot.map_or(true, |(d, _)| dist < d) {
                    let weight = 1.0 - dist / radius;
                    *slot = Some((dist, weight * seg.offset_at(t)));
                }
            }
        }
    }

    let mut count = 0;
    for y in 0..h {
        for x in 0..w {
            if let Some((_, offset)) = nearest[(y * w + x) as usize] {
                let color = get_pixel_as_vector3(x, y, &patch.image) + offset;
                let color = color.map(|c| clamp.apply(c as f32) as f64);
                set_pixel_from_vector3(x, y, color, &mut patch.image);
                count += 1;
            }
        }
    }
    count
}

// Blends both sides of every seam edge toward their mean. Only pixels of
// the validity masks are touched, so the masks must have been computed
// (see `TexturePatch::adjust_colors`). All seam colors are sampled before
// any patch changes.
pub fn level_seams_locally(
    patches: &mut [TexturePatch],
    graph: &Graph,
    mesh: &Mesh,
    blend_radius: f64,
    clamp: ColorClamp,
) -> Result<LocalLevelingReport> {
    let mut owner_of = vec![None; mesh.num_faces()];
    for (patch_idx, patch) in patches.iter().enumerate() {
        for (local_idx, &face_idx) in patch.faces.iter().enumerate() {
            owner_of[face_idx] = Some((patch_idx, local_idx));
        }
    }

    let seams: Vec<([(usize, usize); 2], [usize; 2])> = graph
        .edges()
        .iter()
        .filter_map(|e| {
            let [f0, f1] = e.faces;
            match (owner_of[f0], owner_of[f1]) {
                (Some(o0), Some(o1)) if o0.0 != o1.0 => {
                    Some(([o0, o1], [f0, f1]))
                }
                _ => None,
            }
        })
        .collect();

    let mut report = LocalLevelingReport {
        num_seam_edges: seams.len(),
        num_adjusted_pixels: 0,
    };
    if seams.is_empty() || blend_radius <= 0.0 {
        return Ok(report);
    }

    let sampled: Vec<Option<[(usize, SeamSegment); 2]>> = {
        let patches: &[TexturePatch] = patches;
        seams
            .par_iter()
            .map(|&(owners, faces)| {
                seam_segments(owners, faces, patches, mesh)
            })
            .collect()
    };

    let mut segments = vec![Vec::new(); patches.len()];
    for sides in sampled.into_iter().flatten() {
        for (patch_idx, segment) in sides {
            segments[patch_idx].push(segment);
        }
    }

    report.num_adjusted_pixels = patches
        .par_iter_mut()
        .zip(segments.par_iter())
        .map(|(patch, segs)| blend_patch(patch, segs, blend_radius, clamp))
        .sum();

    debug!(
        "  blended {} seam edges, {} pixels adjusted",
        report.num_seam_edges, report.num_adjusted_pixels
    );
    Ok(report)
}
