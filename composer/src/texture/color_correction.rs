use log::{debug, error, info};
use rayon::prelude::*;

use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};

pub type CooMatrix = nalgebra_sparse::coo::CooMatrix<f64>;
pub type CsrMatrix = nalgebra_sparse::csr::CsrMatrix<f64>;
pub type DVector = nalgebra::DVector<f64>;

pub trait LinearSolver: Sync {
    // Solves ax = b for a symmetric positive definite `a`.
    fn solve(
        &self,
        a: &CsrMatrix,
        b: &DVector,
        x0: DVector,
    ) -> Result<DVector>;
}

#[derive(Clone, Copy, Debug)]
pub struct ConjugateGradients {
    pub max_iterations: usize,
    // Relative to the norm of the right hand side.
    pub tolerance: f64,
}

impl LinearSolver for ConjugateGradients {
    fn solve(
        &self,
        a: &CsrMatrix,
        b: &DVector,
        x0: DVector,
    ) -> Result<DVector> {
        if a.nrows() != a.ncols()
            || a.nrows() != b.nrows()
            || a.nrows() != x0.nrows()
        {
            return Err(Error::new(
                InconsistentState,
                format!(
                    "cannot solve {}x{} system with {} rhs and {} unknowns",
                    a.nrows(),
                    a.ncols(),
                    b.nrows(),
                    x0.nrows()
                ),
            ));
        }

        let b_norm = b.norm();
        if b_norm == 0.0 {
            return Ok(DVector::zeros(b.nrows()));
        }
        let threshold = self.tolerance * b_norm;

        let mut x = x0;
        let mut r = b - a * &x;
        let mut p = r.clone();
        let mut rsold = r.dot(&r);

        for _ in 0..self.max_iterations {
            if rsold.sqrt() <= threshold {
                return Ok(x);
            }
            let ap = a * &p;
            let pap = p.dot(&ap);
            if !(pap > 0.0) || !pap.is_finite() {
                return Err(Error::new(
                    NumericalError,
                    format!("conjugate gradients broke down (pAp = {})", pap),
                ));
            }
            let alpha = rsold / pap;
            x += alpha * &p;
            r -= alpha * ap;
            let rsnew = r.dot(&r);
            p = &r + (rsnew / rsold) * p;
            rsold = rsnew;
        }

        if rsold.sqrt() <= threshold {
            return Ok(x);
        }
        Err(Error::new(
            NumericalError,
            format!(
                "conjugate gradients did not converge within {} iterations \
                 (relative residual {:e})",
                self.max_iterations,
                rsold.sqrt() / b_norm
            ),
        ))
    }
}

fn add_eq_to_minor(coo: &mut CooMatrix, i: usize, j: usize, s: f64) {
    coo.push(i, i, s);
    coo.push(i, j, -s);
    coo.push(j, i, -s);
    coo.push(j, j, s);
}

// One entry per (vertex, patch) pair, in vertex order.
struct Occurrences {
    // Index of the first occurrence of each vertex.
    offsets: Vec<usize>,
    colors: Vec<Vector3>,
    // Seam vertices with the range of their occurrences.
    seams: Vec<(usize, std::ops::Range<usize>)>,
}

impl Occurrences {
    fn collect(
        patches: &[TexturePatch],
        vertex_infos: &[Vec<VertexProjectionInfo>],
    ) -> Occurrences {
        let mut offsets = Vec::with_capacity(vertex_infos.len() + 1);
        let mut colors = Vec::new();
        let mut seams = Vec::new();
        for (v, infos) in vertex_infos.iter().enumerate() {
            let start = colors.len();
            offsets.push(start);
            colors.extend(
                infos
                    .iter()
                    .map(|i| patches[i.patch_idx].sample(i.projection)),
            );
            if infos.len() > 1 {
                seams.push((v, start..colors.len()));
            }
        }
        offsets.push(colors.len());
        Occurrences {
            offsets,
            colors,
            seams,
        }
    }

    fn len(&self) -> usize {
        self.colors.len()
    }

    fn index(
        &self,
        vertex_infos: &[Vec<VertexProjectionInfo>],
        v: usize,
        patch_idx: usize,
    ) -> Option<usize> {
        vertex_infos[v]
            .iter()
            .position(|i| i.patch_idx == patch_idx)
            .map(|k| self.offsets[v] + k)
    }
}

// Largest per-channel spread within any of the color groups.
fn max_spread<I: Iterator<Item = Vec<Vector3>>>(groups: I) -> f64 {
    let mut max = 0.0;
    for colors in groups {
        for c in 0..3 {
            let hi = colors.iter().map(|x| x[c]).fold(f64::MIN, f64::max);
            let lo = colors.iter().map(|x| x[c]).fold(f64::MAX, f64::min);
            max = f64::max(max, hi - lo);
        }
    }
    max
}

// Color which one patch should show at a seam vertex.
#[derive(Clone, Debug)]
struct SeamTarget {
    patch_idx: usize,
    projection: Vector2,
    color: Vector3,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalLevelingReport {
    pub num_seam_vertices: usize,
    pub max_seam_difference_before: f64,
    // Resampled from the patch pixels by `ColorCorrection::apply`.
    pub max_seam_difference_after: f64,
    // Color channels for which the solver failed and no correction is
    // applied.
    pub failed_channels: Vec<usize>,
}

pub struct ColorCorrection {
    // Per patch, per face, per corner.
    corner_offsets: Vec<Vec<[Vector3; 3]>>,
    // Per seam vertex.
    seam_targets: Vec<Vec<SeamTarget>>,
    pub report: GlobalLevelingReport,
}

impl ColorCorrection {
    pub fn identity(patches: &[TexturePatch]) -> ColorCorrection {
        ColorCorrection {
            corner_offsets: patches
                .iter()
                .map(|p| vec![[Vector3::zeros(); 3]; p.faces.len()])
                .collect(),
            seam_targets: Vec::new(),
            report: GlobalLevelingReport::default(),
        }
    }

    // Every seam vertex gets one target color shared by all its patches,
    // every other (vertex, patch) pair gets a free offset. The offsets
    // minimize their differences along patch edges plus `regularization`
    // times their squared magnitude.
    pub fn new(
        patches: &[TexturePatch],
        vertex_infos: &[Vec<VertexProjectionInfo>],
        mesh: &Mesh,
        regularization: f64,
        solver: &dyn LinearSolver,
    ) -> Result<ColorCorrection> {
        let occurrences = Occurrences::collect(patches, vertex_infos);
        let mut correction = ColorCorrection::identity(patches);
        correction.report.num_seam_vertices = occurrences.seams.len();
        let before = max_spread(
            occurrences
                .seams
                .iter()
                .map(|(_, range)| occurrences.colors[range.clone()].to_vec()),
        );
        correction.report.max_seam_difference_before = before;
        correction.report.max_seam_difference_after = before;
        if occurrences.seams.is_empty() {
            debug!("  no seam vertices, nothing to level");
            return Ok(correction);
        }

        // Unknowns: seam targets first, then the free offsets.
        let num_occ = occurrences.len();
        let mut unknown_of = vec![0; num_occ];
        let mut is_seam = vec![false; num_occ];
        for (s, (_, range)) in occurrences.seams.iter().enumerate() {
            for o in range.clone() {
                unknown_of[o] = s;
                is_seam[o] = true;
            }
        }
        let mut num_unknowns = occurrences.seams.len();
        for o in 0..num_occ {
            if !is_seam[o] {
                unknown_of[o] = num_unknowns;
                num_unknowns += 1;
            }
        }

        let mut laplacian = CooMatrix::new(num_occ, num_occ);
        for (patch_idx, patch) in patches.iter().enumerate() {
            for &face_idx in &patch.faces {
                let face = mesh.faces[face_idx];
                let mut occ = [0; 3];
                for (corner, &v) in face.iter().enumerate() {
                    occ[corner] = occurrences
                        .index(vertex_infos, v, patch_idx)
                        .ok_or_else(|| {
                            Error::new(
                                InconsistentState,
                                format!(
                                    "vertex {} is missing from patch {}",
                                    v, patch_idx
                                ),
                            )
                        })?;
                }
                add_eq_to_minor(&mut laplacian, occ[0], occ[1], 1.0);
                add_eq_to_minor(&mut laplacian, occ[1], occ[2], 1.0);
                add_eq_to_minor(&mut laplacian, occ[0], occ[2], 1.0);
            }
        }
        for o in 0..num_occ {
            laplacian.push(o, o, regularization);
        }
        let laplacian = CsrMatrix::from(&laplacian);

        let mut correspondence = CooMatrix::new(num_occ, num_unknowns);
        for o in 0..num_occ {
            correspondence.push(o, unknown_of[o], 1.0);
        }
        let correspondence = CsrMatrix::from(&correspondence);
        let system =
            &correspondence.transpose() * &laplacian * &correspondence;

        // Corrections are (correspondence * x + shift), where seam
        // occurrences are shifted by minus their sample.
        let mut corrections = vec![Vector3::zeros(); num_occ];
        for c in 0..3 {
            let shift = DVector::from_iterator(
                num_occ,
                (0..num_occ).map(|o| {
                    if is_seam[o] {
                        -occurrences.colors[o][c]
                    } else {
                        0.0
                    }
                }),
            );
            let rhs = -(correspondence.transpose() * (&laplacian * &shift));

            let mut x0 = DVector::zeros(num_unknowns);
            for (s, (_, range)) in occurrences.seams.iter().enumerate() {
                x0[s] = range
                    .clone()
                    .map(|o| occurrences.colors[o][c])
                    .sum::<f64>()
                    / range.len() as f64;
            }

            match solver.solve(&system, &rhs, x0) {
                Ok(x) => {
                    let g = &correspondence * &x + shift;
                    for o in 0..num_occ {
                        corrections[o][c] = g[o];
                    }
                }
                Err(err) => {
                    error!(
                        "  seam leveling of channel {} failed, leaving it \
                         uncorrected: {}",
                        c, err
                    );
                    correction.report.failed_channels.push(c);
                }
            }
        }

        for (v, range) in &occurrences.seams {
            let targets = vertex_infos[*v]
                .iter()
                .zip(range.clone())
                .map(|(info, o)| SeamTarget {
                    patch_idx: info.patch_idx,
                    projection: info.projection,
                    color: occurrences.colors[o] + corrections[o],
                })
                .collect();
            correction.seam_targets.push(targets);
        }

        for (patch_idx, patch) in patches.iter().enumerate() {
            for (local_idx, &face_idx) in patch.faces.iter().enumerate() {
                for (corner, &v) in mesh.faces[face_idx].iter().enumerate() {
                    if let Some(o) =
                        occurrences.index(vertex_infos, v, patch_idx)
                    {
                        correction.corner_offsets[patch_idx][local_idx]
                            [corner] = corrections[o];
                    }
                }
            }
        }
        Ok(correction)
    }

    // Adds the offsets to the patch pixels, then pins the pixels around
    // every seam vertex so that all patches sample the same color there.
    // Patches are independent, so they are processed in parallel.
    pub fn apply(
        &mut self,
        patches: &mut [TexturePatch],
        clamp: ColorClamp,
    ) -> Result<()> {
        if patches.len() != self.corner_offsets.len() {
            return Err(Error::new(
                InconsistentState,
                format!(
                    "color correction of {} patches applied to {}",
                    self.corner_offsets.len(),
                    patches.len()
                ),
            ));
        }
        patches
            .par_iter_mut()
            .zip(self.corner_offsets.par_iter())
            .map(|(patch, offsets)| patch.adjust_colors(offsets, clamp))
            .collect::<Result<Vec<()>>>()?;
        if self.seam_targets.is_empty() {
            return Ok(());
        }

        let mut pins = vec![Vec::new(); patches.len()];
        for target in self.seam_targets.iter().flatten() {
            pins[target.patch_idx].push((target.projection, target.color));
        }
        let fixed = &self.report.failed_channels;
        patches
            .par_iter_mut()
            .zip(pins.par_iter())
            .for_each(|(patch, pins)| {
                patch.pin_samples(pins, fixed, clamp);
            });

        let patches: &[TexturePatch] = patches;
        self.report.max_seam_difference_after =
            max_spread(self.seam_targets.iter().map(|targets| {
                targets
                    .iter()
                    .map(|t| patches[t.patch_idx].sample(t.projection))
                    .collect()
            }));
        info!(
            "  {} seam vertices, max difference {:.6} -> {:.6}",
            self.report.num_seam_vertices,
            self.report.max_seam_difference_before,
            self.report.max_seam_difference_after
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::mesh::test::new_strip;
    use crate::texture::input_patching::test::*;
    use crate::texture::input_views::test::new_top_view;
    use base::assert_eq_f64;

    const CLAMP: ColorClamp = ColorClamp { min: 0.0, max: 1.0 };

    fn solver() -> ConjugateGradients {
        ConjugateGradients {
            max_iterations: 1000,
            tolerance: 1e-12,
        }
    }

    #[test]
    fn test_conjugate_gradients() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 4.0);
        coo.push(0, 1, 1.0);
        coo.push(1, 0, 1.0);
        coo.push(1, 1, 3.0);
        let a = CsrMatrix::from(&coo);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = solver().solve(&a, &b, DVector::zeros(2)).unwrap();
        assert_eq_f64!(x[0], 1.0 / 11.0);
        assert_eq_f64!(x[1], 7.0 / 11.0);
    }

    #[test]
    fn test_conjugate_gradients_gives_up() {
        let mut coo = CooMatrix::new(3, 3);
        for i in 0..3 {
            coo.push(i, i, (i + 1) as f64);
        }
        let a = CsrMatrix::from(&coo);
        let b = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let capped = ConjugateGradients {
            max_iterations: 1,
            tolerance: 1e-12,
        };
        let err = capped.solve(&a, &b, DVector::zeros(3)).unwrap_err();
        assert_eq!(err.kind, NumericalError);

        let mut coo = CooMatrix::new(1, 1);
        coo.push(0, 0, -1.0);
        let a = CsrMatrix::from(&coo);
        let b = DVector::from_vec(vec![1.0]);
        let err = solver().solve(&a, &b, DVector::zeros(1)).unwrap_err();
        assert_eq!(err.kind, NumericalError);
    }

    fn two_patches() -> (Mesh, PatchCollection) {
        let (mesh, views) = strip_scene(2, &[51, 153]);
        let graph = labeled_graph(&mesh, 2, &[1, 1, 2, 2]);
        let collection =
            generate_texture_patches(&graph, &mesh, &views, 1).unwrap();
        (mesh, collection)
    }

    fn seam_samples(collection: &PatchCollection, v: usize) -> Vec<Vector3> {
        collection.vertex_infos[v]
            .iter()
            .map(|i| collection.patches[i.patch_idx].sample(i.projection))
            .collect()
    }

    #[test]
    fn test_seams_are_closed() {
        let (mesh, mut collection) = two_patches();
        let mut correction = ColorCorrection::new(
            &collection.patches,
            &collection.vertex_infos,
            &mesh,
            1e-3,
            &solver(),
        )
        .unwrap();
        assert_eq!(correction.report.num_seam_vertices, 2);
        assert_eq_f64!(
            correction.report.max_seam_difference_before,
            0.4,
            1e-6
        );
        assert!(correction.report.failed_channels.is_empty());

        correction.apply(&mut collection.patches, CLAMP).unwrap();
        assert!(correction.report.max_seam_difference_after <= 1e-5);
        for patch in &collection.patches {
            let c = get_pixel_as_vector3(4, 4, &patch.image);
            assert_eq_f64!(c[0], 0.4, 1e-3);
        }
    }

    // Views with a horizontal and vertical gradient, the second one
    // brighter by a constant.
    fn gradient_patches() -> (Mesh, PatchCollection) {
        let mesh = new_strip(2);
        let views: Vec<TextureView> = (0..2u32)
            .map(|k| {
                let image = RgbImage::from_fn(2 * SCALE, SCALE, |x, y| {
                    let g = (4 * x + 3 * y + 40 * k + 60) as u8;
                    Rgb([g, g, g])
                });
                new_top_view(SCALE, image)
            })
            .collect();
        let graph = labeled_graph(&mesh, 2, &[1, 1, 2, 2]);
        let collection =
            generate_texture_patches(&graph, &mesh, &views, 1).unwrap();
        (mesh, collection)
    }

    #[test]
    fn test_resampled_seam_colors_match() {
        let (mesh, mut collection) = gradient_patches();
        let mut correction = ColorCorrection::new(
            &collection.patches,
            &collection.vertex_infos,
            &mesh,
            1e-3,
            &solver(),
        )
        .unwrap();
        assert!(correction.report.max_seam_difference_before > 0.1);

        correction.apply(&mut collection.patches, CLAMP).unwrap();
        assert!(correction.report.max_seam_difference_after <= 1e-5);
        for v in [2, 3] {
            let samples = seam_samples(&collection, v);
            assert_eq!(samples.len(), 2);
            assert!((samples[0] - samples[1]).amax() <= 1e-5);
        }
    }

    #[test]
    fn test_single_patch_is_untouched() {
        let (mesh, views) = strip_scene(2, &[51]);
        let graph = labeled_graph(&mesh, 1, &[1, 1, 1, 1]);
        let mut collection =
            generate_texture_patches(&graph, &mesh, &views, 1).unwrap();
        let before = collection.patches[0].image.clone();
        let mut correction = ColorCorrection::new(
            &collection.patches,
            &collection.vertex_infos,
            &mesh,
            1e-3,
            &solver(),
        )
        .unwrap();
        assert_eq!(correction.report.num_seam_vertices, 0);
        correction.apply(&mut collection.patches, CLAMP).unwrap();
        assert_eq!(collection.patches[0].image, before);
    }

    #[test]
    fn test_solver_failure_falls_back_to_identity() {
        let (mesh, mut collection) = two_patches();
        let before: Vec<PatchImage> =
            collection.patches.iter().map(|p| p.image.clone()).collect();
        let capped = ConjugateGradients {
            max_iterations: 0,
            tolerance: 1e-12,
        };
        let mut correction = ColorCorrection::new(
            &collection.patches,
            &collection.vertex_infos,
            &mesh,
            1e-3,
            &capped,
        )
        .unwrap();
        assert_eq!(correction.report.failed_channels, vec![0, 1, 2]);

        correction.apply(&mut collection.patches, CLAMP).unwrap();
        assert_eq_f64!(
            correction.report.max_seam_difference_after,
            correction.report.max_seam_difference_before,
            1e-6
        );
        for (patch, image) in collection.patches.iter().zip(&before) {
            assert_eq!(&patch.image, image);
            assert!(patch.is_valid(4, 4));
        }
    }
}
