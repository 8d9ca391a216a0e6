use log::{info, warn};

use crate::texture::*;
use base::defs::Result;

// Where the face labels come from.
pub enum LabelingSource<'a> {
    DataCosts(&'a DataCostTable),
    Labeling(&'a [Label]),
}

#[derive(Clone, Debug, Default)]
pub struct TexturingReport {
    pub selection: Option<ViewSelectionReport>,
    pub global_leveling: Option<GlobalLevelingReport>,
    pub local_leveling: Option<LocalLevelingReport>,
    pub num_topology_issues: usize,
    pub unprojected_faces: Vec<usize>,
}

pub struct TexturedPatches {
    pub labeling: Vec<Label>,
    pub patches: Vec<TexturePatch>,
    pub report: TexturingReport,
}

impl TexturedPatches {
    pub fn num_textured_faces(&self) -> usize {
        self.patches.iter().map(|p| p.faces.len()).sum()
    }
}

pub fn texture_mesh(
    mesh: &Mesh,
    views: &[TextureView],
    source: LabelingSource,
    params: &TexturingParams,
) -> Result<TexturedPatches> {
    mesh.validate()?;
    params.validate()?;
    let mut report = TexturingReport::default();

    info!("  building adjacency graph...");
    let topo = MeshTopology::new(mesh);
    let mut graph =
        Graph::build(mesh, &topo, views.len(), params.edge_weighting);
    report.num_topology_issues = graph.topology_issues().count();

    match source {
        LabelingSource::DataCosts(costs) => {
            info!("  selecting views for {} faces...", mesh.num_faces());
            report.selection = Some(select_views(
                costs,
                &mut graph,
                params.smoothness,
                params.max_selection_passes,
            )?);
        }
        LabelingSource::Labeling(labels) => {
            info!("  using the given labeling...");
            graph.set_labels(labels)?;
        }
    }

    info!("  generating texture patches...");
    let PatchCollection {
        mut patches,
        vertex_infos,
        unprojected_faces,
    } = generate_texture_patches(&graph, mesh, views, params.patch_border)?;
    report.unprojected_faces = unprojected_faces;
    info!("  {} texture patches generated", patches.len());

    if params.skip_global_seam_leveling {
        ColorCorrection::identity(&patches)
            .apply(&mut patches, params.color_clamp())?;
    } else {
        info!("  running global seam leveling...");
        let solver = ConjugateGradients {
            max_iterations: params.solver_max_iterations,
            tolerance: params.solver_tolerance,
        };
        let mut correction = ColorCorrection::new(
            &patches,
            &vertex_infos,
            mesh,
            params.leveling_regularization,
            &solver,
        )?;
        correction.apply(&mut patches, params.color_clamp())?;
        if !correction.report.failed_channels.is_empty() {
            warn!(
                "  global seam leveling skipped for channels {:?}",
                correction.report.failed_channels
            );
        }
        report.global_leveling = Some(correction.report);
    }

    if !params.skip_local_seam_leveling {
        info!("  running local seam leveling...");
        report.local_leveling = Some(level_seams_locally(
            &mut patches,
            &graph,
            mesh,
            params.blend_radius,
            params.color_clamp(),
        )?);
    }

    Ok(TexturedPatches {
        labeling: graph.labels().to_vec(),
        patches,
        report,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::texture::input_patching::test::*;
    use base::assert_eq_f64;
    use base::defs::ErrorKind::*;

    const INF: f64 = f64::INFINITY;

    fn seam_gap(result: &TexturedPatches) -> f64 {
        let p0 = &result.patches[0];
        let p1 = &result.patches[1];
        let a = get_pixel_as_vector3(8, 5, &p0.image)[0];
        let b = get_pixel_as_vector3(1, 5, &p1.image)[0];
        (a - b).abs()
    }

    #[test]
    fn test_texture_mesh_from_data_costs() {
        let (mesh, views) = strip_scene(2, &[51, 153]);
        let costs = DataCostTable::from_dense(
            &[
                vec![0.0, INF],
                vec![0.0, INF],
                vec![INF, 0.0],
                vec![INF, 0.0],
            ],
            2,
        )
        .unwrap();
        let params = TexturingParams::default();
        let result = texture_mesh(
            &mesh,
            &views,
            LabelingSource::DataCosts(&costs),
            &params,
        )
        .unwrap();
        assert_eq!(result.labeling, vec![1, 1, 2, 2]);
        assert_eq!(result.patches.len(), 2);
        assert_eq!(result.num_textured_faces(), 4);
        assert!(result.report.selection.as_ref().unwrap().converged);
        let global = result.report.global_leveling.as_ref().unwrap();
        assert!(global.max_seam_difference_after <= 1e-5);
        assert!(result.report.local_leveling.is_some());
        assert!(seam_gap(&result) < 0.01);
    }

    #[test]
    fn test_skipping_leveling_keeps_colors() {
        let (mesh, views) = strip_scene(2, &[51, 153]);
        let params = TexturingParams {
            skip_global_seam_leveling: true,
            skip_local_seam_leveling: true,
            ..Default::default()
        };
        let result = texture_mesh(
            &mesh,
            &views,
            LabelingSource::Labeling(&[1, 1, 2, 2]),
            &params,
        )
        .unwrap();
        assert!(result.report.selection.is_none());
        assert!(result.report.global_leveling.is_none());
        assert_eq_f64!(seam_gap(&result), 0.4, 1e-6);
        assert!(result.patches.iter().all(|p| p.is_valid(4, 4)));
    }

    #[test]
    fn test_local_leveling_alone_narrows_seam() {
        let (mesh, views) = strip_scene(2, &[51, 153]);
        let params = TexturingParams {
            skip_global_seam_leveling: true,
            ..Default::default()
        };
        let result = texture_mesh(
            &mesh,
            &views,
            LabelingSource::Labeling(&[1, 1, 2, 2]),
            &params,
        )
        .unwrap();
        assert!(seam_gap(&result) < 0.4);
    }

    #[test]
    fn test_bad_labeling_is_rejected() {
        let (mesh, views) = strip_scene(2, &[51, 153]);
        let params = TexturingParams::default();
        let err = texture_mesh(
            &mesh,
            &views,
            LabelingSource::Labeling(&[1, 1, 3, 2]),
            &params,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind, ValidationError);

        let costs = DataCostTable::new(3, 2);
        let err = texture_mesh(
            &mesh,
            &views,
            LabelingSource::DataCosts(&costs),
            &params,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind, ValidationError);
    }
}
