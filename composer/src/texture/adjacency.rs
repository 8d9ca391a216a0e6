use std::collections::BTreeMap;

use log::{debug, warn};
use rayon::prelude::*;

use crate::mesh::face_edges;
use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyIssue {
    // The shared mesh edge belongs to more than two faces.
    NonManifoldEdge,
    // The two faces share more than one mesh edge.
    MultipleSharedEdges,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub faces: [usize; 2],
    pub weight: f64,
    pub issue: Option<TopologyIssue>,
}

impl Edge {
    pub fn other(&self, face_idx: usize) -> usize {
        if self.faces[0] == face_idx {
            self.faces[1]
        } else {
            self.faces[0]
        }
    }
}

// Face adjacency graph. Topology is frozen at construction, only the
// per-face labels change afterwards.
#[derive(Clone, Debug)]
pub struct Graph {
    num_views: usize,
    labels: Vec<Label>,
    edges: Vec<Edge>,
    adj_lists: Vec<Vec<usize>>,
}

struct Contact {
    other: usize,
    length: f64,
    non_manifold: bool,
}

fn face_contacts(
    face_idx: usize,
    mesh: &Mesh,
    topo: &MeshTopology,
) -> Vec<Contact> {
    let mut edges = face_edges(mesh.faces[face_idx]).to_vec();
    edges.sort_unstable();
    edges.dedup();

    let mut contacts = Vec::new();
    for e in edges {
        if e[0] == e[1] {
            continue; // Collapsed edge of a degenerate face.
        }
        let sharing = topo.faces_sharing(e);
        for &other in sharing {
            if other > face_idx {
                contacts.push(Contact {
                    other,
                    length: mesh.edge_length(e),
                    non_manifold: sharing.len() > 2,
                });
            }
        }
    }
    contacts
}

impl Graph {
    pub fn new(num_faces: usize, num_views: usize) -> Graph {
        Graph {
            num_views,
            labels: vec![NO_LABEL; num_faces],
            edges: Vec::new(),
            adj_lists: vec![Vec::new(); num_faces],
        }
    }

    pub fn build(
        mesh: &Mesh,
        topo: &MeshTopology,
        num_views: usize,
        weighting: EdgeWeighting,
    ) -> Graph {
        let mut graph = Graph::new(mesh.num_faces(), num_views);

        // Contacts are gathered in parallel and merged in face order, so
        // the edge list does not depend on scheduling.
        let contacts: Vec<Vec<Contact>> = (0..mesh.num_faces())
            .into_par_iter()
            .map(|face_idx| face_contacts(face_idx, mesh, topo))
            .collect();

        for (face_idx, face_contacts) in contacts.into_iter().enumerate() {
            let mut merged = BTreeMap::<usize, (f64, usize, bool)>::new();
            for c in face_contacts {
                let entry = merged.entry(c.other).or_insert((0.0, 0, false));
                entry.0 += c.length;
                entry.1 += 1;
                entry.2 |= c.non_manifold;
            }
            for (other, (length, count, non_manifold)) in merged {
                let issue = if non_manifold {
                    Some(TopologyIssue::NonManifoldEdge)
                } else if count > 1 {
                    Some(TopologyIssue::MultipleSharedEdges)
                } else {
                    None
                };
                let weight = match weighting {
                    EdgeWeighting::Uniform => 1.0,
                    EdgeWeighting::EdgeLength => length,
                };
                graph.add_edge(face_idx, other, weight, issue);
            }
        }

        let num_issues = graph.topology_issues().count();
        if num_issues > 0 {
            if let Some((idx, issue)) = graph.topology_issues().next() {
                let [f0, f1] = graph.edges[idx].faces;
                warn!(
                    "  {} adjacency edges flagged, e.g. faces {} and {}: {:?}",
                    num_issues, f0, f1, issue
                );
            }
        }
        debug!(
            "  adjacency graph: {} nodes, {} edges",
            graph.num_nodes(),
            graph.num_edges()
        );

        graph
    }

    fn add_edge(
        &mut self,
        f0: usize,
        f1: usize,
        weight: f64,
        issue: Option<TopologyIssue>,
    ) {
        let idx = self.edges.len();
        self.edges.push(Edge {
            faces: [f0, f1],
            weight,
            issue,
        });
        self.adj_lists[f0].push(idx);
        self.adj_lists[f1].push(idx);
    }

    pub fn num_nodes(&self) -> usize {
        self.labels.len()
    }

    pub fn num_views(&self) -> usize {
        self.num_views
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn incident_edges(&self, face_idx: usize) -> &[usize] {
        &self.adj_lists[face_idx]
    }

    pub fn neighbors(
        &self,
        face_idx: usize,
    ) -> impl Iterator<Item = usize> + Clone + '_ {
        self.adj_lists[face_idx]
            .iter()
            .map(move |&e| self.edges[e].other(face_idx))
    }

    pub fn topology_issues(
        &self,
    ) -> impl Iterator<Item = (usize, TopologyIssue)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| e.issue.map(|issue| (idx, issue)))
    }

    pub fn get_label(&self, face_idx: usize) -> Label {
        self.labels[face_idx]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn set_label(&mut self, face_idx: usize, label: Label) -> Result<()> {
        if face_idx >= self.num_nodes() {
            return Err(Error::new(
                ValidationError,
                format!(
                    "face {} is out of range (graph has {} nodes)",
                    face_idx,
                    self.num_nodes()
                ),
            ));
        }
        if label > self.num_views {
            return Err(Error::new(
                ValidationError,
                format!(
                    "label {} of face {} exceeds number of views {}",
                    label, face_idx, self.num_views
                ),
            ));
        }
        self.labels[face_idx] = label;
        Ok(())
    }

    // The whole labeling is validated before any label is touched.
    pub fn set_labels(&mut self, labels: &[Label]) -> Result<()> {
        if labels.len() != self.num_nodes() {
            return Err(Error::new(
                ValidationError,
                format!(
                    "labeling has {} entries while mesh has {} faces",
                    labels.len(),
                    self.num_nodes()
                ),
            ));
        }
        if let Some((face_idx, &label)) =
            labels.iter().enumerate().find(|&(_, &l)| l > self.num_views)
        {
            return Err(Error::new(
                ValidationError,
                format!(
                    "label {} of face {} exceeds number of views {}",
                    label, face_idx, self.num_views
                ),
            ));
        }
        self.labels.copy_from_slice(labels);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::test::*;
    use base::assert_eq_f64;

    fn build(mesh: &Mesh, weighting: EdgeWeighting) -> Graph {
        Graph::build(mesh, &MeshTopology::new(mesh), 2, weighting)
    }

    #[test]
    fn test_plane_has_single_edge() {
        let graph = build(&new_plane(), EdgeWeighting::EdgeLength);
        assert_eq!(graph.num_nodes(), 2);
        assert_eq!(graph.num_edges(), 1);
        let edge = &graph.edges()[0];
        assert_eq!(edge.faces, [0, 1]);
        assert_eq_f64!(edge.weight, 2f64.sqrt());
        assert_eq!(edge.issue, None);
        assert_eq!(graph.neighbors(0).collect::<Vec<_>>(), vec![1]);
        assert_eq!(graph.neighbors(1).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_tetrahedron_neighbors() {
        let graph = build(&new_tetrahedron(), EdgeWeighting::Uniform);
        assert_eq!(graph.num_edges(), 6);
        for face_idx in 0..4 {
            let neighbors = graph.neighbors(face_idx);
            // The sequence can be walked more than once.
            assert_eq!(neighbors.clone().count(), 3);
            assert!(neighbors.clone().all(|n| n != face_idx));
            assert!(graph.incident_edges(face_idx).len() == 3);
        }
        assert!(graph.edges().iter().all(|e| e.weight == 1.0));
        assert_eq!(graph.topology_issues().count(), 0);
    }

    #[test]
    fn test_non_manifold_edges_are_flagged() {
        let mut mesh = new_plane();
        mesh.vertices.push(Point3::new(0.5, 0.5, 1.0));
        mesh.faces.push([0, 2, 4]);
        let graph = build(&mesh, EdgeWeighting::Uniform);
        assert_eq!(graph.num_edges(), 3);
        let issues: Vec<_> = graph.topology_issues().collect();
        assert_eq!(issues.len(), 3);
        assert!(issues
            .iter()
            .all(|&(_, i)| i == TopologyIssue::NonManifoldEdge));
    }

    #[test]
    fn test_degenerate_neighbor_is_not_flagged() {
        let mut mesh = new_plane();
        mesh.faces = vec![[0, 1, 2], [0, 1, 0]];
        let graph = build(&mesh, EdgeWeighting::EdgeLength);
        assert_eq!(graph.num_edges(), 1);
        let edge = &graph.edges()[0];
        assert_eq!(edge.faces, [0, 1]);
        assert_eq_f64!(edge.weight, 1.0);
        assert_eq!(edge.issue, None);
        assert_eq!(graph.topology_issues().count(), 0);
    }

    #[test]
    fn test_construction_is_deterministic() {
        let mesh = new_strip(50);
        let a = build(&mesh, EdgeWeighting::EdgeLength);
        let b = build(&mesh, EdgeWeighting::EdgeLength);
        assert_eq!(a.edges(), b.edges());
        assert!(a.edges().windows(2).all(|w| w[0].faces < w[1].faces));
    }

    #[test]
    fn test_set_label_range() {
        let mut graph = build(&new_plane(), EdgeWeighting::Uniform);
        graph.set_label(0, 2).unwrap();
        assert_eq!(graph.get_label(0), 2);
        let err = graph.set_label(1, 3).unwrap_err();
        assert_eq!(err.kind, ValidationError);
        assert_eq!(graph.get_label(1), NO_LABEL);
        assert!(graph.set_label(5, 1).is_err());
    }

    #[test]
    fn test_set_labels_rejects_without_mutation() {
        let mut graph = build(&new_plane(), EdgeWeighting::Uniform);
        graph.set_labels(&[1, 2]).unwrap();

        let err = graph.set_labels(&[1]).unwrap_err();
        assert_eq!(err.kind, ValidationError);
        assert_eq!(
            &err.description,
            "labeling has 1 entries while mesh has 2 faces"
        );

        let err = graph.set_labels(&[0, 3]).unwrap_err();
        assert_eq!(err.kind, ValidationError);
        assert_eq!(graph.labels(), &[1, 2]);
    }
}
