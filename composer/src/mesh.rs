use std::collections::BTreeMap;

use base::defs::{Error, ErrorKind::*, Result};

pub type Point3 = nalgebra::Point3<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Point3>,
    pub faces: Vec<[usize; 3]>,
}

impl Mesh {
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn validate(&self) -> Result<()> {
        for (face_idx, face) in self.faces.iter().enumerate() {
            for &v in face {
                if v >= self.vertices.len() {
                    return Err(Error::new(
                        MalformedData,
                        format!(
                            "face {} references missing vertex {}",
                            face_idx, v
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn edge_length(&self, edge: [usize; 2]) -> f64 {
        (self.vertices[edge[0]] - self.vertices[edge[1]]).norm()
    }
}

pub fn ordered(e: [usize; 2]) -> [usize; 2] {
    if e[0] < e[1] {
        e
    } else {
        [e[1], e[0]]
    }
}

pub fn face_edges(face: [usize; 3]) -> [[usize; 2]; 3] {
    let [v0, v1, v2] = face;
    [ordered([v0, v1]), ordered([v1, v2]), ordered([v0, v2])]
}

// Edges are kept ordered so that anything derived from the topology is
// reproducible between runs.
#[derive(Debug, Clone)]
pub struct MeshTopology {
    pub faces_around_edge: BTreeMap<[usize; 2], Vec<usize>>,
}

impl MeshTopology {
    pub fn new(mesh: &Mesh) -> MeshTopology {
        let mut faces_around_edge = BTreeMap::new();
        for (f_idx, &f) in mesh.faces.iter().enumerate() {
            // A degenerate face lists some edge twice.
            let mut edges = face_edges(f);
            edges.sort_unstable();
            for (i, &e) in edges.iter().enumerate() {
                if i > 0 && edges[i - 1] == e {
                    continue;
                }
                faces_around_edge
                    .entry(e)
                    .or_insert_with(Vec::new)
                    .push(f_idx);
            }
        }
        MeshTopology { faces_around_edge }
    }

    pub fn faces_sharing(&self, edge: [usize; 2]) -> &[usize] {
        self.faces_around_edge
            .get(&ordered(edge))
            .map(|f| f.as_slice())
            .unwrap_or(&[])
    }
}
