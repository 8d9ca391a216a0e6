use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::mesh::{Mesh, Point3};
use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use base::util::fs;

const MAX_NUM_FACE_VERTICES: usize = 16;

pub fn read_obj_mesh_from_file<P: AsRef<Path>>(path: P) -> Result<Mesh> {
    read_obj_mesh(fs::open_file(path)?)
}

// Reads vertices and faces of a Wavefront .obj file. Polygons are fan-
// triangulated, texture and normal references are ignored.
pub fn read_obj_mesh<R: Read>(reader: R) -> Result<Mesh> {
    let mut mesh = Mesh::default();

    for (i, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.res(|| "failed to read .obj line".to_string())?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.first() {
            Some(&"v") => import_v(&mut mesh, &parts, i + 1)?,
            Some(&"f") => import_f(&mut mesh, &parts, i + 1)?,
            _ => (),
        }
    }

    mesh.validate()?;
    Ok(mesh)
}

fn import_v(mesh: &mut Mesh, parts: &[&str], line: usize) -> Result<()> {
    if parts.len() < 4 || parts.len() > 5 {
        return Err(Error::new(
            MalformedData,
            format!("malformed v-statement at line {}", line),
        ));
    }

    let x = parse_coord("x-coordinate of v-statement", line, parts[1])?;
    let y = parse_coord("y-coordinate of v-statement", line, parts[2])?;
    let z = parse_coord("z-coordinate of v-statement", line, parts[3])?;
    mesh.vertices.push(Point3::new(x, y, z));

    Ok(())
}

fn import_f(mesh: &mut Mesh, parts: &[&str], line: usize) -> Result<()> {
    let num_vertices_err = |kind, prop| {
        let msg = "number of vertices in f-statement at line";
        Err(Error::new(kind, format!("{} {} {}", prop, msg, line)))
    };
    if parts.len() < 4 {
        return num_vertices_err(MalformedData, "bad");
    } else if parts.len() > MAX_NUM_FACE_VERTICES + 1 {
        return num_vertices_err(UnsupportedFeature, "unsupported");
    }

    let mut vertices = Vec::with_capacity(parts.len() - 1);
    for (i, part) in parts[1..].iter().enumerate() {
        vertices.push(parse_f_vertex(part, i + 1, line)?);
    }

    for i in 1..vertices.len() - 1 {
        mesh.faces.push([vertices[0], vertices[i], vertices[i + 1]]);
    }

    Ok(())
}

// Accepts `v`, `v/t`, `v/t/n` and `v//n` forms, returns a zero-based index.
fn parse_f_vertex(part: &str, vnum: usize, line: usize) -> Result<usize> {
    let malformed = || {
        Error::new(
            MalformedData,
            format!(
                "malformed vertex {} in f-statement at line {}",
                vnum, line
            ),
        )
    };

    let mut iter = part.split('/');
    let vertex = iter.next().unwrap_or_default();
    let rest: Vec<&str> = iter.collect();
    if rest.len() > 2 || rest.iter().any(|c| !is_index_or_empty(c)) {
        return Err(malformed());
    }

    match vertex.parse::<usize>() {
        Ok(num) if num > 0 => Ok(num - 1),
        _ => Err(malformed()),
    }
}

fn is_index_or_empty(component: &str) -> bool {
    component.is_empty() || component.parse::<usize>().map_or(false, |n| n > 0)
}

fn parse_coord(what: &str, line: usize, str: &str) -> Result<f64> {
    match str.parse::<f64>() {
        Ok(val) if val.is_finite() => Ok(val),
        _ => Err(Error::new(
            MalformedData,
            format!("failed to parse {} at line {}", what, line),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn read(text: &str) -> Result<Mesh> {
        read_obj_mesh(text.as_bytes())
    }

    #[test]
    fn test_read_quad() {
        let mesh = read(concat!(
            "# quad\n",
            "v 0 0 0\n",
            "v 1 0 0\n",
            "v 1 1 0\n",
            "v 0 1 0 1.0\n",
            "vt 0 0\n",
            "f 1/1 2/1/1 3//1 4\n",
        ))
        .unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.vertices[2], Point3::new(1.0, 1.0, 0.0));
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_bad_vertex_reference() {
        let err = read("v 0 0 0\nv 1 0 0\nv 1 1 0\nf 1 2 0\n").unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(
            &err.description,
            "malformed vertex 3 in f-statement at line 4"
        );

        let err = read("v 0 0 0\nv 1 0 0\nv 1 1 0\nf 1 2 -1\n").unwrap_err();
        assert_eq!(err.kind, MalformedData);

        let err = read("v 0 0 0\nv 1 0 0\nv 1 1 0\nf 1 2 3/1/1/1\n")
            .unwrap_err();
        assert_eq!(err.kind, MalformedData);
    }

    #[test]
    fn test_too_few_face_vertices() {
        let err = read("v 0 0 0\nv 1 0 0\nf 1 2\n").unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(
            &err.description,
            "bad number of vertices in f-statement at line 3"
        );
    }

    #[test]
    fn test_bad_coordinate() {
        let err = read("v 0 zero 0\n").unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(
            &err.description,
            "failed to parse y-coordinate of v-statement at line 1"
        );
    }

    #[test]
    fn test_unknown_vertex_fails_validation() {
        let err = read("v 0 0 0\nv 1 0 0\nv 1 1 0\nf 1 2 4\n").unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "face 0 references missing vertex 3");
    }
}
