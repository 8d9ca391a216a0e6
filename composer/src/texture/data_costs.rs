use std::io::{Read, Write};
use std::path::Path;

use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};
use base::tr;
use base::util::fs;

// Sparse face x view cost matrix. A missing entry means the view cannot
// texture the face.
#[derive(Clone, Debug, PartialEq)]
pub struct DataCostTable {
    num_views: usize,
    rows: Vec<Vec<(usize, f64)>>,
}

fn check_cost(face_idx: usize, view: usize, cost: f64) -> Result<()> {
    if cost.is_nan() || cost < 0.0 {
        return Err(Error::new(
            ValidationError,
            format!(
                "invalid data cost {} for face {} and view {}",
                cost, face_idx, view
            ),
        ));
    }
    Ok(())
}

impl DataCostTable {
    pub fn new(num_faces: usize, num_views: usize) -> DataCostTable {
        DataCostTable {
            num_views,
            rows: vec![Vec::new(); num_faces],
        }
    }

    // Builds the table from dense rows, where infinity marks infeasibility.
    pub fn from_dense(
        costs: &[Vec<f64>],
        num_views: usize,
    ) -> Result<DataCostTable> {
        let mut table = DataCostTable::new(costs.len(), num_views);
        for (face_idx, row) in costs.iter().enumerate() {
            if row.len() != num_views {
                return Err(Error::new(
                    ValidationError,
                    format!(
                        "data cost row of face {} has {} entries instead of {}",
                        face_idx,
                        row.len(),
                        num_views
                    ),
                ));
            }
            for (view, &cost) in row.iter().enumerate() {
                table.set(face_idx, view, cost)?;
            }
        }
        Ok(table)
    }

    pub fn num_faces(&self) -> usize {
        self.rows.len()
    }

    pub fn num_views(&self) -> usize {
        self.num_views
    }

    pub fn set(
        &mut self,
        face_idx: usize,
        view: usize,
        cost: f64,
    ) -> Result<()> {
        if face_idx >= self.num_faces() || view >= self.num_views {
            return Err(Error::new(
                ValidationError,
                format!(
                    "data cost entry ({}, {}) is outside of {}x{} table",
                    face_idx,
                    view,
                    self.num_faces(),
                    self.num_views
                ),
            ));
        }
        check_cost(face_idx, view, cost)?;

        let row = &mut self.rows[face_idx];
        match row.binary_search_by_key(&view, |&(v, _)| v) {
            Ok(pos) if cost.is_finite() => row[pos].1 = cost,
            Ok(pos) => {
                row.remove(pos);
            }
            Err(pos) if cost.is_finite() => row.insert(pos, (view, cost)),
            Err(_) => (),
        }
        Ok(())
    }

    pub fn get(&self, face_idx: usize, view: usize) -> Option<f64> {
        let row = &self.rows[face_idx];
        row.binary_search_by_key(&view, |&(v, _)| v)
            .ok()
            .map(|pos| row[pos].1)
    }

    // Feasible (view, cost) pairs of the face, ordered by view.
    pub fn row(&self, face_idx: usize) -> &[(usize, f64)] {
        &self.rows[face_idx]
    }

    pub fn is_feasible(&self, face_idx: usize) -> bool {
        !self.rows[face_idx].is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for (face_idx, row) in self.rows.iter().enumerate() {
            for (i, &(view, cost)) in row.iter().enumerate() {
                if view >= self.num_views || (i > 0 && row[i - 1].0 >= view) {
                    return Err(Error::new(
                        ValidationError,
                        format!(
                            "data cost row of face {} has bad view {}",
                            face_idx, view
                        ),
                    ));
                }
                check_cost(face_idx, view, cost)?;
            }
        }
        Ok(())
    }

    pub fn validate_for(&self, graph: &Graph) -> Result<()> {
        if self.num_faces() != graph.num_nodes()
            || self.num_views != graph.num_views()
        {
            return Err(Error::new(
                ValidationError,
                format!(
                    "data costs are {}x{} while graph has {} faces \
                     and {} views",
                    self.num_faces(),
                    self.num_views,
                    graph.num_nodes(),
                    graph.num_views()
                ),
            ));
        }
        self.validate()
    }

    pub fn to_message(&self) -> tr::DataCosts {
        tr::DataCosts {
            num_faces: self.num_faces() as u64,
            num_views: self.num_views as u64,
            faces: self
                .rows
                .iter()
                .map(|row| tr::FaceCosts {
                    views: row.iter().map(|&(v, _)| v as u32).collect(),
                    costs: row.iter().map(|&(_, c)| c).collect(),
                })
                .collect(),
        }
    }

    pub fn from_message(msg: &tr::DataCosts) -> Result<DataCostTable> {
        if msg.faces.len() as u64 != msg.num_faces {
            return Err(Error::new(
                ValidationError,
                format!(
                    "data costs declare {} faces but contain {}",
                    msg.num_faces,
                    msg.faces.len()
                ),
            ));
        }
        let mut rows = Vec::with_capacity(msg.faces.len());
        for (face_idx, face) in msg.faces.iter().enumerate() {
            if face.views.len() != face.costs.len() {
                return Err(Error::new(
                    ValidationError,
                    format!("data cost row of face {} is malformed", face_idx),
                ));
            }
            rows.push(
                face.views
                    .iter()
                    .zip(&face.costs)
                    .map(|(&v, &c)| (v as usize, c))
                    .collect(),
            );
        }
        let table = DataCostTable {
            num_views: msg.num_views as usize,
            rows,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn save<W: Write>(
        &self,
        writer: W,
        params: &tr::WriterParams,
    ) -> Result<()> {
        tr::write_message(&self.to_message(), writer, params)
    }

    pub fn load<R: Read>(reader: R) -> Result<DataCostTable> {
        let msg: tr::DataCosts = tr::read_message(reader)?;
        DataCostTable::from_message(&msg)
    }

    pub fn save_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        params: &tr::WriterParams,
    ) -> Result<()> {
        self.save(fs::create_file(path)?, params)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<DataCostTable> {
        DataCostTable::load(fs::open_file(path)?)
    }
}
