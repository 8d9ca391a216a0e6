use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;

use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};
use base::tr;
use base::util::fs;

// Unary cost of a face which has no usable view (label 0, or a label whose
// view cannot see the face). It is far above any real photometric cost.
pub const EXCLUDED_COST: f64 = 1e9;

// A move must lower the energy by more than this fraction of its variable
// part to be accepted.
const ENERGY_RTOL: f64 = 1e-9;

fn unary_cost(face_idx: usize, label: Label, costs: &DataCostTable) -> f64 {
    label_to_view(label)
        .and_then(|view| costs.get(face_idx, view))
        .unwrap_or(EXCLUDED_COST)
}

// Splits E(L) into the number of faces charged `EXCLUDED_COST` and the sum
// of all other terms. Faces without any feasible view stay excluded, so
// only the second part varies during view selection.
fn energy_terms(
    labels: &[Label],
    costs: &DataCostTable,
    graph: &Graph,
    smoothness: f64,
) -> (usize, f64) {
    let mut num_excluded = 0;
    let mut data = 0.0;
    for (face_idx, &label) in labels.iter().enumerate() {
        match label_to_view(label).and_then(|v| costs.get(face_idx, v)) {
            Some(cost) => data += cost,
            None => num_excluded += 1,
        }
    }
    let smooth: f64 = graph
        .edges()
        .iter()
        .filter(|e| labels[e.faces[0]] != labels[e.faces[1]])
        .map(|e| e.weight)
        .sum();
    (num_excluded, data + smoothness * smooth)
}

// E(L) = sum of unary costs + smoothness * sum of weights of edges whose
// faces carry different labels. Summed sequentially, so that equal inputs
// give bit-identical energies.
pub fn labeling_energy(
    labels: &[Label],
    costs: &DataCostTable,
    graph: &Graph,
    smoothness: f64,
) -> f64 {
    let (num_excluded, rest) = energy_terms(labels, costs, graph, smoothness);
    num_excluded as f64 * EXCLUDED_COST + rest
}

// E(proposed) - E(labels), summed over the changed faces and their edges
// only.
fn move_delta(
    labels: &[Label],
    proposed: &[Label],
    costs: &DataCostTable,
    graph: &Graph,
    smoothness: f64,
) -> f64 {
    let changed = |f: usize| labels[f] != proposed[f];
    let mut delta = 0.0;
    for face_idx in (0..labels.len()).filter(|&f| changed(f)) {
        delta += unary_cost(face_idx, proposed[face_idx], costs)
            - unary_cost(face_idx, labels[face_idx], costs);
        for &edge_idx in graph.incident_edges(face_idx) {
            let edge = &graph.edges()[edge_idx];
            let other = edge.other(face_idx);
            if changed(other) && other < face_idx {
                continue; // Counted from the other side.
            }
            let before = labels[face_idx] != labels[other];
            let after = proposed[face_idx] != proposed[other];
            if before != after {
                let w = smoothness * edge.weight;
                delta += if after { w } else { -w };
            }
        }
    }
    delta
}

// Per-face minimum feasible cost, ties going to the lowest view.
pub fn initial_labeling(costs: &DataCostTable) -> Vec<Label> {
    (0..costs.num_faces())
        .into_par_iter()
        .map(|face_idx| {
            let mut best: Option<(usize, f64)> = None;
            for &(view, cost) in costs.row(face_idx) {
                if best.map_or(true, |(_, c)| cost < c) {
                    best = Some((view, cost));
                }
            }
            best.map_or(NO_LABEL, |(view, _)| view_to_label(view))
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Proposal {
    pub labels: Vec<Label>,
    pub delta_energy: f64,
}

// Computes the best expansion of `alpha` from the given labeling. Every
// face may either keep its label or switch to `alpha`; faces which cannot
// see view `alpha` and faces without any view are held fixed. Nothing is
// mutated, the caller decides whether to accept the proposal.
pub fn expansion_move(
    labels: &[Label],
    alpha: Label,
    costs: &DataCostTable,
    graph: &Graph,
    smoothness: f64,
) -> Proposal {
    let alpha_view = label_to_view(alpha);
    let num_faces = labels.len();

    let mut node_of = vec![None; num_faces];
    let mut faces = Vec::new();
    for (face_idx, &label) in labels.iter().enumerate() {
        let feasible = alpha_view
            .and_then(|view| costs.get(face_idx, view))
            .is_some();
        if label != NO_LABEL && label != alpha && feasible {
            node_of[face_idx] = Some(faces.len());
            faces.push(face_idx);
        }
    }

    if faces.is_empty() {
        return Proposal {
            labels: labels.to_vec(),
            delta_energy: 0.0,
        };
    }

    // Cost of switching minus cost of keeping, per free face.
    let mut deltas: Vec<f64> = faces
        .iter()
        .map(|&face_idx| {
            unary_cost(face_idx, alpha, costs)
                - unary_cost(face_idx, labels[face_idx], costs)
        })
        .collect();

    let mut net = FlowNetwork::new(faces.len());
    for edge in graph.edges() {
        let [f0, f1] = edge.faces;
        let w = smoothness * edge.weight;
        if w <= 0.0 {
            continue;
        }
        let differ = |a: Label, b: Label| if a != b { w } else { 0.0 };
        match (node_of[f0], node_of[f1]) {
            (None, None) => (),
            (Some(p), None) => {
                deltas[p] += differ(alpha, labels[f1])
                    - differ(labels[f0], labels[f1]);
            }
            (None, Some(q)) => {
                deltas[q] += differ(alpha, labels[f0])
                    - differ(labels[f1], labels[f0]);
            }
            (Some(p), Some(q)) => {
                // Both free and both currently differ from alpha, so only
                // the (keep, keep) configuration may cost less than w.
                let a = differ(labels[f0], labels[f1]);
                deltas[p] += w - a;
                deltas[q] -= w;
                net.add_edge(p, q, 2.0 * w - a);
            }
        }
    }

    for (node, &delta) in deltas.iter().enumerate() {
        if delta > 0.0 {
            net.add_terminal_weights(node, delta, 0.0);
        } else {
            net.add_terminal_weights(node, 0.0, -delta);
        }
    }

    net.max_flow();

    // Only faces on the sink side of every minimum cut switch, so a face
    // which gains nothing keeps its label.
    let mut proposed = labels.to_vec();
    for (node, switch) in net.sink_side().into_iter().enumerate() {
        if switch {
            proposed[faces[node]] = alpha;
        }
    }

    let delta_energy =
        move_delta(labels, &proposed, costs, graph, smoothness);
    Proposal {
        labels: proposed,
        delta_energy,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SelectionState {
    Scanning,
    Improved,
    Converged,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewSelectionReport {
    pub initial_energy: f64,
    // Energy after every accepted move.
    pub energies: Vec<f64>,
    pub passes: usize,
    pub converged: bool,
}

impl ViewSelectionReport {
    pub fn final_energy(&self) -> f64 {
        self.energies.last().copied().unwrap_or(self.initial_energy)
    }
}

fn validate_smoothness(smoothness: f64) -> Result<()> {
    if !(smoothness >= 0.0 && smoothness.is_finite()) {
        return Err(Error::new(
            ValidationError,
            format!("invalid smoothness {}", smoothness),
        ));
    }
    Ok(())
}

// Alpha-expansion over all views, in round-robin order, until a full pass
// accepts no move or `max_passes` is reached. The result is stored as the
// labels of the graph.
pub fn select_views(
    costs: &DataCostTable,
    graph: &mut Graph,
    smoothness: f64,
    max_passes: usize,
) -> Result<ViewSelectionReport> {
    costs.validate_for(graph)?;
    validate_smoothness(smoothness)?;

    let mut labels = initial_labeling(costs);
    let excluded = (0..costs.num_faces())
        .filter(|&face_idx| !costs.is_feasible(face_idx))
        .count();
    if excluded > 0 {
        info!("  {} faces are not seen by any view", excluded);
    }

    let (num_excluded, mut variable) =
        energy_terms(&labels, costs, graph, smoothness);
    let mut energy = num_excluded as f64 * EXCLUDED_COST + variable;
    let mut report = ViewSelectionReport {
        initial_energy: energy,
        energies: Vec::new(),
        passes: 0,
        converged: false,
    };
    info!("  initial labeling energy {:.6}", energy);

    let mut state = SelectionState::Scanning;
    while state != SelectionState::Converged && report.passes < max_passes {
        state = SelectionState::Scanning;
        for view in 0..graph.num_views() {
            let alpha = view_to_label(view);
            let proposal =
                expansion_move(&labels, alpha, costs, graph, smoothness);
            let threshold = ENERGY_RTOL * variable.abs().max(1.0);
            if proposal.delta_energy < -threshold {
                labels = proposal.labels;
                let (num_excluded, rest) =
                    energy_terms(&labels, costs, graph, smoothness);
                variable = rest;
                energy = num_excluded as f64 * EXCLUDED_COST + rest;
                report.energies.push(energy);
                state = SelectionState::Improved;
                debug!("  expanded label {}, energy {:.6}", alpha, energy);
            }
        }
        report.passes += 1;
        if state == SelectionState::Scanning {
            state = SelectionState::Converged;
        }
    }
    report.converged = state == SelectionState::Converged;

    info!(
        "  view selection {} after {} passes, energy {:.6}",
        if report.converged {
            "converged"
        } else {
            "stopped"
        },
        report.passes,
        energy
    );

    graph.set_labels(&labels)?;
    Ok(report)
}

pub fn save_labeling<W: Write>(
    labels: &[Label],
    writer: W,
    params: &tr::WriterParams,
) -> Result<()> {
    let msg = tr::Labeling {
        labels: labels.iter().map(|&l| l as u64).collect(),
    };
    tr::write_message(&msg, writer, params)
}

pub fn load_labeling<R: Read>(reader: R) -> Result<Vec<Label>> {
    let msg: tr::Labeling = tr::read_message(reader)?;
    Ok(msg.labels.iter().map(|&l| l as Label).collect())
}

pub fn save_labeling_to_file<P: AsRef<Path>>(
    labels: &[Label],
    path: P,
    params: &tr::WriterParams,
) -> Result<()> {
    save_labeling(labels, fs::create_file(path)?, params)
}

pub fn load_labeling_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<Label>> {
    load_labeling(fs::open_file(path)?)
}
