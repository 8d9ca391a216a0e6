use std::collections::VecDeque;

const UNREACHED: usize = usize::MAX;

// Relative tolerance under which a residual capacity counts as saturated.
const RESIDUAL_RTOL: f64 = 1e-12;

// Directed flow network with real capacities, solved with Dinic's algorithm.
// Edges are stored in pairs, so that `e ^ 1` is the reverse of `e`.
pub struct FlowNetwork {
    adj: Vec<Vec<usize>>,
    to: Vec<usize>,
    cap: Vec<f64>,
    source: usize,
    sink: usize,
    eps: f64,
}

impl FlowNetwork {
    // Creates `num_nodes` inner nodes plus a source and a sink.
    pub fn new(num_nodes: usize) -> FlowNetwork {
        FlowNetwork {
            adj: vec![Vec::new(); num_nodes + 2],
            to: Vec::new(),
            cap: Vec::new(),
            source: num_nodes,
            sink: num_nodes + 1,
            eps: 0.0,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.adj.len() - 2
    }

    fn push_pair(&mut self, from: usize, to: usize, cap: f64, rev_cap: f64) {
        let e = self.to.len();
        self.to.push(to);
        self.cap.push(cap);
        self.adj[from].push(e);
        self.to.push(from);
        self.cap.push(rev_cap);
        self.adj[to].push(e + 1);
    }

    pub fn add_edge(&mut self, from: usize, to: usize, cap: f64) {
        if cap > 0.0 {
            self.push_pair(from, to, cap, 0.0);
        }
    }

    // Cost `source_cap` is paid when the node ends on the sink side, and
    // `sink_cap` when it ends on the source side.
    pub fn add_terminal_weights(
        &mut self,
        node: usize,
        source_cap: f64,
        sink_cap: f64,
    ) {
        self.add_edge(self.source, node, source_cap);
        self.add_edge(node, self.sink, sink_cap);
    }

    fn build_levels(&self, level: &mut [usize]) -> bool {
        level.iter_mut().for_each(|l| *l = UNREACHED);
        level[self.source] = 0;
        let mut queue = VecDeque::new();
        queue.push_back(self.source);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adj[u] {
                let v = self.to[e];
                if self.cap[e] > self.eps && level[v] == UNREACHED {
                    level[v] = level[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        level[self.sink] != UNREACHED
    }

    // Finds one augmenting path in the level graph and pushes flow along
    // it. Iterative, since paths may be as long as the mesh is large.
    fn augment(&mut self, level: &mut [usize], next: &mut [usize]) -> f64 {
        let mut path: Vec<usize> = Vec::new();
        let mut u = self.source;
        loop {
            if u == self.sink {
                let flow = path
                    .iter()
                    .map(|&e| self.cap[e])
                    .fold(f64::INFINITY, f64::min);
                for &e in &path {
                    self.cap[e] -= flow;
                    self.cap[e ^ 1] += flow;
                }
                return flow;
            }

            let mut advanced = false;
            while next[u] < self.adj[u].len() {
                let e = self.adj[u][next[u]];
                let v = self.to[e];
                if self.cap[e] > self.eps
                    && level[v] != UNREACHED
                    && level[v] == level[u] + 1
                {
                    path.push(e);
                    u = v;
                    advanced = true;
                    break;
                }
                next[u] += 1;
            }

            if !advanced {
                // Dead end, never enter this node again in this phase.
                level[u] = UNREACHED;
                match path.pop() {
                    Some(e) => {
                        u = self.to[e ^ 1];
                        next[u] += 1;
                    }
                    None => return 0.0,
                }
            }
        }
    }

    pub fn max_flow(&mut self) -> f64 {
        let scale = self
            .cap
            .iter()
            .filter(|c| c.is_finite())
            .fold(0.0, |a: f64, &c| a.max(c));
        self.eps = RESIDUAL_RTOL * scale.max(1.0);

        let n = self.adj.len();
        let mut level = vec![UNREACHED; n];
        let mut next = vec![0; n];
        let mut total = 0.0;
        while self.build_levels(&mut level) {
            next.iter_mut().for_each(|i| *i = 0);
            loop {
                let flow = self.augment(&mut level, &mut next);
                if flow <= self.eps {
                    break;
                }
                total += flow;
            }
        }
        total
    }

    // Inner nodes which can still reach the sink in the residual network.
    // This is the smallest sink side among all minimum cuts.
    pub fn sink_side(&self) -> Vec<bool> {
        let mut reaches = vec![false; self.adj.len()];
        reaches[self.sink] = true;
        let mut queue = VecDeque::new();
        queue.push_back(self.sink);
        while let Some(v) = queue.pop_front() {
            for &e in &self.adj[v] {
                let u = self.to[e];
                if !reaches[u] && self.cap[e ^ 1] > self.eps {
                    reaches[u] = true;
                    queue.push_back(u);
                }
            }
        }
        reaches.truncate(self.num_nodes());
        reaches
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use base::assert_eq_f64;

    #[test]
    fn test_single_node() {
        let mut net = FlowNetwork::new(1);
        net.add_terminal_weights(0, 3.0, 5.0);
        assert_eq_f64!(net.max_flow(), 3.0);
        // Switching costs 3, staying costs 5.
        assert_eq!(net.sink_side(), vec![true]);

        let mut net = FlowNetwork::new(1);
        net.add_terminal_weights(0, 5.0, 3.0);
        assert_eq_f64!(net.max_flow(), 3.0);
        assert_eq!(net.sink_side(), vec![false]);
    }

    #[test]
    fn test_ties_stay_on_source_side() {
        let mut net = FlowNetwork::new(1);
        net.add_terminal_weights(0, 2.0, 2.0);
        assert_eq_f64!(net.max_flow(), 2.0);
        assert_eq!(net.sink_side(), vec![false]);
    }

    #[test]
    fn test_classic_network() {
        // s -> 0 (10), s -> 1 (10), 0 -> 1 (2), 0 -> 2 (4), 0 -> 3 (8),
        // 1 -> 3 (9), 3 -> 2 (6), 2 -> t (10), 3 -> t (10).
        let mut net = FlowNetwork::new(4);
        let (s, t) = (4, 5);
        net.add_edge(s, 0, 10.0);
        net.add_edge(s, 1, 10.0);
        net.add_edge(0, 1, 2.0);
        net.add_edge(0, 2, 4.0);
        net.add_edge(0, 3, 8.0);
        net.add_edge(1, 3, 9.0);
        net.add_edge(3, 2, 6.0);
        net.add_edge(2, t, 10.0);
        net.add_edge(3, t, 10.0);
        assert_eq_f64!(net.max_flow(), 19.0);
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let n = 100_000;
        let mut net = FlowNetwork::new(n);
        net.add_terminal_weights(0, 1.0, 0.0);
        for i in 0..n - 1 {
            net.add_edge(i, i + 1, 2.0);
        }
        net.add_terminal_weights(n - 1, 0.0, 1.0);
        assert_eq_f64!(net.max_flow(), 1.0);
        // Both terminal edges are saturated, the smallest sink side wins.
        let side = net.sink_side();
        assert_eq!(side.len(), n);
        assert!(side.iter().all(|&b| !b));
    }
}
