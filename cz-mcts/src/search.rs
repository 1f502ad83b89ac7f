//! The search driver: worker pool, budgets, best-move selection.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma};
use thiserror::Error;

use cz_core::{BoardHistory, EngineConfig, Move};

use crate::evaluator::{EvalError, Evaluator};
use crate::node::{Node, NodeState};

/// How often the budget watcher wakes up.
const WATCH_INTERVAL: Duration = Duration::from_millis(2);
/// Cadence of analysis snapshots when enabled.
const ANALYSIS_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid config: {msg}")]
    InvalidConfig { msg: &'static str },
    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),
    #[error("search produced no playable move")]
    NoBestMove,
}

#[derive(Debug, Clone)]
pub struct MoveStat {
    pub mv: Move,
    pub visits: u32,
    pub q: f32,
    pub prior: f32,
}

/// Read-only snapshot of the root; safe to take while workers run.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    pub playouts: u32,
    pub nodes: usize,
    pub elapsed_ms: u64,
    /// Root value estimate, side to move's view, in [0, 1].
    pub winrate: f32,
    /// Root children ordered by the best-move rule.
    pub moves: Vec<MoveStat>,
    pub pv: Vec<Move>,
}

/// Cooperative cancellation handle; cloneable into other threads.
#[derive(Clone)]
pub struct SearchStopper(Arc<AtomicBool>);

impl SearchStopper {
    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

pub struct UctSearch {
    cfg: EngineConfig,
    running: Arc<AtomicBool>,
    playouts: AtomicU32,
    node_count: AtomicUsize,
    noise_seed: u64,
    /// Chosen-move subtree kept for the next call, with its position.
    retained: Option<(String, Node)>,
    analysis_sink: Option<Box<dyn Fn(&SearchStats) + Send + Sync>>,
}

impl UctSearch {
    pub fn new(cfg: EngineConfig) -> Result<UctSearch, SearchError> {
        if !(cfg.c_puct.is_finite() && cfg.c_puct > 0.0) {
            return Err(SearchError::InvalidConfig {
                msg: "c_puct must be finite and > 0",
            });
        }
        if cfg.num_threads == 0 {
            return Err(SearchError::InvalidConfig {
                msg: "num_threads must be > 0",
            });
        }
        if !(cfg.softmax_temperature.is_finite() && cfg.softmax_temperature > 0.0) {
            return Err(SearchError::InvalidConfig {
                msg: "softmax_temperature must be finite and > 0",
            });
        }
        if cfg.max_tree_nodes == 0 {
            return Err(SearchError::InvalidConfig {
                msg: "max_tree_nodes must be > 0",
            });
        }
        Ok(UctSearch {
            cfg,
            running: Arc::new(AtomicBool::new(false)),
            playouts: AtomicU32::new(0),
            node_count: AtomicUsize::new(0),
            noise_seed: rand::random(),
            retained: None,
            analysis_sink: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Fix the root-noise PRNG for reproducible runs.
    pub fn set_noise_seed(&mut self, seed: u64) {
        self.noise_seed = seed;
    }

    /// Adjust the playout budget between calls.
    pub fn set_playout_limit(&mut self, playouts: u32) {
        self.cfg.playout_limit = playouts;
    }

    /// Adjust the wall-clock budget between calls.
    pub fn set_time_limit_ms(&mut self, ms: u64) {
        self.cfg.time_limit_ms = ms;
    }

    /// Receives a stats snapshot roughly once a second while `analyze` is
    /// set. Printing or logging it is the caller's business.
    pub fn set_analysis_sink(&mut self, sink: Box<dyn Fn(&SearchStats) + Send + Sync>) {
        self.analysis_sink = Some(sink);
    }

    /// Handle that cancels the current (or next) search from outside.
    pub fn stopper(&self) -> SearchStopper {
        SearchStopper(self.running.clone())
    }

    pub fn playout_count(&self) -> u32 {
        self.playouts.load(Ordering::Relaxed)
    }

    pub fn node_count(&self) -> usize {
        self.node_count.load(Ordering::Relaxed)
    }

    /// Search the position under the configured budgets and pick a move.
    pub fn think(
        &mut self,
        history: &BoardHistory,
        evaluator: &impl Evaluator,
    ) -> Result<(Move, SearchStats), SearchError> {
        let (best, stats) = self.run(history, evaluator, true)?;
        best.map(|mv| (mv, stats)).ok_or(SearchError::NoBestMove)
    }

    /// Search with no budget at all; runs until the stopper fires. The
    /// grown tree is retained for the following `think`.
    pub fn ponder(
        &mut self,
        history: &BoardHistory,
        evaluator: &impl Evaluator,
    ) -> Result<SearchStats, SearchError> {
        let (_, stats) = self.run(history, evaluator, false)?;
        Ok(stats)
    }

    fn run(
        &mut self,
        history: &BoardHistory,
        evaluator: &impl Evaluator,
        use_budget: bool,
    ) -> Result<(Option<Move>, SearchStats), SearchError> {
        let start = Instant::now();
        self.playouts.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);

        let mut root = match self.take_matching_subtree(history) {
            Some(root) => {
                self.node_count.store(count_nodes(&root), Ordering::Relaxed);
                root
            }
            None => {
                self.node_count.store(1, Ordering::Relaxed);
                Node::root()
            }
        };

        // First playout inline: the root must be expanded before PUCT has
        // anything to select from.
        if root.state() == NodeState::Unexpanded && root.try_begin_expansion() {
            match self.expand_node(history, &root, evaluator) {
                Ok(value) => {
                    root.update(value);
                    self.playouts.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    root.abort_expansion();
                    self.running.store(false, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
        if root.state() == NodeState::Terminal {
            self.running.store(false, Ordering::Relaxed);
            return Err(SearchError::NoBestMove);
        }

        if self.cfg.dirichlet_epsilon > 0.0 {
            apply_root_noise(
                &mut root,
                self.cfg.dirichlet_alpha,
                self.cfg.dirichlet_epsilon,
                self.noise_seed,
            );
        }

        let deadline = (use_budget && self.cfg.time_limit_ms > 0)
            .then(|| start + Duration::from_millis(self.cfg.time_limit_ms));

        let failure = std::thread::scope(|s| {
            let this = &*self;
            let root_ref = &root;
            let handles: Vec<_> = (0..this.cfg.num_threads)
                .map(|_| s.spawn(move || this.worker_loop(history, root_ref, evaluator, use_budget)))
                .collect();

            let mut next_analysis = start + ANALYSIS_INTERVAL;
            loop {
                std::thread::sleep(WATCH_INTERVAL);
                if !this.keep_searching(use_budget) {
                    break;
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                if this.cfg.analyze && Instant::now() >= next_analysis {
                    if let Some(sink) = &this.analysis_sink {
                        sink(&this.dump_stats(root_ref, start));
                    }
                    next_analysis += ANALYSIS_INTERVAL;
                }
            }
            this.running.store(false, Ordering::Relaxed);

            let mut failure = None;
            for handle in handles {
                if let Err(e) = handle.join().expect("search worker panicked") {
                    failure.get_or_insert(e);
                }
            }
            failure
        });

        let stats = self.dump_stats(&root, start);
        let best = stats.moves.first().map(|m| m.mv);

        // A failed evaluator ends the search, but an already-explored root
        // can still produce a move.
        if let Some(e) = failure {
            let playable = stats.moves.first().map(|m| m.visits > 0).unwrap_or(false);
            if !playable {
                return Err(e);
            }
        }

        if use_budget {
            // Keep the chosen-move subtree for a follow-up ponder or think.
            if let Some(mv) = best {
                let mut after = history.clone();
                after.apply(mv);
                if let Some(subtree) = root.take_child(mv) {
                    self.retained = Some((after.current().fen(), subtree));
                }
            }
        } else {
            // Pondering keeps the whole tree for the next think.
            self.retained = Some((history.current().fen(), root));
        }

        Ok((best, stats))
    }

    /// Reuse the retained subtree when it matches the new root position,
    /// either directly (ponder) or one reply deeper (opponent moved).
    fn take_matching_subtree(&mut self, history: &BoardHistory) -> Option<Node> {
        let (fen, mut node) = self.retained.take()?;
        if fen == history.current().fen() {
            return Some(node);
        }
        let previous = history.previous()?;
        if previous.fen() == fen {
            return node.take_child(history.last_move()?);
        }
        None
    }

    fn keep_searching(&self, use_budget: bool) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }
        if self.node_count.load(Ordering::Relaxed) >= self.cfg.max_tree_nodes {
            return false;
        }
        if use_budget && self.cfg.playout_limit > 0 {
            return self.playouts.load(Ordering::Relaxed) < self.cfg.playout_limit;
        }
        true
    }

    fn worker_loop(
        &self,
        history: &BoardHistory,
        root: &Node,
        evaluator: &impl Evaluator,
        use_budget: bool,
    ) -> Result<(), SearchError> {
        while self.keep_searching(use_budget) {
            let mut line = history.clone();
            match self.play_simulation(&mut line, root, evaluator) {
                Ok(Some(_)) => {
                    self.playouts.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {} // abandoned mid-flight; the loop predicate decides
                Err(e) => {
                    self.running.store(false, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// One root-to-leaf descent. `Ok(Some(v))` is the node's value in its
    /// own side-to-move view; `Ok(None)` abandons the simulation (search
    /// shutting down while another thread holds the expansion).
    pub(crate) fn play_simulation(
        &self,
        line: &mut BoardHistory,
        node: &Node,
        evaluator: &impl Evaluator,
    ) -> Result<Option<f32>, SearchError> {
        let value = loop {
            match node.state() {
                NodeState::Unexpanded => {
                    if node.try_begin_expansion() {
                        match self.expand_node(line, node, evaluator) {
                            Ok(v) => break v,
                            Err(e) => {
                                node.abort_expansion();
                                return Err(e);
                            }
                        }
                    }
                    // Lost the race; the winner publishes shortly.
                    std::thread::yield_now();
                }
                NodeState::Expanding => {
                    if !self.running.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                    std::thread::yield_now();
                }
                NodeState::Terminal => break node.terminal_value(),
                NodeState::Expanded => {
                    let child = node
                        .select_child(self.cfg.c_puct)
                        .expect("expanded nodes have children");
                    child.add_virtual_loss(self.cfg.virtual_loss);
                    line.apply(child.mv());
                    let result = self.play_simulation(line, child, evaluator);
                    child.remove_virtual_loss(self.cfg.virtual_loss);
                    match result? {
                        // The child's value flips perspective one ply up.
                        Some(v) => break 1.0 - v,
                        None => return Ok(None),
                    }
                }
            }
        };
        node.update(value);
        Ok(Some(value))
    }

    /// Evaluate and expand; single-flight is guaranteed by the caller
    /// holding the EXPANDING state.
    fn expand_node(
        &self,
        line: &BoardHistory,
        node: &Node,
        evaluator: &impl Evaluator,
    ) -> Result<f32, SearchError> {
        let moves = line.legal_moves();
        if moves.is_empty() {
            let value = if line.current().in_check() { 0.0 } else { 0.5 };
            node.publish_terminal(value);
            return Ok(value);
        }
        if let Some(value) = line.draw_value() {
            node.publish_terminal(value);
            return Ok(value);
        }

        let (priors, value) = evaluator.evaluate(line, &moves)?;
        let value = value.clamp(0.0, 1.0);

        // Tree ceiling: stop growing but keep searching; the node acts as
        // terminal with the evaluation it just produced.
        let reserved = self
            .node_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n + moves.len() <= self.cfg.max_tree_nodes).then_some(n + moves.len())
            })
            .is_ok();
        if !reserved {
            node.publish_terminal(value);
            return Ok(value);
        }

        let sum: f32 = priors.iter().sum();
        let children = moves
            .iter()
            .zip(&priors)
            .map(|(&mv, &p)| {
                let prior = if sum > 0.0 {
                    p / sum
                } else {
                    1.0 / moves.len() as f32
                };
                Node::new(mv, prior)
            })
            .collect();
        node.publish_children(children);
        Ok(value)
    }

    /// Concurrent-safe stats snapshot; readers may see mid-flight counters
    /// but never a torn tree.
    pub fn dump_stats(&self, root: &Node, start: Instant) -> SearchStats {
        let mut moves: Vec<MoveStat> = root
            .children()
            .map(|children| {
                children
                    .iter()
                    .map(|c| MoveStat {
                        mv: c.mv(),
                        visits: c.visits(),
                        // Shown from the mover's seat, like the PV.
                        q: c.q_from_parent(),
                        prior: c.prior(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        moves.sort_by(|a, b| {
            b.visits
                .cmp(&a.visits)
                .then(b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal))
        });

        SearchStats {
            playouts: self.playouts.load(Ordering::Relaxed),
            nodes: self.node_count.load(Ordering::Relaxed),
            elapsed_ms: start.elapsed().as_millis() as u64,
            winrate: root.q(),
            moves,
            pv: principal_variation(root),
        }
    }
}

/// Most-visited line from the root down to an unvisited or unexpanded node.
pub fn principal_variation(root: &Node) -> Vec<Move> {
    let mut pv = Vec::new();
    let mut node = root;
    while let Some(children) = node.children() {
        let best = children.iter().reduce(|best, c| {
            if c.visits() > best.visits()
                || (c.visits() == best.visits() && c.q_from_parent() > best.q_from_parent())
            {
                c
            } else {
                best
            }
        });
        match best {
            Some(child) if child.visits() > 0 => {
                pv.push(child.mv());
                node = child;
            }
            _ => break,
        }
    }
    pv
}

fn count_nodes(node: &Node) -> usize {
    1 + node
        .children()
        .map(|cs| cs.iter().map(count_nodes).sum::<usize>())
        .unwrap_or(0)
}

/// Mix Dirichlet noise into the root priors (self-play exploration).
fn apply_root_noise(root: &mut Node, alpha: f32, epsilon: f32, seed: u64) {
    if !(alpha.is_finite() && alpha > 0.0 && (0.0..=1.0).contains(&epsilon)) {
        return;
    }
    let children = root.children_mut();
    if children.is_empty() {
        return;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15);
    let gamma = Gamma::new(alpha as f64, 1.0).expect("alpha > 0");
    let mut eta: Vec<f64> = (0..children.len()).map(|_| gamma.sample(&mut rng)).collect();
    let sum: f64 = eta.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        return;
    }
    for e in &mut eta {
        *e /= sum;
    }

    for (child, e) in children.iter_mut().zip(eta) {
        let mixed = (1.0 - epsilon) * child.prior() + epsilon * e as f32;
        child.set_prior(mixed);
    }
}
