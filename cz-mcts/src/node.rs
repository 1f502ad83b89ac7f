//! The shared search-tree node.
//!
//! A node owns its children outright; there is no reference counting and no
//! cycles. The `state` atomic is both the lifecycle tag and the expansion
//! lock: exactly one thread wins the UNEXPANDED -> EXPANDING CAS, builds the
//! children, and publishes them with a release store that readers pair with
//! an acquire load. After publication the children array is frozen; only
//! the per-child atomics keep changing.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use cz_core::Move;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unexpanded,
    Expanding,
    Expanded,
    Terminal,
}

const STATE_UNEXPANDED: u8 = 0;
const STATE_EXPANDING: u8 = 1;
const STATE_EXPANDED: u8 = 2;
const STATE_TERMINAL: u8 = 3;

/// `f64` accumulator over an atomic word, for the value sums.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> AtomicF64 {
        AtomicF64(AtomicU64::new(v.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn fetch_add(&self, v: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + v).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

pub struct Node {
    mv: Move,
    prior: f32,
    visits: AtomicU32,
    /// Sum of backed-up evaluations, in this node's side-to-move view.
    value_sum: AtomicF64,
    /// Transient in-flight penalty; inflates the PUCT denominators only.
    virtual_loss: AtomicU32,
    state: AtomicU8,
    /// Valid once `state` is TERMINAL (stored before the release store).
    terminal_value: AtomicU32,
    children: UnsafeCell<Vec<Node>>,
}

// The children vector is written by at most one thread (the CAS winner,
// before its release store) and read only after an acquire load observes
// EXPANDED or TERMINAL. Everything else is atomic.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    pub fn new(mv: Move, prior: f32) -> Node {
        Node {
            mv,
            prior,
            visits: AtomicU32::new(0),
            value_sum: AtomicF64::new(0.0),
            virtual_loss: AtomicU32::new(0),
            state: AtomicU8::new(STATE_UNEXPANDED),
            terminal_value: AtomicU32::new(0),
            children: UnsafeCell::new(Vec::new()),
        }
    }

    /// A tree root; its move is a sentinel that is never played.
    pub fn root() -> Node {
        Node::new(Move::NONE, 0.0)
    }

    pub fn mv(&self) -> Move {
        self.mv
    }

    pub fn prior(&self) -> f32 {
        self.prior
    }

    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn value_sum(&self) -> f64 {
        self.value_sum.load()
    }

    pub fn virtual_loss(&self) -> u32 {
        self.virtual_loss.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> NodeState {
        match self.state.load(Ordering::Acquire) {
            STATE_UNEXPANDED => NodeState::Unexpanded,
            STATE_EXPANDING => NodeState::Expanding,
            STATE_EXPANDED => NodeState::Expanded,
            _ => NodeState::Terminal,
        }
    }

    /// Mean value with the virtual-loss-inflated denominator; 0 when the
    /// node is unvisited. In this node's own side-to-move view.
    pub fn q(&self) -> f32 {
        let denom = self.visits() + self.virtual_loss();
        if denom == 0 {
            0.0
        } else {
            (self.value_sum.load() / denom as f64) as f32
        }
    }

    /// The same mean seen from the parent's side, the Q of PUCT selection.
    /// Virtual loss pushes it toward 0 (a loss for the mover) because only
    /// the denominator grows.
    pub fn q_from_parent(&self) -> f32 {
        let denom = self.visits() + self.virtual_loss();
        if denom == 0 {
            0.0
        } else {
            ((self.visits() as f64 - self.value_sum.load()) / denom as f64) as f32
        }
    }

    pub fn add_virtual_loss(&self, amount: u32) {
        self.virtual_loss.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn remove_virtual_loss(&self, amount: u32) {
        self.virtual_loss.fetch_sub(amount, Ordering::Relaxed);
    }

    pub fn update(&self, value: f32) {
        self.value_sum.fetch_add(value as f64);
        self.visits.fetch_add(1, Ordering::Relaxed);
    }

    /// Single-flight gate: true for exactly one caller per node.
    pub fn try_begin_expansion(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_UNEXPANDED,
                STATE_EXPANDING,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Publish the children built by the expansion winner.
    pub fn publish_children(&self, children: Vec<Node>) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), STATE_EXPANDING);
        unsafe {
            *self.children.get() = children;
        }
        self.state.store(STATE_EXPANDED, Ordering::Release);
    }

    /// Freeze the node as a game end (or budget end) with a cached value.
    pub fn publish_terminal(&self, value: f32) {
        self.terminal_value
            .store(value.to_bits(), Ordering::Relaxed);
        self.state.store(STATE_TERMINAL, Ordering::Release);
    }

    /// Roll an EXPANDING node back after a failed evaluation so the tree is
    /// left in a consistent state while the search winds down.
    pub fn abort_expansion(&self) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), STATE_EXPANDING);
        self.state.store(STATE_UNEXPANDED, Ordering::Release);
    }

    pub fn terminal_value(&self) -> f32 {
        f32::from_bits(self.terminal_value.load(Ordering::Relaxed))
    }

    /// The published children, once the node is EXPANDED or TERMINAL
    /// (terminal nodes have an empty, equally frozen array).
    pub fn children(&self) -> Option<&[Node]> {
        match self.state() {
            NodeState::Expanded | NodeState::Terminal => {
                Some(unsafe { &*self.children.get() })
            }
            _ => None,
        }
    }

    /// Exclusive access for pre-search adjustments (root noise, pruning).
    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        self.children.get_mut()
    }

    /// Override a child's prior; used for root exploration noise.
    pub fn set_prior(&mut self, prior: f32) {
        self.prior = prior;
    }

    /// PUCT selection: maximize `Q + c_puct * prior * sqrt(parent_visits) /
    /// (1 + visits + virtual_loss)`. Ties keep the earliest child, so the
    /// result is deterministic for a given expansion order.
    pub fn select_child(&self, c_puct: f32) -> Option<&Node> {
        let children = self.children()?;
        let sqrt_parent = (self.visits() as f32).sqrt();

        let mut best: Option<&Node> = None;
        let mut best_score = f32::NEG_INFINITY;
        for child in children {
            let denom = (child.visits() + child.virtual_loss()) as f32;
            let u = c_puct * child.prior * sqrt_parent / (1.0 + denom);
            let score = child.q_from_parent() + u;
            if score > best_score {
                best_score = score;
                best = Some(child);
            }
        }
        best
    }

    /// Detach the subtree under the child playing `mv`.
    pub fn take_child(&mut self, mv: Move) -> Option<Node> {
        if self.state() != NodeState::Expanded {
            return None;
        }
        let children = self.children.get_mut();
        let idx = children.iter().position(|c| c.mv == mv)?;
        Some(children.swap_remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_is_unexpanded_and_zeroed() {
        let node = Node::root();
        assert_eq!(node.state(), NodeState::Unexpanded);
        assert_eq!(node.visits(), 0);
        assert_eq!(node.value_sum(), 0.0);
        assert_eq!(node.q(), 0.0);
        assert!(node.children().is_none());
    }

    #[test]
    fn update_accumulates_and_bounds_hold() {
        let node = Node::root();
        for _ in 0..10 {
            node.update(0.7);
        }
        assert_eq!(node.visits(), 10);
        assert!((node.value_sum() - 7.0).abs() < 1e-9);
        assert!(node.value_sum().abs() <= node.visits() as f64);
        assert!((node.q() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn virtual_loss_inflates_the_denominator_only() {
        let node = Node::root();
        node.update(1.0);
        assert_eq!(node.q(), 1.0);
        node.add_virtual_loss(3);
        assert!((node.q() - 0.25).abs() < 1e-6);
        assert!((node.value_sum() - 1.0).abs() < 1e-9, "sum untouched");
        node.remove_virtual_loss(3);
        assert_eq!(node.q(), 1.0);
    }

    #[test]
    fn parent_view_flips_the_mean() {
        let node = Node::root();
        node.update(0.75);
        node.update(0.75);
        assert!((node.q() - 0.75).abs() < 1e-6);
        assert!((node.q_from_parent() - 0.25).abs() < 1e-6);
        // In-flight penalty drags the mover's view toward a loss.
        node.add_virtual_loss(2);
        assert!((node.q_from_parent() - 0.125).abs() < 1e-6);
        node.remove_virtual_loss(2);
    }

    #[test]
    fn expansion_gate_admits_one_winner() {
        let node = Node::root();
        assert!(node.try_begin_expansion());
        assert!(!node.try_begin_expansion());
        node.publish_children(vec![Node::new(Move::NONE, 1.0)]);
        assert_eq!(node.state(), NodeState::Expanded);
        assert_eq!(node.children().unwrap().len(), 1);
    }

    #[test]
    fn terminal_value_round_trips() {
        let node = Node::root();
        assert!(node.try_begin_expansion());
        node.publish_terminal(0.5);
        assert_eq!(node.state(), NodeState::Terminal);
        assert_eq!(node.terminal_value(), 0.5);
        assert_eq!(node.children().map(<[Node]>::len), Some(0));
    }

    #[test]
    fn selection_prefers_the_higher_scored_child() {
        // Parent with 100 visits; A(40 visits, mover-view q 0.6, prior 0.6)
        // against B(60 visits, mover-view q 0.55, prior 0.4), c_puct = 1.
        // The children store their own view, so their sums hold 1 - q.
        let mut parent = Node::root();
        assert!(parent.try_begin_expansion());
        let a = Node::new(Move::from_uci("e2e4").unwrap(), 0.6);
        for _ in 0..40 {
            a.update(0.4);
        }
        let b = Node::new(Move::from_uci("d2d4").unwrap(), 0.4);
        for _ in 0..60 {
            b.update(0.45);
        }
        parent.publish_children(vec![a, b]);
        for _ in 0..100 {
            parent.update(0.5);
        }

        // Scores by hand: A = 0.6 + 0.6*10/41, B = 0.55 + 0.4*10/61.
        let expected_a = 0.6 + 0.6 * 10.0 / 41.0;
        let expected_b = 0.55 + 0.4 * 10.0 / 61.0;
        assert!(expected_a > expected_b);
        let picked = parent.select_child(1.0).unwrap();
        assert_eq!(picked.mv(), Move::from_uci("e2e4").unwrap());

        // Swap the priors in place and re-derive the winner.
        for (child, prior) in parent.children_mut().iter_mut().zip([0.4, 0.6]) {
            child.set_prior(prior);
        }
        let expected_a = 0.6 + 0.4 * 10.0 / 41.0;
        let expected_b = 0.55 + 0.6 * 10.0 / 61.0;
        let want = if expected_a >= expected_b { "e2e4" } else { "d2d4" };
        let picked = parent.select_child(1.0).unwrap();
        assert_eq!(picked.mv(), Move::from_uci(want).unwrap());
    }

    #[test]
    fn selection_flips_with_priors_on_unvisited_children() {
        let mut parent = Node::root();
        assert!(parent.try_begin_expansion());
        parent.publish_children(vec![
            Node::new(Move::from_uci("e2e4").unwrap(), 0.6),
            Node::new(Move::from_uci("d2d4").unwrap(), 0.4),
        ]);
        parent.update(0.5);

        assert_eq!(
            parent.select_child(1.0).unwrap().mv(),
            Move::from_uci("e2e4").unwrap()
        );
        for (child, prior) in parent.children_mut().iter_mut().zip([0.4, 0.6]) {
            child.set_prior(prior);
        }
        assert_eq!(
            parent.select_child(1.0).unwrap().mv(),
            Move::from_uci("d2d4").unwrap()
        );
    }

    #[test]
    fn ties_break_toward_the_earlier_child() {
        let mut parent = Node::root();
        assert!(parent.try_begin_expansion());
        parent.publish_children(vec![
            Node::new(Move::from_uci("a2a3").unwrap(), 0.5),
            Node::new(Move::from_uci("b2b3").unwrap(), 0.5),
        ]);
        parent.update(0.5);
        assert_eq!(
            parent.select_child(1.0).unwrap().mv(),
            Move::from_uci("a2a3").unwrap()
        );
    }

    #[test]
    fn take_child_detaches_the_subtree() {
        let mut parent = Node::root();
        assert!(parent.try_begin_expansion());
        parent.publish_children(vec![
            Node::new(Move::from_uci("e2e4").unwrap(), 0.5),
            Node::new(Move::from_uci("d2d4").unwrap(), 0.5),
        ]);
        let taken = parent.take_child(Move::from_uci("d2d4").unwrap()).unwrap();
        assert_eq!(taken.mv(), Move::from_uci("d2d4").unwrap());
        assert_eq!(parent.children().unwrap().len(), 1);
        assert!(parent.take_child(Move::from_uci("c2c4").unwrap()).is_none());
    }
}
