//! The game line: every position since the root, for repetition detection
//! and for the history window the input planes consume.

use crate::board::Board;
use crate::moves::Move;

#[derive(Debug, Clone)]
pub struct BoardHistory {
    positions: Vec<Board>,
    moves: Vec<Move>,
}

impl BoardHistory {
    pub fn new(root: Board) -> BoardHistory {
        BoardHistory {
            positions: vec![root],
            moves: Vec::new(),
        }
    }

    pub fn startpos() -> BoardHistory {
        BoardHistory::new(Board::startpos())
    }

    pub fn current(&self) -> &Board {
        self.positions
            .last()
            .expect("history always holds at least the root position")
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn apply(&mut self, mv: Move) {
        let mut next = self.current().clone();
        next.make_move(mv);
        self.positions.push(next);
        self.moves.push(mv);
    }

    /// The position before the last applied move.
    pub fn previous(&self) -> Option<&Board> {
        self.positions.len().checked_sub(2).map(|i| &self.positions[i])
    }

    pub fn last_move(&self) -> Option<Move> {
        self.moves.last().copied()
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        self.current().legal_moves()
    }

    /// The most recent `n` positions, oldest first. Shorter near the root.
    pub fn recent(&self, n: usize) -> &[Board] {
        let start = self.positions.len().saturating_sub(n);
        &self.positions[start..]
    }

    /// How often the position at index `idx` occurred earlier in the line.
    pub fn repetitions_of(&self, idx: usize) -> u32 {
        let target = &self.positions[idx];
        self.positions[..idx]
            .iter()
            .filter(|b| b.same_position(target))
            .count() as u32
    }

    /// Prior occurrences of the current position.
    pub fn repetitions(&self) -> u32 {
        self.repetitions_of(self.positions.len() - 1)
    }

    /// Draw by rule without consulting the move generator.
    pub fn draw_value(&self) -> Option<f32> {
        let board = self.current();
        if board.rule50() >= 100 || self.repetitions() >= 2 || board.insufficient_material() {
            return Some(0.5);
        }
        None
    }

    /// Game-over scalar in [0, 1] from the side to move's perspective, or
    /// `None` while the game is still on. 0.0 = side to move is mated.
    pub fn terminal_value(&self) -> Option<f32> {
        if let Some(v) = self.draw_value() {
            return Some(v);
        }
        if self.current().legal_moves().is_empty() {
            return Some(if self.current().in_check() { 0.0 } else { 0.5 });
        }
        None
    }
}
