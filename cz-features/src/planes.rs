//! Sparse input planes and their dense materialization.
//!
//! A plane is a 64-bit occupancy mask plus one scalar; the network sees a
//! dense `C x 8 x 8` buffer with the scalar wherever the mask has a bit.

use cz_core::moves::Color;
use cz_core::{Board, BoardHistory, Piece};

use crate::schema::{FormatVersion, T_HISTORY};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputPlane {
    pub mask: u64,
    pub value: f32,
}

impl InputPlane {
    pub const EMPTY: InputPlane = InputPlane {
        mask: 0,
        value: 0.0,
    };

    pub fn full(value: f32) -> InputPlane {
        InputPlane { mask: !0, value }
    }

    pub fn pieces(mask: u64) -> InputPlane {
        InputPlane { mask, value: 1.0 }
    }
}

/// Fill `out` (length `planes.len() * 64`) from the sparse planes. The scan
/// visits only set bits, not all 64 squares.
pub fn materialize(planes: &[InputPlane], out: &mut [f32]) {
    debug_assert_eq!(out.len(), planes.len() * 64);
    out.fill(0.0);
    for (c, plane) in planes.iter().enumerate() {
        let base = c * 64;
        let mut mask = plane.mask;
        while mask != 0 {
            let sq = mask.trailing_zeros() as usize;
            out[base + sq] = plane.value;
            mask &= mask - 1;
        }
    }
}

const PIECE_ORDER: [Piece; 6] = [
    Piece::Pawn,
    Piece::Knight,
    Piece::Bishop,
    Piece::Rook,
    Piece::Queen,
    Piece::King,
];

/// Vertical flip so Black positions are encoded from the mover's seat.
fn oriented(bb: u64, flip: bool) -> u64 {
    if flip {
        bb.swap_bytes()
    } else {
        bb
    }
}

/// Encode the last `T_HISTORY` positions of `history` into the version's
/// input planes. Slots older than the game start are all-zero.
pub fn encode(history: &BoardHistory, version: FormatVersion) -> Vec<InputPlane> {
    let mut planes = Vec::with_capacity(version.input_channels());
    let current = history.current();
    let us = current.side_to_move();
    let flip = us == Color::Black;

    let window = history.recent(T_HISTORY);
    // Newest slot first, as the original network was trained.
    for t in 0..T_HISTORY {
        if t >= window.len() {
            for _ in 0..version.hist_planes() {
                planes.push(InputPlane::EMPTY);
            }
            continue;
        }
        let idx = window.len() - 1 - t;
        let board = &window[idx];
        let hist_idx = history.len() - 1 - t;
        let reps = history.repetitions_of(hist_idx);

        match version {
            FormatVersion::V2 => {
                for piece in PIECE_ORDER {
                    planes.push(InputPlane::pieces(oriented(board.piece_bb(us, piece), flip)));
                }
                for piece in PIECE_ORDER {
                    planes.push(InputPlane::pieces(oriented(
                        board.piece_bb(us.flip(), piece),
                        flip,
                    )));
                }
                planes.push(if reps >= 1 {
                    InputPlane::full(1.0)
                } else {
                    InputPlane::EMPTY
                });
            }
            FormatVersion::V1 => {
                for color in [Color::White, Color::Black] {
                    for piece in PIECE_ORDER {
                        planes.push(InputPlane::pieces(board.piece_bb(color, piece)));
                    }
                }
                planes.push(if reps >= 1 {
                    InputPlane::full(1.0)
                } else {
                    InputPlane::EMPTY
                });
                planes.push(if reps >= 2 {
                    InputPlane::full(1.0)
                } else {
                    InputPlane::EMPTY
                });
            }
        }
    }

    push_trailer(&mut planes, current, version, us);
    debug_assert_eq!(planes.len(), version.input_channels());
    planes
}

fn castle_plane(board: &Board, color: Color, kingside: bool) -> InputPlane {
    use cz_core::board::{CASTLE_BK, CASTLE_BQ, CASTLE_WK, CASTLE_WQ};
    let bit = match (color, kingside) {
        (Color::White, true) => CASTLE_WK,
        (Color::White, false) => CASTLE_WQ,
        (Color::Black, true) => CASTLE_BK,
        (Color::Black, false) => CASTLE_BQ,
    };
    if board.castling_rights() & bit != 0 {
        InputPlane::full(1.0)
    } else {
        InputPlane::EMPTY
    }
}

fn push_trailer(planes: &mut Vec<InputPlane>, board: &Board, version: FormatVersion, us: Color) {
    let (first, second) = match version {
        // V2 castling planes are mover-relative, V1 planes are White-first.
        FormatVersion::V2 => (us, us.flip()),
        FormatVersion::V1 => (Color::White, Color::Black),
    };
    planes.push(castle_plane(board, first, true));
    planes.push(castle_plane(board, first, false));
    planes.push(castle_plane(board, second, true));
    planes.push(castle_plane(board, second, false));
    planes.push(if us == Color::Black {
        InputPlane::full(1.0)
    } else {
        InputPlane::EMPTY
    });
    planes.push(InputPlane::full(board.rule50() as f32));
    planes.push(InputPlane::full(board.game_ply() as f32));
    planes.push(InputPlane::full(1.0));
}
