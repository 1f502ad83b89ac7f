//! Colors, piece kinds and the move type with its coordinate notation.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    pub fn flip(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Piece {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
}

pub const ALL_PIECES: [Piece; 6] = [
    Piece::Pawn,
    Piece::Knight,
    Piece::Bishop,
    Piece::Rook,
    Piece::Queen,
    Piece::King,
];

impl Piece {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_fen_char(c: char) -> Option<(Color, Piece)> {
        let piece = match c.to_ascii_lowercase() {
            'p' => Piece::Pawn,
            'n' => Piece::Knight,
            'b' => Piece::Bishop,
            'r' => Piece::Rook,
            'q' => Piece::Queen,
            'k' => Piece::King,
            _ => return None,
        };
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some((color, piece))
    }

    pub fn fen_char(self, color: Color) -> char {
        let c = match self {
            Piece::Pawn => 'p',
            Piece::Knight => 'n',
            Piece::Bishop => 'b',
            Piece::Rook => 'r',
            Piece::Queen => 'q',
            Piece::King => 'k',
        };
        match color {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }
}

/// Square index: `rank * 8 + file`, a1 = 0, h8 = 63.
pub fn square(rank: u8, file: u8) -> u8 {
    rank * 8 + file
}

pub fn rank_of(sq: u8) -> u8 {
    sq / 8
}

pub fn file_of(sq: u8) -> u8 {
    sq % 8
}

pub fn square_name(sq: u8) -> String {
    let f = (b'a' + file_of(sq)) as char;
    let r = (b'1' + rank_of(sq)) as char;
    format!("{}{}", f, r)
}

pub fn parse_square(s: &str) -> Option<u8> {
    let mut it = s.chars();
    let f = it.next()?;
    let r = it.next()?;
    if it.next().is_some() || !('a'..='h').contains(&f) || !('1'..='8').contains(&r) {
        return None;
    }
    Some(square(r as u8 - b'1', f as u8 - b'a'))
}

/// A move in coordinate form. Castling is encoded as the king's two-square
/// step (e1g1), en passant as the capturing pawn's diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: u8,
    pub to: u8,
    pub promotion: Option<Piece>,
}

#[derive(Debug, Error)]
pub enum MoveParseError {
    #[error("move too short: {0:?}")]
    TooShort(String),
    #[error("bad square in move: {0:?}")]
    BadSquare(String),
    #[error("bad promotion piece in move: {0:?}")]
    BadPromotion(String),
}

impl Move {
    /// Sentinel for the root node, never applied to a board.
    pub const NONE: Move = Move {
        from: 0,
        to: 0,
        promotion: None,
    };

    pub fn new(from: u8, to: u8) -> Move {
        Move {
            from,
            to,
            promotion: None,
        }
    }

    pub fn promoting(from: u8, to: u8, piece: Piece) -> Move {
        Move {
            from,
            to,
            promotion: Some(piece),
        }
    }

    pub fn from_uci(s: &str) -> Result<Move, MoveParseError> {
        if s.len() < 4 {
            return Err(MoveParseError::TooShort(s.to_string()));
        }
        let from =
            parse_square(&s[0..2]).ok_or_else(|| MoveParseError::BadSquare(s.to_string()))?;
        let to = parse_square(&s[2..4]).ok_or_else(|| MoveParseError::BadSquare(s.to_string()))?;
        let promotion = match &s[4..] {
            "" => None,
            "n" => Some(Piece::Knight),
            "b" => Some(Piece::Bishop),
            "r" => Some(Piece::Rook),
            "q" => Some(Piece::Queen),
            _ => return Err(MoveParseError::BadPromotion(s.to_string())),
        };
        Ok(Move {
            from,
            to,
            promotion,
        })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", square_name(self.from), square_name(self.to))?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.fen_char(Color::Black))?;
        }
        Ok(())
    }
}
