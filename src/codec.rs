//! Conversion between a board and its fixed-length numeric representation.
//!
//! A [`BoardVector`] holds one code per square, traversed from a8 to h8, then a7 to h7, down to
//! h1 (rank 8 to 1, file a to h). Each code is `0` for an empty square or the ordinal of a
//! [`PieceCode`].

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use shakmaty::{
    Board, CastlingMode, Chess, Color, FromSetup, Piece, PositionError, Role, Setup, Square,
};

use crate::error::EnvError;

/// Number of squares, and length of a [`BoardVector`].
pub const NUM_SQUARES: usize = 64;

/// The twelve piece symbols with their fixed ordinals.
///
/// Black pieces come first, then white pieces, each in the order rook, knight, bishop, queen,
/// king, pawn (`r n b q k p R N B Q K P`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PieceCode {
    /// `r`
    BlackRook = 1,
    /// `n`
    BlackKnight = 2,
    /// `b`
    BlackBishop = 3,
    /// `q`
    BlackQueen = 4,
    /// `k`
    BlackKing = 5,
    /// `p`
    BlackPawn = 6,
    /// `R`
    WhiteRook = 7,
    /// `N`
    WhiteKnight = 8,
    /// `B`
    WhiteBishop = 9,
    /// `Q`
    WhiteQueen = 10,
    /// `K`
    WhiteKing = 11,
    /// `P`
    WhitePawn = 12,
}

impl PieceCode {
    /// All codes, in ordinal order.
    pub const ALL: [PieceCode; 12] = [
        PieceCode::BlackRook,
        PieceCode::BlackKnight,
        PieceCode::BlackBishop,
        PieceCode::BlackQueen,
        PieceCode::BlackKing,
        PieceCode::BlackPawn,
        PieceCode::WhiteRook,
        PieceCode::WhiteKnight,
        PieceCode::WhiteBishop,
        PieceCode::WhiteQueen,
        PieceCode::WhiteKing,
        PieceCode::WhitePawn,
    ];

    const ROLE_ORDER: [Role; 6] = [
        Role::Rook,
        Role::Knight,
        Role::Bishop,
        Role::Queen,
        Role::King,
        Role::Pawn,
    ];

    /// The value stored in a [`BoardVector`].
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`code`](Self::code). `None` for `0` and anything above `12`.
    pub fn from_code(code: u8) -> Option<PieceCode> {
        PieceCode::ALL.get(usize::from(code).checked_sub(1)?).copied()
    }

    /// Code of `piece`.
    pub fn from_piece(piece: Piece) -> PieceCode {
        let role_offset = match piece.role {
            Role::Rook => 0,
            Role::Knight => 1,
            Role::Bishop => 2,
            Role::Queen => 3,
            Role::King => 4,
            Role::Pawn => 5,
        };
        let color_offset = match piece.color {
            Color::Black => 0,
            Color::White => 6,
        };
        PieceCode::ALL[color_offset + role_offset]
    }

    /// The piece this code stands for.
    pub fn piece(self) -> Piece {
        let ordinal = usize::from(self.code() - 1);
        let color = if ordinal < 6 {
            Color::Black
        } else {
            Color::White
        };
        Piece {
            color,
            role: Self::ROLE_ORDER[ordinal % 6],
        }
    }
}

/// Square visited at position `index` of the canonical traversal.
///
/// # Panics
/// Panics if `index >= 64`.
pub fn square_at(index: usize) -> Square {
    Square::new(index as u32).flip_vertical()
}

/// One board as 64 piece codes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardVector(pub [u8; NUM_SQUARES]);

impl BoardVector {
    /// A vector with every square empty.
    pub const fn empty() -> BoardVector {
        BoardVector([0; NUM_SQUARES])
    }

    /// The codes in traversal order.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Number of occupied squares.
    pub fn piece_count(&self) -> usize {
        self.0.iter().filter(|&&code| code != 0).count()
    }
}

impl Default for BoardVector {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for BoardVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // one rank per row, rank 8 first
        f.write_str("BoardVector[")?;
        for (i, rank) in self.0.chunks(8).enumerate() {
            if i > 0 {
                f.write_str(" / ")?;
            }
            for code in rank {
                write!(f, "{code:>2}")?;
            }
        }
        f.write_str("]")
    }
}

impl Serialize for BoardVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for BoardVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let codes = Vec::<u8>::deserialize(deserializer)?;
        let len = codes.len();
        let codes: [u8; NUM_SQUARES] = codes
            .try_into()
            .map_err(|_| de::Error::invalid_length(len, &"64 square codes"))?;
        Ok(BoardVector(codes))
    }
}

/// Encode the pieces of `board`.
pub fn encode(board: &Board) -> BoardVector {
    let mut vector = BoardVector::empty();
    for (i, slot) in vector.0.iter_mut().enumerate() {
        if let Some(piece) = board.piece_at(square_at(i)) {
            *slot = PieceCode::from_piece(piece).code();
        }
    }
    vector
}

/// Rebuild the piece placement described by `vector`.
///
/// Unknown codes are skipped; vectors produced by [`encode`] never contain any.
pub fn decode(vector: &BoardVector) -> Board {
    let mut board = Board::empty();
    for (i, &code) in vector.0.iter().enumerate() {
        if let Some(piece_code) = PieceCode::from_code(code) {
            board.set_piece_at(square_at(i), piece_code.piece());
        }
    }
    board
}

/// Rebuild a playable position from `vector`, with `turn` to move.
///
/// The result has no castling rights and no en-passant square, so its legal moves are a subset
/// of the legal moves of the position that was encoded.
pub fn decode_position(vector: &BoardVector, turn: Color) -> anyhow::Result<Chess> {
    if let Some((i, code)) = vector
        .0
        .iter()
        .enumerate()
        .find(|&(_, &code)| code > PieceCode::WhitePawn.code())
    {
        return Err(EnvError::InvalidBoard(format!("unknown piece code {code} at index {i}")).into());
    }

    let setup = Setup {
        board: decode(vector),
        turn,
        ..Setup::empty()
    };
    // checks only explainable by a lost en-passant square are still playable
    Chess::from_setup(setup, CastlingMode::Standard)
        .or_else(PositionError::ignore_impossible_check)
        .map_err(|e| EnvError::InvalidBoard(e.to_string()).into())
}
