use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

pub const BOARD_SIZE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Direction pawns of this color advance along the y axis.
    pub fn forward(self) -> i8 {
        match self {
            Color::White => 1,
            Color::Black => -1,
        }
    }

    pub fn home_rank(self) -> u8 {
        match self {
            Color::White => 0,
            Color::Black => BOARD_SIZE - 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// A piece together with its special-move rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Piece {
    #[serde(rename = "piece")]
    pub kind: PieceKind,
    pub color: Color,
    /// Rook or king that has not moved yet.
    #[serde(default, skip_serializing_if = "is_false")]
    pub castling: bool,
    /// Pawn that has just advanced two squares.
    #[serde(default, skip_serializing_if = "is_false")]
    pub en_passant: bool,
}

impl Piece {
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Piece {
            kind,
            color,
            castling: false,
            en_passant: false,
        }
    }

    pub fn with_castling(kind: PieceKind, color: Color) -> Self {
        Piece {
            castling: true,
            ..Piece::new(kind, color)
        }
    }
}

/// One cell of the grid. Serialises as `{}` when empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Square {
    #[serde(flatten)]
    pub piece: Option<Piece>,
}

impl Square {
    pub const EMPTY: Square = Square { piece: None };

    pub fn occupied(piece: Piece) -> Self {
        Square { piece: Some(piece) }
    }

    pub fn is_empty(&self) -> bool {
        self.piece.is_none()
    }

    pub fn color(&self) -> Option<Color> {
        self.piece.map(|p| p.color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: u8,
    pub y: u8,
}

impl Coord {
    pub fn new(x: u8, y: u8) -> Self {
        Coord { x, y }
    }

    pub fn in_bounds(self) -> bool {
        self.x < BOARD_SIZE && self.y < BOARD_SIZE
    }

    pub fn offset(self, dx: i8, dy: i8) -> Option<Coord> {
        let x = i16::from(self.x) + i16::from(dx);
        let y = i16::from(self.y) + i16::from(dy);
        let size = i16::from(BOARD_SIZE);
        if (0..size).contains(&x) && (0..size).contains(&y) {
            u8::try_from(x)
                .ok()
                .zip(u8::try_from(y).ok())
                .map(|(x, y)| Coord { x, y })
        } else {
            None
        }
    }
}

/// 8x8 grid indexed `[y][x]`; white starts on row 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    rows: [[Square; BOARD_SIZE as usize]; BOARD_SIZE as usize],
}

impl Board {
    pub fn empty() -> Self {
        Board {
            rows: [[Square::EMPTY; BOARD_SIZE as usize]; BOARD_SIZE as usize],
        }
    }

    /// The standard starting position.
    pub fn standard() -> Self {
        let mut board = Board::empty();
        let back_rank = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];

        for color in [Color::White, Color::Black] {
            let home = color.home_rank();
            let pawn_rank = home.wrapping_add_signed(color.forward());
            for (x, kind) in (0u8..).zip(back_rank) {
                let piece = match kind {
                    PieceKind::Rook | PieceKind::King => Piece::with_castling(kind, color),
                    _ => Piece::new(kind, color),
                };
                board[Coord::new(x, home)] = Square::occupied(piece);
                board[Coord::new(x, pawn_rank)] =
                    Square::occupied(Piece::new(PieceKind::Pawn, color));
            }
        }

        board
    }

    pub fn get(&self, coord: Coord) -> Option<&Square> {
        if coord.in_bounds() {
            Some(&self[coord])
        } else {
            None
        }
    }

    pub fn piece_at(&self, coord: Coord) -> Option<Piece> {
        self.get(coord).and_then(|square| square.piece)
    }

    /// Takes the piece off `coord`, leaving the square empty.
    pub fn take(&mut self, coord: Coord) -> Option<Piece> {
        self[coord].piece.take()
    }

    pub fn squares(&self) -> impl Iterator<Item = (Coord, &Square)> {
        self.rows.iter().zip(0u8..).flat_map(|(row, y)| {
            row.iter()
                .zip(0u8..)
                .map(move |(square, x)| (Coord::new(x, y), square))
        })
    }

    pub fn pieces_mut(&mut self) -> impl Iterator<Item = &mut Piece> {
        self.rows
            .iter_mut()
            .flat_map(|row| row.iter_mut())
            .filter_map(|square| square.piece.as_mut())
    }
}

impl Default for Board {
    fn default() -> Self {
        Board::standard()
    }
}

impl Index<Coord> for Board {
    type Output = Square;

    fn index(&self, coord: Coord) -> &Square {
        &self.rows[usize::from(coord.y)][usize::from(coord.x)]
    }
}

impl IndexMut<Coord> for Board {
    fn index_mut(&mut self, coord: Coord) -> &mut Square {
        &mut self.rows[usize::from(coord.y)][usize::from(coord.x)]
    }
}
