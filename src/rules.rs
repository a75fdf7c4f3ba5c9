//! Move legality for the standard game.
//!
//! The room engine only consumes the [`MoveOracle`] surface: legal
//! destinations for one piece and a checkmate predicate. [`StandardRules`] is
//! the implementation the server ships with.

use serde::{Deserialize, Serialize};

use crate::board::{Board, Color, Coord, Piece, PieceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveKind {
    Move,
    Attack,
}

/// A destination the oracle allows, tagged with how it is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegalMove {
    pub to: Coord,
    pub kind: MoveKind,
    /// On a `Move` this is a two-square pawn advance; on an `Attack` it is an
    /// en-passant capture.
    pub en_passant: bool,
}

impl LegalMove {
    fn step(to: Coord) -> Self {
        LegalMove {
            to,
            kind: MoveKind::Move,
            en_passant: false,
        }
    }

    fn capture(to: Coord) -> Self {
        LegalMove {
            to,
            kind: MoveKind::Attack,
            en_passant: false,
        }
    }
}

pub trait MoveOracle: Send + Sync {
    /// Legal destinations for the piece of `color` standing on `origin`.
    fn legal_moves(&self, board: &Board, origin: Coord, color: Color, castling: bool)
        -> Vec<LegalMove>;

    fn is_checkmate(&self, board: &Board, color: Color) -> bool;
}

const KNIGHT_JUMPS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];
const KING_STEPS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
const ROOK_RAYS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const BISHOP_RAYS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl MoveOracle for StandardRules {
    fn legal_moves(
        &self,
        board: &Board,
        origin: Coord,
        color: Color,
        castling: bool,
    ) -> Vec<LegalMove> {
        let Some(piece) = board.piece_at(origin) else {
            return Vec::new();
        };
        if piece.color != color {
            return Vec::new();
        }

        let mut moves = pseudo_moves(board, origin, piece);
        moves.retain(|mv| !leaves_king_attacked(board, origin, *mv, color));

        if piece.kind == PieceKind::King && castling {
            moves.extend(castling_moves(board, origin, color));
        }

        moves
    }

    fn is_checkmate(&self, board: &Board, color: Color) -> bool {
        let Some(king) = find_king(board, color) else {
            return false;
        };
        if !is_attacked(board, king, color.opposite()) {
            return false;
        }

        board
            .squares()
            .filter_map(|(coord, square)| square.piece.map(|piece| (coord, piece)))
            .filter(|(_, piece)| piece.color == color)
            .all(|(coord, piece)| {
                self.legal_moves(board, coord, color, piece.castling)
                    .is_empty()
            })
    }
}

fn pseudo_moves(board: &Board, origin: Coord, piece: Piece) -> Vec<LegalMove> {
    let mut moves = Vec::new();
    match piece.kind {
        PieceKind::Pawn => pawn_moves(board, origin, piece.color, &mut moves),
        PieceKind::Knight => jumps(board, origin, piece.color, &KNIGHT_JUMPS, &mut moves),
        PieceKind::King => jumps(board, origin, piece.color, &KING_STEPS, &mut moves),
        PieceKind::Bishop => slides(board, origin, piece.color, &BISHOP_RAYS, &mut moves),
        PieceKind::Rook => slides(board, origin, piece.color, &ROOK_RAYS, &mut moves),
        PieceKind::Queen => {
            slides(board, origin, piece.color, &ROOK_RAYS, &mut moves);
            slides(board, origin, piece.color, &BISHOP_RAYS, &mut moves);
        }
    }
    moves
}

fn pawn_moves(board: &Board, origin: Coord, color: Color, moves: &mut Vec<LegalMove>) {
    let forward = color.forward();

    if let Some(one) = origin.offset(0, forward) {
        if board[one].is_empty() {
            moves.push(LegalMove::step(one));

            let start_rank = color.home_rank().wrapping_add_signed(forward);
            if origin.y == start_rank {
                if let Some(two) = origin.offset(0, forward * 2) {
                    if board[two].is_empty() {
                        moves.push(LegalMove {
                            to: two,
                            kind: MoveKind::Move,
                            en_passant: true,
                        });
                    }
                }
            }
        }
    }

    for dx in [-1, 1] {
        let Some(target) = origin.offset(dx, forward) else {
            continue;
        };
        match board[target].piece {
            Some(victim) if victim.color != color => moves.push(LegalMove::capture(target)),
            Some(_) => {}
            None => {
                let passed = origin.offset(dx, 0).and_then(|side| board.piece_at(side));
                if let Some(passed) = passed {
                    if passed.kind == PieceKind::Pawn && passed.color != color && passed.en_passant
                    {
                        moves.push(LegalMove {
                            to: target,
                            kind: MoveKind::Attack,
                            en_passant: true,
                        });
                    }
                }
            }
        }
    }
}

fn jumps(
    board: &Board,
    origin: Coord,
    color: Color,
    offsets: &[(i8, i8)],
    moves: &mut Vec<LegalMove>,
) {
    for &(dx, dy) in offsets {
        let Some(target) = origin.offset(dx, dy) else {
            continue;
        };
        match board[target].color() {
            None => moves.push(LegalMove::step(target)),
            Some(other) if other != color => moves.push(LegalMove::capture(target)),
            Some(_) => {}
        }
    }
}

fn slides(
    board: &Board,
    origin: Coord,
    color: Color,
    rays: &[(i8, i8)],
    moves: &mut Vec<LegalMove>,
) {
    for &(dx, dy) in rays {
        let mut cursor = origin;
        while let Some(target) = cursor.offset(dx, dy) {
            match board[target].color() {
                None => moves.push(LegalMove::step(target)),
                Some(other) => {
                    if other != color {
                        moves.push(LegalMove::capture(target));
                    }
                    break;
                }
            }
            cursor = target;
        }
    }
}

fn castling_moves(board: &Board, origin: Coord, color: Color) -> Vec<LegalMove> {
    let enemy = color.opposite();
    if is_attacked(board, origin, enemy) {
        return Vec::new();
    }

    let mut moves = Vec::new();
    for (dir, rook_x) in [(1i8, 7u8), (-1i8, 0u8)] {
        let rook_square = Coord::new(rook_x, origin.y);
        let has_rook = board.piece_at(rook_square).is_some_and(|rook| {
            rook.kind == PieceKind::Rook && rook.color == color && rook.castling
        });
        if !has_rook {
            continue;
        }

        let (low, high) = if rook_x > origin.x {
            (origin.x + 1, rook_x)
        } else {
            (rook_x + 1, origin.x)
        };
        let path_clear = (low..high).all(|x| board[Coord::new(x, origin.y)].is_empty());
        if !path_clear {
            continue;
        }

        let passes = [origin.offset(dir, 0), origin.offset(dir * 2, 0)];
        let safe = passes
            .iter()
            .all(|square| square.is_some_and(|sq| !is_attacked(board, sq, enemy)));
        if let (true, Some(to)) = (safe, passes[1]) {
            moves.push(LegalMove::step(to));
        }
    }
    moves
}

fn leaves_king_attacked(board: &Board, origin: Coord, mv: LegalMove, color: Color) -> bool {
    let mut after = board.clone();
    if mv.kind == MoveKind::Attack && mv.en_passant {
        after.take(Coord::new(mv.to.x, origin.y));
    }
    let piece = after.take(origin);
    after[mv.to].piece = piece;

    find_king(&after, color).is_some_and(|king| is_attacked(&after, king, color.opposite()))
}

fn find_king(board: &Board, color: Color) -> Option<Coord> {
    board.squares().find_map(|(coord, square)| {
        square
            .piece
            .filter(|p| p.kind == PieceKind::King && p.color == color)
            .map(|_| coord)
    })
}

/// Whether any piece of `by` attacks `target`.
pub fn is_attacked(board: &Board, target: Coord, by: Color) -> bool {
    let holds = |coord: Option<Coord>, kinds: &[PieceKind]| {
        coord
            .and_then(|c| board.piece_at(c))
            .is_some_and(|p| p.color == by && kinds.contains(&p.kind))
    };

    // Pawns of `by` attack diagonally forward, so look backwards from target.
    let back = -by.forward();
    if holds(target.offset(-1, back), &[PieceKind::Pawn])
        || holds(target.offset(1, back), &[PieceKind::Pawn])
    {
        return true;
    }

    if KNIGHT_JUMPS
        .iter()
        .any(|&(dx, dy)| holds(target.offset(dx, dy), &[PieceKind::Knight]))
    {
        return true;
    }

    if KING_STEPS
        .iter()
        .any(|&(dx, dy)| holds(target.offset(dx, dy), &[PieceKind::King]))
    {
        return true;
    }

    let ray_hits = |rays: &[(i8, i8)], kinds: &[PieceKind]| {
        rays.iter().any(|&(dx, dy)| {
            let mut cursor = target;
            while let Some(next) = cursor.offset(dx, dy) {
                if let Some(piece) = board.piece_at(next) {
                    return piece.color == by && kinds.contains(&piece.kind);
                }
                cursor = next;
            }
            false
        })
    };

    ray_hits(&ROOK_RAYS, &[PieceKind::Rook, PieceKind::Queen])
        || ray_hits(&BISHOP_RAYS, &[PieceKind::Bishop, PieceKind::Queen])
}
