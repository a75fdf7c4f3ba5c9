//! State of a match between the two seated players.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::board::{Board, Color, Coord, PieceKind, BOARD_SIZE};
use crate::roster::{Role, Roster, User, UserView};
use crate::rules::{LegalMove, MoveKind, MoveOracle};
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Player1,
    Player2,
    Draw,
}

impl From<Role> for Outcome {
    fn from(role: Role) -> Self {
        match role {
            Role::Player2 => Outcome::Player2,
            // Spectators never win; callers only pass seated roles.
            Role::Player1 | Role::Spectator => Outcome::Player1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoundResult {
    pub winner: Role,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Score {
    pub player1: u32,
    pub player2: u32,
}

impl Score {
    fn credit(&mut self, role: Role) -> u32 {
        match role {
            Role::Player1 => {
                self.player1 += 1;
                self.player1
            }
            Role::Player2 => {
                self.player2 += 1;
                self.player2
            }
            Role::Spectator => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Full moves, counted on white's turn.
    pub moves: u32,
    pub player1_pieces_killed: u32,
    pub player2_pieces_killed: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Stats {
    fn new() -> Self {
        Stats {
            moves: 0,
            player1_pieces_killed: 0,
            player2_pieces_killed: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub board: Board,
    pub current_color: Color,
    pub current_round: usize,
    pub rounds_history: Vec<RoundResult>,
    pub score: Score,
    pub stats: Stats,
    pub player1: SessionId,
    pub player2: SessionId,
    pub winner: Option<Outcome>,
}

impl Match {
    pub fn new(player1: SessionId, player2: SessionId) -> Self {
        Match {
            board: Board::standard(),
            current_color: Color::White,
            current_round: 1,
            rounds_history: Vec::new(),
            score: Score::default(),
            stats: Stats::new(),
            player1,
            player2,
            winner: None,
        }
    }

    /// The current round already has a recorded result.
    pub fn round_concluded(&self) -> bool {
        self.rounds_history.len() == self.current_round
    }

    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    pub fn player(&self, role: Role) -> Option<SessionId> {
        match role {
            Role::Player1 => Some(self.player1),
            Role::Player2 => Some(self.player2),
            Role::Spectator => None,
        }
    }

    pub fn role_of(&self, id: &SessionId) -> Option<Role> {
        if *id == self.player1 {
            Some(Role::Player1)
        } else if *id == self.player2 {
            Some(Role::Player2)
        } else {
            None
        }
    }

    /// Resolves a submitted move against the oracle. `mover_color` is the
    /// color assigned to the submitting user, if any.
    pub fn check_move(
        &self,
        oracle: &dyn MoveOracle,
        mover_color: Option<Color>,
        origin: Coord,
        destination: Coord,
    ) -> Option<LegalMove> {
        let color = mover_color.filter(|color| *color == self.current_color)?;
        let piece = self.board.piece_at(origin).filter(|p| p.color == color)?;
        oracle
            .legal_moves(&self.board, origin, color, piece.castling)
            .into_iter()
            .find(|legal| legal.to == destination)
    }

    pub fn record_stats(
        &mut self,
        mover_color: Color,
        destination: Coord,
        player1_color: Option<Color>,
        player2_color: Option<Color>,
    ) {
        if mover_color == Color::White {
            self.stats.moves += 1;
        }

        let victim = self.board[destination].color();
        if victim.is_some() && victim == player1_color {
            self.stats.player1_pieces_killed += 1;
        }
        if victim.is_some() && victim == player2_color {
            self.stats.player2_pieces_killed += 1;
        }
    }

    /// Moves the piece, handling en passant and castling, and passes the turn.
    pub fn apply_move(&mut self, origin: Coord, legal: LegalMove) {
        let destination = legal.to;
        let mover = self.current_color;

        for piece in self.board.pieces_mut() {
            if piece.color == mover {
                piece.en_passant = false;
            }
        }

        if legal.en_passant {
            match legal.kind {
                MoveKind::Attack => {
                    self.board.take(Coord::new(destination.x, origin.y));
                }
                MoveKind::Move => {
                    if let Some(pawn) = self.board[origin].piece.as_mut() {
                        pawn.en_passant = true;
                    }
                }
            }
        }

        let moving_king = self
            .board
            .piece_at(origin)
            .is_some_and(|p| p.kind == PieceKind::King);
        if moving_king {
            let shift = i16::from(destination.x) - i16::from(origin.x);
            let rook_move = if shift > 1 {
                Some((BOARD_SIZE - 1, destination.x - 1))
            } else if shift < -1 {
                Some((0, destination.x + 1))
            } else {
                None
            };
            if let Some((from_x, to_x)) = rook_move {
                if let Some(mut rook) = self.board.take(Coord::new(from_x, destination.y)) {
                    rook.castling = false;
                    self.board[Coord::new(to_x, destination.y)].piece = Some(rook);
                }
            }
        }

        if let Some(piece) = self.board[origin].piece.as_mut() {
            piece.castling = false;
        }

        let piece = self.board.take(origin);
        self.board[destination].piece = piece;
        self.current_color = mover.opposite();
    }

    /// A pawn standing on its last rank becomes a queen.
    pub fn promote(&mut self, destination: Coord) {
        let last_rank = destination.y == 0 || destination.y == BOARD_SIZE - 1;
        if let Some(piece) = self.board[destination].piece.as_mut() {
            if last_rank && piece.kind == PieceKind::Pawn {
                piece.kind = PieceKind::Queen;
            }
        }
    }

    /// Credits `winner` with the current round and decides the match when a
    /// majority is reached, or a draw when the last round ends level.
    pub fn conclude_round(&mut self, winner: Role, winner_color: Color, rounds: u8) {
        if self.round_concluded() {
            return;
        }

        let wins = self.score.credit(winner);
        self.rounds_history.push(RoundResult {
            winner,
            color: winner_color,
        });

        if 2 * wins > u32::from(rounds) {
            self.winner = Some(Outcome::from(winner));
        } else if self.score.player1 == self.score.player2
            && self.current_round == usize::from(rounds)
        {
            self.winner = Some(Outcome::Draw);
        }
        self.stats.end_time = Some(Utc::now());
    }

    /// The seated player `leaver` walked away; the opponent takes the match.
    pub fn forfeit(&mut self, leaver: Role, leaver_color: Color) {
        let Some(opponent) = leaver.opponent() else {
            return;
        };
        if !self.round_concluded() {
            self.score.credit(opponent);
            self.rounds_history.push(RoundResult {
                winner: opponent,
                color: leaver_color.opposite(),
            });
        }
        self.winner = Some(Outcome::from(opponent));
        self.stats.end_time = Some(Utc::now());
    }

    pub fn next_round(&mut self) {
        self.board = Board::standard();
        self.current_color = Color::White;
        self.current_round += 1;
    }

    pub fn snapshot(&self, roster: &Roster) -> MatchSnapshot {
        MatchSnapshot {
            content: self.board.clone(),
            current_color: self.current_color,
            current_round: self.current_round,
            rounds_history: self.rounds_history.clone(),
            score: self.score,
            stats: self.stats.clone(),
            player1: roster.get(&self.player1).map(User::view),
            player2: roster.get(&self.player2).map(User::view),
            winner: self.winner,
        }
    }
}

/// What clients receive in `start-game`, `start-round` and `board-data`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub content: Board,
    pub current_color: Color,
    pub current_round: usize,
    pub rounds_history: Vec<RoundResult>,
    pub score: Score,
    pub stats: Stats,
    pub player1: Option<UserView>,
    pub player2: Option<UserView>,
    pub winner: Option<Outcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Piece, Square};
    use crate::rules::StandardRules;
    use uuid::Uuid;

    fn fresh() -> Match {
        Match::new(Uuid::new_v4(), Uuid::new_v4())
    }

    fn play(game: &mut Match, from: (u8, u8), to: (u8, u8)) {
        let color = game.current_color;
        let origin = Coord::new(from.0, from.1);
        let legal = game
            .check_move(&StandardRules, Some(color), origin, Coord::new(to.0, to.1))
            .unwrap_or_else(|| panic!("{from:?} -> {to:?} should be legal"));
        game.apply_move(origin, legal);
    }

    #[test]
    fn check_move_enforces_turn_and_ownership() {
        let game = fresh();
        let e2 = Coord::new(4, 1);
        let e4 = Coord::new(4, 3);

        assert!(game
            .check_move(&StandardRules, Some(Color::White), e2, e4)
            .is_some());
        assert!(game
            .check_move(&StandardRules, Some(Color::Black), e2, e4)
            .is_none());
        assert!(game.check_move(&StandardRules, None, e2, e4).is_none());
        // black piece on white's turn
        assert!(game
            .check_move(&StandardRules, Some(Color::White), Coord::new(4, 6), Coord::new(4, 4))
            .is_none());
        assert!(game
            .check_move(&StandardRules, Some(Color::White), e2, Coord::new(4, 4))
            .is_none());
    }

    #[test]
    fn kingside_castling_moves_the_rook() {
        let mut game = fresh();
        game.board = Board::empty();
        game.board[Coord::new(4, 0)] =
            Square::occupied(Piece::with_castling(PieceKind::King, Color::White));
        game.board[Coord::new(7, 0)] =
            Square::occupied(Piece::with_castling(PieceKind::Rook, Color::White));
        game.board[Coord::new(4, 7)] =
            Square::occupied(Piece::new(PieceKind::King, Color::Black));

        play(&mut game, (4, 0), (6, 0));

        assert_eq!(
            game.board.piece_at(Coord::new(6, 0)),
            Some(Piece::new(PieceKind::King, Color::White))
        );
        assert_eq!(
            game.board.piece_at(Coord::new(5, 0)),
            Some(Piece::new(PieceKind::Rook, Color::White))
        );
        assert!(game.board[Coord::new(7, 0)].is_empty());
        assert!(game.board[Coord::new(4, 0)].is_empty());
        assert_eq!(game.current_color, Color::Black);
    }

    #[test]
    fn queenside_castling_moves_the_rook() {
        let mut game = fresh();
        game.board = Board::empty();
        game.current_color = Color::Black;
        game.board[Coord::new(4, 7)] =
            Square::occupied(Piece::with_castling(PieceKind::King, Color::Black));
        game.board[Coord::new(0, 7)] =
            Square::occupied(Piece::with_castling(PieceKind::Rook, Color::Black));
        game.board[Coord::new(4, 0)] =
            Square::occupied(Piece::new(PieceKind::King, Color::White));

        play(&mut game, (4, 7), (2, 7));

        assert_eq!(
            game.board.piece_at(Coord::new(3, 7)),
            Some(Piece::new(PieceKind::Rook, Color::Black))
        );
        assert_eq!(
            game.board.piece_at(Coord::new(2, 7)).map(|p| p.kind),
            Some(PieceKind::King)
        );
    }

    #[test]
    fn en_passant_flag_travels_with_the_pawn_and_expires() {
        let mut game = fresh();
        play(&mut game, (4, 1), (4, 3)); // e4
        assert!(game.board.piece_at(Coord::new(4, 3)).unwrap().en_passant);
        assert!(game.board[Coord::new(4, 1)].is_empty());

        play(&mut game, (0, 6), (0, 5)); // a6
        // still flagged during black's reply
        assert!(game.board.piece_at(Coord::new(4, 3)).unwrap().en_passant);

        play(&mut game, (4, 3), (4, 4)); // e5, white's own flag cleared
        assert!(!game.board.piece_at(Coord::new(4, 4)).unwrap().en_passant);
    }

    #[test]
    fn en_passant_capture_removes_the_passed_pawn() {
        let mut game = fresh();
        play(&mut game, (4, 1), (4, 3)); // e4
        play(&mut game, (0, 6), (0, 5)); // a6
        play(&mut game, (4, 3), (4, 4)); // e5
        play(&mut game, (3, 6), (3, 4)); // d5, flagged
        assert!(game.board.piece_at(Coord::new(3, 4)).unwrap().en_passant);

        let legal = game
            .check_move(
                &StandardRules,
                Some(Color::White),
                Coord::new(4, 4),
                Coord::new(3, 5),
            )
            .unwrap();
        assert_eq!(legal.kind, MoveKind::Attack);
        assert!(legal.en_passant);
        game.apply_move(Coord::new(4, 4), legal);

        assert!(game.board[Coord::new(3, 4)].is_empty());
        assert_eq!(
            game.board.piece_at(Coord::new(3, 5)),
            Some(Piece::new(PieceKind::Pawn, Color::White))
        );
    }

    #[test]
    fn pawn_reaching_last_rank_becomes_queen() {
        let mut game = fresh();
        game.board = Board::empty();
        game.board[Coord::new(0, 0)] = Square::occupied(Piece::new(PieceKind::King, Color::White));
        game.board[Coord::new(7, 7)] = Square::occupied(Piece::new(PieceKind::King, Color::Black));
        game.board[Coord::new(2, 6)] = Square::occupied(Piece::new(PieceKind::Pawn, Color::White));

        play(&mut game, (2, 6), (2, 7));
        game.promote(Coord::new(2, 7));
        assert_eq!(
            game.board.piece_at(Coord::new(2, 7)).map(|p| p.kind),
            Some(PieceKind::Queen)
        );
    }

    #[test]
    fn stats_count_white_moves_and_captures() {
        let mut game = fresh();
        let p1 = Some(Color::White);
        let p2 = Some(Color::Black);
        game.record_stats(Color::White, Coord::new(4, 3), p1, p2);
        game.record_stats(Color::Black, Coord::new(4, 4), p1, p2);
        assert_eq!(game.stats.moves, 1);
        assert_eq!(game.stats.player1_pieces_killed, 0);

        // a white piece standing on the destination belongs to player1
        game.record_stats(Color::Black, Coord::new(0, 1), p1, p2);
        assert_eq!(game.stats.player1_pieces_killed, 1);
        game.record_stats(Color::White, Coord::new(0, 6), p1, p2);
        assert_eq!(game.stats.player2_pieces_killed, 1);
    }

    #[test]
    fn majority_decides_the_match() {
        let mut game = fresh();
        game.conclude_round(Role::Player1, Color::White, 3);
        assert_eq!(game.score.player1, 1);
        assert_eq!(game.winner, None);
        assert!(game.round_concluded());

        game.next_round();
        assert!(!game.round_concluded());
        game.conclude_round(Role::Player1, Color::Black, 3);
        assert_eq!(game.winner, Some(Outcome::Player1));
        assert_eq!(game.rounds_history.len(), 2);
        assert!(game.stats.end_time.is_some());
    }

    #[test]
    fn level_score_after_last_round_is_a_draw() {
        let mut game = fresh();
        game.conclude_round(Role::Player1, Color::White, 2);
        game.next_round();
        game.conclude_round(Role::Player2, Color::White, 2);
        assert_eq!(game.winner, Some(Outcome::Draw));
    }

    #[test]
    fn concluding_twice_is_ignored() {
        let mut game = fresh();
        game.conclude_round(Role::Player2, Color::Black, 3);
        game.conclude_round(Role::Player1, Color::White, 3);
        assert_eq!(game.score, Score { player1: 0, player2: 1 });
        assert_eq!(game.rounds_history.len(), 1);
    }

    #[test]
    fn forfeit_credits_the_opponent() {
        let mut game = fresh();
        game.forfeit(Role::Player2, Color::White);
        assert_eq!(game.score.player1, 1);
        assert_eq!(
            game.rounds_history,
            vec![RoundResult {
                winner: Role::Player1,
                color: Color::Black,
            }]
        );
        assert_eq!(game.winner, Some(Outcome::Player1));
    }

    #[test]
    fn next_round_resets_the_board() {
        let mut game = fresh();
        play(&mut game, (4, 1), (4, 3));
        game.conclude_round(Role::Player1, Color::White, 3);
        game.next_round();
        assert_eq!(game.board, Board::standard());
        assert_eq!(game.current_color, Color::White);
        assert_eq!(game.current_round, 2);
    }
}
