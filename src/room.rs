use std::collections::HashMap;

use log::{debug, info};
use rand::Rng;
use tokio::time::Instant;

use crate::board::{Color, Coord};
use crate::clock::{switch_timers, Clock};
use crate::config::Timing;
use crate::game::Match;
use crate::messages::{Outbox, ServerMessage};
use crate::registry::RoomId;
use crate::roster::{Role, Roster, User};
use crate::rules::MoveOracle;
use crate::server::{Command, ConnectionId};
use crate::session::{is_valid_username, SessionId};
use crate::settings::{Settings, SettingsPatch};
use crate::timer::{Scheduler, TimerHandle};

pub const DEFAULT_ROOM_NAME: &str = "Room";

/// Everything a room handler needs besides the room itself.
pub struct Ctx<'a> {
    pub scheduler: &'a Scheduler,
    pub oracle: &'a dyn MoveOracle,
    pub timing: &'a Timing,
    pub outbox: &'a mut Outbox,
}

struct Countdown {
    remaining: u32,
    _ticker: TimerHandle,
}

/// An armed clock timeout. Its expiry only counts while `token` is current,
/// since dropping the timer cannot recall a command already queued.
struct PendingTimeout {
    token: u64,
    _timer: TimerHandle,
}

pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub roster: Roster,
    pub settings: Settings,
    pub game: Option<Match>,
    /// The single pending clock timeout.
    timeout: Option<PendingTimeout>,
    timeouts_armed: u64,
    countdown: Option<Countdown>,
    grace: HashMap<SessionId, TimerHandle>,
}

impl Room {
    pub fn new(id: RoomId, owner: SessionId, username: String) -> Self {
        let mut roster = Roster::default();
        roster.insert_owner(owner, username);
        Room {
            id,
            name: DEFAULT_ROOM_NAME.to_string(),
            roster,
            settings: Settings::default(),
            game: None,
            timeout: None,
            timeouts_armed: 0,
            countdown: None,
            grace: HashMap::new(),
        }
    }

    pub fn data(&self) -> ServerMessage {
        ServerMessage::Data {
            room_id: self.id,
            name: self.name.clone(),
            users: self.roster.views(),
        }
    }

    pub fn broadcast_data(&self, ctx: &mut Ctx) {
        ctx.outbox.broadcast(self.id, self.data());
    }

    fn broadcast_board(&self, ctx: &mut Ctx) {
        if let Some(game) = &self.game {
            ctx.outbox.broadcast(
                self.id,
                ServerMessage::BoardData {
                    board: game.snapshot(&self.roster),
                },
            );
        }
    }

    /// Seat, status and, during a match, the color a user looks at the
    /// board from. Spectators see player1's side.
    pub fn user_data(&self, id: &SessionId) -> Option<ServerMessage> {
        let user = self.roster.get(id)?;
        let color = self.game.as_ref().and_then(|game| {
            user.color.or_else(|| {
                self.roster
                    .get(&game.player1)
                    .and_then(|player1| player1.color)
            })
        });
        Some(ServerMessage::UserData {
            status: user.status,
            role: user.role,
            color,
        })
    }

    /// Brings a freshly attached connection up to date.
    pub fn enter(&self, id: &SessionId, connection: ConnectionId, ctx: &mut Ctx) {
        let Some(user) = self.roster.get(id) else {
            return;
        };

        ctx.outbox.reply(connection, self.data());
        ctx.outbox.reply(
            connection,
            ServerMessage::Settings {
                settings: self.settings,
            },
        );
        ctx.outbox.reply(
            connection,
            ServerMessage::UserData {
                status: user.status,
                role: user.role,
                color: None,
            },
        );
        ctx.outbox.reply(
            connection,
            ServerMessage::server_msg(format!("Welcome, {}!", user.username)),
        );

        if let Some(game) = &self.game {
            ctx.outbox.reply(
                connection,
                ServerMessage::BoardData {
                    board: game.snapshot(&self.roster),
                },
            );
            if let Some(user_data) = self.user_data(id) {
                ctx.outbox.reply(connection, user_data);
            }
        }

        if self.roster.len() == 1 {
            ctx.outbox
                .broadcast(self.id, ServerMessage::server_msg("Room successfully created!"));
            ctx.outbox
                .broadcast(self.id, ServerMessage::server_msg(format!("Room ID {}", self.id)));
        }
    }

    pub fn chat(&self, id: &SessionId, text: String, ctx: &mut Ctx) {
        if text.is_empty() {
            return;
        }
        if let Some(user) = self.roster.get(id) {
            ctx.outbox.broadcast(
                self.id,
                ServerMessage::Msg {
                    sender: user.username.clone(),
                    text,
                },
            );
        }
    }

    /// Returns whether the name changed.
    pub fn rename(&mut self, id: &SessionId, username: &str, ctx: &mut Ctx) -> bool {
        let Some(user) = self.roster.get_mut(id) else {
            return false;
        };
        if user.username == username || !is_valid_username(username) {
            return false;
        }

        let old = std::mem::replace(&mut user.username, username.to_string());
        self.broadcast_data(ctx);
        ctx.outbox.broadcast(
            self.id,
            ServerMessage::server_msg(format!("{old} changed username to {username}")),
        );
        true
    }

    /// Rebroadcasts the roster after an owner renamed the room.
    pub fn announce_name(&self, id: &SessionId, ctx: &mut Ctx) {
        if self.roster.get(id).is_some_and(User::is_owner) {
            self.broadcast_data(ctx);
        }
    }

    pub fn set_settings(&mut self, id: &SessionId, patch: &SettingsPatch, ctx: &mut Ctx) {
        if !self.roster.get(id).is_some_and(User::is_owner) {
            debug!("Room {}: settings change from non-owner ignored", self.id);
            return;
        }

        self.settings.apply(patch);
        if !self.settings.timer_enabled {
            self.timeout = None;
        }
        ctx.outbox.broadcast(
            self.id,
            ServerMessage::Settings {
                settings: self.settings,
            },
        );
    }

    fn players_ready(&self) -> bool {
        self.roster
            .iter()
            .filter(|(_, user)| user.role.is_player() && user.ready)
            .count()
            == 2
    }

    pub fn set_ready(&mut self, id: &SessionId, ready: bool, ctx: &mut Ctx) {
        let between_rounds = self.game.as_ref().is_none_or(Match::round_concluded);
        let Some(user) = self.roster.get_mut(id) else {
            return;
        };
        if !user.role.is_player() || !between_rounds {
            debug!("Room {}: ready toggle ignored", self.id);
            return;
        }

        user.ready = ready;
        self.broadcast_data(ctx);

        if self.game.is_some() {
            self.start_next_round(ctx);
        } else {
            self.begin_countdown(ctx);
        }
    }

    fn begin_countdown(&mut self, ctx: &mut Ctx) {
        if self.countdown.is_some() || !self.players_ready() {
            return;
        }
        if ctx.timing.countdown_ticks == 0 {
            self.start_match(ctx);
            return;
        }

        let room = self.id;
        let ticker = ctx
            .scheduler
            .every(ctx.timing.countdown_period, move || Command::CountdownTick { room });
        self.countdown = Some(Countdown {
            remaining: ctx.timing.countdown_ticks,
            _ticker: ticker,
        });
        announce_countdown(room, ctx.timing.countdown_ticks, ctx);
    }

    pub fn countdown_tick(&mut self, ctx: &mut Ctx) {
        if self.countdown.is_none() {
            return;
        }
        if !self.players_ready() {
            debug!("Room {}: countdown aborted", self.id);
            self.countdown = None;
            return;
        }

        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        countdown.remaining = countdown.remaining.saturating_sub(1);
        if countdown.remaining == 0 {
            self.start_match(ctx);
        } else {
            announce_countdown(self.id, countdown.remaining, ctx);
        }
    }

    fn start_match(&mut self, ctx: &mut Ctx) {
        let player1_white = rand::thread_rng().gen_bool(0.5);
        self.begin_match(player1_white, ctx);
    }

    fn begin_match(&mut self, player1_white: bool, ctx: &mut Ctx) {
        self.countdown = None;
        let (Some(player1), Some(player2)) = (
            self.roster.find_role(Role::Player1),
            self.roster.find_role(Role::Player2),
        ) else {
            return;
        };

        let (color1, color2) = if player1_white {
            (Color::White, Color::Black)
        } else {
            (Color::Black, Color::White)
        };
        for (id, color) in [(player1, color1), (player2, color2)] {
            if let Some(user) = self.roster.get_mut(&id) {
                user.ready = false;
                user.color = Some(color);
            }
        }

        self.game = Some(Match::new(player1, player2));
        if self.settings.timer_enabled {
            self.start_clocks(ctx);
        }

        info!("Room {}: match started", self.id);
        if let Some(game) = &self.game {
            ctx.outbox.broadcast(
                self.id,
                ServerMessage::StartGame {
                    board: game.snapshot(&self.roster),
                },
            );
        }
    }

    fn start_next_round(&mut self, ctx: &mut Ctx) {
        let Some(game) = self.game.as_mut() else {
            return;
        };
        let ready = [game.player1, game.player2]
            .iter()
            .all(|id| self.roster.get(id).is_some_and(|user| user.ready));
        if !ready {
            return;
        }

        for id in [game.player1, game.player2] {
            if let Some(user) = self.roster.get_mut(&id) {
                user.ready = false;
                user.color = user.color.map(Color::opposite);
            }
        }
        game.next_round();
        let round = game.current_round;

        if self.settings.timer_enabled {
            self.start_clocks(ctx);
        }

        info!("Room {}: round {} started", self.id, round);
        if let Some(game) = &self.game {
            ctx.outbox.broadcast(
                self.id,
                ServerMessage::StartRound {
                    board: game.snapshot(&self.roster),
                },
            );
        }
    }

    /// Fresh clocks for both players with white's running.
    fn start_clocks(&mut self, ctx: &mut Ctx) {
        let Some(game) = &self.game else {
            return;
        };
        let now = Instant::now();
        let mut waiting = None;

        for (id, user) in self.roster.iter_mut() {
            let Some(role) = game.role_of(id) else {
                continue;
            };
            let mut clock = Clock::new(self.settings.timer_length, now);
            if user.color == Some(Color::White) {
                clock.resume(now);
            } else {
                waiting = Some(role);
            }
            user.clock = Some(clock);
        }

        if let Some(waiting) = waiting {
            self.arm_timeout(waiting, ctx);
        }
    }

    /// Arms the timeout that hands the round to `winner` once the opponent,
    /// who is now to move, runs out of time.
    fn arm_timeout(&mut self, winner: Role, ctx: &mut Ctx) {
        let Some(game) = &self.game else {
            return;
        };
        let Some(to_move) = winner.opponent().and_then(|role| game.player(role)) else {
            return;
        };
        let Some(clock) = self.roster.get(&to_move).and_then(|user| user.clock) else {
            return;
        };

        self.timeouts_armed += 1;
        let token = self.timeouts_armed;
        let command = Command::ClockExpired {
            room: self.id,
            token,
            winner,
        };
        self.timeout = Some(PendingTimeout {
            token,
            _timer: ctx.scheduler.after(clock.deadline(), command),
        });
    }

    fn switch_clocks(&mut self, mover: Role, rearm: bool, ctx: &mut Ctx) {
        self.timeout = None;
        let Some(game) = &self.game else {
            return;
        };
        let (Some(mover_id), Some(other_id)) = (
            game.player(mover),
            mover.opponent().and_then(|role| game.player(role)),
        ) else {
            return;
        };

        if let Some((active, other)) = self.roster.pair_mut(&mover_id, &other_id) {
            if let (Some(active), Some(other)) = (active.clock.as_mut(), other.clock.as_mut()) {
                switch_timers(active, other, self.settings.timer_bonus, Instant::now());
            }
        }

        if rearm {
            self.arm_timeout(mover, ctx);
        }
    }

    pub fn submit_move(
        &mut self,
        id: &SessionId,
        origin: Coord,
        destination: Coord,
        ctx: &mut Ctx,
    ) {
        let Some(game) = self.game.as_mut() else {
            return;
        };
        if game.is_over() || game.round_concluded() {
            debug!("Room {}: move outside a running round ignored", self.id);
            return;
        }

        let mover_color = self.roster.get(id).and_then(|user| user.color);
        let legal = game.check_move(ctx.oracle, mover_color, origin, destination);
        let mut clocked_mover = None;

        if let (Some(legal), Some(color), Some(role)) = (legal, mover_color, game.role_of(id)) {
            let player1_color = self.roster.get(&game.player1).and_then(|user| user.color);
            let player2_color = self.roster.get(&game.player2).and_then(|user| user.color);
            game.record_stats(color, destination, player1_color, player2_color);
            game.apply_move(origin, legal);

            if ctx.oracle.is_checkmate(&game.board, game.current_color) {
                info!("Room {}: round {} won by checkmate", self.id, game.current_round);
                game.conclude_round(role, color, self.settings.rounds);
            }
            game.promote(destination);

            let round_open = !game.round_concluded() && !game.is_over();
            if self.settings.timer_enabled {
                clocked_mover = Some((role, round_open));
            }
        }

        if let Some((role, round_open)) = clocked_mover {
            self.switch_clocks(role, round_open, ctx);
        }

        self.broadcast_board(ctx);
        if self.game.as_ref().is_some_and(Match::is_over) {
            self.finish_match();
        }
    }

    /// A player's clock ran out; `winner` is the opponent who last moved.
    pub fn clock_expired(&mut self, token: u64, winner: Role, ctx: &mut Ctx) {
        let current = self
            .timeout
            .as_ref()
            .is_some_and(|pending| pending.token == token);
        let Some(game) = self.game.as_mut() else {
            return;
        };
        if !current || game.round_concluded() || game.is_over() {
            debug!("Room {}: stale clock timeout ignored", self.id);
            return;
        }
        self.timeout = None;
        let round = game.current_round;

        let Some(color) = game
            .player(winner)
            .and_then(|id| self.roster.get(&id))
            .and_then(|user| user.color)
        else {
            return;
        };
        info!("Room {}: round {} lost on time", self.id, round);
        game.conclude_round(winner, color, self.settings.rounds);

        if let Some(loser) = winner.opponent().and_then(|role| game.player(role)) {
            if let Some(clock) = self.roster.get_mut(&loser).and_then(|u| u.clock.as_mut()) {
                clock.pause(0, Instant::now());
            }
        }

        self.broadcast_board(ctx);
        if self.game.as_ref().is_some_and(Match::is_over) {
            self.finish_match();
        }
    }

    /// Removes a user for good, forfeiting their match if they were playing.
    /// The caller drops the room when this empties the roster.
    pub fn leave(&mut self, id: &SessionId, ctx: &mut Ctx) -> Option<User> {
        if !self.roster.contains(id) {
            return None;
        }
        self.grace.remove(id);

        if self.forfeit(id) {
            self.broadcast_board(ctx);
            self.finish_match();
        }

        let user = self.roster.remove(id);
        self.broadcast_data(ctx);
        user
    }

    fn forfeit(&mut self, id: &SessionId) -> bool {
        let Some(game) = self.game.as_mut() else {
            return false;
        };
        let (Some(role), Some(color)) = (
            game.role_of(id),
            self.roster.get(id).and_then(|user| user.color),
        ) else {
            return false;
        };

        self.timeout = None;
        game.forfeit(role, color);
        info!("Room {}: {:?} forfeited the match", self.id, role);
        true
    }

    /// The user's last connection dropped; they have a grace period to return.
    pub fn disconnect(&mut self, id: &SessionId, ctx: &mut Ctx) {
        let Some(user) = self.roster.get_mut(id) else {
            return;
        };
        user.connected = false;

        let command = Command::GraceExpired {
            room: self.id,
            session: *id,
        };
        self.grace
            .insert(*id, ctx.scheduler.after(ctx.timing.disconnect_grace, command));
        self.broadcast_data(ctx);
    }

    pub fn reconnect(&mut self, id: &SessionId) {
        if let Some(user) = self.roster.get_mut(id) {
            user.connected = true;
            self.grace.remove(id);
        }
    }

    pub fn grace_expired(&mut self, id: &SessionId, ctx: &mut Ctx) -> Option<User> {
        let still_away = self.roster.get(id).is_some_and(|user| !user.connected);
        if !still_away {
            return None;
        }
        info!("Room {}: user did not come back in time", self.id);
        self.leave(id, ctx)
    }

    fn finish_match(&mut self) {
        if let Some(game) = self.game.take() {
            info!("Room {}: match finished, winner {:?}", self.id, game.winner);
        }
        self.timeout = None;
        for (_, user) in self.roster.iter_mut() {
            user.color = None;
            user.clock = None;
            user.ready = false;
        }
    }

    #[cfg(test)]
    pub fn has_pending_timeout(&self) -> bool {
        self.timeout.is_some()
    }
}

fn announce_countdown(room: RoomId, remaining: u32, ctx: &mut Ctx) {
    ctx.outbox.broadcast(
        room,
        ServerMessage::server_msg(format!("Game starts in {remaining}...")),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Piece, PieceKind, Square};
    use crate::game::{Outcome, RoundResult};
    use crate::messages::Audience;
    use crate::rules::StandardRules;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        room: Room,
        scheduler: Scheduler,
        commands: mpsc::UnboundedReceiver<Command>,
        oracle: StandardRules,
        timing: Timing,
        outbox: Outbox,
        player1: SessionId,
        player2: SessionId,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, commands) = mpsc::unbounded_channel();
            let player1 = Uuid::new_v4();
            let player2 = Uuid::new_v4();
            let mut room = Room::new(1, player1, "alice".into());
            room.roster.join(player2, "bob".into());
            Harness {
                room,
                scheduler: Scheduler::new(tx),
                commands,
                oracle: StandardRules,
                timing: Timing::default(),
                outbox: Outbox::default(),
                player1,
                player2,
            }
        }

        fn run<R>(&mut self, f: impl FnOnce(&mut Room, &mut Ctx) -> R) -> R {
            let mut ctx = Ctx {
                scheduler: &self.scheduler,
                oracle: &self.oracle,
                timing: &self.timing,
                outbox: &mut self.outbox,
            };
            f(&mut self.room, &mut ctx)
        }

        /// Waits for the next scheduled command and feeds it to the room.
        async fn fire_next(&mut self) {
            let command = self.commands.recv().await.unwrap();
            self.run(|room, ctx| match command {
                Command::CountdownTick { .. } => room.countdown_tick(ctx),
                Command::ClockExpired { token, winner, .. } => {
                    room.clock_expired(token, winner, ctx);
                }
                Command::GraceExpired { session, .. } => {
                    room.grace_expired(&session, ctx);
                }
                _ => unreachable!("rooms only schedule timer commands"),
            });
        }

        fn start(&mut self, player1_white: bool) {
            self.run(|room, ctx| room.begin_match(player1_white, ctx));
        }

        fn mover(&self, color: Color) -> SessionId {
            if self.room.roster.get(&self.player1).unwrap().color == Some(color) {
                self.player1
            } else {
                self.player2
            }
        }

        fn play(&mut self, from: (u8, u8), to: (u8, u8)) {
            let color = self.room.game.as_ref().unwrap().current_color;
            let mover = self.mover(color);
            self.run(|room, ctx| {
                room.submit_move(
                    &mover,
                    Coord::new(from.0, from.1),
                    Coord::new(to.0, to.1),
                    ctx,
                );
            });
        }

        fn ready_both(&mut self) {
            let (p1, p2) = (self.player1, self.player2);
            self.run(|room, ctx| {
                room.set_ready(&p1, true, ctx);
                room.set_ready(&p2, true, ctx);
            });
        }

        fn server_msgs(&self) -> Vec<String> {
            self.outbox
                .messages()
                .iter()
                .filter_map(|out| match &out.message {
                    ServerMessage::ServerMsg { text } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }

        fn count<F: Fn(&ServerMessage) -> bool>(&self, pred: F) -> usize {
            self.outbox
                .messages()
                .iter()
                .filter(|out| pred(&out.message))
                .count()
        }
    }

    fn fools_mate(h: &mut Harness) {
        h.play((5, 1), (5, 2));
        h.play((4, 6), (4, 4));
        h.play((6, 1), (6, 3));
        h.play((3, 7), (7, 3));
    }

    fn scholars_mate(h: &mut Harness) {
        h.play((4, 1), (4, 3));
        h.play((4, 6), (4, 4));
        h.play((5, 0), (2, 3));
        h.play((1, 7), (2, 5));
        h.play((3, 0), (7, 4));
        h.play((6, 7), (5, 5));
        h.play((7, 4), (5, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_starts_the_match() {
        let mut h = Harness::new();
        h.ready_both();
        assert_eq!(h.server_msgs(), vec!["Game starts in 5..."]);

        for _ in 0..5 {
            h.fire_next().await;
        }

        assert_eq!(
            h.server_msgs(),
            vec![
                "Game starts in 5...",
                "Game starts in 4...",
                "Game starts in 3...",
                "Game starts in 2...",
                "Game starts in 1...",
            ]
        );
        assert_eq!(
            h.count(|m| matches!(m, ServerMessage::StartGame { .. })),
            1
        );

        let game = h.room.game.as_ref().unwrap();
        assert_eq!(game.board, Board::standard());
        assert_eq!(game.current_round, 1);
        let c1 = h.room.roster.get(&h.player1).unwrap().color.unwrap();
        let c2 = h.room.roster.get(&h.player2).unwrap().color.unwrap();
        assert_eq!(c1.opposite(), c2);
        assert!(!h.room.roster.get(&h.player1).unwrap().ready);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_aborts_silently_when_a_player_unreadies() {
        let mut h = Harness::new();
        h.ready_both();
        h.fire_next().await;

        let p2 = h.player2;
        h.run(|room, ctx| room.set_ready(&p2, false, ctx));
        h.fire_next().await;

        assert_eq!(
            h.server_msgs(),
            vec!["Game starts in 5...", "Game starts in 4..."]
        );
        assert!(h.room.game.is_none());
        assert!(h.room.countdown.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn spectators_cannot_ready_up() {
        let mut h = Harness::new();
        let spectator = Uuid::new_v4();
        h.room.roster.join(spectator, "carol".into());
        h.run(|room, ctx| room.set_ready(&spectator, true, ctx));
        assert!(!h.room.roster.get(&spectator).unwrap().ready);
        assert!(h.outbox.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn illegal_move_leaves_the_board_untouched() {
        let mut h = Harness::new();
        h.start(true);
        let before = h.room.game.as_ref().unwrap().board.clone();

        // black tries to move on white's turn
        let black = h.player2;
        h.run(|room, ctx| {
            room.submit_move(&black, Coord::new(4, 6), Coord::new(4, 4), ctx);
        });
        // white tries an impossible jump
        let white = h.player1;
        h.run(|room, ctx| {
            room.submit_move(&white, Coord::new(4, 1), Coord::new(4, 5), ctx);
        });

        let game = h.room.game.as_ref().unwrap();
        assert_eq!(game.board, before);
        assert_eq!(game.current_color, Color::White);
        assert_eq!(
            h.count(|m| matches!(m, ServerMessage::BoardData { .. })),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn castling_through_the_room() {
        let mut h = Harness::new();
        h.start(true);
        {
            let game = h.room.game.as_mut().unwrap();
            game.board = Board::empty();
            game.board[Coord::new(4, 0)] =
                Square::occupied(Piece::with_castling(PieceKind::King, Color::White));
            game.board[Coord::new(7, 0)] =
                Square::occupied(Piece::with_castling(PieceKind::Rook, Color::White));
            game.board[Coord::new(4, 7)] =
                Square::occupied(Piece::new(PieceKind::King, Color::Black));
        }

        h.play((4, 0), (6, 0));

        let game = h.room.game.as_ref().unwrap();
        assert_eq!(
            game.board.piece_at(Coord::new(5, 0)),
            Some(Piece::new(PieceKind::Rook, Color::White))
        );
        assert_eq!(
            game.board.piece_at(Coord::new(6, 0)),
            Some(Piece::new(PieceKind::King, Color::White))
        );
        assert_eq!(game.current_color, Color::Black);
    }

    #[tokio::test(start_paused = true)]
    async fn checkmate_wins_the_round_and_next_round_swaps_colors() {
        let mut h = Harness::new();
        h.room.settings.rounds = 3;
        h.start(false); // player1 black
        fools_mate(&mut h);

        let game = h.room.game.as_ref().unwrap();
        assert_eq!(
            game.rounds_history,
            vec![RoundResult {
                winner: Role::Player1,
                color: Color::Black,
            }]
        );
        assert_eq!(game.score.player1, 1);
        assert_eq!(game.winner, None);
        assert!(!h.room.has_pending_timeout());

        // moves after the round ended are ignored without a broadcast
        let boards = h.count(|m| matches!(m, ServerMessage::BoardData { .. }));
        h.play((0, 1), (0, 2));
        assert_eq!(
            h.count(|m| matches!(m, ServerMessage::BoardData { .. })),
            boards
        );

        h.ready_both();
        let game = h.room.game.as_ref().unwrap();
        assert_eq!(game.current_round, 2);
        assert_eq!(game.board, Board::standard());
        assert_eq!(game.current_color, Color::White);
        assert_eq!(h.room.settings.rounds, 3);
        assert_eq!(
            h.room.roster.get(&h.player1).unwrap().color,
            Some(Color::White)
        );
        assert_eq!(
            h.count(|m| matches!(m, ServerMessage::StartRound { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn majority_ends_the_match_but_keeps_the_room() {
        let mut h = Harness::new();
        h.room.settings.rounds = 3;
        h.start(false);
        fools_mate(&mut h);
        h.ready_both();
        scholars_mate(&mut h);

        assert!(h.room.game.is_none());
        assert!(!h.room.has_pending_timeout());
        assert_eq!(h.room.roster.len(), 2);
        assert!(h.room.roster.get(&h.player1).unwrap().color.is_none());

        let last = h
            .outbox
            .messages()
            .iter()
            .rev()
            .find_map(|out| match &out.message {
                ServerMessage::BoardData { board } => Some(board.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last.winner, Some(Outcome::Player1));
        assert_eq!(last.score.player1, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_mid_round_is_ignored() {
        let mut h = Harness::new();
        h.start(true);
        let p1 = h.player1;
        h.run(|room, ctx| room.set_ready(&p1, true, ctx));
        assert!(!h.room.roster.get(&p1).unwrap().ready);
    }

    #[tokio::test(start_paused = true)]
    async fn running_out_of_time_loses_the_round() {
        let mut h = Harness::new();
        h.room.settings.timer_length = 1_000;
        h.start(true);
        assert!(h.room.has_pending_timeout());

        let started = Instant::now();
        h.fire_next().await;
        assert_eq!(started.elapsed(), Duration::from_millis(1_100));

        // white never moved, so black (player2) takes it
        assert!(h.room.game.is_none());
        let board = h
            .outbox
            .messages()
            .iter()
            .find_map(|out| match &out.message {
                ServerMessage::BoardData { board } => Some(board.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(board.winner, Some(Outcome::Player2));
        assert_eq!(
            board.rounds_history,
            vec![RoundResult {
                winner: Role::Player2,
                color: Color::Black,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn moving_rearms_against_the_opponent_with_bonus() {
        let mut h = Harness::new();
        h.room.settings.timer_length = 10_000;
        h.room.settings.timer_bonus = 2_000;
        h.start(true);

        tokio::time::advance(Duration::from_secs(3)).await;
        h.play((4, 1), (4, 3));

        let white = h.room.roster.get(&h.player1).unwrap().clock.unwrap();
        let black = h.room.roster.get(&h.player2).unwrap().clock.unwrap();
        assert_eq!(white.remain_ms(), 10_100 - 3_000 + 2_000);
        assert!(!white.is_running());
        assert!(black.is_running());

        // black's full budget elapses next; white is credited
        let started = Instant::now();
        h.fire_next().await;
        assert_eq!(started.elapsed(), Duration::from_millis(10_100));
        assert!(h.room.game.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_queued_behind_a_move_is_ignored() {
        let mut h = Harness::new();
        h.room.settings.timer_length = 1_000;
        h.start(true);

        // white's clock runs out, but the move was already waiting ahead of
        // the expiry in the queue
        let queued = h.commands.recv().await.unwrap();
        h.play((4, 1), (4, 3));
        let Command::ClockExpired { token, winner, .. } = queued else {
            panic!("expected a clock expiry");
        };
        assert_eq!(winner, Role::Player2);
        h.run(|room, ctx| room.clock_expired(token, winner, ctx));

        let game = h.room.game.as_ref().unwrap();
        assert!(game.rounds_history.is_empty());
        assert_eq!(game.winner, None);
        assert_eq!(game.current_color, Color::Black);
        assert!(h.room.has_pending_timeout());

        // the timeout armed for black still decides the round
        h.fire_next().await;
        assert!(h.room.game.is_none());
        let board = h
            .outbox
            .messages()
            .iter()
            .rev()
            .find_map(|out| match &out.message {
                ServerMessage::BoardData { board } => Some(board.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(board.winner, Some(Outcome::Player1));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timeout_changes_nothing() {
        let mut h = Harness::new();
        h.room.settings.rounds = 3;
        h.start(false);
        fools_mate(&mut h);

        let before = h.room.game.clone().unwrap();
        h.run(|room, ctx| room.clock_expired(1, Role::Player2, ctx));
        let after = h.room.game.as_ref().unwrap();
        assert_eq!(after.score, before.score);
        assert_eq!(after.rounds_history, before.rounds_history);
        assert_eq!(after.stats, before.stats);

        // an expiry armed during the previous round is ignored once the next starts
        h.ready_both();
        h.run(|room, ctx| room.clock_expired(1, Role::Player2, ctx));
        let game = h.room.game.as_ref().unwrap();
        assert_eq!(game.rounds_history.len(), 1);
        assert!(h.room.has_pending_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_mid_match_forfeits() {
        let mut h = Harness::new();
        h.start(true);
        let p2 = h.player2;
        let left = h.run(|room, ctx| room.leave(&p2, ctx));

        assert!(left.is_some());
        assert!(h.room.game.is_none());
        assert!(!h.room.has_pending_timeout());
        let board = h
            .outbox
            .messages()
            .iter()
            .find_map(|out| match &out.message {
                ServerMessage::BoardData { board } => Some(board.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(board.winner, Some(Outcome::Player1));
        assert_eq!(board.score.player1, 1);
        assert!(h
            .outbox
            .messages()
            .iter()
            .all(|out| out.audience == Audience::Room(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_without_return_forfeits_after_grace() {
        let mut h = Harness::new();
        h.start(true); // player2 black
        let p2 = h.player2;
        h.run(|room, ctx| room.disconnect(&p2, ctx));
        assert!(!h.room.roster.get(&p2).unwrap().connected);

        // the clock timeout (10 minutes) is later than the grace period
        let started = Instant::now();
        h.fire_next().await;
        assert_eq!(started.elapsed(), Duration::from_secs(120));

        assert!(!h.room.roster.contains(&p2));
        assert!(h.room.game.is_none());
        let board = h
            .outbox
            .messages()
            .iter()
            .find_map(|out| match &out.message {
                ServerMessage::BoardData { board } => Some(board.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            board.rounds_history,
            vec![RoundResult {
                winner: Role::Player1,
                color: Color::White,
            }]
        );
        assert_eq!(board.winner, Some(Outcome::Player1));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_within_grace_keeps_the_seat() {
        let mut h = Harness::new();
        h.room.settings.timer_enabled = false;
        h.start(true);
        let p2 = h.player2;
        h.run(|room, ctx| room.disconnect(&p2, ctx));
        tokio::time::advance(Duration::from_secs(60)).await;
        h.room.reconnect(&p2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(h.commands.try_recv().is_err());
        assert!(h.room.roster.get(&p2).unwrap().connected);
        assert!(h.room.game.is_some());

        // a grace expiry that raced the reconnect is a no-op
        let outcome = h.run(|room, ctx| room.grace_expired(&p2, ctx));
        assert!(outcome.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_owner_changes_settings() {
        let mut h = Harness::new();
        let (p1, p2) = (h.player1, h.player2);
        let patch = SettingsPatch {
            rounds: Some(5),
            ..SettingsPatch::default()
        };
        h.run(|room, ctx| room.set_settings(&p2, &patch, ctx));
        assert_eq!(h.room.settings.rounds, 1);

        h.run(|room, ctx| room.set_settings(&p1, &patch, ctx));
        assert_eq!(h.room.settings.rounds, 5);
        assert_eq!(
            h.count(|m| matches!(m, ServerMessage::Settings { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rename_validates_and_announces() {
        let mut h = Harness::new();
        let p1 = h.player1;
        assert!(!h.run(|room, ctx| room.rename(&p1, "x!", ctx)));
        assert!(!h.run(|room, ctx| room.rename(&p1, "alice", ctx)));
        assert!(h.run(|room, ctx| room.rename(&p1, "alice_2", ctx)));
        assert_eq!(
            h.server_msgs(),
            vec!["alice changed username to alice_2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_chat_is_dropped() {
        let mut h = Harness::new();
        let p1 = h.player1;
        h.run(|room, ctx| room.chat(&p1, String::new(), ctx));
        assert!(h.outbox.messages().is_empty());
        h.run(|room, ctx| room.chat(&p1, "gl hf".into(), ctx));
        assert!(matches!(
            &h.outbox.messages()[0].message,
            ServerMessage::Msg { sender, text } if sender == "alice" && text == "gl hf"
        ));
    }
}
