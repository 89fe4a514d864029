//! Per-game state: pawn/board materialization, move validation and
//! application, scoring, and the ranking-update formula.

use rand::Rng;

use crate::connection::ConnId;
use crate::error::{Code, Error, Result};

use super::reachability::prune_dead;
use super::shapes::Grid;

const DEAD_INITIAL: i32 = -3;

#[derive(Debug, Clone, Copy)]
pub struct PlayerSlot {
    pub conn: ConnId,
    pub user_id: i64,
}

pub struct Game {
    pub id: u64,
    pub players: [PlayerSlot; 2],
    pawn_rotations: Vec<Grid>,
    pub point_board: Vec<Vec<i64>>,
    pub move_board: Vec<Vec<i32>>,
    pub current_player: u8,
    pub finished: bool,
}

#[derive(Debug)]
pub struct MoveOutcome {
    pub finished: bool,
    /// 0 = draw, 1/2 = that player's slot won. Only meaningful if `finished`.
    pub winner: u8,
    pub scores: [i64; 2],
}

impl Game {
    pub fn new(id: u64, players: [PlayerSlot; 2], pawn: &Grid, board: &Grid, rng: &mut impl Rng) -> Game {
        let mut move_board = vec![vec![0i32; board.width]; board.height];
        for y in 0..board.height {
            for x in 0..board.width {
                if !board.cells[y][x] {
                    move_board[y][x] = DEAD_INITIAL;
                }
            }
        }
        let pawn_rotations = pawn.rotations();
        prune_dead(&mut move_board, &pawn_rotations, DEAD_INITIAL);

        let mut point_board = vec![vec![0i64; board.width]; board.height];
        for y in 0..board.height {
            for x in 0..board.width {
                if move_board[y][x] == 0 {
                    point_board[y][x] = rng.gen_range(1..=9);
                }
            }
        }

        Game {
            id,
            players,
            pawn_rotations,
            point_board,
            move_board,
            current_player: 1,
            finished: false,
        }
    }

    pub fn width(&self) -> usize {
        if self.move_board.is_empty() { 0 } else { self.move_board[0].len() }
    }

    pub fn height(&self) -> usize {
        self.move_board.len()
    }

    pub fn slot_index(&self, conn: ConnId) -> Option<usize> {
        self.players.iter().position(|p| p.conn == conn)
    }

    pub fn opponent_slot(&self, player_number: u8) -> usize {
        (2 - player_number) as usize
    }

    fn rotation_grid(&self, rotation: usize) -> Result<&Grid> {
        self.pawn_rotations
            .get(rotation)
            .ok_or_else(|| Error::business(Code::NoMove))
    }

    /// Validates then applies a move, in the order: turn ownership, bounds,
    /// and per-cell legality. Does not check game-id/connection ownership —
    /// the caller (the matchmaker/game manager) has already resolved those.
    pub fn apply_move(&mut self, player_number: u8, x: usize, y: usize, rotation: usize) -> Result<MoveOutcome> {
        if self.finished {
            return Err(Error::business(Code::BadGameId));
        }
        if player_number != self.current_player {
            return Err(Error::business(Code::WrongTurn));
        }
        let grid = self.rotation_grid(rotation)?;
        let offsets = grid.filled_offsets();
        if offsets.is_empty() {
            return Err(Error::business(Code::NoMove));
        }
        let (width, height) = (self.width(), self.height());
        for (dx, dy) in &offsets {
            let tx = x + dx;
            let ty = y + dy;
            if tx >= width || ty >= height {
                return Err(Error::business(Code::WrongMove));
            }
            if self.move_board[ty][tx] != 0 {
                return Err(Error::business(Code::WrongMove));
            }
        }

        let mover = self.current_player as i32;
        for (dx, dy) in &offsets {
            self.move_board[y + dy][x + dx] = mover;
        }
        prune_dead(&mut self.move_board, &self.pawn_rotations, -mover);

        let scores = self.scores();
        let no_cells_left = self.move_board.iter().flatten().all(|&c| c != 0);
        self.current_player = 3 - self.current_player;

        if no_cells_left {
            self.finished = true;
            let winner = match scores[0].cmp(&scores[1]) {
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Less => 2,
                std::cmp::Ordering::Equal => 0,
            };
            Ok(MoveOutcome { finished: true, winner, scores })
        } else {
            Ok(MoveOutcome { finished: false, winner: 0, scores })
        }
    }

    pub fn scores(&self) -> [i64; 2] {
        let mut s = [0i64, 0i64];
        for y in 0..self.height() {
            for x in 0..self.width() {
                match self.move_board[y][x] {
                    -1 => s[0] += self.point_board[y][x],
                    -2 => s[1] += self.point_board[y][x],
                    _ => {}
                }
            }
        }
        s
    }
}

/// `±(share - 0.5) * 10` where `share = self_points / (self_points + opp_points)`.
/// Callers must not invoke this when both scores are zero (handled
/// separately as a zero rating change).
pub fn rating_delta(self_points: f64, opp_points: f64) -> f64 {
    let total = self_points + opp_points;
    if total <= 0.0 {
        return 0.0;
    }
    let share = self_points / total;
    (share - 0.5) * 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn slots() -> [PlayerSlot; 2] {
        [PlayerSlot { conn: 1, user_id: 10 }, PlayerSlot { conn: 2, user_id: 20 }]
    }

    #[test]
    fn two_by_two_domino_board_ends_in_draw() {
        let pawn = Grid::from_shape("11", 2, 1);
        let board = Grid::from_shape("1111", 2, 2);
        let mut rng = StepRng::new(0, 0); // gen_range(1..=9) always yields 1 with this rng
        let mut game = Game::new(1, slots(), &pawn, &board, &mut rng);
        assert_eq!(game.current_player, 1);

        let outcome = game.apply_move(1, 0, 0, 0).unwrap();
        assert!(!outcome.finished);
        assert_eq!(game.current_player, 2);

        let outcome = game.apply_move(2, 0, 1, 0).unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.winner, 0);
        assert_eq!(outcome.scores[0], outcome.scores[1]);
        assert!(game.move_board.iter().flatten().all(|&c| c != 0));
    }

    #[test]
    fn wrong_turn_is_rejected() {
        let pawn = Grid::from_shape("11", 2, 1);
        let board = Grid::from_shape("1111", 2, 2);
        let mut rng = StepRng::new(0, 0);
        let mut game = Game::new(1, slots(), &pawn, &board, &mut rng);
        let err = game.apply_move(2, 0, 0, 0).unwrap_err();
        match err {
            Error::Business(b) => assert_eq!(b.0, Code::WrongTurn),
            _ => panic!("expected business error"),
        }
    }

    #[test]
    fn occupied_cell_is_rejected() {
        let pawn = Grid::from_shape("11", 2, 1);
        let board = Grid::from_shape("1111", 2, 2);
        let mut rng = StepRng::new(0, 0);
        let mut game = Game::new(1, slots(), &pawn, &board, &mut rng);
        game.apply_move(1, 0, 0, 0).unwrap();
        let err = game.apply_move(2, 0, 0, 0).unwrap_err();
        match err {
            Error::Business(b) => assert_eq!(b.0, Code::WrongMove),
            _ => panic!("expected business error"),
        }
    }

    #[test]
    fn rating_delta_is_zero_sum() {
        let d1 = rating_delta(7.0, 3.0);
        let d2 = rating_delta(3.0, 7.0);
        assert!((d1 + d2).abs() < 1e-9);
        assert!(d1 > 0.0);
    }

    #[test]
    fn rating_delta_draw_is_zero() {
        assert_eq!(rating_delta(5.0, 5.0), 0.0);
    }
}
