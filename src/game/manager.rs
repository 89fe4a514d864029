//! Matchmaker and live-game registry: the single waiting slot, the
//! `games` map, and the command dispatch for `find-random-game`,
//! `quit-searching`, `move`, and `abandon-game`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::info;

use crate::auth::AuthManager;
use crate::connection::{ConnId, Registry};
use crate::error::{Code, Error, Result};
use crate::persistence::Store;
use crate::value::{map, Value};

use super::engine::{rating_delta, Game, PlayerSlot};
use super::shapes::Grid;

const CHANNEL_GAME_FOUND: i64 = 14;
const CHANNEL_IN_GAME: i64 = 15;

pub struct GameManager {
    waiting: Mutex<Option<ConnId>>,
    games: Mutex<HashMap<u64, Game>>,
    next_id: AtomicU64,
    store: std::sync::Arc<Store>,
}

impl GameManager {
    pub fn new(store: std::sync::Arc<Store>) -> Self {
        GameManager {
            waiting: Mutex::new(None),
            games: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            store,
        }
    }

    pub fn handle(
        &self,
        conn: ConnId,
        auth: &AuthManager,
        registry: &Registry,
        command: &str,
        fields: &Value,
    ) -> Result<Value> {
        match command {
            "find-random-game" => self.find_random_game(conn, auth, registry),
            "quit-searching" => self.quit_searching(conn),
            "move" => self.make_move(conn, registry, fields),
            "abandon-game" => self.abandon_game(conn, registry, fields),
            _ => Err(Error::protocol(format!("unknown game command {command}"))),
        }
    }

    fn find_random_game(&self, conn: ConnId, auth: &AuthManager, registry: &Registry) -> Result<Value> {
        let my_uid = auth.user_id_of(conn).ok_or_else(|| Error::business(Code::InvalidUser))?;

        // Resolved before the waiting slot is touched: if either is missing
        // this is a deployment error (no pawns/boards seeded) rather than a
        // per-request failure, and we must not dequeue an opponent into a
        // game that can never be built.
        let pawn_row = self
            .store
            .random_pawn()?
            .ok_or_else(|| Error::internal("no pawns available to start a game"))?;
        let board_row = self
            .store
            .random_board()?
            .ok_or_else(|| Error::internal("no boards available to start a game"))?;

        let pending = {
            let mut waiting = self.waiting.lock().unwrap();
            match *waiting {
                None => {
                    *waiting = Some(conn);
                    None
                }
                Some(other) => {
                    *waiting = None;
                    Some(other)
                }
            }
        };

        let Some(player1_conn) = pending else {
            return Ok(map().set("status", "ok").set("game-status", "waiting").build());
        };

        let player1_uid = match auth.user_id_of(player1_conn) {
            Some(uid) => uid,
            None => {
                // The waiting connection disconnected between being queued
                // and being matched without going through its own disconnect
                // hook's waiting-slot cleanup. Notify it so it isn't left
                // hanging with no explanation, then fail this caller's
                // request too since there is no opponent to pair with.
                registry.push(
                    player1_conn,
                    CHANNEL_IN_GAME,
                    map()
                        .set("notification", "game-finished")
                        .set("detail", "server-error")
                        .build(),
                );
                return Err(Error::internal("waiting connection lost its authentication"));
            }
        };

        let pawn = Grid::from_shape(&pawn_row.shape, pawn_row.width, pawn_row.height);
        let board = Grid::from_shape(&board_row.shape, board_row.width, board_row.height);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let players = [
            PlayerSlot { conn: player1_conn, user_id: player1_uid },
            PlayerSlot { conn, user_id: my_uid },
        ];
        let mut rng = rand::thread_rng();
        let game = Game::new(id, players, &pawn, &board, &mut rng);

        let game_board_value = grid_to_value(&board);
        let game_pawn_value = grid_to_value(&pawn);
        let move_board_value = move_board_to_value(&game.move_board);

        info!(game_id = id, player1 = player1_uid, player2 = my_uid, "game started");

        registry.push(
            player1_conn,
            CHANNEL_GAME_FOUND,
            map()
                .set("notification", "opponent-found")
                .set("opponent-id", my_uid)
                .set("game-nr", id)
                .set("player-number", 1i64)
                .set("game-board", game_board_value.clone())
                .set("game-pawn", game_pawn_value.clone())
                .set("game-board-move", move_board_value.clone())
                .build(),
        );

        self.games.lock().unwrap().insert(id, game);

        Ok(map()
            .set("status", "ok")
            .set("game-status", "found")
            .set("opponent-id", player1_uid)
            .set("game-nr", id)
            .set("player-number", 2i64)
            .set("game-board", game_board_value)
            .set("game-pawn", game_pawn_value)
            .set("game-board-move", move_board_value)
            .build())
    }

    fn quit_searching(&self, conn: ConnId) -> Result<Value> {
        let mut waiting = self.waiting.lock().unwrap();
        if *waiting == Some(conn) {
            *waiting = None;
            Ok(map().set("status", "ok").build())
        } else {
            Err(Error::business(Code::NotSearching))
        }
    }

    /// Clears a disconnecting connection from the waiting slot, if present.
    pub fn on_disconnect(&self, conn: ConnId) {
        let mut waiting = self.waiting.lock().unwrap();
        if *waiting == Some(conn) {
            *waiting = None;
        }
    }

    fn required_fields(fields: &Value) -> Result<&std::collections::BTreeMap<String, Value>> {
        fields.as_map().ok_or_else(|| Error::protocol("fields must be a map"))
    }

    fn make_move(&self, conn: ConnId, registry: &Registry, fields: &Value) -> Result<Value> {
        let f = Self::required_fields(fields)?;
        let game_nr = f.get("game-nr").and_then(Value::as_int).ok_or_else(|| Error::business(Code::BadGameId))? as u64;
        let player_number = f.get("player-number").and_then(Value::as_int).ok_or_else(|| Error::business(Code::WrongMove))? as u8;
        let x = f.get("x").and_then(Value::as_int).ok_or_else(|| Error::business(Code::NoMove))? as usize;
        let y = f.get("y").and_then(Value::as_int).ok_or_else(|| Error::business(Code::NoMove))? as usize;
        let rotation = f.get("rotation").and_then(Value::as_int).ok_or_else(|| Error::business(Code::NoMove))? as usize;

        let mut games = self.games.lock().unwrap();
        let game = games.get_mut(&game_nr).ok_or_else(|| Error::business(Code::BadGameId))?;

        let slot = game.slot_index(conn).ok_or_else(|| Error::business(Code::NotYourGame))?;
        if slot as u8 + 1 != player_number {
            return Err(Error::business(Code::NotYourGame));
        }

        let outcome = game.apply_move(player_number, x, y, rotation)?;
        let move_board_value = move_board_to_value(&game.move_board);
        let opponent_conn = game.players[game.opponent_slot(player_number)].conn;
        let opponent_player_number = 3 - player_number;

        if outcome.finished {
            let winner = outcome.winner;
            let players = game.players;
            games.remove(&game_nr);
            drop(games);
            self.finish_game(registry, game_nr, players, winner, outcome.scores, &move_board_value, opponent_conn)?;
            Ok(map()
                .set("status", "ok")
                .set("game-status", "finished")
                .set("winner", winner as i64)
                .set("game_move_board", move_board_value)
                .set("player_points", vec![outcome.scores[0], outcome.scores[1]])
                .build())
        } else {
            registry.push(
                opponent_conn,
                CHANNEL_IN_GAME,
                map()
                    .set("notification", "your-new-turn")
                    .set("game-nr", game_nr)
                    .set("player-number", opponent_player_number as i64)
                    .set("game_move_board", move_board_value.clone())
                    .set("player_points", vec![outcome.scores[0], outcome.scores[1]])
                    .build(),
            );
            Ok(map()
                .set("status", "ok")
                .set("game-status", "opponents-turn")
                .set("game_move_board", move_board_value)
                .set("player_points", vec![outcome.scores[0], outcome.scores[1]])
                .build())
        }
    }

    fn finish_game(
        &self,
        registry: &Registry,
        game_nr: u64,
        players: [PlayerSlot; 2],
        winner: u8,
        scores: [i64; 2],
        move_board_value: &Value,
        opponent_conn: ConnId,
    ) -> Result<()> {
        self.persist_result_and_update_ratings(players, scores[0] as f64, scores[1] as f64, winner as i32)?;
        registry.push(
            opponent_conn,
            CHANNEL_IN_GAME,
            map()
                .set("notification", "game-finished")
                .set("detail", "no-more-moves")
                .set("game-nr", game_nr)
                .set("winner", winner as i64)
                .set("game_move_board", move_board_value.clone())
                .set("player_points", vec![scores[0], scores[1]])
                .build(),
        );
        Ok(())
    }

    fn abandon_game(&self, conn: ConnId, registry: &Registry, fields: &Value) -> Result<Value> {
        let f = Self::required_fields(fields)?;
        let game_nr = f.get("game-nr").and_then(Value::as_int).ok_or_else(|| Error::business(Code::BadGameId))? as u64;

        let mut games = self.games.lock().unwrap();
        let game = games.get(&game_nr).ok_or_else(|| Error::business(Code::BadGameId))?;
        let slot = game.slot_index(conn).ok_or_else(|| Error::business(Code::NotYourGame))?;
        let player_number = (slot + 1) as u8;
        let opponent_conn = game.players[game.opponent_slot(player_number)].conn;
        let players = game.players;
        games.remove(&game_nr);
        drop(games);

        // Pinned legacy quirk (see DESIGN.md): the abandoner is scored 0 and
        // the opponent 1, regardless of the in-progress board score.
        let winner = 3 - player_number;
        self.persist_abandon(players, player_number)
            .map_err(|_| Error::internal("failed to persist abandoned-game result"))?;

        registry.push(
            opponent_conn,
            CHANNEL_IN_GAME,
            map()
                .set("notification", "game-finished")
                .set("detail", "enemy-abandoned-game")
                .set("game-nr", game_nr)
                .set("winner", winner as i64)
                .build(),
        );

        Ok(map().set("status", "ok").set("game-result", "defeated").set("detail", "game-abandoned").build())
    }

    /// Separated so the (player_number-dependent) 0/1 scores reach the
    /// abandoner's own slot correctly regardless of which slot abandoned.
    fn persist_abandon(&self, players: [PlayerSlot; 2], abandoner: u8) -> Result<()> {
        let (points1, points2) = if abandoner == 1 { (0.0, 1.0) } else { (1.0, 0.0) };
        let winner = if abandoner == 1 { 2 } else { 1 };
        self.persist_result_and_update_ratings(players, points1, points2, winner)
    }

    fn persist_result_and_update_ratings(
        &self,
        players: [PlayerSlot; 2],
        points1: f64,
        points2: f64,
        winner: i32,
    ) -> Result<()> {
        self.store.insert_result(players[0].user_id, points1, players[1].user_id, points2, winner)?;
        if points1 + points2 > 0.0 {
            let d1 = rating_delta(points1, points2);
            let d2 = rating_delta(points2, points1);
            if let Some(u1) = self.store.find_user_by_id(players[0].user_id)? {
                self.store.update_user_rating(players[0].user_id, u1.rating + d1)?;
            }
            if let Some(u2) = self.store.find_user_by_id(players[1].user_id)? {
                self.store.update_user_rating(players[1].user_id, u2.rating + d2)?;
            }
        }
        Ok(())
    }

    /// Implicit abandon for every game a disconnecting connection still
    /// occupies a slot in (§4.7.7).
    pub fn on_player_disconnect(&self, conn: ConnId, registry: &Registry) {
        let affected: Vec<u64> = {
            let games = self.games.lock().unwrap();
            games
                .iter()
                .filter(|(_, g)| g.slot_index(conn).is_some())
                .map(|(id, _)| *id)
                .collect()
        };
        for game_nr in affected {
            let fields = map().set("game-nr", game_nr).build();
            let _ = self.abandon_game(conn, registry, &fields);
        }
    }
}

fn grid_to_value(grid: &Grid) -> Value {
    let mut rows = Vec::with_capacity(grid.height);
    for y in 0..grid.height {
        let mut row = Vec::with_capacity(grid.width);
        for x in 0..grid.width {
            row.push(Value::Bool(grid.cells[y][x]));
        }
        rows.push(Value::List(row));
    }
    Value::List(rows)
}

fn move_board_to_value(board: &[Vec<i32>]) -> Value {
    let rows: Vec<Value> = board
        .iter()
        .map(|row| Value::List(row.iter().map(|&c| Value::Int(c as i64)).collect()))
        .collect();
    Value::List(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Registry;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn setup_with_pawn_and_board() -> (GameManager, AuthManager, Registry, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.insert_pawn("domino", 2, 1, "11").unwrap();
        store.insert_board("square", 2, 2, "1111").unwrap();
        let auth = AuthManager::new(store.clone());
        let manager = GameManager::new(store.clone());
        let registry = Registry::default();
        (manager, auth, registry, store)
    }

    fn sign_in(auth: &AuthManager, store: &Store, conn: ConnId, name: &str) {
        store.insert_user(name, "pw").unwrap();
        let fields = map().set("username", name).set("password", "pw").build();
        auth.handle(conn, "sign-in", &fields).unwrap();
    }

    #[test]
    fn second_seeker_is_matched_with_first() {
        let (manager, auth, registry, store) = setup_with_pawn_and_board();
        sign_in(&auth, &store, 1, "a");
        sign_in(&auth, &store, 2, "b");
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        registry.register(1, tx1);

        let resp1 = manager.find_random_game(1, &auth, &registry).unwrap();
        assert_eq!(resp1.as_map().unwrap().get("game-status").unwrap().as_str(), Some("waiting"));

        let resp2 = manager.find_random_game(2, &auth, &registry).unwrap();
        assert_eq!(resp2.as_map().unwrap().get("game-status").unwrap().as_str(), Some("found"));
        assert_eq!(resp2.as_map().unwrap().get("player-number").unwrap().as_int(), Some(2));

        let pushed = rx1.try_recv().unwrap();
        assert!(!pushed.is_empty());
    }

    #[test]
    fn quit_searching_clears_slot() {
        let (manager, auth, registry, store) = setup_with_pawn_and_board();
        sign_in(&auth, &store, 1, "a");
        manager.find_random_game(1, &auth, &registry).unwrap();
        manager.quit_searching(1).unwrap();
        let err = manager.quit_searching(1).unwrap_err();
        match err {
            Error::Business(b) => assert_eq!(b.0, Code::NotSearching),
            _ => panic!("expected business error"),
        }
    }

    #[test]
    fn abandon_scores_zero_one_regardless_of_board_state() {
        let (manager, auth, registry, store) = setup_with_pawn_and_board();
        sign_in(&auth, &store, 1, "a");
        sign_in(&auth, &store, 2, "b");
        manager.find_random_game(1, &auth, &registry).unwrap();
        manager.find_random_game(2, &auth, &registry).unwrap();

        let game_nr = {
            let games = manager.games.lock().unwrap();
            *games.keys().next().unwrap()
        };

        let fields = map().set("game-nr", game_nr as i64).build();
        let resp = manager.abandon_game(1, &registry, &fields).unwrap();
        assert_eq!(resp.as_map().unwrap().get("game-result").unwrap().as_str(), Some("defeated"));

        let a = store.find_user_by_name("a").unwrap().unwrap();
        let b = store.find_user_by_name("b").unwrap().unwrap();
        assert!(b.rating > a.rating);
    }
}
