//! Repository over a single sqlite file: users, boards, pawns, and match
//! results. Tables are created on first start; there is no migration
//! system since the schema has never shipped a second version.
//!
//! Field layout mirrors the legacy relational schema (`User`, `GameBoard`,
//! `GamePawn`, `GameResult`) so that an operator migrating an existing
//! database file needs no data transformation.

use std::sync::Mutex;

use rand::seq::SliceRandom;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Plaintext password storage, matching the legacy system. This is a known
/// weakness carried over deliberately rather than introduced; a future
/// protocol version should switch to a salted hash.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub password: String,
    pub rating: f64,
}

#[derive(Debug, Clone)]
pub struct Pawn {
    pub id: i64,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub shape: String,
}

#[derive(Debug, Clone)]
pub struct Board {
    pub id: i64,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub shape: String,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(config: &DatabaseConfig) -> Result<Store> {
        let conn = Connection::open(&config.file)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS user (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                name     TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                rating   REAL NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS game_pawn (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                name   TEXT NOT NULL UNIQUE,
                width  INTEGER NOT NULL,
                height INTEGER NOT NULL,
                shape  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS game_board (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                name   TEXT NOT NULL UNIQUE,
                width  INTEGER NOT NULL,
                height INTEGER NOT NULL,
                shape  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS game_result (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                player1  INTEGER NOT NULL REFERENCES user(id),
                points1  REAL NOT NULL,
                player2  INTEGER NOT NULL REFERENCES user(id),
                points2  REAL NOT NULL,
                winner   INTEGER NOT NULL
            );
            ",
        )?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests; same schema, no file on disk.
    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            CREATE TABLE user (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                name     TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                rating   REAL NOT NULL DEFAULT 0
            );
            CREATE TABLE game_pawn (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                name   TEXT NOT NULL UNIQUE,
                width  INTEGER NOT NULL,
                height INTEGER NOT NULL,
                shape  TEXT NOT NULL
            );
            CREATE TABLE game_board (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                name   TEXT NOT NULL UNIQUE,
                width  INTEGER NOT NULL,
                height INTEGER NOT NULL,
                shape  TEXT NOT NULL
            );
            CREATE TABLE game_result (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                player1  INTEGER NOT NULL REFERENCES user(id),
                points1  REAL NOT NULL,
                player2  INTEGER NOT NULL REFERENCES user(id),
                points2  REAL NOT NULL,
                winner   INTEGER NOT NULL
            );
            ",
        )?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    pub fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, name, password, rating FROM user WHERE name = ?1",
                params![name],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, name, password, rating FROM user WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn insert_user(&self, name: &str, password: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user (name, password, rating) VALUES (?1, ?2, 0)",
            params![name, password],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_user_rating(&self, id: i64, rating: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE user SET rating = ?1 WHERE id = ?2", params![rating, id])?;
        Ok(())
    }

    pub fn list_users_ordered_by_rating_desc(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, password, rating FROM user ORDER BY rating DESC")?;
        let rows = stmt.query_map([], row_to_user)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn user_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM user", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn insert_pawn(&self, name: &str, width: u32, height: u32, shape: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO game_pawn (name, width, height, shape) VALUES (?1, ?2, ?3, ?4)",
            params![name, width, height, shape],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_board(&self, name: &str, width: u32, height: u32, shape: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO game_board (name, width, height, shape) VALUES (?1, ?2, ?3, ?4)",
            params![name, width, height, shape],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_pawns(&self) -> Result<Vec<Pawn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, width, height, shape FROM game_pawn")?;
        let rows = stmt.query_map([], row_to_pawn)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_boards(&self) -> Result<Vec<Board>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, width, height, shape FROM game_board")?;
        let rows = stmt.query_map([], row_to_board)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn random_pawn(&self) -> Result<Option<Pawn>> {
        let pawns = self.list_pawns()?;
        Ok(pawns.choose(&mut rand::thread_rng()).cloned())
    }

    pub fn random_board(&self) -> Result<Option<Board>> {
        let boards = self.list_boards()?;
        Ok(boards.choose(&mut rand::thread_rng()).cloned())
    }

    pub fn insert_result(&self, player1: i64, points1: f64, player2: i64, points2: f64, winner: i32) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO game_result (player1, points1, player2, points2, winner) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![player1, points1, player2, points2, winner],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        password: row.get(2)?,
        rating: row.get(3)?,
    })
}

fn row_to_pawn(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pawn> {
    Ok(Pawn {
        id: row.get(0)?,
        name: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        shape: row.get(4)?,
    })
}

fn row_to_board(row: &rusqlite::Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        name: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        shape: row.get(4)?,
    })
}
