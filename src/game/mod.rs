//! Matchmaking and the territorial board game: pawn/board materialization,
//! the reachability pruner, move validation and scoring, abandonment, and
//! the ranking-update formula.

pub mod engine;
pub mod manager;
pub mod reachability;
pub mod shapes;

pub use engine::{Game, MoveOutcome, PlayerSlot};
pub use manager::GameManager;
