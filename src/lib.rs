//! Server-side protocol stack and game arbitration engine for the
//! territorial two-player board game.
//!
//! The crate is organized around the path a byte takes: raw TCP bytes are
//! framed ([`framing`]) into self-describing values ([`value`]), gated by a
//! one-time handshake ([`handshake`]), demultiplexed per-connection
//! ([`connection`], [`mux`]) to one of three modules: identity ([`auth`]),
//! status broadcast ([`presence`]), and matchmaking/gameplay ([`game`]).
//! [`persistence`] is the storage port behind auth and game results;
//! [`config`] loads startup configuration; [`error`] is the shared error
//! taxonomy; [`server`] wires everything into the accept loop.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod game;
pub mod handshake;
pub mod mux;
pub mod persistence;
pub mod presence;
pub mod server;
pub mod value;

pub use error::{Error, Result};
