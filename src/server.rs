//! The accept loop and per-connection task: handshake, then pump frames
//! through the mux, with a private outbound channel so mux-triggered
//! notifications can be written from outside the connection's own task
//! without ever touching the socket from two places at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::connection::{next_conn_id, ConnId};
use crate::error::{Error, Result};
use crate::framing::read_frame;
use crate::handshake::perform_server_side;
use crate::mux::Mux;

pub const PROTOCOL_VERSION: u32 = 1;

/// Default for `-g`/`--max-games` when unset: effectively unbounded, limited
/// only by memory, per SPEC_FULL.md §6.
pub const DEFAULT_MAX_GAMES: usize = 1_000_000;

pub struct Server {
    mux: Arc<Mux>,
    shutdown: Arc<AtomicBool>,
    slots: Arc<Semaphore>,
}

impl Server {
    pub fn new(mux: Arc<Mux>, max_games: usize) -> Self {
        Server {
            mux,
            shutdown: Arc::new(AtomicBool::new(false)),
            slots: Arc::new(Semaphore::new(max_games.max(1))),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        info!(bind_addr, "listening");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Acquire a game slot before accepting; when every slot is
            // occupied this pauses here, naturally back-pressuring new
            // connections rather than accepting them unbounded.
            let permit = match tokio::time::timeout(Duration::from_millis(100), Arc::clone(&self.slots).acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => break, // semaphore closed
                Err(_) => continue,  // timed out waiting for a free slot; re-check shutdown
            };

            let accept = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
            let (socket, peer) = match accept {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!(error = %e, "accept error");
                    drop(permit);
                    continue;
                }
                Err(_) => {
                    drop(permit);
                    continue; // timed out; loop back and re-check shutdown
                }
            };
            info!(%peer, "connection accepted");
            let mux = self.mux.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_connection(socket, mux, shutdown).await {
                    warn!(error = %e, "connection ended with error");
                }
            });
        }

        // Cooperative shutdown: best-effort notify every still-registered
        // connection, then let their tasks drain and exit.
        for conn in self.mux.registry.all_ids() {
            self.mux.registry.push(
                conn,
                15,
                crate::value::map().set("notification", "game-finished").set("detail", "server-shutdown").build(),
            );
        }
        Ok(())
    }
}

async fn handle_connection(socket: TcpStream, mux: Arc<Mux>, _shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut socket = socket;
    let accepted = perform_server_side(&mut socket, |v| v == PROTOCOL_VERSION).await?;
    if !accepted {
        warn!("handshake rejected");
        return Ok(());
    }

    let conn_id: ConnId = next_conn_id();
    let (mut reader, mut writer) = split(socket);
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    mux.registry.register(conn_id, tx);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(payload)) => match dispatch_off_thread(mux.clone(), conn_id, payload).await {
                Ok(response) => {
                    if mux.registry.send_raw(conn_id, response).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, conn_id, "fatal protocol error, closing connection");
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, conn_id, "read error, closing connection");
                break;
            }
        }
    }

    disconnect_off_thread(mux, conn_id).await;
    writer_task.abort();
    Ok(())
}

/// Runs `Mux::dispatch` on the blocking-task pool. Dispatch holds the
/// business-logic mutexes and, through them, makes synchronous rusqlite
/// calls; running it on the async task would stall every other connection's
/// event loop for the duration of a slow store call.
async fn dispatch_off_thread(mux: Arc<Mux>, conn_id: ConnId, payload: Vec<u8>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || mux.dispatch(conn_id, &payload))
        .await
        .map_err(|e| Error::internal(format!("dispatch task panicked: {e}")))?
}

/// Same off-loading as `dispatch_off_thread`: the disconnect hook persists
/// abandoned games and updates ratings, all synchronous store calls.
async fn disconnect_off_thread(mux: Arc<Mux>, conn_id: ConnId) {
    let result = tokio::task::spawn_blocking(move || mux.on_disconnect(conn_id)).await;
    if let Err(e) = result {
        error!(error = %e, conn_id, "disconnect hook task panicked");
    }
}
