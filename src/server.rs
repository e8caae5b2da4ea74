//! WebSocket session plumbing and HTTP route assembly.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::http::Uri;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::coordinator::Coordinator;
use crate::error::ChatError;
use crate::messages::ClientEnvelope;

/// Pages a banned visitor is redirected to; they must stay reachable.
pub const BAN_PAGES: [&str; 2] = ["banned.html", "why-was-i-banned.html"];

#[derive(Debug)]
struct BannedVisitor;

impl warp::reject::Reject for BannedVisitor {}

/// Runs one client connection until the socket closes, then releases
/// everything it held.
pub async fn handle_connection(coordinator: Arc<Coordinator>, ws: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    coordinator.attach(&connection_id, tx).await;
    info!("Connection {connection_id} opened");

    let writer_id = connection_id.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                error!("Failed to send WebSocket message to {writer_id}: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                error!("WebSocket error on {connection_id}: {e}");
                break;
            }
        };
        if message.is_close() {
            break;
        }
        // Pings, pongs and binary frames carry no intents.
        let Ok(text) = message.to_str() else {
            continue;
        };

        match serde_json::from_str::<ClientEnvelope>(text) {
            Ok(envelope) => coordinator.handle(&connection_id, envelope).await,
            Err(e) => {
                debug!("Malformed frame from {connection_id}: {e}");
                coordinator
                    .reject(
                        &connection_id,
                        None,
                        &ChatError::validation("Malformed message"),
                    )
                    .await;
            }
        }
    }

    coordinator.detach(&connection_id).await;
    info!("Connection {connection_id} closed");
}

pub fn routes(
    coordinator: Arc<Coordinator>,
    public_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_coordinator = coordinator.clone();
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let coordinator = ws_coordinator.clone();
            ws.on_upgrade(move |socket| handle_connection(coordinator, socket))
        });

    let ban_pages = warp::path(BAN_PAGES[0])
        .and(warp::path::end())
        .and(warp::fs::file(public_dir.join(BAN_PAGES[0])))
        .or(warp::path(BAN_PAGES[1])
            .and(warp::path::end())
            .and(warp::fs::file(public_dir.join(BAN_PAGES[1]))));

    let static_files = ban_gate(coordinator).and(warp::fs::dir(public_dir));

    ws_route
        .or(ban_pages)
        .or(static_files)
        .recover(redirect_banned)
        .with(warp::cors().allow_any_origin())
}

/// Rejects requests whose `userId` cookie names a currently banned user.
fn ban_gate(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::cookie::optional::<String>("userId")
        .and(with_coordinator(coordinator))
        .and_then(
            |user_id: Option<String>, coordinator: Arc<Coordinator>| async move {
                match user_id {
                    Some(user_id) if coordinator.is_banned(&user_id).await => {
                        info!("Redirecting banned user {user_id}");
                        Err(warp::reject::custom(BannedVisitor))
                    }
                    _ => Ok(()),
                }
            },
        )
        .untuple_one()
}

fn with_coordinator(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = (Arc<Coordinator>,), Error = Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}

async fn redirect_banned(err: Rejection) -> Result<impl Reply, Rejection> {
    if err.find::<BannedVisitor>().is_some() {
        return Ok(warp::redirect::temporary(Uri::from_static("/banned.html")));
    }
    Err(err)
}
