use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use petpal_db::DocPath;
use petpal_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{Dispatcher, Subscription, SubscriptionEvent};
use crate::session::{AuthSession, Identity};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Collections whose documents are readable only by the uid they are keyed by.
const PRIVATE_COLLECTIONS: &[&str] = &["notifications"];

/// Serve one WebSocket client. Clients may subscribe to public paths right
/// away and `Identify` at any point to unlock their private paths.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (sender, receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(send_loop(sender, out_rx, pong_received.clone()));
    let mut recv_task = tokio::spawn(recv_loop(receiver, dispatcher, jwt_secret, out_tx, pong_received));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Gateway connection closed");
}

async fn send_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            event = out_rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode gateway event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn recv_loop(
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    jwt_secret: String,
    out_tx: mpsc::UnboundedSender<GatewayEvent>,
    pong_received: Arc<AtomicBool>,
) {
    let session = AuthSession::new();
    // Dropped with this future, which releases every subscription of the connection
    let mut forwarders = Forwarders::default();

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(cmd) => {
                    handle_command(cmd, &dispatcher, &jwt_secret, &session, &mut forwarders, &out_tx);
                }
                Err(e) => {
                    let raw: String = text.chars().take(200).collect();
                    warn!("Bad gateway command: {} -- raw: {}", e, raw);
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.sign_out();
}

fn handle_command(
    cmd: GatewayCommand,
    dispatcher: &Dispatcher,
    jwt_secret: &str,
    session: &AuthSession,
    forwarders: &mut Forwarders,
    out: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { token } => match session.sign_in_with_token(&token, jwt_secret) {
            Ok(identity) => {
                info!("{} ({}) identified on gateway", identity.handle, identity.uid);
                let _ = out.send(GatewayEvent::Ready {
                    uid: identity.uid,
                    handle: identity.handle,
                });
            }
            Err(e) => {
                warn!("Gateway identify failed: {}", e);
                let _ = out.send(GatewayEvent::Error {
                    message: "invalid token".into(),
                });
            }
        },

        GatewayCommand::Subscribe { path } => {
            let path = match DocPath::parse(&path) {
                Ok(path) => path,
                Err(e) => {
                    let _ = out.send(GatewayEvent::Error { message: e.to_string() });
                    return;
                }
            };

            let owner = match access_for(&path, session.current().as_ref()) {
                Access::Public => None,
                Access::Owner(uid) => {
                    let mut rx = session.on_auth_state_change();
                    rx.borrow_and_update();
                    Some((uid, rx))
                }
                Access::Denied => {
                    let _ = out.send(GatewayEvent::Error {
                        message: format!("not allowed to subscribe to {}", path),
                    });
                    return;
                }
            };

            let key = path.to_string();
            let sub = dispatcher.subscribe(path);
            forwarders.insert(key, tokio::spawn(forward(sub, out.clone(), owner)));
        }

        GatewayCommand::Unsubscribe { path } => {
            let key = DocPath::parse(&path).map(|p| p.to_string()).unwrap_or(path);
            if !forwarders.remove(&key) {
                debug!("Unsubscribe for unknown path {}", key);
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Access {
    Public,
    /// Readable while the session stays signed in as this uid
    Owner(String),
    Denied,
}

fn access_for(path: &DocPath, identity: Option<&Identity>) -> Access {
    if !PRIVATE_COLLECTIONS.contains(&path.collection()) {
        return Access::Public;
    }
    match (path.doc_id(), identity) {
        (Some(owner), Some(identity)) if owner == identity.uid => Access::Owner(identity.uid.clone()),
        _ => Access::Denied,
    }
}

/// Relay one subscription to the client until it fails, the client
/// unsubscribes, or (for private paths) the session stops being its owner.
async fn forward(
    mut sub: Subscription,
    out: mpsc::UnboundedSender<GatewayEvent>,
    mut owner: Option<(String, watch::Receiver<Option<Identity>>)>,
) {
    loop {
        tokio::select! {
            event = sub.next() => {
                let event = match event {
                    Some(SubscriptionEvent::Snapshot(s)) => GatewayEvent::Snapshot {
                        path: s.path.to_string(),
                        seq: s.seq,
                        value: s.value,
                    },
                    Some(SubscriptionEvent::Failed { path, message }) => {
                        let _ = out.send(GatewayEvent::SubscriptionFailed {
                            path: path.to_string(),
                            message,
                        });
                        break;
                    }
                    None => break,
                };
                if out.send(event).is_err() {
                    break;
                }
            }
            _ = owner_lost(&mut owner) => {
                let _ = out.send(GatewayEvent::SubscriptionFailed {
                    path: sub.path().to_string(),
                    message: "signed-in user changed".into(),
                });
                break;
            }
        }
    }

    sub.unsubscribe();
}

async fn owner_lost(owner: &mut Option<(String, watch::Receiver<Option<Identity>>)>) {
    let Some((uid, rx)) = owner else {
        return std::future::pending().await;
    };

    loop {
        if rx.changed().await.is_err() {
            return;
        }
        if rx.borrow_and_update().as_ref().map(|i| &i.uid) != Some(uid) {
            return;
        }
    }
}

/// Forwarding tasks by subscribed path. Aborting a task drops its
/// `Subscription`, which releases it.
#[derive(Default)]
struct Forwarders {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl Forwarders {
    fn insert(&mut self, key: String, task: JoinHandle<()>) {
        if let Some(old) = self.tasks.insert(key, task) {
            old.abort();
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.tasks.remove(key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> Identity {
        Identity {
            uid: "u1".into(),
            handle: "@ana".into(),
        }
    }

    #[test]
    fn test_public_paths_need_no_identity() {
        let path = DocPath::parse("posts").unwrap();
        assert_eq!(access_for(&path, None), Access::Public);
    }

    #[test]
    fn test_notifications_only_for_owner() {
        let own = DocPath::parse("notifications/u1").unwrap();
        let other = DocPath::parse("notifications/u2").unwrap();
        let all = DocPath::parse("notifications").unwrap();

        assert_eq!(access_for(&own, Some(&ana())), Access::Owner("u1".into()));
        assert_eq!(access_for(&own, None), Access::Denied);
        assert_eq!(access_for(&other, Some(&ana())), Access::Denied);
        assert_eq!(access_for(&all, Some(&ana())), Access::Denied);
    }

    #[tokio::test]
    async fn test_owner_lost_on_sign_out_only() {
        let session = AuthSession::new();
        session.sign_in(ana());
        let mut rx = session.on_auth_state_change();
        rx.borrow_and_update();
        let mut owner = Some(("u1".to_string(), rx));

        // Re-identifying as the same user keeps the subscription
        session.sign_in(ana());
        let still = tokio::time::timeout(Duration::from_millis(50), owner_lost(&mut owner)).await;
        assert!(still.is_err());

        session.sign_out();
        tokio::time::timeout(Duration::from_secs(1), owner_lost(&mut owner))
            .await
            .expect("sign-out should end ownership");
    }
}
