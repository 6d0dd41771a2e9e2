use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::Message;
use confab_api::{Action, FeedMessage, Uuid};
use futures::{channel::mpsc, select, SinkExt, StreamExt};
use tokio::sync::RwLock;

/// All the live websockets, keyed by a per-socket id.
///
/// Threads are public, so every socket gets every action and there is no
/// per-user interest filtering to do here.
#[derive(Clone, Debug)]
pub struct LiveFeeds(Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<FeedMessage>>>>);

impl LiveFeeds {
    pub fn new() -> LiveFeeds {
        LiveFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn add_socket<W, R>(self, mut write: W, read: R)
    where
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
    {
        // Note: if this channel were bounded, there would be a deadlock between
        // the write-lock to remove a socket and the read-lock to relay to all of them
        let (sender, mut receiver) = mpsc::unbounded();
        let sender_id = Uuid::new_v4();

        self.0.write().await.insert(sender_id, sender);

        // Relayer queue: forward actions to the socket, answer pings, and
        // drop out of the map as soon as either side goes away
        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            macro_rules! remove_self {
                () => {{
                    this.0.write().await.remove(&sender_id);
                    return;
                }};
            }
            macro_rules! send_message {
                ( $msg:expr ) => {{
                    let msg: FeedMessage = $msg;
                    let json = match serde_json::to_vec(&msg) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(?err, ?msg, "failed serializing message to json");
                            continue;
                        }
                    };
                    if let Err(_) = write.send(Message::Binary(json)).await {
                        remove_self!();
                    }
                }};
            }
            loop {
                select! {
                    msg = receiver.next() => match msg {
                        None => remove_self!(),
                        Some(msg) => send_message!(msg),
                    },
                    msg = read.next() => match msg {
                        None => remove_self!(),
                        Some(Ok(Message::Close(_))) => remove_self!(),
                        Some(Ok(Message::Text(msg))) => {
                            if msg != "ping" {
                                tracing::warn!("received unexpected message from client: {msg:?}");
                                remove_self!();
                            }
                            send_message!(FeedMessage::Pong);
                        }
                        Some(msg) => {
                            tracing::warn!("received unexpected message from client: {msg:?}");
                            remove_self!();
                        }
                    },
                }
            }
        });
    }

    pub async fn relay_action(&self, a: Action) {
        for s in self.0.read().await.values() {
            let _ = s.unbounded_send(FeedMessage::Action(a.clone()));
        }
    }
}

impl Default for LiveFeeds {
    fn default() -> LiveFeeds {
        LiveFeeds::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_api::{Post, PostId, UserId};

    fn parse_feed_message(msg: Message) -> FeedMessage {
        match msg {
            Message::Binary(b) => serde_json::from_slice(&b).expect("parsing feed message"),
            _ => panic!("feed sent a non-binary message: {msg:?}"),
        }
    }

    #[tokio::test]
    async fn ping_pong_and_relay() {
        let feeds = LiveFeeds::new();
        let (write, mut socket_rx) = mpsc::unbounded();
        let (mut socket_tx, read) = mpsc::unbounded();
        feeds.clone().add_socket(write, read).await;

        socket_tx
            .send(Ok(Message::Text(String::from("ping"))))
            .await
            .expect("sending ping");
        match parse_feed_message(socket_rx.next().await.expect("socket closed")) {
            FeedMessage::Pong => (),
            msg => panic!("expected pong, got {msg:?}"),
        }

        let action = Action::NewPost(Post {
            id: PostId::stub(),
            author_id: UserId::stub(),
            date: chrono::Utc::now(),
            title: String::from("hello"),
        });
        feeds.relay_action(action.clone()).await;
        match parse_feed_message(socket_rx.next().await.expect("socket closed")) {
            FeedMessage::Action(a) => assert_eq!(format!("{a:?}"), format!("{action:?}")),
            msg => panic!("expected the relayed action, got {msg:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_disconnects_the_socket() {
        let feeds = LiveFeeds::new();
        let (write, mut socket_rx) = mpsc::unbounded();
        let (mut socket_tx, read) = mpsc::unbounded();
        feeds.clone().add_socket(write, read).await;

        socket_tx
            .send(Ok(Message::Text(String::from("definitely not a ping"))))
            .await
            .expect("sending garbage");
        assert!(socket_rx.next().await.is_none());
    }
}
