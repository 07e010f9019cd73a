use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpMessage, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::models::Identity;
use crate::task_feed::{Reidentify, Subscribe, TaskFeed, Unsubscribe};
use crate::visibility::FeedEvent;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages a client may send on the subscription socket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "lowercase")]
enum IncomingMessage {
    Login { token: String },
    Logout,
}

/// One websocket client of the "tasks" subscription.
pub struct WebSocketConnection {
    pub id: Uuid,
    pub hb: Instant,
    pub feed: Addr<TaskFeed>,
    pub identity: Option<Identity>,
    jwt_secret: String,
}

impl WebSocketConnection {
    pub fn new(feed: Addr<TaskFeed>, identity: Option<Identity>, jwt_secret: String) -> Self {
        WebSocketConnection {
            id: Uuid::new_v4(),
            hb: Instant::now(),
            feed,
            identity,
            jwt_secret,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("WebSocket client {} heartbeat failed, disconnecting", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_error(ctx: &mut ws::WebsocketContext<Self>, kind: &str, message: String) {
        let body = serde_json::json!({ "msg": "error", "error": kind, "message": message });
        ctx.text(body.to_string());
    }

    fn reidentify(&mut self, identity: Option<Identity>) {
        self.identity = identity.clone();
        self.feed.do_send(Reidentify { session_id: self.id, identity });
    }

    fn handle_incoming(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(IncomingMessage::Login { token }) => match validate_jwt(&token, &self.jwt_secret) {
                Ok(identity) => {
                    info!("Session {} logged in as {}", self.id, identity.id);
                    self.reidentify(Some(identity));
                }
                Err(e) => Self::send_error(ctx, "unauthenticated", format!("Invalid token: {}", e)),
            },
            Ok(IncomingMessage::Logout) => {
                info!("Session {} logged out", self.id);
                self.reidentify(None);
            }
            Err(e) => {
                debug!("Unparseable message on session {}: {}", self.id, e);
                Self::send_error(ctx, "bad-request", format!("Failed to parse message: {}", e));
            }
        }
    }
}

impl Actor for WebSocketConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let addr = ctx.address();
        self.feed
            .send(Subscribe {
                session_id: self.id,
                identity: self.identity.clone(),
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                if res.is_err() {
                    warn!("Session {} failed to register with the task feed", act.id);
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.feed.do_send(Unsubscribe { session_id: self.id });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_incoming(&text, ctx);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error on session {}: {}", self.id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<FeedEvent> for WebSocketConnection {
    type Result = ();

    fn handle(&mut self, msg: FeedEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(&msg) {
            Ok(outgoing) => ctx.text(outgoing),
            Err(e) => warn!("Failed to encode feed event for session {}: {}", self.id, e),
        }
    }
}

/// GET /ws — open the "tasks" subscription as the request's identity.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let identity = req.extensions().get::<Identity>().cloned();
    let session = WebSocketConnection::new(
        data.feed.clone(),
        identity,
        data.config.jwt_secret.clone(),
    );
    ws::start(session, &req, stream)
}
