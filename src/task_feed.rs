use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use futures::stream::{self, Stream};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::models::{Identity, TaskChange};
use crate::task_service::TaskService;
use crate::visibility::{FeedEvent, ViewState};

const RESYNC_RETRY: Duration = Duration::from_secs(1);

#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub session_id: Uuid,
    pub identity: Option<Identity>,
    pub addr: Recipient<FeedEvent>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe {
    pub session_id: Uuid,
}

/// The session logged in or out; its visible set must follow.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Reidentify {
    pub session_id: Uuid,
    pub identity: Option<Identity>,
}

pub enum FeedSignal {
    Change(TaskChange),
    Lagged(u64),
}

fn change_stream(rx: broadcast::Receiver<TaskChange>) -> impl Stream<Item = FeedSignal> {
    stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(change) => Some((FeedSignal::Change(change), rx)),
            Err(RecvError::Lagged(missed)) => Some((FeedSignal::Lagged(missed), rx)),
            Err(RecvError::Closed) => None,
        }
    })
}

struct Subscriber {
    identity: Option<Identity>,
    addr: Recipient<FeedEvent>,
    view: ViewState,
}

/// The "tasks" subscription: fans store changes out to every session,
/// filtered through each session's own view.
pub struct TaskFeed {
    service: Arc<TaskService>,
    subscribers: HashMap<Uuid, Subscriber>,
}

impl TaskFeed {
    pub fn new(service: Arc<TaskService>) -> Self {
        TaskFeed {
            service,
            subscribers: HashMap::new(),
        }
    }

    fn resync(&mut self, session_id: Uuid, ctx: &mut Context<Self>) {
        let Some(sub) = self.subscribers.get_mut(&session_id) else {
            return;
        };
        let generation = sub.view.begin_resync();
        let identity = sub.identity.clone();
        let service = self.service.clone();

        let fut = async move { service.list_visible(identity.as_ref(), false).await }
            .into_actor(self)
            .map(move |res, act, ctx| {
                let Some(sub) = act.subscribers.get_mut(&session_id) else {
                    return;
                };
                match res {
                    Ok(snapshot) => {
                        if let Some(events) = sub.view.finish_resync(generation, snapshot) {
                            for event in events {
                                sub.addr.do_send(event);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Snapshot for session {} failed: {}", session_id, e);
                        ctx.run_later(RESYNC_RETRY, move |act, ctx| act.resync(session_id, ctx));
                    }
                }
            });
        ctx.spawn(fut);
    }
}

impl Actor for TaskFeed {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.add_stream(change_stream(self.service.subscribe()));
        info!("Task feed started");
    }
}

impl StreamHandler<FeedSignal> for TaskFeed {
    fn handle(&mut self, signal: FeedSignal, ctx: &mut Context<Self>) {
        match signal {
            FeedSignal::Change(change) => {
                debug!("Fanning out change to task {}", change.task_id());
                for sub in self.subscribers.values_mut() {
                    if let Some(event) = sub.view.apply(&change) {
                        sub.addr.do_send(event);
                    }
                }
            }
            FeedSignal::Lagged(missed) => {
                warn!("Task feed lagged by {} changes; resyncing all sessions", missed);
                let ids: Vec<Uuid> = self.subscribers.keys().copied().collect();
                for id in ids {
                    self.resync(id, ctx);
                }
            }
        }
    }

    fn finished(&mut self, _ctx: &mut Context<Self>) {
        warn!("Task change stream closed");
    }
}

impl Handler<Subscribe> for TaskFeed {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, ctx: &mut Context<Self>) {
        info!(
            "Session {} subscribed as {}",
            msg.session_id,
            msg.identity.as_ref().map_or("anonymous", |i| i.id.as_str())
        );
        let user_id = msg.identity.as_ref().map(|i| i.id.clone());
        self.subscribers.insert(
            msg.session_id,
            Subscriber {
                identity: msg.identity,
                addr: msg.addr,
                view: ViewState::new(user_id),
            },
        );
        self.resync(msg.session_id, ctx);
    }
}

impl Handler<Unsubscribe> for TaskFeed {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Context<Self>) {
        if let Some(sub) = self.subscribers.remove(&msg.session_id) {
            info!(
                "Session {} unsubscribed with {} tasks in view",
                msg.session_id,
                sub.view.sent_len()
            );
        }
    }
}

impl Handler<Reidentify> for TaskFeed {
    type Result = ();

    fn handle(&mut self, msg: Reidentify, ctx: &mut Context<Self>) {
        let Some(sub) = self.subscribers.get_mut(&msg.session_id) else {
            return;
        };
        sub.view.set_user_id(msg.identity.as_ref().map(|i| i.id.clone()));
        sub.identity = msg.identity;
        self.resync(msg.session_id, ctx);
    }
}
