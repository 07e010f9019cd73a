use crate::config::Config;
use crate::store::UserStore;
use crate::task_feed::TaskFeed;
use crate::task_service::TaskService;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<TaskService>,
    pub users: Arc<dyn UserStore>,
    pub feed: Addr<TaskFeed>,
    pub config: Config,
}
