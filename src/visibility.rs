//! Read-side filtering: which tasks an identity may see, and the per-subscriber
//! view state that turns store changes into feed deltas.

use std::collections::HashMap;

use mongodb::bson::{doc, Document};
use serde::Serialize;

use crate::models::{Task, TaskChange};

/// A predicate over tasks, evaluable in memory or rendered as a MongoDB query.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFilter {
    All,
    /// Not private, or owned by the given user. `None` is anonymous.
    VisibleTo(Option<String>),
    Incomplete,
    And(Vec<TaskFilter>),
}

impl TaskFilter {
    pub fn visible_to(user_id: Option<&str>) -> Self {
        TaskFilter::VisibleTo(user_id.map(str::to_string))
    }

    pub fn and(self, other: TaskFilter) -> Self {
        match self {
            TaskFilter::All => other,
            TaskFilter::And(mut parts) => {
                parts.push(other);
                TaskFilter::And(parts)
            }
            first => TaskFilter::And(vec![first, other]),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::VisibleTo(user_id) => is_visible(task, user_id.as_deref()),
            TaskFilter::Incomplete => !task.is_checked(),
            TaskFilter::And(parts) => parts.iter().all(|p| p.matches(task)),
        }
    }

    pub fn to_document(&self) -> Document {
        match self {
            TaskFilter::All => doc! {},
            TaskFilter::VisibleTo(None) => doc! { "private": { "$ne": true } },
            TaskFilter::VisibleTo(Some(user_id)) => doc! {
                "$or": [
                    { "private": { "$ne": true } },
                    { "owner": user_id },
                ]
            },
            TaskFilter::Incomplete => doc! { "checked": { "$ne": true } },
            TaskFilter::And(parts) => {
                let parts: Vec<Document> = parts.iter().map(TaskFilter::to_document).collect();
                doc! { "$and": parts }
            }
        }
    }
}

pub fn is_visible(task: &Task, user_id: Option<&str>) -> bool {
    !task.is_private() || task.is_owned_by(user_id)
}

/// Outgoing subscription messages.
#[derive(Debug, Clone, PartialEq, Serialize, actix::Message)]
#[rtype(result = "()")]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum FeedEvent {
    Added { task: Task },
    Changed { task: Task },
    Removed { id: String },
    Ready,
}

/// What one subscriber has been sent so far.
///
/// While a resync is in flight, incoming changes are buffered and replayed on
/// top of the snapshot once it lands.
#[derive(Debug, Default)]
pub struct ViewState {
    user_id: Option<String>,
    sent: HashMap<String, Task>,
    pending: Option<Vec<TaskChange>>,
    generation: u64,
    ready: bool,
}

impl ViewState {
    pub fn new(user_id: Option<String>) -> Self {
        ViewState { user_id, ..Default::default() }
    }

    pub fn set_user_id(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    /// Start buffering changes; returns the token the snapshot must present.
    pub fn begin_resync(&mut self) -> u64 {
        self.generation += 1;
        self.pending.get_or_insert_with(Vec::new);
        self.generation
    }

    /// Diff a fresh visible snapshot against what was sent, then replay any
    /// changes buffered meanwhile. Stale snapshots return `None`.
    pub fn finish_resync(&mut self, generation: u64, snapshot: Vec<Task>) -> Option<Vec<FeedEvent>> {
        if generation != self.generation {
            return None;
        }
        let mut events = Vec::new();

        let mut fresh: HashMap<String, Task> = HashMap::with_capacity(snapshot.len());
        for task in snapshot {
            match self.sent.get(&task.id) {
                None => events.push(FeedEvent::Added { task: task.clone() }),
                Some(old) if *old != task => events.push(FeedEvent::Changed { task: task.clone() }),
                Some(_) => {}
            }
            fresh.insert(task.id.clone(), task);
        }
        let mut gone: Vec<&String> = self.sent.keys().filter(|id| !fresh.contains_key(*id)).collect();
        gone.sort();
        events.extend(gone.into_iter().map(|id| FeedEvent::Removed { id: id.clone() }));
        self.sent = fresh;

        for change in self.pending.take().unwrap_or_default() {
            events.extend(self.delta(&change));
        }
        if !self.ready {
            self.ready = true;
            events.push(FeedEvent::Ready);
        }
        Some(events)
    }

    /// Feed one change through the filter.
    pub fn apply(&mut self, change: &TaskChange) -> Option<FeedEvent> {
        if let Some(pending) = self.pending.as_mut() {
            pending.push(change.clone());
            return None;
        }
        self.delta(change)
    }

    fn delta(&mut self, change: &TaskChange) -> Option<FeedEvent> {
        match change {
            TaskChange::Upserted(task) => {
                let visible = is_visible(task, self.user_id.as_deref());
                let differs = self.sent.get(&task.id).map(|old| old != task);
                match (differs, visible) {
                    (None, true) => {
                        self.sent.insert(task.id.clone(), task.clone());
                        Some(FeedEvent::Added { task: task.clone() })
                    }
                    (Some(true), true) => {
                        self.sent.insert(task.id.clone(), task.clone());
                        Some(FeedEvent::Changed { task: task.clone() })
                    }
                    (Some(false), true) | (None, false) => None,
                    (Some(_), false) => {
                        self.sent.remove(&task.id);
                        Some(FeedEvent::Removed { id: task.id.clone() })
                    }
                }
            }
            TaskChange::Removed(id) => self
                .sent
                .remove(id)
                .map(|_| FeedEvent::Removed { id: id.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, TaskPatch};

    fn task_of(owner: &str, text: &str) -> Task {
        Task::new(text, &Identity::new(owner, owner))
    }

    fn private(mut task: Task) -> Task {
        task.apply(&TaskPatch::private(true));
        task
    }

    #[test]
    fn anonymous_sees_only_public_tasks() {
        let public = task_of("a", "public");
        let hidden = private(task_of("a", "hidden"));
        let filter = TaskFilter::visible_to(None);
        assert!(filter.matches(&public));
        assert!(!filter.matches(&hidden));
    }

    #[test]
    fn owner_sees_own_private_tasks() {
        let hidden = private(task_of("a", "hidden"));
        assert!(TaskFilter::visible_to(Some("a")).matches(&hidden));
        assert!(!TaskFilter::visible_to(Some("b")).matches(&hidden));
    }

    #[test]
    fn incomplete_combines_with_visibility() {
        let mut done = task_of("a", "done");
        done.apply(&TaskPatch::checked(true));
        let open = task_of("a", "open");
        let filter = TaskFilter::visible_to(Some("b")).and(TaskFilter::Incomplete);
        assert!(filter.matches(&open));
        assert!(!filter.matches(&done));
        assert_eq!(TaskFilter::All.and(TaskFilter::Incomplete), TaskFilter::Incomplete);
    }

    #[test]
    fn mongo_documents() {
        assert_eq!(
            TaskFilter::visible_to(None).to_document(),
            doc! { "private": { "$ne": true } }
        );
        assert_eq!(
            TaskFilter::visible_to(Some("u1")).to_document(),
            doc! { "$or": [ { "private": { "$ne": true } }, { "owner": "u1" } ] }
        );
        assert_eq!(
            TaskFilter::visible_to(None).and(TaskFilter::Incomplete).to_document(),
            doc! { "$and": [ { "private": { "$ne": true } }, { "checked": { "$ne": true } } ] }
        );
    }

    fn synced(user: Option<&str>, snapshot: Vec<Task>) -> (ViewState, Vec<FeedEvent>) {
        let mut view = ViewState::new(user.map(str::to_string));
        let generation = view.begin_resync();
        let events = view.finish_resync(generation, snapshot).unwrap();
        (view, events)
    }

    #[test]
    fn first_snapshot_is_added_then_ready() {
        let t = task_of("a", "buy milk");
        let (view, events) = synced(Some("b"), vec![t.clone()]);
        assert_eq!(events, vec![FeedEvent::Added { task: t }, FeedEvent::Ready]);
        assert_eq!(view.sent_len(), 1);
    }

    #[test]
    fn going_private_removes_from_others_but_not_owner() {
        let t = task_of("a", "buy milk");
        let (mut bob, _) = synced(Some("b"), vec![t.clone()]);
        let (mut alice, _) = synced(Some("a"), vec![t.clone()]);

        let hidden = private(t.clone());
        let change = TaskChange::Upserted(hidden.clone());
        assert_eq!(bob.apply(&change), Some(FeedEvent::Removed { id: t.id.clone() }));
        assert_eq!(alice.apply(&change), Some(FeedEvent::Changed { task: hidden }));

        // Going public again re-adds it for bob.
        let mut public = t.clone();
        public.apply(&TaskPatch::private(false));
        assert_eq!(
            bob.apply(&TaskChange::Upserted(public.clone())),
            Some(FeedEvent::Added { task: public })
        );
    }

    #[test]
    fn invisible_and_unchanged_tasks_emit_nothing() {
        let (mut bob, _) = synced(Some("b"), vec![]);
        let hidden = private(task_of("a", "secret"));
        assert_eq!(bob.apply(&TaskChange::Upserted(hidden.clone())), None);
        assert_eq!(bob.apply(&TaskChange::Removed(hidden.id.clone())), None);

        let t = task_of("a", "public");
        bob.apply(&TaskChange::Upserted(t.clone()));
        assert_eq!(bob.apply(&TaskChange::Upserted(t)), None);
    }

    #[test]
    fn removal_of_sent_task() {
        let t = task_of("a", "buy milk");
        let (mut view, _) = synced(None, vec![t.clone()]);
        assert_eq!(
            view.apply(&TaskChange::Removed(t.id.clone())),
            Some(FeedEvent::Removed { id: t.id })
        );
        assert_eq!(view.sent_len(), 0);
    }

    #[test]
    fn resync_after_identity_change_diffs_against_sent() {
        let public = task_of("a", "public");
        let mine = private(task_of("b", "mine"));
        let (mut view, _) = synced(Some("b"), vec![mine.clone(), public.clone()]);

        view.set_user_id(None);
        let generation = view.begin_resync();
        let events = view.finish_resync(generation, vec![public]).unwrap();
        assert_eq!(events, vec![FeedEvent::Removed { id: mine.id }]);
    }

    #[test]
    fn changes_during_resync_are_replayed() {
        let t = task_of("a", "buy milk");
        let mut view = ViewState::new(Some("b".into()));
        let generation = view.begin_resync();

        // Snapshot was taken before the task was deleted.
        assert_eq!(view.apply(&TaskChange::Removed(t.id.clone())), None);
        let events = view.finish_resync(generation, vec![t.clone()]).unwrap();
        assert_eq!(
            events,
            vec![
                FeedEvent::Added { task: t.clone() },
                FeedEvent::Removed { id: t.id },
                FeedEvent::Ready,
            ]
        );
        assert_eq!(view.sent_len(), 0);
    }

    #[test]
    fn stale_snapshot_is_ignored() {
        let mut view = ViewState::new(None);
        let first = view.begin_resync();
        let second = view.begin_resync();
        assert!(view.finish_resync(first, vec![task_of("a", "x")]).is_none());
        let events = view.finish_resync(second, vec![]).unwrap();
        assert_eq!(events, vec![FeedEvent::Ready]);
    }

    #[test]
    fn feed_event_wire_format() {
        let json = serde_json::to_value(FeedEvent::Removed { id: "t1".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "msg": "removed", "id": "t1" }));
        let json = serde_json::to_value(FeedEvent::Ready).unwrap();
        assert_eq!(json, serde_json::json!({ "msg": "ready" }));
    }
}
