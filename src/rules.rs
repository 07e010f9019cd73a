//! Who may do what to a task. Callers turn a `false` into `TaskError::NotAuthorized`.

use crate::models::Task;

/// Public tasks may be checked by anyone; private ones only by their owner.
pub fn can_mutate_checked(task: &Task, user_id: Option<&str>) -> bool {
    !task.is_private() || task.is_owned_by(user_id)
}

pub fn can_delete(task: &Task, user_id: Option<&str>) -> bool {
    can_mutate_checked(task, user_id)
}

/// Owner only, whether or not the task is currently private.
pub fn can_set_private(task: &Task, user_id: Option<&str>) -> bool {
    task.is_owned_by(user_id)
}
