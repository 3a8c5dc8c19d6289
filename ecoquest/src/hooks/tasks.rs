use ecoquest_sync::{Mutation, MutationObserver, Query, QueryObserver};
use std::time::Duration;
use tracing::debug;

use super::{EcoQuest, NO_ACTIVE_RESOURCE};
use crate::api::{Task, UpdateTaskCompletion};
use crate::keys;

pub const TASKS_STALE_TIME: Duration = Duration::from_secs(30);

impl EcoQuest {
    /// Today's tasks. A 409 (nothing assigned) is a business state and is
    /// never retried.
    pub fn today_tasks_query(&self) -> Query<Vec<Task>> {
        let api = self.api.clone();
        Query::new(keys::tasks_today(), move || {
            let api = api.clone();
            async move { api.tasks_today().await }
        })
        .stale_time(TASKS_STALE_TIME)
        .retry(self.client.config().retry_policy().never_retry_status(NO_ACTIVE_RESOURCE))
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_today_tasks(&self) -> QueryObserver<Vec<Task>> {
        self.client.use_query(self.today_tasks_query())
    }

    /// Flip `completed` on the cached task at once; the packet's progress
    /// depends on it, so both keys are refreshed when the call settles.
    pub fn update_task_completion_mutation(&self) -> Mutation<UpdateTaskCompletion, Task> {
        let api = self.api.clone();
        Mutation::new("update_task_completion", move |update: UpdateTaskCompletion| {
            let api = api.clone();
            async move { api.update_task_completion(&update).await }
        })
        .optimistic(
            |_| vec![keys::tasks_today()],
            |client, update| {
                client.set_query_data::<Vec<Task>, _>(&keys::tasks_today(), |current| {
                    let tasks = current?;
                    if !tasks.iter().any(|task| task.id == update.task_id) {
                        debug!("Task {} not in today's list, nothing to patch", update.task_id);
                        return None;
                    }
                    Some(
                        tasks
                            .iter()
                            .map(|task| {
                                let mut task = task.clone();
                                if task.id == update.task_id {
                                    task.completed = update.completed;
                                }
                                task
                            })
                            .collect(),
                    )
                })?;
                Ok(())
            },
        )
        .invalidates(keys::tasks_today())
        .invalidates(keys::packets_me())
    }

    pub fn use_update_task_completion(&self) -> MutationObserver<UpdateTaskCompletion, Task> {
        self.client.use_mutation(self.update_task_completion_mutation())
    }
}

/// Shorthand for building the mutation input
pub fn completion(task_id: i64, completed: bool) -> UpdateTaskCompletion {
    UpdateTaskCompletion { task_id, completed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_input() {
        let input = completion(5, true);
        assert_eq!(input.task_id, 5);
        assert!(input.completed);
    }
}
