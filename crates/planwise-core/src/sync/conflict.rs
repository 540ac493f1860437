//! Conflict resolution seam.
//!
//! Ties found during reconciliation are handed to a [`ConflictHandler`]. An
//! empty answer cancels resolution for the round: the records are skipped and
//! their local copies stay as they were.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::models::{Conflict, Resolution, Resolutions, TableName};

/// Decides which side wins each conflict of a table.
#[async_trait]
pub trait ConflictHandler: Send + Sync {
    async fn resolve(&self, table: TableName, conflicts: Vec<Conflict>) -> Resolutions;

    /// Label recorded in the conflict log
    fn strategy(&self) -> &'static str {
        "manual"
    }
}

#[async_trait]
impl<F> ConflictHandler for F
where
    F: Fn(TableName, Vec<Conflict>) -> Resolutions + Send + Sync,
{
    async fn resolve(&self, table: TableName, conflicts: Vec<Conflict>) -> Resolutions {
        self(table, conflicts)
    }
}

/// Policy applied when nobody is around to answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnattendedResolution {
    #[default]
    PreferRemote,
    PreferLocal,
    /// Leave every conflict unresolved
    Skip,
}

#[async_trait]
impl ConflictHandler for UnattendedResolution {
    async fn resolve(&self, _table: TableName, conflicts: Vec<Conflict>) -> Resolutions {
        let resolution = match self {
            Self::PreferRemote => Resolution::Remote,
            Self::PreferLocal => Resolution::Local,
            Self::Skip => return Resolutions::new(),
        };
        conflicts
            .into_iter()
            .map(|conflict| (conflict.id, resolution))
            .collect()
    }

    fn strategy(&self) -> &'static str {
        "unattended"
    }
}

/// A batch of conflicts waiting for an answer.
///
/// Dropping the prompt without answering cancels resolution for the round.
#[derive(Debug)]
pub struct ConflictPrompt {
    pub table: TableName,
    pub conflicts: Vec<Conflict>,
    responder: oneshot::Sender<Resolutions>,
}

impl ConflictPrompt {
    pub fn respond(self, resolutions: Resolutions) {
        // A closed receiver means the sync pass is gone; nothing to do.
        let _ = self.responder.send(resolutions);
    }

    /// Answer every conflict of the prompt the same way
    pub fn respond_all(self, resolution: Resolution) {
        let resolutions = self
            .conflicts
            .iter()
            .map(|conflict| (conflict.id.clone(), resolution))
            .collect();
        self.respond(resolutions);
    }
}

/// Forwards conflicts to an interactive consumer (a UI or a CLI prompt).
#[derive(Debug, Clone)]
pub struct ChannelConflictHandler {
    prompts: mpsc::Sender<ConflictPrompt>,
}

impl ChannelConflictHandler {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ConflictPrompt>) {
        let (prompts, receiver) = mpsc::channel(buffer.max(1));
        (Self { prompts }, receiver)
    }
}

#[async_trait]
impl ConflictHandler for ChannelConflictHandler {
    async fn resolve(&self, table: TableName, conflicts: Vec<Conflict>) -> Resolutions {
        let (responder, answer) = oneshot::channel();
        let prompt = ConflictPrompt {
            table,
            conflicts,
            responder,
        };
        if self.prompts.send(prompt).await.is_err() {
            tracing::debug!("Conflict prompt receiver closed; leaving {table} conflicts unresolved");
            return Resolutions::new();
        }
        answer.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, RecordId};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conflict(id: &str) -> Conflict {
        let side = |title: &str| {
            Record::from_value(json!({"id": id, "updated_at": 5, "title": title})).unwrap()
        };
        Conflict {
            id: id.into(),
            table: TableName::Tasks,
            local: side("local"),
            remote: side("remote"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unattended_policies() {
        let conflicts = vec![conflict("a"), conflict("b")];

        let remote = UnattendedResolution::PreferRemote
            .resolve(TableName::Tasks, conflicts.clone())
            .await;
        assert_eq!(remote.get(&RecordId::from("b")), Some(&Resolution::Remote));

        let local = UnattendedResolution::PreferLocal
            .resolve(TableName::Tasks, conflicts.clone())
            .await;
        assert_eq!(local.len(), 2);
        assert!(local.values().all(|r| *r == Resolution::Local));

        assert!(UnattendedResolution::Skip
            .resolve(TableName::Tasks, conflicts)
            .await
            .is_empty());
    }

    #[test]
    fn test_unattended_resolution_serde_names() {
        let value: UnattendedResolution = serde_json::from_str("\"prefer_local\"").unwrap();
        assert_eq!(value, UnattendedResolution::PreferLocal);
        assert_eq!(UnattendedResolution::default().strategy(), "unattended");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closure_handler() {
        let handler = |_table: TableName, conflicts: Vec<Conflict>| -> Resolutions {
            conflicts
                .into_iter()
                .map(|conflict| (conflict.id, Resolution::Local))
                .collect()
        };

        let answer = handler.resolve(TableName::Events, vec![conflict("a")]).await;
        assert_eq!(answer.get(&RecordId::from("a")), Some(&Resolution::Local));
        assert_eq!(handler.strategy(), "manual");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_channel_handler_round_trip() {
        let (handler, mut prompts) = ChannelConflictHandler::channel(4);
        let responder = tokio::spawn(async move {
            let prompt = prompts.recv().await.unwrap();
            assert_eq!(prompt.table, TableName::Projects);
            prompt.respond_all(Resolution::Remote);
        });

        let answer = handler
            .resolve(TableName::Projects, vec![conflict("a"), conflict("b")])
            .await;
        responder.await.unwrap();

        assert_eq!(answer.len(), 2);
        assert_eq!(answer.get(&RecordId::from("a")), Some(&Resolution::Remote));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_prompt_cancels() {
        let (handler, mut prompts) = ChannelConflictHandler::channel(1);
        let dropper = tokio::spawn(async move {
            drop(prompts.recv().await);
        });

        let answer = handler.resolve(TableName::Tasks, vec![conflict("a")]).await;
        dropper.await.unwrap();
        assert!(answer.is_empty());

        let (handler, prompts) = ChannelConflictHandler::channel(1);
        drop(prompts);
        assert!(handler
            .resolve(TableName::Tasks, vec![conflict("a")])
            .await
            .is_empty());
    }
}
