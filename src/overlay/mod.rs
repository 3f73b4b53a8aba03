//! Overlay & Mutation Queue: optimistic mutation
//! staging and the UI-overlay toast stack.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::instrument;

use crate::beads::{BeadStatus, BeadsClient, PendingMutation, PendingMutations};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub level: ToastLevel,
    pub text: String,
}

/// Optimistic-view map: `beadId -> pending mutation`,
/// consulted by the Board Projection and cleared only on a post-commit
/// read or explicit failure.
#[derive(Clone)]
pub struct OverlayService {
    pending: Arc<Mutex<PendingMutations>>,
    toasts: mpsc::UnboundedSender<Toast>,
}

impl OverlayService {
    pub fn new(toasts: mpsc::UnboundedSender<Toast>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingMutations::new())),
            toasts,
        }
    }

    pub async fn pending_mutations(&self) -> PendingMutations {
        self.pending.lock().await.clone()
    }

    fn emit(&self, level: ToastLevel, text: impl Into<String>) {
        let _ = self.toasts.send(Toast {
            level,
            text: text.into(),
        });
    }

    /// Optimistically shows `bead_id` moved before the Beads Client's real
    /// update returns.
    #[instrument(skip(self, beads))]
    pub async fn move_bead(&self, beads: &BeadsClient, bead_id: &str, status: BeadStatus) {
        self.pending
            .lock()
            .await
            .insert(bead_id.to_string(), PendingMutation::Move(status));

        match beads.update_status(bead_id, status).await {
            Ok(()) => {
                self.pending.lock().await.remove(bead_id);
            }
            Err(e) => {
                self.pending.lock().await.remove(bead_id);
                self.emit(ToastLevel::Error, format!("failed to move {bead_id}: {e}"));
            }
        }
    }

    /// Clears an overlay entry once a read has observed the committed
    /// value.
    pub async fn clear_if_committed(&self, bead_id: &str, observed_status: BeadStatus) {
        let mut pending = self.pending.lock().await;
        if let Some(PendingMutation::Move(expected)) = pending.get(bead_id) {
            if *expected == observed_status {
                pending.remove(bead_id);
            }
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(ToastLevel::Info, text);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.emit(ToastLevel::Success, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.emit(ToastLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(ToastLevel::Error, text);
    }
}
