//! Upload and download transfers.
//!
//! Staging operations enqueue a [`TransferJob`]. A driver executes the
//! remote call outside any store transaction and turns its result into a
//! [`TransferOutcome`], which [`SyncEngine::complete_transfer`] applies in
//! one transaction. Completions for rows that no longer exist are no-ops.

use crate::artifact::{move_file, purge_artifact, ArtifactDir};
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::host::FilesystemHost;
use crate::remote::RemoteStoreClient;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use storemirror_protocol::{RemoteItem, TaskId};
use storemirror_store::{Domain, DownloadState, UploadState};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a transfer does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    /// Create a remote directory.
    CreateDirectory {
        /// Local id of the parent at staging time.
        parent_id: String,
        /// Directory name.
        name: String,
    },
    /// Upload staged file content.
    Upload {
        /// Local id of the parent at staging time.
        parent_id: String,
        /// File name.
        name: String,
        /// Staged content.
        source: PathBuf,
    },
    /// Download an item's content.
    Download,
}

/// Direction of a transfer, deciding which lifecycle it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Upload lifecycle (uploads and directory creation).
    Upload,
    /// Download lifecycle.
    Download,
}

/// A queued transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    /// `<domain>/<item id>` of the item the transfer is for.
    pub task: TaskId,
    /// What to do.
    pub kind: TransferKind,
}

impl TransferJob {
    /// Which lifecycle the job drives.
    #[must_use]
    pub fn direction(&self) -> TransferDirection {
        match self.kind {
            TransferKind::CreateDirectory { .. } | TransferKind::Upload { .. } => {
                TransferDirection::Upload
            }
            TransferKind::Download => TransferDirection::Download,
        }
    }
}

/// Successful result of a transfer's remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSuccess {
    /// The remote created the item.
    Created(RemoteItem),
    /// Content was written to this path.
    Downloaded(PathBuf),
}

/// A finished remote call waiting to be applied.
#[derive(Debug)]
pub struct TransferOutcome {
    /// Task the outcome belongs to.
    pub task: TaskId,
    /// Lifecycle to update.
    pub direction: TransferDirection,
    /// Remote result.
    pub result: SyncResult<TransferSuccess>,
}

/// How a completion was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The row moved to its success state.
    Completed,
    /// The failure was recorded on the row.
    Failed(String),
    /// No row to update, or the row had already moved on.
    Ignored,
}

/// Result of [`SyncEngine::complete_transfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    /// Task the outcome belonged to.
    pub task: TaskId,
    /// What happened.
    pub status: CompletionStatus,
}

/// Sending side of the transfer queue, owned by the engine.
#[derive(Debug)]
pub(crate) struct TransferQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<TransferJob>>>,
}

impl TransferQueue {
    pub(crate) fn new() -> (Self, TransferJobs) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            TransferJobs { receiver },
        )
    }

    /// Hands the job back when the queue is closed.
    fn send(&self, job: TransferJob) -> Result<(), TransferJob> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).map_err(|err| err.0),
            None => Err(job),
        }
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}

/// Receiving side of the transfer queue.
#[derive(Debug)]
pub struct TransferJobs {
    receiver: mpsc::UnboundedReceiver<TransferJob>,
}

impl TransferJobs {
    /// Waits for the next job; `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<TransferJob> {
        self.receiver.recv().await
    }

    /// Takes the next job if one is waiting.
    pub fn try_recv(&mut self) -> Option<TransferJob> {
        self.receiver.try_recv().ok()
    }
}

/// Error recorded on transfers cut off by a restart.
pub const INTERRUPTED: &str = "interrupted";

/// How a failed upload landed in the store.
enum FailedUpload {
    Recorded,
    Absorbed,
    Vanished,
}

impl<R: RemoteStoreClient, H: FilesystemHost> SyncEngine<R, H> {
    pub(crate) fn enqueue(&self, job: TransferJob) {
        debug!(task = %job.task, kind = ?job.kind, "queued transfer");
        if let Err(job) = self.queue.send(job) {
            warn!(task = %job.task, "transfer queue closed; recording failure");
            let outcome = TransferOutcome {
                direction: job.direction(),
                task: job.task,
                result: Err(SyncError::state("transfer queue closed")),
            };
            if let Err(err) = self.complete_transfer(outcome) {
                warn!(error = %err, "could not record transfer failure");
            }
        }
    }

    /// Drives queued transfers until the queue is closed.
    ///
    /// Each job runs in its own tokio task; its abort handle is kept so
    /// [`discard_staged`](Self::discard_staged) can cancel it.
    pub async fn run_transfers(self: Arc<Self>, mut jobs: TransferJobs) {
        info!("transfer driver started");
        while let Some(job) = jobs.recv().await {
            let task = job.task.clone();
            let engine = Arc::clone(&self);
            let handle = tokio::spawn(async move {
                let outcome = engine.execute(job).await;
                let task = outcome.task.clone();
                if let Err(err) = engine.complete_transfer(outcome) {
                    warn!(task = %task, error = %err, "applying transfer outcome failed");
                }
            });

            {
                let mut running = self.running.lock();
                running.retain(|_, handle| !handle.is_finished());
                running.insert(task, handle.abort_handle());
            }
        }
        info!("transfer queue closed; driver stopped");
    }

    /// Executes and applies the next waiting job, if any.
    ///
    /// Returns `None` when no job is queued.
    pub async fn process_next_transfer(
        &self,
        jobs: &mut TransferJobs,
    ) -> Option<SyncResult<CompletionReport>> {
        let job = jobs.try_recv()?;
        let outcome = self.execute(job).await;
        Some(self.complete_transfer(outcome))
    }

    /// Closes the queue and aborts running transfers. Later staging calls
    /// record their transfers as failed.
    pub fn shutdown_transfers(&self) {
        self.queue.close();
        let running: Vec<_> = self.running.lock().drain().collect();
        for (task, handle) in running {
            debug!(task = %task, "aborting transfer");
            handle.abort();
        }
    }

    pub(crate) fn abort_transfer(&self, task: &TaskId) {
        if let Some(handle) = self.running.lock().remove(task) {
            debug!(task = %task, "aborting transfer");
            handle.abort();
        }
    }

    /// Releases rows left mid-transfer by an earlier process.
    ///
    /// Uploads and downloads that were running become failed with
    /// [`INTERRUPTED`] so they can be retried. Absorbed rows still waiting
    /// for their upload's confirmation are settled and their staged content
    /// is removed. Returns the number of rows changed.
    pub(crate) fn recover_interrupted(&self) -> SyncResult<usize> {
        let (changed, released) = self.store.transaction(|txn| {
            let stuck = txn.rows_where(|item| {
                item.upload_state == UploadState::Uploading
                    || item.download_state == DownloadState::Downloading
                    || (item.origin_id.is_some()
                        && item.download_state == DownloadState::PendingLocalDelete)
            });
            let changed = stuck.len();
            let mut released = Vec::new();
            for mut row in stuck {
                if row.upload_state == UploadState::Uploading {
                    row.upload_state = UploadState::NotStarted;
                    row.upload_error = Some(INTERRUPTED.to_string());
                }
                if row.download_state == DownloadState::Downloading {
                    row.download_state = DownloadState::NotStarted;
                    row.download_error = Some(INTERRUPTED.to_string());
                }
                if row.download_state == DownloadState::PendingLocalDelete {
                    if let Some(origin) = &row.origin_id {
                        released.push(origin.clone());
                        row.download_state = row.settled_download_state();
                    }
                }
                txn.put(row);
            }
            Ok::<_, SyncError>((changed, released))
        })?;

        for provisional_id in &released {
            purge_artifact(&self.config.artifact_root, provisional_id);
        }
        if changed > 0 {
            info!(changed, released = released.len(), "recovered interrupted transfers");
        }
        Ok(changed)
    }

    /// Runs a job's remote call.
    pub async fn execute(&self, job: TransferJob) -> TransferOutcome {
        let direction = job.direction();
        let result = self.perform(&job).await;
        TransferOutcome {
            task: job.task,
            direction,
            result,
        }
    }

    async fn perform(&self, job: &TransferJob) -> SyncResult<TransferSuccess> {
        let domain = self.domain(job.task.domain())?;
        match &job.kind {
            TransferKind::CreateDirectory { parent_id, name } => {
                let parent = self.resolve_remote_parent(&domain, parent_id)?;
                let remote = Arc::clone(&self.remote);
                let name = name.clone();
                let created = tokio::task::spawn_blocking(move || {
                    remote.create_directory(&parent, &name)
                })
                .await
                .map_err(|err| {
                    if err.is_cancelled() {
                        SyncError::Cancelled
                    } else {
                        SyncError::transport_fatal(err.to_string())
                    }
                })??;
                Ok(TransferSuccess::Created(created))
            }
            TransferKind::Upload {
                parent_id,
                name,
                source,
            } => {
                let parent = self.resolve_remote_parent(&domain, parent_id)?;
                let created = self.remote.upload(source, &parent, name).await?;
                Ok(TransferSuccess::Created(created))
            }
            TransferKind::Download => {
                let path = self.remote.download(job.task.item_id()).await?;
                Ok(TransferSuccess::Downloaded(path))
            }
        }
    }

    /// Remote id of a job's parent, following absorption.
    fn resolve_remote_parent(&self, domain: &Domain, parent_id: &str) -> SyncResult<String> {
        let parent = self
            .store
            .get_or_absorbed(domain.id, parent_id)?
            .ok_or_else(|| SyncError::not_found(&domain.identifier, parent_id))?;
        if parent.is_provisional() {
            return Err(SyncError::state(format!(
                "parent {parent_id} is not yet confirmed by the remote"
            )));
        }
        Ok(parent.id)
    }

    /// Where downloaded content of an item is kept.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDomain` for unregistered domains.
    pub fn content_path(&self, id: &str, domain: &str) -> SyncResult<PathBuf> {
        let domain = self.domain(domain)?;
        Ok(self.config.download_root.join(&domain.identifier).join(id))
    }

    /// Applies a finished transfer to its row.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDomain` or a store error. Transfer failures are
    /// recorded on the row, not returned.
    pub fn complete_transfer(&self, outcome: TransferOutcome) -> SyncResult<CompletionReport> {
        let domain = self.domain(outcome.task.domain())?;
        let status = match outcome.direction {
            TransferDirection::Upload => {
                self.complete_upload(&domain, &outcome.task, outcome.result)?
            }
            TransferDirection::Download => {
                self.complete_download(&domain, &outcome.task, outcome.result)?
            }
        };
        Ok(CompletionReport {
            task: outcome.task,
            status,
        })
    }

    fn complete_upload(
        &self,
        domain: &Domain,
        task: &TaskId,
        result: SyncResult<TransferSuccess>,
    ) -> SyncResult<CompletionStatus> {
        let item_id = task.item_id();

        let created = match result {
            Ok(TransferSuccess::Created(created)) => created,
            Ok(TransferSuccess::Downloaded(path)) => {
                return Err(SyncError::state(format!(
                    "upload task {task} produced a download at {}",
                    path.display()
                )))
            }
            Err(error) => return self.fail_upload(domain, task, &error),
        };

        let artifact = ArtifactDir::claim(&self.config.artifact_root, item_id);
        let applied = self.store.transaction(|txn| {
            let (mut row, absorbed) = match txn.get(domain.id, item_id) {
                Some(row) => (row, false),
                None => match txn.find_by_origin(domain.id, item_id) {
                    Some(row) => (row, true),
                    None => return Ok(None),
                },
            };

            row.upload_state = UploadState::Uploaded;
            row.upload_error = None;
            if !absorbed {
                row.download_state = DownloadState::PendingLocalDelete;
            } else if row.download_state == DownloadState::PendingLocalDelete {
                row.download_state = row.settled_download_state();
            }
            let parent_id = row.parent_id.clone();
            txn.put(row);
            Ok::<_, SyncError>(Some(parent_id))
        });

        let parent_id = match applied {
            Ok(parent_id) => parent_id,
            Err(err) => {
                artifact.keep();
                return Err(err);
            }
        };
        drop(artifact);

        let Some(parent_id) = parent_id else {
            debug!(task = %task, "upload finished for an item that no longer exists");
            return Ok(CompletionStatus::Ignored);
        };

        self.stats.write().uploads_completed += 1;
        info!(
            domain = %domain.identifier,
            item_id,
            remote_id = created.id,
            parent_id = %parent_id,
            "upload completed"
        );
        self.host.signal_changed(domain, &parent_id);
        Ok(CompletionStatus::Completed)
    }

    fn fail_upload(
        &self,
        domain: &Domain,
        task: &TaskId,
        error: &SyncError,
    ) -> SyncResult<CompletionStatus> {
        let item_id = task.item_id();
        let message = error.to_string();
        warn!(domain = %domain.identifier, item_id, error = %message, "upload failed");
        self.record_error(error);
        self.stats.write().uploads_failed += 1;

        let outcome = self.store.transaction(|txn| {
            let Some(mut row) = txn.get(domain.id, item_id) else {
                // the remote confirmed the item anyway; nothing is left to upload
                let Some(mut absorbed) = txn.find_by_origin(domain.id, item_id) else {
                    return Ok(FailedUpload::Vanished);
                };
                if absorbed.download_state == DownloadState::PendingLocalDelete {
                    absorbed.download_state = absorbed.settled_download_state();
                    txn.put(absorbed);
                }
                return Ok(FailedUpload::Absorbed);
            };
            // a success for this item was already applied
            if row.upload_state == UploadState::Uploaded {
                return Ok(FailedUpload::Vanished);
            }
            row.upload_state = UploadState::NotStarted;
            row.upload_error = Some(message.clone());
            txn.put(row);
            Ok::<_, SyncError>(FailedUpload::Recorded)
        })?;

        Ok(match outcome {
            FailedUpload::Recorded => CompletionStatus::Failed(message),
            FailedUpload::Absorbed => {
                purge_artifact(&self.config.artifact_root, item_id);
                debug!(task = %task, "failed upload was already confirmed by the remote");
                CompletionStatus::Ignored
            }
            FailedUpload::Vanished => CompletionStatus::Ignored,
        })
    }

    fn complete_download(
        &self,
        domain: &Domain,
        task: &TaskId,
        result: SyncResult<TransferSuccess>,
    ) -> SyncResult<CompletionStatus> {
        let item_id = task.item_id();
        let target = self.config.download_root.join(&domain.identifier).join(item_id);

        let placed = match result {
            Ok(TransferSuccess::Downloaded(path)) => {
                move_file(&path, &target).map_err(SyncError::from)
            }
            Ok(TransferSuccess::Created(_)) => Err(SyncError::state(format!(
                "download task {task} produced an upload result"
            ))),
            Err(error) => Err(error),
        };

        if let Err(error) = placed {
            let message = error.to_string();
            warn!(domain = %domain.identifier, item_id, error = %message, "download failed");
            self.record_error(&error);
            self.stats.write().downloads_failed += 1;

            let recorded = self.store.transaction(|txn| {
                let Some(mut row) = txn.get(domain.id, item_id) else {
                    return Ok(false);
                };
                if row.download_state != DownloadState::Downloading {
                    return Ok(false);
                }
                row.download_state = DownloadState::NotStarted;
                row.download_error = Some(message.clone());
                txn.put(row);
                Ok::<_, SyncError>(true)
            })?;
            return Ok(if recorded {
                CompletionStatus::Failed(message)
            } else {
                CompletionStatus::Ignored
            });
        }

        let parent_id = self.store.transaction(|txn| {
            let Some(mut row) = txn.get(domain.id, item_id) else {
                return Ok(None);
            };
            row.download_state = DownloadState::Downloaded;
            row.download_error = None;
            let parent_id = row.parent_id.clone();
            txn.put(row);
            Ok::<_, SyncError>(Some(parent_id))
        })?;

        let Some(parent_id) = parent_id else {
            debug!(task = %task, "download finished for an item that no longer exists");
            if let Err(err) = std::fs::remove_file(&target) {
                warn!(path = %target.display(), error = %err, "failed to remove orphaned download");
            }
            return Ok(CompletionStatus::Ignored);
        };

        self.stats.write().downloads_completed += 1;
        info!(domain = %domain.identifier, item_id, "download completed");
        self.host.signal_changed(domain, &parent_id);
        Ok(CompletionStatus::Completed)
    }
}
