//! Upload lifecycle manager.
//!
//! Bridges the synchronous create-item phase with the asynchronous
//! transfer phase: validates preconditions, creates the provisional remote
//! entity, waits for the server to expose upload targets, then launches
//! the multi-file coordinator in the background and hands the caller a
//! composite handle over the import task and live progress.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cloudlift_api::types::{self, Container, TaskBody, UploadEntity, UploadFile};
use cloudlift_api::{Task, Transport};
use cloudlift_transfer::{
    DescriptorFile, ErrorSlot, PackageDescriptor, PackageTransfer, PieceUploader, ProgressCell,
    TransferError, UploadTarget, effective_piece_size,
};
use quick_xml::escape::escape;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::UploadError;
use crate::checks;
use crate::cleanup::cancel_entity_tasks;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_LINK_DEADLINE: Duration = Duration::from_secs(300);

/// Caller-tunable knobs for one upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Requested piece size in bytes; out-of-range values fall back to the
    /// default per file.
    pub piece_size: u64,
    /// Free-text description stored on the created item.
    pub description: String,
    /// Remove the unpacked package directory after a successful transfer.
    pub remove_source_dir: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            piece_size: 0,
            description: String::new(),
            remove_source_dir: false,
        }
    }
}

/// Composite handle over an in-flight upload.
///
/// Combines the server-side import task, a read-only progress accessor,
/// and the background transfer itself, which can be awaited or cancelled.
pub struct UploadHandle {
    task: Task,
    progress: Arc<ProgressCell>,
    errors: Arc<ErrorSlot<UploadError>>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandle")
            .field("task", &self.task)
            .field("progress", &self.progress)
            .field("failed", &self.errors.is_set())
            .finish_non_exhaustive()
    }
}

impl UploadHandle {
    /// Percentage of package bytes uploaded so far (0–100).
    pub fn progress_percent(&self) -> u64 {
        self.progress.get()
    }

    /// Returns `true` once the background transfer has recorded a failure.
    pub fn has_failed(&self) -> bool {
        self.errors.is_set()
    }

    /// Stops the local piece-upload loop at the next piece boundary.
    ///
    /// This does not cancel the remote import; use the task for that.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Import task for the server-side job.
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }

    /// Waits for the background transfer to finish and surfaces its error,
    /// if any. On success returns the import task for further polling.
    pub async fn join(self) -> Result<Task, UploadError> {
        if let Err(err) = self.join.await {
            return Err(UploadError::Background(err.to_string()));
        }
        if let Some(err) = self.errors.take() {
            return Err(err);
        }
        Ok(self.task)
    }
}

/// Everything the background launch needs once the provisional entity is
/// ready: resolved upload targets and the import task body.
struct Prepared {
    targets: HashMap<String, UploadTarget>,
    task: TaskBody,
    entity: UploadEntity,
}

/// Creates remote items and drives their uploads to completion.
pub struct UploadLifecycleManager {
    transport: Arc<dyn Transport>,
    /// Interval between polls of the provisional entity.
    poll_interval: Duration,
    /// How long to wait for the server to expose upload links.
    link_deadline: Duration,
}

impl UploadLifecycleManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            link_deadline: DEFAULT_LINK_DEADLINE,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_link_deadline(mut self, deadline: Duration) -> Self {
        self.link_deadline = deadline;
        self
    }

    /// Uploads an unpacked package directory as a new item in `container`.
    ///
    /// Returns as soon as the background transfer is running; completion is
    /// observed through the returned [`UploadHandle`].
    pub async fn upload_package(
        &self,
        container: &Container,
        item_name: &str,
        package_dir: &Path,
        options: UploadOptions,
    ) -> Result<UploadHandle, UploadError> {
        checks::check_name_collision(container, item_name)?;

        let descriptor_path = find_descriptor(package_dir)?;
        let descriptor_xml = tokio::fs::read_to_string(&descriptor_path).await?;
        let descriptor = PackageDescriptor::parse(&descriptor_xml)?;
        checks::check_package_files(&descriptor, package_dir)?;

        let body = package_params_xml(item_name, &options.description);
        let resp = self
            .transport
            .post(&container.href, "application/xml", body)
            .await?;
        let entity: UploadEntity = types::parse(&resp)?;
        info!(item = item_name, href = %entity.href, "created provisional item");

        match self.prepare_package(&entity, &descriptor, &descriptor_path).await {
            Ok(ready) => {
                let cleanup_dir = options.remove_source_dir.then(|| package_dir.to_path_buf());
                Ok(self.launch(
                    descriptor,
                    ready,
                    package_dir.to_path_buf(),
                    options.piece_size,
                    cleanup_dir,
                ))
            }
            Err(err) => {
                self.run_cleanup(&entity).await;
                Err(err)
            }
        }
    }

    /// Uploads a local ISO image as a new media item in `container`.
    pub async fn upload_media(
        &self,
        container: &Container,
        media_name: &str,
        iso_path: &Path,
        options: UploadOptions,
    ) -> Result<UploadHandle, UploadError> {
        let abs = checks::check_local_file(iso_path)?;
        checks::check_iso(&abs)?;
        checks::check_name_collision(container, media_name)?;

        let size = std::fs::metadata(&abs)?.len();
        let body = media_params_xml(media_name, size, &options.description);
        let resp = self
            .transport
            .post(&container.href, "application/xml", body)
            .await?;
        let entity: UploadEntity = types::parse(&resp)?;
        info!(media = media_name, href = %entity.href, "created provisional media item");

        match self.prepare_media(&entity, &abs, size).await {
            Ok((descriptor, ready)) => {
                let local_dir = abs
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                Ok(self.launch(descriptor, ready, local_dir, options.piece_size, None))
            }
            Err(err) => {
                self.run_cleanup(&entity).await;
                Err(err)
            }
        }
    }

    /// Waits for the descriptor link, uploads the descriptor, then waits
    /// for the remaining upload links and the import task.
    async fn prepare_package(
        &self,
        created: &UploadEntity,
        descriptor: &PackageDescriptor,
        descriptor_path: &Path,
    ) -> Result<Prepared, UploadError> {
        let descriptor_name = file_name_of(descriptor_path);

        // The descriptor's own upload link appears first.
        let entity = self
            .wait_ready(&created.href, |e| e.upload_link_count() >= 1)
            .await?;
        let link = entity
            .upload_link_for(&descriptor_name)
            .or_else(|| entity.first_upload_file().and_then(UploadFile::upload_link))
            .ok_or_else(|| TransferError::MissingUploadTarget(descriptor_name.clone()))?
            .to_string();

        let size = tokio::fs::metadata(descriptor_path).await?.len();
        let uploader = PieceUploader::new(self.transport.as_ref(), CancellationToken::new());
        uploader
            .upload_file(
                descriptor_path,
                &link,
                effective_piece_size(0, size),
                0,
                size,
                &mut |_| {},
            )
            .await?;
        debug!(file = %descriptor_name, "descriptor uploaded");

        // Once the server has parsed the descriptor it exposes one link per
        // declared file and lists the import task. Readiness is checked per
        // declared file, not by link count: the descriptor's own slot may
        // lose its link once the server has consumed it. An import task
        // already in the error state fails the whole upload here, before
        // any disk bytes move.
        let entity = self
            .wait_ready(&created.href, |e| {
                descriptor
                    .files()
                    .iter()
                    .all(|f| e.upload_link_for(&f.href).is_some())
                    && !e.tasks.task.is_empty()
            })
            .await?;

        let mut targets = HashMap::new();
        for entry in descriptor.files() {
            if let Some(file) = entity.file(&entry.href) {
                if let Some(link) = file.upload_link() {
                    targets.insert(
                        entry.href.clone(),
                        UploadTarget {
                            href: link.to_string(),
                            bytes_transferred: file.bytes_transferred,
                        },
                    );
                }
            }
        }

        let task = entity
            .tasks
            .task
            .first()
            .cloned()
            .ok_or_else(|| UploadError::ImportFailed("no import task listed".into()))?;
        Ok(Prepared {
            targets,
            task,
            entity,
        })
    }

    /// Waits for the media upload link and synthesizes a one-entry
    /// descriptor so the coordinator handles media like any package.
    async fn prepare_media(
        &self,
        created: &UploadEntity,
        iso: &Path,
        size: u64,
    ) -> Result<(PackageDescriptor, Prepared), UploadError> {
        let iso_name = file_name_of(iso);
        let entity = self
            .wait_ready(&created.href, |e| {
                e.first_upload_file().is_some() && !e.tasks.task.is_empty()
            })
            .await?;

        let (link, bytes_transferred) = match entity.first_upload_file() {
            Some(file) => match file.upload_link() {
                Some(link) => (link.to_string(), file.bytes_transferred),
                None => return Err(TransferError::MissingUploadTarget(iso_name).into()),
            },
            None => return Err(TransferError::MissingUploadTarget(iso_name).into()),
        };

        let descriptor = PackageDescriptor::new(vec![DescriptorFile {
            href: iso_name.clone(),
            id: String::new(),
            size,
            chunk_size: 0,
        }]);
        let targets = HashMap::from([(
            iso_name,
            UploadTarget {
                href: link,
                bytes_transferred,
            },
        )]);
        let task = entity
            .tasks
            .task
            .first()
            .cloned()
            .ok_or_else(|| UploadError::ImportFailed("no import task listed".into()))?;

        Ok((
            descriptor,
            Prepared {
                targets,
                task,
                entity,
            },
        ))
    }

    /// Polls the provisional entity until `ready` accepts it.
    ///
    /// A task already in the error state is fatal; the deadline bounds the
    /// wait instead of polling forever.
    async fn wait_ready(
        &self,
        href: &str,
        ready: impl Fn(&UploadEntity) -> bool,
    ) -> Result<UploadEntity, UploadError> {
        let started = Instant::now();
        loop {
            let xml = self.transport.get(href).await?;
            let entity: UploadEntity = types::parse(&xml)?;

            if let Some(task) = entity.error_task() {
                let message = task
                    .error
                    .as_ref()
                    .map(|fault| fault.message.clone())
                    .unwrap_or_else(|| "import task failed".to_string());
                return Err(UploadError::ImportFailed(message));
            }

            if ready(&entity) {
                return Ok(entity);
            }

            if started.elapsed() >= self.link_deadline {
                return Err(UploadError::LinkTimeout(self.link_deadline));
            }
            debug!(href, "waiting for upload links");
            sleep(self.poll_interval).await;
        }
    }

    /// Starts the coordinator in the background and assembles the handle.
    fn launch(
        &self,
        descriptor: PackageDescriptor,
        ready: Prepared,
        local_dir: PathBuf,
        piece_size: u64,
        cleanup_dir: Option<PathBuf>,
    ) -> UploadHandle {
        let progress = Arc::new(ProgressCell::new());
        let errors = Arc::new(ErrorSlot::new());
        let cancel = CancellationToken::new();

        let mut coordinator = PackageTransfer::new(
            Arc::clone(&self.transport),
            descriptor,
            ready.targets,
            local_dir,
            piece_size,
            Arc::clone(&progress),
            cancel.clone(),
        );
        if let Some(dir) = cleanup_dir {
            coordinator = coordinator.with_cleanup_dir(dir);
        }

        let transport = Arc::clone(&self.transport);
        let entity = ready.entity;
        let slot = Arc::clone(&errors);
        let poll = self.poll_interval;
        let join = tokio::spawn(async move {
            if let Err(err) = coordinator.run().await {
                error!(item = %entity.name, error = %err, "background transfer failed");
                cancel_entity_tasks(&transport, &entity, poll).await;
                slot.set(err.into());
            }
        });

        UploadHandle {
            task: Task::new(Arc::clone(&self.transport), ready.task),
            progress,
            errors,
            cancel,
            join,
        }
    }

    async fn run_cleanup(&self, entity: &UploadEntity) {
        cancel_entity_tasks(&self.transport, entity, self.poll_interval).await;
    }
}

/// Locates the OVF descriptor inside an unpacked package directory.
fn find_descriptor(dir: &Path) -> Result<PathBuf, UploadError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "ovf") {
            return Ok(path);
        }
    }
    Err(UploadError::MissingDescriptor(dir.to_path_buf()))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn package_params_xml(name: &str, description: &str) -> String {
    format!(
        r#"<UploadPackageParams name="{}"><Description>{}</Description></UploadPackageParams>"#,
        escape(name),
        escape(description)
    )
}

fn media_params_xml(name: &str, size: u64, description: &str) -> String {
    format!(
        r#"<Media name="{}" imageType="iso" size="{size}"><Description>{}</Description></Media>"#,
        escape(name),
        escape(description)
    )
}
