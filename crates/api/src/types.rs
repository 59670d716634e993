//! Minimal XML wire types for the task and upload surface.
//!
//! Only the elements and attributes the polling and upload machinery read
//! are modeled; unknown parts of a response document are ignored.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::ApiError;

/// Relation value of an upload target link.
pub const REL_UPLOAD: &str = "upload:default";

/// Deserializes an XML document into `T`.
pub fn parse<T: DeserializeOwned>(xml: &str) -> Result<T, ApiError> {
    Ok(quick_xml::de::from_str(xml)?)
}

/// Execution state reported by the server for an asynchronous task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "preRunning")]
    PreRunning,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

impl TaskStatus {
    /// Returns `true` once the task can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }
}

/// Structured fault attached to a failed task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFault {
    #[serde(rename = "@majorErrorCode", default)]
    pub major_error_code: i32,
    #[serde(rename = "@minorErrorCode", default)]
    pub minor_error_code: String,
    #[serde(rename = "@message", default)]
    pub message: String,
}

/// Reference to another entity (task owner, container item).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reference {
    #[serde(rename = "@href", default)]
    pub href: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(rename = "@name", default)]
    pub name: String,
}

/// Wire representation of a server-side asynchronous task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskBody {
    #[serde(rename = "@href", default)]
    pub href: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "@operation", default)]
    pub operation: String,
    #[serde(rename = "@status")]
    pub status: TaskStatus,
    /// Server-reported completion percentage (0–100).
    #[serde(rename = "Progress", default)]
    pub progress: i32,
    #[serde(rename = "Error")]
    pub error: Option<TaskFault>,
    #[serde(rename = "Owner")]
    pub owner: Option<Reference>,
}

/// Link element exposed under an entity's file list.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    #[serde(rename = "@rel", default)]
    pub rel: String,
    #[serde(rename = "@href", default)]
    pub href: String,
}

/// One file slot of a provisional entity.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFile {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "@size", default)]
    pub size: u64,
    /// Bytes the server has already received for this file.
    #[serde(rename = "@bytesTransferred", default)]
    pub bytes_transferred: u64,
    #[serde(rename = "Link", default)]
    pub links: Vec<Link>,
}

impl UploadFile {
    /// Returns the upload target href, once the server exposes it.
    pub fn upload_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == REL_UPLOAD)
            .map(|link| link.href.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileList {
    #[serde(rename = "File", default)]
    pub file: Vec<UploadFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskList {
    #[serde(rename = "Task", default)]
    pub task: Vec<TaskBody>,
}

/// Partially initialized entity returned by a create call.
///
/// Polled until the server populates upload links under `Files` and lists
/// the import task under `Tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadEntity {
    #[serde(rename = "@href", default)]
    pub href: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "Files", default)]
    pub files: FileList,
    #[serde(rename = "Tasks", default)]
    pub tasks: TaskList,
}

impl UploadEntity {
    /// Looks up a file slot by its declared name.
    pub fn file(&self, name: &str) -> Option<&UploadFile> {
        self.files.file.iter().find(|f| f.name == name)
    }

    /// Upload link for a named file, if exposed.
    pub fn upload_link_for(&self, name: &str) -> Option<&str> {
        self.file(name).and_then(UploadFile::upload_link)
    }

    /// First file slot that already carries an upload link.
    pub fn first_upload_file(&self) -> Option<&UploadFile> {
        self.files.file.iter().find(|f| f.upload_link().is_some())
    }

    /// Number of file slots with an exposed upload link.
    pub fn upload_link_count(&self) -> usize {
        self.files
            .file
            .iter()
            .filter(|f| f.upload_link().is_some())
            .count()
    }

    /// First task already in the error state, if any.
    pub fn error_task(&self) -> Option<&TaskBody> {
        self.tasks
            .task
            .iter()
            .find(|t| t.status == TaskStatus::Error)
    }
}

/// Target container for new items, with its existing item references.
#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    #[serde(rename = "@href", default)]
    pub href: String,
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "Items", default)]
    pub items: ItemList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemList {
    #[serde(rename = "Item", default)]
    pub item: Vec<Reference>,
}

impl Container {
    /// Returns `true` when an item with `name` already exists.
    pub fn contains_item(&self, name: &str) -> bool {
        self.items.item.iter().any(|item| item.name == name)
    }
}
