//! Core domain types for genstream
//!
//! These types describe one generation attempt as it moves through the
//! pipeline: the wire format the model picked, the manifest it declared,
//! per-file progress while text streams in, and the outcome of recovery once
//! the stream ends.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Wire format** | The textual convention the model used to encode files and the manifest |
//! | **Plan** | The declared files to create, update, and delete for one attempt |
//! | **Batch** | One model call; a generation may span several via continuation |
//! | **Boundary** | Where a file's content starts and ends inside the response text |

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Files keyed by path. Sorted so that outputs are deterministic.
pub type FileMap = BTreeMap<String, String>;

/// Insertion-ordered set of paths.
pub type PathSet = IndexSet<String>;

// ============================================
// Wire format
// ============================================

/// Textual convention a response is encoded in.
///
/// Set once per stream and never downgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `// PLAN: {..}` comment line followed by a flat `{"path": "content"}` object
    LegacyCommentPlan,
    /// Single JSON document with `manifest` and `files` sections
    ManifestV2,
    /// `<!-- FILE: path -->` / `<!-- /FILE: path -->` blocks
    DelimiterMarker,
    /// `// path` header lines followed by raw content
    BareComment,
    /// Not classified yet
    #[default]
    Unknown,
}

impl WireFormat {
    /// Returns the identifier used in config and CLI flags
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::LegacyCommentPlan => "legacy",
            WireFormat::ManifestV2 => "v2",
            WireFormat::DelimiterMarker => "marker",
            WireFormat::BareComment => "bare",
            WireFormat::Unknown => "unknown",
        }
    }

    /// File contents are JSON string literals
    pub fn is_json(&self) -> bool {
        matches!(self, WireFormat::LegacyCommentPlan | WireFormat::ManifestV2)
    }

    /// The plan is built from file headers rather than a declared manifest
    pub fn plan_is_inferred(&self) -> bool {
        matches!(self, WireFormat::BareComment)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, WireFormat::Unknown)
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(WireFormat::LegacyCommentPlan),
            "v2" => Ok(WireFormat::ManifestV2),
            "marker" => Ok(WireFormat::DelimiterMarker),
            "bare" => Ok(WireFormat::BareComment),
            "unknown" => Ok(WireFormat::Unknown),
            _ => Err(format!("unknown wire format: {}", s)),
        }
    }
}

// ============================================
// Plan
// ============================================

/// The manifest declared for one generation attempt.
///
/// `completed` is always a subset of `to_create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePlan {
    /// Files to create or update, in declaration order
    pub to_create: PathSet,
    /// Subset of `to_create` the model declared as updates
    pub to_update: PathSet,
    /// Files to delete
    pub to_delete: PathSet,
    /// Declared total, or derived from the arrays when missing
    pub total_count: usize,
    /// Files whose content has fully arrived
    pub completed: PathSet,
    /// Size hints by path
    pub expected_line_counts: HashMap<String, usize>,
}

impl FilePlan {
    /// Build a plan from manifest arrays, unioning creates and updates.
    pub fn from_manifest<I, J, K>(create: I, update: J, delete: K, total: Option<usize>) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
        K: IntoIterator<Item = String>,
    {
        let mut plan = FilePlan::default();
        for path in create {
            plan.to_create.insert(path);
        }
        for path in update {
            plan.to_create.insert(path.clone());
            plan.to_update.insert(path);
        }
        for path in delete {
            plan.to_delete.insert(path);
        }
        let derived = plan.to_create.len() + plan.to_delete.len();
        plan.total_count = total.filter(|t| *t > 0).unwrap_or(derived);
        plan
    }

    /// Add a path discovered in the text to an inferred plan.
    ///
    /// Returns `true` if the path was new.
    pub fn add_inferred(&mut self, path: &str) -> bool {
        let added = self.to_create.insert(path.to_string());
        if added {
            self.total_count = self.total_count.max(self.to_create.len() + self.to_delete.len());
        }
        added
    }

    /// Record a file as complete. Paths outside `to_create` are ignored.
    pub fn mark_completed(&mut self, path: &str) -> bool {
        if self.to_create.contains(path) {
            self.completed.insert(path.to_string())
        } else {
            false
        }
    }

    /// Expected line count for a path, or `default` without a hint
    pub fn expected_lines(&self, path: &str, default: usize) -> usize {
        self.expected_line_counts
            .get(path)
            .copied()
            .filter(|n| *n > 0)
            .unwrap_or(default)
    }

    /// Planned files not yet completed, in plan order
    pub fn remaining(&self) -> Vec<String> {
        self.to_create
            .iter()
            .filter(|p| !self.completed.contains(*p))
            .cloned()
            .collect()
    }

    /// Position of a path in plan order (creates first, then deletes)
    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.to_create.get_index_of(path).or_else(|| {
            self.to_delete
                .get_index_of(path)
                .map(|i| i + self.to_create.len())
        })
    }

    pub fn action_for(&self, path: &str) -> FileAction {
        if self.to_delete.contains(path) {
            FileAction::Delete
        } else if self.to_update.contains(path) {
            FileAction::Update
        } else {
            FileAction::Create
        }
    }
}

// ============================================
// Progress
// ============================================

/// What the plan intends to do with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Update,
    Delete,
}

/// Per-file stream status. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Streaming,
    Complete,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Streaming => "streaming",
            FileStatus::Complete => "complete",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable progress for one planned file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    pub path: String,
    pub action: FileAction,
    pub expected_lines: usize,
    pub received_chars: usize,
    /// 0..=100; 100 only once `status` is Complete
    pub percent: u8,
    pub status: FileStatus,
}

// ============================================
// Stream input and output
// ============================================

/// Why the model stopped sending text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal end of stream
    #[default]
    Stop,
    /// Output length limit reached
    Length,
}

/// One item delivered by the model transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    End(FinishReason),
}

/// Non-fatal conditions noticed along the way
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// The caller expected one format and the detector settled on another
    FormatMismatch {
        expected: WireFormat,
        detected: WireFormat,
    },
    /// No manifest was parsed by stream end
    PlanNotFound,
    /// A planned file's closing boundary never arrived
    TruncatedFile { path: String },
    /// Recovery produced nothing while the project already has files
    MergeConflictRisk { existing_files: usize },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::FormatMismatch { expected, detected } => {
                write!(f, "expected {} format, model used {}", expected, detected)
            }
            PipelineWarning::PlanNotFound => write!(f, "no file plan found in response"),
            PipelineWarning::TruncatedFile { path } => write!(f, "{} was cut off", path),
            PipelineWarning::MergeConflictRisk { existing_files } => write!(
                f,
                "nothing recovered; keeping {} existing file(s) untouched",
                existing_files
            ),
        }
    }
}

/// Terminal summary of one stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamingResult {
    pub full_text: String,
    pub chunk_count: usize,
    pub detected_files: PathSet,
    pub plan: Option<FilePlan>,
    pub format: WireFormat,
    pub finish_reason: FinishReason,
    pub warnings: Vec<PipelineWarning>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ============================================
// Recovery
// ============================================

/// Batch bookkeeping handed from recovery to the continuation controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub total_planned: usize,
    pub files_this_batch: PathSet,
    pub completed_files: PathSet,
    pub remaining_files: PathSet,
    pub batch_index: usize,
    pub total_batches: usize,
    pub is_complete: bool,
}

/// Result of one Truncation Analyzer run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Nothing usable
    None,
    /// Some files arrived, others must be requested again
    Continuation { meta: GenerationMeta, files: FileMap },
    /// Every planned file arrived intact
    Success { files: FileMap },
    /// Best-effort files; `missing` lists planned files still absent
    Partial { files: FileMap, missing: Vec<String> },
}

impl RecoveryOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryOutcome::None => "none",
            RecoveryOutcome::Continuation { .. } => "continuation",
            RecoveryOutcome::Success { .. } => "success",
            RecoveryOutcome::Partial { .. } => "partial",
        }
    }

    /// Files carried by this outcome, if any
    pub fn files(&self) -> Option<&FileMap> {
        match self {
            RecoveryOutcome::None => None,
            RecoveryOutcome::Continuation { files, .. }
            | RecoveryOutcome::Success { files }
            | RecoveryOutcome::Partial { files, .. } => Some(files),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files().map(|f| f.len()).unwrap_or(0)
    }
}

/// Merge `incoming` into `existing` by path.
///
/// Incoming files overwrite same-path entries; nothing in `existing` is ever
/// removed. An empty `incoming` leaves `existing` untouched. Returns the
/// number of paths written.
pub fn merge_files(existing: &mut FileMap, incoming: &FileMap) -> usize {
    let mut written = 0;
    for (path, content) in incoming {
        if content.is_empty() && existing.get(path).is_some_and(|c| !c.is_empty()) {
            tracing::warn!(path = %path, "Refusing to blank an existing file");
            continue;
        }
        existing.insert(path.clone(), content.clone());
        written += 1;
    }
    written
}
