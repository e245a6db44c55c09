//! Row types for the catalog store.

#![allow(dead_code)]

/// Bounding box of a detected face, in photo pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }
}

/// A photo file in the library.
///
/// Immutable after insertion except for `checksum`.
#[derive(Debug, Clone)]
pub struct Photo {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub folder_path: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub exif_date: Option<String>,
    pub scan_date: String,
    pub checksum: Option<String>,
}

/// A detected face within one photo.
#[derive(Debug, Clone)]
pub struct Face {
    pub id: i64,
    pub photo_id: i64,
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub cluster_id: Option<i64>,
    pub person_id: Option<i64>,
    pub confidence: f32,
}

impl Face {
    pub fn is_clustered(&self) -> bool {
        self.cluster_id.is_some()
    }

    pub fn is_identified(&self) -> bool {
        self.person_id.is_some()
    }
}

/// A group of faces believed to depict one person.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: i64,
    /// Mean of the member faces' embeddings. Empty only transiently,
    /// before the first assignment.
    pub centroid: Vec<f32>,
    pub face_count: i64,
    pub created_date: String,
    pub person_id: Option<i64>,
}

impl Cluster {
    pub fn is_identified(&self) -> bool {
        self.person_id.is_some()
    }
}

/// A user-identified identity.
#[derive(Debug, Clone)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub created_date: String,
    pub notes: Option<String>,
}

/// Status of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "cancelled" => Some(ScanStatus::Cancelled),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }
}

/// Durable record of one pipeline run.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: i64,
    pub root_path: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub status: ScanStatus,
    pub total_files: i64,
    pub processed_files: i64,
    pub total_faces: i64,
}

/// Per-cluster summary for display.
#[derive(Debug, Clone)]
pub struct ClusterSummary {
    pub cluster_id: i64,
    pub person_id: Option<i64>,
    pub person_name: Option<String>,
    pub face_count: i64,
    /// Distinct photos across the cluster's faces.
    pub photo_count: i64,
    pub representative_face_id: Option<i64>,
}
