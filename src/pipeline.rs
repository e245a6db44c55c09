//! Pipeline coordinator: scan, index, cluster.
//!
//! The coordinator thread sequences the stages; each stage runs on its own
//! worker thread and reports typed events back over a channel, in the order
//! they occurred. One cancel flag is shared by every stage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use crate::clusterer::Clusterer;
use crate::config::Config;
use crate::db::{Database, ScanStatus};
use crate::error::{CatalogError, Result};
use crate::indexer::{IndexOutcome, Indexer, ThumbnailWriter};
use crate::recognizer::{FaceRecognizer, ImageDecoder};
use crate::scanner::Scanner;

/// Progress events emitted while the pipeline runs, in occurrence order.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ScanStarted {
        root: PathBuf,
    },
    FileFound {
        count: usize,
        directory: PathBuf,
        file_name: String,
    },
    ScanError {
        path: PathBuf,
        message: String,
    },
    ScanFinished {
        total: usize,
    },
    IndexProgress {
        current: usize,
        total: usize,
        path: PathBuf,
        faces_found: usize,
    },
    ClusterProgress {
        done: usize,
        total: usize,
    },
    Finished {
        status: ScanStatus,
    },
}

/// Which clustering pass to run after indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    /// Fold new faces into existing clusters.
    Incremental,
    /// Rebuild every cluster from scratch.
    Full,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOutcome {
    pub scan_id: i64,
    pub status: ScanStatus,
    pub files_found: usize,
    pub index: IndexOutcome,
    /// Clusters built (full mode) or faces assigned (incremental mode).
    pub clustered: usize,
}

/// Run the full pipeline over `root`. Consumes the database for the
/// duration of the run; stage workers own it one at a time.
pub fn run<R, D>(
    db: Database,
    recognizer: &R,
    decoder: &D,
    root: &Path,
    config: &Config,
    mode: ClusterMode,
    events: Sender<PipelineEvent>,
    cancel: Arc<AtomicBool>,
) -> Result<PipelineOutcome>
where
    R: FaceRecognizer + Sync,
    D: ImageDecoder + Sync,
{
    if !root.is_dir() {
        return Err(CatalogError::InvalidInput(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let scan_id = db.create_scan(&root.to_string_lossy())?;
    let _ = events.send(PipelineEvent::ScanStarted {
        root: root.to_path_buf(),
    });

    // Stage 1: discovery.
    let scanner = Scanner::new(&config.scanner).with_cancel(cancel.clone());
    let paths = {
        let tx = events.clone();
        thread::scope(|s| {
            s.spawn(move || {
                let mut progress = |count: usize, directory: &Path, file_name: &str| {
                    let _ = tx.send(PipelineEvent::FileFound {
                        count,
                        directory: directory.to_path_buf(),
                        file_name: file_name.to_string(),
                    });
                };
                let mut on_error = |path: &Path, message: &str| {
                    tracing::warn!(path = %path.display(), message, "scan error");
                    let _ = tx.send(PipelineEvent::ScanError {
                        path: path.to_path_buf(),
                        message: message.to_string(),
                    });
                };
                scanner.scan(root, Some(&mut progress), Some(&mut on_error))
            })
            .join()
            .expect("scanner worker panicked")
        })
    };
    let files_found = paths.len();
    let _ = events.send(PipelineEvent::ScanFinished { total: files_found });
    db.update_scan_progress(scan_id, files_found as i64, 0, 0)?;

    if cancel.load(Ordering::SeqCst) {
        return finish(db, &events, scan_id, files_found, IndexOutcome::default(), 0, ScanStatus::Cancelled);
    }

    // Stage 2: indexing. The worker owns the database and hands it back.
    let (db, index_result) = {
        let tx = events.clone();
        let thumbnails = ThumbnailWriter::new(config.thumbnails.path.clone(), config.thumbnails.size);
        let batch_size = config.indexer.batch_size;
        let worker_cancel = cancel.clone();
        thread::scope(|s| {
            s.spawn(move || {
                let indexer = Indexer::new(&db, recognizer, decoder, thumbnails, batch_size)
                    .with_scan_session(scan_id)
                    .with_cancel(worker_cancel);
                let mut progress = |current: usize, total: usize, path: &Path, faces: usize| {
                    let _ = tx.send(PipelineEvent::IndexProgress {
                        current,
                        total,
                        path: path.to_path_buf(),
                        faces_found: faces,
                    });
                };
                let result = indexer.index(&paths, Some(&mut progress));
                (db, result)
            })
            .join()
            .expect("indexer worker panicked")
        })
    };
    let index_outcome = match index_result {
        Ok(outcome) => outcome,
        Err(CatalogError::Cancelled) => {
            return finish(db, &events, scan_id, files_found, IndexOutcome::default(), 0, ScanStatus::Cancelled);
        }
        Err(e) => {
            let _ = db.finish_scan(scan_id, ScanStatus::Failed);
            return Err(e);
        }
    };

    // Stage 3: clustering.
    let (db, cluster_result) = {
        let tx = events.clone();
        let threshold = config.clusterer.distance_threshold;
        let min_cluster_size = config.clusterer.min_cluster_size;
        let worker_cancel = cancel.clone();
        thread::scope(|s| {
            s.spawn(move || {
                let clusterer = Clusterer::new(&db, threshold, min_cluster_size)
                    .with_cancel(worker_cancel);
                let mut progress = |done: usize, total: usize| {
                    let _ = tx.send(PipelineEvent::ClusterProgress { done, total });
                };
                let result = match mode {
                    ClusterMode::Incremental => clusterer.cluster_new_faces(Some(&mut progress)),
                    ClusterMode::Full => clusterer.cluster_all(Some(&mut progress)),
                };
                (db, result)
            })
            .join()
            .expect("clusterer worker panicked")
        })
    };
    let clustered = match cluster_result {
        Ok(count) => count,
        Err(CatalogError::Cancelled) => {
            return finish(db, &events, scan_id, files_found, index_outcome, 0, ScanStatus::Cancelled);
        }
        Err(e) => {
            let _ = db.finish_scan(scan_id, ScanStatus::Failed);
            return Err(e);
        }
    };

    finish(db, &events, scan_id, files_found, index_outcome, clustered, ScanStatus::Completed)
}

fn finish(
    db: Database,
    events: &Sender<PipelineEvent>,
    scan_id: i64,
    files_found: usize,
    index: IndexOutcome,
    clustered: usize,
    status: ScanStatus,
) -> Result<PipelineOutcome> {
    db.finish_scan(scan_id, status)?;
    let _ = events.send(PipelineEvent::Finished { status });
    Ok(PipelineOutcome {
        scan_id,
        status,
        files_found,
        index,
        clustered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BoundingBox;
    use crate::embedding::EMBEDDING_DIM;
    use crate::recognizer::{FaceDetection, Image};
    use std::sync::mpsc;
    use tempfile::tempdir;

    struct StubDecoder;

    impl ImageDecoder for StubDecoder {
        fn decode(&self, _path: &Path) -> crate::error::Result<Image> {
            Ok(Image {
                width: 64,
                height: 64,
                data: vec![100u8; 64 * 64 * 3],
            })
        }
    }

    /// Emits a different embedding per call so every photo gets a
    /// distinguishable face.
    struct StubRecognizer {
        counter: std::sync::atomic::AtomicUsize,
    }

    impl FaceRecognizer for StubRecognizer {
        fn detect(&self, _image: &Image) -> crate::error::Result<Vec<FaceDetection>> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let mut embedding = vec![0.0f32; EMBEDDING_DIM];
            embedding[0] = n as f32 * 0.1;
            Ok(vec![FaceDetection {
                bbox: BoundingBox {
                    x: 8,
                    y: 8,
                    width: 24,
                    height: 24,
                },
                confidence: 0.9,
                embedding,
                landmarks: Vec::new(),
            }])
        }
    }

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.thumbnails.path = dir.join("thumbs");
        config
    }

    #[test]
    fn test_full_pipeline_end_to_end() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("library");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.jpg"), b"fake a").unwrap();
        std::fs::write(root.join("b.jpg"), b"fake b").unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let recognizer = StubRecognizer {
            counter: std::sync::atomic::AtomicUsize::new(0),
        };
        let (tx, rx) = mpsc::channel();
        let outcome = run(
            db,
            &recognizer,
            &StubDecoder,
            &root,
            &test_config(dir.path()),
            ClusterMode::Incremental,
            tx,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_eq!(outcome.status, ScanStatus::Completed);
        assert_eq!(outcome.files_found, 2);
        assert_eq!(outcome.index.processed, 2);
        assert_eq!(outcome.index.faces_found, 2);
        // Both new faces went through the incremental pass.
        assert_eq!(outcome.clustered, 2);

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(PipelineEvent::ScanStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::Finished {
                status: ScanStatus::Completed
            })
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::ScanFinished { total: 2 })));
    }

    #[test]
    fn test_pipeline_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let recognizer = StubRecognizer {
            counter: std::sync::atomic::AtomicUsize::new(0),
        };
        let (tx, _rx) = mpsc::channel();
        let err = run(
            db,
            &recognizer,
            &StubDecoder,
            &dir.path().join("missing"),
            &test_config(dir.path()),
            ClusterMode::Incremental,
            tx,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput(_)));
    }

    #[test]
    fn test_pre_cancelled_pipeline_records_cancelled_scan() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("library");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.jpg"), b"fake a").unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let recognizer = StubRecognizer {
            counter: std::sync::atomic::AtomicUsize::new(0),
        };
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = run(
            db,
            &recognizer,
            &StubDecoder,
            &root,
            &test_config(dir.path()),
            ClusterMode::Incremental,
            tx,
            cancel,
        )
        .unwrap();

        assert_eq!(outcome.status, ScanStatus::Cancelled);
        assert_eq!(outcome.index.processed, 0);
        assert!(matches!(
            rx.try_iter().last(),
            Some(PipelineEvent::Finished {
                status: ScanStatus::Cancelled
            })
        ));
    }
}
