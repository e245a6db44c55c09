//! Grouping faces into person clusters by embedding distance.
//!
//! Two clustering modes share one distance threshold `T`:
//! a batch pass (`cluster_all`) that rebuilds every cluster with
//! single-linkage agglomerative merging of nearest centroids, and an
//! incremental pass (`cluster_new_faces`) that folds unclustered faces into
//! the existing clusters one at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::db::{timestamp_now, Cluster, ClusterSummary, Database, Face};
use crate::embedding::{centroid, distance};
use crate::error::{CatalogError, Result};

pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MERGE_SUGGESTION_THRESHOLD: f32 = 0.7;

/// Invoked per merge (batch) or per face (incremental): (done, total).
pub type ClusterProgress<'a> = dyn FnMut(usize, usize) + 'a;

pub struct Clusterer<'a> {
    db: &'a Database,
    threshold: f32,
    min_cluster_size: usize,
    cancel: Arc<AtomicBool>,
}

/// In-memory cluster used during the batch pass.
struct WorkingCluster {
    face_ids: Vec<i64>,
    embeddings: Vec<Vec<f32>>,
    centroid: Vec<f32>,
}

impl WorkingCluster {
    fn seed(face: &Face) -> Self {
        Self {
            face_ids: vec![face.id],
            embeddings: vec![face.embedding.clone()],
            centroid: face.embedding.clone(),
        }
    }

    fn absorb(&mut self, other: WorkingCluster) {
        self.face_ids.extend(other.face_ids);
        self.embeddings.extend(other.embeddings);
        // Mean over all member embeddings, not a weighted average of the
        // two old centroids.
        self.centroid = centroid(self.embeddings.iter().map(Vec::as_slice))
            .expect("merged cluster is never empty");
    }
}

impl<'a> Clusterer<'a> {
    pub fn new(db: &'a Database, threshold: f32, min_cluster_size: usize) -> Self {
        Self {
            db,
            threshold,
            min_cluster_size: min_cluster_size.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Share a cancellation flag owned by the caller.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    // ========================================================================
    // Batch clustering
    // ========================================================================

    /// Re-cluster every face with an embedding, replacing all existing
    /// clusters. Returns the number of clusters persisted.
    pub fn cluster_all(&self, mut progress: Option<&mut ClusterProgress>) -> Result<usize> {
        let faces = self.db.all_faces_with_embeddings()?;
        let initial = faces.len();
        let mut working: Vec<WorkingCluster> = faces.iter().map(WorkingCluster::seed).collect();
        tracing::info!(faces = initial, threshold = self.threshold, "batch clustering");

        let mut merges = 0usize;
        while working.len() > 1 {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(CatalogError::Cancelled);
            }

            // First minimum in (i outer, j inner) scan order; the strict
            // comparison makes ties resolve to smallest i, then smallest j.
            let mut best: Option<(usize, usize, f32)> = None;
            for i in 0..working.len() {
                for j in (i + 1)..working.len() {
                    let d = distance(&working[i].centroid, &working[j].centroid)?;
                    if best.map_or(true, |(_, _, bd)| d < bd) {
                        best = Some((i, j, d));
                    }
                }
            }
            let (i, j, d) = match best {
                Some(found) => found,
                None => break,
            };
            if d > self.threshold {
                break;
            }

            let absorbed = working.remove(j);
            working[i].absorb(absorbed);
            merges += 1;
            if let Some(cb) = progress.as_mut() {
                cb(merges, initial);
            }
        }

        self.db.begin_transaction()?;
        match self.persist_batch(&working) {
            Ok(count) => {
                self.db.commit()?;
                tracing::info!(clusters = count, merges, "batch clustering complete");
                Ok(count)
            }
            Err(e) => {
                let _ = self.db.rollback();
                Err(e)
            }
        }
    }

    fn persist_batch(&self, working: &[WorkingCluster]) -> Result<usize> {
        // A full re-cluster replaces whatever grouping existed before.
        // Identifications hang off clusters, so member faces lose their
        // person_id along with the cluster that carried it.
        for cluster in self.db.all_clusters()? {
            for face in self.db.faces_for_cluster(cluster.id)? {
                if face.person_id.is_some() {
                    self.db.set_face_person(face.id, None)?;
                }
            }
            self.db.delete_cluster(cluster.id)?;
        }

        let mut count = 0usize;
        for w in working {
            if w.face_ids.len() < self.min_cluster_size {
                continue;
            }
            let cluster_id = self.db.insert_cluster(&Cluster {
                id: 0,
                centroid: w.centroid.clone(),
                face_count: w.face_ids.len() as i64,
                created_date: timestamp_now(),
                person_id: None,
            })?;
            for &face_id in &w.face_ids {
                self.db.set_face_cluster(face_id, Some(cluster_id))?;
            }
            count += 1;
        }
        Ok(count)
    }

    // ========================================================================
    // Incremental clustering
    // ========================================================================

    /// Assign every unclustered face to its nearest cluster (within the
    /// threshold) or to a fresh one. Runs as a single transaction.
    /// Returns the number of faces assigned.
    pub fn cluster_new_faces(&self, mut progress: Option<&mut ClusterProgress>) -> Result<usize> {
        let faces = self.db.unclustered_faces()?;
        if faces.is_empty() {
            return Ok(0);
        }
        let total = faces.len();
        tracing::info!(faces = total, "incremental clustering");

        self.db.begin_transaction()?;
        match self.assign_new_faces(&faces, &mut progress) {
            Ok(assigned) => {
                self.db.commit()?;
                Ok(assigned)
            }
            Err(e) => {
                let _ = self.db.rollback();
                Err(e)
            }
        }
    }

    fn assign_new_faces(
        &self,
        faces: &[Face],
        progress: &mut Option<&mut ClusterProgress>,
    ) -> Result<usize> {
        // Working list of (id, centroid), appended to as clusters are born.
        let mut clusters: Vec<(i64, Vec<f32>)> = self
            .db
            .all_clusters()?
            .into_iter()
            .filter(|c| !c.centroid.is_empty())
            .map(|c| (c.id, c.centroid))
            .collect();

        for (i, face) in faces.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(CatalogError::Cancelled);
            }

            let mut nearest: Option<(usize, f32)> = None;
            for (idx, (_, c)) in clusters.iter().enumerate() {
                let d = distance(&face.embedding, c)?;
                if nearest.map_or(true, |(_, bd)| d < bd) {
                    nearest = Some((idx, d));
                }
            }

            match nearest {
                Some((idx, d)) if d <= self.threshold => {
                    let cluster_id = clusters[idx].0;
                    self.db.set_face_cluster(face.id, Some(cluster_id))?;
                    let new_centroid = self.refresh_cluster(cluster_id)?;
                    clusters[idx].1 = new_centroid;
                }
                _ => {
                    let cluster_id = self.db.insert_cluster(&Cluster {
                        id: 0,
                        centroid: face.embedding.clone(),
                        face_count: 1,
                        created_date: timestamp_now(),
                        person_id: None,
                    })?;
                    self.db.set_face_cluster(face.id, Some(cluster_id))?;
                    clusters.push((cluster_id, face.embedding.clone()));
                }
            }

            if let Some(cb) = progress.as_mut() {
                cb(i + 1, faces.len());
            }
        }
        Ok(faces.len())
    }

    /// Recompute a cluster's centroid and face count from its full
    /// membership and persist both. Returns the new centroid.
    fn refresh_cluster(&self, cluster_id: i64) -> Result<Vec<f32>> {
        let members = self.db.faces_for_cluster(cluster_id)?;
        let new_centroid = centroid(members.iter().map(|f| f.embedding.as_slice()))
            .ok_or_else(|| CatalogError::InvalidState(format!("cluster {cluster_id} is empty")))?;
        self.db.set_cluster_centroid(cluster_id, &new_centroid)?;
        self.db.set_cluster_face_count(cluster_id, members.len() as i64)?;
        Ok(new_centroid)
    }

    // ========================================================================
    // Merge / split
    // ========================================================================

    /// Fold cluster `b` into cluster `a`. Returns `a`.
    pub fn merge(&self, a: i64, b: i64) -> Result<i64> {
        if a == b {
            return Ok(a);
        }
        self.require_cluster(a)?;
        self.require_cluster(b)?;

        self.db.begin_transaction()?;
        let result = (|| -> Result<i64> {
            for face in self.db.faces_for_cluster(b)? {
                self.db.set_face_cluster(face.id, Some(a))?;
            }
            self.refresh_cluster(a)?;
            self.db.delete_cluster(b)?;
            Ok(a)
        })();
        self.finish_tx(result)
    }

    /// Move the listed faces out of `source` into a new cluster.
    /// Returns the new cluster's id.
    pub fn split(&self, source: i64, face_ids: &[i64]) -> Result<i64> {
        if face_ids.is_empty() {
            return Err(CatalogError::InvalidInput(
                "split requires at least one face".to_string(),
            ));
        }
        self.require_cluster(source)?;

        self.db.begin_transaction()?;
        let result = (|| -> Result<i64> {
            let mut embeddings = Vec::with_capacity(face_ids.len());
            for &face_id in face_ids {
                let face = self
                    .db
                    .get_face(face_id)?
                    .ok_or_else(|| CatalogError::NotFound(format!("face {face_id}")))?;
                embeddings.push(face.embedding);
            }
            let new_centroid = centroid(embeddings.iter().map(Vec::as_slice))
                .expect("face_ids is non-empty");

            let new_id = self.db.insert_cluster(&Cluster {
                id: 0,
                centroid: new_centroid,
                face_count: face_ids.len() as i64,
                created_date: timestamp_now(),
                person_id: None,
            })?;
            for &face_id in face_ids {
                self.db.set_face_cluster(face_id, Some(new_id))?;
            }

            if self.db.faces_for_cluster(source)?.is_empty() {
                self.db.delete_cluster(source)?;
            } else {
                self.refresh_cluster(source)?;
            }
            Ok(new_id)
        })();
        self.finish_tx(result)
    }

    // ========================================================================
    // Person assignment
    // ========================================================================

    /// Identify a cluster: stamp the person onto the cluster row and onto
    /// every member face, in one transaction.
    pub fn assign_person(&self, cluster_id: i64, person_id: i64) -> Result<()> {
        self.require_cluster(cluster_id)?;
        self.db
            .get_person(person_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("person {person_id}")))?;

        self.db.begin_transaction()?;
        let result = (|| -> Result<()> {
            for face in self.db.faces_for_cluster(cluster_id)? {
                self.db.set_face_person(face.id, Some(person_id))?;
            }
            self.db.set_cluster_person(cluster_id, Some(person_id))?;
            Ok(())
        })();
        self.finish_tx(result)
    }

    /// Remove the identification from a cluster and all its faces.
    pub fn unassign_person(&self, cluster_id: i64) -> Result<()> {
        self.require_cluster(cluster_id)?;

        self.db.begin_transaction()?;
        let result = (|| -> Result<()> {
            for face in self.db.faces_for_cluster(cluster_id)? {
                self.db.set_face_person(face.id, None)?;
            }
            self.db.set_cluster_person(cluster_id, None)?;
            Ok(())
        })();
        self.finish_tx(result)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The member face closest to the cluster centroid; ties go to the
    /// smallest face id. `None` for an empty cluster or one without a
    /// centroid.
    pub fn representative(&self, cluster_id: i64) -> Result<Option<Face>> {
        let cluster = self.require_cluster(cluster_id)?;
        if cluster.centroid.is_empty() {
            return Ok(None);
        }
        let faces = self.db.faces_for_cluster(cluster_id)?;

        let mut best: Option<(f32, Face)> = None;
        // Faces arrive ordered by id, so a strict comparison keeps the
        // smallest id on equal distances.
        for face in faces {
            let d = distance(&face.embedding, &cluster.centroid)?;
            if best.as_ref().map_or(true, |(bd, _)| d < *bd) {
                best = Some((d, face));
            }
        }
        Ok(best.map(|(_, face)| face))
    }

    /// Cluster pairs whose centroids lie within `(threshold, upper]`,
    /// candidates for a manual merge. Each pair appears once with `a < b`.
    pub fn merge_suggestions(&self, upper: f32) -> Result<Vec<(i64, i64)>> {
        let clusters: Vec<Cluster> = self
            .db
            .all_clusters()?
            .into_iter()
            .filter(|c| !c.centroid.is_empty())
            .collect();

        let mut pairs = Vec::new();
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let d = distance(&clusters[i].centroid, &clusters[j].centroid)?;
                if d > self.threshold && d <= upper {
                    pairs.push((clusters[i].id, clusters[j].id));
                }
            }
        }
        Ok(pairs)
    }

    /// Per-cluster display summaries.
    pub fn stats(&self) -> Result<Vec<ClusterSummary>> {
        let mut summaries = Vec::new();
        for cluster in self.db.all_clusters()? {
            let faces = self.db.faces_for_cluster(cluster.id)?;
            let photo_ids: HashSet<i64> = faces.iter().map(|f| f.photo_id).collect();
            let person_name = match cluster.person_id {
                Some(person_id) => self.db.get_person(person_id)?.map(|p| p.name),
                None => None,
            };
            let representative_face_id = self.representative(cluster.id)?.map(|f| f.id);
            summaries.push(ClusterSummary {
                cluster_id: cluster.id,
                person_id: cluster.person_id,
                person_name,
                face_count: faces.len() as i64,
                photo_count: photo_ids.len() as i64,
                representative_face_id,
            });
        }
        Ok(summaries)
    }

    fn require_cluster(&self, cluster_id: i64) -> Result<Cluster> {
        self.db
            .get_cluster(cluster_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("cluster {cluster_id}")))
    }

    fn finish_tx<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.db.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.db.rollback();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BoundingBox, Photo};
    use crate::embedding::EMBEDDING_DIM;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn emb(seed: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = seed;
        v
    }

    fn insert_photo(db: &Database, name: &str) -> i64 {
        db.insert_photo(&Photo {
            id: 0,
            file_path: format!("/library/{name}"),
            file_name: name.to_string(),
            folder_path: "/library".to_string(),
            width: 640,
            height: 480,
            file_size: 1000,
            exif_date: None,
            scan_date: timestamp_now(),
            checksum: None,
        })
        .unwrap()
    }

    fn insert_face(db: &Database, photo_id: i64, embedding: Vec<f32>) -> i64 {
        db.insert_face(&Face {
            id: 0,
            photo_id,
            bbox: BoundingBox {
                x: 0,
                y: 0,
                width: 32,
                height: 32,
            },
            embedding,
            cluster_id: None,
            person_id: None,
            confidence: 0.9,
        })
        .unwrap()
    }

    fn clusterer(db: &Database) -> Clusterer {
        Clusterer::new(db, DEFAULT_DISTANCE_THRESHOLD, 1)
    }

    fn cluster_of(db: &Database, face_id: i64) -> i64 {
        db.get_face(face_id).unwrap().unwrap().cluster_id.unwrap()
    }

    #[test]
    fn test_batch_clustering_splits_far_groups() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        // Two tight pairs far apart: d(f1,f2)=0.3, d(f3,f4)=0.4, gap 1.2
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.3));
        let f3 = insert_face(&db, p, emb(1.2));
        let f4 = insert_face(&db, p, emb(1.6));

        let count = clusterer(&db).cluster_all(None).unwrap();
        assert_eq!(count, 2);
        assert_eq!(cluster_of(&db, f1), cluster_of(&db, f2));
        assert_eq!(cluster_of(&db, f3), cluster_of(&db, f4));
        assert_ne!(cluster_of(&db, f1), cluster_of(&db, f3));

        // Stored centroids equal the member means.
        let c1 = db.get_cluster(cluster_of(&db, f1)).unwrap().unwrap();
        assert!((c1.centroid[0] - 0.15).abs() < 1e-5);
        assert_eq!(c1.face_count, 2);
        let c2 = db.get_cluster(cluster_of(&db, f3)).unwrap().unwrap();
        assert!((c2.centroid[0] - 1.4).abs() < 1e-5);
    }

    #[test]
    fn test_batch_clustering_chains_through_neighbors() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        // 0.0 and 1.0 are too far directly, but merging pulls centroids
        // together: 0.0/0.5 merge to 0.25, then d(0.25, 1.0) = 0.75 > T.
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.5));
        let f3 = insert_face(&db, p, emb(1.0));

        let count = clusterer(&db).cluster_all(None).unwrap();
        assert_eq!(count, 2);
        assert_eq!(cluster_of(&db, f1), cluster_of(&db, f2));
        assert_ne!(cluster_of(&db, f1), cluster_of(&db, f3));
    }

    #[test]
    fn test_batch_clustering_replaces_previous_clusters() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        insert_face(&db, p, emb(0.0));
        insert_face(&db, p, emb(5.0));

        let c = clusterer(&db);
        assert_eq!(c.cluster_all(None).unwrap(), 2);
        assert_eq!(c.cluster_all(None).unwrap(), 2);
        assert_eq!(db.all_clusters().unwrap().len(), 2);
    }

    #[test]
    fn test_recluster_clears_stale_identifications() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.1));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let person = db.create_person("Ada", None).unwrap();
        c.assign_person(cluster_of(&db, f1), person).unwrap();

        c.cluster_all(None).unwrap();
        for f in [f1, f2] {
            assert_eq!(db.get_face(f).unwrap().unwrap().person_id, None);
        }
        assert!(db.faces_for_person(person).unwrap().is_empty());
        assert!(db.photos_for_person(person).unwrap().is_empty());
        // The person row itself survives for re-identification.
        assert!(db.get_person(person).unwrap().is_some());
        // The replacement cluster starts unidentified.
        let replacement = db.get_cluster(cluster_of(&db, f1)).unwrap().unwrap();
        assert!(!replacement.is_identified());
    }

    #[test]
    fn test_batch_progress_counts_merges() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        for i in 0..3 {
            insert_face(&db, p, emb(i as f32 * 0.1));
        }
        let mut events = Vec::new();
        let mut progress = |done: usize, total: usize| events.push((done, total));
        clusterer(&db).cluster_all(Some(&mut progress)).unwrap();
        assert_eq!(events, vec![(1, 3), (2, 3)]);
    }

    #[test]
    fn test_min_cluster_size_filters_singletons() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.1));
        let lone = insert_face(&db, p, emb(9.0));

        let c = Clusterer::new(&db, DEFAULT_DISTANCE_THRESHOLD, 2);
        assert_eq!(c.cluster_all(None).unwrap(), 1);
        assert!(db.get_face(f1).unwrap().unwrap().cluster_id.is_some());
        assert!(db.get_face(f2).unwrap().unwrap().cluster_id.is_some());
        assert!(db.get_face(lone).unwrap().unwrap().cluster_id.is_none());
    }

    #[test]
    fn test_incremental_absorbs_and_creates() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(0.0));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let existing = cluster_of(&db, f1);

        // One face near the existing cluster, one far away.
        let near = insert_face(&db, p, emb(0.2));
        let far = insert_face(&db, p, emb(4.0));
        let assigned = c.cluster_new_faces(None).unwrap();
        assert_eq!(assigned, 2);
        assert_eq!(cluster_of(&db, near), existing);
        assert_ne!(cluster_of(&db, far), existing);

        // Absorption recomputed the centroid from all members.
        let cluster = db.get_cluster(existing).unwrap().unwrap();
        assert!((cluster.centroid[0] - 0.1).abs() < 1e-5);
        assert_eq!(cluster.face_count, 2);
    }

    #[test]
    fn test_incremental_face_joins_cluster_created_in_same_pass() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(2.0));
        let f2 = insert_face(&db, p, emb(2.1));
        let c = clusterer(&db);
        c.cluster_new_faces(None).unwrap();
        assert_eq!(cluster_of(&db, f1), cluster_of(&db, f2));
    }

    #[test]
    fn test_incremental_with_no_new_faces_is_noop() {
        let db = test_db();
        assert_eq!(clusterer(&db).cluster_new_faces(None).unwrap(), 0);
    }

    #[test]
    fn test_merge_reassigns_and_recomputes() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let fa1 = insert_face(&db, p, emb(0.0));
        let fa2 = insert_face(&db, p, emb(0.2));
        let fb1 = insert_face(&db, p, emb(5.0));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let a = cluster_of(&db, fa1);
        let b = cluster_of(&db, fb1);

        assert_eq!(c.merge(a, b).unwrap(), a);
        assert!(db.get_cluster(b).unwrap().is_none());
        for f in [fa1, fa2, fb1] {
            assert_eq!(cluster_of(&db, f), a);
        }
        let merged = db.get_cluster(a).unwrap().unwrap();
        let expected = (0.0 + 0.2 + 5.0) / 3.0;
        assert!((merged.centroid[0] - expected).abs() < 1e-5);
        assert_eq!(merged.face_count, 3);
    }

    #[test]
    fn test_merge_same_cluster_is_noop() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f = insert_face(&db, p, emb(0.0));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let a = cluster_of(&db, f);
        assert_eq!(c.merge(a, a).unwrap(), a);
        assert!(db.get_cluster(a).unwrap().is_some());
    }

    #[test]
    fn test_merge_missing_cluster_is_not_found() {
        let db = test_db();
        let c = clusterer(&db);
        assert!(matches!(
            c.merge(1, 2).unwrap_err(),
            CatalogError::NotFound(_)
        ));
    }

    #[test]
    fn test_split_moves_faces_into_new_cluster() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.1));
        let f3 = insert_face(&db, p, emb(0.2));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let source = cluster_of(&db, f1);

        let new_id = c.split(source, &[f2, f3]).unwrap();
        assert_ne!(new_id, source);
        assert_eq!(cluster_of(&db, f1), source);
        assert_eq!(cluster_of(&db, f2), new_id);
        assert_eq!(cluster_of(&db, f3), new_id);

        let new_cluster = db.get_cluster(new_id).unwrap().unwrap();
        assert!((new_cluster.centroid[0] - 0.15).abs() < 1e-5);
        let source_cluster = db.get_cluster(source).unwrap().unwrap();
        assert!((source_cluster.centroid[0] - 0.0).abs() < 1e-5);
        assert_eq!(source_cluster.face_count, 1);
    }

    #[test]
    fn test_split_all_faces_deletes_source() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(0.0));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let source = cluster_of(&db, f1);

        let new_id = c.split(source, &[f1]).unwrap();
        assert_ne!(new_id, source);
        assert!(db.get_cluster(source).unwrap().is_none());
        assert_eq!(cluster_of(&db, f1), new_id);
    }

    #[test]
    fn test_split_empty_list_is_invalid_input() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(0.0));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let source = cluster_of(&db, f1);
        assert!(matches!(
            c.split(source, &[]).unwrap_err(),
            CatalogError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_assign_and_unassign_person() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.1));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let cluster_id = cluster_of(&db, f1);
        let person = db.create_person("Ada", None).unwrap();

        c.assign_person(cluster_id, person).unwrap();
        let identified = db.get_cluster(cluster_id).unwrap().unwrap();
        assert!(identified.is_identified());
        assert_eq!(identified.person_id, Some(person));
        for f in [f1, f2] {
            assert_eq!(db.get_face(f).unwrap().unwrap().person_id, Some(person));
        }

        c.unassign_person(cluster_id).unwrap();
        assert_eq!(db.get_cluster(cluster_id).unwrap().unwrap().person_id, None);
        for f in [f1, f2] {
            assert_eq!(db.get_face(f).unwrap().unwrap().person_id, None);
        }
    }

    #[test]
    fn test_representative_is_closest_to_centroid() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        // Centroid lands at 0.2; f2 at 0.3 is closest (0.1 away).
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.3));
        let f3 = insert_face(&db, p, emb(0.3));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let cluster_id = cluster_of(&db, f1);

        let rep = c.representative(cluster_id).unwrap().unwrap();
        // f2 and f3 tie on distance; the smaller id wins.
        assert_eq!(rep.id, f2);
        assert_ne!(rep.id, f3);

        // Minimality against every member.
        let cluster = db.get_cluster(cluster_id).unwrap().unwrap();
        let rep_d = distance(&rep.embedding, &cluster.centroid).unwrap();
        for face in db.faces_for_cluster(cluster_id).unwrap() {
            let d = distance(&face.embedding, &cluster.centroid).unwrap();
            assert!(rep_d <= d);
        }
    }

    #[test]
    fn test_representative_of_centroidless_cluster_is_none() {
        let db = test_db();
        let id = db
            .insert_cluster(&Cluster {
                id: 0,
                centroid: Vec::new(),
                face_count: 0,
                created_date: timestamp_now(),
                person_id: None,
            })
            .unwrap();
        assert!(clusterer(&db).representative(id).unwrap().is_none());
    }

    #[test]
    fn test_merge_suggestions_window() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        // Three clusters at 0.0, 0.65, 2.0: only the first pair falls
        // inside (0.6, 0.7].
        let f1 = insert_face(&db, p, emb(0.0));
        let f2 = insert_face(&db, p, emb(0.65));
        insert_face(&db, p, emb(2.0));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();

        let suggestions = c
            .merge_suggestions(DEFAULT_MERGE_SUGGESTION_THRESHOLD)
            .unwrap();
        assert_eq!(suggestions.len(), 1);
        let (a, b) = suggestions[0];
        assert!(a < b);
        assert_eq!(a, cluster_of(&db, f1));
        assert_eq!(b, cluster_of(&db, f2));
    }

    #[test]
    fn test_stats_counts_distinct_photos() {
        let db = test_db();
        let p1 = insert_photo(&db, "a.jpg");
        let p2 = insert_photo(&db, "b.jpg");
        let f1 = insert_face(&db, p1, emb(0.0));
        insert_face(&db, p1, emb(0.1));
        insert_face(&db, p2, emb(0.2));
        let c = clusterer(&db);
        c.cluster_all(None).unwrap();
        let cluster_id = cluster_of(&db, f1);
        let person = db.create_person("Ada", None).unwrap();
        c.assign_person(cluster_id, person).unwrap();

        let stats = c.stats().unwrap();
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.cluster_id, cluster_id);
        assert_eq!(s.face_count, 3);
        assert_eq!(s.photo_count, 2);
        assert_eq!(s.person_name.as_deref(), Some("Ada"));
        assert!(s.representative_face_id.is_some());
    }

    #[test]
    fn test_threshold_accessors() {
        let db = test_db();
        let mut c = clusterer(&db);
        assert_eq!(c.threshold(), DEFAULT_DISTANCE_THRESHOLD);
        c.set_threshold(0.45);
        assert_eq!(c.threshold(), 0.45);
    }

    #[test]
    fn test_cancelled_batch_leaves_store_untouched() {
        let db = test_db();
        let p = insert_photo(&db, "a.jpg");
        insert_face(&db, p, emb(0.0));
        insert_face(&db, p, emb(0.1));
        insert_face(&db, p, emb(0.2));

        let c = clusterer(&db);
        let flag = c.cancel_flag();
        flag.store(true, Ordering::SeqCst);
        let err = c.cluster_all(None).unwrap_err();
        assert!(err.is_cancelled());
        assert!(db.all_clusters().unwrap().is_empty());
        assert!(!db.in_transaction());
    }
}
