//! Catalog operations over the SQLite schema.

use rusqlite::Row;

use super::models::{
    BoundingBox, Cluster, Face, Person, Photo, ScanSession, ScanStatus,
};
use super::{timestamp_now, Database};
use crate::embedding::{bytes_to_embedding, embedding_to_bytes, EMBEDDING_DIM};
use crate::error::{CatalogError, Result};

fn photo_from_row(row: &Row) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        folder_path: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        width: row.get::<_, Option<i32>>(4)?.unwrap_or(0),
        height: row.get::<_, Option<i32>>(5)?.unwrap_or(0),
        file_size: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        exif_date: row.get(7)?,
        scan_date: row.get(8)?,
        checksum: row.get(9)?,
    })
}

fn face_from_row(row: &Row) -> rusqlite::Result<Face> {
    let blob: Vec<u8> = row.get(6)?;
    let embedding = bytes_to_embedding(&blob).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Blob, Box::new(e))
    })?;
    Ok(Face {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        bbox: BoundingBox {
            x: row.get::<_, Option<i32>>(2)?.unwrap_or(0),
            y: row.get::<_, Option<i32>>(3)?.unwrap_or(0),
            width: row.get::<_, Option<i32>>(4)?.unwrap_or(0),
            height: row.get::<_, Option<i32>>(5)?.unwrap_or(0),
        },
        embedding,
        cluster_id: row.get(7)?,
        person_id: row.get(8)?,
        confidence: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0) as f32,
    })
}

fn cluster_from_row(row: &Row) -> rusqlite::Result<Cluster> {
    let blob: Option<Vec<u8>> = row.get(1)?;
    let centroid = match blob {
        Some(bytes) => bytes_to_embedding(&bytes).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Blob, Box::new(e))
        })?,
        None => Vec::new(),
    };
    Ok(Cluster {
        id: row.get(0)?,
        centroid,
        face_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        created_date: row.get(3)?,
        person_id: row.get(4)?,
    })
}

fn person_from_row(row: &Row) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        created_date: row.get(2)?,
        notes: row.get(3)?,
    })
}

fn scan_from_row(row: &Row) -> rusqlite::Result<ScanSession> {
    let status: Option<String> = row.get(4)?;
    Ok(ScanSession {
        id: row.get(0)?,
        root_path: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        start_date: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        end_date: row.get(3)?,
        status: status
            .as_deref()
            .and_then(ScanStatus::parse)
            .unwrap_or(ScanStatus::Failed),
        total_files: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        processed_files: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        total_faces: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
    })
}

const PHOTO_COLS: &str =
    "id, file_path, file_name, folder_path, width, height, file_size, exif_date, scan_date, checksum";
const FACE_COLS: &str =
    "id, photo_id, bbox_x, bbox_y, bbox_width, bbox_height, embedding, cluster_id, person_id, confidence";
const CLUSTER_COLS: &str = "id, centroid, face_count, created_date, person_id";
const SCAN_COLS: &str =
    "id, root_path, start_date, end_date, status, total_files, processed_files, total_faces";

impl Database {
    // ========================================================================
    // Photo operations
    // ========================================================================

    pub fn insert_photo(&self, photo: &Photo) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO photos (file_path, file_name, folder_path, width, height,
                                file_size, exif_date, scan_date, checksum)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                photo.file_path,
                photo.file_name,
                photo.folder_path,
                photo.width,
                photo.height,
                photo.file_size,
                photo.exif_date,
                photo.scan_date,
                photo.checksum,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_photo(&self, id: i64) -> Result<Option<Photo>> {
        let result = self.conn.query_row(
            &format!("SELECT {PHOTO_COLS} FROM photos WHERE id = ?"),
            [id],
            photo_from_row,
        );
        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_photo_by_path(&self, path: &str) -> Result<Option<Photo>> {
        let result = self.conn.query_row(
            &format!("SELECT {PHOTO_COLS} FROM photos WHERE file_path = ?"),
            [path],
            photo_from_row,
        );
        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Photos containing at least one face of the given person, deduplicated.
    pub fn photos_for_person(&self, person_id: i64) -> Result<Vec<Photo>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT p.id, p.file_path, p.file_name, p.folder_path, p.width,
                   p.height, p.file_size, p.exif_date, p.scan_date, p.checksum
            FROM photos p
            JOIN faces f ON f.photo_id = p.id
            WHERE f.person_id = ?
            ORDER BY p.id
            "#,
        )?;
        let rows = stmt.query_map([person_id], photo_from_row)?;
        let mut photos = Vec::new();
        for row in rows {
            photos.push(row?);
        }
        Ok(photos)
    }

    /// The one Photo column that may change after insertion.
    pub fn set_photo_checksum(&self, photo_id: i64, checksum: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE photos SET checksum = ? WHERE id = ?",
            rusqlite::params![checksum, photo_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("photo {photo_id}")));
        }
        Ok(())
    }

    pub fn count_photos(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?)
    }

    // ========================================================================
    // Face operations
    // ========================================================================

    pub fn insert_face(&self, face: &Face) -> Result<i64> {
        if face.embedding.len() != EMBEDDING_DIM {
            return Err(CatalogError::Corrupt(format!(
                "face embedding has {} dimensions, expected {}",
                face.embedding.len(),
                EMBEDDING_DIM
            )));
        }
        self.conn.execute(
            r#"
            INSERT INTO faces (photo_id, bbox_x, bbox_y, bbox_width, bbox_height,
                               embedding, cluster_id, person_id, confidence)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                face.photo_id,
                face.bbox.x,
                face.bbox.y,
                face.bbox.width,
                face.bbox.height,
                embedding_to_bytes(&face.embedding),
                face.cluster_id,
                face.person_id,
                face.confidence as f64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_face(&self, id: i64) -> Result<Option<Face>> {
        let result = self.conn.query_row(
            &format!("SELECT {FACE_COLS} FROM faces WHERE id = ?"),
            [id],
            face_from_row,
        );
        match result {
            Ok(face) => Ok(Some(face)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn faces_where(&self, clause: &str, param: Option<i64>) -> Result<Vec<Face>> {
        let sql = format!("SELECT {FACE_COLS} FROM faces WHERE {clause} ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut faces = Vec::new();
        match param {
            Some(p) => {
                let rows = stmt.query_map([p], face_from_row)?;
                for row in rows {
                    faces.push(row?);
                }
            }
            None => {
                let rows = stmt.query_map([], face_from_row)?;
                for row in rows {
                    faces.push(row?);
                }
            }
        }
        Ok(faces)
    }

    pub fn faces_for_photo(&self, photo_id: i64) -> Result<Vec<Face>> {
        self.faces_where("photo_id = ?", Some(photo_id))
    }

    pub fn faces_for_cluster(&self, cluster_id: i64) -> Result<Vec<Face>> {
        self.faces_where("cluster_id = ?", Some(cluster_id))
    }

    pub fn faces_for_person(&self, person_id: i64) -> Result<Vec<Face>> {
        self.faces_where("person_id = ?", Some(person_id))
    }

    pub fn all_faces_with_embeddings(&self) -> Result<Vec<Face>> {
        self.faces_where("embedding IS NOT NULL", None)
    }

    pub fn unclustered_faces(&self) -> Result<Vec<Face>> {
        self.faces_where("cluster_id IS NULL", None)
    }

    pub fn set_face_cluster(&self, face_id: i64, cluster_id: Option<i64>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE faces SET cluster_id = ? WHERE id = ?",
            rusqlite::params![cluster_id, face_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("face {face_id}")));
        }
        Ok(())
    }

    pub fn set_face_person(&self, face_id: i64, person_id: Option<i64>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE faces SET person_id = ? WHERE id = ?",
            rusqlite::params![person_id, face_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("face {face_id}")));
        }
        Ok(())
    }

    pub fn count_faces(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?)
    }

    // ========================================================================
    // Cluster operations
    // ========================================================================

    pub fn insert_cluster(&self, cluster: &Cluster) -> Result<i64> {
        let centroid_blob = if cluster.centroid.is_empty() {
            None
        } else {
            if cluster.centroid.len() != EMBEDDING_DIM {
                return Err(CatalogError::InvalidInput(format!(
                    "centroid has {} dimensions, expected {}",
                    cluster.centroid.len(),
                    EMBEDDING_DIM
                )));
            }
            Some(embedding_to_bytes(&cluster.centroid))
        };
        self.conn.execute(
            r#"
            INSERT INTO clusters (centroid, face_count, created_date, person_id)
            VALUES (?, ?, ?, ?)
            "#,
            rusqlite::params![
                centroid_blob,
                cluster.face_count,
                cluster.created_date,
                cluster.person_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_cluster(&self, id: i64) -> Result<Option<Cluster>> {
        let result = self.conn.query_row(
            &format!("SELECT {CLUSTER_COLS} FROM clusters WHERE id = ?"),
            [id],
            cluster_from_row,
        );
        match result {
            Ok(cluster) => Ok(Some(cluster)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all_clusters(&self) -> Result<Vec<Cluster>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CLUSTER_COLS} FROM clusters ORDER BY id"))?;
        let rows = stmt.query_map([], cluster_from_row)?;
        let mut clusters = Vec::new();
        for row in rows {
            clusters.push(row?);
        }
        Ok(clusters)
    }

    pub fn set_cluster_centroid(&self, cluster_id: i64, centroid: &[f32]) -> Result<()> {
        if centroid.len() != EMBEDDING_DIM {
            return Err(CatalogError::InvalidInput(format!(
                "centroid has {} dimensions, expected {}",
                centroid.len(),
                EMBEDDING_DIM
            )));
        }
        let changed = self.conn.execute(
            "UPDATE clusters SET centroid = ? WHERE id = ?",
            rusqlite::params![embedding_to_bytes(centroid), cluster_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("cluster {cluster_id}")));
        }
        Ok(())
    }

    pub fn set_cluster_face_count(&self, cluster_id: i64, face_count: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE clusters SET face_count = ? WHERE id = ?",
            rusqlite::params![face_count, cluster_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("cluster {cluster_id}")));
        }
        Ok(())
    }

    pub fn set_cluster_person(&self, cluster_id: i64, person_id: Option<i64>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE clusters SET person_id = ? WHERE id = ?",
            rusqlite::params![person_id, cluster_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("cluster {cluster_id}")));
        }
        Ok(())
    }

    /// Delete a cluster, detaching its faces first.
    pub fn delete_cluster(&self, cluster_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE faces SET cluster_id = NULL WHERE cluster_id = ?",
            [cluster_id],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM clusters WHERE id = ?", [cluster_id])?;
        if deleted == 0 {
            return Err(CatalogError::NotFound(format!("cluster {cluster_id}")));
        }
        Ok(())
    }

    // ========================================================================
    // Person operations
    // ========================================================================

    pub fn insert_person(&self, person: &Person) -> Result<i64> {
        if person.name.trim().is_empty() {
            return Err(CatalogError::InvalidInput(
                "person name must not be empty".to_string(),
            ));
        }
        self.conn.execute(
            "INSERT INTO persons (name, created_date, notes) VALUES (?, ?, ?)",
            rusqlite::params![person.name, person.created_date, person.notes],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Convenience wrapper stamping the creation date.
    pub fn create_person(&self, name: &str, notes: Option<&str>) -> Result<i64> {
        self.insert_person(&Person {
            id: 0,
            name: name.to_string(),
            created_date: timestamp_now(),
            notes: notes.map(str::to_string),
        })
    }

    pub fn get_person(&self, id: i64) -> Result<Option<Person>> {
        let result = self.conn.query_row(
            "SELECT id, name, created_date, notes FROM persons WHERE id = ?",
            [id],
            person_from_row,
        );
        match result {
            Ok(person) => Ok(Some(person)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_person_by_name(&self, name: &str) -> Result<Option<Person>> {
        let result = self.conn.query_row(
            "SELECT id, name, created_date, notes FROM persons WHERE LOWER(name) = LOWER(?)",
            [name],
            person_from_row,
        );
        match result {
            Ok(person) => Ok(Some(person)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all_persons(&self) -> Result<Vec<Person>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_date, notes FROM persons ORDER BY name")?;
        let rows = stmt.query_map([], person_from_row)?;
        let mut persons = Vec::new();
        for row in rows {
            persons.push(row?);
        }
        Ok(persons)
    }

    pub fn update_person(&self, person: &Person) -> Result<()> {
        if person.name.trim().is_empty() {
            return Err(CatalogError::InvalidInput(
                "person name must not be empty".to_string(),
            ));
        }
        let changed = self.conn.execute(
            "UPDATE persons SET name = ?, notes = ? WHERE id = ?",
            rusqlite::params![person.name, person.notes, person.id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("person {}", person.id)));
        }
        Ok(())
    }

    /// Delete a person, detaching referencing faces and clusters first.
    pub fn delete_person(&self, person_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE faces SET person_id = NULL WHERE person_id = ?",
            [person_id],
        )?;
        self.conn.execute(
            "UPDATE clusters SET person_id = NULL WHERE person_id = ?",
            [person_id],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM persons WHERE id = ?", [person_id])?;
        if deleted == 0 {
            return Err(CatalogError::NotFound(format!("person {person_id}")));
        }
        Ok(())
    }

    // ========================================================================
    // Scan session operations
    // ========================================================================

    pub fn create_scan(&self, root_path: &str) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO scans (root_path, start_date, status, total_files,
                               processed_files, total_faces)
            VALUES (?, ?, ?, 0, 0, 0)
            "#,
            rusqlite::params![root_path, timestamp_now(), ScanStatus::Running.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_scan_progress(
        &self,
        scan_id: i64,
        total_files: i64,
        processed_files: i64,
        total_faces: i64,
    ) -> Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE scans SET total_files = ?, processed_files = ?, total_faces = ?
            WHERE id = ?
            "#,
            rusqlite::params![total_files, processed_files, total_faces, scan_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("scan {scan_id}")));
        }
        Ok(())
    }

    pub fn finish_scan(&self, scan_id: i64, status: ScanStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE scans SET status = ?, end_date = ? WHERE id = ?",
            rusqlite::params![status.as_str(), timestamp_now(), scan_id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("scan {scan_id}")));
        }
        Ok(())
    }

    pub fn get_scan(&self, id: i64) -> Result<Option<ScanSession>> {
        let result = self.conn.query_row(
            &format!("SELECT {SCAN_COLS} FROM scans WHERE id = ?"),
            [id],
            scan_from_row,
        );
        match result {
            Ok(scan) => Ok(Some(scan)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn latest_scan(&self) -> Result<Option<ScanSession>> {
        let result = self.conn.query_row(
            &format!("SELECT {SCAN_COLS} FROM scans ORDER BY id DESC LIMIT 1"),
            [],
            scan_from_row,
        );
        match result {
            Ok(scan) => Ok(Some(scan)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
