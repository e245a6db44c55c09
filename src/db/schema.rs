pub const SCHEMA: &str = r#"
-- Photos table: one row per file in the library
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT UNIQUE NOT NULL,
    file_name TEXT,
    folder_path TEXT,
    width INTEGER,
    height INTEGER,
    file_size INTEGER,
    exif_date TEXT,
    scan_date TEXT NOT NULL,
    checksum TEXT
);

-- Faces: detected faces with bounding boxes and 128-d embeddings
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    bbox_x INTEGER,
    bbox_y INTEGER,
    bbox_width INTEGER,
    bbox_height INTEGER,
    embedding BLOB NOT NULL,
    cluster_id INTEGER,
    person_id INTEGER,
    confidence REAL,
    FOREIGN KEY (photo_id) REFERENCES photos(id),
    FOREIGN KEY (cluster_id) REFERENCES clusters(id),
    FOREIGN KEY (person_id) REFERENCES persons(id)
);

-- Clusters: automatic groupings of similar faces.
-- person_id arrived later; see MIGRATIONS.
CREATE TABLE IF NOT EXISTS clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    centroid BLOB,
    face_count INTEGER,
    created_date TEXT NOT NULL
);

-- Persons: user-identified people
CREATE TABLE IF NOT EXISTS persons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_date TEXT NOT NULL,
    notes TEXT
);

-- Scan sessions: one row per pipeline run
CREATE TABLE IF NOT EXISTS scans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root_path TEXT,
    start_date TEXT,
    end_date TEXT,
    status TEXT,
    total_files INTEGER,
    processed_files INTEGER,
    total_faces INTEGER
);

CREATE INDEX IF NOT EXISTS idx_faces_photo ON faces(photo_id);
CREATE INDEX IF NOT EXISTS idx_faces_cluster ON faces(cluster_id);
CREATE INDEX IF NOT EXISTS idx_faces_person ON faces(person_id);
CREATE INDEX IF NOT EXISTS idx_photos_path ON photos(file_path);
"#;

/// Additive schema upgrades. Columns are only ever added, never removed,
/// so each statement may fail harmlessly on a database that already has it.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE clusters ADD COLUMN person_id INTEGER REFERENCES persons(id)",
];
