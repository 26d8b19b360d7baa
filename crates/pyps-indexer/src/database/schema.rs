//! SQL used by the index datastore.
//!
//! Sub-index prefixes are bound as `""` (everything) or `"name/"`, and
//! matched with `substr` so `_` and `%` in directory names stay literal.

pub const BUILD_TABLE: &str = "
CREATE TABLE IF NOT EXISTS distribution (
    sub_index TEXT NOT NULL,
    filename TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    project TEXT NOT NULL,
    version TEXT NOT NULL,
    file BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS project_lookup ON distribution (project, sub_index);
CREATE UNIQUE INDEX IF NOT EXISTS file_lookup ON distribution (filename, sub_index);
CREATE INDEX IF NOT EXISTS hash_lookup ON distribution (sha256);
";

pub const STATS: &str = "
SELECT COUNT(*), COUNT(DISTINCT project), COUNT(DISTINCT sub_index)
FROM distribution
";

pub const STATS_PER_SUB_INDEX: &str = "
SELECT sub_index, COUNT(*), COUNT(DISTINCT project)
FROM distribution
GROUP BY sub_index
ORDER BY sub_index
";

pub const PROJECT_LIST: &str = "
SELECT DISTINCT project
FROM distribution
WHERE substr(sub_index, 1, length(?1)) = ?1
ORDER BY project
";

/// One row per filename; the earliest inserted copy wins.
pub const PROJECT_DETAIL: &str = "
SELECT version, file
FROM distribution
WHERE rowid IN (
    SELECT MIN(rowid)
    FROM distribution
    WHERE project = ?1 AND substr(sub_index, 1, length(?2)) = ?2
    GROUP BY filename
)
ORDER BY filename
";

pub const FIND_FILE: &str = "
SELECT sha256
FROM distribution
WHERE filename = ?1 AND substr(sub_index, 1, length(?2)) = ?2
ORDER BY rowid
LIMIT 1
";

pub const KNOWN_COPIES: &str = "
SELECT sub_index, sha256
FROM distribution
WHERE filename = ?1
ORDER BY rowid
";

pub const ALL_FILES: &str = "
SELECT filename, sub_index, sha256
FROM distribution
ORDER BY rowid
";

pub const STORE_DIST: &str = "
INSERT INTO distribution (sub_index, filename, sha256, project, version, file)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

pub const REMOVE_DIST: &str = "
DELETE FROM distribution
WHERE filename = ?1 AND sub_index = ?2
";

pub const FIND_SURVIVOR: &str = "
SELECT sub_index
FROM distribution
WHERE filename = ?1 AND sha256 = ?2
ORDER BY rowid
LIMIT 1
";
