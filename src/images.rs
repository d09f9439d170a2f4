use std::ops::ControlFlow;

use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::PassPulseError;
use crate::formats::ImageDescriptor;

/// An image row still waiting for its rendition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingThumb {
    pub id: i64,
    pub path: String,
}

/// Inserts one image for `pass_id`. New rows always need a thumbnail.
pub fn insert(
    conn: &Connection,
    pass_id: i64,
    image: &ImageDescriptor,
) -> Result<i64, PassPulseError> {
    conn.execute(
        "INSERT INTO images
             (path, composite, sensor, mapOverlay, corrected, filled, vPixels, passId, needsThumb)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        params![
            image.path,
            image.composite,
            image.sensor,
            image.map_overlay,
            image.corrected,
            image.filled,
            image.v_pixels,
            pass_id,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn count_pending_thumbs(conn: &Connection) -> Result<i64, PassPulseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM images WHERE needsThumb = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Streams every row that still needs a thumbnail, in id order, until the
/// callback breaks.
pub fn for_each_pending_thumb<F>(conn: &Connection, mut func: F) -> Result<(), PassPulseError>
where
    F: FnMut(PendingThumb) -> ControlFlow<()>,
{
    let mut stmt = conn.prepare(
        "SELECT id, path
         FROM images
         WHERE needsThumb = 1
         ORDER BY id ASC",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(PendingThumb {
            id: row.get(0)?,
            path: row.get(1)?,
        })
    })?;

    for row in rows {
        if func(row?).is_break() {
            break;
        }
    }
    Ok(())
}

/// Clears `needsThumb` for every id in one transaction.
pub fn mark_thumbs_done(conn: &Connection, ids: &[i64]) -> Result<usize, PassPulseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    Database::immediate_transaction(conn, |c| {
        let mut stmt = c.prepare_cached("UPDATE images SET needsThumb = 0 WHERE id = ?")?;
        let mut updated = 0;
        for id in ids {
            updated += stmt.execute([id])?;
        }
        Ok(updated)
    })
}

/// A stored image row, read back for verification.
#[cfg(test)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    id: i64,
    path: String,
    composite: String,
    sensor: String,
    map_overlay: bool,
    corrected: bool,
    filled: bool,
    v_pixels: Option<i64>,
    pass_id: i64,
    needs_thumb: bool,
}

#[cfg(test)]
impl Image {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn composite(&self) -> &str {
        &self.composite
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    pub fn map_overlay(&self) -> bool {
        self.map_overlay
    }

    pub fn corrected(&self) -> bool {
        self.corrected
    }

    pub fn filled(&self) -> bool {
        self.filled
    }

    pub fn v_pixels(&self) -> Option<i64> {
        self.v_pixels
    }

    pub fn pass_id(&self) -> i64 {
        self.pass_id
    }

    pub fn needs_thumb(&self) -> bool {
        self.needs_thumb
    }

    pub fn get_for_pass(conn: &Connection, pass_id: i64) -> Result<Vec<Image>, PassPulseError> {
        let mut stmt = conn.prepare(
            "SELECT id, path, composite, sensor, mapOverlay, corrected, filled, vPixels, passId,
                    needsThumb
             FROM images
             WHERE passId = ?
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([pass_id], |row| {
            Ok(Image {
                id: row.get(0)?,
                path: row.get(1)?,
                composite: row.get(2)?,
                sensor: row.get(3)?,
                map_overlay: row.get(4)?,
                corrected: row.get(5)?,
                filled: row.get(6)?,
                v_pixels: row.get(7)?,
                pass_id: row.get(8)?,
                needs_thumb: row.get(9)?,
            })
        })?;

        let mut images = Vec::new();
        for row in rows {
            images.push(row?);
        }
        Ok(images)
    }
}
