use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::PassPulseError;
use crate::formats::ImageDescriptor;
use crate::images;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pass {
    id: i64,
    name: String,
    satellite: String,
    timestamp: Option<i64>,
    raw_data_path: Option<String>,
    downlink: String,
}

impl Pass {
    pub fn new(
        name: &str,
        satellite: &str,
        timestamp: Option<i64>,
        raw_data_path: Option<String>,
        downlink: &str,
    ) -> Self {
        Pass {
            id: 0,
            name: name.to_owned(),
            satellite: satellite.to_owned(),
            timestamp,
            raw_data_path,
            downlink: downlink.to_owned(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn satellite(&self) -> &str {
        &self.satellite
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn raw_data_path(&self) -> Option<&str> {
        self.raw_data_path.as_deref()
    }

    pub fn downlink(&self) -> &str {
        &self.downlink
    }

    pub fn exists(conn: &Connection, name: &str) -> Result<bool, PassPulseError> {
        let found = conn
            .query_row("SELECT 1 FROM passes WHERE name = ?", [name], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    #[cfg(test)]
    pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Pass>, PassPulseError> {
        conn.query_row(
            "SELECT id, name, satellite, timestamp, rawDataPath, downlink
             FROM passes
             WHERE name = ?",
            [name],
            |row| {
                Ok(Pass {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    satellite: row.get(2)?,
                    timestamp: row.get(3)?,
                    raw_data_path: row.get(4)?,
                    downlink: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(PassPulseError::DatabaseError)
    }

    pub fn count(conn: &Connection) -> Result<i64, PassPulseError> {
        let count = conn.query_row("SELECT COUNT(*) FROM passes", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Writes the pass row and all of its images in one transaction. Nothing
    /// is left behind if any insert fails.
    pub fn insert_with_images(
        &mut self,
        conn: &Connection,
        images: &[ImageDescriptor],
    ) -> Result<i64, PassPulseError> {
        let pass_id = Database::immediate_transaction(conn, |c| {
            c.execute(
                "INSERT OR REPLACE INTO passes (name, satellite, timestamp, rawDataPath, downlink)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    self.name,
                    self.satellite,
                    self.timestamp,
                    self.raw_data_path,
                    self.downlink,
                ],
            )?;
            let pass_id = c.last_insert_rowid();

            for image in images {
                images::insert(c, pass_id, image)?;
            }

            Ok(pass_id)
        })?;

        self.id = pass_id;
        Ok(pass_id)
    }
}
