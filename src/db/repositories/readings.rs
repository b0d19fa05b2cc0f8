use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_datetime, parse_datetime, to_i64},
    models::Reading,
};
use crate::store::ReadingStore;

fn row_to_reading(row: &Row) -> rusqlite::Result<Reading> {
    let timestamp: String = row.get("timestamp")?;
    Ok(Reading {
        id: row.get("id")?,
        patient_id: row.get("patient_id")?,
        glucose: row.get("glucose")?,
        timestamp: parse_datetime(&timestamp, "timestamp").map_err(conversion_error)?,
    })
}

fn insert_reading(conn: &Connection, reading: &Reading) -> Result<Reading> {
    conn.execute(
        "INSERT INTO glucose_readings (patient_id, glucose, timestamp) VALUES (?1, ?2, ?3)",
        params![
            reading.patient_id,
            reading.glucose,
            format_datetime(&reading.timestamp),
        ],
    )
    .with_context(|| format!("failed to insert reading for {}", reading.patient_id))?;
    Ok(reading.clone().with_id(conn.last_insert_rowid()))
}

impl Database {
    pub async fn insert_reading(&self, reading: &Reading) -> Result<Reading> {
        let record = reading.clone();
        self.execute(move |conn| insert_reading(conn, &record)).await
    }

    pub async fn insert_readings(
        &self,
        patient_id: &str,
        readings: &[Reading],
    ) -> Result<Vec<Reading>> {
        let patient_id = patient_id.to_string();
        let records = readings.to_vec();
        self.execute(move |conn| {
            if let Some(foreign) = records.iter().find(|r| r.patient_id != patient_id) {
                bail!(
                    "reading for patient {} passed to insert_readings for {}",
                    foreign.patient_id,
                    patient_id
                );
            }

            let tx = conn
                .transaction()
                .context("failed to open insert transaction")?;
            let mut stored = Vec::with_capacity(records.len());
            for record in &records {
                stored.push(insert_reading(&tx, record)?);
            }

            tx.commit().context("failed to commit inserted readings")?;
            Ok(stored)
        })
        .await
    }

    pub async fn replace_readings(
        &self,
        patient_id: &str,
        readings: &[Reading],
    ) -> Result<Vec<Reading>> {
        let patient_id = patient_id.to_string();
        let records = readings.to_vec();
        self.execute(move |conn| {
            if let Some(foreign) = records.iter().find(|r| r.patient_id != patient_id) {
                bail!(
                    "reading for patient {} passed to replace_readings for {}",
                    foreign.patient_id,
                    patient_id
                );
            }

            let tx = conn
                .transaction()
                .context("failed to open replace transaction")?;
            tx.execute(
                "DELETE FROM glucose_readings WHERE patient_id = ?1",
                params![patient_id],
            )?;

            let mut stored = Vec::with_capacity(records.len());
            for record in &records {
                stored.push(insert_reading(&tx, record)?);
            }

            tx.commit().context("failed to commit replaced readings")?;
            Ok(stored)
        })
        .await
    }

    pub async fn delete_readings_for_patient(&self, patient_id: &str) -> Result<usize> {
        let patient_id = patient_id.to_string();
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM glucose_readings WHERE patient_id = ?1",
                params![patient_id],
            )?;
            Ok(removed)
        })
        .await
    }

    pub async fn get_latest_reading(&self, patient_id: &str) -> Result<Option<Reading>> {
        let patient_id = patient_id.to_string();
        self.execute(move |conn| {
            let reading = conn
                .query_row(
                    "SELECT id, patient_id, glucose, timestamp
                     FROM glucose_readings
                     WHERE patient_id = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT 1",
                    params![patient_id],
                    row_to_reading,
                )
                .optional()?;
            Ok(reading)
        })
        .await
    }

    pub async fn get_readings_since(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>> {
        let patient_id = patient_id.to_string();
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(to_i64).transpose()?.unwrap_or(-1);
        let since = since.map(|dt| format_datetime(&dt));

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, patient_id, glucose, timestamp
                 FROM glucose_readings
                 WHERE patient_id = ?1 AND (?2 IS NULL OR timestamp >= ?2)
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?3",
            )?;

            let rows = stmt.query_map(params![patient_id, since, limit], row_to_reading)?;
            let mut readings = Vec::new();
            for row in rows {
                readings.push(row?);
            }
            Ok(readings)
        })
        .await
    }
}

#[async_trait]
impl ReadingStore for Database {
    async fn save(&self, reading: &Reading) -> Result<Reading> {
        self.insert_reading(reading).await
    }

    async fn save_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>> {
        self.insert_readings(patient_id, readings).await
    }

    async fn replace_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>> {
        self.replace_readings(patient_id, readings).await
    }

    async fn delete_all(&self, patient_id: &str) -> Result<usize> {
        self.delete_readings_for_patient(patient_id).await
    }

    async fn latest(&self, patient_id: &str) -> Result<Option<Reading>> {
        self.get_latest_reading(patient_id).await
    }

    async fn query_range(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>> {
        self.get_readings_since(patient_id, since, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("glucose.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn save_assigns_ids_and_latest_follows_time() {
        let (_dir, db) = open();
        let first = db.save(&Reading::new("P001", 101.26, at(0))).await.unwrap();
        let second = db.save(&Reading::new("P001", 98.0, at(5))).await.unwrap();

        assert!(first.id.is_some());
        assert_ne!(first.id, second.id);
        assert_eq!(first.glucose, 101.3);

        let latest = db.latest("P001").await.unwrap().unwrap();
        assert_eq!(latest, second);
        assert!(db.latest("P404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_range_filters_and_limits() {
        let (_dir, db) = open();
        for minute in 0..10 {
            db.save(&Reading::new("P001", 100.0 + minute as f64, at(minute)))
                .await
                .unwrap();
        }
        db.save(&Reading::new("P002", 150.0, at(3))).await.unwrap();

        let all = db.query_range("P001", None, None).await.unwrap();
        assert_eq!(all.len(), 10);
        assert!(all.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let recent = db.query_range("P001", Some(at(7)), None).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, at(7));

        let limited = db.query_range("P001", None, Some(4)).await.unwrap();
        assert_eq!(limited.len(), 4);
        assert_eq!(limited[3].timestamp, at(3));
    }

    #[tokio::test]
    async fn replace_all_is_atomic() {
        let (_dir, db) = open();
        db.save(&Reading::new("P001", 120.0, at(0))).await.unwrap();

        let bad = vec![Reading::new("P001", 90.0, at(1)), Reading::new("P002", 90.0, at(2))];
        assert!(db.replace_all("P001", &bad).await.is_err());
        assert_eq!(db.query_range("P001", None, None).await.unwrap().len(), 1);

        let good: Vec<Reading> = (0..5).map(|m| Reading::new("P001", 90.0, at(m + 10))).collect();
        let stored = db.replace_all("P001", &good).await.unwrap();
        assert_eq!(stored.len(), 5);
        let all = db.query_range("P001", None, None).await.unwrap();
        assert_eq!(all, stored);

        assert_eq!(db.delete_all("P001").await.unwrap(), 5);
        assert!(db.latest("P001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_all_commits_the_whole_batch_or_nothing() {
        let (_dir, db) = open();
        db.save(&Reading::new("P001", 120.0, at(0))).await.unwrap();

        let bad = vec![Reading::new("P001", 90.0, at(1)), Reading::new("P002", 90.0, at(2))];
        assert!(db.save_all("P001", &bad).await.is_err());
        assert_eq!(db.query_range("P001", None, None).await.unwrap().len(), 1);
        assert!(db.latest("P002").await.unwrap().is_none());

        let batch: Vec<Reading> = (1..4).map(|m| Reading::new("P001", 95.0, at(m))).collect();
        let stored = db.save_all("P001", &batch).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|r| r.id.is_some()));
        assert_eq!(db.query_range("P001", None, None).await.unwrap().len(), 4);
    }
}
