use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_datetime, parse_optional_datetime, to_u32},
    models::Patient,
};
use crate::store::PatientRecords;

fn row_to_patient(row: &Row) -> rusqlite::Result<Patient> {
    let age: i64 = row.get("age")?;
    let created_at: Option<String> = row.get("created_at")?;
    let diabetes_type: Option<i64> = row.get("diabetes_type")?;

    Ok(Patient {
        id: row.get("id")?,
        patient_type: row.get("patient_type")?,
        age: to_u32(age, "age").map_err(conversion_error)?,
        weight: row.get("weight")?,
        height: row.get("height")?,
        has_diabetes: row.get::<_, i64>("has_diabetes")? != 0,
        diabetes_type: diabetes_type.and_then(|t| u8::try_from(t).ok()),
        created_at: parse_optional_datetime(created_at, "created_at").map_err(conversion_error)?,
    })
}

impl Database {
    pub async fn insert_patient_record(&self, patient: &Patient) -> Result<()> {
        let record = patient.clone();
        self.execute(move |conn| {
            let created_at = record.created_at.unwrap_or_else(Utc::now);
            conn.execute(
                "INSERT INTO patients (id, patient_type, age, weight, height, has_diabetes, diabetes_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.patient_type,
                    record.age,
                    record.weight,
                    record.height,
                    record.has_diabetes as i64,
                    record.diabetes_type,
                    format_datetime(&created_at),
                ],
            )
            .with_context(|| format!("failed to insert patient {}", record.id))?;
            Ok(())
        })
        .await
    }

    pub async fn get_patient_record(&self, patient_id: &str) -> Result<Option<Patient>> {
        let patient_id = patient_id.to_string();
        self.execute(move |conn| {
            let patient = conn
                .query_row(
                    "SELECT id, patient_type, age, weight, height, has_diabetes, diabetes_type, created_at
                     FROM patients
                     WHERE id = ?1",
                    params![patient_id],
                    row_to_patient,
                )
                .optional()?;
            Ok(patient)
        })
        .await
    }

    pub async fn list_patient_record_ids(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM patients ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl PatientRecords for Database {
    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        self.insert_patient_record(patient).await
    }

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        self.get_patient_record(patient_id).await
    }

    async fn list_patient_ids(&self) -> Result<Vec<String>> {
        self.list_patient_record_ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: &str, has_diabetes: bool) -> Patient {
        Patient {
            id: id.to_string(),
            patient_type: "adult".into(),
            age: 54,
            weight: 81.5,
            height: 172.0,
            has_diabetes,
            diabetes_type: has_diabetes.then_some(2),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn round_trips_patients() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("patients.sqlite3")).unwrap();

        db.insert_patient(&patient("P002", false)).await.unwrap();
        db.insert_patient(&patient("P001", true)).await.unwrap();
        assert!(db.insert_patient(&patient("P001", true)).await.is_err());

        let stored = db.get_patient("P001").await.unwrap().unwrap();
        assert!(stored.has_diabetes);
        assert_eq!(stored.diabetes_type, Some(2));
        assert_eq!(stored.age, 54);
        assert!(stored.created_at.is_some());

        assert!(db.get_patient("P999").await.unwrap().is_none());
        assert_eq!(db.list_patient_ids().await.unwrap(), vec!["P001", "P002"]);
    }
}
