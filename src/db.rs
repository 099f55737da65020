use std::collections::BTreeSet;

use anyhow::Context;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{GradeRecord, Grades, RunSummary, Snapshot};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn source_key(record: &GradeRecord) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}",
        record.student_id,
        record.career_id,
        record.period_id,
        record.semester,
        record.group_id.map(|id| id.to_string()).unwrap_or_default(),
        record.subject_id.map(|id| id.to_string()).unwrap_or_default(),
    )
}

fn to_i32(value: u32, field: &str) -> anyhow::Result<i32> {
    i32::try_from(value).with_context(|| format!("{field} {value} does not fit in INTEGER"))
}

/// Store grade records, skipping rows already imported. Returns rows inserted.
pub async fn import_records(pool: &PgPool, records: &[GradeRecord]) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    let mut tx = pool.begin().await?;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO academic_timeline.grade_records
            (id, source_key, student_id, career_id, period_id, semester, group_id, subject_id,
             p1, p2, p3, o, pf, e1, e2, esp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_key(record))
        .bind(&record.student_id)
        .bind(to_i32(record.career_id, "career_id")?)
        .bind(to_i32(record.period_id, "period_id")?)
        .bind(to_i32(record.semester, "semester")?)
        .bind(record.group_id)
        .bind(record.subject_id)
        .bind(record.grades.p1)
        .bind(record.grades.p2)
        .bind(record.grades.p3)
        .bind(record.grades.o)
        .bind(record.grades.pf)
        .bind(record.grades.e1)
        .bind(record.grades.e2)
        .bind(record.grades.esp)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn fetch_grade_records(pool: &PgPool) -> anyhow::Result<Vec<GradeRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, career_id, period_id, semester, group_id, subject_id, \
         p1, p2, p3, o, pf, e1, e2, esp \
         FROM academic_timeline.grade_records \
         ORDER BY source_key",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let career_id: i32 = row.get("career_id");
        let period_id: i32 = row.get("period_id");
        let semester: i32 = row.get("semester");
        records.push(GradeRecord {
            student_id: row.get("student_id"),
            career_id: u32::try_from(career_id).context("negative career_id")?,
            period_id: u32::try_from(period_id).context("negative period_id")?,
            semester: u32::try_from(semester).context("negative semester")?,
            group_id: row.get("group_id"),
            subject_id: row.get("subject_id"),
            grades: Grades {
                p1: row.get("p1"),
                p2: row.get("p2"),
                p3: row.get("p3"),
                o: row.get("o"),
                pf: row.get("pf"),
                e1: row.get("e1"),
                e2: row.get("e2"),
                esp: row.get("esp"),
            }
            .cleaned(),
        });
    }

    Ok(records)
}

/// Persist a run's label set and snapshot table under `summary.run_id`.
pub async fn save_run(
    pool: &PgPool,
    summary: &RunSummary,
    graduates: &BTreeSet<String>,
    snapshots: &[Snapshot],
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO academic_timeline.runs (id, created_at, source, summary)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(summary.run_id)
    .bind(summary.generated_at)
    .bind(&summary.source)
    .bind(Json(summary))
    .execute(&mut *tx)
    .await?;

    for student_id in graduates {
        sqlx::query(
            "INSERT INTO academic_timeline.graduates (run_id, student_id) VALUES ($1, $2)",
        )
        .bind(summary.run_id)
        .bind(student_id)
        .execute(&mut *tx)
        .await?;
    }

    for snapshot in snapshots {
        sqlx::query(
            r#"
            INSERT INTO academic_timeline.snapshots
            (run_id, student_id, semestre_actual, promedio_p1, promedio_p2, promedio_p3,
             promedio_final, promedio_e1, promedio_e2, promedio_esp,
             semestres_recursados, resultado_final)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(summary.run_id)
        .bind(&snapshot.student_id)
        .bind(to_i32(snapshot.semestre_actual, "semestre_actual")?)
        .bind(snapshot.promedio_p1)
        .bind(snapshot.promedio_p2)
        .bind(snapshot.promedio_p3)
        .bind(snapshot.promedio_final)
        .bind(snapshot.promedio_e1)
        .bind(snapshot.promedio_e2)
        .bind(snapshot.promedio_esp)
        .bind(to_i32(snapshot.semestres_recursados, "semestres_recursados")?)
        .bind(i16::from(snapshot.resultado_final))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_distinguishes_subjects_and_handles_missing_ids() {
        let mut record = GradeRecord {
            student_id: "abc".to_string(),
            career_id: 2,
            period_id: 35,
            semester: 1,
            group_id: Some(10),
            subject_id: Some(100),
            grades: Grades::default(),
        };
        assert_eq!(source_key(&record), "abc:2:35:1:10:100");

        record.subject_id = None;
        assert_eq!(source_key(&record), "abc:2:35:1:10:");
    }
}
