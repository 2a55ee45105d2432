use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{AttendanceRecord, AttendanceSession, ClassInfo};
use crate::sessions::{self, ScanPayload};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_class(conn: &mut PgConnection, name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO attendance_analytics.classes (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_profile(
    conn: &mut PgConnection,
    full_name: &str,
    roll_number: &str,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO attendance_analytics.profiles (id, full_name, roll_number)
        VALUES ($1, $2, $3)
        ON CONFLICT (roll_number) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(roll_number)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

/// Finds or creates the session stored under `source_key`. A key already
/// owned by another class is an error.
async fn upsert_keyed_session(
    conn: &mut PgConnection,
    class_id: Uuid,
    source_key: &str,
    held_at: DateTime<Utc>,
) -> anyhow::Result<Uuid> {
    let row = sqlx::query(
        r#"
        INSERT INTO attendance_analytics.qr_sessions
        (id, class_id, token, source_key, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_key) DO UPDATE SET source_key = EXCLUDED.source_key
        RETURNING id, class_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(class_id)
    .bind(sessions::generate_token())
    .bind(source_key)
    .bind(held_at)
    .bind(held_at + Duration::minutes(10))
    .fetch_one(&mut *conn)
    .await?;

    let owner: Uuid = row.get("class_id");
    if owner != class_id {
        anyhow::bail!("session {source_key:?} already belongs to another class");
    }
    Ok(row.get("id"))
}

async fn insert_mark(
    conn: &mut PgConnection,
    student_id: Uuid,
    class_id: Uuid,
    session_id: Uuid,
    marked_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance_analytics.attendance
        (id, student_id, class_id, qr_session_id, marked_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (qr_session_id, student_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(class_id)
    .bind(session_id)
    .bind(marked_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let students = vec![
        ("Avery Lee", "CS-2026-001"),
        ("Jules Moreno", "CS-2026-002"),
        ("Kiara Patel", "CS-2026-003"),
        ("Noah Okafor", "CS-2026-004"),
    ];

    let mut tx = pool.begin().await?;
    let mut student_ids = Vec::new();
    for (name, roll_number) in students {
        student_ids.push(upsert_profile(&mut tx, name, roll_number).await?);
    }

    // (class, session key, days ago, hour, attending students by index)
    let sessions = vec![
        ("Mathematics", "seed-math-1", 6, 9, vec![0, 1, 2, 3]),
        ("Mathematics", "seed-math-2", 4, 9, vec![0, 2]),
        ("Mathematics", "seed-math-3", 1, 9, vec![0, 1, 2]),
        ("Physics", "seed-phys-1", 5, 11, vec![1, 3]),
        ("Physics", "seed-phys-2", 0, 11, vec![0, 1, 3]),
        ("Chemistry", "seed-chem-1", 12, 14, vec![2, 3]),
        ("Chemistry", "seed-chem-2", 2, 14, vec![2]),
    ];

    let today = Utc::now().date_naive();
    let mut inserted = 0usize;

    for (class_name, source_key, days_ago, hour, attendees) in sessions {
        let class_id = upsert_class(&mut tx, class_name).await?;
        let held_at = (today - Duration::days(days_ago))
            .and_hms_opt(hour, 0, 0)
            .context("invalid seed time")?
            .and_utc();
        let session_id = upsert_keyed_session(&mut tx, class_id, source_key, held_at).await?;

        for (offset, index) in attendees.into_iter().enumerate() {
            let marked_at = held_at + Duration::minutes(offset as i64 + 1);
            if insert_mark(&mut tx, student_ids[index], class_id, session_id, marked_at).await? {
                inserted += 1;
            }
        }
    }

    tx.commit().await?;
    info!(inserted, "seeded attendance marks");
    Ok(inserted)
}

pub async fn fetch_classes(pool: &PgPool) -> anyhow::Result<Vec<ClassInfo>> {
    let rows = sqlx::query("SELECT id, name FROM attendance_analytics.classes ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| ClassInfo {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect())
}

pub async fn fetch_attendance(pool: &PgPool) -> anyhow::Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(
        "SELECT a.id, a.student_id, a.class_id, a.qr_session_id, a.marked_at, \
         p.full_name, p.roll_number, c.name AS class_name \
         FROM attendance_analytics.attendance a \
         JOIN attendance_analytics.profiles p ON p.id = a.student_id \
         JOIN attendance_analytics.classes c ON c.id = a.class_id \
         ORDER BY a.marked_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        records.push(AttendanceRecord {
            id: row.get("id"),
            student_id: row.get("student_id"),
            class_id: row.get("class_id"),
            session_id: row.get("qr_session_id"),
            marked_at: row.get("marked_at"),
            student_name: row.get("full_name"),
            roll_number: row.get("roll_number"),
            class_name: row.get("class_name"),
        });
    }

    debug!(count = records.len(), "fetched attendance records");
    Ok(records)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImportRow {
    pub roll_number: String,
    pub full_name: String,
    pub class_name: String,
    pub session_key: String,
    pub marked_at: DateTime<Utc>,
}

/// Reads and checks every row of an attendance CSV before anything is
/// written. A session key may only ever name one class.
pub fn read_import_rows<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> anyhow::Result<Vec<ImportRow>> {
    let mut rows = Vec::new();
    let mut session_classes: HashMap<String, String> = HashMap::new();

    for (index, result) in reader.deserialize::<ImportRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = result.with_context(|| format!("invalid row at line {line}"))?;
        if row.class_name.trim().is_empty()
            || row.roll_number.trim().is_empty()
            || row.session_key.trim().is_empty()
        {
            anyhow::bail!("row at line {line} is missing class, roll number or session key");
        }

        let owner = session_classes
            .entry(row.session_key.clone())
            .or_insert_with(|| row.class_name.clone());
        if *owner != row.class_name {
            anyhow::bail!(
                "row at line {line} puts session {:?} in {:?}, but it belongs to {:?}",
                row.session_key,
                row.class_name,
                owner
            );
        }

        rows.push(row);
    }

    Ok(rows)
}

/// Imports the whole file in one transaction; any bad row stores nothing.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_import_rows(reader)?;

    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for row in rows.iter() {
        let student_id = upsert_profile(&mut tx, &row.full_name, &row.roll_number).await?;
        let class_id = upsert_class(&mut tx, &row.class_name).await?;
        let source_key = format!("import-{}", row.session_key);
        let session_id = upsert_keyed_session(&mut tx, class_id, &source_key, row.marked_at)
            .await
            .with_context(|| format!("cannot import session {:?}", row.session_key))?;

        if insert_mark(&mut tx, student_id, class_id, session_id, row.marked_at).await? {
            inserted += 1;
        }
    }

    tx.commit().await?;
    info!(rows = rows.len(), inserted, "imported attendance csv");
    Ok(inserted)
}

pub async fn create_session(
    pool: &PgPool,
    class_id: Uuid,
    ttl_minutes: i64,
) -> anyhow::Result<AttendanceSession> {
    let session = sessions::open_session(class_id, Utc::now(), ttl_minutes)?;

    sqlx::query(
        r#"
        INSERT INTO attendance_analytics.qr_sessions
        (id, class_id, token, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(session.id)
    .bind(session.class_id)
    .bind(&session.token)
    .bind(session.created_at)
    .bind(session.expires_at)
    .execute(pool)
    .await
    .context("failed to store session; does the class exist?")?;

    info!(session_id = %session.id, %class_id, "opened attendance session");
    Ok(session)
}

pub async fn fetch_session(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<AttendanceSession>> {
    let row = sqlx::query(
        "SELECT id, class_id, token, created_at, expires_at \
         FROM attendance_analytics.qr_sessions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| AttendanceSession {
        id: row.get("id"),
        class_id: row.get("class_id"),
        token: row.get("token"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }))
}

pub async fn record_mark(
    pool: &PgPool,
    payload: &ScanPayload,
    student_id: Uuid,
) -> anyhow::Result<DateTime<Utc>> {
    let session = fetch_session(pool, payload.session_id)
        .await?
        .with_context(|| format!("no session {}", payload.session_id))?;

    let student_exists: bool = sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM attendance_analytics.profiles WHERE id = $1) AS found",
    )
    .bind(student_id)
    .fetch_one(pool)
    .await?
    .get("found");
    if !student_exists {
        anyhow::bail!("no student profile {student_id}");
    }

    let already_marked: bool = sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM attendance_analytics.attendance \
         WHERE qr_session_id = $1 AND student_id = $2) AS found",
    )
    .bind(session.id)
    .bind(student_id)
    .fetch_one(pool)
    .await?
    .get("found");

    let now = Utc::now();
    sessions::validate_scan(&session, &payload.token, now, already_marked)?;

    let mut conn = pool.acquire().await?;
    if !insert_mark(&mut conn, student_id, session.class_id, session.id, now).await? {
        return Err(sessions::ScanError::AlreadyMarked.into());
    }

    info!(session_id = %session.id, %student_id, "attendance marked");
    Ok(now)
}
