use rollcall_store::db::migrations::{latest_version, user_version};
use rollcall_store::db::{open_db, open_db_in_memory};
use rollcall_store::{Store, StoreError};
use rusqlite::Connection;

#[test]
fn fresh_database_is_at_latest_version() {
    let conn = open_db_in_memory().unwrap();
    assert_eq!(user_version(&conn).unwrap(), latest_version());
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let err = conn
        .execute(
            "INSERT INTO courses (code, name, faculty_id) VALUES ('CS101', 'Intro', 999)",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"));
}

#[test]
fn file_database_uses_wal_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("rollcall.db");
    {
        let conn = open_db(&path).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
    let conn = open_db(&path).unwrap();
    assert_eq!(user_version(&conn).unwrap(), latest_version());
}

#[test]
fn newer_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(&format!("PRAGMA user_version = {};", latest_version() + 1))
            .unwrap();
    }
    match Store::open(&path) {
        Err(StoreError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        }) => {
            assert_eq!(db_version, latest_version() + 1);
            assert_eq!(latest_supported, latest_version());
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("newer schema must be refused"),
    }
}

#[test]
fn attendance_primary_key_rejects_duplicates() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO faculty (id, name, email) VALUES (1, 'Ada', 'ada@uni.edu');
         INSERT INTO courses (id, code, name, faculty_id) VALUES (1, 'CS101', 'Intro', 1);
         INSERT INTO students (id, roll_number, first_name, last_name, email)
             VALUES (1, 'R001', 'Sam', 'Lee', 'sam@uni.edu');
         INSERT INTO sessions (id, course_id, faculty_id, session_date, start_time, end_time,
                               capture_method, created_at)
             VALUES ('s1', 1, 1, '2026-03-02', '09:00:00', '10:00:00', 'manual', 0);
         INSERT INTO attendance_records (session_id, student_id, status, method, marked_at, updated_at)
             VALUES ('s1', 1, 'present', 'manual', 0, 0);",
    )
    .unwrap();
    let err = conn
        .execute(
            "INSERT INTO attendance_records (session_id, student_id, status, method, marked_at, updated_at)
             VALUES ('s1', 1, 'absent', 'manual', 1, 1)",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("UNIQUE"));
}

#[test]
fn confidence_only_allowed_for_face_marks() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO faculty (id, name, email) VALUES (1, 'Ada', 'ada@uni.edu');
         INSERT INTO courses (id, code, name, faculty_id) VALUES (1, 'CS101', 'Intro', 1);
         INSERT INTO students (id, roll_number, first_name, last_name, email)
             VALUES (1, 'R001', 'Sam', 'Lee', 'sam@uni.edu');
         INSERT INTO sessions (id, course_id, faculty_id, session_date, start_time, end_time,
                               capture_method, created_at)
             VALUES ('s1', 1, 1, '2026-03-02', '09:00:00', '10:00:00', 'face', 0);",
    )
    .unwrap();
    let err = conn
        .execute(
            "INSERT INTO attendance_records
                 (session_id, student_id, status, method, marked_at, updated_at, confidence)
             VALUES ('s1', 1, 'present', 'manual', 0, 0, 80.0)",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("CHECK"));
}
