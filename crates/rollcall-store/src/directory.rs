//! Faculty, courses, students and the enrollment relation.

use crate::codec::{embedding_from_blob, embedding_to_blob};
use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use rollcall_core::{
    AttendanceResult, Course, CourseId, Embedding, FaceCandidate, Faculty, FacultyId, Roster,
    Student, StudentId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const STUDENT_SELECT_SQL: &str = "SELECT
    id, roll_number, first_name, last_name, email, face_embedding, face_model
FROM students";

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<(Student, Option<Vec<u8>>, Option<String>)> {
    Ok((
        Student {
            id: row.get(0)?,
            roll_number: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            email: row.get(4)?,
            embedding: None,
        },
        row.get(5)?,
        row.get(6)?,
    ))
}

fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        faculty_id: row.get(3)?,
    })
}

pub(crate) fn student_exists(conn: &Connection, student_id: StudentId) -> StoreResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM students WHERE id = ?1)",
        [student_id],
        |row| row.get(0),
    )?)
}

pub(crate) fn is_enrolled(
    conn: &Connection,
    course_id: CourseId,
    student_id: StudentId,
) -> StoreResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM enrollments WHERE course_id = ?1 AND student_id = ?2)",
        params![course_id, student_id],
        |row| row.get(0),
    )?)
}

impl Store {
    pub fn insert_faculty(&self, name: &str, email: &str) -> StoreResult<Faculty> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO faculty (name, email) VALUES (?1, ?2)",
            params![name, email],
        )?;
        Ok(Faculty {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    pub fn faculty(&self, id: FacultyId) -> StoreResult<Option<Faculty>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, name, email FROM faculty WHERE id = ?1",
                [id],
                |row| {
                    Ok(Faculty {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn insert_course(&self, code: &str, name: &str, faculty_id: FacultyId) -> StoreResult<Course> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO courses (code, name, faculty_id) VALUES (?1, ?2, ?3)",
            params![code, name, faculty_id],
        )?;
        Ok(Course {
            id: conn.last_insert_rowid(),
            code: code.to_string(),
            name: name.to_string(),
            faculty_id,
        })
    }

    pub fn course(&self, id: CourseId) -> StoreResult<Option<Course>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, code, name, faculty_id FROM courses WHERE id = ?1",
                [id],
                course_from_row,
            )
            .optional()?)
    }

    pub fn insert_student(
        &self,
        roll_number: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> StoreResult<Student> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO students (roll_number, first_name, last_name, email)
             VALUES (?1, ?2, ?3, ?4)",
            params![roll_number, first_name, last_name, email],
        )?;
        Ok(Student {
            id: conn.last_insert_rowid(),
            roll_number: roll_number.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            embedding: None,
        })
    }

    /// Load a student together with their reference embedding, if any.
    pub fn student(&self, id: StudentId) -> StoreResult<Option<Student>> {
        let conn = self.conn();
        let row = conn
            .query_row(&format!("{STUDENT_SELECT_SQL} WHERE id = ?1"), [id], student_from_row)
            .optional()?;
        let Some((mut student, blob, model)) = row else {
            return Ok(None);
        };
        if let Some(blob) = blob {
            student.embedding = Some(embedding_from_blob(&blob, model).map_err(|e| {
                StoreError::Corrupt(format!("student {id}: {e}"))
            })?);
        }
        Ok(Some(student))
    }

    pub fn student_exists(&self, id: StudentId) -> StoreResult<bool> {
        student_exists(&self.conn(), id)
    }

    /// Add a student to a course roster. Returns false if already enrolled.
    pub fn enroll(&self, course_id: CourseId, student_id: StudentId) -> StoreResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO enrollments (course_id, student_id) VALUES (?1, ?2)
             ON CONFLICT(course_id, student_id) DO NOTHING",
            params![course_id, student_id],
        )?;
        Ok(changed == 1)
    }

    /// Replace a student's reference embedding. Returns false for an unknown student.
    pub fn set_face_embedding(&self, student_id: StudentId, embedding: &Embedding) -> StoreResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE students SET face_embedding = ?2, face_model = ?3 WHERE id = ?1",
            params![
                student_id,
                embedding_to_blob(embedding),
                embedding.model_version
            ],
        )?;
        Ok(changed == 1)
    }

    /// Enrolled student ids ordered by roll number.
    pub fn enrolled_students(&self, course_id: CourseId) -> StoreResult<Vec<StudentId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.course_id = ?1
             ORDER BY s.roll_number, s.id",
        )?;
        let ids = stmt
            .query_map([course_id], |row| row.get(0))?
            .collect::<Result<Vec<StudentId>, _>>()?;
        Ok(ids)
    }

    /// Reference embeddings of the enrolled students that have one.
    ///
    /// Undecodable blobs are skipped with a warning rather than failing the
    /// whole candidate set.
    pub fn face_candidates(&self, course_id: CourseId) -> StoreResult<Vec<FaceCandidate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.face_embedding, s.face_model FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.course_id = ?1 AND s.face_embedding IS NOT NULL
             ORDER BY s.roll_number, s.id",
        )?;
        let rows = stmt
            .query_map([course_id], |row| {
                Ok((
                    row.get::<_, StudentId>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut candidates = Vec::with_capacity(rows.len());
        for (student_id, blob, model) in rows {
            match embedding_from_blob(&blob, model) {
                Ok(embedding) => candidates.push(FaceCandidate {
                    student_id,
                    embedding,
                }),
                Err(e) => tracing::warn!(student_id, error = %e, "skipping undecodable embedding"),
            }
        }
        Ok(candidates)
    }
}

impl Roster for Store {
    fn roster(&self, course_id: CourseId) -> AttendanceResult<Vec<StudentId>> {
        Ok(self.enrolled_students(course_id)?)
    }

    fn is_enrolled(&self, course_id: CourseId, student_id: StudentId) -> AttendanceResult<bool> {
        Ok(is_enrolled(&self.conn(), course_id, student_id)?)
    }
}
