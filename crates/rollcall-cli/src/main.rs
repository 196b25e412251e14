use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{
    AttendanceStatus, CaptureMethod, CourseId, FacultyId, Location, LogSink, MarkRequest,
    SessionId, StudentId, VerificationMethod,
};
use rollcall_engine::{BulkItem, Config, OpenSession, Rollcall};
use rollcall_store::Store;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage faculty members
    #[command(subcommand)]
    Faculty(FacultyCommand),
    /// Manage courses
    #[command(subcommand)]
    Course(CourseCommand),
    /// Manage students
    #[command(subcommand)]
    Student(StudentCommand),
    /// Enroll a student in a course
    Enroll {
        #[arg(long)]
        course: CourseId,
        #[arg(long)]
        student: StudentId,
    },
    /// Open, close and inspect sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// Record one student's attendance
    Mark(MarkArgs),
    /// Record many students from a JSON file of {student_id, status, method?}
    Bulk {
        session: String,
        file: PathBuf,
    },
    /// Attendance records of one student, newest first
    History {
        student: StudentId,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Face registration, identification and face-verified marks
    #[command(subcommand)]
    Face(FaceCommand),
    /// Attendance statistics
    #[command(subcommand)]
    Stats(StatsCommand),
    /// Reconcile absentees for one session, or every session that is due
    Reconcile {
        session: Option<String>,
    },
    /// Student notifications
    #[command(subcommand)]
    Notifications(NotificationCommand),
}

#[derive(Subcommand)]
enum FacultyCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum CourseCommand {
    Add {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        faculty: FacultyId,
    },
}

#[derive(Subcommand)]
enum StudentCommand {
    Add {
        /// Unique roll number
        #[arg(long)]
        roll: String,
        #[arg(long)]
        first: String,
        #[arg(long)]
        last: String,
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Open a session (times are UTC, HH:MM)
    Open {
        #[arg(long)]
        course: CourseId,
        #[arg(long)]
        faculty: FacultyId,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        start: NaiveTime,
        #[arg(long)]
        end: NaiveTime,
        #[arg(long, default_value = "manual")]
        capture: CaptureMethod,
    },
    /// Close a session and reconcile its absentees
    Close { session: String },
    /// Show a session with its records and statistics
    Show { session: String },
    /// List a course's sessions
    List {
        #[arg(long)]
        course: CourseId,
    },
}

#[derive(Args)]
struct MarkArgs {
    session: String,
    student: StudentId,
    status: AttendanceStatus,
    #[arg(long)]
    method: Option<VerificationMethod>,
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    latitude: Option<f64>,
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    longitude: Option<f64>,
    #[arg(long)]
    note: Option<String>,
}

#[derive(Subcommand)]
enum FaceCommand {
    /// Store a student's reference face from an image file
    Register { student: StudentId, image: PathBuf },
    /// Identify the largest face in an image among a session's students
    Identify { session: String, image: PathBuf },
    /// Identify every face in a group photo. Records nothing
    IdentifyAll { session: String, image: PathBuf },
    /// Record a face-verified presence
    Mark {
        session: String,
        student: StudentId,
        confidence: f32,
    },
}

#[derive(Subcommand)]
enum StatsCommand {
    Session { session: String },
    Student {
        student: StudentId,
        #[arg(long)]
        course: Option<CourseId>,
    },
    /// Students attending below a percentage, defaulting to the configured threshold
    Low {
        #[arg(long)]
        course: Option<CourseId>,
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(Subcommand)]
enum NotificationCommand {
    List {
        student: StudentId,
        #[arg(long)]
        unread: bool,
    },
    Read { id: Uuid },
    ReadAll { student: StudentId },
    /// Remind every student without a record in an open session
    Remind { session: String },
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn engine(config: &Config) -> Result<Rollcall> {
    Rollcall::from_config(config, Arc::new(LogSink)).context("starting attendance engine")
}

fn store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Faculty(FacultyCommand::Add { name, email }) => {
            print_json(&store(&config)?.insert_faculty(&name, &email)?)?;
        }
        Commands::Course(CourseCommand::Add {
            code,
            name,
            faculty,
        }) => {
            let store = store(&config)?;
            if store.faculty(faculty)?.is_none() {
                bail!("faculty not found: {faculty}");
            }
            print_json(&store.insert_course(&code, &name, faculty)?)?;
        }
        Commands::Student(StudentCommand::Add {
            roll,
            first,
            last,
            email,
        }) => {
            print_json(&store(&config)?.insert_student(&roll, &first, &last, &email)?)?;
        }
        Commands::Enroll { course, student } => {
            let store = store(&config)?;
            if store.course(course)?.is_none() {
                bail!("course not found: {course}");
            }
            if !store.student_exists(student)? {
                bail!("student not found: {student}");
            }
            let newly_enrolled = store.enroll(course, student)?;
            print_json(&serde_json::json!({
                "course_id": course,
                "student_id": student,
                "newly_enrolled": newly_enrolled,
            }))?;
        }
        Commands::Session(command) => {
            let rollcall = engine(&config)?;
            match command {
                SessionCommand::Open {
                    course,
                    faculty,
                    date,
                    start,
                    end,
                    capture,
                } => {
                    let session = rollcall.sessions.open(&OpenSession {
                        course_id: course,
                        faculty_id: faculty,
                        date,
                        start_time: start,
                        end_time: end,
                        capture,
                    })?;
                    print_json(&rollcall.sessions.view(session))?;
                }
                SessionCommand::Close { session } => {
                    print_json(&rollcall.sessions.close(&session.into())?)?;
                }
                SessionCommand::Show { session } => {
                    let id: SessionId = session.into();
                    print_json(&serde_json::json!({
                        "session": rollcall.sessions.get(&id)?,
                        "stats": rollcall.stats.session_stats(&id)?,
                        "records": rollcall.ledger.records_for_session(&id)?,
                    }))?;
                }
                SessionCommand::List { course } => {
                    print_json(&rollcall.sessions.list_for_course(course)?)?;
                }
            }
        }
        Commands::Mark(args) => {
            let rollcall = engine(&config)?;
            let mut request = MarkRequest::new(args.session.into(), args.student, args.status);
            if let Some(method) = args.method {
                request = request.with_method(method);
            }
            if let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) {
                request = request.with_location(Location::new(latitude, longitude));
            }
            if let Some(note) = args.note {
                request = request.with_note(note);
            }
            print_json(&rollcall.ledger.mark(&request)?)?;
        }
        Commands::Bulk { session, file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let items: Vec<BulkItem> = serde_json::from_str(&text)
                .with_context(|| format!("parsing bulk items from {}", file.display()))?;
            let rollcall = engine(&config)?;
            print_json(&rollcall.ledger.bulk_mark(&session.into(), &items)?)?;
        }
        Commands::History { student, limit } => {
            print_json(&engine(&config)?.ledger.history_for_student(student, limit)?)?;
        }
        Commands::Face(command) => {
            let rollcall = engine(&config)?;
            match command {
                FaceCommand::Register { student, image } => {
                    let image = read_image(&image)?;
                    print_json(&rollcall.faces.register_face(student, image).await?)?;
                }
                FaceCommand::Identify { session, image } => {
                    let image = read_image(&image)?;
                    print_json(&rollcall.faces.identify(&session.into(), image).await?)?;
                }
                FaceCommand::IdentifyAll { session, image } => {
                    let image = read_image(&image)?;
                    print_json(&rollcall.faces.identify_all(&session.into(), image).await?)?;
                }
                FaceCommand::Mark {
                    session,
                    student,
                    confidence,
                } => {
                    print_json(&rollcall.faces.mark_via_face(&session.into(), student, confidence)?)?;
                }
            }
        }
        Commands::Stats(command) => {
            let rollcall = engine(&config)?;
            match command {
                StatsCommand::Session { session } => {
                    print_json(&rollcall.stats.session_stats(&session.into())?)?;
                }
                StatsCommand::Student { student, course } => {
                    print_json(&rollcall.stats.student_stats(student, course)?)?;
                }
                StatsCommand::Low { course, threshold } => {
                    let threshold = threshold.unwrap_or(config.absentee.low_attendance_threshold);
                    print_json(&rollcall.stats.low_attendance(course, threshold)?)?;
                }
            }
        }
        Commands::Reconcile { session } => {
            let rollcall = engine(&config)?;
            match session {
                Some(session) => print_json(&rollcall.absentees.run(&session.into())?)?,
                None => print_json(&rollcall.absentees.reconcile_due()?)?,
            }
        }
        Commands::Notifications(command) => {
            let rollcall = engine(&config)?;
            let center = &rollcall.notifications;
            match command {
                NotificationCommand::List { student, unread } => {
                    print_json(&center.list(student, unread)?)?;
                }
                NotificationCommand::Read { id } => print_json(&center.mark_read(id)?)?,
                NotificationCommand::ReadAll { student } => {
                    let changed = center.mark_all_read(student)?;
                    print_json(&serde_json::json!({ "student_id": student, "marked_read": changed }))?;
                }
                NotificationCommand::Remind { session } => {
                    print_json(&center.remind(&session.into())?)?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mark_parses_wire_values() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "mark",
            "abc",
            "7",
            "late",
            "--method",
            "mobile_gps",
            "--latitude",
            "-33.9",
            "--longitude",
            "18.4",
        ])
        .unwrap();
        let Commands::Mark(args) = cli.command else {
            panic!("expected mark");
        };
        assert_eq!(args.status, AttendanceStatus::Late);
        assert_eq!(args.method, Some(VerificationMethod::MobileGps));
        assert_eq!(args.latitude, Some(-33.9));
    }

    #[test]
    fn test_half_location_is_rejected() {
        assert!(
            Cli::try_parse_from(["rollcall", "mark", "abc", "7", "present", "--latitude", "10"]).is_err()
        );
        assert!(
            Cli::try_parse_from(["rollcall", "mark", "abc", "7", "present", "--longitude", "-20"]).is_err()
        );
    }

    #[test]
    fn test_group_and_report_commands_parse() {
        let cli = Cli::try_parse_from(["rollcall", "face", "identify-all", "abc", "class.jpg"]).unwrap();
        assert!(matches!(cli.command, Commands::Face(FaceCommand::IdentifyAll { .. })));

        let cli = Cli::try_parse_from(["rollcall", "stats", "low", "--course", "3"]).unwrap();
        let Commands::Stats(StatsCommand::Low { course, threshold }) = cli.command else {
            panic!("expected stats low");
        };
        assert_eq!(course, Some(3));
        assert_eq!(threshold, None);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(Cli::try_parse_from(["rollcall", "mark", "abc", "7", "tardy"]).is_err());
    }

    #[test]
    fn test_session_open_parses_times() {
        let cli = Cli::try_parse_from([
            "rollcall", "session", "open", "--course", "1", "--faculty", "2", "--date",
            "2026-03-02", "--start", "09:00:00", "--end", "10:30:00",
        ])
        .unwrap();
        let Commands::Session(SessionCommand::Open { start, end, capture, .. }) = cli.command else {
            panic!("expected session open");
        };
        assert!(end > start);
        assert_eq!(capture, CaptureMethod::Manual);
    }
}
