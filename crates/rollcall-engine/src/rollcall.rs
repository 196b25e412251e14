use crate::absentee::AbsenteeDetector;
use crate::config::{Config, ConfigError};
use crate::extractor::{spawn_extractor, ExtractorHandle};
use crate::face::{FaceMatcher, MatchPolicy};
use crate::ledger::AttendanceLedger;
use crate::notifications::NotificationCenter;
use crate::session::SessionManager;
use crate::stats::StatsAggregator;
use rollcall_core::{Clock, LogSink, NearestMatcher, NotificationSink, Roster, SystemClock};
use rollcall_store::{Store, StoreError};
use rollcall_vision::{open_backend, VisionError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("face backend: {0}")]
    Vision(#[from] VisionError),
    #[error("cannot spawn extraction thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Collaborators the components are wired against.
#[derive(Clone)]
pub struct Wiring {
    pub store: Arc<Store>,
    pub roster: Arc<dyn Roster>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn NotificationSink>,
}

impl Wiring {
    /// The store doubles as roster; wall clock; log-only delivery.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            roster: store.clone(),
            store,
            clock: Arc::new(SystemClock),
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_roster(mut self, roster: Arc<dyn Roster>) -> Self {
        self.roster = roster;
        self
    }
}

/// Every attendance component, wired to one store.
pub struct Rollcall {
    pub sessions: SessionManager,
    pub ledger: Arc<AttendanceLedger>,
    pub faces: FaceMatcher,
    pub stats: StatsAggregator,
    pub absentees: Arc<AbsenteeDetector>,
    pub notifications: Arc<NotificationCenter>,
}

impl Rollcall {
    pub fn assemble(config: &Config, wiring: Wiring, extractor: ExtractorHandle) -> Self {
        let Wiring {
            store,
            roster,
            clock,
            sink,
        } = wiring;

        let notifications = Arc::new(NotificationCenter::new(
            store.clone(),
            roster.clone(),
            clock.clone(),
            sink,
        ));
        let absentees = Arc::new(AbsenteeDetector::new(
            store.clone(),
            roster.clone(),
            clock.clone(),
            notifications.clone(),
            config.absentee.clone(),
        ));
        let ledger = Arc::new(AttendanceLedger::new(store.clone(), roster.clone(), clock.clone()));
        let policy = MatchPolicy {
            matcher: NearestMatcher::new(config.face.metric),
            threshold: config.face.threshold,
            max_distance: config.face.max_distance,
            confirm_marks: config.notifications.confirm_face_marks,
        };

        Self {
            sessions: SessionManager::new(store.clone(), clock, absentees.clone()),
            faces: FaceMatcher::new(
                store.clone(),
                roster,
                ledger.clone(),
                notifications.clone(),
                extractor,
                policy,
            ),
            stats: StatsAggregator::new(store),
            ledger,
            absentees,
            notifications,
        }
    }

    /// Open the configured store and face backend and assemble the engine.
    ///
    /// Fails fast if the database cannot be migrated or ONNX models are missing.
    pub fn from_config(config: &Config, sink: Arc<dyn NotificationSink>) -> Result<Self, EngineError> {
        config.validate()?;
        let store = Arc::new(Store::open(&config.db_path)?);
        let backend = open_backend(&config.backend_spec())?;
        tracing::info!(backend = backend.name(), db = %config.db_path.display(), "engine starting");
        let extractor = spawn_extractor(backend, config.extract_timeout())?;
        Ok(Self::assemble(config, Wiring::new(store).with_sink(sink), extractor))
    }
}
