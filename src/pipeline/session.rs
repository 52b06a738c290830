//! Session store: one pipeline per uploaded dataset

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Pipeline, PredictedValue, TrainingRequest, TrainingResult};
use crate::config::WorkbenchConfig;
use crate::error::{Result, WorkbenchError};

pub type SessionId = Uuid;

struct SessionEntry {
    pipeline: Arc<RwLock<Pipeline>>,
    created_at: DateTime<Utc>,
    last_access: Mutex<Instant>,
}

impl SessionEntry {
    fn touch(&self, now: Instant) {
        *self.last_access.lock() = now;
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }
}

/// Summary of a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub file_name: String,
    pub rows: usize,
    pub columns: usize,
    pub trained: bool,
    pub created_at: DateTime<Utc>,
}

/// Sessions shared across request handlers.
///
/// Training takes a session's write lock, prediction its read lock, so
/// predictions run side by side but never during a retrain. The map has its
/// own lock and is only held long enough to look up an entry.
pub struct SessionStore {
    config: WorkbenchConfig,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(WorkbenchConfig::default())
    }
}

impl SessionStore {
    pub fn new(config: WorkbenchConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    /// Parse a client-supplied id. Malformed ids are reported as unknown sessions.
    pub fn parse_id(id: &str) -> Result<SessionId> {
        Uuid::parse_str(id.trim()).map_err(|_| WorkbenchError::SessionNotFound(id.to_string()))
    }

    /// Validate `data` and open a session for it
    pub fn create(&self, data: DataFrame, file_name: impl Into<String>) -> Result<SessionId> {
        let pipeline = Pipeline::new(data, file_name, &self.config)?;
        let id = Uuid::new_v4();
        let entry = SessionEntry {
            pipeline: Arc::new(RwLock::new(pipeline)),
            created_at: Utc::now(),
            last_access: Mutex::new(Instant::now()),
        };
        self.sessions.write().insert(id, entry);
        info!(session = %id, "Session created");
        Ok(id)
    }

    /// Shared handle to a session's pipeline; refreshes its idle clock
    pub fn get(&self, id: &SessionId) -> Result<Arc<RwLock<Pipeline>>> {
        let sessions = self.sessions.read();
        let entry = sessions
            .get(id)
            .ok_or_else(|| WorkbenchError::SessionNotFound(id.to_string()))?;
        entry.touch(Instant::now());
        Ok(Arc::clone(&entry.pipeline))
    }

    /// Run `f` under the session's read lock
    pub fn with_pipeline<R>(&self, id: &SessionId, f: impl FnOnce(&Pipeline) -> Result<R>) -> Result<R> {
        let pipeline = self.get(id)?;
        let guard = pipeline.read();
        f(&guard)
    }

    /// Run `f` under the session's write lock
    pub fn with_pipeline_mut<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Pipeline) -> Result<R>,
    ) -> Result<R> {
        let pipeline = self.get(id)?;
        let mut guard = pipeline.write();
        f(&mut guard)
    }

    pub fn train(&self, id: &SessionId, request: &TrainingRequest) -> Result<TrainingResult> {
        self.with_pipeline_mut(id, |pipeline| pipeline.train(request))
    }

    pub fn predict(&self, id: &SessionId, rows: &DataFrame) -> Result<Vec<PredictedValue>> {
        self.with_pipeline(id, |pipeline| pipeline.predict(rows))
    }

    pub fn info(&self, id: &SessionId) -> Result<SessionInfo> {
        let created_at = {
            let sessions = self.sessions.read();
            sessions
                .get(id)
                .map(|entry| entry.created_at)
                .ok_or_else(|| WorkbenchError::SessionNotFound(id.to_string()))?
        };
        self.with_pipeline(id, |pipeline| {
            Ok(SessionInfo {
                id: *id,
                file_name: pipeline.file_name().to_string(),
                rows: pipeline.data().height(),
                columns: pipeline.data().width(),
                trained: pipeline.is_trained(),
                created_at,
            })
        })
    }

    /// Drop a session. Returns whether it existed.
    pub fn close(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            info!(session = %id, "Session closed");
        }
        removed
    }

    /// Evict sessions idle longer than the configured timeout
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    /// Evict relative to `now`; returns how many sessions were dropped.
    /// Handles already given out keep their pipeline alive until released.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let timeout = self.config.session_idle_timeout();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = entry.idle_for(now) <= timeout;
            if !keep {
                debug!(session = %id, "Evicting idle session");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
