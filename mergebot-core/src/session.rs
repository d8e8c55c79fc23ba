//! In-memory accumulation of pending videos, one session per user.
//!
//! Every operation takes the store mutex for the length of a synchronous
//! critical section, so an add and a drain for the same user can never
//! interleave. Sessions are created lazily on the first video and removed
//! when a merge attempt ends; nothing here survives a restart.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::config::QuotaSection;
use crate::transport::VideoRef;
use crate::users::{SqliteUserStore, UserStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("video limit reached ({limit} per merge)")]
    QuotaExceeded { limit: usize },
    #[error("need at least {minimum} videos to merge, have {count}")]
    InsufficientVideos { count: usize, minimum: usize },
    #[error("a merge attempt is already in progress")]
    AttemptInProgress,
    #[error("user store error: {0}")]
    Store(#[from] UserStoreError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Default)]
struct SessionSlot {
    videos: Vec<VideoRef>,
    merging: bool,
}

#[derive(Debug)]
pub struct SessionStore {
    users: SqliteUserStore,
    quota: QuotaSection,
    sessions: Mutex<HashMap<i64, SessionSlot>>,
}

impl SessionStore {
    pub fn new(users: SqliteUserStore, quota: QuotaSection) -> Self {
        Self {
            users,
            quota,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the user's tier, creating the persisted record on first
    /// contact. The tier is read fresh on every command rather than cached.
    pub fn touch(&self, user_id: i64) -> SessionResult<Tier> {
        let record = self.users.get_or_create(user_id)?;
        Ok(if record.premium {
            Tier::Premium
        } else {
            Tier::Free
        })
    }

    pub fn limit_for(&self, tier: Tier) -> usize {
        self.quota.limit(tier)
    }

    /// Appends a video reference if the user's quota allows it and returns
    /// the new count. A rejected insert leaves the session unchanged.
    pub fn add_video(&self, user_id: i64, reference: VideoRef) -> SessionResult<usize> {
        let tier = self.touch(user_id)?;
        let limit = self.quota.limit(tier);
        let mut sessions = self.sessions.lock().unwrap();
        let slot = sessions.entry(user_id).or_default();
        if slot.videos.len() >= limit {
            return Err(SessionError::QuotaExceeded { limit });
        }
        slot.videos.push(reference);
        Ok(slot.videos.len())
    }

    pub fn pending(&self, user_id: i64) -> usize {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(&user_id)
            .map(|slot| slot.videos.len())
            .unwrap_or(0)
    }

    /// Atomically removes and returns the accumulated references in
    /// insertion order. With fewer than the minimum merge size present the
    /// session is left untouched so the user can keep adding.
    pub fn drain(&self, user_id: i64) -> SessionResult<Vec<VideoRef>> {
        let minimum = self.quota.min_merge_videos;
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&user_id) {
            Some(slot) if slot.videos.len() >= minimum => Ok(std::mem::take(&mut slot.videos)),
            Some(slot) => Err(SessionError::InsufficientVideos {
                count: slot.videos.len(),
                minimum,
            }),
            None => Err(SessionError::InsufficientVideos { count: 0, minimum }),
        }
    }

    /// Unconditional removal, called at the end of every merge attempt.
    pub fn clear(&self, user_id: i64) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(&user_id);
    }

    /// Marks the user's session as merging. A second call before
    /// [`SessionStore::end_attempt`] (or [`SessionStore::clear`]) fails, so
    /// only one orchestrator run per user can be in flight.
    pub fn begin_attempt(&self, user_id: i64) -> SessionResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let slot = sessions.entry(user_id).or_default();
        if slot.merging {
            return Err(SessionError::AttemptInProgress);
        }
        slot.merging = true;
        Ok(())
    }

    /// Releases the merge guard without touching accumulated videos. Used
    /// on the recoverable exit paths where the session must survive.
    pub fn end_attempt(&self, user_id: i64) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(slot) = sessions.get_mut(&user_id) {
            slot.merging = false;
        }
    }
}
