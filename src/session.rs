use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::frame_source::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initialized,
    Rendering,
    Completed,
    Failed,
}

/// Persisted session state (§4.8). Rewritten atomically after every mutating operation.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub template: String,
    pub status: SessionStatus,
    /// Count of video segments appended so far (segment 0, the init image segment, doesn't
    /// count towards this; §6 "segment_index 0, status initialized" immediately after init).
    pub segment_index: u32,
    /// Rotating cursor into the template's transitions list; advances by one per append.
    pub current_transition_index: usize,
    /// Subtitle text rendered once from the template at `init`, reused by every append and by
    /// `finalize` since `append_session` takes no date parameter (§6).
    pub subtitle_text: String,
    pub final_path: Option<PathBuf>,
}

/// On-disk session directory layout and state machine (§4.8, §9). The active-session registry
/// is derived from a directory scan rather than an in-memory map, so status queries and
/// appends are correct after a process restart.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn segments_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("segments")
    }

    pub fn segment_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.segments_dir(session_id).join(format!("segment_{index}.h264"))
    }

    fn metadata_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("metadata.json")
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(".append.lock")
    }

    fn last_frame_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("last_frame.rgb")
    }

    pub fn create(&self, session_id: &str, template: &str, subtitle_text: &str) -> Result<SessionMetadata> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(dir.join("segments"))?;
        let metadata = SessionMetadata {
            session_id: session_id.to_string(),
            template: template.to_string(),
            status: SessionStatus::Initialized,
            segment_index: 0,
            current_transition_index: 0,
            subtitle_text: subtitle_text.to_string(),
            final_path: None,
        };
        self.write_metadata(&metadata)?;
        tracing::info!(session_id, "session initialized");
        Ok(metadata)
    }

    pub fn load(&self, session_id: &str) -> Result<SessionMetadata> {
        let path = self.metadata_path(session_id);
        let text = std::fs::read_to_string(&path)
            .map_err(|_| Error::session(format!("unknown session '{session_id}'")))?;
        serde_json::from_str(&text).map_err(|e| Error::session(format!("corrupt session metadata: {e}")))
    }

    pub fn write_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        let dir = self.session_dir(&metadata.session_id);
        std::fs::create_dir_all(&dir)?;
        let final_path = self.metadata_path(&metadata.session_id);
        let tmp_path = dir.join("metadata.json.tmp");
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| Error::session(format!("failed to serialize session metadata: {e}")))?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Acquire the per-session advisory append lock via exclusive-create semantics, so a
    /// second concurrent append (even from a different process) observes a conflict (§5).
    pub fn acquire_append_lock(&self, session_id: &str) -> Result<AppendLock<'_>> {
        let path = self.lock_path(session_id);
        OpenOptions::new().create_new(true).write(true).open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::session(format!("session '{session_id}' is already being appended to"))
            } else {
                Error::session(format!("failed to acquire append lock: {e}"))
            }
        })?;
        Ok(AppendLock { store: self, session_id: session_id.to_string() })
    }

    pub fn save_last_frame(&self, session_id: &str, frame: &Frame) -> Result<()> {
        std::fs::write(self.last_frame_path(session_id), &frame.data)?;
        Ok(())
    }

    pub fn load_last_frame(&self, session_id: &str, width: u32, height: u32) -> Result<Frame> {
        let path = self.last_frame_path(session_id);
        let data = std::fs::read(&path)
            .map_err(|e| Error::session(format!("no cached last frame for session '{session_id}': {e}")))?;
        let expected = Frame::byte_len(width, height);
        if data.len() != expected {
            return Err(Error::session(format!(
                "cached last frame has wrong size: expected {expected}, got {}",
                data.len()
            )));
        }
        Ok(Frame { width, height, data })
    }

    pub fn begin_append(&self, session_id: &str) -> Result<SessionMetadata> {
        let mut metadata = self.load(session_id)?;
        if metadata.status == SessionStatus::Completed {
            return Err(Error::session(format!("session '{session_id}' is already completed")));
        }
        if metadata.status == SessionStatus::Failed {
            return Err(Error::session(format!("session '{session_id}' has failed and cannot be appended to")));
        }
        metadata.status = SessionStatus::Rendering;
        self.write_metadata(&metadata)?;
        Ok(metadata)
    }

    pub fn commit_append(&self, mut metadata: SessionMetadata) -> Result<SessionMetadata> {
        metadata.segment_index += 1;
        metadata.current_transition_index += 1;
        metadata.status = SessionStatus::Rendering;
        self.write_metadata(&metadata)?;
        tracing::info!(session_id = %metadata.session_id, segment_index = metadata.segment_index, "segment appended");
        Ok(metadata)
    }

    pub fn mark_failed(&self, session_id: &str) -> Result<()> {
        let mut metadata = self.load(session_id)?;
        metadata.status = SessionStatus::Failed;
        self.write_metadata(&metadata)?;
        tracing::info!(session_id, "session marked failed");
        Ok(())
    }

    pub fn mark_completed(&self, session_id: &str, final_path: PathBuf) -> Result<SessionMetadata> {
        let mut metadata = self.load(session_id)?;
        metadata.status = SessionStatus::Completed;
        metadata.final_path = Some(final_path);
        self.write_metadata(&metadata)?;
        tracing::info!(session_id, "session finalized");
        Ok(metadata)
    }

    /// Removes everything under the session directory except `metadata.json`, once the
    /// published output has been safely written elsewhere (§5: "the session directory is
    /// removed after finalize's output file is safely published"). `metadata.json` itself is
    /// kept so `session_status` still answers after finalize, per §4.8 "after completed, only
    /// status reads are permitted".
    pub fn cleanup_after_finalize(&self, session_id: &str) -> Result<()> {
        let _ = std::fs::remove_dir_all(self.segments_dir(session_id));
        let _ = std::fs::remove_file(self.last_frame_path(session_id));
        let _ = std::fs::remove_file(self.lock_path(session_id));
        Ok(())
    }

    /// Segment 0 (the init image segment) plus one per append so far: `segment_index + 1`
    /// files in total, since `segment_index` only counts appends (§6).
    pub fn segment_paths(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let metadata = self.load(session_id)?;
        Ok((0..=metadata.segment_index).map(|i| self.segment_path(session_id, i)).collect())
    }

    /// Directory-scan-derived listing of every session under the root (§9: no in-memory
    /// global registry).
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Held for the duration of one `append`; releases the lock file on drop so a crashed append
/// doesn't permanently wedge the session (the session itself is left in `rendering` and must
/// be retried or finalized as-is).
pub struct AppendLock<'a> {
    store: &'a SessionStore,
    session_id: String,
}

impl Drop for AppendLock<'_> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.store.lock_path(&self.session_id));
    }
}

pub fn generate_session_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    format!("sess-{pid:x}-{n:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let created = store.create("s1", "classic", "").unwrap();
        assert_eq!(created.status, SessionStatus::Initialized);
        let loaded = store.load("s1").unwrap();
        assert_eq!(loaded.segment_index, 0);
    }

    #[test]
    fn unknown_session_is_session_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[test]
    fn append_lock_rejects_concurrent_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create("s1", "classic", "").unwrap();
        let lock1 = store.acquire_append_lock("s1").unwrap();
        let err = store.acquire_append_lock("s1");
        assert!(matches!(err, Err(Error::Session(_))));
        drop(lock1);
        assert!(store.acquire_append_lock("s1").is_ok());
    }

    #[test]
    fn segment_index_increments_and_finalize_fails_after_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create("s1", "classic", "").unwrap();

        let metadata = store.begin_append("s1").unwrap();
        let metadata = store.commit_append(metadata).unwrap();
        assert_eq!(metadata.segment_index, 1);
        let metadata = store.begin_append("s1").unwrap();
        let metadata = store.commit_append(metadata).unwrap();
        assert_eq!(metadata.segment_index, 2);
        assert_eq!(metadata.current_transition_index, 2);

        store.mark_completed("s1", PathBuf::from("final.mp4")).unwrap();
        assert!(store.begin_append("s1").is_err());
    }

    #[test]
    fn cleanup_after_finalize_removes_segments_and_last_frame_but_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create("s1", "classic", "").unwrap();
        let frame = Frame { width: 4, height: 4, data: vec![1u8; Frame::byte_len(4, 4)] };
        store.save_last_frame("s1", &frame).unwrap();
        std::fs::write(store.segment_path("s1", 0), b"fake segment").unwrap();

        store.mark_completed("s1", PathBuf::from("final.mp4")).unwrap();
        store.cleanup_after_finalize("s1").unwrap();

        assert!(!store.segments_dir("s1").exists());
        assert!(!store.last_frame_path("s1").exists());
        let loaded = store.load("s1").unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
    }

    #[test]
    fn last_frame_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create("s1", "classic", "").unwrap();
        let frame = Frame { width: 4, height: 4, data: vec![7u8; Frame::byte_len(4, 4)] };
        store.save_last_frame("s1", &frame).unwrap();
        let loaded = store.load_last_frame("s1", 4, 4).unwrap();
        assert_eq!(loaded, frame);
    }

    #[test]
    fn list_scans_directory_not_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create("a", "classic", "").unwrap();
        store.create("b", "classic", "").unwrap();
        let other = SessionStore::new(dir.path());
        assert_eq!(other.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
