//! C5 SessionScanner (§4.6): tails on-disk session journals to recover
//! events when the child writes transcripts asynchronously.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use notify::Event;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub trait ScannerCallbacks: Send + Sync {
    fn on_session_found(&self, session_id: &str);
    fn on_new_session(&self, session_id: &str);
    fn on_session_match_failed(&self);
}

#[derive(Debug, Clone, Default)]
struct FileState {
    processed_lines: u64,
    bound_session_id: Option<String>,
}

/// The `cwd` + *start window* fallback filter used when no `activeSessionId`
/// has been set yet (§4.6).
pub struct StartWindowFilter {
    pub cwd: PathBuf,
    pub start: DateTime<Utc>,
    pub window: Duration,
}

pub struct SessionScanner {
    root: PathBuf,
    start_window: Option<StartWindowFilter>,
    active_session_id: Mutex<Option<String>>,
    any_session_found: AtomicBool,
    first_poll: AtomicBool,
    files: Mutex<HashMap<PathBuf, FileState>>,
    callbacks: std::sync::Arc<dyn ScannerCallbacks>,
}

impl SessionScanner {
    pub fn new(
        root: impl Into<PathBuf>,
        start_window: Option<StartWindowFilter>,
        callbacks: std::sync::Arc<dyn ScannerCallbacks>,
    ) -> Self {
        Self {
            root: root.into(),
            start_window,
            active_session_id: Mutex::new(None),
            any_session_found: AtomicBool::new(false),
            first_poll: AtomicBool::new(true),
            files: Mutex::new(HashMap::new()),
            callbacks,
        }
    }

    /// `onNewSession(id)` also reaches here: any external caller that learns
    /// the active session id out of band (e.g. from a transport response)
    /// should call this so later bindings narrow correctly.
    pub fn set_active_session_id(&self, id: Option<String>) {
        *self.active_session_id.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.active_session_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One enumeration + read pass. Safe to call repeatedly; cheap when
    /// nothing has changed.
    pub async fn poll_once(&self) -> std::io::Result<()> {
        let is_first = self.first_poll.swap(false, Ordering::SeqCst);
        let mut paths = enumerate_jsonl_files(&self.root)?;
        paths.sort_by_key(|p| std::cmp::Reverse(mtime(p)));

        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        for path in &paths {
            let line_count = count_lines(path)?;
            let is_new_file = !files.contains_key(path);
            let state = files.entry(path.clone()).or_insert_with(|| FileState {
                processed_lines: if is_first && is_new_file { line_count } else { 0 },
                bound_session_id: None,
            });

            if line_count <= state.processed_lines {
                continue;
            }
            let new_lines = read_lines_from(path, state.processed_lines)?;
            state.processed_lines = line_count;
            let mut bound = state.bound_session_id.clone();
            for line in new_lines {
                self.process_line(path, &line, &mut bound);
            }
            state.bound_session_id = bound;
        }
        Ok(())
    }

    fn process_line(&self, path: &Path, line: &str, bound_session_id: &mut Option<String>) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            return;
        };
        let Some(kind) = value.get("type").and_then(|t| t.as_str()) else {
            return;
        };
        if kind != "session_meta" {
            return;
        }
        let Some(session_id) = value
            .get("payload")
            .and_then(|p| p.get("id"))
            .and_then(|v| v.as_str())
        else {
            return;
        };
        *bound_session_id = Some(session_id.to_string());
        self.maybe_emit(path, session_id, value.get("payload"));
    }

    fn maybe_emit(&self, path: &Path, session_id: &str, payload: Option<&serde_json::Value>) {
        let active = self.active_session_id();
        let matches = match &active {
            Some(id) => {
                session_id == id
                    || path
                        .file_name()
                        .map(|n| n.to_string_lossy().ends_with(&format!("-{id}.jsonl")))
                        .unwrap_or(false)
            }
            None => self.matches_start_window(payload),
        };

        if !matches {
            if active.is_none() {
                self.callbacks.on_session_match_failed();
            }
            return;
        }

        self.set_active_session_id(Some(session_id.to_string()));
        if self.any_session_found.swap(true, Ordering::SeqCst) {
            self.callbacks.on_new_session(session_id);
        } else {
            self.callbacks.on_session_found(session_id);
        }
    }

    fn matches_start_window(&self, payload: Option<&serde_json::Value>) -> bool {
        let Some(filter) = &self.start_window else {
            return false;
        };
        let Some(payload) = payload else {
            return false;
        };
        let Some(cwd) = payload.get("cwd").and_then(|v| v.as_str()) else {
            return false;
        };
        if Path::new(cwd) != filter.cwd.as_path() {
            return false;
        }
        let Some(ts_raw) = payload.get("timestamp").and_then(|v| v.as_str()) else {
            return false;
        };
        let Ok(ts) = DateTime::parse_from_rfc3339(ts_raw) else {
            return false;
        };
        let delta = (ts.with_timezone(&Utc) - filter.start).num_milliseconds().abs();
        delta <= filter.window.as_millis() as i64
    }

    /// Runs the poll/watch loop until `shutdown` resolves.
    pub async fn run(
        self: std::sync::Arc<Self>,
        poll_interval: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) -> notify::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.poll_once().await;
                }
                Some(event) = rx.recv() => {
                    if event.is_ok() {
                        let _ = self.poll_once().await;
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        Ok(())
    }
}

fn enumerate_jsonl_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "jsonl") {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn mtime(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

fn count_lines(path: &Path) -> std::io::Result<u64> {
    let file = File::open(path)?;
    Ok(BufReader::new(file).lines().count() as u64)
}

fn read_lines_from(path: &Path, skip: u64) -> std::io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(0))?;
    let reader = BufReader::new(&file);
    Ok(reader
        .lines()
        .skip(skip as usize)
        .map_while(Result::ok)
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingCallbacks {
        found: Mutex<Vec<String>>,
        switched: Mutex<Vec<String>>,
        failed: Mutex<u32>,
    }

    impl ScannerCallbacks for RecordingCallbacks {
        fn on_session_found(&self, id: &str) {
            self.found.lock().unwrap().push(id.to_string());
        }
        fn on_new_session(&self, id: &str) {
            self.switched.lock().unwrap().push(id.to_string());
        }
        fn on_session_match_failed(&self) {
            *self.failed.lock().unwrap() += 1;
        }
    }

    fn write_jsonl(path: &Path, lines: &[&str]) {
        let mut f = File::create(path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    #[tokio::test]
    async fn pre_existing_lines_are_treated_as_historical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        write_jsonl(
            &path,
            &[r#"{"type":"session_meta","payload":{"id":"s1"}}"#],
        );

        let cb = Arc::new(RecordingCallbacks::default());
        let scanner = SessionScanner::new(dir.path(), None, cb.clone());
        scanner.poll_once().await.unwrap();

        assert!(cb.found.lock().unwrap().is_empty(), "pre-existing line must not re-announce");
    }

    #[tokio::test]
    async fn growth_after_startup_is_processed_and_bound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        write_jsonl(&path, &["{}"]);

        let cb = Arc::new(RecordingCallbacks::default());
        let scanner = SessionScanner::new(dir.path(), None, cb.clone());
        scanner.set_active_session_id(Some("s1".to_string()));
        scanner.poll_once().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, r#"{{"type":"session_meta","payload":{{"id":"s1"}}}}"#).unwrap();
        scanner.poll_once().await.unwrap();

        assert_eq!(*cb.found.lock().unwrap(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn active_session_id_suffix_match_binds_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-2024-01-01-s1.jsonl");
        write_jsonl(&path, &[]);

        let cb = Arc::new(RecordingCallbacks::default());
        let scanner = SessionScanner::new(dir.path(), None, cb.clone());
        scanner.set_active_session_id(Some("s1".to_string()));
        scanner.poll_once().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, r#"{{"type":"session_meta","payload":{{"id":"s1"}}}}"#).unwrap();
        scanner.poll_once().await.unwrap();

        assert_eq!(*cb.found.lock().unwrap(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn second_distinct_session_id_switches_via_on_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        write_jsonl(&path, &[]);

        let cb = Arc::new(RecordingCallbacks::default());
        let scanner = SessionScanner::new(dir.path(), None, cb.clone());
        scanner.set_active_session_id(Some("s1".to_string()));
        scanner.poll_once().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, r#"{{"type":"session_meta","payload":{{"id":"s1"}}}}"#).unwrap();
        scanner.poll_once().await.unwrap();

        scanner.set_active_session_id(Some("s2".to_string()));
        writeln!(f, r#"{{"type":"session_meta","payload":{{"id":"s2"}}}}"#).unwrap();
        scanner.poll_once().await.unwrap();

        assert_eq!(*cb.found.lock().unwrap(), vec!["s1".to_string()]);
        assert_eq!(*cb.switched.lock().unwrap(), vec!["s2".to_string()]);
    }

    #[tokio::test]
    async fn no_active_id_and_no_start_window_filter_refuses_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        write_jsonl(&path, &[]);

        let cb = Arc::new(RecordingCallbacks::default());
        let scanner = SessionScanner::new(dir.path(), None, cb.clone());
        scanner.poll_once().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, r#"{{"type":"session_meta","payload":{{"id":"s1","cwd":"/tmp"}}}}"#).unwrap();
        scanner.poll_once().await.unwrap();

        assert!(cb.found.lock().unwrap().is_empty());
        assert_eq!(*cb.failed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn start_window_filter_matches_cwd_and_nearby_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        write_jsonl(&path, &[]);

        let now = Utc::now();
        let cb = Arc::new(RecordingCallbacks::default());
        let scanner = SessionScanner::new(
            dir.path(),
            Some(StartWindowFilter {
                cwd: PathBuf::from("/workspace"),
                start: now,
                window: Duration::from_secs(60),
            }),
            cb.clone(),
        );
        scanner.poll_once().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(
            f,
            r#"{{"type":"session_meta","payload":{{"id":"s1","cwd":"/workspace","timestamp":"{}"}}}}"#,
            now.to_rfc3339()
        )
        .unwrap();
        scanner.poll_once().await.unwrap();

        assert_eq!(*cb.found.lock().unwrap(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn unparseable_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        write_jsonl(&path, &[]);

        let cb = Arc::new(RecordingCallbacks::default());
        let scanner = SessionScanner::new(dir.path(), None, cb.clone());
        scanner.set_active_session_id(Some("s1".to_string()));
        scanner.poll_once().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "not json at all").unwrap();
        scanner.poll_once().await.unwrap();

        assert!(cb.found.lock().unwrap().is_empty());
        assert_eq!(*cb.failed.lock().unwrap(), 0);
    }
}
