pub mod agent_core;
pub mod config;
pub mod inference;
pub mod storage;
pub mod tools;

use std::path::{Path, PathBuf};

pub use agent_core::{Agent, AgentError, ErrorKind, QueryResult};
pub use config::AgentConfig;
pub use storage::{KvStore, MemoryStore};

/// Return the platform-standard data directory for the agent.
///
/// - macOS: `~/Library/Application Support/kvquery-agent/`
/// - Windows: `{FOLDERID_RoamingAppData}\kvquery-agent\`
/// - Linux: `$XDG_DATA_HOME/kvquery-agent/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.kvquery-agent/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("kvquery-agent");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kvquery-agent")
}

/// Install the global tracing subscriber, writing to `log_dir/agent.log`.
///
/// Previous logs are rotated (`agent.log` → `.1` → `.2` → `.3`). When the
/// log file cannot be opened, output goes to stderr instead. Calling this
/// more than once is harmless; only the first subscriber is kept.
pub fn init_tracing(log_dir: &Path) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let _ = std::fs::create_dir_all(log_dir);
    let log_path = log_dir.join("agent.log");
    rotate_log_file(&log_path, 3);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kvquery_agent=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => builder
            .with_writer(FlushingWriter::new(file))
            .try_init()
            .is_ok(),
        Err(e) => {
            eprintln!("cannot open {}: {e}; logging to stderr", log_path.display());
            builder.with_writer(std::io::stderr).try_init().is_ok()
        }
    };

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = %log_path.display(),
            pid = std::process::id(),
            "=== kvquery-agent starting ==="
        );
    }
}

/// Shift `agent.log` to `agent.log.1`, `.1` to `.2`, and so on, keeping at
/// most `keep` old files. Gaps in the chain are fine.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let numbered = |n: u32| PathBuf::from(format!("{}.{n}", base_path.display()));

    let _ = std::fs::remove_file(numbered(keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(numbered(n), numbered(n + 1));
    }
    if base_path.exists() {
        let _ = std::fs::rename(base_path, numbered(1));
    }
}

/// A writer that flushes after every write so log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<parking_lot::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(parking_lot::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self.file.lock();
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(&mut *self.file.lock())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_log_file_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("agent.log");
        std::fs::write(&base, "current").unwrap();
        std::fs::write(dir.path().join("agent.log.1"), "one").unwrap();
        std::fs::write(dir.path().join("agent.log.3"), "three").unwrap();

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("agent.log.1"), "current");
        assert_eq!(read("agent.log.2"), "one");
        assert!(!dir.path().join("agent.log.3").exists());
    }

    #[test]
    fn test_init_tracing_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        init_tracing(&log_dir);
        init_tracing(&log_dir);
        assert!(log_dir.exists());
    }

    #[test]
    fn test_data_dir_is_named_for_crate() {
        let dir = data_dir();
        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name.contains("kvquery-agent"));
    }
}
