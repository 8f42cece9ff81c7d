//! Live tmux session queries.
//!
//! Every query spawns `tmux list-sessions -F <template>` with a hard deadline.
//! The result is never an error: a missing binary, a tmux server with no
//! sessions, a timeout and any other failure are all reported as
//! [`RegistryOutcome::Degraded`], which callers treat as "nothing observed
//! this call" rather than "no sessions exist".

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::identity::SessionIdentity;

/// Separates fields within one `list-sessions` line. Tab, because session
/// names may contain `:` and spaces.
pub const FIELD_SEPARATOR: char = '\t';

pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which `-F` template to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTemplate {
    /// `name`, `id`, `created`.
    KeysOnly,
    /// `name`, `id`, `created`, `path`.
    WithDirectory,
}

impl SessionTemplate {
    pub fn format(self) -> String {
        let mut fields = vec!["#{session_name}", "#{session_id}", "#{session_created}"];
        if self == SessionTemplate::WithDirectory {
            fields.push("#{session_path}");
        }
        fields.join(&FIELD_SEPARATOR.to_string())
    }

    pub fn field_count(self) -> usize {
        match self {
            SessionTemplate::KeysOnly => 3,
            SessionTemplate::WithDirectory => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub identity: SessionIdentity,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedReason {
    BinaryMissing,
    NoServer,
    TimedOut,
    Failed(String),
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradedReason::BinaryMissing => write!(f, "tmux binary not found"),
            DegradedReason::NoServer => write!(f, "no tmux server running"),
            DegradedReason::TimedOut => write!(f, "tmux query timed out"),
            DegradedReason::Failed(detail) => write!(f, "tmux query failed: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOutcome {
    /// tmux answered. An empty list is a confirmed absence of sessions.
    Live(Vec<LiveSession>),
    /// tmux could not be asked; the live set is unknown.
    Degraded(DegradedReason),
}

impl RegistryOutcome {
    pub fn sessions(&self) -> &[LiveSession] {
        match self {
            RegistryOutcome::Live(sessions) => sessions,
            RegistryOutcome::Degraded(_) => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, RegistryOutcome::Degraded(_))
    }
}

pub trait SessionRegistry: Send + Sync {
    fn list_sessions(&self, template: SessionTemplate) -> RegistryOutcome;
}

/// How to invoke tmux: the program plus any leading arguments
/// (for example `-L <socket-name>` to target a non-default server).
#[derive(Debug, Clone)]
pub struct TmuxCommand {
    program: PathBuf,
    base_args: Vec<String>,
}

impl Default for TmuxCommand {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(program: impl Into<PathBuf>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_socket_name(mut self, socket_name: impl Into<String>) -> Self {
        self.base_args.push("-L".to_string());
        self.base_args.push(socket_name.into());
        self
    }

    /// Runs tmux with `args` and returns stdout, or the degraded reason.
    pub fn run(&self, args: &[&str], timeout: Duration) -> Result<String, DegradedReason> {
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => DegradedReason::BinaryMissing,
                _ => DegradedReason::Failed(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    err
                )),
            })?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DegradedReason::TimedOut);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DegradedReason::Failed(format!("wait failed: {}", err)));
                }
            }
        };

        let stdout = collect_reader(stdout);
        if status.success() {
            return Ok(String::from_utf8_lossy(&stdout).into_owned());
        }

        let stderr = collect_reader(stderr);
        Err(classify_failure(
            &String::from_utf8_lossy(&stderr),
            status.code(),
        ))
    }
}

/// Registry backed by the tmux CLI.
#[derive(Debug, Clone)]
pub struct TmuxRegistry {
    command: TmuxCommand,
    keys_timeout: Duration,
    directory_timeout: Duration,
}

impl TmuxRegistry {
    /// Uses `timeout` for both templates.
    pub fn new(command: TmuxCommand, timeout: Duration) -> Self {
        Self {
            command,
            keys_timeout: timeout,
            directory_timeout: timeout,
        }
    }

    /// Overrides the deadline for [`SessionTemplate::WithDirectory`] queries.
    pub fn with_directory_timeout(mut self, timeout: Duration) -> Self {
        self.directory_timeout = timeout;
        self
    }

    pub fn timeout_for(&self, template: SessionTemplate) -> Duration {
        match template {
            SessionTemplate::KeysOnly => self.keys_timeout,
            SessionTemplate::WithDirectory => self.directory_timeout,
        }
    }
}

impl SessionRegistry for TmuxRegistry {
    fn list_sessions(&self, template: SessionTemplate) -> RegistryOutcome {
        let format = template.format();
        match self
            .command
            .run(&["list-sessions", "-F", &format], self.timeout_for(template))
        {
            Ok(output) => RegistryOutcome::Live(parse_sessions(&output, template).collect()),
            Err(reason) => {
                tracing::debug!(reason = %reason, ?template, "tmux session query degraded");
                RegistryOutcome::Degraded(reason)
            }
        }
    }
}

/// Parses `list-sessions` output lazily. Lines with fewer fields than the
/// template asks for are skipped; surplus separators stay in the last field.
pub fn parse_sessions(
    output: &str,
    template: SessionTemplate,
) -> impl Iterator<Item = LiveSession> + '_ {
    let field_count = template.field_count();
    output.lines().filter_map(move |line| {
        if line.is_empty() {
            return None;
        }
        let parts: Vec<&str> = line.splitn(field_count, FIELD_SEPARATOR).collect();
        if parts.len() < field_count {
            return None;
        }
        let directory = parts
            .get(3)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string());
        Some(LiveSession {
            identity: SessionIdentity::new(parts[0], parts[1], parts[2]),
            directory,
        })
    })
}

fn classify_failure(stderr: &str, code: Option<i32>) -> DegradedReason {
    let lowered = stderr.to_lowercase();
    if lowered.contains("no server running")
        || lowered.contains("no sessions")
        || lowered.contains("error connecting to")
    {
        return DegradedReason::NoServer;
    }

    let detail = stderr.trim();
    if detail.is_empty() {
        match code {
            Some(code) => DegradedReason::Failed(format!("exit status {}", code)),
            None => DegradedReason::Failed("terminated by signal".to_string()),
        }
    } else {
        DegradedReason::Failed(detail.to_string())
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Runs `script` through `/bin/sh` so the test never execs a freshly
    /// written file.
    fn fake_tmux(dir: &Path, script: &str) -> TmuxCommand {
        let path = dir.join("fake-tmux.sh");
        std::fs::write(&path, script).expect("write fake tmux");
        TmuxCommand::with_args("/bin/sh", [path.to_string_lossy().to_string()])
    }

    #[test]
    fn templates_use_tab_separated_session_fields() {
        assert_eq!(
            SessionTemplate::KeysOnly.format(),
            "#{session_name}\t#{session_id}\t#{session_created}"
        );
        assert_eq!(
            SessionTemplate::WithDirectory.format(),
            "#{session_name}\t#{session_id}\t#{session_created}\t#{session_path}"
        );
    }

    #[test]
    fn parse_sessions_skips_short_and_empty_lines() {
        let raw = "alpha\t$0\t100\n\nbroken\t$1\nbeta: two\t$2\t200\n";
        let sessions: Vec<_> = parse_sessions(raw, SessionTemplate::KeysOnly).collect();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].identity, SessionIdentity::new("alpha", "$0", "100"));
        assert_eq!(sessions[1].identity.name, "beta: two");
        assert!(sessions.iter().all(|s| s.directory.is_none()));
    }

    #[test]
    fn parse_sessions_reads_directory_and_keeps_tabs_in_it() {
        let raw = "alpha\t$0\t100\t/Users/pete/Code/a\nbeta\t$1\t200\t/odd\tpath\ngamma\t$2\t300\n";
        let sessions: Vec<_> = parse_sessions(raw, SessionTemplate::WithDirectory).collect();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].directory.as_deref(), Some("/Users/pete/Code/a"));
        assert_eq!(sessions[1].directory.as_deref(), Some("/odd\tpath"));
    }

    #[test]
    fn registry_returns_live_sessions_on_success() {
        let dir = tempfile::tempdir().expect("temp dir");
        let command = fake_tmux(
            dir.path(),
            "printf 'alpha\\t$0\\t100\\t/repo/a\\nbeta\\t$1\\t200\\t/repo/b\\n'\n",
        );
        let registry = TmuxRegistry::new(command, Duration::from_secs(5));

        let outcome = registry.list_sessions(SessionTemplate::WithDirectory);
        let sessions = outcome.sessions();
        assert!(!outcome.is_degraded());
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].identity.encode(), "beta+$1+200");
        assert_eq!(sessions[1].directory.as_deref(), Some("/repo/b"));
    }

    #[test]
    fn registry_passes_list_sessions_and_template() {
        let dir = tempfile::tempdir().expect("temp dir");
        let command = fake_tmux(
            dir.path(),
            "[ \"$1\" = list-sessions ] && [ \"$2\" = -F ] || exit 3\n\
             printf '%s\\n' \"$3\" | grep -q 'session_path' && exit 4\n\
             printf 'alpha\\t$0\\t100\\n'\n",
        );
        let registry = TmuxRegistry::new(command, Duration::from_secs(5));

        let outcome = registry.list_sessions(SessionTemplate::KeysOnly);
        assert_eq!(
            outcome,
            RegistryOutcome::Live(vec![LiveSession {
                identity: SessionIdentity::new("alpha", "$0", "100"),
                directory: None,
            }])
        );
    }

    #[test]
    fn confirmed_empty_listing_is_live_not_degraded() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = TmuxRegistry::new(fake_tmux(dir.path(), "exit 0\n"), Duration::from_secs(5));
        assert_eq!(
            registry.list_sessions(SessionTemplate::KeysOnly),
            RegistryOutcome::Live(Vec::new())
        );
    }

    #[test]
    fn no_server_exit_is_classified() {
        let dir = tempfile::tempdir().expect("temp dir");
        let command = fake_tmux(
            dir.path(),
            "echo 'no server running on /tmp/tmux-501/default' >&2\nexit 1\n",
        );
        let registry = TmuxRegistry::new(command, Duration::from_secs(5));
        assert_eq!(
            registry.list_sessions(SessionTemplate::KeysOnly),
            RegistryOutcome::Degraded(DegradedReason::NoServer)
        );
    }

    #[test]
    fn other_non_zero_exit_is_failed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let command = fake_tmux(dir.path(), "echo 'unknown option' >&2\nexit 2\n");
        let registry = TmuxRegistry::new(command, Duration::from_secs(5));
        assert_eq!(
            registry.list_sessions(SessionTemplate::KeysOnly),
            RegistryOutcome::Degraded(DegradedReason::Failed("unknown option".to_string()))
        );
    }

    #[test]
    fn missing_binary_is_classified() {
        let registry = TmuxRegistry::new(
            TmuxCommand::new("/nonexistent/waggle-test/tmux"),
            Duration::from_secs(1),
        );
        assert_eq!(
            registry.list_sessions(SessionTemplate::KeysOnly),
            RegistryOutcome::Degraded(DegradedReason::BinaryMissing)
        );
    }

    #[test]
    fn slow_query_times_out() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = TmuxRegistry::new(
            fake_tmux(dir.path(), "exec sleep 5\n"),
            Duration::from_millis(200),
        );

        let started = Instant::now();
        let outcome = registry.list_sessions(SessionTemplate::KeysOnly);
        assert_eq!(outcome, RegistryOutcome::Degraded(DegradedReason::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn directory_queries_use_their_own_deadline() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = TmuxRegistry::new(
            fake_tmux(dir.path(), "exec sleep 5\n"),
            Duration::from_millis(100),
        )
        .with_directory_timeout(Duration::from_millis(300));

        assert_eq!(
            registry.timeout_for(SessionTemplate::KeysOnly),
            Duration::from_millis(100)
        );
        assert_eq!(
            registry.list_sessions(SessionTemplate::WithDirectory),
            RegistryOutcome::Degraded(DegradedReason::TimedOut)
        );
    }

    #[test]
    fn socket_name_is_passed_before_subcommand() {
        let dir = tempfile::tempdir().expect("temp dir");
        let command = fake_tmux(
            dir.path(),
            "[ \"$1\" = -L ] && [ \"$2\" = agents ] || exit 9\nprintf 'x\\t$0\\t1\\n'\n",
        )
        .with_socket_name("agents");
        let registry = TmuxRegistry::new(command, Duration::from_secs(5));
        assert_eq!(registry.list_sessions(SessionTemplate::KeysOnly).sessions().len(), 1);
    }
}
