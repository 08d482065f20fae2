//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Utc};
use tempfile::TempDir;

use crate::backup::archive::{sha256_file, write_checksum};
use crate::config::load::runtime_from_str;
use crate::config::model::RuntimeConfig;
use crate::context::Collaborators;
use crate::error::{Result, VaultError};
use crate::health::certificate::{CertificateInfo, CertificateProbe};
use crate::notify::Mailer;
use crate::remote::RemoteStore;
use crate::runtime::{HelperMount, HelperOutput, Runtime, ServiceStatus};
use crate::util::retry::Clock;

pub const TEST_ENV_FILE: &str = "APP_VERSION=1.2.3\n\
DOMAIN=app.example.com\n\
ENCRYPTION_KEY=c2VjcmV0LWtleS1tYXRlcmlhbA==\n\
POSTGRES_USER=app\n\
POSTGRES_DB=appdb\n";

pub const TEST_COMPOSE_FILE: &str = "services:\n  db:\n    image: postgres:16\n  app:\n    image: example/app:1.2.3\n";

const HEALTH_YAML: &str = "services: [\"db\", \"app\"]\n\
health:\n  timeoutSecs: 20\n  intervalSecs: 5\n  httpsAttempts: 3\n  httpsBackoffSecs: 1\n";

pub struct TestEnv {
    pub dir: TempDir,
    pub cfg: RuntimeConfig,
}

/// A stack directory with `.env` and `docker-compose.yml`, and backup, snapshot
/// and log directories under one temporary root.
pub fn test_env() -> TestEnv {
    let dir = TempDir::new().expect("tempdir");
    let stack = dir.path().join("stack");
    fs::create_dir_all(&stack).expect("stack dir");
    fs::write(stack.join(".env"), TEST_ENV_FILE).expect("env file");
    fs::write(stack.join("docker-compose.yml"), TEST_COMPOSE_FILE).expect("compose file");
    let yaml = format!(
        "stackDir: \"{}\"\nbackupDir: \"{}\"\nsnapshotDir: \"{}\"\nlogDir: \"{}\"\n{}",
        stack.display(),
        dir.path().join("backups").display(),
        dir.path().join("snapshot").display(),
        dir.path().join("logs").display(),
        HEALTH_YAML
    );
    let cfg = runtime_from_str(&yaml).expect("test config");
    TestEnv { dir, cfg }
}

/// Configuration with short health timings; paths are not meant to be touched.
pub fn test_config() -> RuntimeConfig {
    runtime_from_str(HEALTH_YAML).expect("test config")
}

pub fn local_time(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(year, month, day, hour, min, sec)
        .earliest()
        .expect("local time")
}

pub fn set_mtime(path: &Path, when: SystemTime) {
    let file = fs::File::options().write(true).open(path).expect("open");
    file.set_modified(when).expect("set mtime");
}

/// Rewrites `path` and moves its mtime into the future so size/mtime checks see it.
pub fn touch_later(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write");
    set_mtime(path, SystemTime::now() + Duration::from_secs(120));
}

/// Repackages an archive keeping only the members `keep` accepts, and refreshes
/// its checksum file.
pub fn rewrite_archive(path: &Path, keep: impl Fn(&str) -> bool) {
    let staging = TempDir::new().expect("tempdir");
    crate::backup::archive::extract_archive(path, staging.path()).expect("extract");
    let file = fs::File::create(path).expect("create");
    let mut tar = tar::Builder::new(flate2::write::GzEncoder::new(
        file,
        flate2::Compression::default(),
    ));
    for name in crate::util::paths::list_entries(staging.path()).expect("list") {
        if keep(&name) {
            tar.append_path_with_name(staging.path().join(&name), &name)
                .expect("append");
        }
    }
    tar.into_inner().expect("tar").finish().expect("gzip");
    let sum = sha256_file(path).expect("hash");
    write_checksum(path, &sum).expect("checksum");
}

pub struct FakeClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().expect("clock")
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        *self.offset.lock().expect("clock") += duration;
    }
}

#[derive(Default)]
struct RuntimeState {
    volumes: BTreeSet<String>,
    calls: Vec<String>,
    statuses: HashMap<String, VecDeque<ServiceStatus>>,
    drift: HashMap<String, String>,
    failing: HashSet<String>,
    dump: String,
}

/// Compose stack with services `db` and `app`. Helper containers are simulated:
/// `tar czf` writes a placeholder tarball into the host mount, rsync dry runs
/// report whatever [`FakeRuntime::set_drift`] configured until the next mirror.
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new(volumes: &[&str]) -> Self {
        let state = RuntimeState {
            volumes: volumes.iter().map(|v| v.to_string()).collect(),
            dump: "-- PostgreSQL database dump\nCREATE TABLE notes (id int);\n".to_string(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().expect("runtime state")
    }

    fn log(&self, call: String) {
        self.lock().calls.push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Queues a status for `status.name`; the last queued status sticks.
    pub fn push_status(&self, status: ServiceStatus) {
        self.lock()
            .statuses
            .entry(status.name.clone())
            .or_default()
            .push_back(status);
    }

    pub fn set_always_unready(&self, name: &str) {
        let mut queue = VecDeque::new();
        queue.push_back(ServiceStatus {
            name: name.to_string(),
            state: "restarting".to_string(),
            health: Some("unhealthy".to_string()),
        });
        self.lock().statuses.insert(name.to_string(), queue);
    }

    pub fn set_drift(&self, volume: &str, itemized: &str) {
        self.lock()
            .drift
            .insert(volume.to_string(), itemized.to_string());
    }

    pub fn fail_helper_for(&self, volume: &str) {
        self.lock().failing.insert(volume.to_string());
    }

    pub fn set_dump_contents(&self, contents: &str) {
        self.lock().dump = contents.to_string();
    }
}

fn host_dir(mounts: &[HelperMount], target: &str) -> Option<PathBuf> {
    mounts
        .iter()
        .find(|m| m.target == target && m.source.starts_with('/'))
        .map(|m| PathBuf::from(&m.source))
}

impl Runtime for FakeRuntime {
    fn list_services(&self) -> Result<Vec<String>> {
        Ok(vec!["db".to_string(), "app".to_string()])
    }

    fn start_services(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            self.log("up".to_string());
        } else {
            self.log(format!("up {}", names.join(" ")));
        }
        Ok(())
    }

    fn stop_services(&self, remove_volumes: bool) -> Result<()> {
        self.log(if remove_volumes { "down -v" } else { "down" }.to_string());
        Ok(())
    }

    fn service_status(&self, name: &str) -> Result<ServiceStatus> {
        let mut state = self.lock();
        let Some(queue) = state.statuses.get_mut(name) else {
            return Ok(ServiceStatus {
                name: name.to_string(),
                state: "running".to_string(),
                health: Some("healthy".to_string()),
            });
        };
        let status = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(status.unwrap_or_else(|| ServiceStatus::missing(name)))
    }

    /// Logged as `exec <service> <program>`, plus the SQL verb for `psql -c`.
    fn exec_in_service(&self, name: &str, command: &[String]) -> Result<Vec<u8>> {
        let program = command.first().cloned().unwrap_or_default();
        let verb = command
            .iter()
            .position(|a| a == "-c")
            .and_then(|i| command.get(i + 1))
            .and_then(|sql| sql.split_whitespace().next());
        match verb {
            Some(verb) => self.log(format!("exec {} {} {}", name, program, verb)),
            None => self.log(format!("exec {} {}", name, program)),
        }
        Ok(Vec::new())
    }

    fn exec_to_file(&self, name: &str, command: &[String], output: &Path) -> Result<()> {
        self.log(format!("dump {} {}", name, command.first().cloned().unwrap_or_default()));
        let dump = self.lock().dump.clone();
        fs::write(output, dump).map_err(VaultError::Io)
    }

    fn exec_with_input(&self, name: &str, command: &[String], input: &Path) -> Result<()> {
        if !input.is_file() {
            return Err(VaultError::message(format!("{} missing", input.display())));
        }
        self.log(format!("import {} {}", name, command.first().cloned().unwrap_or_default()));
        Ok(())
    }

    fn volume_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().volumes.contains(name))
    }

    fn create_volume(&self, name: &str) -> Result<()> {
        self.log(format!("volume-create {}", name));
        self.lock().volumes.insert(name.to_string());
        Ok(())
    }

    fn remove_volume(&self, name: &str) -> Result<()> {
        self.log(format!("volume-rm {}", name));
        self.lock().volumes.remove(name);
        Ok(())
    }

    fn run_helper(&self, _image: &str, mounts: &[HelperMount], command: &[String]) -> Result<HelperOutput> {
        let volume = mounts
            .iter()
            .find(|m| !m.source.starts_with('/'))
            .map(|m| m.source.clone())
            .unwrap_or_default();
        if self.lock().failing.contains(&volume) {
            self.log(format!("helper-fail {}", volume));
            return Ok(HelperOutput {
                code: 2,
                stdout: String::new(),
                stderr: "simulated failure".to_string(),
            });
        }
        let program = command.first().map(String::as_str).unwrap_or("");
        let mode = command.get(1).map(String::as_str).unwrap_or("");
        match (program, mode) {
            ("rsync", _) if command.iter().any(|a| a == "--dry-run") => {
                self.log(format!("rsync-dry-run {}", volume));
                let stdout = self.lock().drift.get(&volume).cloned().unwrap_or_default();
                Ok(HelperOutput {
                    code: 0,
                    stdout,
                    stderr: String::new(),
                })
            }
            ("rsync", _) => {
                self.log(format!("rsync-mirror {}", volume));
                self.lock().drift.remove(&volume);
                if let Some(dir) = host_dir(mounts, "/snapshot") {
                    fs::create_dir_all(&dir).map_err(VaultError::Io)?;
                    fs::write(dir.join("PG_VERSION"), "16\n").map_err(VaultError::Io)?;
                }
                Ok(HelperOutput::default())
            }
            ("tar", "czf") => {
                self.log(format!("tar {}", volume));
                let dir = host_dir(mounts, "/backup")
                    .ok_or_else(|| VaultError::message("no /backup mount"))?;
                let file = command
                    .get(2)
                    .and_then(|p| p.strip_prefix("/backup/"))
                    .ok_or_else(|| VaultError::message("no tar target"))?;
                fs::write(dir.join(file), format!("tarball of {}", volume)).map_err(VaultError::Io)?;
                Ok(HelperOutput::default())
            }
            ("tar", "xzf") => {
                self.log(format!("untar {}", volume));
                Ok(HelperOutput::default())
            }
            _ => Err(VaultError::message(format!("unexpected helper {:?}", command))),
        }
    }
}

pub struct FakeProbe {
    statuses: Mutex<VecDeque<u16>>,
    certificate: CertificateInfo,
}

impl FakeProbe {
    pub fn healthy() -> Self {
        Self::with_certificate(Self::valid_certificate())
    }

    pub fn with_certificate(certificate: CertificateInfo) -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            certificate,
        }
    }

    pub fn valid_certificate() -> CertificateInfo {
        let now = Utc::now();
        CertificateInfo {
            subject: Some("CN = app.example.com".to_string()),
            issuer: Some("C = US, O = Let's Encrypt, CN = R11".to_string()),
            not_before: Some(now - ChronoDuration::days(10)),
            not_after: Some(now + ChronoDuration::days(60)),
            verified: true,
        }
    }

    /// Queues an HTTPS status; once the queue drains every request sees 200.
    pub fn push_status(&self, code: u16) {
        self.statuses.lock().expect("probe").push_back(code);
    }
}

impl CertificateProbe for FakeProbe {
    fn https_status(&self, _domain: &str) -> Result<u16> {
        Ok(self.statuses.lock().expect("probe").pop_front().unwrap_or(200))
    }

    fn fetch_certificate(&self, _domain: &str) -> Result<CertificateInfo> {
        Ok(self.certificate.clone())
    }
}

struct RemoteObject {
    bytes: Vec<u8>,
    age_days: u32,
}

#[derive(Default)]
pub struct FakeRemote {
    objects: Mutex<BTreeMap<String, RemoteObject>>,
    failing_uploads: Mutex<u32>,
    failing_lookups: Mutex<u32>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.objects.lock().expect("remote").insert(
            key.to_string(),
            RemoteObject {
                bytes: bytes.to_vec(),
                age_days: 0,
            },
        );
    }

    pub fn put_aged(&self, key: &str, age_days: u32) {
        self.objects.lock().expect("remote").insert(
            key.to_string(),
            RemoteObject {
                bytes: b"x".to_vec(),
                age_days,
            },
        );
    }

    pub fn objects(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects
            .lock()
            .expect("remote")
            .iter()
            .map(|(k, v)| (k.clone(), v.bytes.clone()))
            .collect()
    }

    pub fn fail_next_uploads(&self, count: u32) {
        *self.failing_uploads.lock().expect("remote") = count;
    }

    pub fn fail_next_lookups(&self, count: u32) {
        *self.failing_lookups.lock().expect("remote") = count;
    }
}

impl RemoteStore for FakeRemote {
    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        {
            let mut failing = self.failing_uploads.lock().expect("remote");
            if *failing > 0 {
                *failing -= 1;
                return Err(VaultError::message("simulated upload failure"));
            }
        }
        let bytes = fs::read(local).map_err(VaultError::Io)?;
        self.put(remote, &bytes);
        Ok(())
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let bytes = self
            .objects
            .lock()
            .expect("remote")
            .get(remote)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| VaultError::message(format!("{} not found", remote)))?;
        fs::write(local, bytes).map_err(VaultError::Io)
    }

    fn exists(&self, remote: &str) -> Result<bool> {
        {
            let mut failing = self.failing_lookups.lock().expect("remote");
            if *failing > 0 {
                *failing -= 1;
                return Err(VaultError::message("simulated lookup failure"));
            }
        }
        Ok(self.objects.lock().expect("remote").contains_key(remote))
    }

    fn list(&self, prefix: &str, min_age_days: Option<u32>) -> Result<Vec<String>> {
        let dir = if prefix.ends_with(':') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };
        let min_age = min_age_days.unwrap_or(0);
        Ok(self
            .objects
            .lock()
            .expect("remote")
            .iter()
            .filter(|(_, o)| o.age_days >= min_age)
            .filter_map(|(k, _)| k.strip_prefix(&dir))
            .filter(|rest| !rest.contains('/'))
            .map(|rest| rest.to_string())
            .collect())
    }

    fn delete(&self, remote: &str) -> Result<()> {
        self.objects
            .lock()
            .expect("remote")
            .remove(remote)
            .map(|_| ())
            .ok_or_else(|| VaultError::message(format!("{} not found", remote)))
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl FakeMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().expect("mailer").clone()
    }
}

impl Mailer for FakeMailer {
    fn send(&self, to: &str, subject: &str, body: &str, attachment: Option<&Path>) -> Result<()> {
        self.sent.lock().expect("mailer").push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachment: attachment.map(Path::to_path_buf),
        });
        Ok(())
    }
}

pub struct FakeWorld {
    pub runtime: FakeRuntime,
    pub probe: FakeProbe,
    pub remote: FakeRemote,
    pub mailer: FakeMailer,
    pub clock: FakeClock,
}

impl FakeWorld {
    pub fn new(volumes: &[&str]) -> Self {
        Self {
            runtime: FakeRuntime::new(volumes),
            probe: FakeProbe::healthy(),
            remote: FakeRemote::new(),
            mailer: FakeMailer::new(),
            clock: FakeClock::new(),
        }
    }

    pub fn deps(&self) -> Collaborators<'_> {
        Collaborators {
            runtime: &self.runtime,
            probe: &self.probe,
            remote: &self.remote,
            mailer: &self.mailer,
            clock: &self.clock,
        }
    }
}
