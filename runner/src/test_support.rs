//! Test-only fixtures and scripted collaborators.
//!
//! Every scripted double appends its method name to a shared [`CallLog`], so
//! tests can assert on the exact sequence of external calls.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::error::RunError;
use crate::core::naming::definition_path;
use crate::core::types::{
    AppInfo, BuildEnv, ContainerConfig, ContainerSpec, ExecResult, ExperimentOutcome,
    ExperimentSpec, HostConfig, ImplemInfo, PackagingModel, ResolvedContainer,
};
use crate::io::analyzer::OutputAnalyzer;
use crate::io::builder::{Builder, BuilderRegistry};
use crate::io::config::Settings;
use crate::io::diagnostics::DiagnosticSink;
use crate::io::jobmgr::{JobManager, JobManagerDetector};
use crate::io::launcher::Launcher;
use crate::io::provision::ImagePuller;
use crate::pipeline::Collaborators;

/// Spec with build environments under `/work`, distro `ubuntu`, app `init-test`.
pub fn spec(id: &str, host_version: &str, container_version: &str) -> ExperimentSpec {
    spec_in(Path::new("/work"), id, host_version, container_version)
}

/// Like [`spec`], with environments under `root/host/<v>` and
/// `root/container/<v>`.
pub fn spec_in(
    root: &Path,
    id: &str,
    host_version: &str,
    container_version: &str,
) -> ExperimentSpec {
    ExperimentSpec {
        host: ImplemInfo::new(id, host_version),
        container_implem: ImplemInfo::new(id, container_version),
        container: ContainerSpec {
            distro: "ubuntu".to_string(),
            model: PackagingModel::Hybrid,
        },
        host_env: env_under(&root.join("host").join(host_version)),
        container_env: env_under(&root.join("container").join(container_version)),
        app: AppInfo {
            name: "init-test".to_string(),
            bin_path: "/opt/app/init-test".to_string(),
            source: String::new(),
            expected_output: None,
        },
    }
}

fn env_under(dir: &Path) -> BuildEnv {
    BuildEnv {
        build_dir: dir.join("build"),
        scratch_dir: dir.join("scratch"),
        install_dir: dir.join("install"),
    }
}

/// Recorded outcome for a version pair.
pub fn outcome(
    id: &str,
    host_version: &str,
    container_version: &str,
    pass: bool,
) -> ExperimentOutcome {
    ExperimentOutcome {
        pass,
        host: ImplemInfo::new(id, host_version),
        container: ImplemInfo::new(id, container_version),
        note: String::new(),
    }
}

/// Shared, ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: &str) {
        self.0.borrow_mut().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.borrow().iter().filter(|c| *c == call).count()
    }
}

/// Builder whose steps succeed unless told to fail.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBuilder {
    log: CallLog,
    definition_error: Option<String>,
    create_error: Option<String>,
    install_error: Option<String>,
    uninstall_error: Option<String>,
}

impl ScriptedBuilder {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn fail_definition(mut self, message: &str) -> Self {
        self.definition_error = Some(message.to_string());
        self
    }

    pub fn fail_create_image(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    pub fn fail_install(mut self, message: &str) -> Self {
        self.install_error = Some(message.to_string());
        self
    }

    pub fn fail_uninstall(mut self, message: &str) -> Self {
        self.uninstall_error = Some(message.to_string());
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

fn scripted_exec(label: &str, error: Option<&String>) -> ExecResult {
    match error {
        Some(message) => ExecResult {
            stdout: format!("{label}: started\n"),
            stderr: format!("{message}\n"),
            error: Some(RunError::command(message)),
        },
        None => ExecResult::ok(format!("{label}: ok\n"), ""),
    }
}

impl Builder for ScriptedBuilder {
    fn generate_definition_file(
        &self,
        _app: &AppInfo,
        _implem: &ImplemInfo,
        _env: &BuildEnv,
        container: &ResolvedContainer,
        _settings: &Settings,
    ) -> Result<PathBuf> {
        self.log.record("generate_definition_file");
        match &self.definition_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(definition_path(container)),
        }
    }

    fn create_image(&self, _container: &ResolvedContainer, _settings: &Settings) -> Result<()> {
        self.log.record("create_image");
        match &self.create_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    fn install_on_host(
        &self,
        _implem: &ImplemInfo,
        _env: &BuildEnv,
        _settings: &Settings,
    ) -> ExecResult {
        self.log.record("install_on_host");
        scripted_exec("install", self.install_error.as_ref())
    }

    fn uninstall_host(
        &self,
        _implem: &ImplemInfo,
        _env: &BuildEnv,
        _settings: &Settings,
    ) -> ExecResult {
        self.log.record("uninstall_host");
        scripted_exec("uninstall", self.uninstall_error.as_ref())
    }
}

pub struct ScriptedPuller {
    log: CallLog,
    error: Option<String>,
}

impl ScriptedPuller {
    pub fn new(log: CallLog) -> Self {
        Self { log, error: None }
    }

    pub fn failing(log: CallLog, message: &str) -> Self {
        Self {
            log,
            error: Some(message.to_string()),
        }
    }
}

impl ImagePuller for ScriptedPuller {
    fn pull(
        &self,
        _container: &ResolvedContainer,
        _implem: &ImplemInfo,
        _settings: &Settings,
    ) -> Result<()> {
        self.log.record("pull");
        match &self.error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

/// Diagnostic sink that keeps every saved result in memory.
pub struct RecordingSink {
    log: CallLog,
    error: Option<String>,
    saved: RefCell<Vec<ExecResult>>,
}

impl RecordingSink {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            error: None,
            saved: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(log: CallLog, message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(log)
        }
    }

    pub fn saved(&self) -> Vec<ExecResult> {
        self.saved.borrow().clone()
    }
}

impl DiagnosticSink for RecordingSink {
    fn save(
        &self,
        _host: &ImplemInfo,
        _container: &ImplemInfo,
        _settings: &Settings,
        exec: &ExecResult,
    ) -> Result<()> {
        self.log.record("save");
        if let Some(message) = &self.error {
            return Err(anyhow!("{message}"));
        }
        self.saved.borrow_mut().push(exec.clone());
        Ok(())
    }
}

/// What the scripted launcher reports.
#[derive(Debug, Clone)]
pub enum LaunchScript {
    Pass { stdout: String },
    /// The workload ran and reported failure.
    Fail { note: String },
    /// The launch itself broke.
    Error { message: String },
}

pub struct ScriptedLauncher {
    log: CallLog,
    script: LaunchScript,
    job_managers: RefCell<Vec<JobManager>>,
}

impl ScriptedLauncher {
    pub fn new(log: CallLog, script: LaunchScript) -> Self {
        Self {
            log,
            script,
            job_managers: RefCell::new(Vec::new()),
        }
    }

    pub fn passing(log: CallLog, stdout: &str) -> Self {
        Self::new(
            log,
            LaunchScript::Pass {
                stdout: stdout.to_string(),
            },
        )
    }

    /// Job managers the launcher was handed, in call order.
    pub fn job_managers(&self) -> Vec<JobManager> {
        self.job_managers.borrow().clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn run(
        &self,
        _app: &AppInfo,
        host: &HostConfig,
        _host_env: &BuildEnv,
        container: &ContainerConfig,
        job_manager: JobManager,
        _settings: &Settings,
        _extra_args: &[String],
    ) -> (ExperimentOutcome, ExecResult) {
        self.log.record("run");
        self.job_managers.borrow_mut().push(job_manager);
        let mut outcome = ExperimentOutcome {
            pass: true,
            host: host.implem.clone(),
            container: container.implem.clone(),
            note: String::new(),
        };
        let exec = match &self.script {
            LaunchScript::Pass { stdout } => ExecResult::ok(stdout.as_str(), ""),
            LaunchScript::Fail { note } => {
                outcome.pass = false;
                outcome.note = note.clone();
                ExecResult::ok("", "assertion failed\n")
            }
            LaunchScript::Error { message } => ExecResult {
                stdout: String::new(),
                stderr: format!("{message}\n"),
                error: Some(RunError::command(message)),
            },
        };
        (outcome, exec)
    }
}

/// Detector that always answers with the same job manager.
pub struct FixedJobManager(pub JobManager);

impl JobManagerDetector for FixedJobManager {
    fn detect(&self) -> JobManager {
        self.0
    }
}

pub struct ScriptedAnalyzer {
    log: CallLog,
    error: Option<String>,
}

impl ScriptedAnalyzer {
    pub fn new(log: CallLog) -> Self {
        Self { log, error: None }
    }

    pub fn failing(log: CallLog, message: &str) -> Self {
        Self {
            log,
            error: Some(message.to_string()),
        }
    }
}

impl OutputAnalyzer for ScriptedAnalyzer {
    fn analyze(
        &self,
        exec: &ExecResult,
        outcome: &mut ExperimentOutcome,
        app: &AppInfo,
        _settings: &Settings,
    ) -> Result<()> {
        self.log.record("analyze");
        if let Some(message) = &self.error {
            return Err(anyhow!("{message}"));
        }
        outcome.note = format!("{}: {}", app.name, exec.stdout.trim());
        Ok(())
    }
}

/// A full set of scripted collaborators sharing one [`CallLog`].
pub struct Doubles {
    pub log: CallLog,
    pub builders: BuilderRegistry,
    pub job_manager: FixedJobManager,
    pub launcher: ScriptedLauncher,
    pub puller: ScriptedPuller,
    pub sink: RecordingSink,
    pub analyzer: ScriptedAnalyzer,
}

impl Doubles {
    /// Everything succeeds; `builder` is registered for `implem_id`.
    pub fn new(implem_id: &str, builder: ScriptedBuilder) -> Self {
        let log = builder.log();
        let mut builders = BuilderRegistry::new();
        builders.register(implem_id, Box::new(builder));
        Self {
            builders,
            job_manager: FixedJobManager(JobManager::Native),
            launcher: ScriptedLauncher::passing(log.clone(), "Hello from rank 0"),
            puller: ScriptedPuller::new(log.clone()),
            sink: RecordingSink::new(log.clone()),
            analyzer: ScriptedAnalyzer::new(log.clone()),
            log,
        }
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            builders: &self.builders,
            job_managers: &self.job_manager,
            launcher: &self.launcher,
            puller: &self.puller,
            diagnostics: &self.sink,
            analyzer: &self.analyzer,
        }
    }
}
