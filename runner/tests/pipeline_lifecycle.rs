//! End-to-end pipeline behavior with scripted collaborators.
//!
//! Each test drives `run_experiment` or `run_batch` against a temporary
//! build tree and checks the returned report plus the exact sequence of
//! collaborator calls.

use std::fs;

use hybrid_runner::batch::run_batch;
use hybrid_runner::core::error::{FailureKind, FatalError};
use hybrid_runner::core::naming::output_filename;
use hybrid_runner::core::pruning::prune;
use hybrid_runner::core::resolve::resolve_configs;
use hybrid_runner::core::stage::Stage;
use hybrid_runner::io::config::Settings;
use hybrid_runner::io::jobmgr::JobManager;
use hybrid_runner::io::results::{append_result, load_results};
use hybrid_runner::pipeline::run_experiment;
use hybrid_runner::test_support::{
    Doubles, FixedJobManager, LaunchScript, RecordingSink, ScriptedAnalyzer, ScriptedBuilder,
    ScriptedLauncher, ScriptedPuller, outcome, spec_in,
};

fn settings_in(temp: &tempfile::TempDir) -> Settings {
    Settings {
        output_dir: temp.path().join("results"),
        ..Settings::default()
    }
}

#[test]
fn fresh_spec_runs_to_done() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let settings = settings_in(&temp);
    let doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());

    let pending = prune(std::slice::from_ref(&spec), &[]);
    assert_eq!(pending, vec![spec.clone()]);

    let report = run_experiment(&pending[0], &settings, doubles.collaborators()).expect("run");
    assert!(report.success);
    assert!(report.outcome.pass);
    assert_eq!(report.stage, Stage::Done);
    assert_eq!(report.failure, None);
    assert!(report.error().is_none());
    assert_eq!(report.outcome.note, "init-test: Hello from rank 0");
    assert_eq!(
        output_filename(&spec.host.id, settings.workload()),
        "OpenMPI-init-results.txt"
    );
    assert_eq!(
        doubles.log.calls(),
        vec!["install_on_host", "pull", "run", "analyze", "uninstall_host"]
    );
}

#[test]
fn configuration_directories_exist_before_install() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "3.1.4");
    let doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());

    run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert!(spec.host_env.build_dir.is_dir());
    assert!(spec.host_env.scratch_dir.is_dir());
    assert!(spec.container_env.build_dir.is_dir());
    assert!(spec.container_env.scratch_dir.is_dir());
}

#[test]
fn configuration_failure_stops_before_install() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let blocker = spec.host_env.build_dir.parent().expect("parent").to_path_buf();
    fs::create_dir_all(blocker.parent().expect("grandparent")).expect("mkdir");
    fs::write(&blocker, "not a directory").expect("blocker");
    let doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert!(!report.success);
    assert_eq!(report.stage, Stage::Configuring);
    assert_eq!(report.failure, Some(FailureKind::Configuration));
    let message = report.error().expect("error").to_string();
    assert!(message.starts_with("failed to set experiment's configuration"));
    assert!(doubles.log.calls().is_empty());
}

#[test]
fn install_failure_is_wrapped_and_saved_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let doubles = Doubles::new(
        "openmpi",
        ScriptedBuilder::succeeding().fail_install("configure: error: no compiler"),
    );

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert!(!report.success);
    assert!(!report.outcome.pass);
    assert_eq!(report.stage, Stage::InstallingHost);
    assert_eq!(report.failure, Some(FailureKind::Tooling));
    let message = report.error().expect("error").to_string();
    assert!(message.contains("failed to install MPI on host"));
    assert!(message.contains("configure: error: no compiler"));
    assert_eq!(doubles.log.count("save"), 1);
    assert_eq!(doubles.log.count("uninstall_host"), 0);

    let saved = doubles.sink.saved();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].stderr.contains("no compiler"));
}

#[test]
fn missing_builder_fails_install() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "IntelMPI", "2019", "2019");
    let doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    let message = report.error().expect("error").to_string();
    assert!(message.starts_with("failed to install MPI on host"));
    assert!(message.contains("no builder registered for implementation 'IntelMPI'"));
    assert_eq!(doubles.log.calls(), vec!["save"]);
}

#[test]
fn diagnostics_failure_is_reported_alongside_cause() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding().fail_install("boom"));
    doubles.sink = RecordingSink::failing(doubles.log.clone(), "disk full");

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    let message = report.error().expect("error").to_string();
    assert!(message.starts_with("failed to install MPI on host: boom"));
    assert!(message.ends_with("(failed to save error details: disk full)"));
}

#[test]
fn logical_failure_is_not_diagnosed_but_still_uninstalls() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "3.1.4");
    let mut doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());
    doubles.launcher = ScriptedLauncher::new(
        doubles.log.clone(),
        LaunchScript::Fail {
            note: "init-test exited with status 1".to_string(),
        },
    );

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert!(!report.success);
    assert_eq!(report.stage, Stage::Running);
    assert_eq!(report.failure, Some(FailureKind::Logical));
    assert!(report.error().is_none());
    assert_eq!(report.outcome.note, "init-test exited with status 1");
    assert_eq!(
        doubles.log.calls(),
        vec!["install_on_host", "pull", "run", "uninstall_host"]
    );
}

#[test]
fn launch_error_is_tooling_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());
    doubles.launcher = ScriptedLauncher::new(
        doubles.log.clone(),
        LaunchScript::Error {
            message: "init-test timed out after 7200s".to_string(),
        },
    );

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert!(!report.outcome.pass);
    assert_eq!(report.failure, Some(FailureKind::Tooling));
    assert_eq!(
        report.error().expect("error").to_string(),
        "failed to run experiment: init-test timed out after 7200s"
    );
    assert_eq!(
        doubles.log.calls(),
        vec!["install_on_host", "pull", "run", "save", "uninstall_host"]
    );
}

#[test]
fn analysis_failure_keeps_run_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());
    doubles.analyzer = ScriptedAnalyzer::failing(doubles.log.clone(), "no IMB benchmarks in output");

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert!(!report.success);
    assert_eq!(report.stage, Stage::Analyzing);
    assert_eq!(report.exec.stdout, "Hello from rank 0");
    assert_eq!(
        report.error().expect("error").to_string(),
        "failed to process output: no IMB benchmarks in output"
    );
    assert_eq!(doubles.log.count("save"), 0);
    assert_eq!(doubles.log.count("uninstall_host"), 1);
}

#[test]
fn pull_failure_uninstalls_host() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());
    doubles.puller = ScriptedPuller::failing(doubles.log.clone(), "registry unreachable");

    let report = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert_eq!(report.stage, Stage::ProvisioningContainer);
    assert_eq!(
        report.error().expect("error").to_string(),
        "failed to pull container: registry unreachable"
    );
    assert_eq!(
        doubles.log.calls(),
        vec!["install_on_host", "pull", "uninstall_host"]
    );
}

#[test]
fn container_build_failure_is_saved_once_and_uninstalls() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut settings = settings_in(&temp);
    settings.container.build_privilege = true;
    let doubles = Doubles::new(
        "openmpi",
        ScriptedBuilder::succeeding().fail_create_image("out of space"),
    );

    let report = run_experiment(&spec, &settings, doubles.collaborators()).expect("run");
    assert!(!report.success);
    assert!(!report.outcome.pass);
    assert_eq!(report.stage, Stage::ProvisioningContainer);
    assert_eq!(report.failure, Some(FailureKind::Tooling));
    let message = report.error().expect("error").to_string();
    assert!(message.starts_with("failed to create container"), "{message}");
    assert!(message.contains("out of space"), "{message}");
    assert_eq!(doubles.log.count("save"), 1);
    assert_eq!(doubles.sink.saved().len(), 1);
    assert_eq!(
        doubles.log.calls(),
        vec![
            "install_on_host",
            "generate_definition_file",
            "create_image",
            "save",
            "uninstall_host"
        ]
    );
}

#[test]
fn existing_image_skips_provisioning() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut settings = settings_in(&temp);
    settings.container.build_privilege = true;
    let (_, container) = resolve_configs(&spec, &settings.container.registry);
    fs::create_dir_all(&spec.container_env.install_dir).expect("install dir");
    fs::write(&container.container.path, "image").expect("image");
    let doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());

    let report = run_experiment(&spec, &settings, doubles.collaborators()).expect("run");
    assert!(report.success);
    assert_eq!(
        doubles.log.calls(),
        vec!["install_on_host", "run", "analyze", "uninstall_host"]
    );
}

#[test]
fn persistent_run_keeps_host_install() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut settings = settings_in(&temp);
    settings.persistent = true;
    let doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());

    let report = run_experiment(&spec, &settings, doubles.collaborators()).expect("run");
    assert!(report.success);
    assert_eq!(doubles.log.count("uninstall_host"), 0);
}

#[test]
fn uninstall_failure_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "MPICH", "3.3", "3.3");
    let doubles = Doubles::new(
        "mpich",
        ScriptedBuilder::succeeding().fail_uninstall("rm: permission denied"),
    );

    let err = run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).unwrap_err();
    let FatalError::Uninstall { implem, cause } = &err;
    assert_eq!(implem, "MPICH 3.3");
    assert_eq!(cause, "rm: permission denied");
    assert_eq!(
        err.to_string(),
        "failed to uninstall MPICH 3.3 from host: rm: permission denied"
    );
}

#[test]
fn job_manager_reaches_launcher() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0");
    let mut doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());
    doubles.job_manager = FixedJobManager(JobManager::Slurm);

    run_experiment(&spec, &settings_in(&temp), doubles.collaborators()).expect("run");
    assert_eq!(doubles.launcher.job_managers(), vec![JobManager::Slurm]);
}

#[test]
fn batch_skips_recorded_pairs_and_appends_new_results() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = settings_in(&temp);
    let specs = vec![
        spec_in(temp.path(), "OpenMPI", "4.0.0", "4.0.0"),
        spec_in(temp.path(), "OpenMPI", "4.0.0", "3.1.4"),
    ];
    let results_path = settings.output_dir.join("OpenMPI-init-results.txt");
    append_result(&results_path, &outcome("OpenMPI", "4.0.0", "4.0.0", true)).expect("seed");
    let doubles = Doubles::new("openmpi", ScriptedBuilder::succeeding());

    let summary = run_batch(&specs, &settings, doubles.collaborators()).expect("batch");
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.fatal.is_none());
    assert_eq!(doubles.log.count("run"), 1);

    let recorded = load_results(&results_path, "OpenMPI").expect("load");
    let pairs: Vec<_> = recorded
        .iter()
        .map(|r| (r.host.version.as_str(), r.container.version.as_str(), r.pass))
        .collect();
    assert_eq!(
        pairs,
        vec![("4.0.0", "4.0.0", true), ("4.0.0", "3.1.4", true)]
    );

    let again = run_batch(&specs, &settings, doubles.collaborators()).expect("batch again");
    assert_eq!(again.skipped, 2);
    assert_eq!(doubles.log.count("run"), 1);
}

#[test]
fn batch_stops_on_fatal_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let settings = settings_in(&temp);
    let specs = vec![
        spec_in(temp.path(), "MPICH", "3.3", "3.3"),
        spec_in(temp.path(), "MPICH", "3.3", "3.2"),
    ];
    let doubles = Doubles::new("mpich", ScriptedBuilder::succeeding().fail_uninstall("busy"));

    let summary = run_batch(&specs, &settings, doubles.collaborators()).expect("batch");
    assert!(summary.fatal.is_some());
    assert_eq!(doubles.log.count("install_on_host"), 1);
    assert!(summary.reports.is_empty());
}
