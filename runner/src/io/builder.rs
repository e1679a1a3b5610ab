//! Implementation-specific builders and their registry.
//!
//! A [`Builder`] knows how to install an implementation on the host, remove
//! it again, and produce a container image for it. The [`BuilderRegistry`]
//! maps implementation ids to builders so the pipeline never dispatches on
//! raw strings itself.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, Value, context};
use tracing::{debug, info, instrument};

use crate::core::error::RunError;
use crate::core::naming::definition_path;
use crate::core::types::{AppInfo, BuildEnv, ExecResult, ImplemInfo, ResolvedContainer};
use crate::io::config::{BuilderConfig, Settings};
use crate::io::process::{describe, run_command, run_to_exec_result};

/// Capability set for one implementation family.
pub trait Builder {
    /// Write the container definition file and return its path.
    fn generate_definition_file(
        &self,
        app: &AppInfo,
        implem: &ImplemInfo,
        env: &BuildEnv,
        container: &ResolvedContainer,
        settings: &Settings,
    ) -> Result<PathBuf>;

    /// Build the image at `container.path` from its definition file.
    fn create_image(&self, container: &ResolvedContainer, settings: &Settings) -> Result<()>;

    fn install_on_host(
        &self,
        implem: &ImplemInfo,
        env: &BuildEnv,
        settings: &Settings,
    ) -> ExecResult;

    fn uninstall_host(
        &self,
        implem: &ImplemInfo,
        env: &BuildEnv,
        settings: &Settings,
    ) -> ExecResult;
}

/// Builders keyed by lowercase implementation id.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: BTreeMap<String, Box<dyn Builder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a [`CommandBuilder`] for every `[builders.*]` table in settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();
        for (id, config) in &settings.builders {
            registry.register(id, Box::new(CommandBuilder::new(config.clone())));
        }
        registry
    }

    /// Add or replace the builder for `id` (case-insensitive).
    pub fn register(&mut self, id: &str, builder: Box<dyn Builder>) {
        self.builders.insert(id.to_lowercase(), builder);
    }

    /// Builder for `implem`, or [`RunError::NoBuilder`] if none is registered.
    pub fn load(&self, implem: &ImplemInfo) -> Result<&dyn Builder, RunError> {
        self.builders
            .get(&implem.id.to_lowercase())
            .map(Box::as_ref)
            .ok_or_else(|| RunError::NoBuilder(implem.id.clone()))
    }
}

/// Builder driven by command templates from settings.
///
/// Templates see `id`, `version`, `url`, `build_dir`, `scratch_dir` and
/// `install_dir`; the definition template additionally sees `distro`,
/// `model`, `app_name`, `app_bin`, `app_source` and `package_install`.
pub struct CommandBuilder {
    config: BuilderConfig,
    templates: Environment<'static>,
}

impl CommandBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self {
            config,
            templates: Environment::new(),
        }
    }

    fn render(&self, template: &str, ctx: &Value) -> Result<String> {
        self.templates
            .render_str(template, ctx)
            .with_context(|| format!("render template '{template}'"))
    }

    fn command(&self, argv: &[String], ctx: &Value) -> Result<Command> {
        let rendered = argv
            .iter()
            .map(|arg| self.render(arg, ctx))
            .collect::<Result<Vec<_>>>()?;
        let (program, args) = rendered
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }

    fn run_host_command(
        &self,
        argv: &[String],
        label: &str,
        implem: &ImplemInfo,
        env: &BuildEnv,
        settings: &Settings,
    ) -> ExecResult {
        let ctx = host_context(implem, env);
        let mut cmd = match self.command(argv, &ctx) {
            Ok(cmd) => cmd,
            Err(err) => return ExecResult::failed(RunError::command(format!("{label}: {err:#}"))),
        };
        if env.build_dir.is_dir() {
            cmd.current_dir(&env.build_dir);
        }
        info!(command = %describe(&cmd), "{label}");
        run_to_exec_result(
            cmd,
            label,
            Duration::from_secs(settings.limits.command_timeout_secs),
            settings.limits.output_limit_bytes,
        )
    }
}

fn host_context(implem: &ImplemInfo, env: &BuildEnv) -> Value {
    context! {
        id => &implem.id,
        version => &implem.version,
        url => &implem.url,
        build_dir => env.build_dir.display().to_string(),
        scratch_dir => env.scratch_dir.display().to_string(),
        install_dir => env.install_dir.display().to_string(),
    }
}

/// Package manager invocation that brings in a toolchain for `distro`.
fn package_install(distro: &str) -> &'static str {
    let family = distro.split(':').next().unwrap_or(distro);
    match family {
        "ubuntu" | "debian" => {
            "apt-get update && apt-get install -y build-essential wget bzip2"
        }
        "centos" | "rockylinux" | "fedora" | "almalinux" => {
            "yum install -y gcc gcc-c++ make wget tar bzip2"
        }
        _ => "true",
    }
}

impl Builder for CommandBuilder {
    #[instrument(skip_all, fields(implem = %implem, image = %container.name))]
    fn generate_definition_file(
        &self,
        app: &AppInfo,
        implem: &ImplemInfo,
        env: &BuildEnv,
        container: &ResolvedContainer,
        _settings: &Settings,
    ) -> Result<PathBuf> {
        if self.config.definition.trim().is_empty() {
            return Err(anyhow!("no definition template for {}", implem.id));
        }
        let ctx = context! {
            distro => &container.distro,
            model => container.model.as_str(),
            app_name => &app.name,
            app_bin => &app.bin_path,
            app_source => &app.source,
            package_install => package_install(&container.distro),
            ..host_context(implem, env)
        };
        let body = self.render(&self.config.definition, &ctx)?;
        let path = definition_path(container);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create definition dir {}", parent.display()))?;
        }
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "definition file written");
        Ok(path)
    }

    #[instrument(skip_all, fields(image = %container.path.display()))]
    fn create_image(&self, container: &ResolvedContainer, settings: &Settings) -> Result<()> {
        let def = definition_path(container);
        if !def.exists() {
            return Err(anyhow!("missing definition file {}", def.display()));
        }
        let runtime = &settings.container.runtime;
        let mut cmd = if settings.container.nopriv {
            let mut cmd = Command::new(runtime);
            cmd.args(["build", "--fakeroot"]);
            cmd
        } else {
            let mut cmd = Command::new("sudo");
            cmd.args([runtime.as_str(), "build"]);
            cmd
        };
        cmd.arg(&container.path)
            .arg(&def)
            .current_dir(&container.build_dir);

        info!(command = %describe(&cmd), "building container image");
        let timeout = Duration::from_secs(settings.limits.command_timeout_secs);
        let output = run_command(cmd, timeout, settings.limits.output_limit_bytes)?;
        if let Some(reason) = output.failure_reason("image build", timeout) {
            return Err(anyhow!("{reason}: {}", output.stderr_text().trim()));
        }
        Ok(())
    }

    fn install_on_host(
        &self,
        implem: &ImplemInfo,
        env: &BuildEnv,
        settings: &Settings,
    ) -> ExecResult {
        self.run_host_command(
            &self.config.install,
            &format!("install {implem}"),
            implem,
            env,
            settings,
        )
    }

    fn uninstall_host(
        &self,
        implem: &ImplemInfo,
        env: &BuildEnv,
        settings: &Settings,
    ) -> ExecResult {
        self.run_host_command(
            &self.config.uninstall,
            &format!("uninstall {implem}"),
            implem,
            env,
            settings,
        )
    }
}
