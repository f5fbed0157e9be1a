use std::path::Path;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use isotool::catalog::ArchiveCatalog;
use isotool::config::Settings;
use isotool::environment::{EnvironmentManager, RunOptions};
use isotool::error::EngineError;
use isotool::logging::{init_logging, LOG_FILE_NAME};
use isotool::manifest::RunMethod;
use isotool::process::{CommandSpec, ProcessRunner, StdioMode, SystemRunner};
use isotool::resolver::DependencyResolver;
use isotool::tools::ToolRegistry;
use crate::cli::{IsotoolCommand, CLI};

/// Runs one CLI command and returns the process exit code.
pub fn execute(cli: CLI) -> Result<i32> {
    let settings = Settings::from_env().context("failed to load settings")?;
    let log_file = settings
        .log_to_file
        .then(|| settings.logs_dir().join(LOG_FILE_NAME));
    // a subscriber may already be installed when embedded
    let _ = init_logging(cli.verbose, log_file.as_deref());

    let mut resolver = build_resolver(&settings)?;
    match cli.command {
        IsotoolCommand::List { installed } => execute_list(&mut resolver, installed),
        IsotoolCommand::Info { name } => execute_info(&mut resolver, &name),
        IsotoolCommand::Install { name, force } => execute_install(&mut resolver, &name, force),
        IsotoolCommand::Run { name, args } => execute_run(&mut resolver, &name, args),
        IsotoolCommand::Uninstall { name } => execute_uninstall(&mut resolver, &name),
        IsotoolCommand::Check { name, json } => execute_check(&mut resolver, &name, json),
        IsotoolCommand::Conflicts { names, json } => execute_conflicts(&mut resolver, &names, json),
        IsotoolCommand::Envs => execute_envs(&resolver),
        IsotoolCommand::Bundles => execute_bundles(&mut resolver),
        IsotoolCommand::BundleInfo { name } => execute_bundle_info(&mut resolver, &name),
        IsotoolCommand::InstallBundle { path } => execute_install_bundle(&mut resolver, &path),
        IsotoolCommand::RemoveBundle { name } => execute_remove_bundle(&mut resolver, &name),
        IsotoolCommand::Doctor => execute_doctor(&mut resolver, &settings),
        IsotoolCommand::Clean => execute_clean(&mut resolver),
    }
}

fn build_resolver(settings: &Settings) -> Result<DependencyResolver> {
    let environments = EnvironmentManager::new(settings).with_context(|| {
        format!(
            "could not create environments directory {}",
            settings.environments_dir().display()
        )
    })?;
    let tools = ToolRegistry::new(ArchiveCatalog::from_settings(settings));
    Ok(DependencyResolver::new(tools, environments))
}

fn status(installed: bool) -> colored::ColoredString {
    if installed {
        "installed".green()
    } else {
        "not installed".yellow()
    }
}

pub fn execute_list(resolver: &mut DependencyResolver, installed_only: bool) -> Result<i32> {
    let tools = resolver.tools().list_tools();
    if tools.is_empty() {
        println!("No tools found");
        return Ok(0);
    }
    for tool in tools {
        let installed = resolver.environments().environment_exists(&tool);
        if installed_only && !installed {
            continue;
        }
        let version = resolver
            .tools()
            .descriptor(&tool)
            .map(|d| d.version)
            .unwrap_or_default();
        println!("{tool}: {version} ({})", status(installed));
    }
    Ok(0)
}

pub fn execute_info(resolver: &mut DependencyResolver, name: &str) -> Result<i32> {
    let Some(descriptor) = resolver.tools().descriptor(name) else {
        bail!("Tool not found: {name}");
    };
    let Some(config) = resolver.tools().load_config(name, true) else {
        bail!("Failed to load configuration for {name}");
    };
    let identity = descriptor.tool_identity();

    println!("{}", format!("{} {}", config.name, config.version).bold());
    if !config.description.is_empty() {
        println!("  {}", config.description);
    }
    if !config.author.is_empty() {
        println!("  author: {}", config.author);
    }
    if !config.license.is_empty() {
        println!("  license: {}", config.license);
    }
    if !config.homepage.is_empty() {
        println!("  homepage: {}", config.homepage);
    }
    println!("  python: {}", config.python_version);
    println!("  archive: {}", descriptor.path.display());
    match &config.run_method {
        Some(RunMethod::EntryCommand(entry)) => println!("  entry point: {entry}"),
        Some(RunMethod::Module(module)) => println!("  module: {module}"),
        Some(RunMethod::Script(script)) => println!("  script: {script}"),
        Some(RunMethod::Command(command)) => println!("  command: {}", command.join(" ")),
        None => println!("  entry point: {}", "none".yellow()),
    }
    if !descriptor.entry_commands.is_empty() {
        println!("  commands:");
        for (command, target) in &descriptor.entry_commands {
            println!("    {command} = {target}");
        }
    }
    let dependencies = resolver.tools().tool_dependencies(name);
    if dependencies.is_empty() {
        println!("  dependencies: none");
    } else {
        println!("  dependencies:");
        for dependency in dependencies {
            println!("    {dependency}");
        }
    }
    println!(
        "  environment: {}",
        status(resolver.environments().environment_exists(&identity))
    );
    Ok(0)
}

pub fn execute_install(resolver: &mut DependencyResolver, name: &str, force: bool) -> Result<i32> {
    let Some(descriptor) = resolver.tools().descriptor(name) else {
        bail!("Tool not found: {name}");
    };
    let Some(config) = resolver.tools().load_config(name, true) else {
        bail!("Failed to load configuration for {name}");
    };
    if !config.platform.allows_current() {
        bail!("{name} is not available on {}", std::env::consts::OS);
    }
    let identity = descriptor.tool_identity();
    if force && resolver.environments().remove(&identity) {
        println!("Removed existing environment for {identity}");
    }

    println!("Installing {} {}", identity, descriptor.version);
    resolver
        .install_tool(name)
        .with_context(|| format!("failed to install {identity}"))?;
    println!("{} {} {}", "Installed".green(), identity, descriptor.version);
    Ok(0)
}

pub fn execute_run(resolver: &mut DependencyResolver, name: &str, args: Vec<String>) -> Result<i32> {
    let Some(descriptor) = resolver.tools().descriptor(name) else {
        bail!("Tool not found: {name}");
    };
    let identity = descriptor.tool_identity();
    if !resolver.environments().environment_exists(&identity) {
        bail!("{identity} is not installed. Run `isotool install {identity}` first");
    }
    resolver
        .ensure_environment(name)
        .with_context(|| format!("failed to prepare environment for {name}"))?;
    resolver
        .restore_archive(name)
        .with_context(|| format!("failed to reinstall {identity}"))?;
    let command = resolver.tools().build_run_command(name, &args)?;
    let options = RunOptions {
        stdio: StdioMode::Inherit,
        ..RunOptions::default()
    };
    let output = resolver
        .environments()
        .run_in_environment(&identity, &command, &options)?;
    Ok(output.code)
}

pub fn execute_uninstall(resolver: &mut DependencyResolver, name: &str) -> Result<i32> {
    let identity = resolver.tools().identity(name);
    if !resolver.environments().remove(&identity) {
        println!("{identity} is not installed");
        return Ok(1);
    }
    println!("{} {identity}", "Uninstalled".green());
    Ok(0)
}

pub fn execute_check(resolver: &mut DependencyResolver, name: &str, json: bool) -> Result<i32> {
    if !resolver.tools().tool_exists(name) {
        bail!("Tool not found: {name}");
    }
    let report = resolver.dependency_report(name);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.satisfied {
        println!("{} all {} dependencies satisfied", report.tool, report.required.len());
    } else {
        println!("{} missing dependencies:", report.tool);
        for requirement in &report.missing {
            println!("  {}", requirement.red());
        }
    }
    Ok(if report.satisfied { 0 } else { 1 })
}

pub fn execute_conflicts(resolver: &mut DependencyResolver, names: &[String], json: bool) -> Result<i32> {
    let conflicts = resolver.detect_conflicts(names);
    if json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
    } else if conflicts.is_empty() {
        println!("No conflicts");
    } else {
        for conflict in &conflicts {
            println!("{}: {}", conflict.package.red(), conflict.requirements.join(", "));
        }
    }
    Ok(if conflicts.is_empty() { 0 } else { 1 })
}

pub fn execute_envs(resolver: &DependencyResolver) -> Result<i32> {
    let environments = resolver.environments().list_environments();
    if environments.is_empty() {
        println!("No environments");
    }
    for environment in environments {
        println!("{environment}");
    }
    Ok(0)
}

pub fn execute_bundles(resolver: &mut DependencyResolver) -> Result<i32> {
    let bundles = resolver.tools().list_bundles();
    if bundles.is_empty() {
        println!("No bundles found");
        return Ok(0);
    }
    for bundle in bundles {
        let count = resolver.tools().bundle_tools(&bundle).len();
        println!("{bundle}: {count} tools");
    }
    Ok(0)
}

pub fn execute_bundle_info(resolver: &mut DependencyResolver, name: &str) -> Result<i32> {
    let tools = resolver.tools().catalog_mut().get_bundle_tools(name);
    if tools.is_empty() {
        return Err(EngineError::BundleNotFound(name.to_string()).into());
    }
    println!("{}", name.bold());
    for tool in tools {
        println!("  {} {}", tool.tool_identity(), tool.version);
    }
    Ok(0)
}

pub fn execute_install_bundle(resolver: &mut DependencyResolver, path: &Path) -> Result<i32> {
    if !resolver.tools().install_bundle(path) {
        bail!("Failed to install bundle from {}", path.display());
    }
    println!("{} bundle from {}", "Installed".green(), path.display());
    Ok(0)
}

pub fn execute_remove_bundle(resolver: &mut DependencyResolver, name: &str) -> Result<i32> {
    if !resolver.tools().catalog_mut().remove_bundle(name) {
        return Err(EngineError::BundleNotFound(name.to_string()).into());
    }
    println!("{} bundle {name}", "Removed".green());
    Ok(0)
}

pub fn execute_doctor(resolver: &mut DependencyResolver, settings: &Settings) -> Result<i32> {
    let mut issues = 0;
    let probe = CommandSpec::new(settings.python.as_str())
        .arg("--version")
        .timeout(Some(settings.validate_timeout()));
    match SystemRunner.run(&probe) {
        Ok(output) if output.success() => {
            let version = if output.stdout.trim().is_empty() {
                output.stderr.trim().to_string()
            } else {
                output.stdout.trim().to_string()
            };
            println!("{} base interpreter: {version}", "[OK]".green());
        }
        _ => {
            println!("{} base interpreter {} is not usable", "[!]".red(), settings.python);
            issues += 1;
        }
    }
    println!(
        "{} platform: {} {}",
        "[OK]".green(),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!(
        "{} {} tool environments",
        "[OK]".green(),
        resolver.environments().list_environments().len()
    );

    let tools = resolver.tools().list_tools();
    println!("{} {} tools found", "[OK]".green(), tools.len());
    for tool in &tools {
        if !resolver.tools().validate_tool_config(tool) {
            println!("{} tool {tool} has an invalid configuration", "[!]".red());
            issues += 1;
        }
    }
    println!("Found {issues} issues");
    Ok(if issues == 0 { 0 } else { 1 })
}

pub fn execute_clean(resolver: &mut DependencyResolver) -> Result<i32> {
    for environment in resolver.environments().list_environments() {
        println!("Removing environment {environment}");
        resolver.environments().remove(&environment);
    }
    resolver.tools().clear_cache();
    println!("Clean complete");
    Ok(0)
}
