//! Compares what a tool declares against what its environment holds.
//!
//! For one tool the resolver walks
//! `NoEnvironment -> EnvironmentCreated -> DependenciesChecked -> Satisfied | Unsatisfied`.
//! Broken environments are rebuilt from scratch, never patched, and missing
//! requirements get exactly one install attempt.

use std::collections::BTreeMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use crate::environment::EnvironmentManager;
use crate::error::{EngineError, Result};
use crate::requirement::{canonical_name, check_version_compatibility, parse_requirement, ParsedRequirement};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolverState {
    NoEnvironment,
    EnvironmentCreated,
    DependenciesChecked,
    Satisfied,
    Unsatisfied,
}

/// A package that several tools constrain with different requirement strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub package: String,
    /// Every colliding requirement string, in encounter order.
    pub requirements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub tool: String,
    pub required: Vec<String>,
    pub installed: BTreeMap<String, String>,
    pub missing: Vec<String>,
    pub satisfied: bool,
}

pub struct DependencyResolver {
    tools: ToolRegistry,
    environments: EnvironmentManager,
}

impl DependencyResolver {
    pub fn new(tools: ToolRegistry, environments: EnvironmentManager) -> Self {
        Self { tools, environments }
    }

    pub fn tools(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn environments(&self) -> &EnvironmentManager {
        &self.environments
    }

    /// Declared requirements of `tool` that its environment doesn't satisfy.
    pub fn missing_dependencies(&mut self, tool: &str) -> Vec<String> {
        let identity = self.tools.identity(tool);
        let required = self.tools.tool_dependencies(tool);
        if required.is_empty() {
            return Vec::new();
        }
        let installed = self.environments.installed_packages(&identity);
        missing_requirements(&required, &installed)
    }

    pub fn check_dependencies_satisfied(&mut self, tool: &str) -> bool {
        self.missing_dependencies(tool).is_empty()
    }

    /// Installs whatever is missing. Does nothing when all is satisfied.
    pub fn install_missing_dependencies(&mut self, tool: &str) -> Result<()> {
        let missing = self.missing_dependencies(tool);
        if missing.is_empty() {
            debug!(tool, "all dependencies satisfied");
            return Ok(());
        }
        let identity = self.tools.identity(tool);
        info!(tool, count = missing.len(), "installing missing dependencies");
        self.environments.install_dependencies(&identity, &missing)
    }

    /// Boolean form of [`DependencyResolver::ensure_environment`].
    pub fn ensure(&mut self, tool: &str) -> bool {
        self.ensure_environment(tool).is_ok()
    }

    /// Brings the tool's environment to a state where every declared
    /// requirement is satisfied.
    ///
    /// # Errors
    /// [`EngineError::DependenciesUnsatisfied`] carries the requirements still
    /// missing after the single install attempt. Provisioning and installer
    /// failures are passed through.
    pub fn ensure_environment(&mut self, tool: &str) -> Result<ResolverState> {
        if !self.tools.tool_exists(tool) {
            info!(tool, "tool not found");
            return Err(EngineError::ToolNotFound(tool.to_string()));
        }
        let identity = self.tools.identity(tool);

        let mut state = ResolverState::NoEnvironment;
        if !self.environments.environment_exists(&identity) {
            self.environments.create(&identity)?;
            state = ResolverState::EnvironmentCreated;
        } else if !self.environments.validate(&identity, None) {
            warn!(tool = %identity, "environment failed validation, recreating");
            self.environments.create(&identity)?;
            state = ResolverState::EnvironmentCreated;
        }
        debug!(tool = %identity, ?state);

        let missing = self.missing_dependencies(tool);
        state = ResolverState::DependenciesChecked;
        debug!(tool = %identity, ?state, missing = missing.len());
        if missing.is_empty() {
            return Ok(ResolverState::Satisfied);
        }

        self.environments.install_dependencies(&identity, &missing)?;
        let still_missing = self.missing_dependencies(tool);
        if still_missing.is_empty() {
            info!(tool = %identity, "dependencies satisfied");
            return Ok(ResolverState::Satisfied);
        }

        error!(
            tool = %identity,
            missing = %still_missing.join(", "),
            state = ?ResolverState::Unsatisfied,
            "dependencies still missing after install"
        );
        Err(EngineError::DependenciesUnsatisfied {
            tool: identity,
            missing: still_missing,
        })
    }

    /// Installs the tool's own archive into a ready environment.
    ///
    /// The environment is repaired and its requirements installed before the
    /// archive goes in, so a rebuild never discards the fresh install.
    pub fn install_tool(&mut self, tool: &str) -> Result<ResolverState> {
        let Some(descriptor) = self.tools.descriptor(tool) else {
            info!(tool, "tool not found");
            return Err(EngineError::ToolNotFound(tool.to_string()));
        };
        let state = self.ensure_environment(tool)?;
        let identity = descriptor.tool_identity();
        self.environments.install_archive(&identity, &descriptor.path, &[])?;
        info!(tool = %identity, version = %descriptor.version, "tool installed");
        Ok(state)
    }

    /// Reinstalls the tool's archive when its environment no longer has it,
    /// e.g. after [`DependencyResolver::ensure_environment`] rebuilt it.
    /// Returns whether anything was installed.
    pub fn restore_archive(&mut self, tool: &str) -> Result<bool> {
        let Some(descriptor) = self.tools.descriptor(tool) else {
            return Err(EngineError::ToolNotFound(tool.to_string()));
        };
        let identity = descriptor.tool_identity();
        if self.environments.is_package_installed(&identity, &descriptor.name) {
            return Ok(false);
        }
        warn!(tool = %identity, "archive missing from environment, reinstalling");
        self.environments.install_archive(&identity, &descriptor.path, &[])?;
        Ok(true)
    }

    /// Packages constrained differently by more than one of `tools`.
    ///
    /// Constraints are compared as literal strings, so `>=1.0` and `>= 1.0`
    /// collide even though they mean the same thing.
    pub fn detect_conflicts(&mut self, tools: &[String]) -> Vec<Conflict> {
        // canonical package name -> (tool, raw requirement, constraint)
        let mut by_package: BTreeMap<String, Vec<(String, String, Option<String>)>> = BTreeMap::new();
        for tool in tools {
            for requirement in self.tools.tool_dependencies(tool) {
                let ParsedRequirement::Spec(spec) = parse_requirement(&requirement) else {
                    continue;
                };
                by_package
                    .entry(canonical_name(&spec.name))
                    .or_default()
                    .push((tool.clone(), requirement.clone(), spec.constraint));
            }
        }

        by_package
            .into_iter()
            .filter_map(|(package, entries)| {
                let mut tools_seen: Vec<&str> = entries.iter().map(|(t, _, _)| t.as_str()).collect();
                tools_seen.sort_unstable();
                tools_seen.dedup();
                let mut constraints: Vec<&str> = entries
                    .iter()
                    .filter_map(|(_, _, c)| c.as_deref())
                    .collect();
                constraints.sort_unstable();
                constraints.dedup();
                if tools_seen.len() < 2 || constraints.len() < 2 {
                    return None;
                }
                Some(Conflict {
                    package,
                    requirements: entries.iter().map(|(_, r, _)| r.clone()).collect(),
                })
            })
            .collect()
    }

    pub fn dependency_report(&mut self, tool: &str) -> DependencyReport {
        let identity = self.tools.identity(tool);
        let required = self.tools.tool_dependencies(tool);
        let installed = self.environments.installed_packages(&identity);
        let missing = missing_requirements(&required, &installed);
        DependencyReport {
            tool: identity,
            satisfied: missing.is_empty(),
            required,
            installed,
            missing,
        }
    }
}

/// Requirement strings from `required` that `installed` (canonical name →
/// version) doesn't satisfy. Requirements gated on an extra never count.
pub fn missing_requirements(required: &[String], installed: &BTreeMap<String, String>) -> Vec<String> {
    let mut missing = Vec::new();
    for requirement in required {
        let ParsedRequirement::Spec(spec) = parse_requirement(requirement) else {
            continue;
        };
        match installed.get(&canonical_name(&spec.name)) {
            None => missing.push(requirement.clone()),
            Some(version) => {
                if let Some(constraint) = &spec.constraint {
                    if !check_version_compatibility(version, constraint) {
                        debug!(requirement = %requirement, installed = %version, "version not compatible");
                        missing.push(requirement.clone());
                    }
                }
            }
        }
    }
    missing
}
