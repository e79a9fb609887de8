//! Reusable step actions.
//!
//! A `uses` step names an action; the registry turns it into something the
//! backend can run. Lookup is by bare name, so `acme/checkout@v4` and
//! `checkout` resolve to the same action.

use std::collections::{BTreeMap, HashMap};
use tollgate_core::pipeline::ActionRef;
use tollgate_core::{Error, Result};

/// What a step turns into after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
    /// Nothing to execute; the step passes immediately.
    Noop,
    Command {
        command: String,
        env: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone)]
enum ActionKind {
    Checkout,
    RustToolchain,
    /// User-registered command. Parameters are exported as `INPUT_<KEY>`.
    Script(String),
}

/// Maps action names to their implementations.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionKind>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut actions = HashMap::new();
        actions.insert("checkout".to_string(), ActionKind::Checkout);
        actions.insert("rust-toolchain".to_string(), ActionKind::RustToolchain);
        Self { actions }
    }
}

impl ActionRegistry {
    /// Registry with the built-in actions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shell command under `name`, replacing any existing action.
    pub fn register(&mut self, name: impl Into<String>, command: impl Into<String>) {
        self.actions
            .insert(name.into(), ActionKind::Script(command.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn resolve(
        &self,
        action: &ActionRef,
        with: &BTreeMap<String, String>,
    ) -> Result<ResolvedAction> {
        let kind = self
            .actions
            .get(&action.name)
            .ok_or_else(|| Error::ActionNotFound(action.to_string()))?;

        match kind {
            ActionKind::Checkout => Ok(ResolvedAction::Noop),
            ActionKind::RustToolchain => rust_toolchain(action, with),
            ActionKind::Script(command) => Ok(ResolvedAction::Command {
                command: command.clone(),
                env: with
                    .iter()
                    .map(|(k, v)| (input_var(k), v.clone()))
                    .collect(),
            }),
        }
    }
}

fn input_var(key: &str) -> String {
    format!("INPUT_{}", key.to_uppercase().replace(['-', ' '], "_"))
}

/// `rust-toolchain@nightly` names the toolchain through its version, while
/// `@master` and `@v1` are plain revisions of the action.
fn toolchain_from_version(version: Option<&str>) -> Option<&str> {
    version.filter(|v| {
        let revision = matches!(*v, "master" | "main")
            || v.strip_prefix('v')
                .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
        !revision
    })
}

fn rust_toolchain(action: &ActionRef, with: &BTreeMap<String, String>) -> Result<ResolvedAction> {
    let toolchain = with
        .get("toolchain")
        .map(String::as_str)
        .or_else(|| toolchain_from_version(action.version.as_deref()))
        .unwrap_or("stable");
    check_word("toolchain", toolchain)?;

    let mut command = format!(
        "rustup toolchain install {} --profile minimal --no-self-update",
        toolchain
    );
    if let Some(components) = with.get("components") {
        for component in components
            .split([',', ' '])
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            check_word("components", component)?;
            command.push_str(" --component ");
            command.push_str(component);
        }
    }
    command.push_str(" && rustup override set ");
    command.push_str(toolchain);

    Ok(ResolvedAction::Command {
        command,
        env: BTreeMap::new(),
    })
}

/// Parameters are spliced into a shell command, so only plain words pass.
fn check_word(param: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(Error::ActionNotFound(format!(
            "rust-toolchain: invalid {} '{}'",
            param, value
        )))
    }
}
