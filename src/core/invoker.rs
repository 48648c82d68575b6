//! # Command Invoker
//!
//! Runs named commands against the configuration stack, including commands invoked
//! from inside other commands.
//!
//! Every call to [`CommandInvoker::invoke`]:
//!
//! 1. enters a new [`InvocationFrame`] one level deeper than the caller,
//! 2. builds the argument map: caller arguments, then the caller frame's pinned
//!    options, then the latest value of every global pin,
//! 3. resolves a fresh snapshot for those arguments and pushes it,
//! 4. returns 0 straight away if the command, or the command its alias resolves to,
//!    is listed in `disable-targets`,
//! 5. otherwise runs the command through the [`CommandRegistry`],
//! 6. pops the snapshot, notifies [`Event::PostInvoke`] subscribers and reprocesses the
//!    caller's snapshot,
//! 7. leaves the frame, and turns a nonzero exit code into
//!    [`InvocationError::Failed`].
//!
//! Frame exit and stack pop are scope guards, so they also happen when the command
//! body returns an error or panics.
//!
//! Reprocessing only ever touches the caller's snapshot (the new top of the stack).
//! Snapshots further down keep whatever they resolved when they were pushed.

use crate::constants::{COMMAND_SEPARATOR, DISABLE_TARGETS_KEY};
use crate::core::config_stack::{ConfigurationStack, StackError};
use crate::core::context_processor::{ConfigSnapshot, flatten_with};
use crate::core::context_provider::ContextResolver;
use crate::core::events::{Event, EventBus, InvocationNotice};
use crate::core::registry::CommandRegistry;
use crate::models::{ArgMap, ContextRequest, Input, render_args};
use anyhow::Result;
use colored::*;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Why an invocation did not succeed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvocationError {
    /// No command or alias with this name is registered.
    #[error("Command '{name}' is not defined.")]
    CommandNotFound { name: String },
    /// The command ran and exited nonzero.
    #[error("Command `{}` exited with code {exit_code}.", invocation_line(.command, .arguments))]
    Failed {
        command: String,
        arguments: String,
        exit_code: i32,
    },
}

impl InvocationError {
    /// The exit code to surface for this error, if it carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => Some(*exit_code),
            Self::CommandNotFound { .. } => None,
        }
    }
}

fn invocation_line(command: &str, arguments: &str) -> String {
    if arguments.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, arguments)
    }
}

// --- DISABLED COMMANDS ---

/// The commands `disable-targets` switches off in one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisabledCommandSet {
    targets: BTreeSet<String>,
}

impl DisabledCommandSet {
    /// Reads `disable-targets`, flattening nested keys with `:`. Only truthy leaves count.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let targets = match snapshot.get(DISABLE_TARGETS_KEY) {
            Some(Value::Object(map)) => flatten_with(map, COMMAND_SEPARATOR)
                .into_iter()
                .filter(|(_, value)| is_truthy(value))
                .map(|(name, _)| name)
                .collect(),
            _ => BTreeSet::new(),
        };
        Self { targets }
    }

    /// Whether `command_name` is switched off.
    pub fn contains(&self, command_name: &str) -> bool {
        self.targets.contains(command_name)
    }

    /// Disabled command names, sorted.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(String::as_str)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !matches!(s.as_str(), "" | "0" | "false" | "no"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) | Value::Null => false,
    }
}

// --- PINNED OPTIONS ---

/// Options forced onto every command invoked from the frame that pinned them.
#[derive(Debug, Clone)]
pub enum PinnedOptions {
    /// Read from `input` at every invocation, so later changes to it are picked up.
    FromInput { input: Input, names: Vec<String> },
    /// Fixed values.
    Values(ArgMap),
}

impl PinnedOptions {
    /// Pins `names` as they are set on `input` whenever a command is invoked.
    pub fn from_input(input: &Input, names: &[&str]) -> Self {
        Self::FromInput {
            input: input.clone(),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn current_values(&self) -> ArgMap {
        match self {
            Self::FromInput { input, names } => names
                .iter()
                .filter_map(|name| input.option(name).map(|value| (name.clone(), value)))
                .collect(),
            Self::Values(values) => values.clone(),
        }
    }
}

/// One active invocation.
#[derive(Debug, Clone)]
pub struct InvocationFrame {
    /// 1 for the outermost command, 0 outside any command.
    pub depth: usize,
    /// The name the command was invoked by.
    pub command: String,
    /// Arguments after pins were applied.
    pub arguments: ArgMap,
    pins: Vec<PinnedOptions>,
}

impl InvocationFrame {
    fn new(depth: usize, command: &str, arguments: ArgMap) -> Self {
        Self {
            depth,
            command: command.to_string(),
            arguments,
            pins: Vec::new(),
        }
    }
}

// --- INVOKER ---

/// Owns the configuration stack, the invocation frames and the pin tables.
pub struct CommandInvoker {
    registry: Rc<dyn CommandRegistry>,
    resolver: ContextResolver,
    events: EventBus,
    base_request: ContextRequest,
    stack: ConfigurationStack,
    /// `frames[0]` is the caller outside any invocation (depth 0).
    frames: Vec<InvocationFrame>,
    global_pins: BTreeMap<String, Vec<String>>,
}

impl fmt::Debug for CommandInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInvoker")
            .field("depth", &self.depth())
            .field("stack_depth", &self.stack.depth())
            .field("global_pins", &self.global_pins)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl CommandInvoker {
    /// `base_request` is used for the outermost invocation; nested ones derive their
    /// request from their caller's snapshot.
    pub fn new(
        registry: Rc<dyn CommandRegistry>,
        resolver: ContextResolver,
        base_request: ContextRequest,
    ) -> Self {
        Self {
            registry,
            resolver,
            events: EventBus::new(),
            base_request,
            stack: ConfigurationStack::new(),
            frames: vec![InvocationFrame::new(0, "", ArgMap::new())],
            global_pins: BTreeMap::new(),
        }
    }

    /// Replaces the event bus, subscribers included.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Number of invocations currently running.
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// The configuration of the running command.
    pub fn config(&self) -> Result<&ConfigSnapshot, StackError> {
        self.stack.current()
    }

    /// The snapshots of every running command.
    pub fn stack(&self) -> &ConfigurationStack {
        &self.stack
    }

    /// For subscribing after construction.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Where commands are looked up.
    pub fn registry(&self) -> &dyn CommandRegistry {
        self.registry.as_ref()
    }

    /// The request the outermost invocation resolves from.
    pub fn base_request(&self) -> &ContextRequest {
        &self.base_request
    }

    /// The frame of the running command, or the depth-0 frame outside any command.
    pub fn current_frame(&self) -> Option<&InvocationFrame> {
        self.frames.last()
    }

    /// Whether `command_name` is disabled in the running command's configuration.
    pub fn is_disabled(&self, command_name: &str) -> Result<bool, StackError> {
        Ok(DisabledCommandSet::from_snapshot(self.stack.current()?).contains(command_name))
    }

    // --- PINS ---

    /// Pins options for every command the running command invokes. The pins are
    /// dropped when the running command returns.
    ///
    /// Outside any command there is no frame to end, so the pins are ignored.
    pub fn pin_options(&mut self, options: PinnedOptions) {
        if self.depth() == 0 {
            log::warn!("Ignoring options pinned outside any command: {:?}", options);
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            log::debug!("Pinning options at depth {}: {:?}", frame.depth, options);
            frame.pins.push(options);
        }
    }

    /// Pins `value` for `name` on every invocation, at any depth, until unpinned.
    /// Pinning the same name again shadows the previous value until it is unpinned.
    pub fn pin_global(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        log::debug!("Pinning global option {}={}", name, value);
        self.global_pins.entry(name).or_default().push(value);
    }

    /// Drops the latest global value for `name`. Unknown names are ignored.
    pub fn unpin_global(&mut self, name: &str) {
        let Some(values) = self.global_pins.get_mut(name) else {
            return;
        };
        values.pop();
        if values.is_empty() {
            self.global_pins.remove(name);
        }
        log::debug!("Unpinned global option {}", name);
    }

    /// The value a global pin currently forces for `name`.
    pub fn global_pin(&self, name: &str) -> Option<&str> {
        self.global_pins
            .get(name)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    /// Whether any global pin is active.
    pub fn has_global_pins(&self) -> bool {
        !self.global_pins.is_empty()
    }

    fn pinned_arguments(&self, mut args: ArgMap) -> ArgMap {
        if let Some(frame) = self.frames.last() {
            for pin in &frame.pins {
                args.extend(pin.current_values());
            }
        }
        for (name, values) in &self.global_pins {
            if let Some(value) = values.last() {
                args.insert(name.clone(), value.clone());
            }
        }
        args
    }

    // --- INVOCATION ---

    /// Runs `command_name` one level below the caller and returns its exit code.
    ///
    /// A nonzero exit code is returned as [`InvocationError::Failed`]; callers that
    /// want a fallback can downcast the error and carry on.
    pub fn invoke(&mut self, parent: &Input, command_name: &str, args: ArgMap) -> Result<i32> {
        let depth = self.frames.len();

        let mut notice = InvocationNotice {
            command: command_name.to_string(),
            depth,
            arguments: self.pinned_arguments(args),
            exit_code: None,
            parent_request: None,
        };
        self.events.publish(&mut Event::PreInvoke(&mut notice))?;
        let arguments = notice.arguments;

        println!("{} {}", ">".repeat(depth).yellow(), command_name.cyan());
        log::debug!(
            "Invoking '{}' at depth {} with [{}]",
            command_name,
            depth,
            render_args(&arguments)
        );

        self.frames
            .push(InvocationFrame::new(depth, command_name, arguments.clone()));
        let mut invoker = scopeguard::guard(self, |invoker| {
            invoker.frames.pop();
        });

        let input = Input::new(arguments, parent.is_interactive());
        let outcome = invoker.execute_in_frame(command_name, &input);

        let resumed = invoker.resume_caller(command_name, depth, &input, &outcome);
        let exit_code = outcome?;
        resumed?;

        if exit_code != 0 {
            return Err(InvocationError::Failed {
                command: command_name.to_string(),
                arguments: input.render(),
                exit_code,
            }
            .into());
        }
        Ok(exit_code)
    }

    /// Pushes a snapshot for `input`, runs the command, and pops the snapshot again.
    fn execute_in_frame(&mut self, command_name: &str, input: &Input) -> Result<i32> {
        let request = match self.stack.current() {
            Ok(caller) => caller.request().for_input(input),
            Err(_) => self.base_request.for_input(input),
        };
        let snapshot = self.resolver.resolve(&request, &self.events)?;
        self.stack.push(snapshot);
        let mut invoker = scopeguard::guard(self, |invoker| {
            invoker.stack.pop();
        });

        // Aliases are disabled through the command they resolve to.
        let resolved = invoker.registry.resolve(command_name);
        let disabled = DisabledCommandSet::from_snapshot(invoker.stack.current()?);
        if disabled.contains(command_name)
            || resolved.as_ref().is_some_and(|cmd| disabled.contains(&cmd.name))
        {
            log::warn!(
                "{} '{}' (listed in '{}').",
                t!("invoker.disabled"),
                command_name,
                DISABLE_TARGETS_KEY
            );
            return Ok(0);
        }

        let command = resolved.ok_or_else(|| InvocationError::CommandNotFound {
            name: command_name.to_string(),
        })?;
        let registry = Rc::clone(&invoker.registry);
        registry.run(&command, input, &mut **invoker)
    }

    /// Lets post-invoke subscribers adjust the caller's request, then reprocesses the
    /// caller's snapshot so it reflects anything the command changed on disk.
    fn resume_caller(
        &mut self,
        command_name: &str,
        depth: usize,
        input: &Input,
        outcome: &Result<i32>,
    ) -> Result<()> {
        let mut notice = InvocationNotice {
            command: command_name.to_string(),
            depth,
            arguments: input.args(),
            exit_code: outcome.as_ref().ok().copied(),
            parent_request: self.stack.current().ok().map(|s| s.request().clone()),
        };
        self.events.publish(&mut Event::PostInvoke(&mut notice))?;

        let requested = notice.parent_request;
        let resolver = &self.resolver;
        let events = &self.events;
        self.stack
            .reprocess(|current| resolver.resolve(requested.as_ref().unwrap_or(current), events))?;
        Ok(())
    }
}
