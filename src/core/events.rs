//! # Event Bus
//!
//! A small in-process publish/subscribe channel. Context resolution publishes
//! [`Event::CollectContexts`] and [`Event::AlterContexts`]; the command invoker
//! publishes [`Event::PreInvoke`] and [`Event::PostInvoke`] around every invocation.
//!
//! Handlers for one kind run in descending priority; handlers registered with the same
//! priority run in registration order. Payloads are handed out mutably, so a handler can
//! append a context or rewrite the parent's request before the next handler sees it.
//! The subscriber table is only borrowed immutably while dispatching, so the set of
//! handlers cannot change mid-dispatch.

use crate::models::{ArgMap, ConfigContext, ContextRequest};
use anyhow::Result;
use std::collections::HashMap;
use std::fmt;

/// Identifies a family of events for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CollectContexts,
    AlterContexts,
    PreInvoke,
    PostInvoke,
}

/// What the invoker tells subscribers about one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationNotice {
    pub command: String,
    /// 1-based depth of the invocation being announced.
    pub depth: usize,
    /// Arguments the command will run (or ran) with. Pre-invoke handlers may edit them.
    pub arguments: ArgMap,
    /// `None` before the command ran, or when it failed without an exit code.
    pub exit_code: Option<i32>,
    /// Request the caller's snapshot will be reprocessed with once the command returns.
    /// Post-invoke handlers may edit it to re-apply the caller's own options.
    pub parent_request: Option<ContextRequest>,
}

/// An event in flight, borrowing its payload from the publisher.
#[derive(Debug)]
pub enum Event<'a> {
    /// Subscribers may append contexts to the ones the providers produced.
    CollectContexts {
        request: &'a ContextRequest,
        contexts: &'a mut Vec<ConfigContext>,
    },
    /// Subscribers may rewrite the sorted list wholesale before it is merged.
    AlterContexts {
        request: &'a ContextRequest,
        contexts: &'a mut Vec<ConfigContext>,
    },
    PreInvoke(&'a mut InvocationNotice),
    PostInvoke(&'a mut InvocationNotice),
}

impl Event<'_> {
    /// The kind subscribers register for.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CollectContexts { .. } => EventKind::CollectContexts,
            Self::AlterContexts { .. } => EventKind::AlterContexts,
            Self::PreInvoke(_) => EventKind::PreInvoke,
            Self::PostInvoke(_) => EventKind::PostInvoke,
        }
    }
}

/// The signature every subscriber implements.
pub type EventHandler = Box<dyn Fn(&mut Event<'_>) -> Result<()>>;

struct Subscription {
    priority: i32,
    handler: EventHandler,
}

/// Routes published events to their subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<Subscription>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .subscribers
            .iter()
            .map(|(kind, subs)| (format!("{:?}", kind), subs.len()))
            .collect();
        counts.sort();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

impl EventBus {
    /// A bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`. Higher priorities run first.
    pub fn subscribe<F>(&mut self, kind: EventKind, priority: i32, handler: F)
    where
        F: Fn(&mut Event<'_>) -> Result<()> + 'static,
    {
        let subs = self.subscribers.entry(kind).or_default();
        subs.push(Subscription {
            priority,
            handler: Box::new(handler),
        });
        // Stable sort: equal priorities keep registration order.
        subs.sort_by_key(|sub| std::cmp::Reverse(sub.priority));
        log::trace!("Subscribed handler to {:?} with priority {}", kind, priority);
    }

    /// Dispatches `event` to every subscriber of its kind. The first handler error
    /// stops dispatch and is returned.
    pub fn publish(&self, event: &mut Event<'_>) -> Result<()> {
        let kind = event.kind();
        let Some(subs) = self.subscribers.get(&kind) else {
            return Ok(());
        };
        log::trace!("Publishing {:?} to {} subscriber(s)", kind, subs.len());
        for sub in subs {
            (sub.handler)(event)?;
        }
        Ok(())
    }

    /// Number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }
}
