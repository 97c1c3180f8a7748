use std::sync::Arc;

use anyhow::Result;

use crate::page::PageElement;
use crate::session::SessionContext;
use crate::surface::ErrorSink;

/// A parsed selector: comma-separated alternatives, each a chain of
/// whitespace-separated compounds where every compound but the last names
/// a required ancestor. A trailing `*` matches any element scoped under
/// the preceding ancestors.
#[derive(Debug, Clone)]
pub struct Selector {
    alternatives: Vec<Vec<String>>,
}

impl Selector {
    pub fn parse(raw: &str) -> Self {
        let alternatives = raw
            .split(',')
            .map(|alt| alt.split_whitespace().map(str::to_string).collect())
            .filter(|chain: &Vec<String>| !chain.is_empty())
            .collect();
        Self { alternatives }
    }

    pub fn matches(&self, element: &PageElement) -> bool {
        self.alternatives
            .iter()
            .any(|chain| chain_matches(chain, element))
    }
}

fn chain_matches(chain: &[String], target: &PageElement) -> bool {
    let Some((last, ancestors)) = chain.split_last() else {
        return false;
    };
    if last != "*" && !target.matches_compound(last) {
        return false;
    }
    // Each remaining compound must match some strict ancestor, outermost
    // first relative to the target.
    let mut cursor = target.parent();
    for compound in ancestors.iter().rev() {
        loop {
            let Some(node) = cursor else {
                return false;
            };
            let matched = node.matches_compound(compound);
            cursor = node.parent();
            if matched {
                break;
            }
        }
    }
    true
}

type Predicate = Arc<dyn Fn(&PageElement) -> bool + Send + Sync>;

/// What a rule matches against: a parsed selector, or an arbitrary
/// structural predicate for checks a selector cannot express.
#[derive(Clone)]
pub enum Matcher {
    Selector(Selector),
    Predicate(Predicate),
}

impl Matcher {
    pub fn selector(raw: &str) -> Self {
        Matcher::Selector(Selector::parse(raw))
    }

    pub fn predicate<F>(check: F) -> Self
    where
        F: Fn(&PageElement) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(check))
    }

    pub fn matches(&self, element: &PageElement) -> bool {
        match self {
            Matcher::Selector(selector) => selector.matches(element),
            Matcher::Predicate(check) => check(element),
        }
    }
}

/// Whether a matched rule swallows the event or lets the page's own
/// listeners see it too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Stop,
    Continue,
}

pub type Handler = Arc<dyn Fn(&SessionContext, &PointerEvent) -> Result<()> + Send + Sync>;

pub struct InteractionRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub propagation: Propagation,
    pub handler: Handler,
}

impl InteractionRule {
    pub fn new<F>(name: &'static str, matcher: Matcher, propagation: Propagation, handler: F) -> Self
    where
        F: Fn(&SessionContext, &PointerEvent) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name,
            matcher,
            propagation,
            handler: Arc::new(handler),
        }
    }
}

/// A pointer event as mirrored by the embedding host: the element under
/// the pointer and the path of the page it happened on.
#[derive(Debug, Clone)]
pub struct PointerEvent {
    pub target: PageElement,
    pub page_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A rule matched and its handler ran. `suppressed` reports whether
    /// the event was withheld from the page's own listeners.
    Handled {
        rule: &'static str,
        suppressed: bool,
    },
    /// A rule matched but another handler was still running; the event is
    /// gone for good, there is no queue.
    DroppedBusy { rule: &'static str },
    NoMatch,
}

/// Routes pointer events to interaction rules. Rules are checked in
/// registration order and the first match wins; later rules never see a
/// matched event.
pub struct Router {
    rules: Vec<InteractionRule>,
}

impl Router {
    pub fn new(rules: Vec<InteractionRule>) -> Self {
        Self { rules }
    }

    pub fn dispatch(&self, ctx: &SessionContext, event: &PointerEvent) -> DispatchOutcome {
        for rule in &self.rules {
            if !rule.matcher.matches(&event.target) {
                continue;
            }
            if !ctx.begin_interaction() {
                tracing::debug!(rule = rule.name, "handler busy, event dropped");
                return DispatchOutcome::DroppedBusy { rule: rule.name };
            }
            tracing::debug!(rule = rule.name, element = ?event.target, "dispatching");
            let result = {
                // Released on drop, so a panicking handler cannot wedge
                // the slot.
                let _slot = SlotGuard { ctx };
                (rule.handler)(ctx, event)
            };
            if let Err(err) = result {
                ctx.report(rule.name, &err);
            }
            return DispatchOutcome::Handled {
                rule: rule.name,
                suppressed: rule.propagation == Propagation::Stop,
            };
        }
        DispatchOutcome::NoMatch
    }
}

struct SlotGuard<'a> {
    ctx: &'a SessionContext,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.ctx.end_interaction();
    }
}

/// An error surfaced by the embedding host's global error hook.
#[derive(Debug, Clone, Default)]
pub struct HostError {
    pub message: String,
    /// Rejection reason class, empty for plain errors.
    pub reason: String,
    pub stack: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Known platform noise, dropped without a trace beyond the debug log.
    Ignored,
    /// Unrecognized failure: logged and acknowledged to the user once.
    Reported,
}

const BENIGN_MESSAGES: [&str; 2] = ["ResizeObserver loop limit exceeded", "Publish Timed Out"];
const BENIGN_REASONS: [&str; 3] = ["cancelled", "InvalidStateError", "OZ_SOURCE_BUFFER"];

/// Classifies a host-page error. The platform's own code throws a steady
/// stream of harmless failures (layout observer churn, aborted media
/// loads, telemetry timeouts); those are swallowed so they cannot be
/// mistaken for a broken interaction. The stack check is scoped to the
/// platform's own bundle origin (`web_base`), not any `/static/` path.
pub fn intercept_host_error(
    sink: &dyn ErrorSink,
    web_base: &str,
    error: &HostError,
) -> ErrorDisposition {
    let static_prefix = format!("{}/static/", web_base.trim_end_matches('/'));
    let benign = BENIGN_MESSAGES.iter().any(|m| error.message.contains(m))
        || BENIGN_REASONS.iter().any(|r| error.reason.contains(r))
        || error.stack.contains(&static_prefix);
    if benign {
        tracing::debug!(message = %error.message, "ignoring platform error");
        return ErrorDisposition::Ignored;
    }
    tracing::error!(message = %error.message, reason = %error.reason, "host error intercepted");
    sink.warn("Error intercepted!");
    ErrorDisposition::Reported
}
