//! Operator workflow: check / update / edit / reset over the snapshot store.
//!
//! Each caller has its own [`State`]. Device retrievals are tagged with a
//! ticket; `cancel` or `start` drops the ticket, and a retrieval that finishes
//! afterwards is thrown away instead of being applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::device::{fetch_live_tree_within, DeviceClient};
use crate::diff::{diff, render};
use crate::error::{Error, Result};
use crate::reconcile::reconcile;
use crate::store::SnapshotStore;
use crate::tree::ConfigTree;

const MENU: &str = "Available actions: check, update, edit, reset";
const WORKING: &str = "Working... retrieving the current settings from the heating controller.";
const STILL_WORKING: &str = "Still retrieving settings from the heating controller...";
const RESET_PROMPT: &str = "Retrieve new reference settings from the heating controller? \
This overwrites the existing reference. Reply confirm or decline.";
const EDIT_PROMPT: &str = "The current reference settings are attached. \
Send the edited document back to save it, or cancel.";
const BUSY: &str = "Still working on your previous request. Send cancel to abandon it.";
const MISSING_DOCUMENT: &str = "The edited document is missing. Send it back, or cancel.";

/// Periodic feedback never fires more often than this.
const MIN_FEEDBACK_INTERVAL: Duration = Duration::from_millis(100);

/// Channel for "working" notices while a slow operation runs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, caller: &str, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Main,
    Edit,
    Reset,
}

/// Operator intents understood by the workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Start,
    Check,
    Update,
    Edit,
    /// Edited reference document
    Submit(String),
    Reset,
    Confirm,
    Decline,
    Cancel,
}

impl Intent {
    /// Parse an intent name as typed by an operator (`check`, `/check`, `Check`).
    /// `submit` without a non-blank document does not parse.
    pub fn parse(kind: &str, payload: Option<String>) -> Option<Self> {
        let intent = match normalize(kind).as_str() {
            "start" | "menu" | "restart" => Intent::Start,
            "check" => Intent::Check,
            "update" => Intent::Update,
            "edit" => Intent::Edit,
            "submit" => Intent::Submit(payload.filter(|p| !p.trim().is_empty())?),
            "reset" => Intent::Reset,
            "confirm" | "yes" => Intent::Confirm,
            "decline" | "no" => Intent::Decline,
            "cancel" => Intent::Cancel,
            _ => return None,
        };
        Some(intent)
    }

    /// Answer for an intent that [`Intent::parse`] refused.
    pub fn rejection(kind: &str) -> Reply {
        if normalize(kind) == "submit" {
            Reply::text(MISSING_DOCUMENT).failed()
        } else {
            Reply::main(format!("Unknown action `{}`.", kind.trim())).failed()
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Intent::Start => "start",
            Intent::Check => "check",
            Intent::Update => "update",
            Intent::Edit => "edit",
            Intent::Submit(_) => "submit",
            Intent::Reset => "reset",
            Intent::Confirm => "confirm",
            Intent::Decline => "decline",
            Intent::Cancel => "cancel",
        }
    }
}

fn normalize(kind: &str) -> String {
    kind.trim().trim_start_matches('/').to_ascii_lowercase()
}

/// Plain-text answer, optionally with a document for the operator to edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub document: Option<String>,
    pub failed: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Text followed by the main menu.
    pub fn main(text: impl AsRef<str>) -> Self {
        let text = text.as_ref();
        if text.is_empty() {
            Self::text(MENU)
        } else {
            Self::text(format!("{text}\n{MENU}"))
        }
    }

    pub fn failed(mut self) -> Self {
        self.failed = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    /// Upper bound for one complete live retrieval
    pub device_timeout: Duration,
    /// Gap between "still working" notices
    pub feedback_interval: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            device_timeout: Duration::from_secs(600),
            feedback_interval: Duration::from_secs(15),
        }
    }
}

/// Totals since start, reported in the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowStats {
    pub retrievals: u64,
    pub device_failures: u64,
    pub entries_replaced: u64,
}

#[derive(Debug, Default)]
struct Counters {
    retrievals: AtomicU64,
    device_failures: AtomicU64,
    entries_replaced: AtomicU64,
}

#[derive(Debug)]
struct Session {
    state: State,
    ticket: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: State::Main,
            ticket: None,
        }
    }
}

/// What to do once the session lock is released.
enum Step {
    Done(Reply),
    Check(u64),
    Update(u64),
    Edit(u64),
    Submit(String),
    Reset(u64),
}

/// Per-caller state machine over the shared snapshot store.
pub struct Workflow {
    store: Arc<SnapshotStore>,
    device: Arc<dyn DeviceClient>,
    notifier: Arc<dyn Notifier>,
    settings: WorkflowSettings,
    sessions: Mutex<HashMap<String, Session>>,
    next_ticket: AtomicU64,
    counters: Counters,
}

impl Workflow {
    pub fn new(
        store: Arc<SnapshotStore>,
        device: Arc<dyn DeviceClient>,
        notifier: Arc<dyn Notifier>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            device,
            notifier,
            settings,
            sessions: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Make sure a reference tree exists before any intent is served. Returns
    /// `true` when one had to be retrieved.
    pub async fn bootstrap(&self) -> Result<bool> {
        if self.store.reference_tree().await?.is_some() {
            return Ok(false);
        }
        info!("retrieving first full reference settings (may take some time)");
        let tree = self.fetch().await?;
        self.store.save_reference_tree(tree).await?;
        Ok(true)
    }

    pub fn stats(&self) -> WorkflowStats {
        WorkflowStats {
            retrievals: self.counters.retrievals.load(Ordering::Relaxed),
            device_failures: self.counters.device_failures.load(Ordering::Relaxed),
            entries_replaced: self.counters.entries_replaced.load(Ordering::Relaxed),
        }
    }

    /// Current state of a caller; callers never seen are in `Main`.
    pub async fn state(&self, caller: &str) -> State {
        self.sessions
            .lock()
            .await
            .get(caller)
            .map_or(State::Main, |s| s.state)
    }

    /// Handle one intent. `None` means the result belonged to an operation the
    /// caller has since cancelled and there is nothing left to report.
    pub async fn intent(&self, caller: &str, intent: Intent) -> Option<Reply> {
        let step = self.plan(caller, intent).await;
        match step {
            Step::Done(reply) => Some(reply),
            Step::Check(ticket) => self.check(caller, ticket).await,
            Step::Update(ticket) => self.update(caller, ticket).await,
            Step::Edit(ticket) => self.begin_edit(caller, ticket).await,
            Step::Submit(text) => Some(self.submit_edit(caller, &text).await),
            Step::Reset(ticket) => self.reset(caller, ticket).await,
        }
    }

    /// Apply the state transition that needs no I/O and decide what follows.
    async fn plan(&self, caller: &str, intent: Intent) -> Step {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(caller.to_string()).or_default();

        match intent {
            Intent::Start => {
                *session = Session::default();
                return Step::Done(Reply::main("ETA-watch is running."));
            }
            Intent::Cancel => {
                let had_work = session.ticket.is_some() || session.state != State::Main;
                *session = Session::default();
                let text = if had_work { "Cancelled." } else { "" };
                return Step::Done(Reply::main(text));
            }
            _ => {}
        }

        if session.ticket.is_some() {
            return Step::Done(Reply::text(BUSY));
        }

        match (session.state, intent) {
            (State::Main, Intent::Check) => Step::Check(self.issue(session)),
            (State::Main, Intent::Update) => Step::Update(self.issue(session)),
            (State::Main, Intent::Edit) => Step::Edit(self.issue(session)),
            (State::Main, Intent::Reset) => {
                session.state = State::Reset;
                Step::Done(Reply::text(RESET_PROMPT))
            }
            (State::Edit, Intent::Submit(text)) => Step::Submit(text),
            (State::Reset, Intent::Confirm) => {
                session.state = State::Main;
                Step::Reset(self.issue(session))
            }
            (State::Reset, Intent::Decline) => {
                session.state = State::Main;
                Step::Done(Reply::main("Reset declined, the reference settings are unchanged."))
            }
            (State::Edit, other) => Step::Done(Reply::text(format!(
                "Cannot {} while editing. Send the edited document, or cancel.",
                other.label()
            ))),
            (State::Reset, other) => Step::Done(Reply::text(format!(
                "Cannot {} now. Reply confirm or decline.",
                other.label()
            ))),
            (State::Main, other) => {
                Step::Done(Reply::main(format!("Nothing to {} right now.", other.label())))
            }
        }
    }

    fn issue(&self, session: &mut Session) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        session.ticket = Some(ticket);
        ticket
    }

    /// Release `ticket` and move to `next` if the caller is still waiting for
    /// it. Both happen under one lock so a cancel cannot slip in between.
    async fn redeem(&self, caller: &str, ticket: u64, next: State) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(caller) {
            Some(session) if session.ticket == Some(ticket) => {
                session.ticket = None;
                session.state = next;
                true
            }
            _ => {
                info!(caller = %caller, ticket, "discarding result of a cancelled operation");
                false
            }
        }
    }

    async fn set_state(&self, caller: &str, state: State) {
        self.sessions
            .lock()
            .await
            .entry(caller.to_string())
            .or_default()
            .state = state;
    }

    async fn fetch(&self) -> Result<ConfigTree> {
        self.counters.retrievals.fetch_add(1, Ordering::Relaxed);
        let result = fetch_live_tree_within(self.device.as_ref(), self.settings.device_timeout).await;
        if result.is_err() {
            self.counters.device_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Live retrieval with "working" feedback before and during the call.
    async fn retrieve_live(&self, caller: &str) -> Result<ConfigTree> {
        self.notifier.notify(caller, WORKING).await;

        let fetch = self.fetch();
        tokio::pin!(fetch);

        let period = self.settings.feedback_interval.max(MIN_FEEDBACK_INTERVAL);
        let mut feedback = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                result = &mut fetch => return result,
                _ = feedback.tick() => self.notifier.notify(caller, STILL_WORKING).await,
            }
        }
    }

    async fn check(&self, caller: &str, ticket: u64) -> Option<Reply> {
        let live = self.retrieve_live(caller).await;
        if !self.redeem(caller, ticket, State::Main).await {
            return None;
        }

        let reply = match live {
            Ok(live) => match self.store.reference_tree().await {
                Ok(Some(reference)) => {
                    let diffs = diff(&reference, &live);
                    info!(caller = %caller, differences = diffs.len(), "check finished");
                    Reply::main(render(&diffs))
                }
                Ok(None) => Reply::main("No reference settings stored yet. Use reset to retrieve them."),
                Err(e) => failure(caller, &e),
            },
            Err(e) => failure(caller, &e),
        };
        Some(reply)
    }

    async fn update(&self, caller: &str, ticket: u64) -> Option<Reply> {
        let live = self.retrieve_live(caller).await;
        if !self.redeem(caller, ticket, State::Main).await {
            return None;
        }

        let live = match live {
            Ok(live) => live,
            Err(e) => return Some(failure(caller, &e)),
        };
        let reply = match self.store.modify_reference_tree(|reference| reconcile(reference, &live)).await {
            Ok(Some(changed)) => {
                self.counters
                    .entries_replaced
                    .fetch_add(changed as u64, Ordering::Relaxed);
                info!(caller = %caller, changed, "reference updated from live values");
                Reply::main(format!("Updated {changed} value(s) in the reference settings."))
            }
            Ok(None) => Reply::main("No reference settings stored yet. Use reset to retrieve them."),
            Err(e) => failure(caller, &e),
        };
        Some(reply)
    }

    async fn begin_edit(&self, caller: &str, ticket: u64) -> Option<Reply> {
        let text = self.store.load_reference_as_text().await;
        let next = if text.is_ok() { State::Edit } else { State::Main };
        if !self.redeem(caller, ticket, next).await {
            return None;
        }

        let reply = match text {
            Ok(text) => Reply {
                text: EDIT_PROMPT.to_string(),
                document: Some(text),
                failed: false,
            },
            Err(e) => failure(caller, &e),
        };
        Some(reply)
    }

    async fn submit_edit(&self, caller: &str, text: &str) -> Reply {
        match self.store.save_reference_from_text(text).await {
            Ok(()) => {
                self.set_state(caller, State::Main).await;
                info!(caller = %caller, "reference replaced from edited document");
                Reply::main("Reference settings saved.")
            }
            Err(e @ Error::MalformedSnapshot(_)) => {
                warn!(caller = %caller, error = %e, "edited document rejected");
                Reply::text(format!(
                    "{}\nThe previous reference is unchanged. Send a corrected document, or cancel.",
                    e.explain()
                ))
                .failed()
            }
            Err(e) => {
                self.set_state(caller, State::Main).await;
                failure(caller, &e)
            }
        }
    }

    async fn reset(&self, caller: &str, ticket: u64) -> Option<Reply> {
        let live = self.retrieve_live(caller).await;
        if !self.redeem(caller, ticket, State::Main).await {
            return None;
        }

        let reply = match live {
            Ok(live) => {
                let entries = live.entry_count();
                match self.store.save_reference_tree(live).await {
                    Ok(()) => Reply::main(format!(
                        "Reference settings replaced with {entries} value(s) from the heating controller."
                    )),
                    Err(e) => failure(caller, &e),
                }
            }
            Err(e) => failure(caller, &e),
        };
        Some(reply)
    }
}

fn failure(caller: &str, e: &Error) -> Reply {
    warn!(caller = %caller, error = %e, "workflow step failed");
    Reply::main(e.explain()).failed()
}
