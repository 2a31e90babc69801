//! Per-operation job tickets.
//!
//! A [`JobTicket`] is the handle a caller receives for each submitted
//! command. It supports the three calling conventions of the engine:
//! blocking on [`JobTicket::wait`], polling [`JobTicket::is_complete`], or
//! receiving synchronous [`StatusObserver`] notifications from the
//! coordinator's dispatch step. Tickets are created by the engine, mutated
//! only by the coordinator (and by [`JobTicket::cancel`]), and handed to the
//! caller as `Arc`s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use fcp_wire::{Command, Message};

use crate::coordinator::EngineShared;
use crate::errors::FcpError;
use crate::sync::{Signal, lock_unpoisoned};

const TICKET_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ticket");

/// Payload destination of a completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchData {
    /// The key's bytes, returned directly.
    Direct(Vec<u8>),
    /// The daemon wrote the key to this path on its side of the transfer.
    File(String),
    /// Existence-check mode: the key is retrievable, no data returned.
    Presence,
}

/// Terminal success value of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A generated key pair: public request URI and private insert URI.
    Keypair {
        request_uri: String,
        insert_uri: String,
    },
    /// A completed fetch: declared content type plus the payload.
    Fetched {
        content_type: String,
        data: FetchData,
    },
    /// A completed insert: the final public URI.
    Uri(String),
    /// An accumulated persistent-request listing.
    Listing(Vec<Message>),
    /// A plugin RPC reply.
    PluginReply(Message),
}

/// Status delivered to a [`StatusObserver`].
#[derive(Debug)]
pub enum JobStatus<'a> {
    /// An intermediate progress message; never terminal.
    Pending(&'a Message),
    /// The job completed successfully.
    Successful(&'a JobOutcome),
    /// The job reached a terminal failure.
    Failed(&'a FcpError),
}

/// Receives job status transitions, synchronously from the coordinator's
/// dispatch step. Implementations must not block: the coordinator cannot
/// make progress while an observer runs.
pub trait StatusObserver: Send + Sync {
    /// Called for every message relevant to the job, not only the terminal
    /// one.
    fn notify(&self, status: JobStatus<'_>);
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StatusObserver for NoopObserver {
    fn notify(&self, _status: JobStatus<'_>) {}
}

/// Handle for one in-flight or completed protocol operation.
pub struct JobTicket {
    identifier: String,
    command: Mutex<Command>,
    persistent: bool,
    global: bool,
    sent: Signal,
    done: Signal,
    result: Mutex<Option<Result<JobOutcome, FcpError>>>,
    log: Mutex<Vec<Message>>,
    content_type: Mutex<Option<String>>,
    generated_uri: Mutex<Option<String>>,
    status_probe_sent: AtomicBool,
    observer: Box<dyn StatusObserver>,
    engine: Weak<EngineShared>,
}

impl JobTicket {
    pub(crate) fn new(
        identifier: String,
        command: Command,
        observer: Box<dyn StatusObserver>,
        engine: Weak<EngineShared>,
    ) -> Self {
        let persistent = command.is_persistent();
        let global = command.is_global();
        Self {
            identifier,
            command: Mutex::new(command),
            persistent,
            global,
            sent: Signal::default(),
            done: Signal::default(),
            result: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            content_type: Mutex::new(None),
            generated_uri: Mutex::new(None),
            status_probe_sent: AtomicBool::new(false),
            observer,
            engine,
        }
    }

    /// Builds a ticket for a request the engine did not originate, typically
    /// a persistent or global request surviving from a previous session.
    /// Queue scope and persistence come from the message itself, so a stray
    /// transient message leaves the registry once it completes while a
    /// genuine persistent entry stays until explicitly cancelled.
    pub(crate) fn adopted(
        identifier: String,
        message: &Message,
        engine: Weak<EngineShared>,
    ) -> Self {
        let global = message.text("Global") == Some("true");
        let persistence = message
            .text("Persistence")
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();
        let ticket = Self::new(
            identifier,
            Command::new(message.header())
                .persistence(persistence)
                .global(global),
            Box::new(NoopObserver),
            engine,
        );
        // Adopted requests were sent by some earlier session.
        ticket.sent.set();
        ticket
    }

    /// The request identifier, unique per connection epoch.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The header word of the originating command.
    pub fn command_name(&self) -> String {
        lock_unpoisoned(&self.command).header().to_owned()
    }

    /// Whether the daemon keeps this request beyond the connection.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Whether this request sits on the daemon's global queue.
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        self.done.is_set()
    }

    /// Whether the coordinator has physically written the command.
    pub fn is_sent(&self) -> bool {
        self.sent.is_set()
    }

    /// Blocks until the command has been written to the socket.
    pub fn wait_until_sent(&self) {
        self.sent.wait();
    }

    /// Blocks until the job completes, or the timeout elapses.
    ///
    /// The timeout is two-phase over one budget: if the command has not even
    /// been sent when the deadline passes, the wait fails with
    /// [`FcpError::SendTimeout`] (engine backlog); if sent but lacking a
    /// terminal reply, with [`FcpError::NodeTimeout`] (daemon
    /// unresponsive). `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns the job's terminal failure, or a timeout error as above.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<JobOutcome, FcpError> {
        match timeout {
            None => {
                self.sent.wait();
                self.done.wait();
            }
            Some(budget) => {
                let deadline = Instant::now() + budget;
                if !self.sent.wait_deadline(deadline) {
                    return Err(FcpError::SendTimeout {
                        command: self.command_name(),
                    });
                }
                if !self.done.wait_deadline(deadline) {
                    return Err(FcpError::NodeTimeout {
                        command: self.command_name(),
                    });
                }
            }
        }
        self.outcome()
    }

    /// Returns the terminal result, cloning so persistent tickets can be
    /// consulted repeatedly.
    ///
    /// # Errors
    ///
    /// Returns the job's terminal failure, or [`FcpError::Internal`] if
    /// called before completion.
    pub fn outcome(&self) -> Result<JobOutcome, FcpError> {
        lock_unpoisoned(&self.result).clone().unwrap_or_else(|| {
            Err(FcpError::internal("job result requested before completion"))
        })
    }

    /// Ordered log of progress messages received for this job.
    pub fn messages(&self) -> Vec<Message> {
        lock_unpoisoned(&self.log).clone()
    }

    /// The URI announced by `URIGenerated` during an insert, if seen yet.
    pub fn generated_uri(&self) -> Option<String> {
        lock_unpoisoned(&self.generated_uri).clone()
    }

    /// Cancels a persistent job: removes it from the registry and instructs
    /// the daemon to drop the request. Best-effort and asynchronous; the
    /// removal command is enqueued, not awaited. A no-op for non-persistent
    /// jobs, and after the engine has stopped.
    pub fn cancel(&self) {
        if !self.persistent {
            return;
        }
        let Some(engine) = self.engine.upgrade() else {
            debug!(
                target: TICKET_TARGET,
                identifier = %self.identifier,
                "cancel after engine teardown ignored"
            );
            return;
        };
        engine.cancel_job(&self.identifier, self.global);
    }

    // --- coordinator-side mutators -------------------------------------

    pub(crate) fn mark_sent(&self) {
        self.sent.set();
    }

    pub(crate) fn notify_pending(&self, message: &Message) {
        self.observer.notify(JobStatus::Pending(message));
    }

    pub(crate) fn append_message(&self, message: Message) {
        lock_unpoisoned(&self.log).push(message);
    }

    pub(crate) fn latch_content_type(&self, content_type: String) {
        *lock_unpoisoned(&self.content_type) = Some(content_type);
    }

    pub(crate) fn content_type(&self) -> Option<String> {
        lock_unpoisoned(&self.content_type).clone()
    }

    pub(crate) fn latch_generated_uri(&self, uri: String) {
        *lock_unpoisoned(&self.generated_uri) = Some(uri);
    }

    /// Returns true exactly once, to gate the persistent-fetch status probe.
    pub(crate) fn first_status_probe(&self) -> bool {
        !self.status_probe_sent.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn command_snapshot(&self) -> Command {
        lock_unpoisoned(&self.command).clone()
    }

    /// Rewrites the command's target URI for a protocol-level redirect. The
    /// identifier is untouched so replies keep resolving to this ticket.
    pub(crate) fn rewrite_uri(&self, uri: &str) -> Command {
        let mut command = lock_unpoisoned(&self.command);
        command.set_field("URI", uri);
        command.clone()
    }

    /// Records the terminal result, notifies the observer, and releases the
    /// completion signal. Later calls are ignored: the first terminal
    /// transition wins.
    ///
    /// The observer runs after the result lock is released, so a callback
    /// may consult [`JobTicket::outcome`] without deadlocking the
    /// coordinator.
    pub(crate) fn complete(&self, result: Result<JobOutcome, FcpError>) {
        {
            let mut slot = lock_unpoisoned(&self.result);
            if slot.is_some() {
                return;
            }
            *slot = Some(result.clone());
        }
        match &result {
            Ok(outcome) => self.observer.notify(JobStatus::Successful(outcome)),
            Err(error) => self.observer.notify(JobStatus::Failed(error)),
        }
        self.done.set();
    }
}

/// A bounded set of tickets polled for completion as a group.
///
/// Callers juggling many outstanding jobs push their tickets here and call
/// [`Worklist::poll_complete`] from their own loop instead of blocking on
/// each ticket in turn. Finished tickets are drained out; the rest stay.
#[derive(Debug, Default)]
pub struct Worklist {
    tickets: Vec<Arc<JobTicket>>,
}

impl Worklist {
    /// Creates an empty worklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a ticket to the worklist.
    pub fn push(&mut self, ticket: Arc<JobTicket>) {
        self.tickets.push(ticket);
    }

    /// Number of tickets still pending.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether every ticket has been drained.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Removes and returns every ticket that has reached a terminal state,
    /// in submission order. Non-blocking.
    pub fn poll_complete(&mut self) -> Vec<Arc<JobTicket>> {
        let mut complete = Vec::new();
        self.tickets.retain(|ticket| {
            if ticket.is_complete() {
                complete.push(Arc::clone(ticket));
                false
            } else {
                true
            }
        });
        complete
    }
}

impl std::fmt::Debug for JobTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTicket")
            .field("identifier", &self.identifier)
            .field("command", &self.command_name())
            .field("persistent", &self.persistent)
            .field("global", &self.global)
            .field("sent", &self.sent.is_set())
            .field("complete", &self.done.is_set())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    struct RecordingObserver {
        statuses: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            lock_unpoisoned(&self.statuses).clone()
        }
    }

    impl StatusObserver for Arc<RecordingObserver> {
        fn notify(&self, status: JobStatus<'_>) {
            let label = match status {
                JobStatus::Pending(message) => format!("pending:{}", message.header()),
                JobStatus::Successful(_) => String::from("successful"),
                JobStatus::Failed(error) => format!("failed:{error}"),
            };
            lock_unpoisoned(&self.statuses).push(label);
        }
    }

    fn ticket_with_observer(observer: Box<dyn StatusObserver>) -> JobTicket {
        let command = Command::new("ClientGet")
            .identifier("fcp-test-1")
            .field("URI", "KSK@sample");
        JobTicket::new(String::from("fcp-test-1"), command, observer, Weak::new())
    }

    fn ticket() -> JobTicket {
        ticket_with_observer(Box::new(NoopObserver))
    }

    #[test]
    fn wait_reports_send_timeout_while_queued() {
        let ticket = ticket();
        let error = ticket
            .wait(Some(Duration::from_millis(30)))
            .expect_err("unsent job should time out");
        assert!(matches!(error, FcpError::SendTimeout { command } if command == "ClientGet"));
    }

    #[test]
    fn wait_reports_node_timeout_once_sent() {
        let ticket = ticket();
        ticket.mark_sent();
        let error = ticket
            .wait(Some(Duration::from_millis(30)))
            .expect_err("unanswered job should time out");
        assert!(matches!(error, FcpError::NodeTimeout { command } if command == "ClientGet"));
    }

    #[test]
    fn wait_without_timeout_blocks_until_completion() {
        let ticket = Arc::new(ticket());
        let waiter = {
            let ticket = Arc::clone(&ticket);
            thread::spawn(move || ticket.wait(None))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!ticket.is_complete());
        ticket.mark_sent();
        ticket.complete(Ok(JobOutcome::Uri(String::from("CHK@done"))));
        let outcome = waiter.join().expect("waiter joins").expect("job succeeds");
        assert_eq!(outcome, JobOutcome::Uri(String::from("CHK@done")));
        assert!(ticket.is_complete());
    }

    #[test]
    fn observer_sees_pending_then_terminal_in_order() {
        let observer = RecordingObserver::new();
        let ticket = ticket_with_observer(Box::new(Arc::clone(&observer)));

        let mut progress = Message::new("SimpleProgress");
        progress.set("Succeeded", 3_i64);
        ticket.notify_pending(&progress);
        ticket.complete(Ok(JobOutcome::Fetched {
            content_type: String::from("application/octet-stream"),
            data: FetchData::Presence,
        }));

        assert_eq!(observer.seen(), ["pending:SimpleProgress", "successful"]);
    }

    #[test]
    fn terminal_callback_can_read_the_result_without_blocking() {
        struct SelfReader {
            ticket: Mutex<Option<Arc<JobTicket>>>,
            read: Mutex<Option<Result<JobOutcome, FcpError>>>,
        }

        impl StatusObserver for Arc<SelfReader> {
            fn notify(&self, status: JobStatus<'_>) {
                if matches!(status, JobStatus::Successful(_) | JobStatus::Failed(_))
                    && let Some(ticket) = lock_unpoisoned(&self.ticket).clone()
                {
                    *lock_unpoisoned(&self.read) = Some(ticket.outcome());
                }
            }
        }

        let reader = Arc::new(SelfReader {
            ticket: Mutex::new(None),
            read: Mutex::new(None),
        });
        let ticket = Arc::new(ticket_with_observer(Box::new(Arc::clone(&reader))));
        *lock_unpoisoned(&reader.ticket) = Some(Arc::clone(&ticket));

        ticket.complete(Ok(JobOutcome::Uri(String::from("CHK@done"))));

        let read = lock_unpoisoned(&reader.read).clone();
        assert!(matches!(read, Some(Ok(JobOutcome::Uri(uri))) if uri == "CHK@done"));
    }

    #[test]
    fn adopted_tickets_take_their_scope_from_the_message() {
        let mut entry = Message::new("PersistentGet");
        entry.set("Identifier", "old-1");
        entry.set("Persistence", "forever");
        entry.set("Global", "true");
        let ticket = JobTicket::adopted(String::from("old-1"), &entry, Weak::new());
        assert!(ticket.is_persistent());
        assert!(ticket.is_global());
        assert!(ticket.is_sent());

        let stray = Message::new("ProtocolError");
        let ticket = JobTicket::adopted(String::from("__global"), &stray, Weak::new());
        assert!(!ticket.is_persistent());
        assert!(!ticket.is_global());
    }

    #[test]
    fn first_terminal_transition_wins() {
        let ticket = ticket();
        ticket.complete(Err(FcpError::FetchFailed {
            code: Some(13),
            reason: String::from("not found"),
        }));
        ticket.complete(Ok(JobOutcome::Fetched {
            content_type: String::from("application/octet-stream"),
            data: FetchData::Presence,
        }));
        assert!(matches!(
            ticket.outcome(),
            Err(FcpError::FetchFailed { code: Some(13), .. })
        ));
    }

    #[test]
    fn cancel_on_non_persistent_ticket_is_a_no_op() {
        let ticket = ticket();
        ticket.cancel();
        assert!(!ticket.is_complete());
    }

    #[test]
    fn worklist_drains_completed_tickets_only() {
        let named = |identifier: &str| {
            Arc::new(JobTicket::new(
                identifier.to_owned(),
                Command::new("ClientGet").identifier(identifier),
                Box::new(NoopObserver),
                Weak::new(),
            ))
        };
        let first = named("wl-1");
        let second = named("wl-2");
        let mut worklist = Worklist::new();
        worklist.push(Arc::clone(&first));
        worklist.push(Arc::clone(&second));

        assert!(worklist.poll_complete().is_empty());
        second.complete(Ok(JobOutcome::Uri(String::from("CHK@done"))));
        let complete = worklist.poll_complete();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].identifier(), second.identifier());
        assert_eq!(worklist.len(), 1);

        first.complete(Ok(JobOutcome::Uri(String::from("CHK@other"))));
        assert_eq!(worklist.poll_complete().len(), 1);
        assert!(worklist.is_empty());
    }

    #[test]
    fn redirect_rewrite_keeps_the_identifier() {
        let ticket = ticket();
        let rewritten = ticket.rewrite_uri("KSK@elsewhere");
        assert_eq!(rewritten.get("URI"), Some("KSK@elsewhere"));
        assert_eq!(rewritten.request_identifier(), Some("fcp-test-1"));
    }
}
