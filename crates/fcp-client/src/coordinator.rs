//! The coordinator: one loop, one socket, one registry.
//!
//! All outbound commands and inbound messages multiplex over the single
//! connection, so exactly one thread owns it. Callers reach the loop only
//! through the outbound queue; the loop reacts to each side with a bounded
//! poll, never blocking indefinitely on either, which keeps reaction
//! latency for both directions under roughly one poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use fcp_wire::Command;

use crate::dispatch;
use crate::errors::FcpError;
use crate::registry::JobRegistry;
use crate::sync::lock_unpoisoned;
use crate::ticket::{JobOutcome, JobTicket};
use crate::transport::Connection;

const COORDINATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::coordinator");

/// Items on the outbound queue.
pub(crate) enum Outbound {
    /// A command with a registered ticket awaiting replies.
    Job(Arc<JobTicket>),
    /// A fire-and-forget control command (`WatchGlobal`,
    /// `RemovePersistentRequest`); written to the socket, never registered.
    Control(Command),
}

/// State shared between the coordinator loop, the client surface, and job
/// tickets.
pub(crate) struct EngineShared {
    registry: JobRegistry,
    outbound: Mutex<Sender<Outbound>>,
    running: AtomicBool,
}

impl EngineShared {
    pub(crate) fn new(outbound: Sender<Outbound>) -> Self {
        Self {
            registry: JobRegistry::default(),
            outbound: Mutex::new(outbound),
            running: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Registers a job and enqueues it for transmission. Registration
    /// happens before the queue hop so the ticket is visible to dispatch
    /// and to duplicate checks as soon as this returns.
    ///
    /// # Errors
    ///
    /// Returns [`FcpError::NotRunning`] once the coordinator has stopped.
    pub(crate) fn submit_job(&self, ticket: Arc<JobTicket>) -> Result<(), FcpError> {
        let identifier = ticket.identifier().to_owned();
        self.registry.insert(Arc::clone(&ticket));
        self.send(Outbound::Job(ticket)).inspect_err(|_| {
            self.registry.remove(&identifier);
        })
    }

    /// Enqueues a fire-and-forget control command.
    ///
    /// # Errors
    ///
    /// Returns [`FcpError::NotRunning`] once the coordinator has stopped.
    pub(crate) fn submit_control(&self, command: Command) -> Result<(), FcpError> {
        self.send(Outbound::Control(command))
    }

    fn send(&self, item: Outbound) -> Result<(), FcpError> {
        if !self.is_running() {
            return Err(FcpError::NotRunning);
        }
        lock_unpoisoned(&self.outbound)
            .send(item)
            .map_err(|_| FcpError::NotRunning)
    }

    /// Deregisters a persistent job and tells the daemon to drop it.
    /// Best-effort: a dead engine turns this into a local removal only.
    pub(crate) fn cancel_job(&self, identifier: &str, global: bool) {
        self.registry.remove(identifier);
        let removal = Command::new("RemovePersistentRequest")
            .identifier(identifier)
            .global(global);
        if let Err(error) = self.submit_control(removal) {
            debug!(
                target: COORDINATOR_TARGET,
                identifier,
                error = %error,
                "cancel not delivered"
            );
        }
    }

    /// Applies a terminal result: drops transient entries from the registry,
    /// then completes the ticket. Removal happens first so a waiter woken by
    /// completion never observes a finished transient job still registered.
    /// Persistent and global jobs stay registered until explicitly cancelled
    /// or the engine is torn down.
    pub(crate) fn finish(&self, ticket: &Arc<JobTicket>, result: Result<JobOutcome, FcpError>) {
        if !ticket.is_persistent() && !ticket.is_global() {
            self.registry.remove(ticket.identifier());
        }
        ticket.complete(result);
    }
}

/// Handle to the coordinator thread.
pub(crate) struct CoordinatorHandle {
    shared: Arc<EngineShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CoordinatorHandle {
    /// Spawns the loop on a dedicated thread, taking ownership of the
    /// connection and the receiving end of the outbound queue.
    pub(crate) fn spawn(
        connection: Connection,
        shared: Arc<EngineShared>,
        receiver: Receiver<Outbound>,
        poll_interval: Duration,
    ) -> Self {
        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(String::from("fcp-coordinator"))
            .spawn(move || run_loop(connection, &loop_shared, &receiver, poll_interval))
            .map_err(|error| {
                error!(
                    target: COORDINATOR_TARGET,
                    error = %error,
                    "failed to spawn coordinator thread"
                );
                shared.stop();
                error
            })
            .ok();
        Self { shared, handle }
    }

    pub(crate) fn shutdown(&self) {
        self.shared.stop();
    }

    /// Signals the loop to stop and waits for it to exit.
    pub(crate) fn join(mut self) {
        self.shared.stop();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(target: COORDINATOR_TARGET, "coordinator thread panicked");
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

fn run_loop(
    mut connection: Connection,
    shared: &Arc<EngineShared>,
    receiver: &Receiver<Outbound>,
    poll_interval: Duration,
) {
    info!(target: COORDINATOR_TARGET, "coordinator loop active");
    let exit_error = loop {
        if !shared.is_running() {
            break FcpError::NotRunning;
        }
        if let Err(error) = iterate(&mut connection, shared, receiver, poll_interval) {
            error!(
                target: COORDINATOR_TARGET,
                error = %error,
                "coordinator loop terminating"
            );
            break error;
        }
    };

    // The engine is now unusable: no reconnection is attempted. Fail every
    // outstanding ticket, including any still queued, so no waiter wedges.
    shared.stop();
    for ticket in shared.registry().drain() {
        fail_ticket(&ticket, &exit_error);
    }
    while let Ok(item) = receiver.try_recv() {
        if let Outbound::Job(ticket) = item {
            fail_ticket(&ticket, &exit_error);
        }
    }
    info!(target: COORDINATOR_TARGET, "coordinator loop stopped");
}

/// One loop iteration: a bounded poll for an inbound frame, then a bounded
/// poll of the outbound queue.
fn iterate(
    connection: &mut Connection,
    shared: &Arc<EngineShared>,
    receiver: &Receiver<Outbound>,
    poll_interval: Duration,
) -> Result<(), FcpError> {
    if connection.poll_incoming(poll_interval)? {
        let message = connection.recv()?;
        dispatch::handle_message(message, connection, shared)?;
    }

    match receiver.recv_timeout(poll_interval) {
        Ok(Outbound::Job(ticket)) => {
            let command = ticket.command_snapshot();
            debug!(
                target: COORDINATOR_TARGET,
                identifier = ticket.identifier(),
                command = command.header(),
                "job dequeued, transmitting"
            );
            connection.send(&command)?;
            ticket.mark_sent();
        }
        Ok(Outbound::Control(command)) => {
            debug!(
                target: COORDINATOR_TARGET,
                command = command.header(),
                "control command transmitted"
            );
            connection.send(&command)?;
        }
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => {
            // Every sender (the client and all tickets) is gone.
            shared.stop();
        }
    }
    Ok(())
}

/// Fails a ticket on loop exit, releasing the send gate as well so waiters
/// blocked in the send phase wake up.
fn fail_ticket(ticket: &Arc<JobTicket>, error: &FcpError) {
    ticket.mark_sent();
    ticket.complete(Err(error.clone()));
}
