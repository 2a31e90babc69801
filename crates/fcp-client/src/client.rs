//! Public client surface for driving FCP jobs against a daemon.
//!
//! An [`FcpClient`] owns one long-lived connection and a background
//! coordinator thread. Every operation comes in a blocking form and an
//! `_async` form returning a [`JobTicket`] the caller can wait on, poll,
//! or observe through a [`StatusObserver`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fcp_wire::{Command, Message, Persistence};
use tracing::{debug, info};

use crate::config::Config;
use crate::coordinator::{CoordinatorHandle, EngineShared};
use crate::dispatch::{DEFAULT_CONTENT_TYPE, GLOBAL_IDENTIFIER};
use crate::errors::FcpError;
use crate::ticket::{FetchData, JobOutcome, JobTicket, NoopObserver, StatusObserver};

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// Where the daemon should deliver fetched content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream the content back over the connection.
    #[default]
    Direct,
    /// Have the daemon write the content to this path on its own host.
    ToFile(String),
    /// Confirm retrievability without returning any content.
    Presence,
}

/// Tuning knobs for a fetch. The defaults match an interactive,
/// connection-scoped request.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub persistence: Persistence,
    pub global: bool,
    pub priority: u8,
    pub max_retries: u32,
    pub max_size: Option<u64>,
    pub verbosity: u32,
    /// Only consult the local datastore, never the network.
    pub datastore_only: bool,
    /// Skip the local datastore and go straight to the network.
    pub ignore_datastore: bool,
    pub output: OutputMode,
    /// Deadline for the blocking [`FcpClient::fetch`] call.
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            persistence: Persistence::Connection,
            global: false,
            priority: 2,
            max_retries: 3,
            max_size: None,
            verbosity: 0,
            datastore_only: false,
            ignore_datastore: false,
            output: OutputMode::Direct,
            timeout: None,
        }
    }
}

/// What an insert uploads.
#[derive(Debug, Clone)]
pub enum InsertSource {
    /// Content carried inline over the connection.
    Data(Vec<u8>),
    /// A file already present on the daemon's host.
    File(String),
    /// A redirect to another key, no content uploaded.
    Redirect(String),
}

/// Tuning knobs for an insert.
#[derive(Debug, Clone)]
pub struct InsertOptions {
    /// MIME type stored alongside the content. Defaults to
    /// `application/octet-stream` when unset.
    pub content_type: Option<String>,
    pub persistence: Persistence,
    pub global: bool,
    pub priority: u8,
    pub max_retries: u32,
    pub verbosity: u32,
    /// Compute the final key without actually inserting.
    pub chk_only: bool,
    pub dont_compress: bool,
    /// Deadline for the blocking [`FcpClient::insert`] call.
    pub timeout: Option<Duration>,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            persistence: Persistence::Connection,
            global: false,
            priority: 3,
            max_retries: 3,
            verbosity: 0,
            chk_only: false,
            dont_compress: false,
            timeout: None,
        }
    }
}

/// A completed fetch: the negotiated MIME type and where the content went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub content_type: String,
    pub data: FetchData,
}

/// A connected FCP client.
///
/// Dropping the client stops the coordinator thread; any jobs still in
/// flight fail with [`FcpError::Disconnected`] so no waiter blocks
/// forever.
pub struct FcpClient {
    shared: Arc<EngineShared>,
    coordinator: Option<CoordinatorHandle>,
    session_name: String,
    node_hello: Message,
    identifier_prefix: String,
    sequence: AtomicU64,
}

impl FcpClient {
    /// Connects to the daemon named by `config`, performs the handshake,
    /// and starts the coordinator thread.
    pub fn open(config: &Config) -> Result<Self, FcpError> {
        let session_name = config
            .session_name
            .clone()
            .unwrap_or_else(generated_session_name);
        let (connection, node_hello) = crate::transport::Connection::open(config, &session_name)?;
        info!(
            target: CLIENT_TARGET,
            endpoint = %config.endpoint,
            session = %session_name,
            "connected to daemon"
        );

        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(EngineShared::new(sender));
        let coordinator = CoordinatorHandle::spawn(
            connection,
            Arc::clone(&shared),
            receiver,
            config.poll_interval(),
        );
        let identifier_prefix = format!("{}-{}", session_name, epoch_millis());
        Ok(Self {
            shared,
            coordinator: Some(coordinator),
            session_name,
            node_hello,
            identifier_prefix,
            sequence: AtomicU64::new(0),
        })
    }

    /// The session name sent in the `ClientHello`.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// The daemon's `NodeHello` reply, with its version and capability
    /// fields intact.
    pub fn node_hello(&self) -> &Message {
        &self.node_hello
    }

    /// Whether the coordinator is still servicing the connection.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Generates a signed-key pair, blocking until the daemon replies.
    pub fn generate_keypair(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(String, String), FcpError> {
        let ticket = self.generate_keypair_async(NoopObserver)?;
        match ticket.wait(timeout)? {
            JobOutcome::Keypair {
                request_uri,
                insert_uri,
            } => Ok((request_uri, insert_uri)),
            other => Err(unexpected_outcome("GenerateSSK", &other)),
        }
    }

    /// Queues a `GenerateSSK` and returns its ticket immediately.
    pub fn generate_keypair_async(
        &self,
        observer: impl StatusObserver + 'static,
    ) -> Result<Arc<JobTicket>, FcpError> {
        let identifier = self.next_identifier();
        let command = Command::new("GenerateSSK").identifier(&identifier);
        self.submit(identifier, command, observer)
    }

    /// Fetches the content behind `uri`, blocking until the daemon
    /// delivers it or reports failure.
    pub fn fetch(&self, uri: &str, options: &FetchOptions) -> Result<FetchResult, FcpError> {
        let ticket = self.fetch_async(uri, options, NoopObserver)?;
        match ticket.wait(options.timeout)? {
            JobOutcome::Fetched { content_type, data } => Ok(FetchResult { content_type, data }),
            other => Err(unexpected_outcome("ClientGet", &other)),
        }
    }

    /// Queues a `ClientGet` and returns its ticket immediately.
    pub fn fetch_async(
        &self,
        uri: &str,
        options: &FetchOptions,
        observer: impl StatusObserver + 'static,
    ) -> Result<Arc<JobTicket>, FcpError> {
        let identifier = self.next_identifier();
        let mut command = Command::new("ClientGet")
            .identifier(&identifier)
            .field("URI", uri)
            .field("Verbosity", options.verbosity)
            .field("PriorityClass", options.priority)
            .field("MaxRetries", options.max_retries)
            .field("IgnoreDS", options.ignore_datastore)
            .field("DSonly", options.datastore_only)
            .persistence(options.persistence)
            .global(options.global);
        if let Some(max_size) = options.max_size {
            command.set_field("MaxSize", max_size);
        }
        match &options.output {
            OutputMode::Direct => command.set_field("ReturnType", "direct"),
            OutputMode::ToFile(path) => {
                command.set_field("ReturnType", "disk");
                command.set_field("Filename", path);
            }
            OutputMode::Presence => command.set_field("ReturnType", "none"),
        }
        self.submit(identifier, command, observer)
    }

    /// Inserts content under `uri`, blocking until the daemon reports the
    /// final key or a failure.
    pub fn insert(
        &self,
        uri: &str,
        source: InsertSource,
        options: &InsertOptions,
    ) -> Result<String, FcpError> {
        let ticket = self.insert_async(uri, source, options, NoopObserver)?;
        match ticket.wait(options.timeout)? {
            JobOutcome::Uri(final_uri) => Ok(final_uri),
            other => Err(unexpected_outcome("ClientPut", &other)),
        }
    }

    /// Queues a `ClientPut` and returns its ticket immediately.
    pub fn insert_async(
        &self,
        uri: &str,
        source: InsertSource,
        options: &InsertOptions,
        observer: impl StatusObserver + 'static,
    ) -> Result<Arc<JobTicket>, FcpError> {
        let identifier = self.next_identifier();
        let content_type = options
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        let mut command = Command::new("ClientPut")
            .identifier(&identifier)
            .field("URI", uri)
            .field("Metadata.ContentType", content_type)
            .field("Verbosity", options.verbosity)
            .field("PriorityClass", options.priority)
            .field("MaxRetries", options.max_retries)
            .field("GetCHKOnly", options.chk_only)
            .field("DontCompress", options.dont_compress)
            .persistence(options.persistence)
            .global(options.global);
        command = match source {
            InsertSource::Data(bytes) => command.field("UploadFrom", "direct").payload(bytes),
            InsertSource::File(path) => command.field("UploadFrom", "disk").field("Filename", path),
            InsertSource::Redirect(target) => command
                .field("UploadFrom", "redirect")
                .field("TargetURI", target),
        };
        self.submit(identifier, command, observer)
    }

    /// Sends a message to a daemon-side plugin and blocks for its reply.
    pub fn send_plugin_message(
        &self,
        plugin_name: &str,
        parameters: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Message, FcpError> {
        let identifier = self.next_identifier();
        let mut command = Command::new("FCPPluginMessage")
            .identifier(&identifier)
            .field("PluginName", plugin_name);
        for (key, value) in parameters {
            command.set_field(format!("Param.{key}"), value);
        }
        let ticket = self.submit(identifier, command, NoopObserver)?;
        match ticket.wait(timeout)? {
            JobOutcome::PluginReply(reply) => Ok(reply),
            other => Err(unexpected_outcome("FCPPluginMessage", &other)),
        }
    }

    /// Subscribes this connection to traffic about the global queue.
    pub fn listen_global(&self) -> Result<(), FcpError> {
        self.shared
            .submit_control(Command::new("WatchGlobal").field("Enabled", true))
    }

    /// Unsubscribes from global-queue traffic.
    pub fn ignore_global(&self) -> Result<(), FcpError> {
        self.shared
            .submit_control(Command::new("WatchGlobal").field("Enabled", false))
    }

    /// Asks the daemon to enumerate persistent requests, blocking until
    /// the listing completes.
    pub fn list_persistent_requests(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<Message>, FcpError> {
        let ticket = self.list_persistent_requests_async(NoopObserver)?;
        match ticket.wait(timeout)? {
            JobOutcome::Listing(entries) => Ok(entries),
            other => Err(unexpected_outcome("ListPersistentRequests", &other)),
        }
    }

    /// Queues a `ListPersistentRequests` and returns its ticket. Only one
    /// listing may be in flight at a time, because the daemon's listing
    /// replies carry no identifier of their own.
    pub fn list_persistent_requests_async(
        &self,
        observer: impl StatusObserver + 'static,
    ) -> Result<Arc<JobTicket>, FcpError> {
        if self.shared.registry().contains(GLOBAL_IDENTIFIER) {
            return Err(FcpError::protocol(
                None,
                "a persistent-request listing is already in flight",
            ));
        }
        let command = Command::new("ListPersistentRequests");
        self.submit(GLOBAL_IDENTIFIER.to_owned(), command, observer)
    }

    /// Removes a persistent request from the daemon's queue and drops its
    /// ticket from the registry.
    pub fn cancel_persistent_request(&self, identifier: &str, global: bool) {
        self.shared.cancel_job(identifier, global);
    }

    /// Every ticket currently registered.
    pub fn jobs(&self) -> Vec<Arc<JobTicket>> {
        self.shared.registry().all()
    }

    /// Tickets scoped to this connection only.
    pub fn transient_jobs(&self) -> Vec<Arc<JobTicket>> {
        self.jobs()
            .into_iter()
            .filter(|ticket| !ticket.is_persistent())
            .collect()
    }

    /// Persistent tickets that are not on the global queue.
    pub fn persistent_jobs(&self) -> Vec<Arc<JobTicket>> {
        self.jobs()
            .into_iter()
            .filter(|ticket| ticket.is_persistent() && !ticket.is_global())
            .collect()
    }

    /// Tickets on the global queue.
    pub fn global_jobs(&self) -> Vec<Arc<JobTicket>> {
        self.jobs()
            .into_iter()
            .filter(|ticket| ticket.is_global())
            .collect()
    }

    /// Stops the coordinator and waits for its thread to exit.
    pub fn shutdown(mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.join();
        }
    }

    fn submit(
        &self,
        identifier: String,
        command: Command,
        observer: impl StatusObserver + 'static,
    ) -> Result<Arc<JobTicket>, FcpError> {
        command
            .validate()
            .map_err(|error| FcpError::invalid_command(error.to_string()))?;
        let ticket = Arc::new(JobTicket::new(
            identifier,
            command,
            Box::new(observer),
            Arc::downgrade(&self.shared),
        ));
        debug!(
            target: CLIENT_TARGET,
            identifier = %ticket.identifier(),
            command = %ticket.command_name(),
            "queueing job"
        );
        self.shared.submit_job(Arc::clone(&ticket))?;
        Ok(ticket)
    }

    fn next_identifier(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence}", self.identifier_prefix)
    }
}

impl Drop for FcpClient {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.join();
        }
    }
}

impl std::fmt::Debug for FcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcpClient")
            .field("session_name", &self.session_name)
            .field("running", &self.shared.is_running())
            .finish_non_exhaustive()
    }
}

fn unexpected_outcome(command: &str, outcome: &JobOutcome) -> FcpError {
    FcpError::internal(format!(
        "{command} completed with an unexpected outcome: {outcome:?}"
    ))
}

fn generated_session_name() -> String {
    format!("fcp-client-{}", epoch_millis())
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis())
}
