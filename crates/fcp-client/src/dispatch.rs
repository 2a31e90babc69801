//! Inbound message dispatch: the protocol state machine.
//!
//! Every inbound header word maps to a [`ReplyKind`]; the transition table
//! below is an exhaustive match over that closed enum, so adding a variant
//! forces the new transition to be written. Each message updates exactly
//! one job ticket, resolved by its `Identifier` field; messages with no
//! identifier fall back to the synthetic global ticket, and unknown
//! identifiers (persistent requests from a previous session) get an adopted
//! ticket so nothing is ever silently dropped.

use std::sync::Arc;

use tracing::{debug, warn};

use fcp_wire::{Command, Message};

use crate::coordinator::EngineShared;
use crate::errors::FcpError;
use crate::ticket::{FetchData, JobOutcome, JobTicket};
use crate::transport::Connection;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Identifier under which messages without one are filed. Also the
/// identifier of the persistent-request listing job.
pub(crate) const GLOBAL_IDENTIFIER: &str = "__global";

/// Content type assumed when the daemon does not declare one.
pub(crate) const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Redirect marker carried by a non-terminal `GetFailed`.
const REDIRECT_DESCRIPTION: &str = "New URI";

/// Classified inbound message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    /// `SSKKeypair`: a generated key pair.
    SskKeypair,
    /// `DataFound`: fetch located the key; payload may follow.
    DataFound,
    /// `AllData`: the fetched payload itself.
    AllData,
    /// `GetFailed`: terminal fetch failure, or a redirect retry.
    GetFailed,
    /// `URIGenerated`: insert announced its eventual URI.
    UriGenerated,
    /// `PutSuccessful`: terminal insert success.
    PutSuccessful,
    /// `PutFailed`: terminal insert failure.
    PutFailed,
    /// `StartedCompression`: insert-side progress.
    StartedCompression,
    /// `FinishedCompression`: insert-side progress.
    FinishedCompression,
    /// `SimpleProgress`: generic progress.
    SimpleProgress,
    /// `PersistentGet`: persistent-request listing entry.
    PersistentGet,
    /// `PersistentPut`: persistent-request listing entry.
    PersistentPut,
    /// `PersistentPutDir`: persistent-request listing entry.
    PersistentPutDir,
    /// `EndListPersistentRequests`: listing complete.
    EndListPersistentRequests,
    /// `FCPPluginReply`: plugin RPC response.
    PluginReply,
    /// `ProtocolError`: daemon rejected a request.
    ProtocolError,
    /// `IdentifierCollision`: daemon saw a duplicate identifier.
    IdentifierCollision,
    /// Anything this engine does not recognise.
    Unknown,
}

impl ReplyKind {
    pub(crate) fn parse(header: &str) -> Self {
        match header {
            "SSKKeypair" => Self::SskKeypair,
            "DataFound" => Self::DataFound,
            "AllData" => Self::AllData,
            "GetFailed" => Self::GetFailed,
            "URIGenerated" => Self::UriGenerated,
            "PutSuccessful" => Self::PutSuccessful,
            "PutFailed" => Self::PutFailed,
            "StartedCompression" => Self::StartedCompression,
            "FinishedCompression" => Self::FinishedCompression,
            "SimpleProgress" => Self::SimpleProgress,
            "PersistentGet" => Self::PersistentGet,
            "PersistentPut" => Self::PersistentPut,
            "PersistentPutDir" => Self::PersistentPutDir,
            "EndListPersistentRequests" => Self::EndListPersistentRequests,
            "FCPPluginReply" => Self::PluginReply,
            "ProtocolError" => Self::ProtocolError,
            "IdentifierCollision" => Self::IdentifierCollision,
            _ => Self::Unknown,
        }
    }
}

/// Routes one inbound message to its ticket and applies the transition.
///
/// # Errors
///
/// Only engine-fatal faults (socket write failure during a redirect
/// re-issue or status probe) propagate; operation failures are delivered
/// through the ticket's result channel.
pub(crate) fn handle_message(
    message: Message,
    connection: &mut Connection,
    shared: &Arc<EngineShared>,
) -> Result<(), FcpError> {
    let identifier = message
        .identifier()
        .unwrap_or(GLOBAL_IDENTIFIER)
        .to_owned();
    let ticket = resolve_ticket(&identifier, &message, shared);

    match ReplyKind::parse(message.header()) {
        ReplyKind::SskKeypair => {
            let request_uri = required_text(&message, "RequestURI")?;
            let insert_uri = required_text(&message, "InsertURI")?;
            shared.finish(
                &ticket,
                Ok(JobOutcome::Keypair {
                    request_uri,
                    insert_uri,
                }),
            );
        }

        ReplyKind::DataFound => on_data_found(&message, &ticket, connection, shared)?,

        ReplyKind::AllData => {
            let content_type = ticket
                .content_type()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());
            let data = message.into_payload().unwrap_or_default();
            shared.finish(
                &ticket,
                Ok(JobOutcome::Fetched {
                    content_type,
                    data: FetchData::Direct(data),
                }),
            );
        }

        ReplyKind::GetFailed => {
            if message.text("ShortCodeDescription") == Some(REDIRECT_DESCRIPTION)
                && let Some(uri) = message.text("RedirectURI")
            {
                // Not terminal: re-issue the fetch at the new address on
                // the same identifier. The ticket completes only on the
                // final non-redirect response.
                let command = ticket.rewrite_uri(uri);
                connection.send(&command)?;
                debug!(
                    target: DISPATCH_TARGET,
                    identifier = %identifier,
                    uri,
                    "fetch redirected"
                );
                return Ok(());
            }
            shared.finish(
                &ticket,
                Err(FcpError::FetchFailed {
                    code: message.number("Code"),
                    reason: failure_reason(&message),
                }),
            );
        }

        ReplyKind::UriGenerated => {
            if let Some(uri) = message.text("URI") {
                ticket.latch_generated_uri(uri.to_owned());
            }
            ticket.notify_pending(&message);
        }

        ReplyKind::PutSuccessful => {
            let uri = required_text(&message, "URI")?;
            shared.finish(&ticket, Ok(JobOutcome::Uri(uri)));
        }

        ReplyKind::PutFailed => {
            shared.finish(
                &ticket,
                Err(FcpError::InsertFailed {
                    code: message.number("Code"),
                    reason: failure_reason(&message),
                }),
            );
        }

        ReplyKind::StartedCompression
        | ReplyKind::FinishedCompression
        | ReplyKind::SimpleProgress => {
            ticket.notify_pending(&message);
        }

        ReplyKind::PersistentGet | ReplyKind::PersistentPut | ReplyKind::PersistentPutDir => {
            ticket.notify_pending(&message);
            // Listing entries are keyed by the request they describe, but a
            // pending ListPersistentRequests job collects them too; its end
            // marker arrives with no identifier of its own.
            if ticket.identifier() != GLOBAL_IDENTIFIER
                && let Some(listing) = shared.registry().get(GLOBAL_IDENTIFIER)
            {
                listing.append_message(message.clone());
            }
            ticket.append_message(message);
        }

        ReplyKind::EndListPersistentRequests => {
            shared.finish(&ticket, Ok(JobOutcome::Listing(ticket.messages())));
        }

        ReplyKind::PluginReply => {
            shared.finish(&ticket, Ok(JobOutcome::PluginReply(message)));
        }

        ReplyKind::ProtocolError => {
            shared.finish(
                &ticket,
                Err(FcpError::Protocol {
                    code: message.number("Code"),
                    reason: failure_reason(&message),
                }),
            );
        }

        ReplyKind::IdentifierCollision => {
            warn!(
                target: DISPATCH_TARGET,
                identifier = %identifier,
                "identifier collision reported by daemon"
            );
            shared.finish(
                &ticket,
                Err(FcpError::IdentifierCollision {
                    identifier: identifier.clone(),
                }),
            );
        }

        ReplyKind::Unknown => {
            // An unrecognised header must never be silently dropped.
            warn!(
                target: DISPATCH_TARGET,
                header = message.header(),
                identifier = %identifier,
                "unrecognised message header"
            );
            let header = message.header().to_owned();
            shared.finish(&ticket, Err(FcpError::Unexpected { header }));
        }
    }

    Ok(())
}

/// Finds the ticket this message belongs to, adopting a synthetic
/// persistent ticket for identifiers this session never issued.
fn resolve_ticket(
    identifier: &str,
    message: &Message,
    shared: &Arc<EngineShared>,
) -> Arc<JobTicket> {
    if let Some(ticket) = shared.registry().get(identifier) {
        return ticket;
    }
    debug!(
        target: DISPATCH_TARGET,
        header = message.header(),
        identifier = %identifier,
        "message for unknown job, adopting"
    );
    let ticket = Arc::new(JobTicket::adopted(
        identifier.to_owned(),
        message,
        Arc::downgrade(shared),
    ));
    shared.registry().insert(Arc::clone(&ticket));
    ticket
}

fn on_data_found(
    message: &Message,
    ticket: &Arc<JobTicket>,
    connection: &mut Connection,
    shared: &Arc<EngineShared>,
) -> Result<(), FcpError> {
    let content_type = message
        .text("Metadata.ContentType")
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_owned();
    let command = ticket.command_snapshot();

    // Disk output and existence-check fetches are complete at DataFound;
    // there is no payload message to wait for.
    if let Some(path) = command.get("Filename") {
        let data = FetchData::File(path.to_owned());
        shared.finish(ticket, Ok(JobOutcome::Fetched { content_type, data }));
        return Ok(());
    }
    if command.get("ReturnType") == Some("none") {
        let data = FetchData::Presence;
        shared.finish(ticket, Ok(JobOutcome::Fetched { content_type, data }));
        return Ok(());
    }

    ticket.latch_content_type(content_type);

    // A persistent direct fetch only yields its AllData after an explicit
    // status request; fire it once per ticket.
    if command.get("ReturnType") == Some("direct")
        && ticket.is_persistent()
        && ticket.first_status_probe()
    {
        let probe = Command::new("GetRequestStatus")
            .identifier(ticket.identifier())
            .field(
                "Persistence",
                message
                    .text("Persistence")
                    .map_or_else(|| command.persistence_class().to_string(), str::to_owned),
            )
            .global(ticket.is_global());
        connection.send(&probe)?;
        debug!(
            target: DISPATCH_TARGET,
            identifier = ticket.identifier(),
            "status probe for persistent fetch"
        );
    }

    ticket.notify_pending(message);
    Ok(())
}

/// Picks the most descriptive daemon-supplied reason field.
fn failure_reason(message: &Message) -> String {
    message
        .text("CodeDescription")
        .or_else(|| message.text("ShortCodeDescription"))
        .unwrap_or("unspecified")
        .to_owned()
}

fn required_text(message: &Message, key: &str) -> Result<String, FcpError> {
    message.text(key).map(str::to_owned).ok_or_else(|| {
        FcpError::protocol(
            None,
            format!("{} reply missing {key}", message.header()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("SSKKeypair", ReplyKind::SskKeypair)]
    #[case("DataFound", ReplyKind::DataFound)]
    #[case("AllData", ReplyKind::AllData)]
    #[case("GetFailed", ReplyKind::GetFailed)]
    #[case("URIGenerated", ReplyKind::UriGenerated)]
    #[case("PutSuccessful", ReplyKind::PutSuccessful)]
    #[case("PutFailed", ReplyKind::PutFailed)]
    #[case("EndListPersistentRequests", ReplyKind::EndListPersistentRequests)]
    #[case("FCPPluginReply", ReplyKind::PluginReply)]
    #[case("ProtocolError", ReplyKind::ProtocolError)]
    #[case("IdentifierCollision", ReplyKind::IdentifierCollision)]
    #[case("NodeHello", ReplyKind::Unknown)]
    #[case("TestDDARequest", ReplyKind::Unknown)]
    fn classifies_headers(#[case] header: &str, #[case] expected: ReplyKind) {
        assert_eq!(ReplyKind::parse(header), expected);
    }

    #[test]
    fn failure_reason_prefers_the_long_description() {
        let mut message = Message::new("GetFailed");
        message.set("ShortCodeDescription", "Not found");
        assert_eq!(failure_reason(&message), "Not found");
        message.set("CodeDescription", "Data not found in the network");
        assert_eq!(failure_reason(&message), "Data not found in the network");
    }
}
