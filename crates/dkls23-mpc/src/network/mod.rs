//! Round exchange over an abstract router
//!
//! A [`Router`] moves opaque payloads between quorum members, tagged with a
//! correlation id of the form `"<Protocol>Round<N>"`. Messages that arrive
//! for a correlation id nobody is waiting on yet are buffered, so
//! sub-protocols can interleave their rounds over one transport.
//!
//! On top of the router live the exchange shapes the protocols use: unicast
//! (a distinct payload per peer), broadcast (one payload fanned out) and the
//! combined broadcast+unicast round.

use crate::{Error, Quorum, Result, ShareholderId};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

pub use ::async_trait::async_trait;

pub mod echo;
pub mod memory;

pub use echo::{echo_broadcast_exchange, EchoContext, EchoParticipant, PartyAuth};
pub use memory::{MemoryNetwork, MemoryRouter};

/// Per-peer round input, keyed by sender.
pub type RoundMessages<T> = BTreeMap<ShareholderId, T>;

/// Per-peer round output, keyed by recipient.
pub type OutgoingUnicasts<T> = BTreeMap<ShareholderId, T>;

/// Message transport for one party
#[async_trait]
pub trait Router: Send + Sync {
    /// The party this endpoint belongs to
    fn id(&self) -> ShareholderId;

    /// Send one payload per destination, all tagged with `correlation_id`
    async fn send(
        &self,
        correlation_id: &str,
        messages: BTreeMap<ShareholderId, Vec<u8>>,
    ) -> Result<()>;

    /// Wait until a payload tagged with `correlation_id` has arrived from
    /// every party in `from`, and hand them over
    async fn receive(
        &self,
        correlation_id: &str,
        from: &[ShareholderId],
    ) -> Result<BTreeMap<ShareholderId, Vec<u8>>>;

    /// Drop buffered payloads whose correlation id starts with
    /// `correlation_prefix`. Runners call this when a session aborts.
    fn discard(&self, _correlation_prefix: &str) {}
}

/// `"<protocol>Round<round>"`
pub fn correlation_id(protocol: &str, round: u32) -> String {
    format!("{}Round{}", protocol, round)
}

/// Check that `messages` holds exactly one entry per expected sender.
pub fn check_senders<T>(
    messages: &RoundMessages<T>,
    expected: impl IntoIterator<Item = ShareholderId>,
) -> Result<()> {
    let expected: BTreeSet<ShareholderId> = expected.into_iter().collect();
    if let Some(from) = expected.iter().find(|id| !messages.contains_key(id)) {
        return Err(Error::MissingMessage { from: *from });
    }
    if let Some(from) = messages.keys().find(|id| !expected.contains(id)) {
        return Err(Error::UnexpectedSender { from: *from });
    }
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(from: ShareholderId, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Deserialization(e.to_string()))
        .map_err(|e| e.blame(from))
}

/// Every party sends a distinct payload to every other party.
pub async fn unicast_exchange<R, T>(
    router: &R,
    correlation_id: &str,
    outgoing: &OutgoingUnicasts<T>,
    quorum: &Quorum,
) -> Result<RoundMessages<T>>
where
    R: Router + ?Sized,
    T: Serialize + DeserializeOwned + Send + Sync,
{
    let me = router.id();
    let peers: Vec<ShareholderId> = quorum.others(me).collect();
    check_senders(outgoing, peers.iter().copied())
        .map_err(|e| Error::InvariantViolation(format!("outgoing unicasts: {}", e)))?;

    let mut payloads = BTreeMap::new();
    for (to, message) in outgoing {
        payloads.insert(*to, encode(message)?);
    }
    trace!(party_id = me, correlation_id, "sending unicasts");
    router.send(correlation_id, payloads).await?;

    let received = router.receive(correlation_id, &peers).await?;
    received
        .into_iter()
        .map(|(from, bytes)| Ok((from, decode(from, &bytes)?)))
        .collect()
}

/// One payload is fanned out verbatim to every other party.
pub async fn broadcast_exchange<R, T>(
    router: &R,
    correlation_id: &str,
    message: &T,
    quorum: &Quorum,
) -> Result<RoundMessages<T>>
where
    R: Router + ?Sized,
    T: Serialize + DeserializeOwned + Send + Sync,
{
    let me = router.id();
    let peers: Vec<ShareholderId> = quorum.others(me).collect();
    let bytes = encode(message)?;
    let payloads = peers.iter().map(|to| (*to, bytes.clone())).collect();
    trace!(party_id = me, correlation_id, "sending broadcast");
    router.send(correlation_id, payloads).await?;

    let received = router.receive(correlation_id, &peers).await?;
    received
        .into_iter()
        .map(|(from, bytes)| Ok((from, decode(from, &bytes)?)))
        .collect()
}

/// Echo broadcast when credentials are given and the quorum is large enough,
/// plain broadcast otherwise.
pub async fn reliable_broadcast_exchange<R, T>(
    router: &R,
    correlation_id: &str,
    message: &T,
    quorum: &Quorum,
    echo: Option<EchoContext<'_>>,
) -> Result<RoundMessages<T>>
where
    R: Router + ?Sized,
    T: Serialize + DeserializeOwned + Send + Sync,
{
    match echo {
        Some(echo) if quorum.len() >= EchoParticipant::MIN_QUORUM => {
            echo_broadcast_exchange(router, correlation_id, message, quorum, echo).await
        }
        _ => broadcast_exchange(router, correlation_id, message, quorum).await,
    }
}

/// A single logical round carrying both a broadcast and per-peer payloads,
/// under `"<cid>:BROADCAST"` and `"<cid>:UNICAST"`.
pub async fn broadcast_unicast_exchange<R, B, U>(
    router: &R,
    correlation_id: &str,
    broadcast: &B,
    unicasts: &OutgoingUnicasts<U>,
    quorum: &Quorum,
    echo: Option<EchoContext<'_>>,
) -> Result<(RoundMessages<B>, RoundMessages<U>)>
where
    R: Router + ?Sized,
    B: Serialize + DeserializeOwned + Send + Sync,
    U: Serialize + DeserializeOwned + Send + Sync,
{
    let broadcast_id = format!("{}:BROADCAST", correlation_id);
    let unicast_id = format!("{}:UNICAST", correlation_id);

    let broadcasts =
        reliable_broadcast_exchange(router, &broadcast_id, broadcast, quorum, echo).await?;
    let unicasts = unicast_exchange(router, &unicast_id, unicasts, quorum).await?;
    Ok((broadcasts, unicasts))
}
