//! Proactive share refresh

use super::Participant;
use crate::{
    curve::Curve,
    network::{
        broadcast_unicast_exchange, correlation_id, unicast_exchange, EchoContext, PartyAuth,
        Router,
    },
    shard::Shard,
    Error, Result, SessionId,
};
use rand::rngs::OsRng;
use tracing::{debug, info, instrument, warn};

const PROTOCOL: &str = "DKLs23Refresh";

/// Refresh key shares without changing the public key
///
/// Every shareholder of `shard` must take part. Old shards stay valid for the
/// same key, but must not be mixed with refreshed ones in a signing quorum.
#[instrument(skip(shard, router, auth), fields(party_id = shard.id()))]
pub async fn run_key_refresh<C, R>(
    shard: &Shard<C>,
    session_id: SessionId,
    router: &R,
    auth: Option<&PartyAuth>,
) -> Result<Shard<C>>
where
    C: Curve,
    R: Router + ?Sized,
{
    if router.id() != shard.id() {
        return Err(Error::InvalidArgument(format!(
            "router belongs to party {}, shard to party {}",
            router.id(),
            shard.id()
        )));
    }
    info!(
        party_id = shard.id(),
        shareholders = %shard.shareholders(),
        "Starting key refresh"
    );

    let result = refresh_session(shard, session_id, router, auth).await;
    if let Err(err) = &result {
        warn!(party_id = shard.id(), error = %err, "Key refresh aborted");
        router.discard(PROTOCOL);
    }
    result
}

async fn refresh_session<C, R>(
    shard: &Shard<C>,
    session_id: SessionId,
    router: &R,
    auth: Option<&PartyAuth>,
) -> Result<Shard<C>>
where
    C: Curve,
    R: Router + ?Sized,
{
    let mut rng = OsRng;
    let quorum = shard.shareholders();
    let mut participant = Participant::refresh(shard, session_id)?;
    let echo = auth.map(|auth| EchoContext {
        session_id: &session_id,
        auth,
    });

    debug!("Refresh Round 1: Zero-constant dealing");
    let (broadcast, unicasts) = participant.round1(&mut rng)?;
    let (broadcasts, unicasts) = broadcast_unicast_exchange(
        router,
        &correlation_id(PROTOCOL, 1),
        &broadcast,
        &unicasts,
        quorum,
        echo,
    )
    .await?;

    debug!("Refresh Round 2: Share verification");
    let unicasts = participant.round2(broadcasts, unicasts)?;
    let unicasts = unicast_exchange(router, &correlation_id(PROTOCOL, 2), &unicasts, quorum).await?;

    debug!("Refresh Round 3: Finalize");
    let refreshed = participant.round3(unicasts)?;

    info!(
        party_id = shard.id(),
        public_key = hex::encode(refreshed.public_key_bytes()),
        "Key refresh completed successfully"
    );
    Ok(refreshed)
}
