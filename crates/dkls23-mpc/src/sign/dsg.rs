//! DSG protocol runner

use super::{aggregate, Cosigner, PartialSignature};
use crate::{
    curve::Curve,
    network::{
        broadcast_unicast_exchange, correlation_id, reliable_broadcast_exchange,
        unicast_exchange, EchoContext, PartyAuth, Router,
    },
    shard::Shard,
    Error, Quorum, Result, SessionId, Signature,
};
use rand::rngs::OsRng;
use tracing::{debug, info, instrument, warn};

const PROTOCOL: &str = "DKLs23Sign";

/// Run the distributed signature generation protocol
///
/// # Arguments
/// * `shard` - This party's shard from DKG
/// * `quorum` - Signing parties, at least `threshold` of the shareholders
/// * `session_id` - Fresh session id agreed by the quorum
/// * `message` - Message to sign; hashed with SHA-256
/// * `router` - Message router for communication
/// * `auth` - Signing credentials; when present, broadcasts use echo broadcast
///
/// # Returns
/// The ECDSA signature, already verified against the shard's public key
#[instrument(skip(shard, message, router, auth), fields(party_id = shard.id()))]
pub async fn run_dsg<C, R>(
    shard: &Shard<C>,
    quorum: &Quorum,
    session_id: SessionId,
    message: &[u8],
    router: &R,
    auth: Option<&PartyAuth>,
) -> Result<Signature>
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
        quorum = %quorum,
        curve = C::NAME,
        "Starting DSG"
    );

    let result = sign_session(shard, quorum, session_id, message, router, auth).await;
    if let Err(err) = &result {
        warn!(party_id = shard.id(), error = %err, "DSG aborted");
        router.discard(PROTOCOL);
    }
    result
}

async fn sign_session<C, R>(
    shard: &Shard<C>,
    quorum: &Quorum,
    session_id: SessionId,
    message: &[u8],
    router: &R,
    auth: Option<&PartyAuth>,
) -> Result<Signature>
where
    C: Curve,
    R: Router + ?Sized,
{
    let mut rng = OsRng;
    let mut cosigner = Cosigner::new(shard, quorum.clone(), session_id, message)?;
    let echo = auth.map(|auth| EchoContext {
        session_id: &session_id,
        auth,
    });

    let (broadcast, unicasts) = cosigner.round1(&mut rng)?;
    let (broadcasts, unicasts) = broadcast_unicast_exchange(
        router,
        &correlation_id(PROTOCOL, 1),
        &broadcast,
        &unicasts,
        quorum,
        echo,
    )
    .await?;

    let unicasts = cosigner.round2(broadcasts, unicasts, &mut rng)?;
    let unicasts = unicast_exchange(router, &correlation_id(PROTOCOL, 2), &unicasts, quorum).await?;

    let unicasts = cosigner.round3(unicasts, &mut rng)?;
    let unicasts = unicast_exchange(router, &correlation_id(PROTOCOL, 3), &unicasts, quorum).await?;

    let (broadcast, unicasts) = cosigner.round4(unicasts)?;
    let (broadcasts, unicasts) = broadcast_unicast_exchange(
        router,
        &correlation_id(PROTOCOL, 4),
        &broadcast,
        &unicasts,
        quorum,
        echo,
    )
    .await?;

    let partial = cosigner.round5(broadcasts, unicasts)?;

    debug!("Exchanging partial signatures");
    let received: Vec<PartialSignature<C>> = reliable_broadcast_exchange(
        router,
        &correlation_id(PROTOCOL, 5),
        &partial,
        quorum,
        echo,
    )
    .await?
    .into_values()
    .collect();

    let mut partials = Vec::with_capacity(quorum.len());
    partials.push(partial);
    partials.extend(received);
    let signature = aggregate(shard.public_key(), message, &partials)?;

    info!(
        party_id = shard.id(),
        r = hex::encode(signature.r),
        s = hex::encode(signature.s),
        "DSG completed successfully"
    );
    Ok(signature)
}
