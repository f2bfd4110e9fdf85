//! DKG protocol runner

use super::Participant;
use crate::{
    curve::Curve,
    network::{
        broadcast_unicast_exchange, correlation_id, unicast_exchange, EchoContext, PartyAuth,
        Router,
    },
    shard::Shard,
    Error, Result, SessionConfig,
};
use rand::rngs::OsRng;
use tracing::{debug, info, instrument, warn};

const PROTOCOL: &str = "DKLs23Keygen";

/// Run the distributed key generation protocol
///
/// # Arguments
/// * `config` - Session configuration; `config.party_id` must be the router's id
/// * `router` - Message router for communication
/// * `auth` - Signing credentials; when present, broadcasts use echo broadcast
///
/// # Returns
/// The party's shard after successful DKG
#[instrument(skip(router, auth))]
pub async fn run_dkg<C, R>(
    config: &SessionConfig,
    router: &R,
    auth: Option<&PartyAuth>,
) -> Result<Shard<C>>
where
    C: Curve,
    R: Router + ?Sized,
{
    if router.id() != config.party_id {
        return Err(Error::InvalidArgument(format!(
            "router belongs to party {}, config to party {}",
            router.id(),
            config.party_id
        )));
    }
    info!(
        party_id = config.party_id,
        parties = %config.parties,
        threshold = config.threshold,
        curve = C::NAME,
        "Starting DKG"
    );

    let result = keygen_session(config, router, auth).await;
    if let Err(err) = &result {
        warn!(party_id = config.party_id, error = %err, "DKG aborted");
        router.discard(PROTOCOL);
    }
    result
}

async fn keygen_session<C, R>(
    config: &SessionConfig,
    router: &R,
    auth: Option<&PartyAuth>,
) -> Result<Shard<C>>
where
    C: Curve,
    R: Router + ?Sized,
{
    let mut rng = OsRng;
    let mut participant = Participant::<C>::new(config)?;
    let echo = auth.map(|auth| EchoContext {
        session_id: &config.session_id,
        auth,
    });

    debug!("DKG Round 1: Commitment");
    let (broadcast, unicasts) = participant.round1(&mut rng)?;
    let (broadcasts, unicasts) = broadcast_unicast_exchange(
        router,
        &correlation_id(PROTOCOL, 1),
        &broadcast,
        &unicasts,
        &config.parties,
        echo,
    )
    .await?;

    debug!("DKG Round 2: Share verification");
    let unicasts = participant.round2(broadcasts, unicasts)?;
    let unicasts =
        unicast_exchange(router, &correlation_id(PROTOCOL, 2), &unicasts, &config.parties)
            .await?;

    debug!("DKG Round 3: Finalize");
    let shard = participant.round3(unicasts)?;

    info!(
        party_id = config.party_id,
        public_key = hex::encode(shard.public_key_bytes()),
        "DKG completed successfully"
    );
    Ok(shard)
}
