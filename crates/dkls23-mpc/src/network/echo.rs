//! Echo broadcast
//!
//! Three rounds with one designated broadcaster:
//!
//! 1. the broadcaster signs its message and sends it to every other party;
//! 2. every responder checks the broadcaster's signature and forwards the
//!    signed message to every other responder, countersigned;
//! 3. every responder compares the forwarded copies with its own.
//!
//! A forwarded copy with a bad countersignature or a bad broadcaster
//! signature blames the relayer. A well-formed copy that differs from ours is
//! a pair of conflicting statements signed by the broadcaster, which blames
//! the broadcaster.
//!
//! [`echo_broadcast_exchange`] runs one instance per quorum member at once,
//! bundling the instances' messages per peer.

use super::{check_senders, unicast_exchange, OutgoingUnicasts, RoundMessages, Router};
use crate::{Error, Quorum, Result, SessionId, ShareholderId};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

/// Long-term ed25519 credentials of a party and the directory of its peers' keys.
#[derive(Debug, Clone)]
pub struct PartyAuth {
    signing_key: SigningKey,
    directory: BTreeMap<ShareholderId, VerifyingKey>,
}

impl PartyAuth {
    pub fn new(signing_key: SigningKey, directory: BTreeMap<ShareholderId, VerifyingKey>) -> Self {
        Self {
            signing_key,
            directory,
        }
    }

    /// Fresh credentials for every member of `quorum`, each knowing all the others.
    pub fn generate<R: CryptoRngCore>(
        quorum: &Quorum,
        rng: &mut R,
    ) -> BTreeMap<ShareholderId, PartyAuth> {
        let keys: BTreeMap<ShareholderId, SigningKey> = quorum
            .iter()
            .map(|id| (id, SigningKey::generate(rng)))
            .collect();
        let directory: BTreeMap<ShareholderId, VerifyingKey> = keys
            .iter()
            .map(|(id, key)| (*id, key.verifying_key()))
            .collect();
        keys.into_iter()
            .map(|(id, key)| (id, PartyAuth::new(key, directory.clone())))
            .collect()
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.signing_key.sign(payload).to_bytes().to_vec()
    }

    fn verify(&self, signer: ShareholderId, payload: &[u8], signature: &[u8]) -> bool {
        let Some(key) = self.directory.get(&signer) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify_strict(payload, &signature).is_ok()
    }
}

/// Round 1: broadcaster to each responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoRound1Message {
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Round 2: responder to each other responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoRound2Message {
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
    pub relayer_signature: Vec<u8>,
}

/// One party's side of a single-broadcaster echo broadcast.
#[derive(Debug)]
pub struct EchoParticipant {
    round: u32,
    me: ShareholderId,
    broadcaster: ShareholderId,
    quorum: Quorum,
    session_id: SessionId,
    auth: PartyAuth,
    received: Option<EchoRound1Message>,
}

impl EchoParticipant {
    /// With two parties nobody is left to echo to.
    pub const MIN_QUORUM: usize = 3;

    /// `message` must be given exactly when `me` is the broadcaster.
    pub fn new(
        me: ShareholderId,
        broadcaster: ShareholderId,
        quorum: Quorum,
        session_id: SessionId,
        auth: PartyAuth,
        message: Option<Vec<u8>>,
    ) -> Result<Self> {
        if quorum.len() < Self::MIN_QUORUM {
            return Err(Error::InvalidArgument(format!(
                "echo broadcast needs at least {} parties, got {}",
                Self::MIN_QUORUM,
                quorum.len()
            )));
        }
        if !quorum.contains(me) || !quorum.contains(broadcaster) {
            return Err(Error::InvalidArgument(format!(
                "parties {} and {} must both be in {}",
                me, broadcaster, quorum
            )));
        }
        if let Some(missing) = quorum.iter().find(|id| !auth.directory.contains_key(id)) {
            return Err(Error::InvalidArgument(format!(
                "no verifying key for party {}",
                missing
            )));
        }

        let received = match (me == broadcaster, message) {
            (true, Some(message)) => {
                let signature = auth.sign(&broadcast_payload(&session_id, broadcaster, &message));
                Some(EchoRound1Message { message, signature })
            }
            (false, None) => None,
            _ => {
                return Err(Error::InvalidArgument(
                    "only the broadcaster holds a message".into(),
                ))
            }
        };

        Ok(Self {
            round: 1,
            me,
            broadcaster,
            quorum,
            session_id,
            auth,
            received,
        })
    }

    fn is_broadcaster(&self) -> bool {
        self.me == self.broadcaster
    }

    fn responders(&self) -> impl Iterator<Item = ShareholderId> + '_ {
        let broadcaster = self.broadcaster;
        self.quorum.others(self.me).filter(move |id| *id != broadcaster)
    }

    fn check_round(&self, expected: u32) -> Result<()> {
        if self.round != expected {
            return Err(Error::RoundMismatch {
                expected,
                actual: self.round,
            });
        }
        Ok(())
    }

    pub fn round1(&mut self) -> Result<OutgoingUnicasts<EchoRound1Message>> {
        self.check_round(1)?;

        let mut outgoing = OutgoingUnicasts::new();
        if self.is_broadcaster() {
            let signed = self.received.clone().ok_or_else(|| {
                Error::InvariantViolation("broadcaster without a message".into())
            })?;
            for peer in self.quorum.others(self.me) {
                outgoing.insert(peer, signed.clone());
            }
        }

        self.round += 1;
        Ok(outgoing)
    }

    pub fn round2(
        &mut self,
        input: RoundMessages<EchoRound1Message>,
    ) -> Result<OutgoingUnicasts<EchoRound2Message>> {
        self.check_round(2)?;

        let mut outgoing = OutgoingUnicasts::new();
        if self.is_broadcaster() {
            check_senders(&input, std::iter::empty())?;
        } else {
            check_senders(&input, [self.broadcaster])?;
            let signed = input.into_values().next().ok_or(Error::MissingMessage {
                from: self.broadcaster,
            })?;
            let payload = broadcast_payload(&self.session_id, self.broadcaster, &signed.message);
            if !self.auth.verify(self.broadcaster, &payload, &signed.signature) {
                return Err(Error::abort(
                    self.broadcaster,
                    "invalid broadcaster signature",
                ));
            }

            let relayer_signature = self.auth.sign(&relay_payload(
                &self.session_id,
                self.broadcaster,
                self.me,
                &signed.message,
            ));
            for peer in self.responders() {
                outgoing.insert(
                    peer,
                    EchoRound2Message {
                        message: signed.message.clone(),
                        signature: signed.signature.clone(),
                        relayer_signature: relayer_signature.clone(),
                    },
                );
            }
            self.received = Some(signed);
        }

        self.round += 1;
        Ok(outgoing)
    }

    /// The agreed message.
    pub fn round3(&mut self, input: RoundMessages<EchoRound2Message>) -> Result<Vec<u8>> {
        self.check_round(3)?;
        // forwarded copies only travel between responders
        let expected: Vec<ShareholderId> = if self.is_broadcaster() {
            Vec::new()
        } else {
            self.responders().collect()
        };
        check_senders(&input, expected)?;

        let mine = self
            .received
            .as_ref()
            .ok_or_else(|| Error::InvariantViolation("echo round 3 without a message".into()))?;

        for (relayer, forwarded) in &input {
            let relayed = relay_payload(
                &self.session_id,
                self.broadcaster,
                *relayer,
                &forwarded.message,
            );
            if !self
                .auth
                .verify(*relayer, &relayed, &forwarded.relayer_signature)
            {
                return Err(Error::abort(*relayer, "invalid relayer signature"));
            }
            let original = broadcast_payload(&self.session_id, self.broadcaster, &forwarded.message);
            if !self
                .auth
                .verify(self.broadcaster, &original, &forwarded.signature)
            {
                return Err(Error::abort(*relayer, "relayed an unsigned message"));
            }
            if forwarded.message != mine.message {
                return Err(Error::abort(
                    self.broadcaster,
                    format!("equivocation detected via party {}", relayer),
                ));
            }
        }

        self.round += 1;
        Ok(mine.message.clone())
    }
}

fn broadcast_payload(session_id: &SessionId, broadcaster: ShareholderId, message: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"dkls23-mpc/echo/broadcast");
    hasher.update(session_id);
    hasher.update(broadcaster.to_be_bytes());
    hasher.update(message);
    hasher.finalize().to_vec()
}

fn relay_payload(
    session_id: &SessionId,
    broadcaster: ShareholderId,
    relayer: ShareholderId,
    message: &[u8],
) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"dkls23-mpc/echo/relay");
    hasher.update(session_id);
    hasher.update(broadcaster.to_be_bytes());
    hasher.update(relayer.to_be_bytes());
    hasher.update(message);
    hasher.finalize().to_vec()
}

/// Route a bundled round input (sender -> broadcaster -> message) to the
/// per-broadcaster instances. `admits(from, broadcaster)` says whether
/// `from` may speak in that broadcaster's instance this round.
fn unbundle<T>(
    received: RoundMessages<BTreeMap<ShareholderId, T>>,
    instances: &BTreeMap<ShareholderId, EchoParticipant>,
    admits: impl Fn(ShareholderId, ShareholderId) -> bool,
) -> Result<BTreeMap<ShareholderId, RoundMessages<T>>> {
    let mut routed: BTreeMap<ShareholderId, RoundMessages<T>> = instances
        .keys()
        .map(|broadcaster| (*broadcaster, RoundMessages::new()))
        .collect();
    for (from, bundle) in received {
        for (broadcaster, message) in bundle {
            if !admits(from, broadcaster) {
                return Err(Error::abort(
                    from,
                    format!("sent a message in the echo instance of {}", broadcaster),
                ));
            }
            routed
                .get_mut(&broadcaster)
                .ok_or_else(|| Error::abort(from, format!("no echo instance for {}", broadcaster)))?
                .insert(from, message);
        }
    }
    Ok(routed)
}

fn bundle<T>(
    outputs: BTreeMap<ShareholderId, OutgoingUnicasts<T>>,
    quorum: &Quorum,
    me: ShareholderId,
) -> OutgoingUnicasts<BTreeMap<ShareholderId, T>> {
    let mut bundled: OutgoingUnicasts<BTreeMap<ShareholderId, T>> =
        quorum.others(me).map(|peer| (peer, BTreeMap::new())).collect();
    for (broadcaster, outgoing) in outputs {
        for (to, message) in outgoing {
            if let Some(bundle) = bundled.get_mut(&to) {
                bundle.insert(broadcaster, message);
            }
        }
    }
    bundled
}

/// What a party needs to take part in echo broadcasts of one session.
#[derive(Debug, Clone, Copy)]
pub struct EchoContext<'a> {
    pub session_id: &'a SessionId,
    pub auth: &'a PartyAuth,
}

/// Every party echo-broadcasts `message` at once; returns the agreed
/// messages of every other party.
pub async fn echo_broadcast_exchange<R, T>(
    router: &R,
    correlation_id: &str,
    message: &T,
    quorum: &Quorum,
    echo: EchoContext<'_>,
) -> Result<RoundMessages<T>>
where
    R: Router + ?Sized,
    T: Serialize + DeserializeOwned + Send + Sync,
{
    let me = router.id();
    let auth = echo.auth;
    // signatures bind both the session and the round
    let session_id: SessionId = Sha256::new()
        .chain_update(echo.session_id)
        .chain_update(correlation_id.as_bytes())
        .finalize()
        .into();
    let encoded = serde_json::to_vec(message).map_err(|e| Error::Serialization(e.to_string()))?;

    let mut instances = BTreeMap::new();
    for broadcaster in quorum.iter() {
        let own = (broadcaster == me).then(|| encoded.clone());
        instances.insert(
            broadcaster,
            EchoParticipant::new(me, broadcaster, quorum.clone(), session_id, auth.clone(), own)?,
        );
    }
    debug!(party_id = me, correlation_id, "Echo broadcast");

    let mut outputs = BTreeMap::new();
    for (broadcaster, instance) in instances.iter_mut() {
        outputs.insert(*broadcaster, instance.round1()?);
    }
    let received = unicast_exchange(
        router,
        &format!("{}:ECHO1", correlation_id),
        &bundle(outputs, quorum, me),
        quorum,
    )
    .await?;

    // only the broadcaster speaks in its own first round
    let mut inputs = unbundle(received, &instances, |from, broadcaster| from == broadcaster)?;
    let mut outputs = BTreeMap::new();
    for (broadcaster, instance) in instances.iter_mut() {
        let input = inputs.remove(broadcaster).unwrap_or_default();
        outputs.insert(*broadcaster, instance.round2(input)?);
    }
    let received = unicast_exchange(
        router,
        &format!("{}:ECHO2", correlation_id),
        &bundle(outputs, quorum, me),
        quorum,
    )
    .await?;

    // relays travel between responders, never to or from the broadcaster
    let mut inputs = unbundle(received, &instances, |from, broadcaster| {
        from != broadcaster && me != broadcaster
    })?;
    let mut agreed = RoundMessages::new();
    for (broadcaster, instance) in instances.iter_mut() {
        let input = inputs.remove(broadcaster).unwrap_or_default();
        let bytes = instance.round3(input)?;
        if *broadcaster != me {
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Deserialization(e.to_string()).blame(*broadcaster))?;
            agreed.insert(*broadcaster, value);
        }
    }
    Ok(agreed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryNetwork;
    use crate::testing::map_unicasts;
    use futures_util::future::try_join_all;
    use rand::rngs::OsRng;

    fn participants(
        quorum: &Quorum,
        broadcaster: ShareholderId,
        message: &[u8],
    ) -> BTreeMap<ShareholderId, EchoParticipant> {
        let auths = PartyAuth::generate(quorum, &mut OsRng);
        quorum
            .iter()
            .map(|id| {
                let own = (id == broadcaster).then(|| message.to_vec());
                let participant =
                    EchoParticipant::new(id, broadcaster, quorum.clone(), [7u8; 32], auths[&id].clone(), own)
                        .unwrap();
                (id, participant)
            })
            .collect()
    }

    #[test]
    fn test_two_parties_rejected() {
        let quorum = Quorum::first(2).unwrap();
        let auths = PartyAuth::generate(&quorum, &mut OsRng);
        let result = EchoParticipant::new(1, 1, quorum, [0u8; 32], auths[&1].clone(), Some(vec![1]));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_honest_run_agrees() {
        let quorum = Quorum::first(4).unwrap();
        let mut parties = participants(&quorum, 2, b"agreed value");

        let r1 = parties
            .iter_mut()
            .map(|(id, p)| (*id, p.round1().unwrap()))
            .collect();
        let mut r1_in = map_unicasts(r1);
        let r2 = parties
            .iter_mut()
            .map(|(id, p)| (*id, p.round2(r1_in.remove(id).unwrap()).unwrap()))
            .collect();
        let mut r2_in = map_unicasts(r2);
        for (id, p) in parties.iter_mut() {
            let output = p.round3(r2_in.remove(id).unwrap()).unwrap();
            assert_eq!(output, b"agreed value");
        }
    }

    #[test]
    fn test_equivocating_broadcaster_is_blamed() {
        let quorum = Quorum::first(3).unwrap();
        let auths = PartyAuth::generate(&quorum, &mut OsRng);
        let session_id = [1u8; 32];

        let mut parties: BTreeMap<ShareholderId, EchoParticipant> = quorum
            .iter()
            .filter(|id| *id != 1)
            .map(|id| {
                let p = EchoParticipant::new(id, 1, quorum.clone(), session_id, auths[&id].clone(), None)
                    .unwrap();
                (id, p)
            })
            .collect();

        // party 1 signs two different messages, one per responder
        let mut r2_out = BTreeMap::new();
        for (id, p) in parties.iter_mut() {
            p.round1().unwrap();
            let message = vec![*id as u8];
            let signature = auths[&1].sign(&broadcast_payload(&session_id, 1, &message));
            let mut input = RoundMessages::new();
            input.insert(1, EchoRound1Message { message, signature });
            r2_out.insert(*id, p.round2(input).unwrap());
        }
        let mut r2_in = map_unicasts(r2_out);

        let err = parties
            .get_mut(&2)
            .unwrap()
            .round3(r2_in.remove(&2).unwrap())
            .unwrap_err();
        assert_eq!(err.culprit(), Some(1));
    }

    #[test]
    fn test_tampering_relayer_is_blamed() {
        let quorum = Quorum::first(3).unwrap();
        let mut parties = participants(&quorum, 1, b"value");

        let r1 = parties
            .iter_mut()
            .map(|(id, p)| (*id, p.round1().unwrap()))
            .collect();
        let mut r1_in = map_unicasts(r1);
        let r2 = parties
            .iter_mut()
            .map(|(id, p)| (*id, p.round2(r1_in.remove(id).unwrap()).unwrap()))
            .collect();
        let mut r2_in = map_unicasts(r2);

        let mut input = r2_in.remove(&2).unwrap();
        input.get_mut(&3).unwrap().message = b"forged".to_vec();
        let err = parties.get_mut(&2).unwrap().round3(input).unwrap_err();
        assert_eq!(err.culprit(), Some(3));
    }

    #[test]
    fn test_round_order_enforced() {
        let quorum = Quorum::first(3).unwrap();
        let mut parties = participants(&quorum, 1, b"value");
        let p = parties.get_mut(&2).unwrap();
        assert!(matches!(
            p.round2(RoundMessages::new()),
            Err(Error::RoundMismatch { expected: 2, actual: 1 })
        ));
        p.round1().unwrap();
        assert!(matches!(
            p.round3(RoundMessages::new()),
            Err(Error::RoundMismatch { expected: 3, actual: 2 })
        ));
    }

    fn instances_for(me: ShareholderId, quorum: &Quorum) -> BTreeMap<ShareholderId, EchoParticipant> {
        let auths = PartyAuth::generate(quorum, &mut OsRng);
        quorum
            .iter()
            .map(|broadcaster| {
                let own = (broadcaster == me).then(|| b"mine".to_vec());
                let instance =
                    EchoParticipant::new(me, broadcaster, quorum.clone(), [4u8; 32], auths[&me].clone(), own)
                        .unwrap();
                (broadcaster, instance)
            })
            .collect()
    }

    #[test]
    fn test_smuggled_bundle_entry_blames_relayer() {
        let quorum = Quorum::first(3).unwrap();
        let instances = instances_for(1, &quorum);
        let signed = EchoRound1Message {
            message: b"forged".to_vec(),
            signature: vec![0u8; 64],
        };

        // party 2 speaks for party 3 in the first round
        let mut bundle = BTreeMap::new();
        bundle.insert(2, signed.clone());
        bundle.insert(3, signed.clone());
        let mut received = RoundMessages::new();
        received.insert(2, bundle);
        let err = unbundle(received, &instances, |from, broadcaster| from == broadcaster)
            .unwrap_err();
        assert_eq!(err.culprit(), Some(2));

        // party 3 relays party 1's own broadcast back to it
        let mut bundle = BTreeMap::new();
        bundle.insert(1, signed);
        let mut received = RoundMessages::new();
        received.insert(3, bundle);
        let err = unbundle(received, &instances, |from, broadcaster| {
            from != broadcaster && broadcaster != 1
        })
        .unwrap_err();
        assert_eq!(err.culprit(), Some(3));
    }

    #[test]
    fn test_unbundle_routes_admitted_entries() {
        let quorum = Quorum::first(3).unwrap();
        let instances = instances_for(1, &quorum);
        let mut received = RoundMessages::new();
        for from in [2, 3] {
            let mut bundle = BTreeMap::new();
            bundle.insert(from, vec![from as u8]);
            received.insert(from, bundle);
        }

        let routed = unbundle(received, &instances, |from, broadcaster| from == broadcaster).unwrap();
        assert!(routed[&1].is_empty());
        assert_eq!(routed[&2][&2], vec![2u8]);
        assert_eq!(routed[&3][&3], vec![3u8]);
    }

    #[tokio::test]
    async fn test_exchange_delivers_every_value() {
        let quorum = Quorum::first(3).unwrap();
        let network = MemoryNetwork::new(quorum.iter());
        let auths = PartyAuth::generate(&quorum, &mut OsRng);

        let runs = quorum.iter().map(|id| {
            let router = network.endpoint(id).unwrap();
            let auth = auths[&id].clone();
            let quorum = quorum.clone();
            async move {
                let echo = EchoContext {
                    session_id: &[3u8; 32],
                    auth: &auth,
                };
                let agreed = echo_broadcast_exchange(
                    &router,
                    "TestRound1",
                    &format!("value of {}", id),
                    &quorum,
                    echo,
                )
                .await?;
                Ok::<_, Error>((id, agreed))
            }
        });

        for (id, agreed) in try_join_all(runs).await.unwrap() {
            assert_eq!(agreed.len(), 2);
            for (from, value) in agreed {
                assert_ne!(from, id);
                assert_eq!(value, format!("value of {}", from));
            }
        }
    }
}
