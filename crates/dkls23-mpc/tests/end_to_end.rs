use dkls23_mpc::{
    curve::point_to_bytes,
    keygen::{run_dkg, run_key_refresh},
    network::{MemoryNetwork, PartyAuth},
    sharing::reconstruct,
    sign::run_dsg,
    Curve, Error, Quorum, Secp256k1, SessionConfig, SessionId, Shard, ShareholderId, Signature,
    P256,
};
use futures_util::future::try_join_all;
use k256::ecdsa::{signature::hazmat::PrehashVerifier, RecoveryId, VerifyingKey};
use rand::rngs::OsRng;
use std::collections::BTreeMap;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn keygen<C: Curve>(
    threshold: u16,
    n: u16,
    auth: Option<&BTreeMap<ShareholderId, PartyAuth>>,
) -> BTreeMap<ShareholderId, Shard<C>> {
    let parties = Quorum::first(n).unwrap();
    let network = MemoryNetwork::new(parties.iter());
    let session_id: SessionId = rand::random();

    let runs = parties.iter().map(|id| {
        let router = network.endpoint(id).unwrap();
        let config =
            SessionConfig::with_session_id(session_id, parties.clone(), threshold, id).unwrap();
        let auth = auth.map(|auth| &auth[&id]);
        async move {
            let shard = run_dkg::<C, _>(&config, &router, auth).await?;
            Ok::<_, Error>((id, shard))
        }
    });
    try_join_all(runs).await.unwrap().into_iter().collect()
}

async fn sign<C: Curve>(
    shards: &BTreeMap<ShareholderId, Shard<C>>,
    quorum: &Quorum,
    message: &[u8],
    auth: Option<&BTreeMap<ShareholderId, PartyAuth>>,
) -> Vec<Signature> {
    let network = MemoryNetwork::new(quorum.iter());
    let session_id: SessionId = rand::random();

    let runs = quorum.iter().map(|id| {
        let router = network.endpoint(id).unwrap();
        let shard = &shards[&id];
        let auth = auth.map(|auth| &auth[&id]);
        async move { run_dsg(shard, quorum, session_id, message, &router, auth).await }
    });
    try_join_all(runs).await.unwrap()
}

fn k256_verifying_key(shard: &Shard<Secp256k1>) -> VerifyingKey {
    VerifyingKey::from_sec1_bytes(&shard.public_key_bytes()).unwrap()
}

fn assert_k256_valid(shard: &Shard<Secp256k1>, message: &[u8], signature: &Signature) {
    let verifying_key = k256_verifying_key(shard);
    let parsed = k256::ecdsa::Signature::from_scalars(signature.r, signature.s).unwrap();
    let digest = Secp256k1::digest(message);
    verifying_key.verify_prehash(&digest, &parsed).unwrap();

    let recovered = VerifyingKey::recover_from_prehash(
        &digest,
        &parsed,
        RecoveryId::from_byte(signature.recovery_id).unwrap(),
    )
    .unwrap();
    assert_eq!(recovered, verifying_key);
}

#[tokio::test]
async fn test_dkg_then_sign_every_qualified_subset() {
    init_tracing();
    let shards = keygen::<Secp256k1>(2, 3, None).await;
    let public_key = shards[&1].public_key_bytes();
    for shard in shards.values() {
        assert_eq!(shard.public_key_bytes(), public_key);
        shard.validate().unwrap();
    }

    let message = b"Hello World";
    for ids in [vec![1, 2], vec![1, 3], vec![2, 3], vec![1, 2, 3]] {
        let quorum = Quorum::new(ids).unwrap();
        let signatures = sign(&shards, &quorum, message, None).await;

        assert!(signatures.windows(2).all(|pair| pair[0] == pair[1]));
        assert_k256_valid(&shards[&1], message, &signatures[0]);
        signatures[0].to_der().unwrap();
    }
}

#[tokio::test]
async fn test_every_qualified_subset_reconstructs_public_key() {
    let shards = keygen::<Secp256k1>(3, 5, None).await;
    let public_key = *shards[&1].public_key();

    let ids: Vec<ShareholderId> = shards.keys().copied().collect();
    for size in 3..=5 {
        for window in ids.windows(size) {
            let shares = window
                .iter()
                .map(|id| (*id, *shards[id].secret_share()))
                .collect();
            let secret = reconstruct::<Secp256k1>(&shares).unwrap();
            assert_eq!(Secp256k1::base_mul(&secret), public_key);
        }
    }
}

#[tokio::test]
async fn test_echo_broadcast_path() {
    init_tracing();
    let parties = Quorum::first(3).unwrap();
    let auth = PartyAuth::generate(&parties, &mut OsRng);

    let shards = keygen::<Secp256k1>(2, 3, Some(&auth)).await;
    let signatures = sign(&shards, &parties, b"echoed", Some(&auth)).await;
    assert_k256_valid(&shards[&2], b"echoed", &signatures[0]);
}

#[tokio::test]
async fn test_refresh_keeps_key_and_still_signs() {
    let shards = keygen::<Secp256k1>(2, 3, None).await;
    let parties = Quorum::first(3).unwrap();
    let network = MemoryNetwork::new(parties.iter());
    let session_id: SessionId = rand::random();

    let runs = shards.iter().map(|(id, shard)| {
        let router = network.endpoint(*id).unwrap();
        async move {
            let refreshed = run_key_refresh(shard, session_id, &router, None).await?;
            Ok::<_, Error>((*id, refreshed))
        }
    });
    let refreshed: BTreeMap<ShareholderId, Shard<Secp256k1>> =
        try_join_all(runs).await.unwrap().into_iter().collect();

    for (id, shard) in &refreshed {
        assert_eq!(shard.public_key(), shards[id].public_key());
        assert_ne!(shard.secret_share(), shards[id].secret_share());
    }

    let quorum = Quorum::new([1, 3]).unwrap();
    let signatures = sign(&refreshed, &quorum, b"after refresh", None).await;
    assert_k256_valid(&shards[&1], b"after refresh", &signatures[0]);
}

#[tokio::test]
async fn test_derived_shards_sign_for_child_key() {
    let shards = keygen::<Secp256k1>(2, 3, None).await;
    let children: BTreeMap<ShareholderId, Shard<Secp256k1>> = shards
        .iter()
        .map(|(id, shard)| (*id, shard.derive_path("m/0/7").unwrap()))
        .collect();
    assert_ne!(children[&1].public_key(), shards[&1].public_key());

    let quorum = Quorum::new([2, 3]).unwrap();
    let signatures = sign(&children, &quorum, b"child", None).await;
    assert_k256_valid(&children[&1], b"child", &signatures[0]);
}

#[tokio::test]
async fn test_p256_signing() {
    use p256::ecdsa::{signature::hazmat::PrehashVerifier as _, VerifyingKey};

    let shards = keygen::<P256>(2, 3, None).await;
    let quorum = Quorum::new([1, 2]).unwrap();
    let signatures = sign(&shards, &quorum, b"Hello World", None).await;

    let verifying_key =
        VerifyingKey::from_sec1_bytes(&point_to_bytes(shards[&1].public_key())).unwrap();
    let parsed = p256::ecdsa::Signature::from_scalars(signatures[0].r, signatures[0].s).unwrap();
    verifying_key
        .verify_prehash(&P256::digest(b"Hello World"), &parsed)
        .unwrap();
}

#[tokio::test]
async fn test_sub_threshold_quorum_is_rejected() {
    let shards = keygen::<Secp256k1>(3, 4, None).await;
    let quorum = Quorum::new([1, 2]).unwrap();
    let network = MemoryNetwork::new(quorum.iter());
    let router = network.endpoint(1).unwrap();

    let err = run_dsg(&shards[&1], &quorum, [0u8; 32], b"msg", &router, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
