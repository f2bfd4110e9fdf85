//! In-memory router implementation for testing and simulation

use super::{async_trait, Router};
use crate::{Error, Result, ShareholderId};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Inbox of one party: (correlation id, sender) -> payload
#[derive(Default)]
struct Mailbox {
    messages: DashMap<(String, ShareholderId), Vec<u8>>,
    notify: Notify,
}

/// A set of connected in-process endpoints
#[derive(Clone)]
pub struct MemoryNetwork {
    mailboxes: Arc<HashMap<ShareholderId, Arc<Mailbox>>>,
}

impl MemoryNetwork {
    /// Create a network with one mailbox per party
    pub fn new(ids: impl IntoIterator<Item = ShareholderId>) -> Self {
        let mailboxes = ids
            .into_iter()
            .map(|id| (id, Arc::new(Mailbox::default())))
            .collect();
        Self {
            mailboxes: Arc::new(mailboxes),
        }
    }

    /// The router for party `id`
    pub fn endpoint(&self, id: ShareholderId) -> Result<MemoryRouter> {
        if !self.mailboxes.contains_key(&id) {
            return Err(Error::InvalidArgument(format!(
                "party {} is not part of this network",
                id
            )));
        }
        Ok(MemoryRouter {
            id,
            network: self.clone(),
        })
    }
}

/// One party's endpoint on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryRouter {
    id: ShareholderId,
    network: MemoryNetwork,
}

impl MemoryRouter {
    fn mailbox(&self, id: ShareholderId) -> Result<&Arc<Mailbox>> {
        self.network
            .mailboxes
            .get(&id)
            .ok_or_else(|| Error::Transport(format!("party {} is unreachable", id)))
    }
}

#[async_trait]
impl Router for MemoryRouter {
    fn id(&self) -> ShareholderId {
        self.id
    }

    async fn send(
        &self,
        correlation_id: &str,
        messages: BTreeMap<ShareholderId, Vec<u8>>,
    ) -> Result<()> {
        if messages.contains_key(&self.id) {
            return Err(Error::InvalidArgument("cannot send to self".into()));
        }
        let mut deliveries = Vec::with_capacity(messages.len());
        for (to, payload) in messages {
            deliveries.push((to, self.mailbox(to)?, payload));
        }

        for (to, mailbox, payload) in deliveries {
            match mailbox.messages.entry((correlation_id.to_string(), self.id)) {
                Entry::Occupied(_) => {
                    warn!(
                        from = self.id,
                        to,
                        correlation_id,
                        "Dropping duplicate delivery"
                    );
                }
                Entry::Vacant(entry) => {
                    entry.insert(payload);
                }
            }
            mailbox.notify.notify_waiters();
        }
        Ok(())
    }

    async fn receive(
        &self,
        correlation_id: &str,
        from: &[ShareholderId],
    ) -> Result<BTreeMap<ShareholderId, Vec<u8>>> {
        if from.contains(&self.id) {
            return Err(Error::InvalidArgument("cannot receive from self".into()));
        }
        let mailbox = self.mailbox(self.id)?;

        loop {
            // register interest before checking, so a send between the check
            // and the await still wakes us
            let notified = mailbox.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = from.iter().all(|sender| {
                mailbox
                    .messages
                    .contains_key(&(correlation_id.to_string(), *sender))
            });
            if ready {
                let mut received = BTreeMap::new();
                for sender in from {
                    let (_, payload) = mailbox
                        .messages
                        .remove(&(correlation_id.to_string(), *sender))
                        .ok_or_else(|| {
                            Error::InvariantViolation(format!(
                                "buffered message from {} vanished",
                                sender
                            ))
                        })?;
                    received.insert(*sender, payload);
                }
                return Ok(received);
            }

            notified.await;
        }
    }

    fn discard(&self, correlation_prefix: &str) {
        let Some(mailbox) = self.network.mailboxes.get(&self.id) else {
            return;
        };
        let before = mailbox.messages.len();
        mailbox
            .messages
            .retain(|(correlation_id, _), _| !correlation_id.starts_with(correlation_prefix));
        let evicted = before.saturating_sub(mailbox.messages.len());
        if evicted > 0 {
            debug!(
                party_id = self.id,
                correlation_prefix, evicted, "Evicted undelivered messages"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(to: ShareholderId, payload: &[u8]) -> BTreeMap<ShareholderId, Vec<u8>> {
        let mut messages = BTreeMap::new();
        messages.insert(to, payload.to_vec());
        messages
    }

    #[tokio::test]
    async fn test_out_of_order_correlation_ids_are_buffered() {
        let network = MemoryNetwork::new([1, 2]);
        let alice = network.endpoint(1).unwrap();
        let bob = network.endpoint(2).unwrap();

        bob.send("EchoRound2", single(1, b"later")).await.unwrap();
        bob.send("EchoRound1", single(1, b"first")).await.unwrap();

        let first = alice.receive("EchoRound1", &[2]).await.unwrap();
        assert_eq!(first[&2], b"first");
        let later = alice.receive("EchoRound2", &[2]).await.unwrap();
        assert_eq!(later[&2], b"later");
    }

    #[tokio::test]
    async fn test_duplicate_is_dropped() {
        let network = MemoryNetwork::new([1, 2]);
        let alice = network.endpoint(1).unwrap();
        let bob = network.endpoint(2).unwrap();

        bob.send("Round1", single(1, b"original")).await.unwrap();
        bob.send("Round1", single(1, b"replay")).await.unwrap();

        let received = alice.receive("Round1", &[2]).await.unwrap();
        assert_eq!(received[&2], b"original");
    }

    #[tokio::test]
    async fn test_receive_waits_for_every_sender() {
        let network = MemoryNetwork::new([1, 2, 3]);
        let alice = network.endpoint(1).unwrap();
        let bob = network.endpoint(2).unwrap();
        let carol = network.endpoint(3).unwrap();

        let waiting = tokio::spawn(async move { alice.receive("Round1", &[2, 3]).await });

        bob.send("Round1", single(1, b"b")).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());
        carol.send("Round1", single(1, b"c")).await.unwrap();

        let received = waiting.await.unwrap().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[&3], b"c");
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let network = MemoryNetwork::new([1, 2]);
        let alice = network.endpoint(1).unwrap();

        assert!(alice.send("Round1", single(9, b"x")).await.is_err());
        assert!(network.endpoint(9).is_err());
    }

    fn pending(router: &MemoryRouter) -> usize {
        router.mailbox(router.id).unwrap().messages.len()
    }

    #[tokio::test]
    async fn test_bad_destination_delivers_nothing() {
        let network = MemoryNetwork::new([1, 2, 3]);
        let alice = network.endpoint(1).unwrap();
        let bob = network.endpoint(2).unwrap();

        let mut messages = single(2, b"to bob");
        messages.insert(9, b"to nobody".to_vec());
        assert!(matches!(
            alice.send("Round1", messages).await,
            Err(Error::Transport(_))
        ));

        let mut messages = single(2, b"to bob");
        messages.insert(1, b"to self".to_vec());
        assert!(matches!(
            alice.send("Round1", messages).await,
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(pending(&bob), 0);

        // nothing was half-delivered, so a clean retry is not a duplicate
        alice.send("Round1", single(2, b"retry")).await.unwrap();
        let received = bob.receive("Round1", &[1]).await.unwrap();
        assert_eq!(received[&1], b"retry");
    }

    #[tokio::test]
    async fn test_discard_evicts_only_matching_session() {
        let network = MemoryNetwork::new([1, 2]);
        let alice = network.endpoint(1).unwrap();
        let bob = network.endpoint(2).unwrap();

        bob.send("DKLs23SignRound4:BROADCAST", single(1, b"stale"))
            .await
            .unwrap();
        bob.send("DKLs23SignRound5", single(1, b"stale")).await.unwrap();
        bob.send("DKLs23KeygenRound1", single(1, b"keep")).await.unwrap();
        assert_eq!(pending(&alice), 3);

        alice.discard("DKLs23Sign");
        assert_eq!(pending(&alice), 1);

        bob.send("DKLs23SignRound5", single(1, b"fresh")).await.unwrap();
        let received = alice.receive("DKLs23SignRound5", &[2]).await.unwrap();
        assert_eq!(received[&2], b"fresh");
        let kept = alice.receive("DKLs23KeygenRound1", &[2]).await.unwrap();
        assert_eq!(kept[&2], b"keep");
    }
}
