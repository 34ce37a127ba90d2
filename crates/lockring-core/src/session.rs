//! Ring GAKE session state machine.
//!
//! One session runs one protocol run over one ring. It is sans-IO: the driver
//! feeds [`SessionEvent`]s and executes the returned [`SessionAction`]s.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ Start ┌─────────┐ AKE_INIT / AKE_RESPOND ┌─────────────┐
//! │ Init │──────>│ AkeSent │───────────────────────>│ KeysPartial │
//! └──────┘       └─────────┘                        └─────────────┘
//!                                                          │ both neighbor keys
//!                                                          ↓ (own share broadcast)
//! ┌─────────────┐  all shares,   ┌────────────────┐ ┌──────────────┐
//! │ Established │<───────────────│ AwaitingShares │<│ KeysComplete │
//! └─────────────┘  checks pass   └────────────────┘ └──────────────┘
//!                                        │ closure / commitment failure
//!                                        ↓
//!                                   ┌─────────┐
//!                                   │ Aborted │
//!                                   └─────────┘
//! ```
//!
//! A responder may learn its left key before it has started, so `Init` can
//! move straight to `KeysPartial`. Shares that arrive early are stored and
//! picked up as soon as the session can finalize.
//!
//! # Invariants
//!
//! - The group key is set iff every share is present, the shares XOR to zero,
//!   and every commitment re-derives byte for byte.
//! - `Established` and `Aborted` are terminal for the run.
//! - Duplicate deliveries never change state; conflicting duplicates keep the
//!   first value.

use std::sync::Arc;

use lockring_crypto::{
    AkeInitMessage, AkeResponseMessage, AkeTranscript, Coin, CryptoProvider, GroupKey,
    MlKemProvider, SecretKey, Share, SharedSecret, check_closure, derive_group_key,
    reconstruct_left_keys,
};
use lockring_proto::{Envelope, MessageKind, Payload, ProtocolError, Recipient, ShareBroadcast};
use tracing::{debug, error, info, warn};

use crate::{
    env::Environment,
    error::{SessionError, VerificationFailure},
    roster::Roster,
};

/// Session progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent, no neighbor key known
    Init,
    /// AKE_INIT sent to the right neighbor, no neighbor key known yet
    AkeSent,
    /// Exactly one of the two neighbor keys known
    KeysPartial,
    /// Both neighbor keys known and own share broadcast; no peer share yet
    KeysComplete,
    /// Some but not all peer shares received
    AwaitingShares,
    /// Group key derived
    Established,
    /// A verification check failed
    Aborted,
}

/// Inputs to a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Begin the run by initiating the AKE toward the right neighbor
    Start,
    /// An envelope arrived from the ring transport
    Received(Envelope),
}

/// Outputs of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Hand this envelope to the ring transport
    Send(Envelope),
    /// The run completed. Emitted exactly once.
    Established(GroupKey),
}

/// Per-run handshake material. Owned by exactly one session.
struct HandshakeState {
    key_left: Option<SharedSecret>,
    key_right: Option<SharedSecret>,
    transcript: Option<AkeTranscript>,
    initiated: bool,
    contributions: Vec<Option<ShareBroadcast>>,
    group_key: Option<GroupKey>,
}

impl HandshakeState {
    fn new(ring_size: usize) -> Self {
        Self {
            key_left: None,
            key_right: None,
            transcript: None,
            initiated: false,
            contributions: vec![None; ring_size],
            group_key: None,
        }
    }
}

/// A ring GAKE participant for one ring and one run.
pub struct GakeSession<E: Environment, P: CryptoProvider = MlKemProvider> {
    env: E,
    provider: P,
    roster: Arc<Roster>,
    own_index: usize,
    secret_key: SecretKey,
    state: SessionState,
    handshake: HandshakeState,
}

impl<E: Environment, P: CryptoProvider> GakeSession<E, P> {
    /// Create a session for the party at `own_index` in `roster`.
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: `own_index` is outside the ring
    pub fn new(
        env: E,
        provider: P,
        roster: Arc<Roster>,
        own_index: usize,
        secret_key: SecretKey,
    ) -> Result<Self, SessionError> {
        if own_index >= roster.len() {
            return Err(SessionError::InvalidRoster {
                reason: format!(
                    "index {own_index} outside ring {} of {}",
                    roster.name(),
                    roster.len()
                ),
            });
        }

        let handshake = HandshakeState::new(roster.len());
        Ok(Self {
            env,
            provider,
            roster,
            own_index,
            secret_key,
            state: SessionState::Init,
            handshake,
        })
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The group key, once established.
    pub fn group_key(&self) -> Option<&GroupKey> {
        self.handshake.group_key.as_ref()
    }

    /// Whether the run completed.
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// This party's ring index.
    pub fn own_index(&self) -> usize {
        self.own_index
    }

    /// The ring this session runs over.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Non-fatal errors mean the input was dropped and state is unchanged.
    /// `Verification` moves the session to [`SessionState::Aborted`]; every
    /// later call returns `Aborted`.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<SessionAction>, SessionError> {
        if self.state == SessionState::Aborted {
            return Err(SessionError::Aborted);
        }

        match event {
            SessionEvent::Start => self.handle_start(),
            SessionEvent::Received(envelope) => self.handle_envelope(&envelope),
        }
    }

    fn handle_start(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.handshake.initiated {
            return Err(SessionError::InvalidState { state: self.state, operation: "start" });
        }

        let right = self.roster.right_of(self.own_index);
        let peer = &self.roster.parties()[right].public_key;
        let (message, transcript) = self.provider.ake_initiate(peer, self.env.random_seed())?;
        let envelope = Payload::AkeInit(message)
            .to_envelope(self.index_u32(), Recipient::Party(right as u32))?;

        self.handshake.transcript = Some(transcript);
        self.handshake.initiated = true;
        debug!(ring = %self.roster.name(), index = self.own_index, right, "sent AKE_INIT");

        let mut actions = vec![SessionAction::Send(envelope)];
        self.advance(&mut actions)?;
        Ok(actions)
    }

    fn handle_envelope(&mut self, envelope: &Envelope) -> Result<Vec<SessionAction>, SessionError> {
        let sender = envelope.sender_index as usize;
        if sender >= self.roster.len() {
            warn!(
                ring = %self.roster.name(),
                index = self.own_index,
                sender,
                kind = %envelope.kind,
                "dropping message from unknown ring index"
            );
            return Err(ProtocolError::InvalidIndex(i64::from(envelope.sender_index)).into());
        }
        if sender == self.own_index || !envelope.recipient.includes(self.index_u32()) {
            return Ok(Vec::new());
        }
        if self.state == SessionState::Established {
            debug!(
                ring = %self.roster.name(),
                index = self.own_index,
                sender,
                kind = %envelope.kind,
                "ignoring message after establishment"
            );
            return Ok(Vec::new());
        }

        let payload = Payload::from_envelope(envelope).map_err(|e| {
            warn!(
                ring = %self.roster.name(),
                index = self.own_index,
                sender,
                kind = %envelope.kind,
                error = %e,
                "dropping undecodable payload"
            );
            SessionError::from(e)
        })?;

        match payload {
            Payload::AkeInit(init) => self.handle_ake_init(sender, &init),
            Payload::AkeRespond(response) => self.handle_ake_respond(sender, &response),
            Payload::ShareBroadcast(broadcast) => self.handle_share(sender, broadcast),
            Payload::WrappedKey(_) | Payload::AppMessage(_) => {
                Err(SessionError::UnexpectedKind { kind: envelope.kind, layer: "ring session" })
            },
        }
    }

    fn handle_ake_init(
        &mut self,
        sender: usize,
        init: &AkeInitMessage,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let left = self.roster.left_of(self.own_index);
        if sender != left {
            warn!(
                ring = %self.roster.name(),
                index = self.own_index,
                sender,
                "AKE_INIT from non-neighbor"
            );
            return Err(SessionError::UnexpectedSender {
                kind: MessageKind::AkeInit,
                sender: sender as u32,
            });
        }
        if self.handshake.key_left.is_some() {
            debug!(ring = %self.roster.name(), index = self.own_index, "duplicate AKE_INIT");
            return Ok(Vec::new());
        }

        let peer = &self.roster.parties()[left].public_key;
        let (response, key_left) = self
            .provider
            .ake_respond(init, &self.secret_key, peer, self.env.random_seed())
            .map_err(|e| {
                warn!(
                    ring = %self.roster.name(),
                    index = self.own_index,
                    error = %e,
                    "AKE_INIT rejected"
                );
                SessionError::from(e)
            })?;
        let envelope = Payload::AkeRespond(response)
            .to_envelope(self.index_u32(), Recipient::Party(left as u32))?;

        self.handshake.key_left = Some(key_left);
        debug!(ring = %self.roster.name(), index = self.own_index, left, "left key established");

        let mut actions = vec![SessionAction::Send(envelope)];
        self.advance(&mut actions)?;
        Ok(actions)
    }

    fn handle_ake_respond(
        &mut self,
        sender: usize,
        response: &AkeResponseMessage,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let right = self.roster.right_of(self.own_index);
        if sender != right {
            warn!(
                ring = %self.roster.name(),
                index = self.own_index,
                sender,
                "AKE_RESPOND from non-neighbor"
            );
            return Err(SessionError::UnexpectedSender {
                kind: MessageKind::AkeRespond,
                sender: sender as u32,
            });
        }
        if self.handshake.key_right.is_some() {
            debug!(ring = %self.roster.name(), index = self.own_index, "duplicate AKE_RESPOND");
            return Ok(Vec::new());
        }
        let Some(transcript) = self.handshake.transcript.as_ref() else {
            warn!(
                ring = %self.roster.name(),
                index = self.own_index,
                "AKE_RESPOND before AKE_INIT was sent"
            );
            return Err(SessionError::ordering("AKE_RESPOND before initiation"));
        };

        let key_right =
            self.provider.ake_finalize(response, transcript, &self.secret_key).map_err(|e| {
                warn!(
                    ring = %self.roster.name(),
                    index = self.own_index,
                    error = %e,
                    "AKE_RESPOND rejected"
                );
                SessionError::from(e)
            })?;

        self.handshake.transcript = None;
        self.handshake.key_right = Some(key_right);
        debug!(ring = %self.roster.name(), index = self.own_index, right, "right key established");

        let mut actions = Vec::new();
        self.advance(&mut actions)?;
        Ok(actions)
    }

    fn handle_share(
        &mut self,
        sender: usize,
        broadcast: ShareBroadcast,
    ) -> Result<Vec<SessionAction>, SessionError> {
        match &self.handshake.contributions[sender] {
            Some(existing) if *existing == broadcast => {
                debug!(
                    ring = %self.roster.name(),
                    index = self.own_index,
                    sender,
                    "duplicate share"
                );
                return Ok(Vec::new());
            },
            Some(_) => {
                warn!(
                    ring = %self.roster.name(),
                    index = self.own_index,
                    sender,
                    "conflicting share, keeping the first one"
                );
                return Ok(Vec::new());
            },
            None => {},
        }

        if self.handshake.key_left.is_none() || self.handshake.key_right.is_none() {
            debug!(
                ring = %self.roster.name(),
                index = self.own_index,
                sender,
                "share buffered until both neighbor keys are known"
            );
        }
        self.handshake.contributions[sender] = Some(broadcast);

        let mut actions = Vec::new();
        self.advance(&mut actions)?;
        Ok(actions)
    }

    /// Broadcast the own share if possible, then finalize if possible.
    fn advance(&mut self, actions: &mut Vec<SessionAction>) -> Result<(), SessionError> {
        if let Some(envelope) = self.broadcast_own_share()? {
            actions.push(SessionAction::Send(envelope));
        }
        if let Some(group_key) = self.try_finalize()? {
            actions.push(SessionAction::Established(group_key));
        }
        self.refresh_state();
        Ok(())
    }

    fn broadcast_own_share(&mut self) -> Result<Option<Envelope>, SessionError> {
        if self.handshake.contributions[self.own_index].is_some() {
            return Ok(None);
        }
        let share = match (&self.handshake.key_right, &self.handshake.key_left) {
            (Some(right), Some(left)) => Share::from_neighbor_keys(right, left),
            _ => return Ok(None),
        };

        let coin = Coin::from_bytes(self.env.random_array());
        let message = share.commitment_message(self.index_u32());
        let own_key = &self.roster.parties()[self.own_index].public_key;
        let commitment = self.provider.commit(own_key, &message, &coin)?;

        let broadcast = ShareBroadcast { share, commitment, coin };
        let envelope = Payload::ShareBroadcast(broadcast.clone())
            .to_envelope(self.index_u32(), Recipient::Broadcast)?;
        self.handshake.contributions[self.own_index] = Some(broadcast);
        debug!(ring = %self.roster.name(), index = self.own_index, "broadcast committed share");

        Ok(Some(envelope))
    }

    fn try_finalize(&mut self) -> Result<Option<GroupKey>, SessionError> {
        if self.handshake.group_key.is_some() {
            return Ok(None);
        }

        let shares = match self.verified_shares() {
            Ok(Some(shares)) => shares,
            Ok(None) => return Ok(None),
            Err(SessionError::Verification(failure)) => return Err(self.abort(failure)),
            Err(other) => return Err(other),
        };

        let Some(own_left) = self.handshake.key_left.as_ref() else {
            return Ok(None);
        };
        let left_keys = reconstruct_left_keys(self.own_index, own_left, &shares);
        let group_key = derive_group_key(&left_keys, &self.roster.ids());

        info!(
            ring = %self.roster.name(),
            index = self.own_index,
            session = %group_key.fingerprint(),
            "group key established"
        );
        self.handshake.group_key = Some(group_key.clone());
        self.state = SessionState::Established;
        Ok(Some(group_key))
    }

    /// `Ok(None)` while shares are missing. Otherwise runs the closure check
    /// and re-derives every commitment.
    fn verified_shares(&self) -> Result<Option<Vec<Share>>, SessionError> {
        let Some(contributions) =
            self.handshake.contributions.iter().map(Option::as_ref).collect::<Option<Vec<_>>>()
        else {
            return Ok(None);
        };

        let shares: Vec<Share> = contributions.iter().map(|c| c.share).collect();
        if !check_closure(&shares) {
            return Err(SessionError::Verification(VerificationFailure::Closure));
        }

        for (index, (contribution, party)) in
            contributions.iter().zip(self.roster.parties()).enumerate()
        {
            let message = contribution.share.commitment_message(index as u32);
            let recomputed = self.provider.commit(&party.public_key, &message, &contribution.coin)?;
            if recomputed != contribution.commitment {
                return Err(SessionError::Verification(VerificationFailure::Commitment { index }));
            }
        }

        Ok(Some(shares))
    }

    fn abort(&mut self, failure: VerificationFailure) -> SessionError {
        error!(
            ring = %self.roster.name(),
            index = self.own_index,
            %failure,
            "verification failed, aborting session"
        );
        self.state = SessionState::Aborted;
        self.handshake.key_left = None;
        self.handshake.key_right = None;
        self.handshake.transcript = None;
        SessionError::Verification(failure)
    }

    fn refresh_state(&mut self) {
        let hs = &self.handshake;
        self.state = match self.state {
            SessionState::Established | SessionState::Aborted => return,
            _ if hs.group_key.is_some() => SessionState::Established,
            _ if hs.contributions[self.own_index].is_some() => {
                let peers = hs
                    .contributions
                    .iter()
                    .enumerate()
                    .filter(|(i, c)| *i != self.own_index && c.is_some())
                    .count();
                if peers == 0 { SessionState::KeysComplete } else { SessionState::AwaitingShares }
            },
            _ if hs.key_left.is_some() || hs.key_right.is_some() => SessionState::KeysPartial,
            _ if hs.initiated => SessionState::AkeSent,
            _ => SessionState::Init,
        };
    }

    fn index_u32(&self) -> u32 {
        self.own_index as u32
    }
}
