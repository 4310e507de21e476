//! Voting engine
//!
//! Owns the session state machine (NotVoting <-> Voting), per-round vote
//! counting, tally computation and membership. All state lives in the keyed
//! store so any node can serve any request. Events are published only after
//! the store mutation they describe has succeeded.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::publisher::EventPublisher;
use super::tally::tally;
use crate::keys::KeyBuilder;
use crate::models::{
    MemberRole, PendingVote, Session, SessionEvent, SessionId, SessionState, User, UserId,
    NO_ESTIMATE,
};
use crate::store::KeyedStore;
use crate::validation::{validate_estimate, DisplayNameValidator};
use crate::{Error, Result};

/// Voting service
#[derive(Clone)]
pub struct VotingService {
    store: Arc<dyn KeyedStore>,
    publisher: Arc<dyn EventPublisher>,
    keys: KeyBuilder,
}

impl std::fmt::Debug for VotingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VotingService")
            .field("keys", &self.keys)
            .finish()
    }
}

impl VotingService {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        publisher: Arc<dyn EventPublisher>,
        keys: KeyBuilder,
    ) -> Self {
        Self {
            store,
            publisher,
            keys,
        }
    }

    #[must_use]
    pub const fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    // ==================== Sessions ====================

    /// Create a session in the NotVoting state with a zero vote count
    pub async fn create_session(&self) -> Result<Session> {
        let session_id = SessionId::new();

        self.store
            .set(
                &self.keys.session_state(&session_id),
                SessionState::NotVoting.as_store_value(),
            )
            .await?;
        self.store
            .set(&self.keys.vote_count(&session_id), "0")
            .await?;
        self.store.set(&self.keys.tally(&session_id), "").await?;

        info!(session_id = %session_id, "Session created");
        Ok(Session { id: session_id })
    }

    pub async fn session_state(&self, session_id: &SessionId) -> Result<SessionState> {
        let value = self.store.get(&self.keys.session_state(session_id)).await?;
        Ok(SessionState::from_store_value(value.as_deref()))
    }

    /// Number of voters who have cast an estimate this round
    pub async fn vote_count(&self, session_id: &SessionId) -> Result<i64> {
        let value = self.store.get(&self.keys.vote_count(session_id)).await?;
        match value.as_deref() {
            None | Some("") => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| Error::Store(format!("vote count for session [{session_id}] is not a number"))),
        }
    }

    /// Snapshot sent to a connection that starts watching a session.
    ///
    /// Estimates are blanked while a round is in progress.
    pub async fn session_snapshot(&self, session_id: &SessionId) -> Result<SessionEvent> {
        let session_state = self.session_state(session_id).await?;
        let mut users = self
            .load_members(&self.keys.session_voters(session_id))
            .await?;
        let mut observers = self
            .load_members(&self.keys.session_observers(session_id))
            .await?;
        let tally = self
            .store
            .get(&self.keys.tally(session_id))
            .await?
            .unwrap_or_default();

        if session_state.is_voting() {
            users = users.iter().map(User::with_hidden_estimate).collect();
            observers = observers.iter().map(User::with_hidden_estimate).collect();
        }

        Ok(SessionEvent::Watching {
            session_state,
            users,
            observers,
            tally,
        })
    }

    // ==================== Users ====================

    /// Create a user for a session.
    ///
    /// The name is trimmed and must be unique (case-insensitively) among the
    /// session's current voters. The user joins the session later, when a
    /// connection starts watching on its behalf.
    pub async fn create_user(
        &self,
        session_id: &SessionId,
        name: &str,
        is_admin: bool,
        is_observer: bool,
    ) -> Result<User> {
        let name = DisplayNameValidator::new().validate(name)?;

        let voters = self
            .load_members(&self.keys.session_voters(session_id))
            .await?;
        let lowered = name.to_lowercase();
        if voters.iter().any(|v| v.name.to_lowercase() == lowered) {
            return Err(Error::validation(
                "user.name",
                "This user name already taken for this session",
            ));
        }

        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            estimate: NO_ESTIMATE.to_string(),
            voted: false,
            joined: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            is_observer,
            is_admin,
        };

        self.store
            .hash_set(&self.keys.user(&user.id), user.to_store_fields())
            .await?;

        info!(
            session_id = %session_id,
            user_id = %user.id,
            name = %user.name,
            is_observer,
            "User created"
        );
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &UserId) -> Result<User> {
        self.find_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user [{user_id}]")))
    }

    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>> {
        let fields = self.store.hash_get_all(&self.keys.user(user_id)).await?;
        Ok(User::from_store_fields(&fields))
    }

    /// Load the users of a membership set, ordered by join time.
    ///
    /// Members whose record has expired are skipped.
    async fn load_members(&self, set_key: &str) -> Result<Vec<User>> {
        let ids = self.store.set_members(set_key).await?;

        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            let user_id = UserId::from_string(id);
            match self.find_user(&user_id).await? {
                Some(user) => users.push(user),
                None => debug!(user_id = %user_id, set = set_key, "Skipping member without a user record"),
            }
        }

        users.sort_by(|a, b| a.joined.cmp(&b.joined).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    // ==================== Membership ====================

    /// Add a user to the session set for its role and announce it.
    ///
    /// The announced estimate is hidden while a round is in progress.
    pub async fn join_session(&self, session_id: &SessionId, user_id: &UserId) -> Result<User> {
        let user = self.get_user(user_id).await?;

        let set_key = match user.role() {
            MemberRole::Voter => self.keys.session_voters(session_id),
            MemberRole::Observer => self.keys.session_observers(session_id),
        };
        self.store.set_add(&set_key, user_id.as_str()).await?;

        let announced = if self.session_state(session_id).await?.is_voting() {
            user.with_hidden_estimate()
        } else {
            user.clone()
        };
        let event = match user.role() {
            MemberRole::Voter => SessionEvent::UserAdded(announced),
            MemberRole::Observer => SessionEvent::ObserverAdded(announced),
        };
        self.publisher.publish(session_id, &event).await?;

        info!(session_id = %session_id, user_id = %user_id, role = ?user.role(), "User joined session");
        Ok(user)
    }

    /// Remove a voter from the session.
    ///
    /// Only the caller whose removal actually took the voter out of the set
    /// adjusts the vote count, so duplicate departures from several nodes are
    /// harmless. A withdrawn vote also clears the voter's estimate, so a voter
    /// who rejoins mid-round is counted again when voting again. A departure
    /// that leaves every remaining voter with a vote finishes the round.
    pub async fn remove_voter(&self, session_id: &SessionId, user_id: &UserId) -> Result<()> {
        let removed = self
            .store
            .set_remove(&self.keys.session_voters(session_id), user_id.as_str())
            .await?;
        if !removed {
            debug!(session_id = %session_id, user_id = %user_id, "Voter already removed");
            return Ok(());
        }
        info!(session_id = %session_id, user_id = %user_id, "Voter removed from session");

        if !self.session_state(session_id).await?.is_voting() {
            return Ok(());
        }

        let user_key = self.keys.user(user_id);
        let estimate = self.store.hash_get(&user_key, "estimate").await?;
        if estimate.is_some_and(|e| e != NO_ESTIMATE) {
            self.store
                .hash_set(
                    &user_key,
                    vec![("estimate".to_string(), NO_ESTIMATE.to_string())],
                )
                .await?;
            self.store
                .incr(&self.keys.vote_count(session_id), -1)
                .await?;
        }

        self.finish_if_complete(session_id).await?;
        Ok(())
    }

    pub async fn remove_observer(&self, session_id: &SessionId, user_id: &UserId) -> Result<()> {
        let removed = self
            .store
            .set_remove(&self.keys.session_observers(session_id), user_id.as_str())
            .await?;
        if removed {
            info!(session_id = %session_id, user_id = %user_id, "Observer removed from session");
        }
        Ok(())
    }

    /// React to an event seen on a session topic. Departures are routed to
    /// the removal path; everything else is ignored.
    pub async fn handle_presence_event(
        &self,
        session_id: &SessionId,
        event: &SessionEvent,
    ) -> Result<()> {
        match event {
            SessionEvent::UserLeft { user_id, .. } => self.remove_voter(session_id, user_id).await,
            SessionEvent::ObserverLeft { user_id, .. } => {
                self.remove_observer(session_id, user_id).await
            }
            _ => Ok(()),
        }
    }

    // ==================== Voting ====================

    /// Start (or restart) a round: reset the count, the tally and every
    /// voter's estimate, then switch to Voting.
    pub async fn start_vote(&self, session_id: &SessionId) -> Result<()> {
        self.store
            .set(&self.keys.vote_count(session_id), "0")
            .await?;
        self.store.set(&self.keys.tally(session_id), "").await?;

        let voter_ids = self
            .store
            .set_members(&self.keys.session_voters(session_id))
            .await?;
        for id in &voter_ids {
            self.store
                .hash_set(
                    &self.keys.user(&UserId::from(id.as_str())),
                    vec![("estimate".to_string(), NO_ESTIMATE.to_string())],
                )
                .await?;
        }

        self.store
            .set(
                &self.keys.session_state(session_id),
                SessionState::Voting.as_store_value(),
            )
            .await?;

        self.publisher
            .publish(session_id, &SessionEvent::VoteStarted)
            .await?;

        info!(session_id = %session_id, voters = voter_ids.len(), "Vote started");
        Ok(())
    }

    /// Record a voter's estimate for the current round.
    ///
    /// Changing an estimate does not count twice. The vote that completes
    /// the round also finishes it.
    pub async fn cast_vote(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        estimate: &str,
    ) -> Result<PendingVote> {
        if !self.session_state(session_id).await?.is_voting() {
            return Err(Error::InactiveSession(session_id.clone()));
        }

        let is_voter = self
            .store
            .set_contains(&self.keys.session_voters(session_id), user_id.as_str())
            .await?;
        if !is_voter {
            return Err(Error::NotAVoter {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
            });
        }

        validate_estimate(estimate)?;

        let user_key = self.keys.user(user_id);
        let previous = self
            .store
            .hash_get(&user_key, "estimate")
            .await?
            .unwrap_or_default();

        self.store
            .hash_set(
                &user_key,
                vec![("estimate".to_string(), estimate.to_string())],
            )
            .await?;

        if previous == NO_ESTIMATE {
            self.store
                .incr(&self.keys.vote_count(session_id), 1)
                .await?;
        }

        self.publisher
            .publish(
                session_id,
                &SessionEvent::UserVoted {
                    user_id: user_id.clone(),
                },
            )
            .await?;

        debug!(session_id = %session_id, user_id = %user_id, revote = previous != NO_ESTIMATE, "Vote cast");

        self.finish_if_complete(session_id).await?;

        Ok(PendingVote {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
        })
    }

    /// Whether every current voter has cast an estimate this round
    pub async fn is_vote_finished(&self, session_id: &SessionId) -> Result<bool> {
        let count = self.vote_count(session_id).await?;
        let voters = self
            .store
            .set_len(&self.keys.session_voters(session_id))
            .await?;

        Ok(count >= i64::try_from(voters).unwrap_or(i64::MAX))
    }

    /// End the current round and reveal the estimates
    pub async fn finish_vote(&self, session_id: &SessionId) -> Result<()> {
        self.store
            .set(
                &self.keys.session_state(session_id),
                SessionState::NotVoting.as_store_value(),
            )
            .await?;
        self.complete_round(session_id).await
    }

    /// Finish the round if it is complete.
    ///
    /// The state flip is an atomic swap, so when several callers see the same
    /// completed round only the one that flipped Voting to NotVoting publishes
    /// the result.
    async fn finish_if_complete(&self, session_id: &SessionId) -> Result<bool> {
        if !self.is_vote_finished(session_id).await? {
            return Ok(false);
        }

        let previous = self
            .store
            .swap(
                &self.keys.session_state(session_id),
                SessionState::NotVoting.as_store_value(),
            )
            .await?;
        if !SessionState::from_store_value(previous.as_deref()).is_voting() {
            debug!(session_id = %session_id, "Round already finished elsewhere");
            return Ok(false);
        }

        self.complete_round(session_id).await?;
        Ok(true)
    }

    async fn complete_round(&self, session_id: &SessionId) -> Result<()> {
        let users = self
            .load_members(&self.keys.session_voters(session_id))
            .await?;
        let estimates: Vec<&str> = users.iter().map(|u| u.estimate.as_str()).collect();

        let tally = tally(&estimates).inspect_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to compute tally");
        })?;

        self.store
            .set(&self.keys.tally(session_id), &tally)
            .await?;

        info!(session_id = %session_id, tally = %tally, voters = users.len(), "Vote finished");

        self.publisher
            .publish(session_id, &SessionEvent::VoteFinished { users, tally })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::service::publisher::MockEventPublisher;
    use crate::store::{MemoryStore, MockKeyedStore};
    use crate::test_helpers::RecordingPublisher;

    fn service() -> (VotingService, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let service = VotingService::new(
            Arc::new(MemoryStore::new(Duration::from_secs(60))),
            publisher.clone(),
            KeyBuilder::default(),
        );
        (service, publisher)
    }

    async fn join(service: &VotingService, session: &SessionId, name: &str) -> User {
        let user = service.create_user(session, name, false, false).await.unwrap();
        service.join_session(session, &user.id).await.unwrap();
        user
    }

    #[tokio::test]
    async fn test_new_session_is_not_voting() {
        let (service, _) = service();
        let session = service.create_session().await.unwrap();

        assert_eq!(
            service.session_state(&session.id).await.unwrap(),
            SessionState::NotVoting
        );
        assert_eq!(service.vote_count(&session.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cast_before_start_is_rejected() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        publisher.clear();

        let err = service.cast_vote(&session, &alice.id, "3").await.unwrap_err();
        assert!(matches!(err, Error::InactiveSession(ref s) if *s == session));
        assert_eq!(err.to_string(), format!("not voting yet for session [{session}]"));
        assert_eq!(service.vote_count(&session).await.unwrap(), 0);
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_revote_counts_once() {
        let (service, _) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        join(&service, &session, "Bob").await;
        service.start_vote(&session).await.unwrap();

        service.cast_vote(&session, &alice.id, "3").await.unwrap();
        service.cast_vote(&session, &alice.id, "5").await.unwrap();

        assert_eq!(service.vote_count(&session).await.unwrap(), 1);
        assert_eq!(service.get_user(&alice.id).await.unwrap().estimate, "5");
        assert!(service.session_state(&session).await.unwrap().is_voting());
    }

    #[tokio::test]
    async fn test_round_finishes_when_everyone_voted() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        let bob = join(&service, &session, "Bob").await;
        service.start_vote(&session).await.unwrap();

        service.cast_vote(&session, &alice.id, "5").await.unwrap();
        service.cast_vote(&session, &bob.id, "5").await.unwrap();

        assert_eq!(
            service.session_state(&session).await.unwrap(),
            SessionState::NotVoting
        );

        let finished = publisher.finished();
        assert_eq!(finished.len(), 1);
        let (users, tally) = &finished[0];
        assert_eq!(tally, "5");
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, alice.id, "voters ordered by join time");
        assert!(users.iter().all(|u| u.estimate == "5" && u.voted));
    }

    #[tokio::test]
    async fn test_concurrent_last_votes_finish_once() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        let bob = join(&service, &session, "Bob").await;
        service.start_vote(&session).await.unwrap();

        let (a, b) = tokio::join!(
            service.cast_vote(&session, &alice.id, "1"),
            service.cast_vote(&session, &bob.id, "2"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(publisher.finished().len(), 1);
    }

    #[tokio::test]
    async fn test_start_vote_resets_round() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        service.start_vote(&session).await.unwrap();
        service.cast_vote(&session, &alice.id, "8").await.unwrap();
        assert_eq!(
            service.store.get(&service.keys.tally(&session)).await.unwrap().as_deref(),
            Some("8")
        );

        // restart while already voting is allowed too
        service.start_vote(&session).await.unwrap();
        service.start_vote(&session).await.unwrap();

        assert!(service.session_state(&session).await.unwrap().is_voting());
        assert_eq!(service.vote_count(&session).await.unwrap(), 0);
        assert_eq!(service.get_user(&alice.id).await.unwrap().estimate, NO_ESTIMATE);
        assert_eq!(
            service.store.get(&service.keys.tally(&session)).await.unwrap().as_deref(),
            Some("")
        );
        let started = publisher
            .events()
            .into_iter()
            .filter(|(_, e)| *e == SessionEvent::VoteStarted)
            .count();
        assert_eq!(started, 3);
    }

    #[tokio::test]
    async fn test_unvoted_departure_finishes_round() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        let bob = join(&service, &session, "Bob").await;
        service.start_vote(&session).await.unwrap();
        service.cast_vote(&session, &alice.id, "3").await.unwrap();
        assert!(publisher.finished().is_empty());

        let left = SessionEvent::departure(session.clone(), bob.id.clone(), MemberRole::Voter);
        service.handle_presence_event(&session, &left).await.unwrap();

        assert!(!service.session_state(&session).await.unwrap().is_voting());
        let finished = publisher.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].0.len(), 1);
        assert_eq!(finished[0].1, "3");
    }

    #[tokio::test]
    async fn test_voted_departure_keeps_count_consistent() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        join(&service, &session, "Bob").await;
        join(&service, &session, "Carol").await;
        service.start_vote(&session).await.unwrap();
        service.cast_vote(&session, &alice.id, "3").await.unwrap();

        service.remove_voter(&session, &alice.id).await.unwrap();
        // duplicate departure seen by another node
        service.remove_voter(&session, &alice.id).await.unwrap();

        assert_eq!(service.vote_count(&session).await.unwrap(), 0);
        assert!(service.session_state(&session).await.unwrap().is_voting());
        assert!(publisher.finished().is_empty());
    }

    #[tokio::test]
    async fn test_rejoined_voter_counts_again() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        let bob = join(&service, &session, "Bob").await;
        let carol = join(&service, &session, "Carol").await;
        service.start_vote(&session).await.unwrap();
        service.cast_vote(&session, &alice.id, "3").await.unwrap();

        // page reload: departure, then WATCH again
        service.remove_voter(&session, &alice.id).await.unwrap();
        let rejoined = service.join_session(&session, &alice.id).await.unwrap();
        assert_eq!(rejoined.estimate, NO_ESTIMATE);
        assert_eq!(service.vote_count(&session).await.unwrap(), 0);

        service.cast_vote(&session, &bob.id, "3").await.unwrap();
        service.cast_vote(&session, &carol.id, "3").await.unwrap();
        assert!(publisher.finished().is_empty());
        service.cast_vote(&session, &alice.id, "5").await.unwrap();

        assert_eq!(
            service.session_state(&session).await.unwrap(),
            SessionState::NotVoting
        );
        let finished = publisher.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].0.len(), 3);
        assert_eq!(finished[0].1, "3");
    }

    #[tokio::test]
    async fn test_observer_departure_and_other_events_ignored() {
        let (service, _) = service();
        let session = service.create_session().await.unwrap().id;
        let watcher = service
            .create_user(&session, "Watcher", false, true)
            .await
            .unwrap();
        service.join_session(&session, &watcher.id).await.unwrap();

        service
            .handle_presence_event(&session, &SessionEvent::VoteStarted)
            .await
            .unwrap();
        let left = SessionEvent::departure(session.clone(), watcher.id.clone(), MemberRole::Observer);
        service.handle_presence_event(&session, &left).await.unwrap();

        let SessionEvent::Watching { observers, .. } =
            service.session_snapshot(&session).await.unwrap()
        else {
            panic!("expected a WATCHING snapshot");
        };
        assert!(observers.is_empty());
    }

    #[tokio::test]
    async fn test_non_voter_cannot_cast() {
        let (service, _) = service();
        let session = service.create_session().await.unwrap().id;
        join(&service, &session, "Alice").await;
        let watcher = service
            .create_user(&session, "Watcher", false, true)
            .await
            .unwrap();
        service.join_session(&session, &watcher.id).await.unwrap();
        service.start_vote(&session).await.unwrap();

        let err = service.cast_vote(&session, &watcher.id, "3").await.unwrap_err();
        assert!(matches!(err, Error::NotAVoter { .. }));
        assert_eq!(service.vote_count(&session).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_estimate_rejected() {
        let (service, _) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        service.start_vote(&session).await.unwrap();

        let err = service.cast_vote(&session, &alice.id, "lots").await.unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "estimate"));
        assert_eq!(service.vote_count(&session).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let (service, _) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "  Alice ").await;
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.estimate, NO_ESTIMATE);

        let err = service.create_user(&session, "   ", false, false).await.unwrap_err();
        assert!(
            matches!(err, Error::Validation { ref field, ref message } if field == "user.name" && message == "This field cannot be empty")
        );

        let err = service.create_user(&session, "ALICE", false, false).await.unwrap_err();
        assert!(
            matches!(err, Error::Validation { ref message, .. } if message == "This user name already taken for this session")
        );

        // the same name is fine in another session
        let other = service.create_session().await.unwrap().id;
        assert!(service.create_user(&other, "Alice", false, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let (service, _) = service();
        let err = service.get_user(&UserId::from("nobody")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_estimates_hidden_while_voting() {
        let (service, publisher) = service();
        let session = service.create_session().await.unwrap().id;
        let alice = join(&service, &session, "Alice").await;
        join(&service, &session, "Bob").await;
        service.start_vote(&session).await.unwrap();
        service.cast_vote(&session, &alice.id, "13").await.unwrap();

        let SessionEvent::Watching {
            session_state,
            users,
            ..
        } = service.session_snapshot(&session).await.unwrap()
        else {
            panic!("expected a WATCHING snapshot");
        };
        assert_eq!(session_state, SessionState::Voting);
        assert!(users.iter().all(|u| u.estimate == NO_ESTIMATE));
        assert!(users.iter().any(|u| u.voted));

        // rejoining mid-round announces without the estimate
        service.join_session(&session, &alice.id).await.unwrap();
        let announced = publisher
            .events()
            .into_iter()
            .rev()
            .find_map(|(_, e)| match e {
                SessionEvent::UserAdded(user) => Some(user),
                _ => None,
            })
            .unwrap();
        assert_eq!(announced.estimate, NO_ESTIMATE);

        let voted = publisher
            .events()
            .into_iter()
            .any(|(_, e)| e == SessionEvent::UserVoted { user_id: alice.id.clone() });
        assert!(voted);
    }

    #[tokio::test]
    async fn test_store_failure_publishes_nothing() {
        let mut store = MockKeyedStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some("1".to_string())));
        store.expect_set_contains().returning(|_, _| Ok(true));
        store
            .expect_hash_get()
            .returning(|_, _| Ok(Some(String::new())));
        store
            .expect_hash_set()
            .returning(|_, _| Err(Error::Store("connection reset".to_string())));

        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();

        let service = VotingService::new(
            Arc::new(store),
            Arc::new(publisher),
            KeyBuilder::default(),
        );

        let err = service
            .cast_vote(&SessionId::from("s"), &UserId::from("u"), "3")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
