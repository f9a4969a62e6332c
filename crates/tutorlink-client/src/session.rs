//! Connection session state machine.
//!
//! One session per logged-in user. The session owns the live connection,
//! tracks which channels it holds, and drives reconnection with jittered
//! exponential backoff. It routes events; it never validates business rules.
//!
//! States: `Idle -> Connecting -> Open <-> Reconnecting -> Closed`. A
//! handshake rejected as unauthenticated is terminal; transport failures are
//! retried without bound.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use tutorlink_shared::constants::{RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS};
use tutorlink_shared::protocol::{ClientAction, ServerEvent};
use tutorlink_shared::types::{ChannelId, UserId};
use tutorlink_shared::ChatError;

use crate::transport::{Connection, Connector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Jittered exponential backoff for reconnect attempts.
pub(crate) struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    fn new() -> Self {
        Self {
            base: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            cap: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt.min(16)))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        // Additive jitter up to a quarter of the base delay keeps a fleet of
        // clients from reconnecting in lockstep.
        let jitter = rand::thread_rng().gen_range(0..=self.base.as_millis() as u64 / 4);
        exp + Duration::from_millis(jitter)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub struct ConnectionSession<C: Connector> {
    connector: C,
    user: UserId,
    state: SessionState,
    subscriptions: HashSet<ChannelId>,
    connection: Option<Connection>,
    backoff: Backoff,
}

impl<C: Connector> ConnectionSession<C> {
    pub fn new(connector: C, user: UserId) -> Self {
        let mut subscriptions = HashSet::new();
        subscriptions.insert(ChannelId::User(user));
        Self {
            connector,
            user,
            state: SessionState::Idle,
            subscriptions,
            connection: None,
            backoff: Backoff::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a send may go out right now. Anywhere else, callers fail fast
    /// and mark the provisional message failed instead of queueing.
    pub fn can_send(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Establish the initial connection after login.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        if self.state == SessionState::Closed {
            return Err(ChatError::Transport("session is closed".into()));
        }
        self.state = SessionState::Connecting;
        match self.attempt_open().await {
            Ok(()) => Ok(()),
            Err(e @ ChatError::Authentication(_)) => {
                warn!(user = %self.user, error = %e, "handshake rejected, closing session");
                self.state = SessionState::Closed;
                Err(e)
            }
            Err(e) => {
                self.state = SessionState::Reconnecting;
                Err(e)
            }
        }
    }

    async fn attempt_open(&mut self) -> Result<(), ChatError> {
        let connection = self.connector.connect(self.user).await?;
        self.connection = Some(connection);
        self.state = SessionState::Open;
        self.backoff.reset();

        // Re-establish every channel the session holds.
        for channel in self.subscriptions.clone() {
            self.send_action(ClientAction::Subscribe { channel });
        }

        info!(user = %self.user, channels = self.subscriptions.len(), "session open");
        Ok(())
    }

    /// Track a channel and subscribe immediately when the connection is up.
    /// Tracked channels survive reconnects.
    pub fn subscribe(&mut self, channel: ChannelId) {
        if self.subscriptions.insert(channel) && self.state == SessionState::Open {
            self.send_action(ClientAction::Subscribe { channel });
        }
    }

    pub fn unsubscribe(&mut self, channel: ChannelId) {
        if self.subscriptions.remove(&channel) && self.state == SessionState::Open {
            self.send_action(ClientAction::Unsubscribe { channel });
        }
    }

    fn send_action(&mut self, action: ClientAction) {
        let Some(connection) = &self.connection else {
            return;
        };
        if connection.actions.send(action).is_err() {
            debug!("action channel gone, treating as disconnect");
            self.handle_disconnect();
        }
    }

    /// Wait for the next inbound event. `None` means the transport dropped
    /// and the session has moved to `Reconnecting` (or was closed).
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        let connection = self.connection.as_mut()?;
        match connection.events.recv().await {
            Some(event) => Some(event),
            None => {
                self.handle_disconnect();
                None
            }
        }
    }

    fn handle_disconnect(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.connection = None;
        self.state = SessionState::Reconnecting;
        info!(user = %self.user, "transport dropped, reconnecting");
    }

    /// Retry until the connection is back or the handshake is rejected.
    /// Attempts are unbounded; only authentication failure or logout stops
    /// the loop.
    pub async fn reconnect(&mut self) -> Result<(), ChatError> {
        loop {
            if self.state == SessionState::Closed {
                return Err(ChatError::Transport("session is closed".into()));
            }

            let delay = self.backoff.next_delay();
            debug!(user = %self.user, delay_ms = delay.as_millis() as u64, "backing off");
            sleep(delay).await;

            match self.attempt_open().await {
                Ok(()) => return Ok(()),
                Err(e @ ChatError::Authentication(_)) => {
                    warn!(user = %self.user, error = %e, "handshake rejected, closing session");
                    self.state = SessionState::Closed;
                    return Err(e);
                }
                Err(e) => {
                    debug!(user = %self.user, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    /// Tear the session down. No auto-reconnect afterwards.
    pub fn logout(&mut self) {
        for channel in self.subscriptions.clone() {
            self.send_action(ClientAction::Unsubscribe { channel });
        }
        self.subscriptions.clear();
        self.connection = None;
        self.state = SessionState::Closed;
        info!(user = %self.user, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::sync::Mutex;

    use super::*;

    /// Server-side half of an in-memory link.
    struct RemoteEnd {
        actions: mpsc::UnboundedReceiver<ClientAction>,
        events: mpsc::UnboundedSender<ServerEvent>,
    }

    fn link() -> (Connection, RemoteEnd) {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Connection {
                actions: action_tx,
                events: event_rx,
            },
            RemoteEnd {
                actions: action_rx,
                events: event_tx,
            },
        )
    }

    /// Connector that plays back a script of connect outcomes.
    struct ScriptedConnector {
        outcomes: Mutex<VecDeque<Result<Connection, ChatError>>>,
    }

    impl ScriptedConnector {
        fn new(outcomes: Vec<Result<Connection, ChatError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _user: UserId) -> Result<Connection, ChatError> {
            self.outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(ChatError::Transport("script exhausted".into())))
        }
    }

    fn drain_actions(remote: &mut RemoteEnd) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        while let Ok(action) = remote.actions.try_recv() {
            actions.push(action);
        }
        actions
    }

    #[tokio::test]
    async fn connect_subscribes_the_personal_channel() {
        let user = UserId::new();
        let (connection, mut remote) = link();
        let mut session =
            ConnectionSession::new(ScriptedConnector::new(vec![Ok(connection)]), user);

        assert_eq!(session.state(), SessionState::Idle);
        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.can_send());

        assert_eq!(
            drain_actions(&mut remote),
            vec![ClientAction::Subscribe {
                channel: ChannelId::User(user)
            }]
        );
    }

    #[tokio::test]
    async fn authentication_failure_is_terminal() {
        let user = UserId::new();
        let mut session = ConnectionSession::new(
            ScriptedConnector::new(vec![Err(ChatError::Authentication("expired".into()))]),
            user,
        );

        let result = session.connect().await;
        assert!(matches!(result, Err(ChatError::Authentication(_))));
        assert_eq!(session.state(), SessionState::Closed);

        // A closed session never dials again.
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn transport_failure_moves_to_reconnecting_and_fails_sends_fast() {
        let user = UserId::new();
        let mut session = ConnectionSession::new(
            ScriptedConnector::new(vec![Err(ChatError::Transport("refused".into()))]),
            user,
        );

        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert!(!session.can_send());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_restores_every_tracked_subscription() {
        let user = UserId::new();
        let group_channel = ChannelId::from_topic(&format!("group:{}", uuid::Uuid::new_v4()))
            .unwrap();

        let (first, mut remote1) = link();
        let (second, mut remote2) = link();
        let mut session = ConnectionSession::new(
            ScriptedConnector::new(vec![
                Ok(first),
                Err(ChatError::Transport("still down".into())),
                Ok(second),
            ]),
            user,
        );

        session.connect().await.unwrap();
        session.subscribe(group_channel);
        assert_eq!(drain_actions(&mut remote1).len(), 2);

        // Server side goes away.
        drop(remote1);
        assert!(session.next_event().await.is_none());
        assert_eq!(session.state(), SessionState::Reconnecting);

        // First retry fails, second succeeds; paused time auto-advances
        // through the backoff sleeps.
        session.reconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Open);

        let mut channels: Vec<ChannelId> = drain_actions(&mut remote2)
            .into_iter()
            .map(|action| match action {
                ClientAction::Subscribe { channel } => channel,
                other => panic!("unexpected action: {other:?}"),
            })
            .collect();
        channels.sort_by_key(|c| c.to_topic());
        let mut expected = vec![ChannelId::User(user), group_channel];
        expected.sort_by_key(|c| c.to_topic());
        assert_eq!(channels, expected);
    }

    #[tokio::test]
    async fn logout_unsubscribes_and_closes() {
        let user = UserId::new();
        let (connection, mut remote) = link();
        let mut session =
            ConnectionSession::new(ScriptedConnector::new(vec![Ok(connection)]), user);

        session.connect().await.unwrap();
        drain_actions(&mut remote);

        session.logout();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.can_send());
        assert_eq!(
            drain_actions(&mut remote),
            vec![ClientAction::Unsubscribe {
                channel: ChannelId::User(user)
            }]
        );

        let result = session.reconnect().await;
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn backoff_grows_to_the_cap() {
        let mut backoff = Backoff::new();
        let base = Duration::from_millis(RECONNECT_BASE_DELAY_MS);
        let cap = Duration::from_millis(RECONNECT_MAX_DELAY_MS);
        let jitter_bound = base / 4 + Duration::from_millis(1);

        let first = backoff.next_delay();
        assert!(first >= base && first < base + jitter_bound);

        let mut last = first;
        for _ in 0..10 {
            let next = backoff.next_delay();
            assert!(next <= cap + jitter_bound);
            if last < cap {
                assert!(next + jitter_bound >= last);
            }
            last = next;
        }
        assert!(last >= cap);
    }
}
