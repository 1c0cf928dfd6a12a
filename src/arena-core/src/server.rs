//! Arena server: the orchestrator tying registry, queue and sessions
//! together behind the wire-event contract.
//!
//! The matchmaking queue sits behind one async mutex so a pairing pass is
//! globally serialized and pair removal stays atomic. Sessions serialize
//! their own mutation; the server only routes events to them.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use rand::seq::SliceRandom;
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::events::{ClientEvent, ContributionBody, ServerEvent};
use crate::matchmaking::MatchQueue;
use crate::participant::{UserHandle, UserId};
use crate::registry::ConnectionRegistry;
use crate::scoring::{RatingService, Scorer};
use crate::session::{DebateSession, SessionDeps, SessionMap, SessionRules};

pub struct ArenaServer {
    cfg: ArenaConfig,
    registry: Arc<ConnectionRegistry>,
    queue: Mutex<MatchQueue>,
    sessions: SessionMap,
    deps: Arc<SessionDeps>,
    /// Public handles of users seen by `connect`, looked up at queue time.
    profiles: StdMutex<HashMap<UserId, UserHandle>>,
}

impl ArenaServer {
    pub fn new(
        cfg: ArenaConfig,
        scorer: Arc<dyn Scorer>,
        rating: Arc<dyn RatingService>,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let sessions = SessionMap::new();
        let deps = Arc::new(SessionDeps {
            registry: Arc::clone(&registry),
            scorer,
            rating,
            sessions: sessions.clone(),
        });
        Arc::new(Self {
            queue: Mutex::new(MatchQueue::new(cfg.matchmaking.clone())),
            cfg,
            registry,
            sessions,
            deps,
            profiles: StdMutex::new(HashMap::new()),
        })
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    /// Attach a user's connection and get the receiving end of their event
    /// stream. Reconnecting replaces the previous stream.
    pub fn connect(&self, user: UserHandle) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register(user.id.clone(), tx);
        self.profiles
            .lock()
            .unwrap()
            .insert(user.id.clone(), user);
        rx
    }

    /// A user's connection went away: out of the queue, and any live
    /// session they were in forfeits to the opponent.
    pub async fn disconnect(&self, user: &UserId) {
        self.registry.unregister(user);
        self.queue.lock().await.leave(user);
        if let Some(session) = self.sessions.find_for_user(user) {
            // ignore the race where the session just closed
            let _ = session.leave(user).await;
        }
        info!(%user, "disconnected");
    }

    /// Entry point for everything a client sends. Recoverable validation
    /// failures are echoed back as `rejected` events; a stale round is
    /// dropped silently since it is expected around round boundaries.
    pub async fn handle_event(&self, event: ClientEvent) {
        let origin = event.origin().clone();
        match self.dispatch(event).await {
            Ok(()) => {}
            Err(e @ ArenaError::StaleRound { .. }) => {
                debug!(user = %origin, "{e}");
            }
            Err(e) => {
                debug!(user = %origin, code = e.code(), "request rejected: {e}");
                self.registry.send(
                    &origin,
                    ServerEvent::Rejected {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    /// Apply one client event. Exposed for tests and embedders that want
    /// the error instead of the `rejected` side channel.
    pub async fn dispatch(&self, event: ClientEvent) -> Result<(), ArenaError> {
        match event {
            ClientEvent::JoinQueue { user_id, rating } => self.join_queue(user_id, rating).await,
            ClientEvent::LeaveQueue { user_id } => {
                self.queue.lock().await.leave(&user_id);
                Ok(())
            }
            ClientEvent::JoinSession {
                session_id,
                user_id,
            } => {
                let session = self.resolve_session(&session_id)?;
                session.attach(&user_id).await
            }
            ClientEvent::LeaveSession {
                session_id,
                user_id,
            } => match self.sessions.get(&session_id) {
                Some(session) => session.leave(&user_id).await,
                // tolerated: the session may have finalized concurrently
                None => Ok(()),
            },
            ClientEvent::SubmitContribution {
                session_id,
                user_id,
                round,
                body,
                sequence_number,
            } => {
                let session = self.resolve_session(&session_id)?;
                session
                    .submit(&user_id, round, body, sequence_number)
                    .await
                    .map(|_accepted| ())
            }
        }
    }

    fn resolve_session(&self, id: &Uuid) -> Result<Arc<DebateSession>, ArenaError> {
        self.sessions.get(id).ok_or(ArenaError::UnknownSession(*id))
    }

    async fn join_queue(&self, user_id: UserId, rating: i32) -> Result<(), ArenaError> {
        // a user is in at most one session; pairing them again would leave
        // two sessions claiming the same participant
        if self.sessions.find_for_user(&user_id).is_some() {
            return Err(ArenaError::AlreadyInSession(user_id));
        }
        let mut handle = self
            .profiles
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserHandle::new(user_id.clone(), user_id.0.clone(), rating));
        handle.rating = rating;

        self.queue.lock().await.join(handle, Instant::now())?;
        // a join always triggers an immediate pairing attempt
        self.pairing_pass().await;
        Ok(())
    }

    /// Drain every currently possible pairing, creating one session per
    /// matched pair and notifying both sides.
    pub async fn pairing_pass(&self) {
        let pairs = {
            let mut queue = self.queue.lock().await;
            let now = Instant::now();
            let mut pairs = Vec::new();
            while let Some(pair) = queue.pairing_pass(now) {
                pairs.push(pair);
            }
            pairs
        };
        for (a, b) in pairs {
            self.create_session(a, b);
        }
    }

    fn create_session(&self, a: UserHandle, b: UserHandle) {
        let topic = self.pick_topic();
        let session = DebateSession::new(
            topic.clone(),
            [a.clone(), b.clone()],
            SessionRules::from_config(&self.cfg),
            Arc::clone(&self.deps),
        );
        let session_id = session.id;
        self.sessions.insert(session);
        info!(%session_id, a = %a.id, b = %b.id, %topic, "match made");

        self.registry.send(
            &a.id,
            ServerEvent::MatchFound {
                session_id,
                opponent: b.clone(),
                topic: topic.clone(),
            },
        );
        self.registry.send(
            &b.id,
            ServerEvent::MatchFound {
                session_id,
                opponent: a,
                topic,
            },
        );
    }

    fn pick_topic(&self) -> String {
        self.cfg
            .topics
            .pool
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| "Resolved: this house supports the motion.".to_string())
    }

    /// Run the periodic pairing tick until the server is dropped.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let tick = self.cfg.matchmaking.tick();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                self.pairing_pass().await;
            }
        })
    }
}
