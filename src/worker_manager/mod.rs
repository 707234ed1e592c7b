//! Worker Manager: owns the lifecycle of every background activity in
//! the process — the registered periodic jobs and event workers —
//! behind one `Start`/`Stop` pair.
//!
//! Named timers live in a `HashMap<String, JoinHandle<()>>`, one task
//! per periodic job, all cancelled together through a single shared
//! `tokio_util::sync::CancellationToken` scope rather than individually
//! abortable handles: the registered worker set is fixed at `Start`, so
//! one shared cancellation point is enough.

use crate::automod::{AutomodPortDyn, MessageContext};
use crate::broker::{BrokerDyn, Handler, SubscriptionHandle};
use crate::config::Config;
use crate::derivation;
use crate::events::{subjects, MessageCreateData};
use crate::jobs;
use crate::media::{EmbedUnfurlRequest, MediaPortDyn, TranscodeRequest};
use crate::notifications::NotificationsPortDyn;
use crate::persistence::PersistenceDyn;
use crate::search::SearchPortDyn;
use crate::spam::SpamTracker;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const TRANSCODE_QUEUE_GROUP: &str = "transcode-workers";
const EMBED_QUEUE_GROUP: &str = "embed-workers";

/// Live collaborator handles and cadence configuration the manager
/// registers workers against (spec.md §6 "Config object"). The three
/// optional ports gate the workers that spec.md's registered-worker
/// table marks "if configured".
pub struct WorkerManagerConfig {
    pub config: Config,
    pub persistence: Arc<dyn PersistenceDyn>,
    pub broker: Arc<dyn BrokerDyn>,
    pub media: Arc<dyn MediaPortDyn>,
    pub search: Option<Arc<dyn SearchPortDyn>>,
    pub automod: Option<Arc<dyn AutomodPortDyn>>,
    pub notifications: Option<Arc<dyn NotificationsPortDyn>>,
    pub spam_tracker: Arc<SpamTracker>,
}

/// Owns the lifecycle of all registered workers. `Start` is idempotent:
/// calling it while already running is a no-op; calling it again after
/// `Stop` spawns fresh tasks against a fresh cancellation scope.
pub struct WorkerManager {
    deps: WorkerManagerConfig,
    scope: Mutex<Option<CancellationToken>>,
    periodic_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

impl WorkerManager {
    pub fn new(deps: WorkerManagerConfig) -> Self {
        Self { deps, scope: Mutex::new(None), periodic_tasks: Mutex::new(HashMap::new()), subscriptions: Mutex::new(Vec::new()) }
    }

    /// Launches every configured worker (spec.md §4.3 `Start`).
    pub fn start(&self) {
        if self.scope.lock().unwrap().is_some() {
            tracing::warn!("worker manager already started, ignoring Start");
            return;
        }
        let scope = CancellationToken::new();
        *self.scope.lock().unwrap() = Some(scope.clone());

        self.spawn_always_on_periodics(&scope);
        self.spawn_always_on_event_workers();

        if let Some(search) = self.deps.search.clone() {
            self.spawn_search_workers(&scope, search);
        }
        if let Some(automod) = self.deps.automod.clone() {
            self.spawn_automod_worker(&scope, automod);
        }
        if let Some(notifications) = self.deps.notifications.clone() {
            if notifications.enabled() {
                self.spawn_notification_workers(&scope, notifications);
            }
        }

        tracing::info!("worker manager started");
    }

    /// Cancels the shared scope, waits for every periodic task to
    /// return, and drops every event-worker subscription (spec.md §4.3
    /// `Stop`).
    pub async fn stop(&self) {
        let scope = self.scope.lock().unwrap().take();
        let Some(scope) = scope else {
            return;
        };
        scope.cancel();

        let tasks: Vec<(String, JoinHandle<()>)> = self.periodic_tasks.lock().unwrap().drain().collect();
        for (name, handle) in tasks {
            if let Err(error) = handle.await {
                tracing::warn!(worker = %name, %error, "periodic worker task panicked during shutdown");
            }
        }

        self.subscriptions.lock().unwrap().clear();
        tracing::info!("worker manager stopped");
    }

    fn spawn_periodic<F, Fut>(&self, scope: &CancellationToken, name: &'static str, interval: std::time::Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        let scope = scope.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = scope.cancelled() => {
                        tracing::debug!(worker = name, "periodic worker stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(error) = job().await {
                            tracing::error!(worker = name, %error, "periodic worker failed");
                        }
                    }
                }
            }
        });
        self.periodic_tasks.lock().unwrap().insert(name.to_string(), handle);
    }

    fn spawn_always_on_periodics(&self, scope: &CancellationToken) {
        let persistence = self.deps.persistence.clone();
        self.spawn_periodic(scope, "session-cleanup", std::time::Duration::from_secs(self.deps.config.session_cleanup_interval_secs), move || {
            let persistence = persistence.clone();
            async move { jobs::session_cleanup(persistence.as_ref()).await }
        });

        let persistence = self.deps.persistence.clone();
        self.spawn_periodic(scope, "invite-cleanup", std::time::Duration::from_secs(self.deps.config.invite_cleanup_interval_secs), move || {
            let persistence = persistence.clone();
            async move { jobs::invite_cleanup(persistence.as_ref()).await }
        });

        let persistence = self.deps.persistence.clone();
        let broker = self.deps.broker.clone();
        self.spawn_periodic(scope, "ban-cleanup", std::time::Duration::from_secs(self.deps.config.ban_cleanup_interval_secs), move || {
            let persistence = persistence.clone();
            let broker = broker.clone();
            async move { jobs::ban_cleanup(persistence.as_ref(), broker.as_ref()).await }
        });

        let persistence = self.deps.persistence.clone();
        self.spawn_periodic(scope, "mls-key-cleanup", std::time::Duration::from_secs(self.deps.config.mls_key_cleanup_interval_secs), move || {
            let persistence = persistence.clone();
            async move { jobs::mls_key_cleanup(persistence.as_ref()).await }
        });

    }

    fn spawn_always_on_event_workers(&self) {
        let media = self.deps.media.clone();
        let handle = self.deps.broker.queue_subscribe(
            subjects::MEDIA_TRANSCODE,
            TRANSCODE_QUEUE_GROUP,
            transcode_handler(media),
        );
        self.subscriptions.lock().unwrap().push(handle);

        let media = self.deps.media.clone();
        let handle = self.deps.broker.queue_subscribe(
            subjects::MEDIA_EMBED_UNFURL,
            EMBED_QUEUE_GROUP,
            embed_handler(media),
        );
        self.subscriptions.lock().unwrap().push(handle);
    }

    fn spawn_search_workers(&self, scope: &CancellationToken, search: Arc<dyn SearchPortDyn>) {
        let search_for_sync = search.clone();
        self.spawn_periodic(scope, "search-sync", std::time::Duration::from_secs(self.deps.config.search_sync_interval_secs), move || {
            let search = search_for_sync.clone();
            async move { jobs::search_sync(search.as_ref()).await }
        });

        let handle = self.deps.broker.subscribe_wildcard(subjects::MESSAGE_WILDCARD, search_indexer_handler(search));
        self.subscriptions.lock().unwrap().push(handle);
    }

    /// Also runs a `spam-tracker-cleanup` periodic on the ban-cleanup
    /// cadence: the spam tracker only accumulates state when automod's
    /// `spam_filter` detector is in use, so its own cleanup sweep is
    /// gated on automod being configured rather than kept always-on.
    fn spawn_automod_worker(&self, scope: &CancellationToken, automod: Arc<dyn AutomodPortDyn>) {
        let persistence = self.deps.persistence.clone();
        let handle = self.deps.broker.subscribe(subjects::MESSAGE_CREATE, automod_worker_handler(automod, persistence));
        self.subscriptions.lock().unwrap().push(handle);

        let spam_tracker = self.deps.spam_tracker.clone();
        self.spawn_periodic(scope, "spam-tracker-cleanup", std::time::Duration::from_secs(self.deps.config.ban_cleanup_interval_secs), move || {
            let spam_tracker = spam_tracker.clone();
            async move {
                spam_tracker.cleanup(std::time::Duration::from_secs(3600), std::time::Instant::now());
                Ok(())
            }
        });
    }

    fn spawn_notification_workers(&self, scope: &CancellationToken, notifications: Arc<dyn NotificationsPortDyn>) {
        let persistence = self.deps.persistence.clone();
        for subject in [
            subjects::MESSAGE_CREATE,
            subjects::MESSAGE_REACTION_ADD,
            subjects::CHANNEL_PINS_UPDATE,
            subjects::RELATIONSHIP_ADD,
            subjects::RELATIONSHIP_UPDATE,
            subjects::GUILD_MEMBER_ADD,
            subjects::GUILD_BAN_ADD,
            subjects::GUILD_MEMBER_REMOVE,
            subjects::AUTOMOD_ACTION,
        ] {
            let handle = self.deps.broker.subscribe(subject, derivation_handler(subject, persistence.clone(), notifications.clone()));
            self.subscriptions.lock().unwrap().push(handle);
        }

        let persistence = self.deps.persistence.clone();
        let notifications_for_events = notifications.clone();
        self.spawn_periodic(scope, "event-reminders", std::time::Duration::from_secs(self.deps.config.event_reminder_interval_secs), move || {
            let persistence = persistence.clone();
            let notifications = notifications_for_events.clone();
            async move { jobs::event_reminders(persistence.as_ref(), notifications.as_ref()).await }
        });

        let persistence = self.deps.persistence.clone();
        let notifications_for_bookmarks = notifications.clone();
        self.spawn_periodic(
            scope,
            "bookmark-reminders",
            std::time::Duration::from_secs(self.deps.config.bookmark_reminder_interval_secs),
            move || {
                let persistence = persistence.clone();
                let notifications = notifications_for_bookmarks.clone();
                async move { jobs::bookmark_reminders(persistence.as_ref(), notifications.as_ref()).await }
            },
        );

        let max_age_days = self.deps.config.push_sub_max_age_days;
        self.spawn_periodic(
            scope,
            "push-sub-cleanup",
            std::time::Duration::from_secs(self.deps.config.push_sub_cleanup_interval_secs),
            move || {
                let notifications = notifications.clone();
                async move { jobs::push_sub_cleanup(notifications.as_ref(), max_age_days).await }
            },
        );
    }
}

fn transcode_handler(media: Arc<dyn MediaPortDyn>) -> Handler {
    Arc::new(move |_subject, envelope| {
        let media = media.clone();
        Box::pin(async move {
            let request: TranscodeRequest = match envelope.decode(subjects::MEDIA_TRANSCODE) {
                Ok(request) => request,
                Err(error) => {
                    tracing::warn!(%error, "failed to decode transcode request, dropping");
                    return Ok(());
                }
            };
            media.transcode(request).await
        })
    })
}

fn embed_handler(media: Arc<dyn MediaPortDyn>) -> Handler {
    Arc::new(move |_subject, envelope| {
        let media = media.clone();
        Box::pin(async move {
            let request: EmbedUnfurlRequest = match envelope.decode(subjects::MEDIA_EMBED_UNFURL) {
                Ok(request) => request,
                Err(error) => {
                    tracing::warn!(%error, "failed to decode embed-unfurl request, dropping");
                    return Ok(());
                }
            };
            media.embed_unfurl(&request.url).await.map(|_| ())
        })
    })
}

fn search_indexer_handler(search: Arc<dyn SearchPortDyn>) -> Handler {
    Arc::new(move |subject, envelope| {
        let search = search.clone();
        Box::pin(async move { search.index_event(&subject, &envelope).await })
    })
}

fn automod_worker_handler(automod: Arc<dyn AutomodPortDyn>, persistence: Arc<dyn PersistenceDyn>) -> Handler {
    Arc::new(move |_subject, envelope| {
        let automod = automod.clone();
        let persistence = persistence.clone();
        Box::pin(async move {
            let data: MessageCreateData = match envelope.decode(subjects::MESSAGE_CREATE) {
                Ok(data) => data,
                Err(error) => {
                    tracing::warn!(%error, "failed to decode MESSAGE_CREATE for automod, dropping");
                    return Ok(());
                }
            };
            let member_role_ids = if data.guild_id.is_empty() {
                Vec::new()
            } else {
                persistence.member_role_ids(&data.guild_id, &data.author_id).await.unwrap_or_default()
            };
            let ctx = MessageContext {
                message_id: data.id,
                channel_id: data.channel_id,
                guild_id: data.guild_id,
                author_id: data.author_id,
                content: data.content,
                member_role_ids,
                mention_count: data.mention_user_ids.len(),
            };
            automod.handle_message_create(ctx).await
        })
    })
}

fn derivation_handler(subject: &'static str, persistence: Arc<dyn PersistenceDyn>, notifications: Arc<dyn NotificationsPortDyn>) -> Handler {
    Arc::new(move |_subject, envelope| {
        let persistence = persistence.clone();
        let notifications = notifications.clone();
        Box::pin(async move {
            match subject {
                subjects::MESSAGE_CREATE => derivation::handle_message_create(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::MESSAGE_REACTION_ADD => derivation::handle_reaction_add(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::CHANNEL_PINS_UPDATE => derivation::handle_pins_update(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::RELATIONSHIP_ADD => derivation::handle_relationship_add(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::RELATIONSHIP_UPDATE => derivation::handle_relationship_update(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::GUILD_MEMBER_ADD => derivation::handle_member_add(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::GUILD_BAN_ADD => derivation::handle_ban_add(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::GUILD_MEMBER_REMOVE => derivation::handle_member_remove(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                subjects::AUTOMOD_ACTION => derivation::handle_automod_action(&envelope, persistence.as_ref(), notifications.as_ref()).await,
                other => {
                    tracing::warn!(subject = other, "notification worker received unexpected subject");
                    Ok(())
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::media::NoopMediaPort;
    use crate::persistence::SqlitePersistence;
    use sqlx::SqlitePool;

    async fn test_manager() -> (WorkerManager, SqlitePool) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(crate::persistence::DDL).execute(&pool).await.unwrap();
        let persistence: Arc<dyn PersistenceDyn> = Arc::new(SqlitePersistence::new(pool.clone()));
        let broker: Arc<dyn BrokerDyn> = Arc::new(InMemoryBroker::new());
        let media: Arc<dyn MediaPortDyn> = Arc::new(NoopMediaPort::new());

        let mut config = Config::default();
        config.session_cleanup_interval_secs = 3600;
        config.invite_cleanup_interval_secs = 3600;
        config.ban_cleanup_interval_secs = 3600;
        config.mls_key_cleanup_interval_secs = 3600;

        let manager = WorkerManager::new(WorkerManagerConfig {
            config,
            persistence,
            broker,
            media,
            search: None,
            automod: None,
            notifications: None,
            spam_tracker: Arc::new(SpamTracker::new()),
        });
        (manager, pool)
    }

    #[tokio::test]
    async fn start_runs_always_on_jobs_immediately() {
        let (manager, pool) = test_manager().await;
        sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ('s1', 'u1', '2020-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();

        manager.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE id = 's1'").fetch_one(&pool).await.unwrap();
        assert_eq!(remaining, 0);

        manager.stop().await;
    }

    #[tokio::test]
    async fn second_start_without_stop_is_a_no_op() {
        let (manager, _pool) = test_manager().await;
        manager.start();
        manager.start();
        assert_eq!(manager.periodic_tasks.lock().unwrap().len(), 4);
        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_then_start_spawns_fresh_tasks() {
        let (manager, _pool) = test_manager().await;
        manager.start();
        manager.stop().await;
        assert!(manager.periodic_tasks.lock().unwrap().is_empty());
        manager.start();
        assert_eq!(manager.periodic_tasks.lock().unwrap().len(), 4);
        manager.stop().await;
    }
}
