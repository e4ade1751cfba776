//! Async access to the portal backend
//!
//! Every call runs the blocking SQLite work on the blocking pool and is cut
//! off after the configured request timeout. Writes publish the matching
//! change event to the local hub and, when joined to a relay, upstream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use campus_core::{
    board, catalog, directory, identity, messaging, presence, BlobStore, CatalogRepository,
    Database, LoginPolicy, Lookup, Material, Message, MessageDisplay, Notice, Profile,
    ProfileRepository, Room, RoomKind, RoomRepository, SeedOutcome, Subject,
};
use campus_net::{ChangeEvent, FeedClient, Hub, Row, Subscription, Topic};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::error::{ClientError, Result};
use crate::state::AppPaths;

/// Handle to the shared store and change feed
#[derive(Clone)]
pub struct Backend {
    db: Arc<Mutex<Database>>,
    blobs: Arc<BlobStore>,
    hub: Hub,
    upstream: Option<Arc<FeedClient>>,
    policy: Arc<LoginPolicy>,
    timeout: Duration,
}

impl Backend {
    pub fn new(db: Database, blobs: BlobStore, config: &PortalConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            blobs: Arc::new(blobs),
            hub: Hub::new(),
            upstream: None,
            policy: Arc::new(config.login_policy()),
            timeout: config.request_timeout(),
        }
    }

    /// Open the on-disk database and blob store under `paths`
    pub fn open(paths: &AppPaths, config: &PortalConfig) -> Result<Self> {
        let db_path = config.database_path(paths.data_dir());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path)?;
        Ok(Self::new(db, BlobStore::with_root(paths.blobs_dir()), config))
    }

    /// Also forward every published change to a relay
    pub fn with_upstream(mut self, upstream: Option<Arc<FeedClient>>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn policy(&self) -> &LoginPolicy {
        &self.policy
    }

    fn spawn_db<T, F>(&self, f: F) -> JoinHandle<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> campus_core::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|_| ClientError::Task("database lock poisoned".into()))?;
            f(&db).map_err(ClientError::from)
        })
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> campus_core::Result<T> + Send + 'static,
    {
        match tokio::time::timeout(self.timeout, self.spawn_db(f)).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Backend call timed out");
                Err(ClientError::Timeout(self.timeout))
            }
        }
    }

    /// Run a write and publish the changes `events` derives from its result.
    ///
    /// A timed-out write keeps running on the blocking pool; its changes are
    /// still published once it lands, so other subscribers see the row.
    async fn write<T, F, E>(&self, op: &'static str, f: F, events: E) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> campus_core::Result<T> + Send + 'static,
        E: FnOnce(&T) -> Vec<ChangeEvent> + Send + 'static,
    {
        let mut task = self.spawn_db(f);
        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => {
                let value = flatten(joined)?;
                for event in events(&value) {
                    self.publish(event).await;
                }
                Ok(value)
            }
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Backend write timed out");
                let backend = self.clone();
                tokio::spawn(async move {
                    match flatten(task.await) {
                        Ok(value) => {
                            debug!(op, "Late write landed, publishing");
                            for event in events(&value) {
                                backend.publish(event).await;
                            }
                        }
                        Err(e) => debug!(op, error = %e, "Late write failed"),
                    }
                });
                Err(ClientError::Timeout(self.timeout))
            }
        }
    }

    /// Fan a change out locally and to the relay
    pub async fn publish(&self, event: ChangeEvent) {
        debug!(table = ?event.table, kind = ?event.kind, "Publishing change");
        self.hub.publish(event.clone());
        if let Some(upstream) = &self.upstream {
            if let Err(e) = upstream.publish(event).await {
                warn!(error = %e, "Failed to forward change upstream");
            }
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.hub.subscribe(topic)
    }

    // ---- identity & presence ----

    pub async fn resolve_identity(&self, name: &str, credential: &str) -> Result<Profile> {
        let policy = self.policy.clone();
        let (name, credential) = (name.to_string(), credential.to_string());
        let lookup = self
            .write(
                "resolve_identity",
                move |db| identity::resolve(db, &policy, &name, &credential),
                |lookup: &Lookup<Profile>| {
                    if lookup.was_created() {
                        vec![ChangeEvent::insert(Row::Profile(lookup.get().clone()))]
                    } else {
                        Vec::new()
                    }
                },
            )
            .await?;
        Ok(lookup.into_inner())
    }

    pub async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        self.call("find_profile", move |db| db.find_profile_by_id(user_id))
            .await
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.call("list_profiles", |db| db.list_profiles()).await
    }

    pub async fn set_online(&self, user_id: Uuid, is_online: bool) -> Result<()> {
        self.write(
            "set_online",
            move |db| {
                presence::set_online(db, user_id, is_online)?;
                db.find_profile_by_id(user_id)
            },
            profile_updated,
        )
        .await
        .map(drop)
    }

    /// Presence heartbeat
    pub async fn touch(&self, user_id: Uuid) -> Result<()> {
        self.write(
            "touch",
            move |db| {
                presence::touch(db, user_id)?;
                db.find_profile_by_id(user_id)
            },
            profile_updated,
        )
        .await
        .map(drop)
    }

    pub async fn delete_profile(&self, user_id: Uuid) -> Result<Profile> {
        self.write(
            "delete_profile",
            move |db| {
                let profile = db.find_profile_by_id(user_id)?.ok_or_else(|| {
                    campus_core::Error::NotFound(format!("profile {}", user_id))
                })?;
                db.delete_profile(user_id)?;
                Ok(profile)
            },
            |removed: &Profile| vec![ChangeEvent::delete(Row::Profile(removed.clone()))],
        )
        .await
    }

    // ---- rooms ----

    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.call("list_rooms", |db| directory::list_rooms(db)).await
    }

    pub async fn find_room(&self, room_id: Uuid) -> Result<Option<Room>> {
        self.call("find_room", move |db| db.find_room_by_id(room_id))
            .await
    }

    pub async fn ensure_default_rooms(&self) -> Result<Vec<Room>> {
        let outcome = self
            .write(
                "ensure_default_rooms",
                |db| directory::ensure_default_rooms(db),
                |outcome: &SeedOutcome| {
                    if !outcome.seeded {
                        return Vec::new();
                    }
                    outcome
                        .rooms
                        .iter()
                        .map(|room| ChangeEvent::insert(Row::Room(room.clone())))
                        .collect()
                },
            )
            .await?;
        Ok(outcome.rooms)
    }

    pub async fn open_direct_message(&self, self_id: Uuid, other_id: Uuid) -> Result<Room> {
        let lookup = self
            .write(
                "open_direct_message",
                move |db| directory::open_direct_message(db, self_id, other_id),
                |lookup: &Lookup<Room>| {
                    if lookup.was_created() {
                        vec![ChangeEvent::insert(Row::Room(lookup.get().clone()))]
                    } else {
                        Vec::new()
                    }
                },
            )
            .await?;
        Ok(lookup.into_inner())
    }

    pub async fn create_room(&self, name: &str, kind: RoomKind, subject_id: Option<Uuid>) -> Result<Room> {
        let name = name.to_string();
        self.write(
            "create_room",
            move |db| directory::create_room(db, &name, kind, subject_id),
            |room: &Room| vec![ChangeEvent::insert(Row::Room(room.clone()))],
        )
        .await
    }

    /// Delete a room; its messages go with it
    pub async fn delete_room(&self, room_id: Uuid) -> Result<Room> {
        self.write(
            "delete_room",
            move |db| directory::delete_room(db, room_id),
            |room: &Room| vec![ChangeEvent::delete(Row::Room(room.clone()))],
        )
        .await
    }

    // ---- messages ----

    pub async fn load_recent(&self, room_id: Uuid, lookback: chrono::Duration) -> Result<Vec<MessageDisplay>> {
        self.call("load_recent", move |db| {
            messaging::load_recent(db, room_id, lookback)
        })
        .await
    }

    pub async fn send_message(&self, room_id: Uuid, sender_id: Uuid, text: &str) -> Result<Message> {
        self.send_message_with_id(Uuid::new_v4(), room_id, sender_id, text)
            .await
    }

    /// Send under a caller-chosen id; resending the same id after a timeout
    /// yields the stored message rather than a duplicate
    pub async fn send_message_with_id(
        &self,
        message_id: Uuid,
        room_id: Uuid,
        sender_id: Uuid,
        text: &str,
    ) -> Result<Message> {
        let text = text.to_string();
        self.write(
            "send_message",
            move |db| messaging::send_with_id(db, message_id, room_id, sender_id, &text),
            |message: &Message| vec![ChangeEvent::insert(Row::Message(message.clone()))],
        )
        .await
    }

    /// Delete messages older than `max_age` in every room; returns them
    pub async fn purge_older_than(&self, max_age: chrono::Duration) -> Result<Vec<Message>> {
        self.write(
            "purge_older_than",
            move |db| messaging::purge_older_than(db, max_age),
            |purged: &Vec<Message>| {
                purged
                    .iter()
                    .map(|m| ChangeEvent::delete(Row::Message(m.clone())))
                    .collect()
            },
        )
        .await
    }

    // ---- notices ----

    pub async fn list_notices(&self) -> Result<Vec<Notice>> {
        self.call("list_notices", |db| board::list_notices(db)).await
    }

    pub async fn post_notice(&self, author: &Profile, title: &str, body: &str) -> Result<Notice> {
        let author = author.clone();
        let (title, body) = (title.to_string(), body.to_string());
        self.write(
            "post_notice",
            move |db| board::post_notice(db, &author, &title, &body),
            |notice: &Notice| vec![ChangeEvent::insert(Row::Notice(notice.clone()))],
        )
        .await
    }

    pub async fn update_notice(&self, editor: &Profile, notice: &Notice, title: &str, body: &str) -> Result<Notice> {
        let (editor, current) = (editor.clone(), notice.clone());
        let previous = notice.clone();
        let (title, body) = (title.to_string(), body.to_string());
        self.write(
            "update_notice",
            move |db| board::update_notice(db, &editor, &current, &title, &body),
            move |updated: &Notice| {
                vec![ChangeEvent::update(
                    Row::Notice(updated.clone()),
                    Some(Row::Notice(previous)),
                )]
            },
        )
        .await
    }

    pub async fn delete_notice(&self, editor: &Profile, notice: &Notice) -> Result<()> {
        let editor = editor.clone();
        let (notice_id, removed) = (notice.id, notice.clone());
        self.write(
            "delete_notice",
            move |db| board::delete_notice(db, &editor, notice_id),
            move |_: &()| vec![ChangeEvent::delete(Row::Notice(removed))],
        )
        .await
    }

    // ---- catalog ----

    pub async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.call("list_subjects", |db| db.list_subjects()).await
    }

    pub async fn create_subject(&self, code: &str, name: &str) -> Result<Subject> {
        let (code, name) = (code.to_string(), name.to_string());
        self.call("create_subject", move |db| {
            catalog::create_subject(db, &code, &name)
        })
        .await
    }

    pub async fn list_materials(&self, subject_id: Uuid) -> Result<Vec<Material>> {
        self.call("list_materials", move |db| db.list_materials(subject_id))
            .await
    }

    /// Upload a file and record it as material of a subject
    pub async fn add_material(
        &self,
        subject_id: Uuid,
        title: &str,
        file_name: &str,
        bytes: Vec<u8>,
        uploaded_by: Uuid,
    ) -> Result<Material> {
        let blobs = self.blobs.clone();
        let (title, file_name) = (title.to_string(), file_name.to_string());
        self.write(
            "add_material",
            move |db| catalog::add_material(db, &blobs, subject_id, &title, &file_name, &bytes, uploaded_by),
            |material: &Material| vec![ChangeEvent::insert(Row::Material(material.clone()))],
        )
        .await
    }
}

fn profile_updated(profile: &Option<Profile>) -> Vec<ChangeEvent> {
    profile
        .iter()
        .map(|p| ChangeEvent::update(Row::Profile(p.clone()), None))
        .collect()
}

fn flatten<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined.map_err(|e| ClientError::Task(e.to_string()))?
}
