//! Interactive terminal client
//!
//! `Portal` ties the session, the cache store and the open views together.
//! Commands come from stdin; change events come from the views'
//! subscriptions. Both are handled on one task, so the store needs no lock.

use std::path::Path;

use campus_core::directory::DEFAULT_GROUP_ROOM;
use campus_core::{Error as CoreError, Profile, Room, RoomKind};
use campus_net::{ChangeEvent, EventKind, Row, Table};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::PortalConfig;
use crate::error::{ClientError, Result};
use crate::session::Session;
use crate::state::AppPaths;
use crate::store::ClientStore;
use crate::views::{GlobalView, RoomView, SubjectView};

pub const HELP: &str = "\
/login <credential> <name>        log in (10-digit id, or the admin credential)
/logout                           log out
/rooms                            list rooms
/join <room>                      open a room
/dm <name or credential>          open a direct message
/people                           student directory
/reveal                           toggle sender reveal (admin, anonymous rooms)
/notices                          notice board
/post <title> | <body>            post a notice (admin)
/edit <n> <title> | <body>        edit notice n (admin)
/unpost <n>                       delete notice n (admin)
/newroom <group|anonymous> <name> create a room (admin)
/delroom <room>                   delete a room and its messages (admin)
/purge                            delete old messages (admin)
/subjects                         list subjects
/subject <code> <name>            add a subject (admin)
/materials <code>                 open a subject's materials
/upload <code> <file> <title>     upload material (admin)
/help                             this text
/quit                             exit
anything else                     say it in the open room";

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { credential: String, name: String },
    Logout,
    Rooms,
    Join(String),
    Dm(String),
    People,
    Reveal,
    Notices,
    Post { title: String, body: String },
    Edit { index: usize, title: String, body: String },
    Unpost(usize),
    NewRoom { kind: RoomKind, name: String },
    DeleteRoom(String),
    Purge,
    Subjects,
    NewSubject { code: String, name: String },
    Materials(String),
    Upload { code: String, file: String, title: String },
    Help,
    Quit,
    Say(String),
}

impl Command {
    /// Parse one line. Errors carry a usage hint.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Say(line.to_string()));
        };
        let (word, args) = match rest.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (rest, ""),
        };

        let cmd = match word {
            "login" => {
                let (credential, name) = two_args(args, "/login <credential> <name>")?;
                Command::Login { credential, name }
            }
            "logout" => Command::Logout,
            "rooms" => Command::Rooms,
            "join" => Command::Join(one_arg(args, "/join <room>")?),
            "dm" => Command::Dm(one_arg(args, "/dm <name or credential>")?),
            "people" => Command::People,
            "reveal" => Command::Reveal,
            "notices" => Command::Notices,
            "post" => {
                let (title, body) = title_body(args, "/post <title> | <body>")?;
                Command::Post { title, body }
            }
            "edit" => {
                let usage = "/edit <n> <title> | <body>";
                let (index, rest) = two_args(args, usage)?;
                let (title, body) = title_body(&rest, usage)?;
                Command::Edit {
                    index: parse_index(&index, usage)?,
                    title,
                    body,
                }
            }
            "unpost" => Command::Unpost(parse_index(args, "/unpost <n>")?),
            "newroom" => {
                let usage = "/newroom <group|anonymous> <name>";
                let (kind, name) = two_args(args, usage)?;
                let kind = match RoomKind::parse(&kind.to_lowercase()) {
                    Some(kind @ (RoomKind::Group | RoomKind::Anonymous)) => kind,
                    _ => return Err(usage.to_string()),
                };
                Command::NewRoom { kind, name }
            }
            "delroom" => Command::DeleteRoom(one_arg(args, "/delroom <room>")?),
            "purge" => Command::Purge,
            "subjects" => Command::Subjects,
            "subject" => {
                let (code, name) = two_args(args, "/subject <code> <name>")?;
                Command::NewSubject { code, name }
            }
            "materials" => Command::Materials(one_arg(args, "/materials <code>")?),
            "upload" => {
                let usage = "/upload <code> <file> <title>";
                let (code, rest) = two_args(args, usage)?;
                let (file, title) = two_args(&rest, usage)?;
                Command::Upload { code, file, title }
            }
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command /{}; try /help", other)),
        };
        Ok(cmd)
    }
}

fn one_arg(args: &str, usage: &str) -> std::result::Result<String, String> {
    if args.is_empty() {
        Err(usage.to_string())
    } else {
        Ok(args.to_string())
    }
}

fn two_args(args: &str, usage: &str) -> std::result::Result<(String, String), String> {
    match args.split_once(char::is_whitespace) {
        Some((first, rest)) if !rest.trim().is_empty() => Ok((first.to_string(), rest.trim().to_string())),
        _ => Err(usage.to_string()),
    }
}

fn title_body(args: &str, usage: &str) -> std::result::Result<(String, String), String> {
    match args.split_once('|') {
        Some((title, body)) => Ok((title.trim().to_string(), body.trim().to_string())),
        None => Err(usage.to_string()),
    }
}

fn parse_index(arg: &str, usage: &str) -> std::result::Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(usage.to_string()),
    }
}

/// The terminal client's state
pub struct Portal {
    backend: Backend,
    paths: AppPaths,
    config: PortalConfig,
    store: ClientStore,
    session: Option<Session>,
    global: Option<GlobalView>,
    room: Option<RoomView>,
    subject: Option<SubjectView>,
}

impl Portal {
    pub fn new(backend: Backend, paths: AppPaths, config: PortalConfig) -> Self {
        Self {
            backend,
            paths,
            config,
            store: ClientStore::new(),
            session: None,
            global: None,
            room: None,
            subject: None,
        }
    }

    pub fn store(&self) -> &ClientStore {
        &self.store
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn room_view(&self) -> Option<&RoomView> {
        self.room.as_ref()
    }

    fn profile(&self) -> Result<&Profile> {
        self.session
            .as_ref()
            .map(Session::profile)
            .ok_or(ClientError::NotLoggedIn)
    }

    fn require_admin(&self) -> Result<()> {
        self.session
            .as_ref()
            .ok_or(ClientError::NotLoggedIn)?
            .require_admin()
    }

    /// Resume a persisted session, if any
    pub async fn restore(&mut self) -> Result<Vec<String>> {
        let file = self.paths.session_file();
        match Session::restore(&self.backend, &file, self.config.heartbeat()).await? {
            Some(session) => {
                let greeting = format!("Welcome back, {}.", session.display_name());
                self.enter(session).await.map(|mut out| {
                    out.insert(0, greeting);
                    out
                })
            }
            None => Ok(vec!["Log in with /login <credential> <name>.".to_string()]),
        }
    }

    async fn enter(&mut self, session: Session) -> Result<Vec<String>> {
        self.session = Some(session);
        self.global = Some(GlobalView::open(&self.backend, &mut self.store).await?);

        let lounge = self
            .store
            .room_named(DEFAULT_GROUP_ROOM)
            .or_else(|| self.store.rooms().first())
            .map(|r| r.id);
        match lounge {
            Some(room_id) => self.open_room(room_id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn open_room(&mut self, room_id: Uuid) -> Result<Vec<String>> {
        let viewer = self.profile()?.clone();
        // The old view is dropped only once the new one is ready, so a
        // failed open leaves the current room in place
        let view = RoomView::open(&self.backend, &mut self.store, &viewer, room_id, self.config.lookback()).await?;

        let mut out = vec![format!("== {} ==", self.room_title(view.room()))];
        out.extend(view.render(&self.store).iter().map(|m| m.line()));
        self.room = Some(view);
        Ok(out)
    }

    fn room_title(&self, room: &Room) -> String {
        match (&room.dm_key, self.session.as_ref()) {
            (Some(key), Some(session)) if key.involves(session.user_id()) => {
                let other = key.other(session.user_id());
                let name = self
                    .store
                    .profile(other)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| campus_core::UNKNOWN_SENDER.to_string());
                format!("dm with {}", name)
            }
            _ => match room.kind {
                RoomKind::Anonymous => format!("{} (anonymous)", room.name),
                _ => room.name.clone(),
            },
        }
    }

    fn find_room(&self, name: &str) -> Result<Room> {
        self.store
            .room_named(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("room {:?}", name)).into())
    }

    fn close_session(&mut self) {
        self.room = None;
        self.subject = None;
        self.global = None;
        self.store.clear();
    }

    /// Run one command and return the lines to print
    pub async fn execute(&mut self, command: Command) -> Result<Vec<String>> {
        match command {
            Command::Help => Ok(HELP.lines().map(String::from).collect()),
            Command::Quit => Ok(Vec::new()),

            Command::Login { credential, name } => {
                if self.session.is_some() {
                    return Ok(vec!["Already logged in; /logout first.".into()]);
                }
                let file = self.paths.session_file();
                let session =
                    Session::login(&self.backend, &file, &name, &credential, self.config.heartbeat()).await?;
                let greeting = format!(
                    "Logged in as {}{}.",
                    session.display_name(),
                    if session.is_admin() { " (admin)" } else { "" }
                );
                let mut out = self.enter(session).await?;
                out.insert(0, greeting);
                Ok(out)
            }

            Command::Logout => {
                let session = self.session.take().ok_or(ClientError::NotLoggedIn)?;
                self.close_session();
                session.logout(&self.backend, &self.paths.session_file()).await;
                Ok(vec!["Logged out.".into()])
            }

            Command::Rooms => {
                self.profile()?;
                let active = self.room.as_ref().map(|v| v.room().id);
                Ok(self
                    .store
                    .rooms()
                    .iter()
                    .filter(|r| r.kind != RoomKind::Dm || self.is_participant(r))
                    .map(|r| {
                        let marker = if Some(r.id) == active { "*" } else { " " };
                        format!("{} {}", marker, self.room_title(r))
                    })
                    .collect())
            }

            Command::Join(name) => {
                self.profile()?;
                let room = self.find_room(&name)?;
                self.open_room(room.id).await
            }

            Command::Dm(who) => {
                let me = self.profile()?.id;
                let other = self
                    .store
                    .profiles()
                    .iter()
                    .find(|p| p.credential == who || p.name.eq_ignore_ascii_case(&who))
                    .map(|p| p.id)
                    .ok_or_else(|| CoreError::NotFound(format!("person {:?}", who)))?;
                if other == me {
                    return Err(CoreError::InvalidOperation("cannot message yourself".into()).into());
                }
                let room = self.backend.open_direct_message(me, other).await?;
                self.store.merge_room(EventKind::Insert, room.clone());
                self.open_room(room.id).await
            }

            Command::People => {
                self.profile()?;
                let online: Vec<Uuid> = GlobalView::online(&self.store, self.config.staleness())
                    .into_iter()
                    .map(|p| p.id)
                    .collect();
                Ok(self
                    .store
                    .profiles()
                    .iter()
                    .map(|p| {
                        let dot = if online.contains(&p.id) { "●" } else { "○" };
                        format!("{} {} ({})", dot, p.name, p.role.as_str())
                    })
                    .collect())
            }

            Command::Reveal => {
                let view = self
                    .room
                    .as_mut()
                    .ok_or_else(|| CoreError::InvalidOperation("no room open".into()))?;
                let on = view.toggle_reveal()?;
                let mut out = vec![format!("Reveal {}.", if on { "on" } else { "off" })];
                out.extend(view.render(&self.store).iter().map(|m| m.line()));
                Ok(out)
            }

            Command::Notices => {
                self.profile()?;
                if self.store.notices().is_empty() {
                    return Ok(vec!["No notices.".into()]);
                }
                Ok(self
                    .store
                    .notices()
                    .iter()
                    .enumerate()
                    .map(|(i, n)| format!("{}. {}: {}", i + 1, n.title, n.body))
                    .collect())
            }

            Command::Post { title, body } => {
                let author = self.profile()?.clone();
                let notice = self.backend.post_notice(&author, &title, &body).await?;
                self.store.merge_notice(EventKind::Insert, notice);
                Ok(vec!["Notice posted.".into()])
            }

            Command::Edit { index, title, body } => {
                let editor = self.profile()?.clone();
                let notice = self.notice_at(index)?;
                let updated = self.backend.update_notice(&editor, &notice, &title, &body).await?;
                self.store.merge_notice(EventKind::Update, updated);
                Ok(vec!["Notice updated.".into()])
            }

            Command::Unpost(index) => {
                let editor = self.profile()?.clone();
                let notice = self.notice_at(index)?;
                self.backend.delete_notice(&editor, &notice).await?;
                self.store.merge_notice(EventKind::Delete, notice);
                Ok(vec!["Notice removed.".into()])
            }

            Command::NewRoom { kind, name } => {
                self.require_admin()?;
                let room = self.backend.create_room(&name, kind, None).await?;
                let line = format!("Created {}.", self.room_title(&room));
                self.store.merge_room(EventKind::Insert, room);
                Ok(vec![line])
            }

            Command::DeleteRoom(name) => {
                self.require_admin()?;
                let room = self.find_room(&name)?;
                let room = self.backend.delete_room(room.id).await?;
                let mut out = vec![format!("Deleted {}.", room.name)];
                out.extend(self.forget_room(room));
                Ok(out)
            }

            Command::Purge => {
                self.require_admin()?;
                let purged = self.backend.purge_older_than(self.config.purge_age()).await?;
                let count = purged.len();
                for message in purged {
                    self.store.merge_message(EventKind::Delete, message);
                }
                Ok(vec![format!(
                    "Purged {} message(s) older than {} days.",
                    count, self.config.purge_after_days
                )])
            }

            Command::Subjects => {
                self.profile()?;
                Ok(self
                    .backend
                    .list_subjects()
                    .await?
                    .into_iter()
                    .map(|s| format!("{}  {}", s.code, s.name))
                    .collect())
            }

            Command::NewSubject { code, name } => {
                self.require_admin()?;
                let subject = self.backend.create_subject(&code, &name).await?;
                Ok(vec![format!("Added {} {}.", subject.code, subject.name)])
            }

            Command::Materials(code) => {
                self.profile()?;
                let subject = self.subject_by_code(&code).await?;
                let view = SubjectView::open(&self.backend, &mut self.store, subject).await?;
                let mut out = vec![format!("== {} {} ==", view.subject().code, view.subject().name)];
                out.extend(
                    self.store
                        .materials(view.subject().id)
                        .iter()
                        .map(|m| format!("{}  {}", m.title, m.url)),
                );
                self.subject = Some(view);
                Ok(out)
            }

            Command::Upload { code, file, title } => {
                self.require_admin()?;
                let uploader = self.profile()?.id;
                let subject = self.subject_by_code(&code).await?;
                let path = Path::new(&file);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| CoreError::Validation(format!("invalid file {:?}", file)))?
                    .to_string();
                let bytes = tokio::fs::read(path).await?;
                let material = self
                    .backend
                    .add_material(subject.id, &title, &file_name, bytes, uploader)
                    .await?;
                let line = format!("Uploaded {} to {}.", material.title, material.url);
                self.store.merge_material(EventKind::Insert, material);
                Ok(vec![line])
            }

            Command::Say(text) => {
                if text.is_empty() {
                    return Ok(Vec::new());
                }
                self.profile()?;
                let view = self
                    .room
                    .as_mut()
                    .ok_or_else(|| CoreError::InvalidOperation("no room open; /join one".into()))?;
                view.set_input(text);
                let message = view.send(&self.backend, &mut self.store).await?;
                Ok(vec![view.render_message(&self.store, &message).line()])
            }
        }
    }

    fn is_participant(&self, room: &Room) -> bool {
        match (&room.dm_key, &self.session) {
            (Some(key), Some(session)) => key.involves(session.user_id()),
            _ => false,
        }
    }

    fn notice_at(&self, index: usize) -> Result<campus_core::Notice> {
        self.store
            .notices()
            .get(index)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("notice {}", index + 1)).into())
    }

    async fn subject_by_code(&self, code: &str) -> Result<campus_core::Subject> {
        self.backend
            .list_subjects()
            .await?
            .into_iter()
            .find(|s| s.code.eq_ignore_ascii_case(code))
            .ok_or_else(|| CoreError::NotFound(format!("subject {:?}", code)).into())
    }

    /// Merge a room deletion, closing the room if it is open
    fn forget_room(&mut self, room: Room) -> Option<String> {
        let was_open = self.room.as_ref().is_some_and(|v| v.room().id == room.id);
        let name = room.name.clone();
        self.store.merge_room(EventKind::Delete, room);
        if was_open {
            self.room = None;
            Some(format!("{} was deleted; /join another room.", name))
        } else {
            None
        }
    }

    /// Wait for the next change on any open view
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        async fn from_room(view: &mut Option<RoomView>) -> Option<ChangeEvent> {
            match view {
                Some(v) => v.next_event().await,
                None => std::future::pending().await,
            }
        }
        async fn from_global(view: &mut Option<GlobalView>) -> Option<ChangeEvent> {
            match view {
                Some(v) => v.next_event().await,
                None => std::future::pending().await,
            }
        }
        async fn from_subject(view: &mut Option<SubjectView>) -> Option<ChangeEvent> {
            match view {
                Some(v) => v.next_event().await,
                None => std::future::pending().await,
            }
        }

        tokio::select! {
            Some(event) = from_room(&mut self.room) => Some(event),
            Some(event) = from_global(&mut self.global) => Some(event),
            Some(event) = from_subject(&mut self.subject) => Some(event),
            else => None,
        }
    }

    /// Merge a change and describe anything worth printing
    pub async fn handle_event(&mut self, event: ChangeEvent) -> Result<Vec<String>> {
        match (event.table, event.kind) {
            (Table::Messages, _) => {
                let Some(view) = self.room.as_mut() else {
                    return Ok(Vec::new());
                };
                let inserted = match (&event.new, event.kind) {
                    (Some(Row::Message(m)), EventKind::Insert) => Some(m.id),
                    _ => None,
                };
                if !view.apply(&self.backend, &mut self.store, event).await? {
                    return Ok(Vec::new());
                }
                let line = inserted
                    .and_then(|id| self.store.messages(view.room().id).iter().find(|m| m.id == id))
                    .map(|m| view.render_message(&self.store, m).line());
                Ok(line.into_iter().collect())
            }
            (Table::Rooms, EventKind::Delete) => match event.old {
                Some(Row::Room(room)) if self.store.room(room.id).is_some() => {
                    Ok(self.forget_room(room).into_iter().collect())
                }
                _ => Ok(Vec::new()),
            },
            (Table::Notices, EventKind::Insert) => {
                let title = match &event.new {
                    Some(Row::Notice(n)) => n.title.clone(),
                    _ => return Ok(Vec::new()),
                };
                if self.store.apply(event) {
                    Ok(vec![format!("[notice] {}", title)])
                } else {
                    Ok(Vec::new())
                }
            }
            (Table::Materials, EventKind::Insert) => {
                let line = match &event.new {
                    Some(Row::Material(m)) => format!("[material] {}  {}", m.title, m.url),
                    _ => return Ok(Vec::new()),
                };
                if self.store.apply(event) {
                    Ok(vec![line])
                } else {
                    Ok(Vec::new())
                }
            }
            _ => {
                self.store.apply(event);
                Ok(Vec::new())
            }
        }
    }

    /// Leave without forgetting the session
    pub async fn shutdown(mut self) {
        self.close_session();
        if let Some(session) = self.session.take() {
            session.suspend(&self.backend).await;
        }
    }
}

/// Read commands from stdin until `/quit` or end of input
pub async fn run(mut portal: Portal) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print(portal.restore().await.unwrap_or_else(|e| vec![format!("! {}", e)]));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => match portal.execute(command).await {
                        Ok(out) => print(out),
                        Err(e) => {
                            debug!(error = %e, "Command failed");
                            println!("! {}", e);
                        }
                    },
                    Err(usage) => println!("! {}", usage),
                }
            }
            Some(event) = portal.next_event() => {
                match portal.handle_event(event).await {
                    Ok(out) => print(out),
                    Err(e) => warn!(error = %e, "Failed to apply change"),
                }
            }
        }
    }

    portal.shutdown().await;
    Ok(())
}

fn print(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}
