//! Async runtime for many rooms
//!
//! [`Rooms`] owns every room's [`Game`] behind a per-room async mutex, so
//! each transition runs atomically while rooms stay fully independent. It
//! turns the game's scheduled alarms into tokio sleeps guarded by
//! cancellation tokens, performs the question fetch outside the room lock,
//! gates administrative commands, and credits finished games to the
//! all-time registry.

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use dashmap::DashMap;
use derive_where::derive_where;
use heck::ToSnakeCase;
use itertools::Itertools;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use web_time::SystemTime;

use crate::{
    AlarmMessage,
    config::Settings,
    game::{self, Action, Game, Phase},
    game_id::{GameId, RoomId},
    leaderboard,
    quiz::{question::OptionKey, source::QuestionSource},
    registry::{Persistence, PlayerRegistry},
    roster::{Actor, Id},
    session::{AdminCheck, Tunnel},
};

/// A chat command understood by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Announce a new game
    StartTrivia,
    /// Join the announced or running game
    JoinTrivia,
    /// Fetch questions and start, optionally from a named category
    StartGame(Option<String>),
    /// Skip to the next question
    NextGame,
    /// End the running game
    EndGame,
    /// Show the current and all-time boards
    Leaderboard,
    /// List the game's players
    Players,
}

impl Command {
    /// Parses a command message such as `/start_game@TriviaBot science`
    ///
    /// The leading slash, a `@bot` suffix and the casing of the command name
    /// are ignored.
    ///
    /// # Returns
    ///
    /// `None` if the text is not one of the engine's commands
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let name = words.next()?;
        let name = name.strip_prefix('/').unwrap_or(name);
        let name = name.split('@').next().unwrap_or_default().to_snake_case();
        let argument = Some(words.join(" ")).filter(|a| !a.is_empty());

        Some(match name.as_str() {
            "start_trivia" => Self::StartTrivia,
            "join_trivia" => Self::JoinTrivia,
            "start_game" => Self::StartGame(argument),
            "next_game" => Self::NextGame,
            "end_game" => Self::EndGame,
            "leaderboard" => Self::Leaderboard,
            "players" => Self::Players,
            _ => return None,
        })
    }

    fn requires_admin(&self) -> bool {
        matches!(self, Self::StartGame(_) | Self::NextGame | Self::EndGame)
    }
}

#[derive(Default)]
struct Room {
    game: Option<Game>,
    /// Cancels the sleeping deadline task of the current question
    timer: Option<CancellationToken>,
}

impl Room {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

struct Inner<T, Q, A, P> {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
    tunnel: T,
    source: Q,
    admin: A,
    store: P,
    registry: StdMutex<PlayerRegistry>,
    /// Held for the whole of a save, so writes reach the store one at a time
    saving: StdMutex<()>,
    settings: Settings,
}

/// The per-room session registry and its timers
///
/// Cloning is cheap and yields a handle to the same rooms.
#[derive_where(Clone)]
pub struct Rooms<T, Q, A, P> {
    inner: Arc<Inner<T, Q, A, P>>,
}

impl<T, Q, A, P> Rooms<T, Q, A, P>
where
    T: Tunnel + Send + Sync + 'static,
    Q: QuestionSource,
    A: AdminCheck,
    P: Persistence,
{
    /// Creates the runtime and loads the all-time registry from `store`
    ///
    /// A registry that cannot be loaded is logged and replaced by an empty
    /// one; the next successful save overwrites it.
    pub fn new(tunnel: T, source: Q, admin: A, store: P, settings: Settings) -> Self {
        let registry = store.load().unwrap_or_else(|e| {
            error!("Failed to load player registry, starting empty: {e}");
            PlayerRegistry::default()
        });
        info!(players = registry.len(), "Loaded player registry");

        Self {
            inner: Arc::new(Inner {
                rooms: DashMap::new(),
                tunnel,
                source,
                admin,
                store,
                registry: StdMutex::new(registry),
                saving: StdMutex::new(()),
                settings,
            }),
        }
    }

    /// The transport messages are sent through
    pub fn tunnel(&self) -> &T {
        &self.inner.tunnel
    }

    /// The storage backend of the registry
    pub fn store(&self) -> &P {
        &self.inner.store
    }

    /// A copy of the all-time registry
    pub fn registry(&self) -> PlayerRegistry {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `f` against the room's game, if there is one
    pub async fn inspect<R>(&self, room: RoomId, f: impl FnOnce(&Game) -> R) -> Option<R> {
        let handle = self.existing_room(room)?;
        let slot = handle.lock().await;
        slot.game.as_ref().map(f)
    }

    /// The room's slot, created on first use
    fn room(&self, room: RoomId) -> Arc<Mutex<Room>> {
        Arc::clone(self.inner.rooms.entry(room).or_default().value())
    }

    fn existing_room(&self, room: RoomId) -> Option<Arc<Mutex<Room>>> {
        self.inner.rooms.get(&room).map(|r| Arc::clone(r.value()))
    }

    fn notify_error(&self, room: RoomId, actor: Id, error: &impl std::fmt::Display) {
        self.inner
            .tunnel
            .notify(room, actor, &format!("❌ {error}"));
    }

    fn notify_no_game(&self, room: RoomId, actor: Id) {
        self.inner.tunnel.notify(
            room,
            actor,
            "No trivia game has been announced. Use /start_trivia first.",
        );
    }

    /// Replaces the room's deadline task with one for `alarms`
    fn arm(&self, room: RoomId, slot: &mut Room, alarms: Vec<(AlarmMessage, Duration)>) {
        let Some(game_id) = slot.game.as_ref().map(Game::id) else {
            return;
        };

        for (alarm, duration) in alarms {
            slot.cancel_timer();

            let token = CancellationToken::new();
            slot.timer = Some(token.clone());

            let rooms = self.clone();
            let cancelled = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = cancelled.cancelled() => {}
                    () = tokio::time::sleep(duration) => {
                        rooms.fire(room, game_id, token, alarm).await;
                    }
                }
            });
        }
    }

    async fn fire(
        &self,
        room: RoomId,
        game_id: GameId,
        token: CancellationToken,
        alarm: AlarmMessage,
    ) {
        let Some(handle) = self.existing_room(room) else {
            return;
        };
        let mut slot = handle.lock().await;

        // cancelled while waiting for the lock
        if token.is_cancelled() {
            debug!(%room, game = %game_id, "Dropping cancelled deadline");
            return;
        }
        let Some(game) = slot.game.as_mut().filter(|g| g.id() == game_id) else {
            debug!(%room, game = %game_id, "Dropping deadline of a replaced game");
            return;
        };

        let mut alarms = vec![];
        match game.receive_alarm(alarm, SystemTime::now(), &self.inner.tunnel, |m, d| {
            alarms.push((m, d));
        }) {
            Ok(()) => {
                info!(%room, game = %game_id, index = game.current_index(), "Deadline elapsed");
            }
            Err(game::Error::StaleTimer) => {
                debug!(%room, game = %game_id, "Ignoring stale deadline");
                return;
            }
            Err(e) => {
                warn!(%room, game = %game_id, "Deadline rejected: {e}");
                return;
            }
        }

        slot.timer = None;
        self.arm(room, &mut slot, alarms);
        let save = self.settle(room, &mut slot);
        drop(slot);
        Self::wait_for(save).await;
    }

    /// Credits an ended game to the registry, once
    ///
    /// # Returns
    ///
    /// The save started for the updated registry, to be awaited once the
    /// room lock is released
    fn settle(&self, room: RoomId, slot: &mut Room) -> Option<JoinHandle<()>> {
        let game = slot.game.as_mut().filter(|g| g.is_ended())?;
        if let Some(timer) = slot.timer.take() {
            timer.cancel();
        }

        {
            let mut registry = self
                .inner
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !game.settle(&mut registry) {
                return None;
            }
        }

        info!(
            %room,
            game = %game.id(),
            forced = game.was_forced(),
            players = game.roster().len(),
            "Game ended"
        );

        Some(self.save(room, game.id()))
    }

    /// Writes the current registry on the blocking pool
    ///
    /// Saves are serialized and each one snapshots the registry after taking
    /// its turn, so a later save never writes older records than an earlier
    /// one.
    fn save(&self, room: RoomId, game_id: GameId) -> JoinHandle<()> {
        let rooms = self.clone();
        tokio::task::spawn_blocking(move || {
            let _saving = rooms
                .inner
                .saving
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let snapshot = rooms.registry();
            match rooms.inner.store.save(&snapshot) {
                Ok(()) => debug!(%room, game = %game_id, "Saved player registry"),
                Err(e) => {
                    error!(%room, game = %game_id, "Failed to save player registry: {e}");
                }
            }
        })
    }

    async fn wait_for(save: Option<JoinHandle<()>>) {
        let Some(save) = save else {
            return;
        };
        if let Err(e) = save.await {
            error!("Player registry save task failed: {e}");
        }
    }

    /// Handles a command message from `actor` in `room`
    ///
    /// Text that is not a known command is ignored.
    pub async fn on_command(&self, text: &str, room: RoomId, actor: Actor) {
        let Some(command) = Command::parse(text) else {
            debug!(%room, "Ignoring unknown command {text:?}");
            return;
        };

        if command.requires_admin() && !self.inner.admin.is_admin(room, actor.id).await {
            info!(%room, actor = %actor.id, ?command, "Rejected command from non-admin");
            self.inner
                .tunnel
                .notify(room, actor.id, "❌ Only admins can do that.");
            return;
        }

        match command {
            Command::StartTrivia => self.announce(room, &actor).await,
            Command::JoinTrivia => self.join(room, &actor).await,
            Command::StartGame(category) => self.start(room, &actor, category).await,
            Command::NextGame => self.advance(room, &actor).await,
            Command::EndGame => self.end(room, &actor).await,
            Command::Leaderboard => self.show_leaderboard(room).await,
            Command::Players => self.show_players(room, &actor).await,
        }
    }

    /// Handles an answer button press
    ///
    /// Payloads that are not answer buttons are ignored.
    pub async fn on_answer_callback(
        &self,
        room: RoomId,
        actor: Id,
        data: &str,
        timestamp: SystemTime,
    ) {
        let key = match OptionKey::from_callback(data) {
            Ok(key) => key,
            Err(e) => {
                debug!(%room, %actor, "Ignoring callback: {e}");
                return;
            }
        };

        let Some(handle) = self.existing_room(room) else {
            self.notify_no_game(room, actor);
            return;
        };
        let mut slot = handle.lock().await;
        let Some(game) = slot.game.as_mut() else {
            self.notify_no_game(room, actor);
            return;
        };

        let mut alarms = vec![];
        match game.submit_answer(actor, key, timestamp, &self.inner.tunnel, |m, d| {
            alarms.push((m, d));
        }) {
            Ok(outcome) => {
                debug!(
                    %room,
                    game = %game.id(),
                    %actor,
                    correct = outcome.award.is_some(),
                    advanced = outcome.advanced,
                    "Answer accepted"
                );
            }
            Err(e) => {
                debug!(%room, game = %game.id(), %actor, "Answer rejected: {e}");
                self.notify_error(room, actor, &e);
                return;
            }
        }

        self.arm(room, &mut slot, alarms);
        let save = self.settle(room, &mut slot);
        drop(slot);
        Self::wait_for(save).await;
    }

    async fn announce(&self, room: RoomId, actor: &Actor) {
        let handle = self.room(room);
        let mut slot = handle.lock().await;

        if let Some(game) = slot.game.as_ref().filter(|g| g.phase() == Phase::Active) {
            self.notify_error(
                room,
                actor.id,
                &game::Error::InvalidTransition {
                    action: Action::Announce,
                    phase: game.phase(),
                },
            );
            return;
        }

        slot.cancel_timer();
        let game = Game::announce(room, self.inner.settings.game_options(), &self.inner.tunnel);
        info!(%room, game = %game.id(), "Game announced");
        slot.game = Some(game);
    }

    async fn join(&self, room: RoomId, actor: &Actor) {
        let Some(handle) = self.existing_room(room) else {
            self.notify_no_game(room, actor.id);
            return;
        };
        let mut slot = handle.lock().await;
        let Some(game) = slot.game.as_mut() else {
            self.notify_no_game(room, actor.id);
            return;
        };

        match game.join(actor, &self.inner.tunnel) {
            Ok(outcome) => {
                debug!(%room, game = %game.id(), actor = %actor.id, ?outcome, "Join");
            }
            Err(e) => self.notify_error(room, actor.id, &e),
        }
    }

    async fn start(&self, room: RoomId, actor: &Actor, category: Option<String>) {
        let Some(handle) = self.existing_room(room) else {
            self.notify_no_game(room, actor.id);
            return;
        };

        let game_id = {
            let mut slot = handle.lock().await;
            let Some(game) = slot.game.as_mut() else {
                self.notify_no_game(room, actor.id);
                return;
            };
            if let Err(e) = game.begin_start() {
                self.notify_error(room, actor.id, &e);
                return;
            }
            game.id()
        };

        let category = category.or_else(|| self.inner.settings.default_category.clone());
        info!(%room, game = %game_id, ?category, "Fetching questions");
        let fetched = self
            .inner
            .source
            .fetch(category.as_deref(), self.inner.settings.fetch_limit())
            .await;

        let mut slot = handle.lock().await;
        let Some(game) = slot.game.as_mut().filter(|g| g.id() == game_id) else {
            info!(%room, game = %game_id, "Game was replaced while fetching questions");
            return;
        };

        let questions = match fetched {
            Ok(questions) => questions,
            Err(e) => {
                warn!(%room, game = %game_id, "Question fetch failed: {e}");
                game.abort_start();
                self.inner.tunnel.broadcast(
                    room,
                    "❌ Couldn't fetch questions right now. Players stay registered, try /start_game again.",
                );
                return;
            }
        };

        let mut alarms = vec![];
        match game.commit_start(questions, SystemTime::now(), &self.inner.tunnel, |m, d| {
            alarms.push((m, d));
        }) {
            Ok(()) => info!(
                %room,
                game = %game_id,
                questions = game.question_count(),
                players = game.roster().len(),
                "Game started"
            ),
            Err(e) => {
                warn!(%room, game = %game_id, "Start rejected after fetch: {e}");
                return;
            }
        }

        self.arm(room, &mut slot, alarms);
    }

    async fn advance(&self, room: RoomId, actor: &Actor) {
        let Some(handle) = self.existing_room(room) else {
            self.notify_no_game(room, actor.id);
            return;
        };
        let mut slot = handle.lock().await;
        let Some(game) = slot.game.as_mut() else {
            self.notify_no_game(room, actor.id);
            return;
        };

        let mut alarms = vec![];
        if let Err(e) = game.advance_manually(SystemTime::now(), &self.inner.tunnel, |m, d| {
            alarms.push((m, d));
        }) {
            self.notify_error(room, actor.id, &e);
            return;
        }
        info!(%room, game = %game.id(), index = game.current_index(), "Question skipped");

        slot.cancel_timer();
        self.arm(room, &mut slot, alarms);
        let save = self.settle(room, &mut slot);
        drop(slot);
        Self::wait_for(save).await;
    }

    async fn end(&self, room: RoomId, actor: &Actor) {
        let Some(handle) = self.existing_room(room) else {
            self.notify_no_game(room, actor.id);
            return;
        };
        let mut slot = handle.lock().await;
        let Some(game) = slot.game.as_mut() else {
            self.notify_no_game(room, actor.id);
            return;
        };

        if let Err(e) = game.force_end(&self.inner.tunnel) {
            self.notify_error(room, actor.id, &e);
            return;
        }

        let save = self.settle(room, &mut slot);
        drop(slot);
        Self::wait_for(save).await;
    }

    async fn show_leaderboard(&self, room: RoomId) {
        let current = self
            .inspect(room, |game| {
                (game.phase() == Phase::Active)
                    .then(|| leaderboard::render_current(&game.standings()))
            })
            .await
            .flatten();

        let all_time = leaderboard::render_all_time(&leaderboard::all_time(
            &self.registry(),
            self.inner.settings.all_time_limit,
        ));

        let text = match current {
            Some(current) => format!("{current}\n\n{all_time}"),
            None => all_time,
        };
        self.inner.tunnel.broadcast(room, &text);
    }

    async fn show_players(&self, room: RoomId, actor: &Actor) {
        let text = self
            .inspect(room, |game| {
                let progress = (game.phase() == Phase::Active)
                    .then(|| (game.current_index(), game.question_count()));
                leaderboard::render_roster(&game.roster().in_join_order(), progress)
            })
            .await;

        match text {
            Some(text) => self.inner.tunnel.broadcast(room, &text),
            None => self.notify_no_game(room, actor.id),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::{
        game::tests::three_questions,
        quiz::{question::QuestionSet, source::FetchError},
        registry::{JsonFileStore, MemoryStore},
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Present(String),
        Notify(Id, String),
        Broadcast(String),
        DeleteTracked,
    }

    #[derive(Default)]
    struct SharedTunnel {
        sent: StdMutex<Vec<Sent>>,
    }

    impl SharedTunnel {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn broadcasts_containing(&self, needle: &str) -> usize {
            self.sent()
                .iter()
                .filter(|s| matches!(s, Sent::Broadcast(text) if text.contains(needle)))
                .count()
        }

        fn notices(&self, id: Id) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Notify(to, text) if to == id => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    impl Tunnel for SharedTunnel {
        fn present(&self, _room: RoomId, text: &str, _options: &[(OptionKey, String)]) {
            self.sent.lock().unwrap().push(Sent::Present(text.to_owned()));
        }

        fn notify(&self, _room: RoomId, actor: Id, text: &str) {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Notify(actor, text.to_owned()));
        }

        fn broadcast(&self, _room: RoomId, text: &str) {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Broadcast(text.to_owned()));
        }

        fn delete_tracked(&self, _room: RoomId) {
            self.sent.lock().unwrap().push(Sent::DeleteTracked);
        }
    }

    /// Serves the same batch every time, after `failures` failed fetches
    struct FixedSource {
        questions: QuestionSet,
        failures: AtomicU32,
    }

    impl QuestionSource for FixedSource {
        async fn fetch(&self, _category: Option<&str>, _limit: usize) -> Result<QuestionSet, FetchError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(FetchError::ResponseCode(1));
            }
            Ok(self.questions.clone())
        }
    }

    struct Admins(HashSet<Id>);

    impl AdminCheck for Admins {
        async fn is_admin(&self, _room: RoomId, actor: Id) -> bool {
            self.0.contains(&actor)
        }
    }

    type TestRooms = Rooms<SharedTunnel, FixedSource, Admins, MemoryStore>;

    const ROOM: RoomId = RoomId::new(-42);
    const ADMIN: Id = Id::new(1);
    const A: Id = Id::new(2);
    const B: Id = Id::new(3);

    fn rooms_with(failures: u32) -> TestRooms {
        Rooms::new(
            SharedTunnel::default(),
            FixedSource {
                questions: three_questions(),
                failures: AtomicU32::new(failures),
            },
            Admins(HashSet::from([ADMIN])),
            MemoryStore::default(),
            Settings::default(),
        )
    }

    fn actor(id: Id) -> Actor {
        Actor::new(id, format!("player{id}"))
    }

    async fn running_game(rooms: &TestRooms, players: &[Id]) {
        rooms.on_command("/start_trivia", ROOM, actor(ADMIN)).await;
        for id in players {
            rooms.on_command("/join_trivia", ROOM, actor(*id)).await;
        }
        rooms.on_command("/start_game", ROOM, actor(ADMIN)).await;
        assert_eq!(rooms.inspect(ROOM, Game::phase).await, Some(Phase::Active));
    }

    async fn presented_at(rooms: &TestRooms) -> SystemTime {
        rooms
            .inspect(ROOM, |g| g.armed_deadline().map(|d| d.presented_at))
            .await
            .flatten()
            .unwrap()
    }

    async fn index(rooms: &TestRooms) -> usize {
        rooms.inspect(ROOM, Game::current_index).await.unwrap()
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("/start_trivia"), Some(Command::StartTrivia));
        assert_eq!(
            Command::parse("/Start_Game@TriviaBot   science "),
            Some(Command::StartGame(Some("science".to_owned())))
        );
        assert_eq!(Command::parse("/start_game"), Some(Command::StartGame(None)));
        assert_eq!(Command::parse("JoinTrivia"), Some(Command::JoinTrivia));
        assert_eq!(Command::parse("/join-trivia"), Some(Command::JoinTrivia));
        assert_eq!(Command::parse("/help"), None);
        assert_eq!(Command::parse("   "), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_everyone_answering_advances() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A, B]).await;
        let shown = presented_at(&rooms).await;

        rooms
            .on_answer_callback(ROOM, A, "answer_a", shown + Duration::from_secs(3))
            .await;
        rooms
            .on_answer_callback(ROOM, B, "answer_b", shown + Duration::from_secs(10))
            .await;

        assert_eq!(index(&rooms).await, 1);
        let points = rooms
            .inspect(ROOM, |g| g.roster().get(A).unwrap().stats().points)
            .await;
        assert_eq!(points, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_advances_unanswered_question() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A]).await;

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(index(&rooms).await, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(index(&rooms).await, 1);
        assert_eq!(rooms.tunnel().broadcasts_containing("Time's up"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_advance_cancels_old_deadline() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A]).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        rooms.on_command("/next_game", ROOM, actor(ADMIN)).await;
        assert_eq!(index(&rooms).await, 1);

        // the first question's deadline would have fired at 60s
        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(index(&rooms).await, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(index(&rooms).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlines_exhaust_game_and_save_registry_once() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A, B]).await;

        tokio::time::sleep(Duration::from_secs(181)).await;

        assert_eq!(rooms.inspect(ROOM, Game::is_ended).await, Some(true));
        assert_eq!(rooms.inspect(ROOM, Game::current_index).await, Some(3));
        let stored = rooms.store().stored().unwrap();
        assert_eq!(stored.get(A).unwrap().games_played, 1);

        rooms.on_command("/end_game", ROOM, actor(ADMIN)).await;
        assert_eq!(rooms.registry().get(A).unwrap().games_played, 1);
        assert_eq!(rooms.tunnel().broadcasts_containing("Game over"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_end_mid_question() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A, B]).await;
        let shown = presented_at(&rooms).await;
        rooms
            .on_answer_callback(ROOM, A, "answer_a", shown + Duration::from_secs(1))
            .await;

        rooms.on_command("/end_game", ROOM, actor(ADMIN)).await;

        assert_eq!(rooms.inspect(ROOM, Game::was_forced).await, Some(true));
        assert!(rooms.tunnel().sent().contains(&Sent::DeleteTracked));
        assert_eq!(rooms.registry().get(A).unwrap().total_points, 4);
        assert_eq!(rooms.registry().get(B).unwrap().games_played, 1);

        rooms
            .on_answer_callback(ROOM, B, "answer_a", shown + Duration::from_secs(2))
            .await;
        assert!(rooms.tunnel().notices(B).last().unwrap().contains("over"));

        // the cancelled deadline never fires into the ended game
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(rooms.inspect(ROOM, Game::current_index).await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_admin_cannot_start() {
        let rooms = rooms_with(0);
        rooms.on_command("/start_trivia", ROOM, actor(A)).await;
        rooms.on_command("/join_trivia", ROOM, actor(A)).await;
        rooms.on_command("/start_game", ROOM, actor(A)).await;

        assert_eq!(rooms.inspect(ROOM, Game::phase).await, Some(Phase::Announced));
        assert!(rooms.tunnel().notices(A).last().unwrap().contains("Only admins"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_empty_roster_is_reported() {
        let rooms = rooms_with(0);
        rooms.on_command("/start_trivia", ROOM, actor(ADMIN)).await;
        rooms.on_command("/start_game", ROOM, actor(ADMIN)).await;

        assert_eq!(rooms.inspect(ROOM, Game::phase).await, Some(Phase::Announced));
        assert!(
            rooms.tunnel().notices(ADMIN).last().unwrap().contains("no players")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_keeps_roster() {
        let rooms = rooms_with(1);
        rooms.on_command("/start_trivia", ROOM, actor(ADMIN)).await;
        rooms.on_command("/join_trivia", ROOM, actor(A)).await;

        rooms.on_command("/start_game", ROOM, actor(ADMIN)).await;
        assert_eq!(rooms.inspect(ROOM, Game::phase).await, Some(Phase::Announced));
        assert_eq!(rooms.tunnel().broadcasts_containing("Couldn't fetch"), 1);

        rooms.on_command("/start_game", ROOM, actor(ADMIN)).await;
        assert_eq!(rooms.inspect(ROOM, Game::phase).await, Some(Phase::Active));
        assert_eq!(rooms.inspect(ROOM, |g| g.roster().len()).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_does_not_stop_the_game() {
        let rooms = rooms_with(0);
        rooms.store().set_failing(true);
        running_game(&rooms, &[A]).await;

        rooms.on_command("/end_game", ROOM, actor(ADMIN)).await;

        assert_eq!(rooms.inspect(ROOM, Game::is_ended).await, Some(true));
        assert!(rooms.store().stored().is_none());
        assert_eq!(rooms.registry().get(A).unwrap().games_played, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_announce_is_rejected_while_running() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A]).await;
        let id = rooms.inspect(ROOM, Game::id).await;

        rooms.on_command("/start_trivia", ROOM, actor(ADMIN)).await;

        assert_eq!(rooms.inspect(ROOM, Game::id).await, id);
        assert!(
            rooms
                .tunnel()
                .notices(ADMIN)
                .last()
                .unwrap()
                .contains("announce")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_without_game() {
        let rooms = rooms_with(0);
        rooms.on_command("/join_trivia", ROOM, actor(A)).await;
        rooms.on_command("/players", ROOM, actor(A)).await;
        rooms
            .on_answer_callback(ROOM, A, "answer_a", SystemTime::now())
            .await;

        let notices = rooms.tunnel().notices(A);
        assert_eq!(notices.len(), 3);
        assert!(notices.iter().all(|n| n.contains("/start_trivia")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_room_gets_no_slot() {
        let rooms = rooms_with(0);
        rooms.on_command("/join_trivia", ROOM, actor(A)).await;
        for command in ["/start_game", "/next_game", "/end_game", "/players", "/leaderboard"] {
            rooms.on_command(command, ROOM, actor(ADMIN)).await;
        }
        rooms
            .on_answer_callback(ROOM, A, "answer_a", SystemTime::now())
            .await;
        let alarm: AlarmMessage = game::Deadline {
            index: 0,
            presented_at: SystemTime::now(),
        }
        .into();
        rooms
            .fire(ROOM, GameId::new(), CancellationToken::new(), alarm)
            .await;

        assert!(rooms.inner.rooms.is_empty());
        assert_eq!(rooms.tunnel().notices(ADMIN).len(), 4);
        assert_eq!(rooms.tunnel().notices(A).len(), 2);

        rooms.on_command("/start_trivia", ROOM, actor(ADMIN)).await;
        assert_eq!(rooms.inner.rooms.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_games_ending_together_are_all_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        let rooms = Rooms::new(
            SharedTunnel::default(),
            FixedSource {
                questions: three_questions(),
                failures: AtomicU32::new(0),
            },
            Admins(HashSet::from([ADMIN])),
            JsonFileStore::new(&path),
            Settings::default(),
        );

        let count = 16_i64;
        for raw in 0..count {
            let room = RoomId::new(raw);
            rooms.on_command("/start_trivia", room, actor(ADMIN)).await;
            rooms
                .on_command("/join_trivia", room, actor(Id::new(100 + raw)))
                .await;
            rooms.on_command("/start_game", room, actor(ADMIN)).await;
        }

        let endings = (0..count)
            .map(|raw| {
                let rooms = rooms.clone();
                tokio::spawn(async move {
                    rooms
                        .on_command("/end_game", RoomId::new(raw), actor(ADMIN))
                        .await;
                })
            })
            .collect_vec();
        for ending in endings {
            ending.await.unwrap();
        }

        let stored = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(stored.len(), 16);
        assert_eq!(stored, rooms.registry());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaderboard_and_players() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A, B]).await;
        rooms.on_command("/players", ROOM, actor(A)).await;
        assert_eq!(rooms.tunnel().broadcasts_containing("👥 2 players:"), 1);

        rooms.on_command("/end_game", ROOM, actor(ADMIN)).await;
        rooms.on_command("/leaderboard", ROOM, actor(A)).await;
        assert_eq!(
            rooms
                .tunnel()
                .broadcasts_containing("Total registered players: 2"),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_callback_payload_is_ignored() {
        let rooms = rooms_with(0);
        running_game(&rooms, &[A]).await;
        let before = rooms.tunnel().sent().len();

        rooms
            .on_answer_callback(ROOM, A, "explain", SystemTime::now())
            .await;

        assert_eq!(rooms.tunnel().sent().len(), before);
        assert_eq!(rooms.inspect(ROOM, Game::attempted_count).await, Some(0));
    }
}
