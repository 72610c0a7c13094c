//! Single task owning a [`ConversationController`].
//!
//! UI commands, event-stream items, finished effects and the discovery tick
//! are multiplexed with `tokio::select!`; effects run concurrently on a
//! `JoinSet`. After every step the new state is published on a `watch`
//! channel.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use opencode2go_api_client::StreamItem;
use opencode2go_core::{PartFilter, PermissionSettings};

use crate::controller::{ControllerResult, ControllerSnapshot, ConversationController};
use crate::effects::{Effect, EffectRunner, Reply, Subscription};

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ActivateEndpoint(String),
    SelectSession(String),
    CreateSession,
    DeleteSession(String),
    Send(String),
    SelectProvider(String),
    SelectModel(String),
    SelectMode(String),
    SetFilter(PartFilter),
    SetPermissions(PermissionSettings),
    RefreshSessions,
    Discover,
    Shutdown,
}

#[derive(Debug, Error)]
#[error("driver has stopped")]
pub struct DriverStopped;

/// Cloneable handle to a running driver.
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ControllerSnapshot>,
}

impl DriverHandle {
    pub async fn send(&self, command: Command) -> Result<(), DriverStopped> {
        self.commands.send(command).await.map_err(|_| DriverStopped)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&ControllerSnapshot) -> bool,
    ) -> Result<ControllerSnapshot, DriverStopped> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx.wait_for(predicate).await.map_err(|_| DriverStopped)?;
        Ok(snapshot.clone())
    }
}

pub struct Driver {
    controller: ConversationController,
    runner: EffectRunner,
    discovery_interval: Option<Duration>,
}

impl Driver {
    pub fn new(controller: ConversationController, runner: EffectRunner) -> Self {
        Self {
            controller,
            runner,
            discovery_interval: None,
        }
    }

    /// Run discovery every `interval`; zero disables it.
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Start the loop on the current runtime. The task hands the controller
    /// back when it stops.
    pub fn spawn(self) -> (DriverHandle, JoinHandle<ConversationController>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(self.controller.snapshot());
        let task = tokio::spawn(self.run(command_rx, snapshot_tx));
        (
            DriverHandle {
                commands: command_tx,
                snapshots: snapshot_rx,
            },
            task,
        )
    }

    /// Runs until `Shutdown` or until every command sender is gone.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        snapshots: watch::Sender<ControllerSnapshot>,
    ) -> ConversationController {
        let mut tasks: JoinSet<Reply> = JoinSet::new();
        let mut subscription: Option<Subscription> = None;
        let mut discovery = self.discovery_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let effects = self.controller.start();
        self.dispatch(effects, &mut tasks, &mut subscription);
        self.publish(&snapshots);

        loop {
            let effects = tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.apply(command),
                },
                (epoch, item) = next_item(&mut subscription) => match item {
                    Some(item) => self.controller.handle_stream_item(epoch, item),
                    None => {
                        self.controller.subscription_closed(epoch);
                        subscription = None;
                        Vec::new()
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(reply) => self.controller.handle_reply(reply),
                    Err(e) => {
                        warn!("effect task failed: {e}");
                        Vec::new()
                    }
                },
                () = tick(&mut discovery) => self.controller.discover(),
            };
            self.dispatch(effects, &mut tasks, &mut subscription);
            self.publish(&snapshots);
        }

        debug!("driver stopping with {} effects in flight", tasks.len());
        tasks.abort_all();
        self.controller
    }

    fn apply(&mut self, command: Command) -> Vec<Effect> {
        let controller = &mut self.controller;
        let result: ControllerResult<Vec<Effect>> = match command {
            Command::ActivateEndpoint(id) => controller.activate_endpoint(&id),
            Command::SelectSession(id) => controller.select_session(&id),
            Command::CreateSession => controller.create_session(),
            Command::DeleteSession(id) => controller.delete_session(&id),
            Command::Send(text) => controller.send(&text),
            Command::SetPermissions(settings) => controller.set_permissions(settings),
            Command::RefreshSessions => controller.refresh_sessions(),
            Command::Discover => Ok(controller.discover()),
            Command::SelectProvider(id) => {
                selection(controller.select_provider(&id), "provider", &id)
            }
            Command::SelectModel(id) => selection(controller.select_model(&id), "model", &id),
            Command::SelectMode(name) => selection(controller.select_mode(&name), "mode", &name),
            Command::SetFilter(filter) => {
                controller.set_filter(filter);
                Ok(Vec::new())
            }
            Command::Shutdown => Ok(Vec::new()),
        };
        result.unwrap_or_else(|e| {
            warn!("command rejected: {e}");
            Vec::new()
        })
    }

    fn dispatch(
        &self,
        effects: Vec<Effect>,
        tasks: &mut JoinSet<Reply>,
        subscription: &mut Option<Subscription>,
    ) {
        for effect in effects {
            match effect {
                Effect::Subscribe { epoch, endpoint } => {
                    *subscription = Some(self.runner.subscribe(epoch, &endpoint));
                }
                Effect::Unsubscribe => *subscription = None,
                Effect::Call(call) => {
                    let runner = self.runner.clone();
                    tasks.spawn(async move { runner.call(call).await });
                }
            }
        }
    }

    fn publish(&self, snapshots: &watch::Sender<ControllerSnapshot>) {
        let snapshot = self.controller.snapshot();
        snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

fn selection(accepted: bool, what: &str, id: &str) -> ControllerResult<Vec<Effect>> {
    if !accepted {
        warn!("unknown {what}: {id}");
    }
    Ok(Vec::new())
}

async fn next_item(subscription: &mut Option<Subscription>) -> (u64, Option<StreamItem>) {
    match subscription {
        Some(sub) => (sub.epoch, sub.next().await),
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
