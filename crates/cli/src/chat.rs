use std::io::Write;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use tokio::time::Instant;

use opencode2go_client::{
    Command, ConnectionStatus, ConversationController, Driver, MessageTimeline, SendOutcome,
    SessionStore,
};
use opencode2go_core::{Message, PartFilter, PartKind, Role, SessionKey, visible_messages};

use crate::context::{Connection, Context};
use crate::output::{Transcript, render_message};

/// Provider, model and mode overrides for one send.
#[derive(Debug, Default)]
pub struct Selection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub mode: Option<String>,
}

/// How long `send --wait` keeps streaming.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    /// Stop after this long without stream activity once a reply arrived.
    pub idle: Duration,
    pub timeout: Duration,
}

pub fn parse_kind(value: &str) -> Result<PartKind, String> {
    PartKind::from_wire(value.trim()).ok_or_else(|| {
        let known: Vec<&str> = PartKind::FILTERABLE.iter().map(|k| k.as_str()).collect();
        format!("unknown part kind `{value}` (expected one of {})", known.join(", "))
    })
}

/// Print a session's history. Read-only, so no controller or event stream
/// is involved.
pub async fn history(ctx: &Context, session_id: Option<&str>, kinds: &[PartKind]) -> Result<()> {
    let endpoint = ctx.reachable_endpoint().await?;
    let transport = ctx.transport.as_ref();
    let mut sessions = SessionStore::new();
    sessions.load_sessions(transport, &endpoint).await;
    let session_id = match session_id {
        Some(id) if sessions.get(&SessionKey::new(&endpoint.id, id)).is_some() => id.to_string(),
        Some(id) => bail!("Unknown session {id}"),
        None => match sessions.most_recent(&endpoint.id) {
            Some(session) => session.id.clone(),
            None => bail!("No sessions on this server; create one with `opencode2go new`"),
        },
    };

    let filter = if kinds.is_empty() {
        ctx.settings().part_filter().clone()
    } else {
        PartFilter::only(kinds.iter().copied())
    };
    let mut timeline = MessageTimeline::new();
    let history = timeline.load_history(transport, &endpoint, &session_id).await;
    let messages = visible_messages(&history, &filter);
    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }
    for message in &messages {
        println!("{}", render_message(message));
    }
    Ok(())
}

fn apply_selection(controller: &mut ConversationController, selection: &Selection) -> Result<()> {
    if let Some(provider) = &selection.provider
        && !controller.select_provider(provider)
    {
        bail!("Unknown provider {provider}; see `opencode2go providers`");
    }
    if let Some(model) = &selection.model
        && !controller.select_model(model)
    {
        bail!("Unknown model {model} for the selected provider");
    }
    if let Some(mode) = &selection.mode
        && !controller.select_mode(mode)
    {
        bail!("Unknown mode {mode}; see `opencode2go modes`");
    }
    Ok(())
}

pub async fn send(
    ctx: &Context,
    session_id: Option<&str>,
    text: &str,
    selection: &Selection,
    wait: Option<WaitPolicy>,
) -> Result<()> {
    let mut conn = Connection::open(ctx).await?;
    conn.select(session_id).await?;
    apply_selection(&mut conn.controller, selection)?;

    let result = conn.controller.send(text);
    conn.apply(result).await?;
    let message_id = match conn.controller.last_send() {
        Some(SendOutcome::Sent { message_id }) => message_id.clone(),
        Some(SendOutcome::Failed { error, .. }) => bail!("Failed to send: {error}"),
        None => bail!("Message was not sent"),
    };

    let Some(policy) = wait else {
        println!("Sent {message_id}");
        return Ok(());
    };
    let mut transcript = Transcript::default();
    transcript.mark_seen(&conn.controller.visible_messages());
    let deadline = Instant::now() + policy.timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            eprintln!("Stopped waiting after {}s", policy.timeout.as_secs());
            break;
        }
        match tokio::time::timeout(policy.idle.min(remaining), conn.pump()).await {
            Ok(true) => {
                print_flush(&transcript.update(&conn.controller.visible_messages()))?;
                if let ConnectionStatus::Unreachable(reason) = conn.controller.status() {
                    bail!("Lost the server: {reason}");
                }
            }
            Ok(false) => break,
            Err(_) if replied(&conn.controller.visible_messages(), &message_id) => break,
            Err(_) => {}
        }
    }
    Ok(())
}

/// An assistant message follows the sent one.
fn replied(messages: &[Message], message_id: &str) -> bool {
    messages
        .iter()
        .skip_while(|m| m.id != message_id)
        .skip(1)
        .any(|m| m.role == Role::Assistant)
}

/// Follow a session live until interrupted.
pub async fn watch(ctx: &Context, session_id: Option<&str>) -> Result<()> {
    let endpoint = ctx.active_endpoint()?;
    let (handle, task) = Driver::new(ctx.controller(), ctx.runner()).spawn();

    let connected = handle
        .wait_for(|s| {
            matches!(
                s.status,
                ConnectionStatus::Connected | ConnectionStatus::Unreachable(_)
            )
        })
        .await?;
    if let ConnectionStatus::Unreachable(reason) = &connected.status {
        bail!("{} is unreachable: {reason}", endpoint.url());
    }
    let wanted = session_id.map(|id| SessionKey::new(&endpoint.id, id));
    if let Some(id) = session_id {
        handle.send(Command::SelectSession(id.to_string())).await?;
    }

    eprintln!("Watching {} (Ctrl-C to stop)", endpoint.url());
    let mut snapshots = handle.watch();
    let mut transcript = Transcript::default();
    let mut current: Option<SessionKey> = None;
    let mut status = connected.status;
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.status != status {
            eprintln!("[{}]", snapshot.status.label());
            status = snapshot.status.clone();
        }
        let showing = wanted.is_none() || snapshot.current_session == wanted;
        if showing && snapshot.current_session != current {
            current = snapshot.current_session.clone();
            transcript.reset();
            if let Some(key) = &current {
                println!("══ session {} ══", key.session_id);
            }
        }
        if showing {
            print_flush(&transcript.update(&snapshot.messages))?;
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.send(Command::Shutdown).await.ok();
    task.await.context("driver task failed")?;
    Ok(())
}

fn print_flush(text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
