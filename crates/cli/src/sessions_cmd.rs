use anyhow::{Context as _, Result, bail};

use opencode2go_client::SessionStore;
use opencode2go_core::{Session, SessionKey};

use crate::context::{Connection, Context};
use crate::output::{session_line, session_tree};

/// List sessions of the active server, or of every known server with `all`.
pub async fn list(ctx: &Context, all: bool, tree: bool) -> Result<()> {
    let sessions: Vec<Session> = if all {
        let endpoints = ctx.registry().list();
        let mut store = SessionStore::new();
        store.load_all_sessions(ctx.transport.as_ref(), &endpoints).await
    } else {
        let conn = Connection::open(ctx).await?;
        let active = ctx.active_endpoint()?;
        conn.controller
            .sessions()
            .sessions_for(&active.id)
            .cloned()
            .collect()
    };

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    let lines = if tree && !all {
        session_tree(&sessions)
    } else {
        sessions
            .iter()
            .map(|s| session_line(s, 0, all))
            .collect()
    };
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

pub async fn create(ctx: &Context) -> Result<()> {
    let endpoint = ctx.reachable_endpoint().await?;
    let mut store = SessionStore::new();
    let session = store
        .create(ctx.transport.as_ref(), &endpoint)
        .await
        .with_context(|| format!("{} did not create a session", endpoint.url()))?;
    println!("{}", session.id);
    Ok(())
}

pub async fn delete(ctx: &Context, session_id: &str) -> Result<()> {
    let endpoint = ctx.reachable_endpoint().await?;
    let transport = ctx.transport.as_ref();
    let mut store = SessionStore::new();
    store.load_sessions(transport, &endpoint).await;
    if store.get(&SessionKey::new(&endpoint.id, session_id)).is_none() {
        bail!("Unknown session {session_id}");
    }
    if !store.delete(transport, &endpoint, session_id).await {
        bail!("The server refused to delete {session_id}");
    }
    println!("Deleted {session_id}");
    Ok(())
}
