//! Two clients on one in-process authority: send, kill the live channel, keep
//! talking through the outage, and check that both sides converge without
//! duplicates.

use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use murmur_core::{
    init_logging, ConnectionState, ConversationId, InProcessAuthority, SyncConfig, SyncEngine,
    UserId,
};
use murmur_memory_storage::MurmurMemoryStorage;
use murmur_sqlite_storage::MurmurSqliteStorage;
use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::{SyncStorageProvider, Timestamp};

#[derive(Debug, Clone)]
struct Opts {
    data_dir: Option<String>,
    messages: usize,
}

fn usage() {
    eprintln!(
        "usage: cargo run -p murmur_core --bin murmur-sim -- \
  [--data-dir <dir>] \
  [--messages 5]"
    );
}

fn parse_opts() -> anyhow::Result<Opts> {
    let mut data_dir: Option<String> = None;
    let mut messages: usize = 5;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-dir" => {
                let v = args
                    .next()
                    .context("missing value after --data-dir")?
                    .trim()
                    .to_string();
                if v.is_empty() {
                    anyhow::bail!("--data-dir cannot be empty");
                }
                data_dir = Some(v);
            }
            "--messages" => {
                let raw = args.next().context("missing value after --messages")?;
                messages = raw
                    .parse::<usize>()
                    .with_context(|| format!("invalid --messages value: {raw}"))?;
            }
            "-h" | "--help" => {
                usage();
                std::process::exit(0);
            }
            other => {
                usage();
                anyhow::bail!("unknown argument: {other}");
            }
        }
    }
    Ok(Opts { data_dir, messages })
}

fn sim_config() -> SyncConfig {
    SyncConfig {
        disable_network: Some(false),
        heartbeat_interval_ms: 100,
        degraded_after_ms: 300,
        dead_after_ms: 500,
        connect_timeout_ms: 1_000,
        request_timeout_ms: 1_000,
        reconnect_backoff_base_ms: 100,
        reconnect_backoff_max_ms: 1_000,
        send_backoff_base_ms: 100,
        send_backoff_max_ms: 1_000,
        outbox_poll_interval_ms: 200,
        ..SyncConfig::default()
    }
}

async fn wait_for(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) -> anyhow::Result<()> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    anyhow::bail!("{what}: not reached within {timeout:?}")
}

fn count_messages<S: SyncStorageProvider + Send + Sync + 'static>(
    engine: &SyncEngine<S>,
    conversation_id: &ConversationId,
) -> usize {
    engine
        .messages(conversation_id, None)
        .map(|m| m.len())
        .unwrap_or(0)
}

async fn simulate<S>(alice_storage: Arc<S>, bob_storage: Arc<S>, opts: &Opts) -> anyhow::Result<()>
where
    S: SyncStorageProvider + Send + Sync + 'static,
{
    let authority = InProcessAuthority::new();
    let alice = User::new(UserId::from("alice"), "Alice");
    let bob = User::new(UserId::from("bob"), "Bob");
    let general = ConversationId::from("general");
    authority.add_user(alice.clone());
    authority.add_user(bob.clone());
    authority.create_conversation(
        Conversation::new(general.clone(), "General", Timestamp::now()),
        &[alice.id.clone(), bob.id.clone()],
    );

    let config = sim_config();
    let alice_engine = SyncEngine::new(
        alice_storage,
        Arc::new(authority.clone()),
        Arc::new(authority.clone()),
        alice.clone(),
        config.clone(),
    )?;
    let bob_engine = SyncEngine::new(
        bob_storage,
        Arc::new(authority.clone()),
        Arc::new(authority.clone()),
        bob.clone(),
        config,
    )?;
    alice_engine.start().await?;
    bob_engine.start().await?;
    alice_engine.on_foreground();
    bob_engine.on_foreground();

    wait_for("both connected", Duration::from_secs(5), || {
        alice_engine.connection_state() == ConnectionState::Connected
            && bob_engine.connection_state() == ConnectionState::Connected
    })
    .await?;
    tracing::info!("both clients connected");

    for n in 0..opts.messages {
        alice_engine.send(&general, &format!("hello #{n}"))?;
    }
    let expected = opts.messages;
    wait_for("bob receives live", Duration::from_secs(5), || {
        count_messages(&bob_engine, &general) == expected
    })
    .await?;

    let unread = bob_engine.open_conversation(&general)?;
    println!("bob opened #general: {} unread", unread.count);
    bob_engine.mark_conversation_read(&general)?;
    bob_engine.close_conversation(&general);

    println!("killing the live channel");
    authority.kill_live();
    let wake_inbox = authority.wake_inbox(&bob.id);
    for n in 0..opts.messages {
        alice_engine.send(&general, &format!("during outage #{n}"))?;
    }
    let expected = opts.messages * 2;
    wait_for("alice confirms outage sends", Duration::from_secs(5), || {
        alice_engine.pending_sends().map(|n| n == 0).unwrap_or(false)
    })
    .await?;

    // Half of the wake payloads make it; catch-up has to cover the rest
    let payloads: Vec<_> = wake_inbox.try_iter().collect();
    for payload in payloads.iter().step_by(2) {
        let outcome = bob_engine.handle_wake(payload).await;
        tracing::info!(?outcome, "bob handled wake");
    }

    wait_for("bob catches up", Duration::from_secs(10), || {
        count_messages(&bob_engine, &general) == expected
    })
    .await?;

    let ids: HashSet<_> = bob_engine
        .messages(&general, None)?
        .into_iter()
        .map(|m| m.id)
        .collect();
    anyhow::ensure!(ids.len() == expected, "bob holds duplicate rows");
    anyhow::ensure!(
        count_messages(&alice_engine, &general) == expected,
        "alice diverged"
    );

    println!(
        "converged: alice={} bob={} remote={} bob_unread={}",
        count_messages(&alice_engine, &general),
        count_messages(&bob_engine, &general),
        authority.messages_in(&general).len(),
        bob_engine.unread(&general)?.count,
    );

    alice_engine.stop();
    bob_engine.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = parse_opts()?;
    init_logging(opts.data_dir.as_deref());

    match &opts.data_dir {
        Some(dir) => {
            let alice = MurmurSqliteStorage::new(std::path::Path::new(dir).join("alice.sqlite"))
                .context("open alice store")?;
            let bob = MurmurSqliteStorage::new(std::path::Path::new(dir).join("bob.sqlite"))
                .context("open bob store")?;
            simulate(Arc::new(alice), Arc::new(bob), &opts).await
        }
        None => {
            simulate(
                Arc::new(MurmurMemoryStorage::new()),
                Arc::new(MurmurMemoryStorage::new()),
                &opts,
            )
            .await
        }
    }
}
