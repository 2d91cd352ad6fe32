use crate::config::Config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::interval;

use codec::irc::FrameReader;
use engine::auth::ident;
use engine::error::ExitCode;
use engine::link::{Link, LinkFlags, LinkId, Role};
use engine::resolver::cache::CacheStats;
use engine::resolver::{Completion, Context};
use engine::router::{self, Source};
use engine::Core;

/// What a per-connection reader task, or an ident probe, reports back to
/// the single task that owns the whole [`Core`].
enum ConnEvent {
    Line(LinkId, String),
    Closed(LinkId, ExitCode),
    Ident(LinkId, Option<ident::IdentResult>),
}

/// Point-in-time counters published for the diagnostics HTTP endpoint.
/// The event loop is the sole writer; readers only ever see a snapshot
/// taken through the lock, never the live `Core`.
#[derive(Default, Clone, serde::Serialize)]
pub struct LiveStats {
    pub links: usize,
    pub server_links: usize,
    pub channels: usize,
    pub pool_bytes: u64,
    pub cache_entries: usize,
    pub cache_stats: CacheStats,
}

pub type SharedStats = Arc<RwLock<LiveStats>>;

pub fn new_shared_stats() -> SharedStats {
    Arc::new(RwLock::new(LiveStats::default()))
}

fn publish_stats(core: &Core, stats: &SharedStats) {
    let mut snapshot = stats.write();
    snapshot.links = core.registry.iter().count();
    snapshot.server_links = core.registry.server_links().count();
    snapshot.channels = core.registry.channels().count();
    snapshot.pool_bytes = core.pool.poolsize();
    snapshot.cache_entries = core.resolver.cache().len();
    snapshot.cache_stats = core.resolver.cache().stats;
}

/// Runs the client and (optional) server listeners, the resolver socket,
/// and the iauth helper pipe, all from one task driving a single owned
/// [`Core`]. No other task ever touches `core` directly; everything else
/// communicates with it through `tx`/`rx`.
pub async fn run(config: Arc<Config>, mut core: Core, stats: SharedStats) -> anyhow::Result<()> {
    let client_listener = TcpListener::bind(config.listen.clients).await?;
    log::info!("ircd listening for clients: addr={}", config.listen.clients);

    let server_listener = if config.listen.servers_enabled {
        let listener = TcpListener::bind(config.listen.servers).await?;
        log::info!("ircd listening for servers: addr={}", config.listen.servers);
        Some(listener)
    } else {
        None
    };

    let (tx, mut rx) = mpsc::channel::<ConnEvent>(1024);
    let mut writers: AHashMap<LinkId, OwnedWriteHalf> = AHashMap::new();
    let mut resolver_tick = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            accepted = client_listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => accept_connection(&mut core, &config, stream, addr, Role::Client, &tx, &mut writers).await,
                    Err(e) => log::warn!("client accept failed: {e}"),
                }
            }
            accepted = accept_optional(&server_listener) => {
                match accepted {
                    Ok((stream, addr)) => accept_connection(&mut core, &config, stream, addr, Role::Server, &tx, &mut writers).await,
                    Err(e) => log::warn!("server accept failed: {e}"),
                }
            }
            Some(event) = rx.recv() => {
                handle_conn_event(&mut core, &mut writers, event);
            }
            result = core.resolver.recv_and_dispatch() => {
                match result {
                    Ok(Some(completion)) => apply_resolver_completion(&mut core, &mut writers, completion),
                    Ok(None) => {}
                    Err(e) => log::warn!("resolver socket error: {e}"),
                }
            }
            _ = resolver_tick.tick() => {
                let (completions, _next) = core.resolver.timeout_tick(Instant::now()).await;
                for completion in completions {
                    apply_resolver_completion(&mut core, &mut writers, completion);
                }
                publish_stats(&core, &stats);
            }
        }
    }
}

async fn accept_optional(listener: &Option<TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn accept_connection(
    core: &mut Core,
    config: &Config,
    stream: TcpStream,
    peer_addr: SocketAddr,
    role: Role,
    tx: &mpsc::Sender<ConnEvent>,
    writers: &mut AHashMap<LinkId, OwnedWriteHalf>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("set_nodelay failed for {peer_addr}: {e}");
    }

    let local_addr = match stream.local_addr() {
        Ok(a) => a,
        Err(e) => {
            log::warn!("local_addr failed for {peer_addr}: {e}");
            return;
        }
    };

    let class_name = match role {
        Role::Server => "servers",
        _ => "clients",
    };
    let class = core.pool.class(class_name);

    let id = core.registry.insert(|id| {
        let mut link = Link::new(id, role, peer_addr, local_addr.ip().to_string());
        link.class = class.clone();
        if matches!(role, Role::Server) {
            link.flags.insert(LinkFlags::BURST);
        }
        link
    });

    log::info!("accepted connection: id={id:?} addr={peer_addr} role={role:?}");

    let (mut read_half, write_half) = stream.into_split();
    writers.insert(id, write_half);

    let reader_tx = tx.clone();
    tokio::spawn(async move {
        let mut framer = FrameReader::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => {
                    let _ = reader_tx.send(ConnEvent::Closed(id, ExitCode::Io)).await;
                    return;
                }
            };
            framer.feed(&buf[..n]);
            loop {
                match framer.next_line() {
                    Ok(Some(line)) => {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        if reader_tx.send(ConnEvent::Line(id, text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        let _ = reader_tx.send(ConnEvent::Closed(id, ExitCode::Io)).await;
                        return;
                    }
                }
            }
        }
        let _ = reader_tx.send(ConnEvent::Closed(id, ExitCode::Reg)).await;
    });

    if let Some(link) = core.registry.get_mut(id) {
        link.flags.insert(LinkFlags::DOING_DNS);
    }
    let _ = core.resolver.gethost_byaddr(peer_addr.ip(), Context::Link(id)).await;

    let mut iauth_pipe_broken = false;
    if let Some(iauth) = core.auth.iauth.as_mut() {
        if iauth
            .notify_connect(id.0, peer_addr.ip(), peer_addr.port(), local_addr.ip(), local_addr.port())
            .await
            .is_err()
        {
            iauth_pipe_broken = true;
        }
    }
    if iauth_pipe_broken {
        core.auth.disable_external_auth();
    }

    if config.auth.ident_enabled {
        if let Some(link) = core.registry.get_mut(id) {
            link.flags.insert(LinkFlags::DOING_AUTH);
        }
        let ident_tx = tx.clone();
        let max_len = config.auth.ident_max_username_len;
        tokio::spawn(async move {
            let result = ident::probe(local_addr, peer_addr.ip(), peer_addr.port(), local_addr.port(), max_len).await;
            let _ = ident_tx.send(ConnEvent::Ident(id, result)).await;
        });
    }
}

fn handle_conn_event(core: &mut Core, writers: &mut AHashMap<LinkId, OwnedWriteHalf>, event: ConnEvent) {
    match event {
        ConnEvent::Line(id, text) => {
            if let Some(link) = core.registry.get_mut(id) {
                link.counters.messages_received += 1;
                link.counters.bytes_received += text.len() as u64;
            }
            // Command dispatch (NICK/USER/JOIN/PRIVMSG/...) lives outside
            // this core; it consumes lines via the registry/router above.
            log::debug!("{id:?} -> {text}");
        }
        ConnEvent::Closed(id, exit_code) => {
            writers.remove(&id);
            finalize_exit(core, id, exit_code);
        }
        ConnEvent::Ident(id, result) => {
            apply_ident_result(core, id, result);
            flush_link(core, writers, id);
        }
    }
}

fn apply_resolver_completion(core: &mut Core, writers: &mut AHashMap<LinkId, OwnedWriteHalf>, completion: Completion) {
    match completion {
        Completion::Resolved { context: Context::Link(id), name, addresses } => {
            if let Some(link) = core.registry.get_mut(id) {
                if addresses.contains(&link.peer_addr.ip()) {
                    link.identity.host = Some(name);
                } else {
                    link.identity.host = Some(link.peer_addr.ip().to_string());
                }
                link.flags.remove(LinkFlags::DOING_DNS);
            }
        }
        Completion::Failed { context: Context::Link(id) } => {
            if let Some(link) = core.registry.get_mut(id) {
                link.identity.host = Some(link.peer_addr.ip().to_string());
                link.flags.remove(LinkFlags::DOING_DNS);
            }
        }
        Completion::Resolved { context: Context::ConfigEntry(name), .. }
        | Completion::Failed { context: Context::ConfigEntry(name) } => {
            log::debug!("resolved configuration entry {name}");
        }
    }
    flush_all_pending(core, writers);
}

fn apply_ident_result(core: &mut Core, id: LinkId, result: Option<ident::IdentResult>) {
    if let Some(link) = core.registry.get_mut(id) {
        link.flags.remove(LinkFlags::DOING_AUTH);
        if let Some(result) = result {
            link.identity.user = Some(result.username);
            if result.trusted {
                link.flags.insert(LinkFlags::GOT_IDENT);
            }
        }
    }
}

/// Closes out a link: marks it dead if it wasn't already, writes the
/// appropriate audit line, and drops its registry entry.
fn finalize_exit(core: &mut Core, id: LinkId, exit_code: ExitCode) {
    let Some(link) = core.registry.get_mut(id) else { return };
    let role = link.role;
    let already_closing = link.flags.contains(LinkFlags::CLOSING);
    let name = link.identity.nickname.clone().unwrap_or_else(|| link.sockhost.clone());
    link.mark_dead(exit_code);

    if matches!(role, Role::Server | Role::Service) && !already_closing {
        router::post_to_flag(
            &mut core.registry,
            &core.pool,
            engine::channel::ServerChannel::Errors,
            &format!("Lost link to {name}: {}", exit_code.label()),
        );
    }

    let source = Source::from_link(&core.registry, id);
    if let Some(link) = core.registry.get(id) {
        if link.is_registered() {
            let now = unix_time();
            core.registry.audit().record_user_exit(
                link.exit_code,
                unix_time_at(link.connect_time, now),
                now,
                link.identity.user.as_deref().unwrap_or("*"),
                link.identity.host.as_deref().unwrap_or("*"),
                link.identity.user.as_deref().unwrap_or("*"),
                &link.peer_addr.ip().to_string(),
                link.peer_addr.port(),
                &link.sockhost,
                link.counters.messages_sent,
                link.counters.bytes_sent,
                link.counters.messages_received,
                link.counters.bytes_received,
            );
        } else {
            core.registry.audit().record_rejected_connection(
                link.exit_code,
                &link.peer_addr.ip().to_string(),
                link.peer_addr.port(),
                "closed before registration",
            );
        }
    }

    if let Some(source) = source {
        router::post_to_flag(
            &mut core.registry,
            &core.pool,
            engine::channel::ServerChannel::Local,
            &format!("Client exiting: {}", source.render()),
        );
    }

    core.registry.remove(id);
    core.resolver.cancel_context(&Context::Link(id));
}

fn flush_link(core: &mut Core, writers: &mut AHashMap<LinkId, OwnedWriteHalf>, id: LinkId) {
    let outcome = match (core.registry.get_mut(id), writers.get(&id)) {
        (Some(link), Some(writer)) => link.flush(writer),
        _ => return,
    };
    if let Err(exit_code) = outcome {
        writers.remove(&id);
        finalize_exit(core, id, exit_code);
    }
}

fn flush_all_pending(core: &mut Core, writers: &mut AHashMap<LinkId, OwnedWriteHalf>) {
    let ids: Vec<LinkId> = writers.keys().copied().collect();
    for id in ids {
        flush_link(core, writers, id);
    }
}

fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn unix_time_at(instant: Instant, now_unix: u64) -> u64 {
    now_unix.saturating_sub(instant.elapsed().as_secs())
}
