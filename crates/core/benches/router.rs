use std::net::SocketAddr;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ircd_core::link::{Link, LinkId, Role};
use ircd_core::registry::{AuditLog, Registry};
use ircd_core::router::{self, Source};
use ircd_core::sendq::Pool;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn populated_channel(members: usize) -> (Registry, std::sync::Arc<Pool>, LinkId) {
    let pool = Pool::new();
    let class = pool.register_class("clients", u64::MAX);
    let mut reg = Registry::new(AuditLog::new("/tmp/bench-userlog", "/tmp/bench-connlog"));

    let mut first = None;
    for i in 0..members {
        let id = reg.insert(|id| {
            let mut link = Link::new(id, Role::Client, addr(6000 + i as u16), "irc.example.".into());
            link.class = Some(class.clone());
            link
        });
        reg.set_nickname(id, format!("user{i}"));
        reg.channel_or_create("#bench").join(id);
        first.get_or_insert(id);
    }

    (reg, pool, first.unwrap())
}

fn bench_channel_fanout(c: &mut Criterion) {
    let (mut reg, pool, origin) = populated_channel(200);
    let source = Source::from_link(&reg, origin).unwrap();

    c.bench_function("router_send_channel_except_200", |b| {
        b.iter(|| {
            router::send_channel_except(&mut reg, &pool, origin, &source, "#bench", black_box("PRIVMSG #bench :hi"));
        })
    });
}

fn bench_common_channels(c: &mut Criterion) {
    let (mut reg, pool, user) = populated_channel(200);

    c.bench_function("router_send_common_channels_200", |b| {
        b.iter(|| {
            router::send_common_channels(&mut reg, &pool, user, black_box("PING :keepalive"));
        })
    });
}

criterion_group!(benches, bench_channel_fanout, bench_common_channels);
criterion_main!(benches);
