use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ircd_codec::irc::{encode_line, FrameReader};

fn bench_encode(c: &mut Criterion) {
    c.bench_function("irc_encode_line", |b| {
        let mut buf = BytesMut::new();
        b.iter(|| {
            buf.clear();
            encode_line(&mut buf, black_box("PRIVMSG #dev :hello there, everyone"));
        })
    });
}

fn bench_frame_reader(c: &mut Criterion) {
    c.bench_function("irc_frame_reader", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            reader.feed(black_box(b"NICK alice\r\nUSER alice 0 * :Alice Example\r\n"));
            while reader.next_line().unwrap().is_some() {}
        })
    });
}

criterion_group!(benches, bench_encode, bench_frame_reader);
criterion_main!(benches);
