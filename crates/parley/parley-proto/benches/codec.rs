use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use parley_proto::Frame;

const CHAT: &str = r#"{"user":"alice","time":"2024-05-06T07:08:09","text":"hello everyone, how is it going?"}"#;

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_codec");
    group.throughput(Throughput::Elements(1));

    group.bench_with_input(BenchmarkId::new("decode", "chat"), &CHAT, |b, line| {
        b.iter(|| Frame::decode(black_box(line)).expect("decode failed"));
    });

    let frame = Frame::decode(CHAT).expect("decode failed");
    group.bench_with_input(BenchmarkId::new("encode", "chat"), &frame, |b, frame| {
        b.iter(|| black_box(frame).encode().expect("encode failed"));
    });

    let users: Vec<String> = (0..32).map(|i| format!("user_{i}")).collect();
    let list = Frame::user_list(users);
    group.bench_with_input(BenchmarkId::new("encode", "userlist_32"), &list, |b, frame| {
        b.iter(|| black_box(frame).encode().expect("encode failed"));
    });

    group.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
