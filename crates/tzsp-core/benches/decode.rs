use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tzsp_core::tzsp::decode_frame;
use tzsp_core::RingBuffer;

fn datagram() -> Vec<u8> {
    let mut bytes = vec![0x01, 0x00, 0x00, 0x01];
    bytes.extend_from_slice(&[0x00, 0x00, 0x0A, 0x04, 1, 2, 3, 4, 0x28, 0x00, 0x01]);
    bytes.extend(std::iter::repeat(0x5A).take(1500));
    bytes
}

fn bench_decode(c: &mut Criterion) {
    let bytes = datagram();
    c.bench_function("decode_frame 1500", |b| {
        b.iter(|| decode_frame(black_box(&bytes)))
    });
}

fn bench_ring_buffer(c: &mut Criterion) {
    let buffer = RingBuffer::new(1024).unwrap();
    c.bench_function("ring_buffer enqueue+dequeue", |b| {
        b.iter(|| {
            buffer.enqueue(black_box(42u64));
            buffer.dequeue()
        })
    });
}

criterion_group!(benches, bench_decode, bench_ring_buffer);
criterion_main!(benches);
