//! Benchmarks for binlog event decoding and packet framing.
//!
//! Run with: `cargo bench --bench decoder_bench`

use std::io::Cursor;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use mysqlwire_replication::binlog::{ChecksumAlgorithm, DecoderState, decode_event};
use mysqlwire_replication::protocol::PacketTransport;

const TABLE_MAP: u8 = 19;
const WRITE_ROWS_V2: u8 = 30;
const QUERY: u8 = 2;

/// Status byte, event header, body and CRC32 trailer.
fn make_event(type_code: u8, next_position: u32, body: &[u8]) -> Vec<u8> {
    let size = (19 + body.len() + 4) as u32;
    let mut event = Vec::with_capacity(size as usize);
    event.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    event.push(type_code);
    event.extend_from_slice(&1u32.to_le_bytes());
    event.extend_from_slice(&size.to_le_bytes());
    event.extend_from_slice(&next_position.to_le_bytes());
    event.extend_from_slice(&0u16.to_le_bytes());
    event.extend_from_slice(body);
    let crc = crc32fast::hash(&event);
    event.extend_from_slice(&crc.to_le_bytes());

    let mut packet = vec![0u8];
    packet.extend_from_slice(&event);
    packet
}

/// Table map for `(id INT, name VARCHAR(40), price DECIMAL(10,2), created DATETIME(6))`.
fn make_table_map() -> Vec<u8> {
    let types = [3u8, 15, 246, 18];
    let meta = [40u8, 0, 10, 2, 6];
    let mut b = 42u64.to_le_bytes()[..6].to_vec();
    b.extend_from_slice(&1u16.to_le_bytes());
    b.push(4);
    b.extend_from_slice(b"shop\0");
    b.push(5);
    b.extend_from_slice(b"items\0");
    b.push(types.len() as u8);
    b.extend_from_slice(&types);
    b.push(meta.len() as u8);
    b.extend_from_slice(&meta);
    b.push(0x0F);
    make_event(TABLE_MAP, 400, &b)
}

fn make_write_rows(rows: usize) -> Vec<u8> {
    let mut b = 42u64.to_le_bytes()[..6].to_vec();
    b.extend_from_slice(&1u16.to_le_bytes());
    b.extend_from_slice(&2u16.to_le_bytes());
    b.push(4);
    b.push(0x0F);
    for i in 0..rows {
        b.push(0);
        b.extend_from_slice(&(i as i32).to_le_bytes());
        let name = format!("item-{i:06}");
        b.push(name.len() as u8);
        b.extend_from_slice(name.as_bytes());
        // DECIMAL(10,2) 1234.56
        b.extend_from_slice(&[0x80, 0x00, 0x04, 0xD2, 0x38]);
        // DATETIME(6) 2024-05-17 10:30:00.123456
        b.extend_from_slice(&[0x99, 0xB3, 0x62, 0xA7, 0x80, 0x01, 0xE2, 0x40]);
    }
    make_event(WRITE_ROWS_V2, 4000, &b)
}

fn make_query(sql: &str) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&77u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.push(4);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(b"shop\0");
    b.extend_from_slice(sql.as_bytes());
    make_event(QUERY, 900, &b)
}

fn shop_state() -> DecoderState {
    let mut state = DecoderState::new(ChecksumAlgorithm::Crc32);
    decode_event(&make_table_map(), &mut state).expect("table map decodes");
    state
}

fn bench_decode_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_write_rows");

    for rows in [1, 16, 256, 1024] {
        let packet = make_write_rows(rows);
        let mut state = shop_state();
        group.throughput(Throughput::Bytes(packet.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &packet, |b, packet| {
            b.iter(|| decode_event(black_box(packet), &mut state));
        });
    }

    group.finish();
}

fn bench_decode_table_map(c: &mut Criterion) {
    let packet = make_table_map();
    let mut state = DecoderState::new(ChecksumAlgorithm::Crc32);

    c.bench_function("decode_table_map", |b| {
        b.iter(|| decode_event(black_box(&packet), &mut state));
    });
}

fn bench_decode_query(c: &mut Criterion) {
    let packet = make_query("ALTER TABLE items ADD COLUMN note TEXT NULL AFTER price");
    let mut state = DecoderState::new(ChecksumAlgorithm::Crc32);

    c.bench_function("decode_query", |b| {
        b.iter(|| decode_event(black_box(&packet), &mut state));
    });
}

fn bench_read_frames(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("read_frames");

    for size in [64usize, 1024, 16384] {
        let mut wire = Vec::new();
        for seq in 0..64u8 {
            wire.extend_from_slice(&(size as u32).to_le_bytes()[..3]);
            wire.push(seq);
            wire.extend(std::iter::repeat_n(0x42u8, size));
        }
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.to_async(&rt).iter(|| async {
                let mut transport = PacketTransport::new(Cursor::new(wire.clone()));
                for _ in 0..64 {
                    black_box(transport.read().await.expect("frame"));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_rows,
    bench_decode_table_map,
    bench_decode_query,
    bench_read_frames
);
criterion_main!(benches);
