//! End-to-end client benchmarks against an in-process echo server.

use cproto_client::{args, Args, Client, ClientError, CmdCode, Connection, ConnectionConfig};
use cproto_protocol::{CallBody, Decoder, Encoder, Status};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Answers every call by echoing its arguments.
fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || echo(stream));
        }
    });
    addr
}

fn echo(mut stream: TcpStream) {
    stream.set_nodelay(true).ok();
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut out = Vec::new();
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        while let Ok(Some(frame)) = decoder.decode_frame() {
            let args = CallBody::parse(&frame.body).map(|c| c.args).unwrap_or_default();
            let response =
                Encoder::encode_response(frame.command, frame.seq, &Status::ok(), &args).unwrap();
            out.extend_from_slice(&response);
        }
        if stream.write_all(&out).is_err() {
            return;
        }
        out.clear();
    }
}

fn config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(addr)
        .with_keep_alive_interval(Duration::ZERO)
        .with_deadline_check_interval(Duration::from_millis(100))
        .with_max_pending_calls(1024)
}

fn bench_sync_ping(c: &mut Criterion) {
    let addr = start_echo_server();
    let conn = Connection::new(config(addr));
    conn.call_sync(CmdCode::Ping, Duration::ZERO, &args![]).unwrap();

    let mut group = c.benchmark_group("e2e_sync");
    group.throughput(Throughput::Elements(1));
    group.bench_function("ping", |b| {
        b.iter(|| black_box(conn.call_sync(CmdCode::Ping, Duration::from_secs(5), &args![]).unwrap()));
    });
    group.finish();
}

fn bench_async_select(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let addr = start_echo_server();
    let client = Client::new(config(addr));
    rt.block_on(client.connect()).unwrap();

    let mut group = c.benchmark_group("e2e_async_call");
    for size in [100, 10000] {
        let payload: Args = args!["x".repeat(size)];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| {
                let client = &client;
                let args = payload.clone();
                async move { black_box(client.call(CmdCode::Select, args).await.unwrap()) }
            });
        });
    }
    group.finish();
}

fn bench_pipelined(c: &mut Criterion) {
    let addr = start_echo_server();
    let conn = Arc::new(Connection::new(config(addr)));
    conn.call_sync(CmdCode::Ping, Duration::ZERO, &args![]).unwrap();

    const THREADS: usize = 8;
    const CALLS: usize = 100;
    let mut group = c.benchmark_group("e2e_pipelined");
    group.throughput(Throughput::Elements((THREADS * CALLS) as u64));
    group.bench_function("8_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let conn = conn.clone();
                    thread::spawn(move || {
                        let mut done = 0;
                        while done < CALLS {
                            match conn.call_sync(CmdCode::Ping, Duration::from_secs(5), &args![]) {
                                Ok(_) => done += 1,
                                Err(ClientError::Busy { .. }) => thread::yield_now(),
                                Err(e) => panic!("ping failed: {}", e),
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_sync_ping, bench_async_select, bench_pipelined);

criterion_main!(benches);
