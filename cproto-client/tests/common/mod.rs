//! In-process cproto server for integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use cproto_client::{Args, CmdCode, ConnectionConfig, ErrorCode};
use cproto_protocol::{CallBody, Decoder, Encoder, Frame, Status, Variant};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Server start time reported by the mock login reply.
pub const START_TIME: i64 = 1_700_000_000;

/// A decoded call as seen by the server.
#[derive(Debug, Clone)]
pub struct Request {
    pub command: CmdCode,
    pub seq: u32,
    pub args: Args,
    pub exec_timeout_ms: i64,
}

/// What the server does with a call.
pub enum Reply {
    Ok(Args),
    Error(ErrorCode, &'static str),
    /// Never answer.
    Silent,
    /// Answer after a delay.
    Delayed(Duration, Args),
    /// Answer with a sequence number nobody is waiting for.
    WrongSeq(Args),
    /// Send unmatched frames with undecodable bodies, then answer.
    StrayThenOk(Args),
    /// Answer, then push an `Updates` frame.
    OkThenPush(Args, Args),
    /// Close the socket.
    Close,
    /// Write bytes that are not a cproto frame.
    Garbage,
}

type Handler = Arc<dyn Fn(&Request) -> Reply + Send + Sync>;

pub struct MockServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockServer {
    /// Starts a server answering every call through `handler`.
    pub fn start<H>(handler: H) -> Self
    where
        H: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let recorded = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                let handler = handler.clone();
                let recorded = recorded.clone();
                thread::spawn(move || serve(stream, handler, recorded));
            }
        });

        Self { addr, requests }
    }

    /// A server that accepts any login and answers every other call with
    /// `handler`.
    pub fn with_login<H>(handler: H) -> Self
    where
        H: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        Self::start(move |req| match req.command {
            CmdCode::Login => Reply::Ok(login_reply()),
            _ => handler(req),
        })
    }

    /// A server that echoes call arguments back.
    pub fn echo() -> Self {
        Self::with_login(|req| Reply::Ok(req.args.clone()))
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr)
            .with_credentials("admin", "secret")
            .with_database("books")
            .with_login_timeout(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(5))
            .with_deadline_check_interval(Duration::from_millis(20))
            .with_keep_alive_interval(Duration::ZERO)
            .with_max_pending_calls(8)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn count(&self, command: CmdCode) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.command == command)
            .count()
    }
}

pub fn login_reply() -> Args {
    cproto_client::args!["", START_TIME]
}

fn serve(stream: TcpStream, handler: Handler, recorded: Arc<Mutex<Vec<Request>>>) {
    let writer = Arc::new(Mutex::new(stream.try_clone().unwrap()));
    let mut reader = stream;
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        while let Ok(Some(frame)) = decoder.decode_frame() {
            let call = CallBody::parse(&frame.body).unwrap();
            let request = Request {
                command: frame.command,
                seq: frame.seq,
                args: call.args,
                exec_timeout_ms: call.exec_timeout_ms,
            };
            recorded.lock().push(request.clone());

            match handler(&request) {
                Reply::Ok(args) => send(&writer, ok(request.command, request.seq, &args)),
                Reply::Error(code, message) => send(
                    &writer,
                    Encoder::encode_response(
                        request.command,
                        request.seq,
                        &Status::error(code, message),
                        &Args::new(),
                    )
                    .unwrap(),
                ),
                Reply::Silent => {}
                Reply::Delayed(delay, args) => {
                    let writer = writer.clone();
                    thread::spawn(move || {
                        thread::sleep(delay);
                        send(&writer, ok(request.command, request.seq, &args));
                    });
                }
                Reply::WrongSeq(args) => send(
                    &writer,
                    ok(request.command, request.seq.wrapping_add(1000), &args),
                ),
                Reply::StrayThenOk(args) => {
                    let stray_seq = request.seq.wrapping_add(1000);
                    send(&writer, stray(request.command, stray_seq, unknown_status_body()));
                    send(&writer, stray(request.command, stray_seq, BytesMut::from(&[5u8][..])));
                    send(&writer, ok(request.command, request.seq, &args));
                }
                Reply::OkThenPush(args, update) => {
                    send(&writer, ok(request.command, request.seq, &args));
                    send(&writer, ok(CmdCode::Updates, 0, &update));
                }
                Reply::Close => {
                    let _ = writer.lock().shutdown(Shutdown::Both);
                    return;
                }
                Reply::Garbage => {
                    let _ = writer.lock().write_all(&[0xAB; 32]);
                }
            }
        }
    }
}

fn ok(command: CmdCode, seq: u32, args: &Args) -> BytesMut {
    Encoder::encode_response(command, seq, &Status::ok(), args).unwrap()
}

fn unknown_status_body() -> BytesMut {
    let mut body = BytesMut::new();
    Args::from(vec![Variant::Int(999), Variant::String("??".into())]).encode(&mut body);
    Args::new().encode(&mut body);
    body
}

fn stray(command: CmdCode, seq: u32, body: BytesMut) -> BytesMut {
    Frame::new(command, seq, body.freeze()).encode().unwrap()
}

fn send(writer: &Mutex<TcpStream>, frame: BytesMut) {
    let _ = writer.lock().write_all(&frame);
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
