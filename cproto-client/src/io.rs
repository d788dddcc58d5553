//! The connection's I/O thread.
//!
//! One `std::thread` per connection runs a current-thread tokio runtime with
//! two tasks: the driver (dial, login, reads, deadline sweep, keep-alive) and
//! the writer, which drains the outbound queue in batches.

use crate::answer::Answer;
use crate::connection::{Shared, TERMINATED};
use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use cproto_protocol::{parse_response, CmdCode, Decoder, Frame, ProtocolError};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

const MAX_WRITE_BATCH: usize = 64 * 1024;

pub(crate) fn spawn(shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("cproto-io".to_string())
        .spawn(move || run(shared))
}

fn run(shared: Arc<Shared>) {
    shared.mark_io_thread();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            shared.fail(format!("failed to start I/O runtime: {}", e));
            return;
        }
    };
    runtime.block_on(drive(&shared));
    tracing::debug!("I/O thread for {} exiting", shared.config.addr);
}

async fn drive(shared: &Arc<Shared>) {
    let Some(outbound) = shared.take_outbound() else {
        shared.fail("I/O thread started twice");
        return;
    };

    let mut sweep = time::interval(shared.config.deadline_check_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Dial and login share one budget.
    let login_deadline = shared.clock.deadline_after(shared.config.login_timeout);

    let Some(stream) = dial(shared, &mut sweep).await else {
        return;
    };

    if let Err(reason) = serve(shared, stream, outbound, login_deadline, &mut sweep).await {
        shared.fail(reason);
    }
}

/// Dials the server while still sweeping deadlines of queued calls.
async fn dial(shared: &Arc<Shared>, sweep: &mut Interval) -> Option<TcpStream> {
    let addr = shared.config.addr;
    let login_timeout = shared.config.login_timeout;
    tracing::debug!("Dialing {} (login timeout {:?})", addr, login_timeout);

    let connect = with_timeout(login_timeout, TcpStream::connect(addr));
    tokio::pin!(connect);

    loop {
        tokio::select! {
            result = &mut connect => {
                return match result {
                    Some(Ok(stream)) => Some(stream),
                    Some(Err(e)) => {
                        shared.fail(format!("dial {}: {}", addr, e));
                        None
                    }
                    None => {
                        shared.fail("login timeout");
                        None
                    }
                };
            }
            _ = sweep.tick() => shared.sweep_deadlines(),
            _ = shared.wake.notified() => {
                if shared.terminating() || shared.is_failed() {
                    shared.fail(TERMINATED);
                    return None;
                }
            }
        }
    }
}

/// Runs the connected session until it fails, returning the failure reason.
async fn serve(
    shared: &Arc<Shared>,
    stream: TcpStream,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    login_deadline: u64,
    sweep: &mut Interval,
) -> Result<(), String> {
    tracing::debug!("TCP connected to {}", shared.config.addr);
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();

    let login = shared.prepare_login(login_deadline).map_err(|e| e.to_string())?;
    writer
        .write_all(&login)
        .await
        .map_err(|e| format!("write: {}", e))?;

    shared.last_read.store(shared.clock.now(), Ordering::Relaxed);
    let mut writer_task = tokio::spawn(write_loop(writer, outbound));

    let keep_alive_interval = shared.config.keep_alive_interval;
    let mut keep_alive = (!keep_alive_interval.is_zero()).then(|| {
        let mut interval =
            time::interval_at(Instant::now() + keep_alive_interval, keep_alive_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let read_buffer_size = shared.config.read_buffer_size;
    let mut decoder = Decoder::with_capacity(read_buffer_size);
    let mut buf = vec![0u8; read_buffer_size];

    let result = loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Err("connection closed by peer".to_string()),
                Ok(n) => {
                    tracing::trace!("Read {} bytes", n);
                    shared.last_read.store(shared.clock.now(), Ordering::Relaxed);
                    decoder.extend(&buf[..n]);
                    if let Err(e) = demux_all(shared, &mut decoder) {
                        break Err(format!("protocol error: {}", e));
                    }
                }
                Err(e) => break Err(format!("read: {}", e)),
            },
            _ = sweep.tick() => shared.sweep_deadlines(),
            _ = tick(&mut keep_alive) => shared.keep_alive(),
            written = &mut writer_task => {
                break Err(match written {
                    Ok(Ok(())) => "writer closed".to_string(),
                    Ok(Err(e)) => format!("write: {}", e),
                    Err(e) => format!("writer task: {}", e),
                });
            }
            _ = shared.wake.notified() => {
                if shared.terminating() {
                    break Err(TERMINATED.to_string());
                }
            }
        }
        if shared.is_failed() {
            break Ok(());
        }
    };

    writer_task.abort();
    result
}

async fn with_timeout<F: Future>(timeout: Duration, future: F) -> Option<F::Output> {
    if timeout.is_zero() {
        Some(future.await)
    } else {
        time::timeout(timeout, future).await.ok()
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) -> std::io::Result<()> {
    let mut batch = BytesMut::with_capacity(MAX_WRITE_BATCH);
    while let Some(frame) = outbound.recv().await {
        batch.extend_from_slice(&frame);
        while batch.len() < MAX_WRITE_BATCH {
            match outbound.try_recv() {
                Ok(frame) => batch.extend_from_slice(&frame),
                Err(_) => break,
            }
        }
        tracing::trace!("Writing {} bytes", batch.len());
        writer.write_all(&batch).await?;
        batch.clear();
    }
    Ok(())
}

fn demux_all(shared: &Shared, decoder: &mut Decoder) -> Result<(), ProtocolError> {
    while let Some(frame) = decoder.decode_frame()? {
        demux(shared, &frame)?;
    }
    Ok(())
}

/// Routes one inbound frame to the call it answers.
///
/// The body is only parsed once a live receiver is found, so stray frames
/// never affect the connection.
fn demux(shared: &Shared, frame: &Frame) -> Result<(), ProtocolError> {
    if frame.command == CmdCode::Updates {
        match shared.updates_handler() {
            Some(handler) => handler(parse_answer(&frame.body)?),
            None => tracing::debug!("Dropping update frame: no handler installed"),
        }
        return Ok(());
    }

    if shared.take_login(frame.seq) {
        shared.on_login(parse_answer(&frame.body)?);
        return Ok(());
    }

    let Some(entry) = shared.table.take(frame.seq) else {
        tracing::debug!(
            "Dropping response seq={} cmd={}: no pending call",
            frame.seq,
            frame.command
        );
        return Ok(());
    };

    tracing::debug!(
        "Response seq={} cmd={} ({} bytes)",
        frame.seq,
        entry.command,
        frame.body.len()
    );
    match parse_answer(&frame.body) {
        Ok(result) => {
            entry.resolve(result);
            Ok(())
        }
        Err(e) => {
            // The entry is already out of the table, so the cascade cannot reach it.
            entry.resolve(Err(ClientError::ConnectionFailed(format!("protocol error: {}", e))));
            Err(e)
        }
    }
}

/// Splits a response body into the call outcome.
fn parse_answer(body: &[u8]) -> Result<Result<Answer<'_>, ClientError>, ProtocolError> {
    let response = parse_response(body)?;
    if response.status.is_ok() {
        Ok(Ok(Answer::borrowed(response.result)))
    } else {
        Ok(Err(ClientError::Server {
            code: response.status.code,
            message: response.status.message,
        }))
    }
}
