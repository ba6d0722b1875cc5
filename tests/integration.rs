//! End-to-end tests driving real loopback TCP through the public
//! `EventCenter`/`TcpServer`/`TcpClient` API, not simulated state machines.
//!
//! Each test pins an `EventCenter` to a small shard count, binds a server to
//! an ephemeral port, connects a client, and waits on a condvar signaled
//! from inside a connection callback — callbacks run on shard worker
//! threads, so `std::sync::mpsc::Sender` (not `Sync`) can't be captured by
//! the `Arc<dyn Fn + Send + Sync>` callback closures this crate uses.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use reactor_engine::config::{TcpClientOptions, TcpServerOptions};
use reactor_engine::connection::Callbacks;
use reactor_engine::reactor::EventCenter;
use reactor_engine::tcp::{TcpClient, TcpServer};

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// A one-shot latch a callback can fire and a test thread can block on.
#[derive(Default)]
struct Latch {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn fire(&self) {
        *self.fired.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Blocks until fired or `WAIT_TIMEOUT` elapses; returns whether it fired.
    fn wait(&self) -> bool {
        let guard = self.fired.lock().unwrap();
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, WAIT_TIMEOUT, |fired| !*fired)
            .unwrap();
        *guard
    }
}

/// S1: client connects, sends "Ping" once connected, server echoes it back
/// verbatim, client verifies the echo and soft-closes; both sides see
/// `closed` exactly once.
#[test]
fn echo_round_trip_and_clean_close() {
    let center = Arc::new(EventCenter::launch(2, 256, 64).expect("launch event center"));

    let server_closed = Arc::new(Latch::default());
    let server_closed_cb = server_closed.clone();
    let server_callbacks = Callbacks {
        received: Some(Arc::new(|conn| {
            let data = conn.recv_buffer_mut().read_all();
            conn.enqueue_send(&data);
            true
        })),
        closed: Some(Arc::new(move |_conn| {
            server_closed_cb.fire();
            true
        })),
        ..Callbacks::default()
    };

    let server = TcpServer::launch(
        center.clone(),
        "127.0.0.1:0".parse().unwrap(),
        TcpServerOptions::default(),
        server_callbacks,
    )
    .expect("server launch");
    let addr = server.local_endpoint();

    let echoed = Arc::new(Mutex::new(Vec::new()));
    let echoed_cb = echoed.clone();
    let client_closed = Arc::new(Latch::default());
    let client_closed_cb = client_closed.clone();

    let client_callbacks = Callbacks {
        connected: Some(Arc::new(|conn| {
            conn.enqueue_send(b"Ping");
            true
        })),
        received: Some(Arc::new(move |conn| {
            let data = conn.recv_buffer_mut().read_all();
            *echoed_cb.lock().unwrap() = data;
            conn.request_close(false);
            true
        })),
        closed: Some(Arc::new(move |_conn| {
            client_closed_cb.fire();
            true
        })),
        ..Callbacks::default()
    };

    let client = TcpClient::new(center.clone());
    let id = client.connect(addr, TcpClientOptions::default(), client_callbacks);
    assert!(id.is_valid(), "connect should succeed against a live listener");

    assert!(client_closed.wait(), "client should observe closed");
    assert_eq!(&*echoed.lock().unwrap(), b"Ping");

    server.shutdown().expect("listener shutdown");
}

/// S4: a single large `send` drains across many partial writev calls;
/// bytes arrive in order and complete, and `sent` fires exactly once (one
/// front buffer popped from the queue).
#[test]
fn large_send_drains_in_order_with_one_sent_callback() {
    const PAYLOAD_LEN: usize = 10 * 1024 * 1024;
    let payload: Arc<Vec<u8>> = Arc::new((0..PAYLOAD_LEN).map(|i| (i % 251) as u8).collect());

    let center = Arc::new(EventCenter::launch(2, 256, 64).expect("launch event center"));

    let received = Arc::new(Mutex::new(Vec::with_capacity(PAYLOAD_LEN)));
    let received_cb = received.clone();
    let all_received = Arc::new(Latch::default());
    let all_received_cb = all_received.clone();

    let server_callbacks = Callbacks {
        received: Some(Arc::new(move |conn| {
            let chunk = conn.recv_buffer_mut().read_all();
            let mut buf = received_cb.lock().unwrap();
            buf.extend_from_slice(&chunk);
            if buf.len() >= PAYLOAD_LEN {
                all_received_cb.fire();
            }
            true
        })),
        ..Callbacks::default()
    };

    let server = TcpServer::launch(
        center.clone(),
        "127.0.0.1:0".parse().unwrap(),
        TcpServerOptions::default(),
        server_callbacks,
    )
    .expect("server launch");
    let addr = server.local_endpoint();

    let sent_count = Arc::new(Mutex::new(0usize));
    let sent_count_cb = sent_count.clone();
    let payload_for_connect = payload.clone();

    let client_callbacks = Callbacks {
        connected: Some(Arc::new(move |conn| {
            conn.enqueue_send(&payload_for_connect);
            true
        })),
        sent: Some(Arc::new(move |_conn, success| {
            assert!(success);
            *sent_count_cb.lock().unwrap() += 1;
            true
        })),
        ..Callbacks::default()
    };

    let client = TcpClient::new(center.clone());
    let id = client.connect(addr, TcpClientOptions::default(), client_callbacks);
    assert!(id.is_valid());

    assert!(all_received.wait(), "server should receive the full payload");
    assert_eq!(&*received.lock().unwrap(), &*payload);
    assert_eq!(*sent_count.lock().unwrap(), 1, "one full buffer, one sent callback");

    server.shutdown().expect("listener shutdown");
}

/// S5: enqueue a large buffer, then request a soft close in the very same
/// callback that enqueued it. The peer must still receive every byte
/// before either side observes `closed` — this is the same-thread
/// `request_close(false)` path, distinct from the cross-thread
/// `mark_closed(false)`.
#[test]
fn soft_close_drains_queued_bytes_before_closing() {
    const PAYLOAD_LEN: usize = 1024 * 1024;
    let payload: Arc<Vec<u8>> = Arc::new((0..PAYLOAD_LEN).map(|i| (i % 199) as u8).collect());

    let center = Arc::new(EventCenter::launch(2, 256, 64).expect("launch event center"));

    let received = Arc::new(Mutex::new(Vec::with_capacity(PAYLOAD_LEN)));
    let received_cb = received.clone();
    let all_received = Arc::new(Latch::default());
    let all_received_cb = all_received.clone();

    let server_callbacks = Callbacks {
        received: Some(Arc::new(move |conn| {
            let chunk = conn.recv_buffer_mut().read_all();
            let mut buf = received_cb.lock().unwrap();
            buf.extend_from_slice(&chunk);
            if buf.len() >= PAYLOAD_LEN {
                all_received_cb.fire();
            }
            true
        })),
        ..Callbacks::default()
    };

    let server = TcpServer::launch(
        center.clone(),
        "127.0.0.1:0".parse().unwrap(),
        TcpServerOptions::default(),
        server_callbacks,
    )
    .expect("server launch");
    let addr = server.local_endpoint();

    let client_closed = Arc::new(Latch::default());
    let client_closed_cb = client_closed.clone();
    let payload_for_connect = payload.clone();

    let client_callbacks = Callbacks {
        connected: Some(Arc::new(move |conn| {
            conn.enqueue_send(&payload_for_connect);
            conn.request_close(false);
            true
        })),
        closed: Some(Arc::new(move |_conn| {
            client_closed_cb.fire();
            true
        })),
        ..Callbacks::default()
    };

    let client = TcpClient::new(center.clone());
    let id = client.connect(addr, TcpClientOptions::default(), client_callbacks);
    assert!(id.is_valid());

    assert!(all_received.wait(), "server should receive every byte queued before the soft close");
    assert_eq!(&*received.lock().unwrap(), &*payload);
    assert!(client_closed.wait(), "client should still observe closed after draining");

    server.shutdown().expect("listener shutdown");
}
