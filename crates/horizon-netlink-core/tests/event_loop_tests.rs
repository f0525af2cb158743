//! Tests for the event loop, timers, readiness watchers and remote tasks.

use std::cell::{Cell, RefCell};
use std::io::Read;
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use horizon_netlink_core::{EventLoop, LoopError, PollEvents, PollWatcher, Timer};

fn socket_pair() -> (UnixDatagram, UnixDatagram) {
    let (a, b) = UnixDatagram::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

#[test]
fn test_zero_delay_timers_fire_in_arming_order() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let order = Rc::new(RefCell::new(Vec::new()));

    let timers: Vec<Timer> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let order = order.clone();
            Timer::new(&handle, move || order.borrow_mut().push(name))
        })
        .collect();
    for timer in &timers {
        timer.start(Duration::ZERO);
    }

    event_loop.run().unwrap();
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    assert!(timers.iter().all(|t| !t.is_active()));
}

#[test]
fn test_timer_armed_in_callback_waits_for_next_iteration() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();

    let second_fired = Rc::new(Cell::new(0));
    let counter = second_fired.clone();
    let second = Rc::new(Timer::new(&handle, move || counter.set(counter.get() + 1)));

    let rearm = second.clone();
    let first = Timer::new(&handle, move || rearm.start(Duration::ZERO));
    first.start(Duration::ZERO);

    assert!(event_loop.run_once(Some(Duration::ZERO)).unwrap());
    assert_eq!(second_fired.get(), 0);
    assert!(second.is_active());

    event_loop.run_once(Some(Duration::ZERO)).unwrap();
    assert_eq!(second_fired.get(), 1);
}

#[test]
fn test_stopped_timer_does_not_fire() {
    let event_loop = EventLoop::new().unwrap();
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    let timer = Timer::new(&event_loop.handle(), move || flag.set(true));

    timer.start(Duration::ZERO);
    timer.stop();
    assert!(!timer.is_active());

    event_loop.run().unwrap();
    assert!(!fired.get());
}

#[test]
fn test_unreferenced_timer_does_not_keep_loop_alive() {
    let event_loop = EventLoop::new().unwrap();
    let timer = Timer::new(&event_loop.handle(), || {});
    timer.start(Duration::from_secs(60));
    assert!(event_loop.is_alive());

    timer.set_ref(false);
    assert!(!timer.has_ref());
    assert!(!event_loop.is_alive());

    let started = Instant::now();
    event_loop.run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(timer.is_active());
}

#[test]
fn test_repeating_timer_runs_until_stopped() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let ticks = Rc::new(Cell::new(0));

    let counter = ticks.clone();
    let stopper = handle.clone();
    let timer = Timer::new(&handle, move || {
        counter.set(counter.get() + 1);
        if counter.get() == 5 {
            stopper.stop();
        }
    });
    timer.start_repeating(Duration::from_millis(1));

    event_loop.run().unwrap();
    assert_eq!(ticks.get(), 5);
    assert!(timer.is_active());
}

#[test]
fn test_watcher_is_level_triggered() {
    let event_loop = EventLoop::new().unwrap();
    let (a, b) = socket_pair();
    b.send(b"ping").unwrap();

    let wakeups = Rc::new(Cell::new(0));
    let counter = wakeups.clone();
    let watcher = PollWatcher::new(&event_loop.handle(), a.as_raw_fd(), move |events| {
        assert!(events.unwrap().is_readable());
        counter.set(counter.get() + 1);
    });
    watcher.start(PollEvents::READABLE).unwrap();

    // The datagram is never read, so every iteration reports it again.
    for _ in 0..3 {
        event_loop.run_once(Some(Duration::from_secs(1))).unwrap();
    }
    assert_eq!(wakeups.get(), 3);
}

#[test]
fn test_watcher_quiet_after_drain() {
    let event_loop = EventLoop::new().unwrap();
    let (a, b) = socket_pair();
    b.send(b"ping").unwrap();

    let reader = Rc::new(a);
    let received = Rc::new(RefCell::new(Vec::new()));
    let (sock, sink) = (reader.clone(), received.clone());
    let watcher = PollWatcher::new(&event_loop.handle(), reader.as_raw_fd(), move |_| {
        let mut buf = [0u8; 16];
        while let Ok(n) = sock.recv(&mut buf) {
            sink.borrow_mut().push(buf[..n].to_vec());
        }
    });
    watcher.start(PollEvents::READABLE).unwrap();

    event_loop.run_once(Some(Duration::from_secs(1))).unwrap();
    event_loop.run_once(Some(Duration::from_millis(20))).unwrap();
    assert_eq!(*received.borrow(), vec![b"ping".to_vec()]);
}

#[test]
fn test_watcher_writable_and_resubscribe() {
    let event_loop = EventLoop::new().unwrap();
    let (a, _b) = socket_pair();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let watcher = PollWatcher::new(&event_loop.handle(), a.as_raw_fd(), move |events| {
        sink.borrow_mut().push(events.unwrap());
    });

    watcher.start(PollEvents::BOTH).unwrap();
    assert_eq!(watcher.events(), PollEvents::BOTH);
    event_loop.run_once(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(*seen.borrow(), vec![PollEvents::WRITABLE]);

    watcher.start(PollEvents::READABLE).unwrap();
    event_loop.run_once(Some(Duration::from_millis(20))).unwrap();
    assert_eq!(seen.borrow().len(), 1);

    watcher.stop().unwrap();
    assert!(!watcher.is_active());
    assert!(!event_loop.is_alive());
}

#[test]
fn test_unreferenced_watcher_lets_loop_exit() {
    let event_loop = EventLoop::new().unwrap();
    let (a, _b) = socket_pair();
    let watcher = PollWatcher::new(&event_loop.handle(), a.as_raw_fd(), |_| {});
    watcher.start(PollEvents::READABLE).unwrap();
    assert!(event_loop.is_alive());

    watcher.set_ref(false);
    assert!(!event_loop.is_alive());
    event_loop.run().unwrap();

    watcher.set_ref(true);
    assert!(event_loop.is_alive());
}

#[test]
fn test_watcher_dropped_inside_own_callback() {
    let event_loop = EventLoop::new().unwrap();
    let (a, b) = socket_pair();
    b.send(b"x").unwrap();

    let slot: Rc<RefCell<Option<PollWatcher>>> = Rc::new(RefCell::new(None));
    let calls = Rc::new(Cell::new(0));
    let (own, counter) = (slot.clone(), calls.clone());
    let watcher = PollWatcher::new(&event_loop.handle(), a.as_raw_fd(), move |_| {
        counter.set(counter.get() + 1);
        drop(own.borrow_mut().take());
    });
    watcher.start(PollEvents::READABLE).unwrap();
    *slot.borrow_mut() = Some(watcher);

    event_loop.run().unwrap();
    assert_eq!(calls.get(), 1);
    assert!(slot.borrow().is_none());
}

#[test]
fn test_watcher_reports_hangup_as_readable() {
    let event_loop = EventLoop::new().unwrap();
    let (mut reader, writer) = std::os::unix::net::UnixStream::pair().unwrap();
    reader.set_nonblocking(true).unwrap();
    drop(writer);

    let seen = Rc::new(Cell::new(PollEvents::NONE));
    let sink = seen.clone();
    let watcher = PollWatcher::new(&event_loop.handle(), reader.as_raw_fd(), move |events| {
        if let Ok(events) = events {
            sink.set(events);
        }
    });
    watcher.start(PollEvents::READABLE).unwrap();
    event_loop.run_once(Some(Duration::from_secs(1))).unwrap();

    assert!(seen.get().is_readable());
    let mut buf = [0u8; 1];
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_watcher_reports_socket_error_and_stops() {
    let event_loop = EventLoop::new().unwrap();

    // Nothing listens on this port once the placeholder is gone.
    let placeholder = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = placeholder.local_addr().unwrap();
    drop(placeholder);

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_nonblocking(true).unwrap();
    socket.connect(target).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let watcher = PollWatcher::new(&event_loop.handle(), socket.as_raw_fd(), move |status| {
        sink.borrow_mut().push(status.map_err(|err| err.raw_os_error()));
    });
    watcher.start(PollEvents::READABLE).unwrap();
    socket.send(b"ping").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.borrow().is_empty() && Instant::now() < deadline {
        event_loop.run_once(Some(Duration::from_millis(10))).unwrap();
    }

    assert_eq!(*seen.borrow(), vec![Err(Some(libc::ECONNREFUSED))]);
    assert!(!watcher.is_active());
    assert!(!event_loop.is_alive());
}

#[test]
fn test_remote_post_runs_on_loop_thread() {
    let event_loop = EventLoop::new().unwrap();
    let remote = event_loop.remote();
    let keepalive = Timer::new(&event_loop.handle(), || {});
    keepalive.start(Duration::from_secs(60));

    let loop_thread = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));
    let done = Arc::new(AtomicBool::new(false));

    let (slot, flag) = (ran_on.clone(), done.clone());
    let poster = thread::spawn(move || {
        remote.post(move || {
            *slot.lock() = Some(thread::current().id());
            flag.store(true, Ordering::SeqCst);
        });
    });
    poster.join().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
        event_loop.run_once(Some(Duration::from_millis(10))).unwrap();
    }
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(*ran_on.lock(), Some(loop_thread));
}

#[test]
fn test_remote_stop_ends_run() {
    let event_loop = EventLoop::new().unwrap();
    let keepalive = Timer::new(&event_loop.handle(), || {});
    keepalive.start(Duration::from_secs(60));

    let remote = event_loop.remote();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote.stop();
    });

    let started = Instant::now();
    event_loop.run().unwrap();
    stopper.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[test]
fn test_nested_run_is_rejected() {
    let event_loop = Rc::new(EventLoop::new().unwrap());
    let nested = Rc::downgrade(&event_loop);
    let outcome = Rc::new(RefCell::new(None));
    let sink = outcome.clone();

    let timer = Timer::new(&event_loop.handle(), move || {
        if let Some(event_loop) = nested.upgrade() {
            *sink.borrow_mut() = Some(event_loop.run_once(Some(Duration::ZERO)));
        }
    });
    timer.start(Duration::ZERO);
    event_loop.run().unwrap();

    let outcome = outcome.borrow_mut().take().unwrap();
    assert!(matches!(outcome, Err(LoopError::AlreadyRunning)));
    assert!(!event_loop.handle().is_running());
}
