//! Shared test harness: a scripted in-memory provider and a viewer driven
//! on a synthetic clock.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::bail;
use widget_viewer::{
    Completion, Config, Event, Fault, Inbound, Packet, RequestId, SessionState, Transport, Viewer,
    WidgetHandle,
};

/// One packet the viewer put on the wire.
#[derive(Debug, Clone)]
pub struct Sent {
    /// Request id for acknowledged sends, `None` for notifications.
    pub id: Option<RequestId>,
    pub packet: Packet,
}

#[derive(Debug, Default)]
pub struct ProviderState {
    pub connected: bool,
    pub refuse_connect: bool,
    /// Number of upcoming acknowledged sends that fail.
    pub failing_sends: u32,
    pub sent: Vec<Sent>,
    pub sync_sent: Vec<Packet>,
    pub inbound: VecDeque<Inbound>,
    pub next_id: RequestId,
}

/// Test-side view of the scripted provider.
#[derive(Debug, Clone, Default)]
pub struct Provider {
    state: Rc<RefCell<ProviderState>>,
}

impl Provider {
    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(MockTransport {
            state: Rc::clone(&self.state),
        })
    }

    pub fn state(&self) -> std::cell::RefMut<'_, ProviderState> {
        self.state.borrow_mut()
    }

    pub fn sent_names(&self) -> Vec<String> {
        self.state.borrow().sent.iter().map(|s| s.packet.command.clone()).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.state
            .borrow()
            .sent
            .iter()
            .filter(|s| s.packet.command == command)
            .count()
    }

    /// Most recent packet sent with this command name.
    pub fn last(&self, command: &str) -> Sent {
        self.state
            .borrow()
            .sent
            .iter()
            .rev()
            .find(|s| s.packet.command == command)
            .cloned()
            .unwrap_or_else(|| panic!("'{}' was never sent", command))
    }

    pub fn clear_sent(&self) {
        self.state.borrow_mut().sent.clear();
    }

    /// Reply to the most recent request named `command` with `status`.
    pub fn reply(&self, command: &str, status: i32) {
        self.reply_with(command, Packet::new(command).arg(status));
    }

    pub fn reply_with(&self, command: &str, packet: Packet) {
        let id = self.last(command).id.expect("notification has no reply");
        self.state.borrow_mut().inbound.push_back(Inbound::Reply { id, packet });
    }

    pub fn push(&self, packet: Packet) {
        self.state.borrow_mut().inbound.push_back(Inbound::Event(packet));
    }

    pub fn drop_connection(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.inbound.push_back(Inbound::Disconnected);
    }
}

struct MockTransport {
    state: Rc<RefCell<ProviderState>>,
}

impl Transport for MockTransport {
    fn connect(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.refuse_connect {
            bail!("connection refused");
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn send(&mut self, packet: &Packet) -> anyhow::Result<RequestId> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            bail!("not connected");
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            bail!("transient send failure");
        }
        state.next_id += 1;
        let id = state.next_id;
        state.sent.push(Sent {
            id: Some(id),
            packet: packet.clone(),
        });
        Ok(id)
    }

    fn send_only(&mut self, packet: &Packet) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            bail!("not connected");
        }
        state.sent.push(Sent {
            id: None,
            packet: packet.clone(),
        });
        Ok(())
    }

    fn send_sync(&mut self, packet: &Packet, _timeout: Duration) -> anyhow::Result<Packet> {
        let mut state = self.state.borrow_mut();
        state.sync_sent.push(packet.clone());
        Ok(Packet::new(packet.command.clone()).arg(0_i32))
    }

    fn poll(&mut self) -> Option<Inbound> {
        self.state.borrow_mut().inbound.pop_front()
    }
}

/// Completion results, in call order.
pub type Calls = Rc<RefCell<Vec<(WidgetHandle, widget_viewer::Result<i32>)>>>;

/// A completion that records its invocation into `calls`.
pub fn recorder(calls: &Calls) -> Completion {
    let calls = Rc::clone(calls);
    Box::new(move |_: &mut Viewer, h: WidgetHandle, result: widget_viewer::Result<i32>| {
        calls.borrow_mut().push((h, result));
    })
}

/// Viewer plus provider on a synthetic clock.
pub struct Harness {
    pub viewer: Viewer,
    pub provider: Provider,
    pub now: Instant,
    pub events: Rc<RefCell<Vec<(WidgetHandle, Event)>>>,
    pub faults: Rc<RefCell<Vec<Fault>>>,
}

impl Harness {
    pub fn with_config(config: Config) -> Self {
        let provider = Provider::default();
        let mut viewer = Viewer::new(config, provider.transport());
        let events = Rc::new(RefCell::new(Vec::new()));
        let faults = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        viewer.add_event_handler(move |_, h, event| sink.borrow_mut().push((h, event)));
        let sink = Rc::clone(&faults);
        viewer.add_fault_handler(move |_, fault| sink.borrow_mut().push(fault.clone()));
        Self {
            viewer,
            provider,
            now: Instant::now(),
            events,
            faults,
        }
    }

    pub fn new() -> Self {
        Self::with_config(test_config(false))
    }

    pub fn shared() -> Self {
        Self::with_config(test_config(true))
    }

    /// Initialise and complete the handshake.
    pub fn connected(mut self) -> Self {
        self.viewer.init().expect("init");
        self.step();
        self.provider.reply("acquire", 0);
        self.step();
        assert_eq!(self.viewer.session_state(), SessionState::Connected);
        self.provider.clear_sent();
        self
    }

    /// Advance the clock by one drain interval and tick.
    pub fn step(&mut self) {
        self.now += self.viewer.drain_interval();
        self.viewer.tick_at(self.now);
    }

    /// Tick until the queue is empty and jobs had a chance to run.
    pub fn settle(&mut self) {
        for _ in 0..64 {
            self.step();
            if self.viewer.queued_commands().is_empty() {
                break;
            }
        }
        self.step();
    }

    pub fn events_for(&self, h: WidgetHandle) -> Vec<Event> {
        self.events
            .borrow()
            .iter()
            .filter(|(other, _)| *other == h)
            .map(|(_, e)| *e)
            .collect()
    }

    /// Confirm the most recent `new` request as instance `id`.
    pub fn confirm(&mut self, id: &str) {
        let new = self.provider.last("new").packet;
        self.provider.reply("new", 0);
        self.provider.push(created(&new, id));
        self.settle();
    }
}

pub fn test_config(shared_content: bool) -> Config {
    Config {
        shared_content,
        drain_interval_ms: 10,
        ..Config::default()
    }
}

/// `created` event answering a `new` request.
pub fn created(new: &Packet, id: &str) -> Packet {
    let timestamp = new.double(0).expect("timestamp");
    let pkgname = new.str(1).expect("pkgname");
    let width = new.int(6).expect("width");
    let height = new.int(7).expect("height");
    created_event(pkgname, id, timestamp, width, height, 0)
}

/// `created` event with explicit fields.
pub fn created_event(pkgname: &str, id: &str, timestamp: f64, width: i64, height: i64, main_type: i64) -> Packet {
    Packet::new("created")
        .arg(pkgname)
        .arg(id)
        .arg(timestamp)
        .arg("")
        .arg("title")
        .arg("c1")
        .arg("cat1")
        .arg(width)
        .arg(height)
        .arg(0_i64)
        .arg(0_i64)
        .arg(main_type)
        .arg(0_i64)
        .arg("")
        .arg(-1.0_f64)
        .arg(0.0_f64)
        .arg(1_i64)
        .arg(0_i64)
}
