//! Per-peer finite state machine: states, timers, event dispatch, route
//! extraction and outbound UPDATE construction.
//!
//! Grounded on `beka/state_machine.py` and `test/unit/test_state_machine.py`.
//! The original raises `IdleError` from deep inside `event()` to unwind the
//! eventlet pool; per spec.md §9 that's replaced with an explicit
//! `FsmOutcome` the event function returns, so the runtime can cancel its
//! sibling tasks deterministically instead of unwinding through a panic.

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::capability::{AfiSafi, CapabilitySet};
use crate::ip::{IpAddress, IpPrefix, Ipv4Prefix, Ipv6Prefix};
use crate::message::{
    Message, MpReachNlri, NotificationErrorCode, NotificationMessage, OpenMessage, Origin,
    PathAttributes, UpdateMessage,
};
use crate::route::{RouteAddition, RouteRemoval, RouteUpdate};
use crate::timer::Timer;

pub const DEFAULT_HOLD_TIME: u16 = 240;
const AS_TRANS: u16 = 23456;

/// Called once an inbound OPEN has been accepted, with the peer's
/// capability set. The peering runtime installs one of these to propagate
/// the negotiated `fourbyteas` flag into its parser/packer state (see
/// `src/peering.rs`).
pub type OpenHandler = Box<dyn FnMut(&CapabilitySet) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Active,
    /// Reserved for active connect; unreachable on the passive-only path
    /// this speaker implements (spec.md §9).
    OpenSent,
    OpenConfirm,
    Established,
    Idle,
}

/// An event fed into the FSM, mirroring `beka/event.py`.
#[derive(Debug, Clone, PartialEq)]
pub enum FsmEvent {
    MessageReceived(Message),
    TimerExpired,
    Shutdown,
}

/// What happened as a result of feeding the FSM an event: either it's
/// still running, or it has reached `Idle` and the caller should tear the
/// peering down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmOutcome {
    Continue,
    Closed,
}

/// One peer session: state, timers, negotiated parameters and the two
/// output queues (outbound messages, inbound route updates) the peering
/// runtime drains in FIFO order.
pub struct Fsm {
    state: FsmState,
    local_as: u32,
    peer_as: u32,
    router_id: Ipv4Addr,
    local_address: IpAddress,
    neighbor: IpAddress,
    hold_time: u16,
    fourbyteas: bool,
    hold: Timer,
    keepalive: Timer,
    output_messages: VecDeque<Message>,
    route_updates: VecDeque<RouteUpdate>,
    pub routes_to_advertise: Vec<RouteAddition>,
    open_handler: Option<OpenHandler>,
}

impl Fsm {
    pub fn new(
        local_as: u32,
        peer_as: u32,
        router_id: Ipv4Addr,
        local_address: IpAddress,
        neighbor: IpAddress,
        hold_time: u16,
    ) -> Self {
        Self {
            state: FsmState::Active,
            local_as,
            peer_as,
            router_id,
            local_address,
            neighbor,
            hold_time,
            fourbyteas: false,
            hold: Timer::new(hold_time as u64),
            keepalive: Timer::new((hold_time / 3) as u64),
            output_messages: VecDeque::new(),
            route_updates: VecDeque::new(),
            routes_to_advertise: Vec::new(),
            open_handler: None,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn peer_as(&self) -> u32 {
        self.peer_as
    }

    pub fn neighbor(&self) -> IpAddress {
        self.neighbor
    }

    pub fn fourbyteas(&self) -> bool {
        self.fourbyteas
    }

    pub fn set_open_handler(&mut self, handler: OpenHandler) {
        self.open_handler = Some(handler);
    }

    /// The 2-byte ASN to put on the wire: the real `local_as` when it
    /// fits, else the reserved `AS_TRANS` value (spec.md §3), with the
    /// real value carried only in the `fourbyteas` capability.
    fn local_as2(&self) -> u16 {
        u16::try_from(self.local_as).unwrap_or(AS_TRANS)
    }

    pub fn pop_output_message(&mut self) -> Option<Message> {
        self.output_messages.pop_front()
    }

    pub fn pop_route_update(&mut self) -> Option<RouteUpdate> {
        self.route_updates.pop_front()
    }

    pub fn event(&mut self, event: FsmEvent, now: u64) -> FsmOutcome {
        match event {
            FsmEvent::Shutdown => self.handle_shutdown(),
            FsmEvent::TimerExpired => self.handle_timers(now),
            FsmEvent::MessageReceived(message) => self.handle_message(message, now),
        }
    }

    fn shutdown(&mut self, reason: &str) -> FsmOutcome {
        tracing::info!(neighbor = %self.neighbor, %reason, "peer session going idle");
        self.state = FsmState::Idle;
        FsmOutcome::Closed
    }

    fn send_notification(&mut self, error_code: NotificationErrorCode, error_subcode: u8) {
        self.output_messages.push_back(Message::Notification(
            NotificationMessage::new(error_code, error_subcode, Vec::new()),
        ));
    }

    fn handle_shutdown(&mut self) -> FsmOutcome {
        if matches!(self.state, FsmState::OpenConfirm | FsmState::Established) {
            self.send_notification(NotificationErrorCode::Cease, 0);
        }
        self.shutdown("shutdown requested")
    }

    fn handle_timers(&mut self, now: u64) -> FsmOutcome {
        if self.hold.expired(now) {
            return self.handle_hold_timer();
        }
        if self.keepalive.expired(now) {
            self.handle_keepalive_timer(now);
        }
        FsmOutcome::Continue
    }

    fn handle_hold_timer(&mut self) -> FsmOutcome {
        self.send_notification(NotificationErrorCode::HoldTimerExpired, 0);
        self.shutdown("hold timer expired")
    }

    fn handle_keepalive_timer(&mut self, now: u64) {
        self.keepalive.reset(now);
        self.output_messages.push_back(Message::Keepalive);
    }

    fn handle_message(&mut self, message: Message, now: u64) -> FsmOutcome {
        match self.state {
            FsmState::Active => self.handle_message_active(message, now),
            FsmState::OpenSent => self.handle_message_open_sent(message, now),
            FsmState::OpenConfirm => self.handle_message_open_confirm(message, now),
            FsmState::Established => self.handle_message_established(message, now),
            FsmState::Idle => FsmOutcome::Closed,
        }
    }

    fn negotiate_open(&mut self, open: &OpenMessage) {
        if let Some(asn) = open.capabilities.four_octet_asn {
            self.fourbyteas = true;
            self.peer_as = asn;
        }
        if let Some(handler) = &mut self.open_handler {
            handler(&open.capabilities);
        }
    }

    fn reply_capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet {
            four_octet_asn: Some(self.local_as),
            ..Default::default()
        };
        caps.multiprotocol.push(if self.local_address.is_v4() {
            AfiSafi::Ipv4Unicast
        } else {
            AfiSafi::Ipv6Unicast
        });
        caps
    }

    fn handle_message_active(&mut self, message: Message, now: u64) -> FsmOutcome {
        match message {
            Message::Open(open) => {
                self.negotiate_open(&open);
                let reply = OpenMessage::new(
                    self.local_as2(),
                    self.hold_time,
                    self.router_id,
                    self.reply_capabilities(),
                );
                self.output_messages.push_back(Message::Open(reply));
                self.output_messages.push_back(Message::Keepalive);
                self.hold.reset(now);
                self.keepalive.reset(now);
                self.state = FsmState::OpenConfirm;
                FsmOutcome::Continue
            }
            other => self.shutdown(&format!("invalid message in Active state: {other:?}")),
        }
    }

    /// Mirrors `handle_message_open_sent_state`: reserved for active
    /// connect, unreachable on this speaker's passive-only path (no event
    /// ever puts the FSM in `OpenSent`).
    fn handle_message_open_sent(&mut self, message: Message, now: u64) -> FsmOutcome {
        match message {
            Message::Open(open) => {
                self.negotiate_open(&open);
                self.output_messages.push_back(Message::Keepalive);
                self.hold.reset(now);
                self.keepalive.reset(now);
                self.state = FsmState::OpenConfirm;
                FsmOutcome::Continue
            }
            other => self.shutdown(&format!("invalid message in OpenSent state: {other:?}")),
        }
    }

    fn handle_message_open_confirm(&mut self, message: Message, now: u64) -> FsmOutcome {
        match message {
            Message::Keepalive => {
                for update in self.build_update_messages() {
                    self.output_messages.push_back(update);
                }
                self.hold.reset(now);
                self.keepalive.reset(now);
                self.state = FsmState::Established;
                FsmOutcome::Continue
            }
            Message::Notification(n) => {
                self.shutdown(&format!("notification received: {n:?}"))
            }
            Message::Open(_) => {
                self.send_notification(NotificationErrorCode::Cease, 0);
                self.shutdown("received OPEN in OpenConfirm state")
            }
            Message::Update(_) => {
                self.send_notification(NotificationErrorCode::FiniteStateMachine, 0);
                self.shutdown("received UPDATE in OpenConfirm state")
            }
        }
    }

    fn handle_message_established(&mut self, message: Message, now: u64) -> FsmOutcome {
        match message {
            Message::Update(update) => {
                self.process_route_update(&update);
                FsmOutcome::Continue
            }
            Message::Keepalive => {
                self.hold.reset(now);
                FsmOutcome::Continue
            }
            Message::Notification(n) => {
                self.shutdown(&format!("notification received: {n:?}"))
            }
            Message::Open(_) => {
                self.send_notification(NotificationErrorCode::Cease, 0);
                self.shutdown("received OPEN in Established state")
            }
        }
    }

    fn process_route_update(&mut self, update: &UpdateMessage) {
        let as_path = update.path_attributes.as_path.clone().unwrap_or_default();
        let origin = update.path_attributes.origin.unwrap_or(Origin::Igp);

        for prefix in &update.nlri {
            let next_hop = update
                .path_attributes
                .next_hop
                .unwrap_or(Ipv4Addr::UNSPECIFIED);
            self.route_updates.push_back(RouteUpdate::Addition(RouteAddition::new(
                IpPrefix::V4(*prefix),
                IpAddress::V4(next_hop),
                as_path.clone(),
                origin,
            )));
        }

        if let Some(mp_reach) = &update.path_attributes.mp_reach_nlri {
            let next_hop = mp_reach
                .next_hop
                .first()
                .copied()
                .unwrap_or(Ipv6Addr::UNSPECIFIED);
            for prefix in &mp_reach.nlri {
                self.route_updates.push_back(RouteUpdate::Addition(RouteAddition::new(
                    IpPrefix::V6(*prefix),
                    IpAddress::V6(next_hop),
                    as_path.clone(),
                    origin,
                )));
            }
        }

        for prefix in &update.withdrawn_routes {
            self.route_updates
                .push_back(RouteUpdate::Removal(RouteRemoval::new(IpPrefix::V4(*prefix))));
        }

        if let Some(mp_unreach) = &update.path_attributes.mp_unreach_nlri {
            for prefix in &mp_unreach.withdrawn_routes {
                self.route_updates
                    .push_back(RouteUpdate::Removal(RouteRemoval::new(IpPrefix::V6(*prefix))));
            }
        }
    }

    /// Builds the outbound UPDATEs emitted on entry to Established, per
    /// spec.md §4.5.1: group by (next_hop, as_path, origin), preserving
    /// first-seen order, IPv4 groups before IPv6 groups.
    fn build_update_messages(&self) -> Vec<Message> {
        let mut messages = build_ipv4_update_messages(&self.routes_to_advertise);
        messages.extend(build_ipv6_update_messages(&self.routes_to_advertise));
        messages
    }
}

type GroupKey = (IpAddress, String, Origin);

fn group_by_path(additions: &[RouteAddition]) -> (Vec<GroupKey>, HashMap<GroupKey, Vec<RouteAddition>>) {
    let mut order = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<RouteAddition>> = HashMap::new();
    for addition in additions {
        let key = (
            addition.next_hop,
            addition.as_path.clone(),
            addition.origin,
        );
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(addition.clone());
    }
    (order, groups)
}

fn build_ipv4_update_messages(routes: &[RouteAddition]) -> Vec<Message> {
    let ipv4: Vec<RouteAddition> = routes
        .iter()
        .filter(|r| matches!(r.prefix, IpPrefix::V4(_)))
        .cloned()
        .collect();
    let (order, mut groups) = group_by_path(&ipv4);

    order
        .into_iter()
        .map(|key| {
            let members = groups.remove(&key).expect("key came from this group map");
            let (next_hop, as_path, origin) = key;
            let next_hop = match next_hop {
                IpAddress::V4(addr) => addr,
                IpAddress::V6(_) => unreachable!("ipv4 group has an ipv4 next hop"),
            };
            let nlri: Vec<Ipv4Prefix> = members
                .into_iter()
                .map(|r| match r.prefix {
                    IpPrefix::V4(p) => p,
                    IpPrefix::V6(_) => unreachable!("filtered to ipv4 above"),
                })
                .collect();
            let path_attributes = PathAttributes {
                origin: Some(origin),
                as_path: Some(as_path),
                next_hop: Some(next_hop),
                ..Default::default()
            };
            Message::Update(UpdateMessage::new(Vec::new(), path_attributes, nlri))
        })
        .collect()
}

fn build_ipv6_update_messages(routes: &[RouteAddition]) -> Vec<Message> {
    let ipv6: Vec<RouteAddition> = routes
        .iter()
        .filter(|r| matches!(r.prefix, IpPrefix::V6(_)))
        .cloned()
        .collect();
    let (order, mut groups) = group_by_path(&ipv6);

    order
        .into_iter()
        .map(|key| {
            let members = groups.remove(&key).expect("key came from this group map");
            let (next_hop, as_path, origin) = key;
            let next_hop = match next_hop {
                IpAddress::V6(addr) => addr,
                IpAddress::V4(_) => unreachable!("ipv6 group has an ipv6 next hop"),
            };
            let nlri: Vec<Ipv6Prefix> = members
                .into_iter()
                .map(|r| match r.prefix {
                    IpPrefix::V6(p) => p,
                    IpPrefix::V4(_) => unreachable!("filtered to ipv6 above"),
                })
                .collect();
            let path_attributes = PathAttributes {
                origin: Some(origin),
                as_path: Some(as_path),
                mp_reach_nlri: Some(MpReachNlri {
                    next_hop: vec![next_hop],
                    nlri,
                }),
                ..Default::default()
            };
            Message::Update(UpdateMessage::new(Vec::new(), path_attributes, Vec::new()))
        })
        .collect()
}
