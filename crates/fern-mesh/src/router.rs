//! Packet dispatch and forwarding
//!
//! All validation failures are silent drops with a log line: no response,
//! no partial processing, no state mutation. The hop byte is the
//! destination for SEND/ACK/ASKTIME and the broadcasting device for TIME
//! (receivers decide acceptance by who sent it, not who it was for).

use std::sync::Arc;

use parking_lot::Mutex;

use fern_core::{DeviceId, MeshConfig, MeshError, MeshResult, Sample, SerialNumber, WallTime};
use fern_crypto::SecureLink;
use fern_wire::{AckPayload, AskTimePayload, Payload, RouteList, SendPayload, TimePayload};

use crate::{Radio, SendOutcome, Sender};

/// Collaborator surface the router dispatches into. Node-side hooks handle
/// the clock; gateway-side hooks handle upload and the clock source.
pub trait MeshHooks: Send + Sync {
    /// Set the local wall clock from a received TIME.
    fn set_wall_clock(&self, _time: WallTime) {}

    /// A TIME was accepted; the time-sync task is satisfied.
    fn time_synchronized(&self) {}

    /// Current wall clock for an immediate TIME broadcast (gateway).
    fn wall_clock(&self) -> Option<WallTime> {
        None
    }

    /// Hand a delivered sample to the upload collaborator (gateway).
    /// Returning false withholds the ACK so the origin retries.
    fn upload(&self, _origin: DeviceId, _serial: SerialNumber, _sample: &Sample) -> bool {
        false
    }
}

/// Role-aware packet router over one radio.
pub struct MeshRouter<R: Radio> {
    config: Arc<MeshConfig>,
    link: SecureLink,
    radio: R,
    /// The radio is half-duplex: one transaction at a time.
    radio_lock: Mutex<()>,
    sender: Sender,
}

impl<R: Radio> MeshRouter<R> {
    pub fn new(config: Arc<MeshConfig>, radio: R) -> MeshResult<Self> {
        config.validate()?;
        let link = SecureLink::new(&config.secret_key, config.device_count)?;
        Ok(MeshRouter {
            config,
            link,
            radio,
            radio_lock: Mutex::new(()),
            sender: Sender::new(),
        })
    }

    #[inline]
    fn device(&self) -> DeviceId {
        self.config.device()
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    fn transmit_payload(&self, hop: DeviceId, payload: &Payload) -> MeshResult<()> {
        let frame = self.link.encode(payload.packet_type(), hop, &payload.encode())?;
        let _transaction = self.radio_lock.lock();
        self.radio.transmit(&frame)
    }

    /// Fetch the next pending frame from the radio, if any.
    pub fn poll_receive(&self) -> MeshResult<Option<Vec<u8>>> {
        let _transaction = self.radio_lock.lock();
        self.radio.try_receive()
    }

    pub fn power_down_radio(&self) {
        let _transaction = self.radio_lock.lock();
        self.radio.power_down();
    }

    /// Request an immediate TIME broadcast from the gateway.
    pub fn ask_time(&self) -> MeshResult<()> {
        let payload = Payload::AskTime(AskTimePayload {
            requester: self.device(),
        });
        self.transmit_payload(DeviceId::GATEWAY, &payload)
    }

    /// Broadcast TIME toward this device's children.
    pub fn broadcast_time(&self, time: WallTime) -> MeshResult<()> {
        let payload = Payload::Time(TimePayload { time });
        self.transmit_payload(self.device(), &payload)
    }

    /// Deliver one sample to the gateway: transmit, wait the ACK window,
    /// retransmit with a fresh serial, bounded by the configured attempt
    /// count. The caller holds the keep-awake guard for the whole cycle.
    pub fn deliver(&self, sample: &Sample) -> MeshResult<SendOutcome> {
        let parent = self
            .config
            .parent()
            .ok_or_else(|| MeshError::InvalidConfig("gateway cannot deliver over radio".into()))?;

        for _ in 0..self.config.resend_count {
            let serial = self.sender.begin_attempt();
            let payload = Payload::Send(SendPayload {
                origin: self.device(),
                route: RouteList::new(self.device()),
                serial,
                sample: *sample,
            });

            if let Err(err) = self.transmit_payload(parent, &payload) {
                // Transient radio fault; the ACK window doubles as backoff.
                tracing::warn!(%err, %serial, "send attempt failed to transmit");
            }

            if self.sender.await_ack(serial, self.config.ack_timeout()) {
                self.sender.finish();
                return Ok(SendOutcome::Acked(serial));
            }
            tracing::debug!(%serial, "ack window closed, retransmitting");
        }

        self.sender.finish();
        Ok(SendOutcome::TimedOut)
    }

    /// Decode and dispatch one received frame. Called strictly serially by
    /// the receive task.
    pub fn handle_frame(&self, raw: &[u8], hooks: &dyn MeshHooks) {
        let (packet_type, hop, plaintext) = match self.link.decode(raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!(%err, "dropping undecodable frame");
                return;
            }
        };

        let payload = match Payload::decode(packet_type, &plaintext) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%err, ?packet_type, "dropping malformed payload");
                return;
            }
        };

        match payload {
            Payload::Time(time) => self.handle_time(hop, time, hooks),
            Payload::AskTime(ask) => self.handle_ask_time(hop, ask, hooks),
            Payload::Send(send) => self.handle_send(hop, send, hooks),
            Payload::Ack(ack) => self.handle_ack(hop, ack),
        }
    }

    fn handle_time(&self, from: DeviceId, payload: TimePayload, hooks: &dyn MeshHooks) {
        if self.config.is_gateway() {
            tracing::debug!(%from, "gateway ignores TIME");
            return;
        }
        // Only the gateway or this device's own parent may set the clock.
        let from_parent = self.config.parent() == Some(from);
        if !from.is_gateway() && !from_parent {
            tracing::debug!(%from, "TIME from unrelated device");
            return;
        }

        hooks.set_wall_clock(payload.time);
        hooks.time_synchronized();
        tracing::debug!(time = %payload.time, %from, "wall clock synchronized");

        // Pass the broadcast down the tree so multi-hop descendants hear it.
        if self.config.routing.children_of(self.device()).next().is_some() {
            if let Err(err) = self.broadcast_time(payload.time) {
                tracing::warn!(%err, "TIME re-broadcast failed");
            }
        }
    }

    fn handle_ask_time(&self, hop: DeviceId, payload: AskTimePayload, hooks: &dyn MeshHooks) {
        if !self.config.is_gateway() || hop != self.device() {
            tracing::debug!(%hop, "ignoring ASKTIME");
            return;
        }
        let requester = payload.requester;
        if requester.is_gateway() || !requester.in_range(self.config.device_count) {
            tracing::warn!(%requester, "ASKTIME from invalid device");
            return;
        }
        let Some(time) = hooks.wall_clock() else {
            tracing::warn!(%requester, "ASKTIME before clock is available");
            return;
        };
        tracing::debug!(%requester, "broadcasting TIME on request");
        if let Err(err) = self.broadcast_time(time) {
            tracing::warn!(%err, "TIME broadcast failed");
        }
    }

    fn route_ids_valid(&self, route: &RouteList) -> bool {
        route
            .hops()
            .iter()
            .all(|hop| hop.in_range(self.config.device_count))
    }

    fn handle_send(&self, hop: DeviceId, payload: SendPayload, hooks: &dyn MeshHooks) {
        if hop != self.device() {
            tracing::debug!(%hop, "SEND for another hop");
            return;
        }
        let origin = payload.origin;
        if origin.is_gateway() || !origin.in_range(self.config.device_count) {
            tracing::warn!(%origin, "SEND with invalid origin");
            return;
        }
        if !self.route_ids_valid(&payload.route) {
            tracing::warn!(%origin, "SEND with out-of-range route entry");
            return;
        }

        if self.config.is_gateway() {
            self.gateway_accept(payload, hooks);
        } else {
            self.forward_send(payload);
        }
    }

    fn gateway_accept(&self, payload: SendPayload, hooks: &dyn MeshHooks) {
        let SendPayload {
            origin,
            route,
            serial,
            sample,
        } = payload;

        if !hooks.upload(origin, serial, &sample) {
            // No ACK: the origin keeps the sample queued and retries.
            tracing::warn!(%origin, %serial, "upload failed, withholding ack");
            return;
        }

        let next_hop = route.tail();
        let ack = Payload::Ack(AckPayload {
            origin,
            route,
            serial,
        });
        tracing::debug!(%origin, %serial, %next_hop, "sample uploaded, acknowledging");
        if let Err(err) = self.transmit_payload(next_hop, &ack) {
            tracing::warn!(%err, "ack transmit failed");
        }
    }

    fn forward_send(&self, mut payload: SendPayload) {
        let Some(parent) = self.config.parent() else {
            tracing::warn!("no parent provisioned, cannot forward");
            return;
        };
        if payload.route.append(self.device()).is_err() {
            tracing::warn!(origin = %payload.origin, "route list full, dropping SEND");
            return;
        }
        tracing::debug!(origin = %payload.origin, %parent, "forwarding SEND");
        if let Err(err) = self.transmit_payload(parent, &Payload::Send(payload)) {
            tracing::warn!(%err, "SEND forward failed");
        }
    }

    fn handle_ack(&self, hop: DeviceId, payload: AckPayload) {
        if self.config.is_gateway() {
            tracing::debug!("gateway ignores ACK");
            return;
        }
        if hop != self.device() {
            tracing::debug!(%hop, "ACK for another hop");
            return;
        }
        if !self.route_ids_valid(&payload.route) {
            tracing::warn!("ACK with out-of-range route entry");
            return;
        }

        let AckPayload {
            origin,
            mut route,
            serial,
        } = payload;

        if origin == self.device() {
            // Terminal hop: the route must be back down to the origin alone.
            if route.len() != 1 {
                tracing::warn!(%origin, "dirty route list on terminal ACK");
                return;
            }
            self.sender.observe_ack(serial);
            return;
        }

        // Intermediate hop: strip self from the tail, pass it on.
        if route.tail() != self.device() {
            tracing::warn!(%origin, "ACK route tail is not this hop");
            return;
        }
        if route.strip_tail().is_err() {
            tracing::warn!(%origin, "ACK route exhausted early");
            return;
        }
        let next_hop = route.tail();
        tracing::debug!(%origin, %serial, %next_hop, "forwarding ACK");
        let ack = Payload::Ack(AckPayload {
            origin,
            route,
            serial,
        });
        if let Err(err) = self.transmit_payload(next_hop, &ack) {
            tracing::warn!(%err, "ACK forward failed");
        }
    }
}
