// End-to-end session behaviour against an in-memory loopback device
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use can_wuensche::timing::{from_controller_params, to_controller_params};
use can_wuensche::wire::{self, FRAME_LEN, HEADER_LEN};
use can_wuensche::{
    BitTiming, BitTimingFd, BusConfig, BusState, ChannelHandle, ChannelSpec, ControllerFamily,
    ControllerParams, CpcError, DeviceTransport, EventMask, Message, NotificationClass, Timing,
    TimingRequest, WuenscheBus, WuenscheError,
};

#[derive(Default)]
struct Device {
    open: bool,
    closes: usize,
    applied: Vec<ControllerParams>,
    wire: Vec<Vec<u8>>,
    rx: VecDeque<Vec<u8>>,
}

/// Echoes every transmitted frame back into the receive queue
#[derive(Clone, Default)]
struct Loopback(Rc<RefCell<Device>>);

impl Loopback {
    fn inject(&self, frame: Vec<u8>) {
        self.0.borrow_mut().rx.push_back(frame);
    }
}

impl DeviceTransport for Loopback {
    fn open(&mut self, channel: &ChannelSpec) -> Result<ChannelHandle, CpcError> {
        match channel {
            ChannelSpec::Name(name) if name == "CHAN00" => {
                self.0.borrow_mut().open = true;
                Ok(ChannelHandle(3))
            }
            _ => Err(CpcError::NoMatchingChannel),
        }
    }

    fn close(&mut self, _handle: ChannelHandle) -> Result<(), CpcError> {
        let mut device = self.0.borrow_mut();
        device.open = false;
        device.closes += 1;
        Ok(())
    }

    fn apply_params(
        &mut self,
        _handle: ChannelHandle,
        params: &ControllerParams,
    ) -> Result<(), CpcError> {
        self.0.borrow_mut().applied.push(*params);
        Ok(())
    }

    fn send(&mut self, _handle: ChannelHandle, frame: &[u8]) -> Result<(), CpcError> {
        let mut device = self.0.borrow_mut();
        device.wire.push(frame.to_vec());
        device.rx.push_back(frame.to_vec());
        Ok(())
    }

    fn wait_for_event(
        &mut self,
        _handle: ChannelHandle,
        _timeout_ms: u32,
        events: EventMask,
    ) -> Result<EventMask, CpcError> {
        let mut ready = EventMask::WRITE;
        if !self.0.borrow().rx.is_empty() {
            ready |= EventMask::READ;
        }
        Ok(ready & events)
    }

    fn poll_frame(&mut self, _handle: ChannelHandle) -> Option<Vec<u8>> {
        self.0.borrow_mut().rx.pop_front()
    }

    fn clear_queues(&mut self, _handle: ChannelHandle) -> Result<(), CpcError> {
        self.0.borrow_mut().rx.clear();
        Ok(())
    }

    fn clear_command_queue(&mut self, _handle: ChannelHandle) -> Result<(), CpcError> {
        Ok(())
    }

    fn enable_notification(
        &mut self,
        _handle: ChannelHandle,
        _class: NotificationClass,
        _on: bool,
    ) -> Result<(), CpcError> {
        Ok(())
    }

    fn request_info(
        &mut self,
        _handle: ChannelHandle,
        _source: u8,
        _info_type: u8,
    ) -> Result<(), CpcError> {
        Ok(())
    }

    fn cached_info(
        &mut self,
        _handle: ChannelHandle,
        _source: u8,
        _info_type: u8,
    ) -> Option<Vec<u8>> {
        None
    }
}

fn status_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; FRAME_LEN];
    raw[0] = frame_type;
    raw[1] = payload.len() as u8;
    raw[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    raw
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn open_bus(device: &Loopback) -> WuenscheBus<Loopback> {
    init_logging();
    let config = BusConfig::new().with_bitrate(500_000).with_request_info(false);
    WuenscheBus::open(device.clone(), config).unwrap()
}

#[test]
fn test_classic_round_trip_over_the_wire() {
    let device = Loopback::default();
    let mut bus = open_bus(&device);
    assert_eq!(bus.state(), BusState::Active);
    assert_eq!(bus.controller_params().family(), ControllerFamily::Generic);

    let message = Message::new_standard(0x2A5, &[0, 1, 2, 3, 4, 5, 6, 7]);
    bus.send(&message, Some(Duration::from_millis(100))).unwrap();

    let on_wire = device.0.borrow().wire[0].clone();
    let decoded = wire::decode(&on_wire).unwrap().into_message().unwrap();
    assert_eq!(decoded.arbitration_id, 0x2A5);
    assert_eq!(decoded.data, message.data);

    let received = bus.receive(Some(Duration::ZERO)).unwrap().unwrap();
    assert_eq!(received, message);
}

#[test]
fn test_message_shapes_survive_the_device() {
    let device = Loopback::default();
    let mut bus = open_bus(&device);

    let mut esi = Message::new_fd(0x7FF, &[0xA5; 64], false, false);
    esi.error_state_indicator = true;
    let messages = [
        Message::new_standard(0x000, &[]),
        Message::new_extended(0x1FFF_FFFF, &[1, 2, 3]),
        Message::new_remote(0x100, 8, false),
        Message::new_remote(0x0ABC_DEF0, 2, true),
        Message::new_fd(0x1234_5678, &[7; 20], true, true),
        esi,
    ];
    for message in &messages {
        bus.send(message, None).unwrap();
        assert_eq!(&bus.receive(None).unwrap().unwrap(), message);
    }
}

#[test]
fn test_receive_without_frames_is_empty() {
    let device = Loopback::default();
    let mut bus = open_bus(&device);
    assert_eq!(bus.receive(Some(Duration::ZERO)).unwrap(), None);
}

#[test]
fn test_bus_off_recovers_to_target() {
    let device = Loopback::default();
    let mut bus = open_bus(&device);
    bus.set_state(BusState::Passive).unwrap();

    device.inject(status_frame(14, &[0x80]));
    assert_eq!(bus.receive(Some(Duration::ZERO)).unwrap(), None);
    assert_eq!(bus.state(), BusState::Error);

    device.inject(status_frame(14, &[0x40]));
    assert_eq!(bus.receive(Some(Duration::ZERO)).unwrap(), None);
    assert_eq!(bus.state(), BusState::Passive);
}

#[test]
fn test_disconnect_invalidates_session() {
    let device = Loopback::default();
    let mut bus = open_bus(&device);
    device.inject(status_frame(24, &[]));

    assert!(matches!(
        bus.receive(None),
        Err(WuenscheError::DeviceDisconnected)
    ));
    assert!(!bus.is_open());
    assert!(!device.0.borrow().open);
    assert!(matches!(
        bus.send(&Message::new_standard(0x1, &[1]), None),
        Err(WuenscheError::DeviceDisconnected)
    ));
    assert!(matches!(
        bus.receive(Some(Duration::ZERO)),
        Err(WuenscheError::DeviceDisconnected)
    ));
}

#[test]
fn test_drop_closes_channel() {
    let device = Loopback::default();
    {
        let _bus = open_bus(&device);
        assert!(device.0.borrow().open);
    }
    let state = device.0.borrow();
    assert!(!state.open);
    assert_eq!(state.closes, 1);
}

#[test]
fn test_failed_open_leaves_nothing_open() {
    init_logging();
    let device = Loopback::default();
    let err = WuenscheBus::open(device.clone(), BusConfig::new().with_channel("CHAN09"))
        .err()
        .unwrap();
    assert_eq!(err.device_code(), Some(CpcError::NoMatchingChannel.code()));
    assert!(!device.0.borrow().open);
}

#[test]
fn test_oversized_segments_fail_open_cleanly() {
    init_logging();
    let device = Loopback::default();
    let request = TimingRequest {
        fd: Some(false),
        f_clock: Some(8_000_000),
        bitrate: None,
        brp: Some(1),
        tseg1: Some(u32::MAX),
        tseg2: Some(2),
        sjw: Some(1),
        ..TimingRequest::default()
    };
    let config = BusConfig::new().with_timing_request(request);

    let err = WuenscheBus::open(device.clone(), config).err().unwrap();
    assert!(matches!(err, WuenscheError::NoSuitableTiming(_)));
    assert!(!device.0.borrow().open);
    assert!(device.0.borrow().applied.is_empty());
}

#[test]
fn test_timing_round_trip_per_family() {
    init_logging();
    let classic = Timing::Classic(BitTiming::new(8_000_000, 2, 5, 2, 1, 1).unwrap());
    let fd = Timing::Fd(BitTimingFd::new(40_000_000, 2, 15, 4, 3, 1, 14, 5, 4).unwrap());

    for family in [
        ControllerFamily::Generic,
        ControllerFamily::Sja1000,
        ControllerFamily::Lpc546xx,
    ] {
        let params = to_controller_params(&classic, family).unwrap();
        assert_eq!(from_controller_params(&params).unwrap(), classic);
    }
    for family in [ControllerFamily::Generic, ControllerFamily::Lpc546xx] {
        let params = to_controller_params(&fd, family).unwrap();
        assert_eq!(from_controller_params(&params).unwrap(), fd);
    }
    assert!(matches!(
        to_controller_params(&fd, ControllerFamily::Sja1000),
        Err(WuenscheError::UnsupportedByController { .. })
    ));
}

#[test]
fn test_lpc546xx_nominal_register() {
    let fd = Timing::Fd(BitTimingFd::new(40_000_000, 2, 15, 4, 3, 1, 14, 5, 4).unwrap());
    match to_controller_params(&fd, ControllerFamily::Lpc546xx).unwrap() {
        ControllerParams::Lpc546xx(regs) => {
            assert_eq!(regs.nbtp, 3 | (14 << 8) | (1 << 16) | (2 << 25));
        }
        other => panic!("unexpected params {:?}", other),
    }
}

#[test]
fn test_reset_reapplies_after_set_timing() {
    let device = Loopback::default();
    let mut bus = open_bus(&device);
    let timing = BitTiming::new(8_000_000, 4, 5, 2, 1, 1).unwrap();
    bus.set_timing(timing).unwrap();
    bus.reset().unwrap();

    let state = device.0.borrow();
    assert_eq!(state.applied.len(), 3);
    assert_eq!(state.applied[1], state.applied[2]);
    assert_eq!(
        from_controller_params(&state.applied[2]).unwrap(),
        Timing::Classic(timing)
    );
}
