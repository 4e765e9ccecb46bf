use esm_core::config::EsmConfigBuilder;
use esm_core::policy::{PendingOutcome, ReceivedEsm};
use esm_core::sim::{NetworkConfig, SimEnvironment, Simulation};
use esm_core::{
    compute_message_id, BasePolicy, Environment, EsmConfig, EsmError, EsmProtocol, EventHistory,
    InstantaneousPolicy, MessageId, NodeId, PhysicalState, PropagationPolicy, SafetyEvent,
    Scheduler,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Sends = Arc<Mutex<Vec<(NodeId, MessageId)>>>;
type Receives = Arc<Mutex<Vec<(NodeId, MessageId, Duration)>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn recording_config() -> (Arc<EsmConfig>, Sends, Receives) {
    let sends: Sends = Arc::new(Mutex::new(Vec::new()));
    let receives: Receives = Arc::new(Mutex::new(Vec::new()));
    let send_sink = Arc::clone(&sends);
    let recv_sink = Arc::clone(&receives);

    let config = EsmConfigBuilder::new()
        .with_send_callback(move |node, mid| send_sink.lock().unwrap().push((node, mid)))
        .with_receive_callback(move |node, mid, latency| recv_sink.lock().unwrap().push((node, mid, latency)))
        .build()
        .expect("default config is valid");
    (config, sends, receives)
}

fn fixed_latency(latency: Duration) -> NetworkConfig {
    NetworkConfig {
        base_latency: latency,
        jitter_fraction: 0.0,
        range_m: Some(300.0),
        seed: 7,
    }
}

/// Vehicle `index` cars back in lane 1, 20 m apart
fn lane_vehicle(index: u32) -> PhysicalState {
    PhysicalState {
        x: 500.0 - 20.0 * index as f64,
        y: 3.5,
        speed: 30.0 - index as f64 * 0.5,
        heading: 0.0,
        acceleration: 0.0,
        length: 4.5,
        width: 1.8,
        lane_id: 1,
        offset: 500.0 - 20.0 * index as f64,
    }
}

/// Acts on every distinct event once, remembering it in history
#[derive(Debug, Clone, Default)]
struct AcceptOnce {
    max_sends: u32,
    seen: Arc<Mutex<Vec<ReceivedEsm>>>,
}

impl PropagationPolicy for AcceptOnce {
    fn try_accept_event<E: Environment + ?Sized>(
        &mut self,
        _receiver: NodeId,
        esm: &ReceivedEsm,
        history: &mut EventHistory,
        _env: &mut E,
    ) -> bool {
        let novel = history.observe(
            esm.header.origin_id,
            esm.header.event_sequence,
            esm.header.origin_timestamp(),
        );
        if novel {
            self.seen.lock().unwrap().push(*esm);
        }
        novel
    }

    fn on_pending_action(&mut self, event: &SafetyEvent) -> PendingOutcome {
        if event.sent_count() < self.max_sends {
            PendingOutcome::Resend
        } else {
            PendingOutcome::Idle
        }
    }
}

#[test]
fn test_base_policy_receiver_stays_silent() {
    init_tracing();
    let (config, sends, receives) = recording_config();
    let mut sim: Simulation<BasePolicy> = Simulation::new(config, fixed_latency(Duration::from_millis(100)));
    sim.add_node(1, lane_vehicle(0), BasePolicy);
    sim.add_node(2, lane_vehicle(1), BasePolicy);

    let mid = sim.raise_hazard(1).unwrap();
    assert_eq!(mid, compute_message_id(1, 1));
    assert_eq!(sim.in_flight(), 1);

    sim.run_until(Duration::from_secs(1)).unwrap();

    assert_eq!(*sends.lock().unwrap(), vec![(1, mid)]);
    assert!(receives.lock().unwrap().is_empty());
    assert!(sim.node(2).unwrap().history().is_empty());
    assert_eq!(sim.in_flight(), 0);

    println!("✓ Base policy: packet delivered at t=0.1s, no receive notification");
}

#[test]
fn test_instantaneous_warning_reaches_follower_chain() {
    init_tracing();
    let (config, sends, receives) = recording_config();
    let mut sim: Simulation<InstantaneousPolicy> = Simulation::new(config, NetworkConfig::default());
    for id in 1..=4 {
        sim.add_node(id, lane_vehicle(id - 1), InstantaneousPolicy);
    }
    sim.set_rear_neighbor(1, 2);
    sim.set_rear_neighbor(2, 3);
    sim.set_rear_neighbor(3, 4);

    sim.raise_hazard(1).unwrap();

    let expected: Vec<_> = (2..=4)
        .map(|id| (id, MessageId::INSTANTANEOUS, Duration::ZERO))
        .collect();
    assert_eq!(*receives.lock().unwrap(), expected);

    // the wire copy is ignored by the receivers
    sim.run_until(Duration::from_secs(1)).unwrap();
    assert_eq!(*receives.lock().unwrap(), expected);
    assert!(receives.lock().unwrap().iter().all(|(id, _, _)| *id != 1));
    assert_eq!(sends.lock().unwrap().len(), 1);

    println!("✓ Instantaneous warning: followers 2, 3, 4 signalled with zero latency");
}

#[test]
fn test_accepted_event_reports_latency_once() {
    init_tracing();
    let (config, _sends, receives) = recording_config();
    let policy = AcceptOnce::default();
    let mut sim = Simulation::new(config, fixed_latency(Duration::from_millis(100)));
    sim.add_node(1, lane_vehicle(0), policy.clone());
    sim.add_node(2, lane_vehicle(1), policy.clone());
    sim.add_node(3, lane_vehicle(2), policy.clone());

    let mid = sim.raise_hazard(1).unwrap();
    sim.run_until(Duration::from_millis(50)).unwrap();
    sim.resend(1, mid).unwrap();
    sim.run_until(Duration::from_secs(1)).unwrap();

    let mut receives = receives.lock().unwrap().clone();
    receives.sort_by_key(|r| r.0);
    assert_eq!(
        receives,
        vec![
            (2, mid, Duration::from_millis(100)),
            (3, mid, Duration::from_millis(100)),
        ]
    );
    assert_eq!(sim.node(1).unwrap().history().lookup(mid).unwrap().sent_count(), 2);
    assert!(sim.node(2).unwrap().history().contains(mid));

    println!("✓ Duplicate copy suppressed, latency measured from origination");
}

#[test]
fn test_physical_state_survives_the_wire() {
    init_tracing();
    let (config, _sends, _receives) = recording_config();
    let policy = AcceptOnce::default();
    let mut sim = Simulation::new(config, fixed_latency(Duration::from_millis(3)));

    let origin_state = PhysicalState {
        x: 1042.125,
        y: -7.75,
        speed: 33.3,
        heading: 3.1,
        acceleration: -7.9,
        length: 12.0,
        width: 2.55,
        lane_id: 3,
        offset: 1040.5,
    };
    sim.add_node(10, origin_state, policy.clone());
    sim.add_node(11, PhysicalState { x: 1000.0, ..origin_state }, policy.clone());

    sim.run_until(Duration::from_millis(250)).unwrap();
    let mid = sim.raise_hazard(10).unwrap();
    sim.run_until(Duration::from_secs(1)).unwrap();

    let seen = policy.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let esm = &seen[0];
    assert_eq!(esm.message_id(), mid);
    assert_eq!(esm.header.origin_id, 10);
    assert_eq!(esm.header.event_sequence, 1);
    assert_eq!(esm.header.origin_timestamp(), Duration::from_millis(250));
    assert_eq!(esm.state, origin_state);
    assert_eq!(esm.link.sender, 10);
}

#[test]
fn test_out_of_range_vehicle_hears_nothing() {
    let (config, _sends, receives) = recording_config();
    let policy = AcceptOnce::default();
    let mut sim = Simulation::new(config, fixed_latency(Duration::from_millis(5)));
    sim.add_node(1, lane_vehicle(0), policy.clone());
    sim.add_node(2, lane_vehicle(1), policy.clone());
    sim.add_node(3, PhysicalState { x: -2000.0, ..lane_vehicle(2) }, policy.clone());

    sim.raise_hazard(1).unwrap();
    sim.run_until(Duration::from_secs(1)).unwrap();

    let nodes: Vec<NodeId> = receives.lock().unwrap().iter().map(|r| r.0).collect();
    assert_eq!(nodes, vec![2]);
}

#[test]
fn test_new_hazard_cancels_pending_retransmission() {
    init_tracing();
    let (config, sends, receives) = recording_config();
    let policy = AcceptOnce { max_sends: 3, ..Default::default() };
    let mut sim = Simulation::new(config, fixed_latency(Duration::from_millis(2)));
    sim.add_node(1, lane_vehicle(0), policy.clone());
    sim.add_node(2, lane_vehicle(1), policy.clone());

    let first = sim.raise_hazard(1).unwrap();
    let action = sim
        .schedule_pending_action(1, first, Duration::from_millis(50))
        .unwrap();
    assert!(sim.env().is_pending(action));

    sim.run_until(Duration::from_millis(10)).unwrap();
    let second = sim.raise_hazard(1).unwrap();
    assert_ne!(first, second);
    assert!(!sim.env().is_pending(action));

    sim.run_until(Duration::from_secs(1)).unwrap();

    let origin = sim.node(1).unwrap();
    assert_eq!(origin.history().lookup(first).unwrap().sent_count(), 1);
    assert_eq!(origin.history().lookup(second).unwrap().sent_count(), 1);
    assert_eq!(origin.current_event_sequence(), 2);
    assert_eq!(*sends.lock().unwrap(), vec![(1, first), (1, second)]);

    let mids: Vec<MessageId> = receives.lock().unwrap().iter().map(|r| r.1).collect();
    assert_eq!(mids, vec![first, second]);
}

#[test]
fn test_pending_action_drives_retransmission() {
    init_tracing();
    let (config, sends, receives) = recording_config();
    let policy = AcceptOnce { max_sends: 2, ..Default::default() };
    let mut env = SimEnvironment::new();
    env.add_vehicle(1, lane_vehicle(0));

    let mut protocol = EsmProtocol::with_policy(config, policy);
    protocol.attach(1);

    let mid = protocol.raise_hazard(&mut env).unwrap();
    let action = protocol
        .schedule_pending_action(mid, Duration::from_millis(30), &mut env)
        .unwrap();

    let fired = env.pop_due_action(Duration::from_secs(1)).unwrap();
    assert_eq!(fired.action, action);
    assert_eq!(fired.message_id, mid);
    protocol
        .handle_pending_action(fired.action, fired.message_id, &mut env)
        .unwrap();

    // a stale firing for the same action is ignored
    protocol
        .handle_pending_action(fired.action, fired.message_id, &mut env)
        .unwrap();

    assert_eq!(env.outbox().len(), 2);
    assert_eq!(env.outbox()[1].sent_at, Duration::from_millis(30));
    assert_eq!(protocol.history().lookup(mid).unwrap().sent_count(), 2);
    assert_eq!(sends.lock().unwrap().len(), 2);
    assert!(receives.lock().unwrap().is_empty());
}

#[test]
fn test_packet_size_tracks_configuration() {
    let minimum = EsmConfig::minimum_message_size(esm_core::WSMP_HEADER_SIZE);

    for message_size in [minimum, 200, 512, 1400] {
        let config = EsmConfigBuilder::new()
            .with_message_size(message_size)
            .build()
            .unwrap();
        let mut env = SimEnvironment::new();
        env.add_vehicle(1, lane_vehicle(0));
        let mut protocol = EsmProtocol::new(config);
        protocol.attach(1);

        let mid = protocol.create_new_event(&mut env).unwrap();
        protocol.send_event(mid, &mut env).unwrap();

        assert_eq!(
            env.outbox()[0].packet.len(),
            message_size - esm_core::WSMP_HEADER_SIZE,
            "message size {}",
            message_size
        );
    }

    let undersized = EsmConfigBuilder::new().with_message_size(minimum - 1).build();
    assert!(matches!(undersized, Err(EsmError::BufferTooSmall { .. })));

    println!("✓ Padding: packet length equals message size minus lower header");
}

#[test]
fn test_shutdown_twice_is_safe() {
    init_tracing();
    let (config, _sends, _receives) = recording_config();
    let policy = AcceptOnce::default();
    let mut sim = Simulation::new(config, fixed_latency(Duration::from_millis(2)));
    sim.add_node(1, lane_vehicle(0), policy.clone());
    sim.add_node(2, lane_vehicle(1), policy.clone());

    let mid = sim.raise_hazard(1).unwrap();
    let action = sim
        .schedule_pending_action(1, mid, Duration::from_secs(5))
        .unwrap();

    sim.shutdown();
    sim.shutdown();

    assert!(!sim.env().is_pending(action));
    assert_eq!(sim.env().cancelled_count(), 1);
    assert!(!sim.node(1).unwrap().is_attached());
    assert!(sim.node(1).unwrap().history().is_empty());
    assert_eq!(sim.in_flight(), 0);

    assert_eq!(sim.raise_hazard(1), Err(EsmError::NotAttached));
}
