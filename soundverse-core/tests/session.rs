//! `AudioGraphManager` against mock devices.

mod common;

use common::{manager, DeviceProbe, MockDevices};
use soundverse_core::{
    graph::{
        nodes::{Gain, NodeKind},
        Endpoint,
    },
    AudioGraphManager, EffectKind, EffectParams, Session, SoundverseError,
};

fn graph_len(session: &Session) -> usize {
    session
        .context()
        .map_or(0, |ctx| ctx.graph().lock().len())
}

#[test]
fn acquire_input_is_idempotent() {
    let probe = DeviceProbe::default();
    let mut audio = manager(&probe);
    let mut session = Session::new();

    audio.acquire_input(&mut session).unwrap();
    audio.acquire_input(&mut session).unwrap();

    assert!(session.has_input());
    assert_eq!(probe.microphone_opens(), 1);
    assert_eq!(probe.open_sinks(), 1);
    assert_eq!(session.active_tracks(), 1);
    assert_eq!(graph_len(&session), 1, "only the microphone source");
    audio.release_all(&mut session);
}

#[test]
fn reapplying_always_leaves_exactly_one_chain() {
    let probe = DeviceProbe::default();
    let mut audio = manager(&probe);
    let mut session = Session::new();

    let kinds = [
        EffectKind::Reverb,
        EffectKind::Reverb,
        EffectKind::Delay,
        EffectKind::LowPass,
        EffectKind::HighPass,
        EffectKind::PitchUp,
        EffectKind::GainUp,
        EffectKind::GainDown,
        EffectKind::PitchDown,
    ];
    for kind in kinds {
        audio.apply_effect(&mut session, kind).unwrap();
        assert_eq!(session.active_effect(), Some(kind));
        assert_eq!(session.routed_to_output(), 1, "{kind}");
        assert_eq!(graph_len(&session), 2, "{kind}: source plus one chain node");
    }
    assert_eq!(probe.microphone_opens(), 1);
    audio.release_all(&mut session);
}

#[test]
fn reapplying_the_same_kind_rebuilds_the_chain() {
    let probe = DeviceProbe::default();
    let mut audio = manager(&probe);
    let mut session = Session::new();

    audio.apply_effect(&mut session, EffectKind::Delay).unwrap();
    let first = session.active_chain().cloned().unwrap();
    audio.apply_effect(&mut session, EffectKind::Delay).unwrap();
    let second = session.active_chain().cloned().unwrap();

    assert_ne!(first.nodes, second.nodes);
    let ctx = session.context().unwrap();
    let graph = ctx.graph().lock();
    assert!(!graph.contains(first.nodes[0]));
    assert_eq!(graph.node_kind(second.nodes[0]), Some(NodeKind::Delay));
    drop(graph);
    audio.release_all(&mut session);
}

#[test]
fn applying_none_clears_the_chain_but_keeps_input() {
    let probe = DeviceProbe::default();
    let mut audio = manager(&probe);
    let mut session = Session::new();

    audio.apply_effect(&mut session, EffectKind::GainUp).unwrap();
    audio.apply_effect(&mut session, EffectKind::None).unwrap();

    assert_eq!(session.active_effect(), None);
    assert_eq!(session.routed_to_output(), 0);
    assert!(session.has_input());
    assert_eq!(probe.live_tracks(), 1);
    audio.release_all(&mut session);
}

#[test]
fn release_all_twice_then_acquire_again() {
    let probe = DeviceProbe::default();
    let mut audio = manager(&probe);
    let mut session = Session::new();

    audio.apply_effect(&mut session, EffectKind::Reverb).unwrap();
    audio.release_all(&mut session);
    audio.release_all(&mut session);

    assert!(!session.has_input());
    assert!(session.context().is_none());
    assert_eq!(session.active_effect(), None);
    assert_eq!(session.active_tracks(), 0);
    assert_eq!(probe.live_tracks(), 0);
    assert_eq!(probe.open_sinks(), 0);

    audio.acquire_input(&mut session).unwrap();
    assert!(session.has_input());
    assert_eq!(probe.live_tracks(), 1);
    assert_eq!(probe.microphone_opens(), 2);
    audio.release_all(&mut session);
}

#[test]
fn release_on_a_fresh_session_is_a_no_op() {
    let probe = DeviceProbe::default();
    let mut audio = manager(&probe);
    let mut session = Session::new();
    audio.release_all(&mut session);
    assert_eq!(probe.open_sinks(), 0);
    assert_eq!(probe.microphone_opens(), 0);
}

#[test]
fn denied_microphone_is_device_unavailable() {
    let probe = DeviceProbe::default();
    probe.deny_microphone();
    let mut audio = manager(&probe);
    let mut session = Session::new();

    let err = audio.apply_effect(&mut session, EffectKind::Reverb).unwrap_err();
    assert!(matches!(err, SoundverseError::DeviceUnavailable(_)));
    assert!(err.is_fatal());
    assert_eq!(session.active_effect(), None);
    assert_eq!(session.routed_to_output(), 0);

    audio.release_all(&mut session);
    assert_eq!(probe.open_sinks(), 0);
}

#[test]
fn resamples_microphone_to_the_output_rate() {
    let probe = DeviceProbe::default();
    let mut audio = AudioGraphManager::new(
        Box::new(MockDevices::new(probe.clone()).with_input_rate(44_100)),
        EffectParams::default(),
    );
    let mut session = Session::new();

    audio.apply_effect(&mut session, EffectKind::LowPass).unwrap();
    assert_eq!(session.context().unwrap().sample_rate(), 48_000);
    assert_eq!(session.active_effect(), Some(EffectKind::LowPass));
    audio.release_all(&mut session);
}

#[test]
fn second_route_to_the_output_is_rejected_and_torn_down() {
    let probe = DeviceProbe::default();
    let mut audio = manager(&probe);
    let mut session = Session::new();
    audio.acquire_input(&mut session).unwrap();

    let stray = {
        let ctx = session.context().unwrap();
        let mut graph = ctx.graph().lock();
        let stray = graph.add_node(Box::new(Gain::new(1.0)));
        graph.connect(stray, Endpoint::Destination).unwrap();
        stray
    };

    let err = audio.apply_effect(&mut session, EffectKind::GainUp).unwrap_err();
    assert!(matches!(err, SoundverseError::DoubleRouting { connected: 2 }), "{err:?}");
    assert_eq!(session.active_effect(), None);

    let ctx = session.context().unwrap();
    let graph = ctx.graph().lock();
    assert_eq!(graph.destination_inputs(), vec![stray]);
    assert_eq!(graph.len(), 2, "microphone source and the stray node only");
    drop(graph);
    audio.release_all(&mut session);
}
