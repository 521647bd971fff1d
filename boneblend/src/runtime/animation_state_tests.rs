use super::test_fixtures::{EventLog, Recorder, hold_clip, record_events, rig, slide_clip};
use crate::{
    AnimationConfig, AnimationController, AnimationEventKind, AnimationFadeOutMode, Armature,
    BlendKey, BlendKind, FadePhase, PlayheadState,
};

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(diff <= 1.0e-5, "expected {expected}, got {actual} (diff {diff})");
}

fn setup() -> (AnimationController, Armature) {
    let mut walk = slide_clip("walk", 2.0, "root");
    walk.play_times = 1;
    let mut idle = slide_clip("idle", 1.0, "root");
    idle.play_times = 0;
    let controller = AnimationController::with_animations([walk, idle, hold_clip("hold", 3.0)]);
    (controller, rig())
}

fn config(animation: &str, fade_in_time: f32) -> AnimationConfig {
    AnimationConfig {
        fade_in_time,
        ..AnimationConfig::new(animation)
    }
}

#[test]
fn fade_in_progresses_linearly() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 1.0))
        .expect("fade in");

    let mut progress = Vec::new();
    for dt in [0.0, 0.5, 0.5] {
        controller.advance_time(&mut armature, dt);
        let state = controller.get(handle).expect("state");
        progress.push(state.fade_progress());
    }
    assert_approx(progress[0], 0.0);
    assert_approx(progress[1], 0.5);
    assert_approx(progress[2], 1.0);

    let state = controller.get(handle).expect("state");
    assert_eq!(state.fade_phase(), FadePhase::Complete);
    assert_approx(state.weight_result(), 1.0);
}

#[test]
fn fade_out_progresses_to_removal() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 0.0))
        .expect("fade in");
    handle
        .fade_out(&mut controller, 1.0, true)
        .expect("fade out");

    let mut progress = Vec::new();
    for dt in [0.0, 0.5, 0.5] {
        controller.advance_time(&mut armature, dt);
        progress.push(controller.get(handle).expect("state").fade_progress());
    }
    assert_approx(progress[0], 1.0);
    assert_approx(progress[1], 0.5);
    assert_approx(progress[2], 0.0);
    assert!(controller.get(handle).is_some_and(|s| s.is_finished()));

    controller.advance_time(&mut armature, 0.1);
    assert!(controller.get(handle).is_none());
    assert_eq!(controller.live_state_count(), 0);
    assert_eq!(controller.live_timeline_count(), 0);
}

#[test]
fn fade_out_mid_fade_in_continues_from_current_progress() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 1.0))
        .expect("fade in");
    controller.advance_time(&mut armature, 0.0);
    controller.advance_time(&mut armature, 0.5);

    handle
        .fade_out(&mut controller, 0.4, true)
        .expect("fade out");
    let state = controller.get(handle).expect("state");
    assert_approx(state.fade_total_time(), 0.8);

    controller.advance_time(&mut armature, 0.2);
    assert_approx(controller.get(handle).expect("state").fade_progress(), 0.25);

    controller.advance_time(&mut armature, 0.2);
    assert_approx(controller.get(handle).expect("state").fade_progress(), 0.0);
}

#[test]
fn shorter_fade_out_requests_are_ignored() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 0.0))
        .expect("fade in");
    handle
        .fade_out(&mut controller, 1.0, true)
        .expect("fade out");
    controller.advance_time(&mut armature, 0.0);

    handle
        .fade_out(&mut controller, 0.5, true)
        .expect("fade out");
    assert_approx(controller.get(handle).expect("state").fade_total_time(), 1.0);

    controller.advance_time(&mut armature, 0.2);
    handle
        .fade_out(&mut controller, 2.0, true)
        .expect("fade out");
    let state = controller.get(handle).expect("state");
    assert_approx(state.fade_total_time(), 2.5);
    assert_approx(state.fade_progress(), 0.8);
}

#[test]
fn negative_fade_out_finishes_on_the_next_tick() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 0.0))
        .expect("fade in");
    handle
        .fade_out(&mut controller, -1.0, true)
        .expect("fade out");
    assert_eq!(controller.get(handle).expect("state").fade_total_time(), 0.0);

    controller.advance_time(&mut armature, 0.0);
    assert!(controller.get(handle).is_some_and(|s| s.is_finished()));
}

#[test]
fn nan_fade_out_is_rejected() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 0.0))
        .expect("fade in");
    assert!(handle.fade_out(&mut controller, f32::NAN, true).is_err());
    assert!(!controller.get(handle).expect("state").is_fade_out());
}

#[test]
fn finite_clip_completes_once_and_fades_out() {
    let (mut controller, mut armature) = setup();
    let events = record_events(&mut armature);
    let config = AnimationConfig {
        play_times: 1,
        auto_fade_out_time: 0.0,
        ..config("walk", 0.0)
    };
    let handle = controller.fade_in(&mut armature, &config).expect("fade in");
    assert_eq!(
        events.kinds(),
        vec![
            AnimationEventKind::FadeIn,
            AnimationEventKind::FadeInComplete,
            AnimationEventKind::Start,
        ]
    );

    for _ in 0..4 {
        controller.advance_time(&mut armature, 0.5);
    }
    let state = controller.get(handle).expect("state");
    assert_eq!(state.current_play_times(), 1);
    assert!(state.is_completed());
    assert!(state.is_fade_out());
    assert_eq!(events.count(AnimationEventKind::Complete), 1);
    assert_eq!(events.count(AnimationEventKind::LoopComplete), 1);

    for _ in 0..3 {
        controller.advance_time(&mut armature, 0.5);
    }
    assert_eq!(events.count(AnimationEventKind::FadeOut), 1);
    assert_eq!(events.count(AnimationEventKind::FadeOutComplete), 1);
    assert_eq!(events.count(AnimationEventKind::Complete), 1);
    assert_eq!(events.count(AnimationEventKind::FadeInComplete), 1);
    assert!(controller.get(handle).is_none());
    assert_eq!(controller.live_timeline_count(), 0);
}

#[test]
fn zero_weight_state_advances_without_contributing() {
    let (mut controller, mut armature) = setup();
    let config = AnimationConfig {
        weight: 0.0,
        ..config("idle", 0.0)
    };
    let handle = controller.fade_in(&mut armature, &config).expect("fade in");
    controller.advance_time(&mut armature, 2.5);

    let state = controller.get(handle).expect("state");
    assert_eq!(state.current_play_times(), 2);
    assert_approx(state.current_time(), 0.5);
    assert!(
        armature
            .blend_state(BlendKey::new(BlendKind::BoneTransform, 0))
            .is_none()
    );
    assert_eq!(armature.bones[0].animation_pose.x, 0.0);
}

#[test]
fn zero_weight_state_still_fades_out_on_completion() {
    let (mut controller, mut armature) = setup();
    let config = AnimationConfig {
        weight: 0.0,
        auto_fade_out_time: 0.5,
        ..config("walk", 0.0)
    };
    let handle = controller.fade_in(&mut armature, &config).expect("fade in");

    controller.advance_time(&mut armature, 2.5);
    let state = controller.get(handle).expect("state");
    assert!(state.is_completed());
    assert!(state.is_fade_out());
    assert_approx(state.fade_total_time(), 0.5);

    controller.advance_time(&mut armature, 0.5);
    assert!(controller.get(handle).is_some_and(|s| s.is_finished()));
    assert_eq!(armature.bones[0].animation_pose.x, 0.0);

    controller.advance_time(&mut armature, 0.0);
    assert_eq!(controller.live_state_count(), 0);
}

#[test]
fn seeking_keeps_completed_loops() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 0.0))
        .expect("fade in");
    controller.advance_time(&mut armature, 1.2);
    assert_eq!(controller.get(handle).expect("state").current_play_times(), 1);

    handle
        .set_current_time(&mut controller, 2.5)
        .expect("seek");
    let state = controller.get(handle).expect("state");
    assert_eq!(state.current_play_times(), 1);
    assert_approx(state.current_time(), 0.5);
}

#[test]
fn seeking_to_the_end_of_the_last_loop_does_not_complete() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("walk", 0.0))
        .expect("fade in");

    handle
        .set_current_time(&mut controller, 2.0)
        .expect("seek");
    let state = controller.get(handle).expect("state");
    assert!(!state.is_completed());
    assert!(state.current_time() < 2.0);
    assert!(handle.set_current_time(&mut controller, f32::INFINITY).is_err());
}

#[test]
fn reverse_playback_starts_at_the_end() {
    let (mut controller, mut armature) = setup();
    let config = AnimationConfig {
        time_scale: -1.0,
        ..config("walk", 0.0)
    };
    let handle = controller.fade_in(&mut armature, &config).expect("fade in");
    assert_approx(controller.get(handle).expect("state").current_time(), 2.0);

    controller.advance_time(&mut armature, 0.5);
    assert_approx(controller.get(handle).expect("state").current_time(), 1.5);
    assert_approx(armature.bones[0].animation_pose.x, 7.5);
}

#[test]
fn stopped_playhead_holds_time_while_fades_run() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("idle", 1.0))
        .expect("fade in");
    controller.advance_time(&mut armature, 0.0);
    handle.stop(&mut controller).expect("stop");
    controller.advance_time(&mut armature, 0.5);

    let state = controller.get(handle).expect("state");
    assert_eq!(state.playhead_state(), PlayheadState::Stopped);
    assert_approx(state.current_time(), 0.0);
    assert_approx(state.fade_progress(), 0.5);

    handle.play(&mut controller).expect("play");
    controller.advance_time(&mut armature, 0.25);
    assert_approx(controller.get(handle).expect("state").current_time(), 0.25);
}

#[test]
fn paused_fade_in_holds_the_playhead_until_complete() {
    let (mut controller, mut armature) = setup();
    let config = AnimationConfig {
        pause_fade_in: true,
        ..config("idle", 0.5)
    };
    let handle = controller.fade_in(&mut armature, &config).expect("fade in");
    controller.advance_time(&mut armature, 0.25);
    assert_approx(controller.get(handle).expect("state").current_time(), 0.0);

    // The playhead resumes in the tick that completes the fade.
    controller.advance_time(&mut armature, 0.25);
    assert_approx(controller.get(handle).expect("state").current_time(), 0.25);

    controller.advance_time(&mut armature, 0.25);
    assert_approx(controller.get(handle).expect("state").current_time(), 0.5);
}

#[test]
fn removing_a_state_twice_is_harmless() {
    let (mut controller, mut armature) = setup();
    let handle = controller
        .fade_in(&mut armature, &config("walk", 0.0))
        .expect("fade in");
    assert!(controller.live_timeline_count() > 0);

    assert!(controller.remove_state(handle));
    assert!(!controller.remove_state(handle));
    assert_eq!(controller.live_state_count(), 0);
    assert_eq!(controller.live_timeline_count(), 0);
    assert!(handle.play(&mut controller).is_err());
    assert!(controller.last_state().is_none());
}

#[test]
fn listener_gate_filters_event_kinds() {
    let (mut controller, mut armature) = setup();
    let log = EventLog::default();
    armature.set_listener(Recorder {
        log: log.clone(),
        only: Some(AnimationEventKind::Start),
    });

    controller
        .fade_in(&mut armature, &config("walk", 0.0))
        .expect("fade in");
    assert_eq!(log.kinds(), vec![AnimationEventKind::Start]);
}

#[test]
fn events_carry_the_state_handle() {
    let (mut controller, mut armature) = setup();
    let events = record_events(&mut armature);
    let config = AnimationConfig {
        name: "walk_upper".to_string(),
        fade_out_mode: AnimationFadeOutMode::None,
        ..config("walk", 0.0)
    };
    let handle = controller.fade_in(&mut armature, &config).expect("fade in");
    events.clear();

    handle
        .fade_out(&mut controller, 0.0, true)
        .expect("fade out");
    controller.advance_time(&mut armature, 0.1);
    assert_eq!(
        events.kinds(),
        vec![AnimationEventKind::FadeOut, AnimationEventKind::FadeOutComplete]
    );
    assert_eq!(events.states(), vec![handle, handle]);
    assert_eq!(
        controller.state("walk_upper"),
        Some(handle),
        "state stays addressable until the next tick"
    );
}

#[test]
fn disabled_actions_emit_nothing() {
    let (mut controller, mut armature) = setup();
    let events = record_events(&mut armature);
    let config = AnimationConfig {
        action_enabled: false,
        ..config("walk", 0.0)
    };
    controller.fade_in(&mut armature, &config).expect("fade in");
    controller.advance_time(&mut armature, 3.0);
    assert!(events.kinds().is_empty());
}
