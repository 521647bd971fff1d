use super::test_fixtures::{hold_clip, progress_timeline, record_events, rig};
use crate::{
    AnimationBlendType, AnimationConfig, AnimationController, AnimationData, AnimationEventKind,
    AnimationFadeOutMode, AnimationStateHandle, Armature, Error, Keyframe, TimelineData,
    TimelineType,
};
use std::sync::Arc;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(diff <= 1.0e-5, "expected {expected}, got {actual} (diff {diff})");
}

struct Locomotion {
    controller: AnimationController,
    armature: Armature,
    parent: AnimationStateHandle,
    walk: AnimationStateHandle,
    run: AnimationStateHandle,
}

fn child_config(animation: &str) -> AnimationConfig {
    AnimationConfig {
        fade_out_mode: AnimationFadeOutMode::None,
        ..AnimationConfig::new(animation)
    }
}

/// One-dimensional blend space: `walk` at `x = 0`, `run` at `x = 1`.
fn locomotion() -> Locomotion {
    let mut blend = AnimationData::new("locomotion", 1.0);
    blend.play_times = 0;
    blend.blend_type = AnimationBlendType::E1D;

    let mut controller = AnimationController::with_animations([
        blend,
        hold_clip("walk", 10.0),
        hold_clip("run", 20.0),
    ]);
    let mut armature = rig();

    let parent_config = AnimationConfig {
        reset_to_pose: false,
        ..AnimationConfig::new("locomotion")
    };
    let parent = controller
        .fade_in(&mut armature, &parent_config)
        .expect("fade in locomotion");
    let walk = controller
        .fade_in(&mut armature, &child_config("walk"))
        .expect("fade in walk");
    let run = controller
        .fade_in(&mut armature, &child_config("run"))
        .expect("fade in run");

    parent
        .add_state(&mut controller, walk, &[progress_timeline(0.0)])
        .expect("nest walk");
    parent
        .add_state(&mut controller, run, &[progress_timeline(1.0)])
        .expect("nest run");

    Locomotion {
        controller,
        armature,
        parent,
        walk,
        run,
    }
}

#[test]
fn nested_states_link_to_their_parent() {
    let scene = locomotion();
    let walk = scene.controller.get(scene.walk).expect("walk");
    assert_eq!(walk.parent(), Some(scene.parent));
    assert_eq!(walk.position_x(), 0.0);
    assert_eq!(walk.weight(), 0.0);

    let run = scene.controller.get(scene.run).expect("run");
    assert_eq!(run.position_x(), 1.0);

    let parent = scene.controller.get(scene.parent).expect("parent");
    assert_eq!(parent.animation_timelines().len(), 2);
    assert!(!parent.reset_to_pose());
}

#[test]
fn blend_space_weights_the_two_nearest_children() {
    let mut scene = locomotion();
    scene.parent
        .set_parameter(&mut scene.controller, 0.25, 0.0)
        .expect("parameter");
    scene.controller.advance_time(&mut scene.armature, 0.1);

    let walk = scene.controller.get(scene.walk).expect("walk");
    let run = scene.controller.get(scene.run).expect("run");
    assert_approx(walk.weight(), 0.75);
    assert_approx(run.weight(), 0.25);
    assert_approx(walk.weight_result(), 0.75);
    assert_approx(run.weight_result(), 0.25);
    assert_approx(scene.armature.bones[0].animation_pose.x, 12.5);
}

#[test]
fn parameter_past_the_last_child_selects_it_alone() {
    let mut scene = locomotion();
    scene.parent
        .set_parameter(&mut scene.controller, 1.0, 0.0)
        .expect("parameter");
    scene.controller.advance_time(&mut scene.armature, 0.1);

    let walk = scene.controller.get(scene.walk).expect("walk");
    let run = scene.controller.get(scene.run).expect("run");
    assert_approx(run.weight(), 1.0);
    assert_approx(walk.weight(), 0.0);
    assert_approx(scene.armature.bones[0].animation_pose.x, 20.0);
}

#[test]
fn children_inherit_the_parent_weight() {
    let mut scene = locomotion();
    scene.parent
        .set_weight(&mut scene.controller, 0.5)
        .expect("weight");
    scene.controller.advance_time(&mut scene.armature, 0.1);

    let walk = scene.controller.get(scene.walk).expect("walk");
    assert_approx(walk.weight(), 1.0);
    assert_approx(walk.weight_result(), 0.5);
}

#[test]
fn progress_timeline_drives_child_time() {
    let mut blend = AnimationData::new("sequence", 2.0);
    blend.play_times = 0;
    let mut child = AnimationData::new("swing", 4.0);
    child.play_times = 0;

    let mut controller = AnimationController::with_animations([blend, child]);
    let mut armature = rig();
    let parent = controller
        .fade_in(&mut armature, &AnimationConfig::new("sequence"))
        .expect("sequence");
    let swing = controller
        .fade_in(&mut armature, &child_config("swing"))
        .expect("swing");

    let progress = Arc::new(TimelineData::new(
        TimelineType::AnimationProgress,
        vec![Keyframe::new(0.0, [0.0]), Keyframe::new(2.0, [1.0])],
    ));
    parent
        .add_state(&mut controller, swing, &[progress])
        .expect("nest");
    controller.advance_time(&mut armature, 0.5);

    let swing = controller.get(swing).expect("swing");
    assert_approx(swing.current_time(), 1.0);
}

#[test]
fn nesting_cycles_are_rejected() {
    let mut scene = locomotion();
    let err = scene
        .walk
        .add_state(&mut scene.controller, scene.parent, &[progress_timeline(0.0)])
        .expect_err("cycle");
    assert!(matches!(err, Error::InvalidValue { .. }));

    assert!(
        scene.parent
            .add_state(&mut scene.controller, scene.parent, &[progress_timeline(0.0)])
            .is_err()
    );
}

#[test]
fn fading_out_the_parent_fades_out_children() {
    let mut scene = locomotion();
    scene.parent
        .fade_out(&mut scene.controller, 0.5, true)
        .expect("fade out");

    for handle in [scene.parent, scene.walk, scene.run] {
        assert!(scene.controller.get(handle).is_some_and(|s| s.is_fade_out()));
    }
}

#[test]
fn removing_the_parent_detaches_children() {
    let mut scene = locomotion();
    assert!(scene.controller.remove_state(scene.parent));

    let walk = scene.controller.get(scene.walk).expect("walk");
    assert_eq!(walk.parent(), None);
    assert!(walk.is_finished());

    scene.controller.advance_time(&mut scene.armature, 0.1);
    assert_eq!(scene.controller.live_state_count(), 0);
    assert_eq!(scene.controller.live_timeline_count(), 0);
}

#[test]
fn only_the_root_state_emits_events() {
    let mut scene = locomotion();
    let events = record_events(&mut scene.armature);
    scene.controller.advance_time(&mut scene.armature, 1.5);

    assert_eq!(events.kinds(), vec![AnimationEventKind::LoopComplete]);
    assert_eq!(events.states(), vec![scene.parent]);
}

#[test]
fn nested_children_blend_on_their_root_layer() {
    let mut blend = AnimationData::new("locomotion", 1.0);
    blend.play_times = 0;
    blend.blend_type = AnimationBlendType::E1D;
    let mut controller = AnimationController::with_animations([
        blend,
        hold_clip("walk", 10.0),
        hold_clip("overlay", 100.0),
    ]);
    let mut armature = rig();

    let parent_config = AnimationConfig {
        layer: 5,
        reset_to_pose: false,
        ..AnimationConfig::new("locomotion")
    };
    let parent = controller
        .fade_in(&mut armature, &parent_config)
        .expect("fade in locomotion");
    let walk = controller
        .fade_in(&mut armature, &child_config("walk"))
        .expect("fade in walk");
    parent
        .add_state(&mut controller, walk, &[progress_timeline(0.0)])
        .expect("nest walk");
    parent
        .set_weight(&mut controller, 0.5)
        .expect("parent weight");

    assert_eq!(controller.get(walk).map(|s| s.layer()), Some(5));
    assert_eq!(controller.states(), [parent, walk]);

    let overlay_config = AnimationConfig {
        layer: 3,
        ..child_config("overlay")
    };
    let overlay = controller
        .fade_in(&mut armature, &overlay_config)
        .expect("fade in overlay");

    assert_eq!(controller.states(), [parent, walk, overlay]);
    // walk claims half of the budget on layer 5, overlay gets the rest.
    assert_approx(root_x(&armature), 55.0);

    controller.advance_time(&mut armature, 0.1);
    assert_approx(root_x(&armature), 55.0);
}

fn root_x(armature: &Armature) -> f32 {
    armature.bones[0].animation_pose.x
}
