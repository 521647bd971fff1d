use super::test_fixtures::{rig, slide_clip};
use crate::{AnimationController, AnimationStateHandle, Armature, Error};

fn playing() -> (AnimationController, Armature, AnimationStateHandle) {
    let mut controller = AnimationController::with_animations([slide_clip("wave", 1.0, "armL")]);
    let mut armature = rig();
    let handle = controller
        .play(&mut armature, "wave", 0)
        .expect("play wave");
    (controller, armature, handle)
}

fn mask(controller: &AnimationController, handle: AnimationStateHandle) -> Vec<String> {
    controller
        .get(handle)
        .map(|s| s.bone_mask().to_vec())
        .unwrap_or_default()
}

#[test]
fn recursive_add_covers_the_subtree() {
    let (mut controller, armature, handle) = playing();
    handle
        .add_bone_mask(&mut controller, &armature, "root", true)
        .expect("mask");

    assert_eq!(mask(&controller, handle), ["root", "armL", "handL", "armR"]);
    let state = controller.get(handle).expect("state");
    assert!(!state.contains_bone_mask("tail"));
}

#[test]
fn plain_add_covers_one_bone() {
    let (mut controller, armature, handle) = playing();
    handle
        .add_bone_mask(&mut controller, &armature, "armL", false)
        .expect("mask");
    handle
        .add_bone_mask(&mut controller, &armature, "armL", false)
        .expect("mask");

    assert_eq!(mask(&controller, handle), ["armL"]);
}

#[test]
fn removing_from_an_empty_mask_keeps_everything_else() {
    let (mut controller, armature, handle) = playing();
    handle
        .remove_bone_mask(&mut controller, &armature, "armL", true)
        .expect("mask");

    assert_eq!(mask(&controller, handle), ["root", "armR", "tail"]);
}

#[test]
fn recursive_remove_drops_the_subtree() {
    let (mut controller, armature, handle) = playing();
    handle
        .add_bone_mask(&mut controller, &armature, "root", true)
        .expect("mask");
    handle
        .remove_bone_mask(&mut controller, &armature, "armL", true)
        .expect("mask");

    assert_eq!(mask(&controller, handle), ["root", "armR"]);
}

#[test]
fn unknown_bones_are_rejected() {
    let (mut controller, armature, handle) = playing();
    let err = handle
        .add_bone_mask(&mut controller, &armature, "wing", true)
        .expect_err("unknown bone");
    assert!(matches!(err, Error::UnknownBone { ref name } if name == "wing"));
    assert!(mask(&controller, handle).is_empty());

    assert!(
        handle
            .remove_bone_mask(&mut controller, &armature, "wing", false)
            .is_err()
    );
}

#[test]
fn remove_all_unmasks_every_bone() {
    let (mut controller, armature, handle) = playing();
    handle
        .add_bone_mask(&mut controller, &armature, "armR", false)
        .expect("mask");
    handle
        .remove_all_bone_mask(&mut controller)
        .expect("unmask");

    let state = controller.get(handle).expect("state");
    assert!(state.bone_mask().is_empty());
    assert!(state.contains_bone_mask("tail"));
}
