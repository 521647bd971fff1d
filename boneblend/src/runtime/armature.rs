use super::blend_state::{BlendKey, BlendState, BlendStates};
use super::events::{AnimationEvent, AnimationEventKind, AnimationEventListener};
use crate::{ArmatureData, Transform};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Bone {
    data_index: usize,
    parent: Option<usize>,
    /// Offset from the bind pose written by blended animation timelines.
    pub animation_pose: Transform,
    pub alpha: f32,
    /// Surface vertex offsets (surface bones only).
    pub deform: Vec<f32>,
    pub transform_dirty: bool,
}

impl Bone {
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub fn parent_index(&self) -> Option<usize> {
        self.parent
    }
}

#[derive(Clone, Debug)]
pub struct Slot {
    data_index: usize,
    bone: usize,
    pub display_index: i32,
    /// Restricts display timelines to the state (by name or group) named here.
    pub display_controller: Option<String>,
    pub color: [f32; 4],
    pub alpha: f32,
    pub z_index: f32,
    /// Deform vertex offsets keyed by geometry offset.
    pub deform: HashMap<usize, Vec<f32>>,
    pub display_dirty: bool,
}

impl Slot {
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub fn bone_index(&self) -> usize {
        self.bone
    }
}

#[derive(Clone, Debug)]
pub struct IkConstraint {
    data_index: usize,
    pub weight: f32,
    pub bend_positive: bool,
}

impl IkConstraint {
    pub fn data_index(&self) -> usize {
        self.data_index
    }
}

/// Live skeleton instance animated by an [`crate::AnimationController`].
pub struct Armature {
    pub data: Arc<ArmatureData>,
    pub bones: Vec<Bone>,
    pub slots: Vec<Slot>,
    pub ik_constraints: Vec<IkConstraint>,
    pub draw_order: Vec<usize>,
    pub(crate) blend_states: BlendStates,
    pub(crate) cache_frame_index: Option<usize>,
    cache_clip: Option<String>,
    cached_poses: HashMap<usize, Vec<Transform>>,
    listener: Option<Box<dyn AnimationEventListener>>,
    event_queue: VecDeque<AnimationEvent>,
    draining_events: bool,
}

impl std::fmt::Debug for Armature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Armature")
            .field("name", &self.data.name)
            .field("bones", &self.bones)
            .field("slots", &self.slots)
            .field("ik_constraints", &self.ik_constraints)
            .field("draw_order", &self.draw_order)
            .field("cache_frame_index", &self.cache_frame_index)
            .finish()
    }
}

impl Armature {
    pub fn new(data: Arc<ArmatureData>) -> Self {
        let bones = data
            .bones
            .iter()
            .enumerate()
            .map(|(i, b)| Bone {
                data_index: i,
                parent: b.parent,
                animation_pose: Transform::IDENTITY,
                alpha: 1.0,
                deform: vec![0.0; b.vertex_count],
                transform_dirty: true,
            })
            .collect();
        let slots = data
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| Slot {
                data_index: i,
                bone: s.bone,
                display_index: s.display_index,
                display_controller: None,
                color: s.color,
                alpha: 1.0,
                z_index: s.z_index as f32,
                deform: HashMap::new(),
                display_dirty: false,
            })
            .collect();
        let ik_constraints = data
            .ik_constraints
            .iter()
            .enumerate()
            .map(|(i, c)| IkConstraint {
                data_index: i,
                weight: c.weight,
                bend_positive: c.bend_positive,
            })
            .collect();
        let draw_order = (0..data.slots.len()).collect();

        Self {
            data,
            bones,
            slots,
            ik_constraints,
            draw_order,
            blend_states: BlendStates::default(),
            cache_frame_index: None,
            cache_clip: None,
            cached_poses: HashMap::new(),
            listener: None,
            event_queue: VecDeque::new(),
            draining_events: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.data.bone_index(name)
    }

    pub fn bone_name(&self, index: usize) -> &str {
        &self.data.bones[index].name
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bone_index(name).map(|i| &self.bones[i])
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.data.slot_index(name).map(|i| &self.slots[i])
    }

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.data.slot_index(name).map(move |i| &mut self.slots[i])
    }

    /// Bind pose composed with the current animation pose.
    pub fn local_transform(&self, bone_index: usize) -> Transform {
        self.data.bones[bone_index]
            .transform
            .with_offset(&self.bones[bone_index].animation_pose)
    }

    /// Whether `bone` lies strictly below `ancestor` in the hierarchy.
    pub fn bone_contains(&self, ancestor: usize, bone: usize) -> bool {
        if ancestor == bone {
            return false;
        }
        let mut current = self.bones.get(bone).and_then(|b| b.parent);
        while let Some(index) = current {
            if index == ancestor {
                return true;
            }
            current = self.bones[index].parent;
        }
        false
    }

    pub fn set_to_setup_pose(&mut self) {
        for (bone, data) in self.bones.iter_mut().zip(self.data.bones.iter()) {
            bone.animation_pose = Transform::IDENTITY;
            bone.alpha = 1.0;
            bone.deform.clear();
            bone.deform.resize(data.vertex_count, 0.0);
            bone.transform_dirty = true;
        }
        for (slot, data) in self.slots.iter_mut().zip(self.data.slots.iter()) {
            slot.display_index = data.display_index;
            slot.color = data.color;
            slot.alpha = 1.0;
            slot.z_index = data.z_index as f32;
            slot.deform.clear();
        }
        for (constraint, data) in self
            .ik_constraints
            .iter_mut()
            .zip(self.data.ik_constraints.iter())
        {
            constraint.weight = data.weight;
            constraint.bend_positive = data.bend_positive;
        }
        self.sort_z_order(None);
    }

    /// Applies a draw order permutation, or restores the setup order when `None`.
    pub fn sort_z_order(&mut self, order: Option<&[usize]>) {
        match order {
            Some(order) if order.len() == self.slots.len() => {
                self.draw_order.clear();
                self.draw_order.extend_from_slice(order);
            }
            Some(order) => {
                log::warn!(
                    "ignoring draw order of length {} for {} slots",
                    order.len(),
                    self.slots.len()
                );
            }
            None => {
                self.draw_order.clear();
                self.draw_order.extend(0..self.slots.len());
            }
        }
    }

    pub fn blend_state(&self, key: BlendKey) -> Option<&BlendState> {
        self.blend_states.get(key)
    }

    pub(crate) fn blend_state_mut(&mut self, key: BlendKey) -> &mut BlendState {
        self.blend_states.get_or_create(key)
    }

    pub(crate) fn reset_blend_states(&mut self) {
        self.blend_states.reset_all();
    }

    /// Points the frame cache at `clip`, dropping poses cached for another clip.
    pub(crate) fn bind_frame_cache(&mut self, clip: &str) {
        if self.cache_clip.as_deref() == Some(clip) {
            return;
        }
        self.cached_poses.clear();
        self.cache_frame_index = None;
        self.cache_clip = Some(clip.to_string());
    }

    pub fn cached_frame_count(&self) -> usize {
        self.cached_poses.len()
    }

    pub(crate) fn store_cached_pose(&mut self, frame: usize) {
        let pose = self.bones.iter().map(|b| b.animation_pose).collect();
        self.cached_poses.insert(frame, pose);
    }

    pub(crate) fn restore_cached_pose(&mut self, frame: usize) -> bool {
        let Some(pose) = self.cached_poses.get(&frame) else {
            return false;
        };
        for (bone, cached) in self.bones.iter_mut().zip(pose.iter()) {
            if bone.animation_pose != *cached {
                bone.animation_pose = *cached;
                bone.transform_dirty = true;
            }
        }
        true
    }

    pub(crate) fn clear_cached_poses(&mut self) {
        self.cached_poses.clear();
        self.cache_clip = None;
        self.cache_frame_index = None;
    }

    pub fn set_listener<L: AnimationEventListener + 'static>(&mut self, listener: L) {
        self.listener = Some(Box::new(listener));
    }

    pub fn has_listener(&self, kind: AnimationEventKind) -> bool {
        self.listener.as_ref().is_some_and(|l| l.has_listener(kind))
    }

    pub(crate) fn queue_event(&mut self, event: AnimationEvent) {
        self.event_queue.push_back(event);
    }

    pub(crate) fn drain_events(&mut self) {
        if self.draining_events {
            return;
        }
        self.draining_events = true;

        let mut listener = self.listener.take();
        while let Some(event) = self.event_queue.pop_front() {
            if let Some(listener) = listener.as_mut() {
                listener.on_event(self, &event);
            }
        }
        if self.listener.is_none() {
            self.listener = listener;
        }

        self.draining_events = false;
    }
}
