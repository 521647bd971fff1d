use super::animation_state::{AnimationState, StateContext, StateId, TickOutcome, TimelineId};
use super::armature::Armature;
use super::timeline::{NestedEffect, TimelineState};
use crate::pool::Pool;
use crate::{
    AnimationConfig, AnimationData, AnimationFadeOutMode, Error, TimelineData, TimelineType,
};
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Stable reference to an animation state owned by an [`AnimationController`].
///
/// Handles go stale once the state is removed; every accessor then reports
/// [`Error::InvalidHandle`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AnimationStateHandle {
    id: StateId,
}

impl AnimationStateHandle {
    pub(crate) fn new(id: StateId) -> Self {
        Self { id }
    }

    fn with_state_mut<R>(
        &self,
        controller: &mut AnimationController,
        f: impl FnOnce(&mut AnimationState, &mut Pool<TimelineState>) -> R,
    ) -> Result<R, Error> {
        let state = controller
            .states
            .get_mut(self.id)
            .ok_or(Error::InvalidHandle)?;
        Ok(f(state, &mut controller.timelines))
    }

    pub fn play(&self, controller: &mut AnimationController) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.play())
    }

    pub fn stop(&self, controller: &mut AnimationController) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.stop())
    }

    /// Fades the state (and its nested children) out over `seconds`.
    pub fn fade_out(
        &self,
        controller: &mut AnimationController,
        seconds: f32,
        pause_playhead: bool,
    ) -> Result<(), Error> {
        if seconds.is_nan() {
            return Err(Error::InvalidValue {
                message: "fade-out time is NaN".to_string(),
            });
        }
        if !controller.states.contains(self.id) {
            return Err(Error::InvalidHandle);
        }
        controller.fade_out_state(self.id, seconds, pause_playhead);
        Ok(())
    }

    pub fn set_current_time(
        &self,
        controller: &mut AnimationController,
        seconds: f32,
    ) -> Result<(), Error> {
        if !seconds.is_finite() {
            return Err(Error::InvalidValue {
                message: format!("current time must be finite, got {seconds}"),
            });
        }
        self.with_state_mut(controller, |state, timelines| {
            state.set_current_time(seconds, timelines)
        })
    }

    /// Sets the state's weight, clamped to `[0, 1]`.
    pub fn set_weight(&self, controller: &mut AnimationController, weight: f32) -> Result<(), Error> {
        if !weight.is_finite() {
            return Err(Error::InvalidValue {
                message: format!("weight must be finite, got {weight}"),
            });
        }
        self.with_state_mut(controller, |state, timelines| {
            state.set_weight(weight, timelines)
        })
    }

    pub fn set_time_scale(
        &self,
        controller: &mut AnimationController,
        time_scale: f32,
    ) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.set_time_scale(time_scale))
    }

    pub fn set_play_times(
        &self,
        controller: &mut AnimationController,
        play_times: u32,
    ) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.set_play_times(play_times))
    }

    pub fn set_auto_fade_out_time(
        &self,
        controller: &mut AnimationController,
        seconds: f32,
    ) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.set_auto_fade_out_time(seconds))
    }

    pub fn set_display_control(
        &self,
        controller: &mut AnimationController,
        value: bool,
    ) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.set_display_control(value))
    }

    /// Sets the blend-space parameter read by a parametric parent.
    pub fn set_parameter(
        &self,
        controller: &mut AnimationController,
        x: f32,
        y: f32,
    ) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.set_parameter(x, y))
    }

    pub fn add_bone_mask(
        &self,
        controller: &mut AnimationController,
        armature: &Armature,
        bone_name: &str,
        recursive: bool,
    ) -> Result<(), Error> {
        if armature.bone_index(bone_name).is_none() {
            return Err(Error::UnknownBone {
                name: bone_name.to_string(),
            });
        }
        self.with_state_mut(controller, |state, _| {
            state.add_bone_mask(armature, bone_name, recursive)
        })
    }

    pub fn remove_bone_mask(
        &self,
        controller: &mut AnimationController,
        armature: &Armature,
        bone_name: &str,
        recursive: bool,
    ) -> Result<(), Error> {
        if armature.bone_index(bone_name).is_none() {
            return Err(Error::UnknownBone {
                name: bone_name.to_string(),
            });
        }
        self.with_state_mut(controller, |state, _| {
            state.remove_bone_mask(armature, bone_name, recursive)
        })
    }

    pub fn remove_all_bone_mask(&self, controller: &mut AnimationController) -> Result<(), Error> {
        self.with_state_mut(controller, |state, _| state.remove_all_bone_mask())
    }

    /// Nests `child` under this state, driven by `timelines`.
    pub fn add_state(
        &self,
        controller: &mut AnimationController,
        child: AnimationStateHandle,
        timelines: &[Arc<TimelineData>],
    ) -> Result<(), Error> {
        controller.add_state(*self, child, timelines)
    }

    pub fn activate_timeline(&self, controller: &mut AnimationController) -> Result<(), Error> {
        self.with_state_mut(controller, |state, timelines| {
            state.activate_timeline(timelines)
        })
    }
}

/// Drives every animation state playing on one armature.
#[derive(Debug)]
pub struct AnimationController {
    animations: HashMap<String, Arc<AnimationData>>,
    animation_names: Vec<String>,
    states: Pool<AnimationState>,
    timelines: Pool<TimelineState>,
    /// Layer descending, then insertion order.
    active: Vec<StateId>,
    last_state: Option<StateId>,
    time_scale: f32,
}

impl Default for AnimationController {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationController {
    pub fn new() -> Self {
        Self {
            animations: HashMap::new(),
            animation_names: Vec::new(),
            states: Pool::new(),
            timelines: Pool::new(),
            active: Vec::new(),
            last_state: None,
            time_scale: 1.0,
        }
    }

    pub fn with_animations(animations: impl IntoIterator<Item = AnimationData>) -> Self {
        let mut controller = Self::new();
        for animation in animations {
            controller.add_animation(animation);
        }
        controller
    }

    /// Registers a clip; a clip with the same name is replaced for future fade-ins.
    pub fn add_animation(&mut self, data: AnimationData) -> Arc<AnimationData> {
        let data = Arc::new(data);
        if self
            .animations
            .insert(data.name.clone(), data.clone())
            .is_none()
        {
            self.animation_names.push(data.name.clone());
        }
        data
    }

    pub fn animation(&self, name: &str) -> Option<&Arc<AnimationData>> {
        self.animations.get(name)
    }

    pub fn animation_names(&self) -> &[String] {
        &self.animation_names
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.time_scale = time_scale;
    }

    /// Starts the clip named by `config.animation`, fading out the states its fade-out mode
    /// selects.
    pub fn fade_in(
        &mut self,
        armature: &mut Armature,
        config: &AnimationConfig,
    ) -> Result<AnimationStateHandle, Error> {
        let data = self
            .animations
            .get(&config.animation)
            .cloned()
            .ok_or_else(|| Error::UnknownAnimation {
                name: config.animation.clone(),
            })?;
        if !config.fade_in_time.is_finite()
            || !config.time_scale.is_finite()
            || !config.weight.is_finite()
        {
            return Err(Error::InvalidValue {
                message: format!(
                    "fade-in time, time scale and weight must be finite, got {}, {} and {}",
                    config.fade_in_time, config.time_scale, config.weight
                ),
            });
        }

        if config.fade_out_mode == AnimationFadeOutMode::Single {
            let playing = self.active.iter().copied().find(|id| {
                self.states.get(*id).is_some_and(|state| {
                    state.parent.is_none()
                        && !state.is_fade_out()
                        && state
                            .animation_data()
                            .is_some_and(|d| Arc::ptr_eq(d, &data))
                })
            });
            if let Some(id) = playing {
                return Ok(AnimationStateHandle::new(id));
            }
        }

        self.fade_out_by_mode(config);

        let id = self.states.borrow();
        let layer = config.layer;
        if let Some(state) = self.states.get_mut(id) {
            state.init(armature, data, config);
        }

        let index = self
            .active
            .iter()
            .position(|other| self.states.get(*other).is_some_and(|s| s.layer() < layer))
            .unwrap_or(self.active.len());
        self.active.insert(index, id);
        self.last_state = Some(id);
        armature.cache_frame_index = None;

        if config.fade_in_time <= 0.0 {
            self.advance_time(armature, 0.0);
        }
        Ok(AnimationStateHandle::new(id))
    }

    /// Plays a clip immediately; `play_times` of `-1` uses the clip default.
    pub fn play(
        &mut self,
        armature: &mut Armature,
        animation: &str,
        play_times: i32,
    ) -> Result<AnimationStateHandle, Error> {
        let config = AnimationConfig {
            play_times,
            ..AnimationConfig::new(animation)
        };
        self.fade_in(armature, &config)
    }

    fn fade_out_by_mode(&mut self, config: &AnimationConfig) {
        let fade_out_time = if config.fade_out_time < 0.0 {
            config.fade_in_time
        } else {
            config.fade_out_time
        };

        let targets: Vec<StateId> = self
            .active
            .iter()
            .copied()
            .filter(|id| {
                let Some(state) = self.states.get(*id) else {
                    return false;
                };
                if state.parent.is_some() {
                    return false;
                }
                match config.fade_out_mode {
                    AnimationFadeOutMode::None => false,
                    AnimationFadeOutMode::SameLayer => state.layer() == config.layer,
                    AnimationFadeOutMode::SameGroup => state.group() == config.group,
                    AnimationFadeOutMode::SameLayerAndGroup => {
                        state.layer() == config.layer && state.group() == config.group
                    }
                    AnimationFadeOutMode::All | AnimationFadeOutMode::Single => true,
                }
            })
            .collect();

        for id in targets {
            self.fade_out_state(id, fade_out_time, config.pause_fade_out);
        }
    }

    fn fade_out_state(&mut self, id: StateId, seconds: f32, pause_playhead: bool) {
        let Some(state) = self.states.get_mut(id) else {
            return;
        };
        let mut pending = state.fade_out(seconds, pause_playhead, &mut self.timelines);
        while let Some(child) = pending.pop() {
            if let Some(state) = self.states.get_mut(child) {
                pending.extend(state.fade_out_nested(&mut self.timelines));
            }
        }
    }

    /// Advances every active state by `passed_time` seconds (scaled by the controller time
    /// scale) and dispatches the events they queued.
    pub fn advance_time(&mut self, armature: &mut Armature, passed_time: f32) {
        let passed_time = passed_time.abs() * self.time_scale;

        armature.reset_blend_states();
        self.remove_finished_states();

        let cache_frame_rate = match self.active.as_slice() {
            [only] => self
                .states
                .get(*only)
                .and_then(|s| s.animation_data())
                .map_or(0.0, |d| d.cache_frame_rate),
            _ => {
                armature.cache_frame_index = None;
                0.0
            }
        };

        let roots: Vec<StateId> = self
            .active
            .iter()
            .copied()
            .filter(|id| self.is_root(*id))
            .collect();

        let mut queue = VecDeque::new();
        for root in roots {
            queue.push_back(root);
            while let Some(id) = queue.pop_front() {
                self.advance_state(id, armature, passed_time, cache_frame_rate);
                queue.extend(self.active.iter().copied().filter(|child| {
                    self.states
                        .get(*child)
                        .is_some_and(|s| s.parent == Some(id))
                }));
            }
        }

        armature.drain_events();
    }

    fn is_root(&self, id: StateId) -> bool {
        self.states
            .get(id)
            .and_then(|s| s.parent)
            .is_none_or(|parent| !self.states.contains(parent))
    }

    fn advance_state(
        &mut self,
        id: StateId,
        armature: &mut Armature,
        passed_time: f32,
        cache_frame_rate: f32,
    ) {
        let Some(state) = self.states.get(id) else {
            return;
        };
        let parent_weight = state
            .parent
            .and_then(|parent| self.states.get(parent))
            .map_or(1.0, |parent| parent.weight_result());
        let child_positions: Vec<(StateId, f32)> = state
            .nested_children(&self.timelines)
            .into_iter()
            .filter_map(|child| self.states.get(child).map(|s| (child, s.position_x())))
            .collect();

        let Some(state) = self.states.get_mut(id) else {
            return;
        };
        let mut ctx = StateContext {
            armature,
            timelines: &mut self.timelines,
            parent_weight,
            child_positions: &child_positions,
        };
        let outcome = state.advance_time(id, passed_time, cache_frame_rate, &mut ctx);
        self.apply_tick_outcome(outcome);
    }

    fn apply_tick_outcome(&mut self, outcome: TickOutcome) {
        for effect in outcome.nested {
            match effect {
                NestedEffect::Progress(child, progress) => {
                    if let Some(state) = self.states.get_mut(child) {
                        let time = state.total_time() * progress;
                        state.set_current_time(time, &mut self.timelines);
                    }
                }
                NestedEffect::Weight(child, weight) => {
                    if let Some(state) = self.states.get_mut(child) {
                        state.set_weight(weight, &mut self.timelines);
                    }
                }
                NestedEffect::Parameter(child, x, y) => {
                    if let Some(state) = self.states.get_mut(child) {
                        state.set_parameter(x, y);
                    }
                }
            }
        }

        if let Some(child) = outcome.activated {
            if let Some(state) = self.states.get_mut(child) {
                state.activate_timeline(&mut self.timelines);
            }
        }
        for (child, weight) in outcome.child_weights {
            if let Some(state) = self.states.get_mut(child) {
                state.set_weight(weight, &mut self.timelines);
            }
        }
        for child in outcome.fade_out_children {
            if let Some(state) = self.states.get_mut(child) {
                let mut pending = state.fade_out_nested(&mut self.timelines);
                while let Some(next) = pending.pop() {
                    if let Some(state) = self.states.get_mut(next) {
                        pending.extend(state.fade_out_nested(&mut self.timelines));
                    }
                }
            }
        }
    }

    fn remove_finished_states(&mut self) {
        let finished: Vec<StateId> = self
            .active
            .iter()
            .copied()
            .filter(|id| self.states.get(*id).is_none_or(|s| s.is_finished()))
            .collect();
        for id in finished {
            self.remove_state_id(id);
        }
    }

    /// Tears a state down and returns its timelines to the pool.
    ///
    /// Returns `false` when the handle is already stale.
    pub fn remove_state(&mut self, handle: AnimationStateHandle) -> bool {
        self.remove_state_id(handle.id)
    }

    fn remove_state_id(&mut self, id: StateId) -> bool {
        self.active.retain(|s| *s != id);
        if self.last_state == Some(id) {
            self.last_state = self.active.last().copied();
        }

        let Some(state) = self.states.get_mut(id) else {
            return false;
        };
        log::debug!("removing animation state {}", state.name());
        let mut children = state.release_timelines(&mut self.timelines);
        children.extend(
            self.active
                .iter()
                .copied()
                .filter(|child| self.states.get(*child).is_some_and(|s| s.parent == Some(id))),
        );
        for child in children {
            if let Some(state) = self.states.get_mut(child) {
                if state.parent == Some(id) {
                    state.detach_from_parent();
                }
            }
        }
        self.states.release(id)
    }

    fn add_state(
        &mut self,
        parent: AnimationStateHandle,
        child: AnimationStateHandle,
        timelines: &[Arc<TimelineData>],
    ) -> Result<(), Error> {
        if !self.states.contains(parent.id) || !self.states.contains(child.id) {
            return Err(Error::InvalidHandle);
        }
        if parent == child || self.is_ancestor(child.id, parent.id) {
            return Err(Error::InvalidValue {
                message: "nesting an animation state under itself".to_string(),
            });
        }

        let Some(parent_state) = self.states.get_mut(parent.id) else {
            return Err(Error::InvalidHandle);
        };
        let position = parent_state.add_nested_timelines(child.id, timelines, &mut self.timelines);
        let drives_progress = timelines
            .iter()
            .any(|t| t.kind == TimelineType::AnimationProgress);

        let Some(child_state) = self.states.get_mut(child.id) else {
            return Err(Error::InvalidHandle);
        };
        if let Some((x, y)) = position {
            child_state.set_position(x, y);
            child_state.set_weight(0.0, &mut self.timelines);
        }
        if drives_progress || child_state.parent.is_none() {
            child_state.parent = Some(parent.id);
        }
        child_state.progress_driven |= drives_progress;

        if child_state.parent == Some(parent.id) {
            let layer = self.states.get(parent.id).map_or(0, |s| s.layer());
            self.inherit_layer(child.id, layer);
        }
        Ok(())
    }

    /// Moves `id` and everything nested below it onto `layer`, keeping `active` layer-sorted.
    ///
    /// Children tick right after their root, so they must share its layer for accumulators to
    /// see contributions in descending layer order.
    fn inherit_layer(&mut self, id: StateId, layer: i32) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(state) = self.states.get_mut(current) {
                state.set_layer(layer);
            }
            pending.extend(self.active.iter().copied().filter(|other| {
                self.states
                    .get(*other)
                    .is_some_and(|s| s.parent == Some(current))
            }));
        }

        let states = &self.states;
        self.active.sort_by_key(|other| {
            Reverse(states.get(*other).map_or(i32::MIN, |s| s.layer()))
        });
    }

    /// Whether `ancestor` appears in the parent chain of `state`.
    fn is_ancestor(&self, ancestor: StateId, state: StateId) -> bool {
        let mut current = self.states.get(state).and_then(|s| s.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.states.get(id).and_then(|s| s.parent);
        }
        false
    }

    /// Pauses the named state, or every state when `name` is `None`.
    pub fn stop(&mut self, name: Option<&str>) -> Result<(), Error> {
        match name {
            Some(name) => {
                let handle = self.state(name).ok_or_else(|| Error::UnknownAnimation {
                    name: name.to_string(),
                })?;
                handle.stop(self)
            }
            None => {
                for id in &self.active {
                    if let Some(state) = self.states.get_mut(*id) {
                        state.stop();
                    }
                }
                Ok(())
            }
        }
    }

    /// Removes every state and forgets cached poses.
    pub fn reset(&mut self, armature: &mut Armature) {
        for id in self.active.clone() {
            self.remove_state_id(id);
        }
        self.last_state = None;
        armature.clear_cached_poses();
    }

    /// Most recently added state called `name`.
    pub fn state(&self, name: &str) -> Option<AnimationStateHandle> {
        self.active
            .iter()
            .rev()
            .copied()
            .find(|id| self.states.get(*id).is_some_and(|s| s.name() == name))
            .map(AnimationStateHandle::new)
    }

    /// Active states, layer descending then insertion order.
    pub fn states(&self) -> Vec<AnimationStateHandle> {
        self.active
            .iter()
            .copied()
            .map(AnimationStateHandle::new)
            .collect()
    }

    pub fn last_state(&self) -> Option<AnimationStateHandle> {
        self.last_state.map(AnimationStateHandle::new)
    }

    pub fn get(&self, handle: AnimationStateHandle) -> Option<&AnimationState> {
        self.states.get(handle.id)
    }

    pub fn timeline(&self, id: TimelineId) -> Option<&TimelineState> {
        self.timelines.get(id)
    }

    pub fn is_playing(&self) -> bool {
        self.active
            .iter()
            .any(|id| self.states.get(*id).is_some_and(|s| s.is_playing()))
    }

    pub fn is_completed(&self) -> bool {
        !self.active.is_empty()
            && self
                .active
                .iter()
                .all(|id| self.states.get(*id).is_some_and(|s| s.is_completed()))
    }

    pub fn live_state_count(&self) -> usize {
        self.states.live_count()
    }

    pub fn live_timeline_count(&self) -> usize {
        self.timelines.live_count()
    }
}
