use std::collections::HashMap;

/// Property group a [`BlendState`] resolves.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendKind {
    BoneTransform,
    BoneAlpha,
    Surface,
    SlotDeform,
    SlotAlpha,
    SlotZIndex,
}

/// Accumulator cache key: property group plus bone or slot index.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BlendKey {
    pub kind: BlendKind,
    pub target: usize,
}

impl BlendKey {
    pub fn new(kind: BlendKind, target: usize) -> Self {
        Self { kind, target }
    }
}

/// Resolves weighted contributions from several animation states to one property group.
///
/// States must call [`BlendState::update`] in descending layer order within a tick. Higher layers
/// claim weight first; whatever they leave is carried to the next lower layer, and the total
/// handed out in one tick never exceeds `1.0`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlendState {
    /// Number of `update` calls since the last reset.
    pub dirty: u32,
    pub layer: i32,
    pub left_weight: f32,
    pub layer_weight: f32,
    pub blend_weight: f32,
}

impl BlendState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Registers a contribution of `weight` from a state on `layer`.
    ///
    /// Returns `true` when the caller should blend, with the granted share in `blend_weight`.
    pub fn update(&mut self, layer: i32, weight: f32) -> bool {
        if self.dirty == 0 {
            self.dirty = 1;
            self.layer = layer;
            self.left_weight = 1.0;
            self.blend_weight = weight.min(1.0);
            self.layer_weight = self.blend_weight;
            return true;
        }

        if self.left_weight <= 0.0 {
            return false;
        }

        if self.layer != layer {
            debug_assert!(
                layer < self.layer,
                "blend contributions must arrive in descending layer order ({layer} after {})",
                self.layer
            );
            if self.layer_weight >= self.left_weight {
                self.dirty += 1;
                self.layer = layer;
                self.left_weight = 0.0;
                self.blend_weight = 0.0;
                return false;
            }

            self.layer = layer;
            self.left_weight -= self.layer_weight;
            self.layer_weight = 0.0;
        }

        // Never grant more than the layer has left.
        let remaining = self.left_weight - self.layer_weight;
        if remaining <= 0.0 {
            return false;
        }
        self.dirty += 1;
        self.blend_weight = (weight * self.left_weight).min(remaining);
        self.layer_weight += self.blend_weight;
        true
    }
}

/// Per-armature accumulator cache, created on demand and reused across states.
#[derive(Debug, Default)]
pub struct BlendStates {
    states: HashMap<BlendKey, BlendState>,
}

impl BlendStates {
    pub fn get_or_create(&mut self, key: BlendKey) -> &mut BlendState {
        self.states.entry(key).or_default()
    }

    pub fn get(&self, key: BlendKey) -> Option<&BlendState> {
        self.states.get(&key)
    }

    pub fn get_mut(&mut self, key: BlendKey) -> Option<&mut BlendState> {
        self.states.get_mut(&key)
    }

    /// Start-of-tick reset of every cached accumulator.
    pub fn reset_all(&mut self) {
        for state in self.states.values_mut() {
            state.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
