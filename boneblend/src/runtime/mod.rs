mod animation_state;
mod armature;
mod blend_state;
mod controller;
mod events;
mod timeline;

pub use animation_state::*;
pub use armature::*;
pub use blend_state::*;
pub use controller::*;
pub use events::*;
pub use timeline::*;

#[cfg(test)]
mod test_fixtures;



#[cfg(test)]
mod animation_state_tests;

#[cfg(test)]
mod bone_mask_tests;


#[cfg(test)]
mod nested_state_tests;
