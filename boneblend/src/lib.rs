//! Skeletal animation state blending (renderer-agnostic).
//!
//! An [`AnimationController`] plays clips on an [`Armature`]: it fades states in and out,
//! advances their timelines and resolves overlapping contributions per bone or slot property
//! through layered [`BlendState`] accumulators.

#![forbid(unsafe_code)]

mod config;
mod error;
mod model;
mod pool;
mod runtime;

pub use config::*;
pub use error::*;
pub use model::*;
pub use pool::*;
pub use runtime::*;
