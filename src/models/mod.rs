//! Core data models shared by the audit engine
//!
//! This module contains the vocabulary every other component speaks:
//! which entity a change touched, what kind of change it was, who made it
//! and what the entity looked like.

pub mod action;
pub mod entity;

pub use action::{ActorContext, AuditAction};
pub use entity::{EntityState, EntityType, FieldPolicy};
