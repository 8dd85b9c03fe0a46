//! Scenario tests spanning the manager, groups and built-in systems

mod frame_protocol;
mod transform_hierarchy;
