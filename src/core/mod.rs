pub mod assembler;
pub mod engine;
pub mod events;
pub mod model;
pub mod planner;
