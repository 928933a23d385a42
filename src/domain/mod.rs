//! Domain types, DTOs, and the pure state-machine logic of the procurement
//! engine. Everything here is side-effect free; persistence and HTTP live in
//! `routes` and `services`.

pub mod awards;
pub mod bafo;
pub mod evaluations;
pub mod events;
pub mod leveling;
pub mod projects;
pub mod submissions;
pub mod vendors;
