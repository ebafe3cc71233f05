pub mod averages;
pub mod backup;
pub mod core;
pub mod evaluations;
pub mod grades;
pub mod legacy;
pub mod roster;
pub mod setup;
