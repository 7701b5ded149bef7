pub mod decoder;
pub mod events;
pub mod reducer;
