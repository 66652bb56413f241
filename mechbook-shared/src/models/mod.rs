pub mod booking;
pub mod events;
pub mod location;
pub mod review;
