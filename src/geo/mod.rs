pub mod cell;
pub mod movement;
