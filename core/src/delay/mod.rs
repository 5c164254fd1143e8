pub mod evaluator;
pub mod fixed_point;

pub use evaluator::{evaluate, evaluate_frame, select_slot, DelayResult, SelectedSlot};
pub use fixed_point::{encode_fine_delay, encode_phase};
