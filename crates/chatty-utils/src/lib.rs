mod arrayvec;
mod assert;

pub use arrayvec::{ArrayStr, ArrayStrTooLong, ArrayVec, array_vec};
