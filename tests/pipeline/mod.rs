mod common;

mod aggregation;
mod end_to_end;
mod features;
mod promotion;
